//! # Scan Orchestrator
//!
//! Runs one scan cycle across every enabled source.
//!
//! ## Cycle Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          One Scan Cycle                                 │
//! │                                                                         │
//! │   radio.probe(window)   network.probe(window)   announce.probe(window) │
//! │        │ timeout              │ timeout               │ timeout         │
//! │        └──────────────────────┼───────────────────────┘                 │
//! │                               ▼ join                                    │
//! │                   union (keys are namespaced)                           │
//! │                               │                                         │
//! │                               ▼                                         │
//! │                       SightingFilter::apply                             │
//! │                               │                                         │
//! │                               ▼                                         │
//! │          ScanReport { sightings, elapsed, failures, succeeded }        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Handling
//! - transient: logged, source reset, retried next cycle
//! - degraded: logged once, source skipped for the rest of the run
//! - fatal: only meaningful during [`ScanOrchestrator::initialize`]

use std::time::Duration;

use futures_util::future::join_all;
use presence_core::{SightingFilter, SightingSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{FailureKind, ScanError, ScanResult, SourceError};
use crate::source::DiscoverySource;

/// A source failure recorded in a [`ScanReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: &'static str,
    pub error: SourceError,
}

/// Result of one cycle.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Merged, filtered sightings.
    pub sightings: SightingSet,
    /// Wall time the cycle took.
    pub elapsed: Duration,
    /// Sources that failed this cycle.
    pub failures: Vec<SourceFailure>,
    /// Sources that returned a result.
    pub succeeded: usize,
    /// Sightings removed by the filter.
    pub filtered: usize,
}

impl ScanReport {
    /// True when no source produced a result.
    pub fn all_failed(&self) -> bool {
        self.succeeded == 0
    }
}

struct SourceSlot {
    source: Box<dyn DiscoverySource>,
    disabled: bool,
}

/// Drives the sources through one cycle at a time.
pub struct ScanOrchestrator {
    slots: Vec<SourceSlot>,
    filter: SightingFilter,
    window: Duration,
    source_timeout: Duration,
}

impl ScanOrchestrator {
    pub fn new(
        sources: Vec<Box<dyn DiscoverySource>>,
        filter: SightingFilter,
        window: Duration,
        source_timeout: Duration,
    ) -> Self {
        Self {
            slots: sources
                .into_iter()
                .map(|source| SourceSlot {
                    source,
                    disabled: false,
                })
                .collect(),
            filter,
            window,
            source_timeout,
        }
    }

    /// Number of sources still in use.
    pub fn active_sources(&self) -> usize {
        self.slots.iter().filter(|s| !s.disabled).count()
    }

    /// Names of the sources still in use.
    pub fn active_names(&self) -> Vec<&'static str> {
        self.slots
            .iter()
            .filter(|s| !s.disabled)
            .map(|s| s.source.name())
            .collect()
    }

    /// Initializes every source.
    ///
    /// Fatal failures abort; degraded sources are dropped; transient
    /// failures are retried by the first probe.
    pub async fn initialize(&mut self) -> ScanResult<()> {
        for slot in &mut self.slots {
            let name = slot.source.name();
            match slot.source.ensure_ready().await {
                Ok(()) => debug!(source = name, "Source ready"),
                Err(e) => match e.kind() {
                    FailureKind::Fatal => {
                        error!(source = name, error = %e, "Source failed to initialize");
                        return Err(ScanError::Init {
                            source_name: name,
                            error: e,
                        });
                    }
                    FailureKind::Degraded => {
                        warn!(source = name, error = %e, "Source unavailable, disabling");
                        slot.disabled = true;
                    }
                    FailureKind::Transient => {
                        warn!(source = name, error = %e, "Source not ready yet, will retry");
                    }
                },
            }
        }

        if self.active_sources() == 0 {
            warn!("No discovery source is usable");
        }
        info!(sources = ?self.active_names(), "Scan orchestrator initialized");
        Ok(())
    }

    /// Runs one cycle.
    pub async fn run_cycle(&mut self) -> ScanReport {
        let started = Instant::now();
        let window = self.window;
        let limit = self.source_timeout;

        let outcomes = join_all(self.slots.iter_mut().filter(|s| !s.disabled).map(
            |slot| async move {
                let result = match tokio::time::timeout(limit, slot.source.probe(window)).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::TimedOut(limit)),
                };
                (slot, result)
            },
        ))
        .await;

        let mut report = ScanReport::default();
        for (slot, result) in outcomes {
            let name = slot.source.name();
            match result {
                Ok(found) => {
                    debug!(source = name, count = found.len(), "Source probed");
                    report.succeeded += 1;
                    report.sightings.extend(found);
                }
                Err(e) => {
                    match e.kind() {
                        FailureKind::Degraded => {
                            warn!(source = name, error = %e, "Source unavailable, disabling");
                            slot.disabled = true;
                        }
                        FailureKind::Transient | FailureKind::Fatal => {
                            warn!(source = name, error = %e, "Probe failed, resetting source");
                            slot.source.reset().await;
                        }
                    }
                    report.failures.push(SourceFailure {
                        source: name,
                        error: e,
                    });
                }
            }
        }

        report.filtered = self.filter.apply(&mut report.sightings);
        report.elapsed = started.elapsed();
        debug!(
            sightings = report.sightings.len(),
            filtered = report.filtered,
            failures = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Scan cycle complete"
        );
        report
    }

    /// Releases every source's long-lived resources.
    pub async fn shutdown(&mut self) {
        for slot in &mut self.slots {
            slot.source.shutdown().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use presence_core::{DeviceKey, DeviceKind, Sighting};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::error::SourceResult;

    /// Plays back scripted probe results, one per cycle. An exhausted script
    /// repeats its last entry.
    pub(crate) struct ScriptedSource {
        pub name: &'static str,
        pub script: VecDeque<SourceResult<Vec<Sighting>>>,
        pub delay: Duration,
        pub ready: SourceResult<()>,
        pub resets: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        pub(crate) fn new(name: &'static str) -> Self {
            Self {
                name,
                script: VecDeque::new(),
                delay: Duration::ZERO,
                ready: Ok(()),
                resets: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn then(mut self, result: SourceResult<Vec<Sighting>>) -> Self {
            self.script.push_back(result);
            self
        }
    }

    #[async_trait]
    impl DiscoverySource for ScriptedSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn ensure_ready(&mut self) -> SourceResult<()> {
            self.ready.clone()
        }

        async fn probe(&mut self, _window: Duration) -> SourceResult<Vec<Sighting>> {
            tokio::time::sleep(self.delay).await;
            if self.script.len() > 1 {
                self.script.pop_front().unwrap_or(Ok(Vec::new()))
            } else {
                self.script.front().cloned().unwrap_or(Ok(Vec::new()))
            }
        }

        async fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn phone() -> Sighting {
        Sighting::new(DeviceKey::radio("AA:11:22:33:44:55"), "My Phone", DeviceKind::ShortRangeBle)
            .with_signal(Some(-60))
    }

    fn speaker() -> Sighting {
        Sighting::new(DeviceKey::radio("AA:00:00:00:00:02"), "Speaker", DeviceKind::ShortRangeClassic)
    }

    fn tv() -> Sighting {
        Sighting::new(DeviceKey::network("tv.lan"), "tv.lan", DeviceKind::Network)
    }

    fn orchestrator(sources: Vec<Box<dyn DiscoverySource>>, filter: SightingFilter) -> ScanOrchestrator {
        ScanOrchestrator::new(sources, filter, Duration::from_secs(8), Duration::from_secs(15))
    }

    #[tokio::test]
    async fn test_merges_sources_and_applies_filter() {
        let radio = ScriptedSource::new("radio").then(Ok(vec![phone(), speaker()]));
        let network = ScriptedSource::new("network").then(Ok(vec![tv()]));
        let mut orch = orchestrator(
            vec![Box::new(radio), Box::new(network)],
            SightingFilter::new(["phone", "tv"], Vec::<String>::new()),
        );

        let report = orch.run_cycle().await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.filtered, 1);
        assert_eq!(report.sightings.len(), 2);
        assert!(report.sightings.contains(&phone().key));
        assert!(report.sightings.contains(&tv().key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out_and_is_reset() {
        let mut slow = ScriptedSource::new("radio").then(Ok(vec![phone()]));
        slow.delay = Duration::from_secs(60);
        let resets = slow.resets.clone();
        let fast = ScriptedSource::new("network").then(Ok(vec![tv()]));

        let mut orch = orchestrator(vec![Box::new(slow), Box::new(fast)], SightingFilter::allow_all());
        let report = orch.run_cycle().await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error, SourceError::TimedOut(Duration::from_secs(15)));
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert!(report.sightings.contains(&tv().key));
        assert!(report.elapsed >= Duration::from_secs(15));
        assert!(report.elapsed < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_degraded_source_is_disabled() {
        let missing = ScriptedSource::new("announce").then(Err(SourceError::ToolMissing {
            tool: "avahi-browse".into(),
        }));
        let radio = ScriptedSource::new("radio").then(Ok(vec![phone()]));
        let mut orch = orchestrator(vec![Box::new(missing), Box::new(radio)], SightingFilter::allow_all());

        let first = orch.run_cycle().await;
        assert_eq!(first.failures.len(), 1);
        assert_eq!(orch.active_sources(), 1);

        let second = orch.run_cycle().await;
        assert!(second.failures.is_empty());
        assert_eq!(orch.active_names(), vec!["radio"]);
    }

    #[tokio::test]
    async fn test_all_failed_report() {
        let broken = ScriptedSource::new("radio").then(Err(SourceError::bus("StartDiscovery", "NotReady")));
        let mut orch = orchestrator(vec![Box::new(broken)], SightingFilter::allow_all());
        let report = orch.run_cycle().await;
        assert!(report.all_failed());
        assert!(report.sightings.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_fatal_aborts() {
        let mut radio = ScriptedSource::new("radio");
        radio.ready = Err(SourceError::NoAdapter { interface: "org.bluez.Adapter1" });
        let mut orch = orchestrator(vec![Box::new(radio)], SightingFilter::allow_all());

        let err = orch.initialize().await.unwrap_err();
        assert!(matches!(err, ScanError::Init { source_name: "radio", .. }));
    }

    #[tokio::test]
    async fn test_initialize_drops_degraded_keeps_transient() {
        let mut announce = ScriptedSource::new("announce");
        announce.ready = Err(SourceError::ToolMissing { tool: "avahi-browse".into() });
        let mut radio = ScriptedSource::new("radio");
        radio.ready = Err(SourceError::bus("GetManagedObjects", "ServiceUnknown"));

        let mut orch = orchestrator(vec![Box::new(announce), Box::new(radio)], SightingFilter::allow_all());
        orch.initialize().await.unwrap();
        assert_eq!(orch.active_names(), vec!["radio"]);
    }
}
