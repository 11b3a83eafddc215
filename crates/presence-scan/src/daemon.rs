//! # Presence Daemon
//!
//! The single scan loop tying the orchestrator, tracker, store and notifier
//! together.
//!
//! ## Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   stop? ──yes──► shutdown sources, return table                        │
//! │     │ no                                                                │
//! │     ▼                                                                   │
//! │   run_cycle ──► all sources failed? ──yes──► sleep(backoff) ─┐          │
//! │     │                      │ no                              │          │
//! │     │                      ▼                                 │          │
//! │     │          tracker.process(table, sightings, now)        │          │
//! │     │                      │                                 │          │
//! │     │          changed? ──► store.save (errors logged)       │          │
//! │     │          events  ──► notifier (never blocks)           │          │
//! │     │                      │                                 │          │
//! │     │                      ▼                                 │          │
//! │     │          sleep(max(0, interval − elapsed))             │          │
//! │     └──────────────────────┴─────────────────────────────────┘          │
//! │                 (stop is also observed during every sleep)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The table is owned by the loop and moves through each cycle by value.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use chrono::{DateTime, Utc};
use presence_core::{
    MessageFormatter, PresenceTracker, SightingFilter, TrackerTable, TransitionKind,
};
use presence_store::StateStore;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::PresenceConfig;
use crate::error::ScanResult;
use crate::notify::NotifierHandle;
use crate::orchestrator::{ScanOrchestrator, ScanReport};
use crate::runner::CommandRunner;
use crate::source::DiscoverySource;
use crate::sources::{
    AnnounceSource, BluezCli, DiscoveryFilter, RadioSource, ReachabilitySource,
};

/// What one cycle decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    /// The tracker ran this cycle.
    pub tracked: bool,
    /// Transitions emitted.
    pub events: usize,
    /// The changed table reached disk.
    pub saved: bool,
    /// How long to wait before the next cycle.
    pub wait: Duration,
}

/// Builds the enabled sources from configuration.
pub fn build_sources(
    config: &PresenceConfig,
    runner: Arc<dyn CommandRunner>,
) -> Vec<Box<dyn DiscoverySource>> {
    let mut sources: Vec<Box<dyn DiscoverySource>> = Vec::new();

    if config.radio.enabled {
        let bus = Arc::new(BluezCli::new(runner.clone(), config.scan.source_timeout()));
        let filter = DiscoveryFilter {
            transport: config.scan.transport,
            duplicate_data: true,
        };
        sources.push(Box::new(RadioSource::new(
            bus,
            config.scan.discovery_mode,
            filter,
        )));
    }
    if config.network.enabled {
        sources.push(Box::new(ReachabilitySource::new(
            runner.clone(),
            config.network.hosts.clone(),
            Duration::from_secs(config.network.ping_timeout_secs),
        )));
    }
    if config.announce.enabled {
        sources.push(Box::new(AnnounceSource::new(runner)));
    }

    sources
}

/// Builds the orchestrator for a config.
pub fn build_orchestrator(
    config: &PresenceConfig,
    runner: Arc<dyn CommandRunner>,
) -> ScanOrchestrator {
    let filter = SightingFilter::new(&config.filter.name_whitelist, &config.filter.ignore_keys);
    ScanOrchestrator::new(
        build_sources(config, runner),
        filter,
        config.scan.window(),
        config.scan.source_timeout(),
    )
}

/// The scan loop.
pub struct PresenceDaemon {
    orchestrator: ScanOrchestrator,
    tracker: PresenceTracker,
    store: StateStore,
    notifier: NotifierHandle,
    formatter: MessageFormatter,
    interval: Duration,
    backoff: Constant,
}

impl PresenceDaemon {
    pub fn new(
        config: &PresenceConfig,
        orchestrator: ScanOrchestrator,
        store: StateStore,
        notifier: NotifierHandle,
    ) -> ScanResult<Self> {
        Ok(Self {
            orchestrator,
            tracker: PresenceTracker::new(config.scan.gone_after())?,
            store,
            notifier,
            formatter: MessageFormatter::new(
                &config.alerts.app_name,
                config.alerts.location_tag.as_deref(),
            ),
            interval: config.scan.interval(),
            backoff: Constant::new(config.scan.backoff()),
        })
    }

    /// Initializes sources, loads state, announces startup and runs until
    /// `stop` turns true. Returns the final table.
    pub async fn run(
        mut self,
        config: &PresenceConfig,
        mut stop: watch::Receiver<bool>,
    ) -> ScanResult<TrackerTable> {
        self.orchestrator.initialize().await?;

        let mut table = self.store.load();
        info!(
            devices = table.len(),
            present = table.present_count(),
            interval_secs = config.scan.interval_secs,
            window_secs = config.scan.window_secs,
            gone_after_secs = config.scan.gone_after_secs,
            mode = %config.scan.discovery_mode,
            "Presence daemon started"
        );
        self.notifier.notify(self.formatter.started(
            config.scan.interval_secs,
            config.scan.window_secs,
            config.scan.gone_after_secs,
        ));

        loop {
            if *stop.borrow() {
                break;
            }

            let report = self.orchestrator.run_cycle().await;
            let (next, summary) = self.apply_report(table, &report, Utc::now());
            table = next;

            if sleep_or_stop(summary.wait, &mut stop).await {
                break;
            }
        }

        info!(devices = table.len(), "Stopping scan loop");
        self.orchestrator.shutdown().await;
        Ok(table)
    }

    /// Applies one cycle's report to the table.
    ///
    /// Persists on change and queues a notification per transition. A
    /// report in which every source failed leaves the table untouched.
    pub fn apply_report(
        &mut self,
        table: TrackerTable,
        report: &ScanReport,
        now: DateTime<Utc>,
    ) -> (TrackerTable, CycleSummary) {
        if report.all_failed() {
            let wait = self
                .backoff
                .next_backoff()
                .unwrap_or(self.interval);
            warn!(
                failures = report.failures.len(),
                backoff_ms = wait.as_millis() as u64,
                "Every source failed this cycle"
            );
            return (
                table,
                CycleSummary {
                    tracked: false,
                    events: 0,
                    saved: false,
                    wait,
                },
            );
        }
        self.backoff.reset();

        let outcome = self.tracker.process(table, &report.sightings, now);

        let mut saved = false;
        if outcome.changed {
            match self.store.save(&outcome.table) {
                Ok(()) => saved = true,
                Err(e) => error!(error = %e, "Failed to persist state; continuing in memory"),
            }
        }

        for event in &outcome.events {
            match event.kind {
                TransitionKind::Detected => info!(
                    key = %event.key,
                    name = %event.display_name,
                    kind = %event.device_kind,
                    rssi = ?event.signal_strength,
                    "Device detected"
                ),
                TransitionKind::Lost => info!(
                    key = %event.key,
                    name = %event.display_name,
                    kind = %event.device_kind,
                    "Device lost"
                ),
            }
            self.notifier.notify(self.formatter.event(event));
        }

        let wait = self.interval.saturating_sub(report.elapsed);
        debug!(
            present = outcome.table.present_count(),
            events = outcome.events.len(),
            wait_ms = wait.as_millis() as u64,
            "Cycle processed"
        );

        let summary = CycleSummary {
            tracked: true,
            events: outcome.events.len(),
            saved,
            wait,
        };
        (outcome.table, summary)
    }
}

/// Sleeps, waking early on stop. Returns true if the loop should exit.
async fn sleep_or_stop(wait: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if wait.is_zero() {
        return *stop.borrow();
    }
    let sender_gone = tokio::select! {
        _ = tokio::time::sleep(wait) => false,
        changed = stop.changed() => changed.is_err(),
    };
    sender_gone || *stop.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::notify::tests::RecordingSink;
    use crate::notify::Notifier;
    use crate::orchestrator::tests::{phone, ScriptedSource};
    use chrono::TimeZone;
    use presence_core::{DeviceStatus, SightingSet};
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn report(sightings: SightingSet, elapsed: Duration) -> ScanReport {
        ScanReport {
            sightings,
            elapsed,
            succeeded: 1,
            ..ScanReport::default()
        }
    }

    struct Harness {
        daemon: PresenceDaemon,
        sink: RecordingSink,
        store: StateStore,
        _dir: TempDir,
    }

    fn harness(sources: Vec<Box<dyn DiscoverySource>>) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let config = PresenceConfig::default();
        let orchestrator = ScanOrchestrator::new(
            sources,
            SightingFilter::allow_all(),
            config.scan.window(),
            config.scan.source_timeout(),
        );
        let sink = RecordingSink::default();
        let (notifier, _task) = Notifier::new(vec![Box::new(sink.clone())]).start();
        let daemon = PresenceDaemon::new(&config, orchestrator, store.clone(), notifier).unwrap();
        Harness {
            daemon,
            sink,
            store,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_first_sighting_persists_and_waits_remaining_interval() {
        let mut h = harness(Vec::new());
        let sightings: SightingSet = [phone()].into_iter().collect();

        let (table, summary) =
            h.daemon
                .apply_report(TrackerTable::new(), &report(sightings, Duration::from_secs(8)), t0());

        assert!(summary.tracked);
        assert!(summary.saved);
        assert_eq!(summary.events, 1);
        assert_eq!(summary.wait, Duration::from_secs(12));
        assert_eq!(table.len(), 1);
        assert_eq!(h.store.load(), table);
    }

    #[tokio::test]
    async fn test_lost_after_sixty_one_seconds_unseen() {
        let mut h = harness(Vec::new());
        let seen: SightingSet = [phone()].into_iter().collect();
        let (table, _) = h.daemon.apply_report(TrackerTable::new(), &report(seen, Duration::ZERO), t0());

        let (table, summary) = h.daemon.apply_report(
            table,
            &report(SightingSet::new(), Duration::ZERO),
            t0() + chrono::Duration::seconds(61),
        );
        assert_eq!(summary.events, 1);
        assert_eq!(table.get(&phone().key).unwrap().status, DeviceStatus::Gone);
        assert_eq!(
            h.store.load().get(&phone().key).unwrap().status,
            DeviceStatus::Gone
        );
    }

    #[tokio::test]
    async fn test_all_failed_skips_tracking_and_backs_off() {
        let mut h = harness(Vec::new());
        let seen: SightingSet = [phone()].into_iter().collect();
        let (table, _) = h.daemon.apply_report(TrackerTable::new(), &report(seen, Duration::ZERO), t0());

        let failed = ScanReport {
            succeeded: 0,
            failures: vec![crate::orchestrator::SourceFailure {
                source: "radio",
                error: SourceError::bus("StartDiscovery", "NotReady"),
            }],
            ..ScanReport::default()
        };
        // far past the threshold, but nothing is marked lost without data
        let (table, summary) =
            h.daemon
                .apply_report(table, &failed, t0() + chrono::Duration::seconds(600));

        assert!(!summary.tracked);
        assert!(!summary.saved);
        assert_eq!(summary.wait, Duration::from_secs(5));
        assert!(table.get(&phone().key).unwrap().is_present());
    }

    #[tokio::test]
    async fn test_overlong_cycle_does_not_sleep() {
        let mut h = harness(Vec::new());
        let (_, summary) = h.daemon.apply_report(
            TrackerTable::new(),
            &report(SightingSet::new(), Duration::from_secs(45)),
            t0(),
        );
        assert_eq!(summary.wait, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_tracking() {
        let dir = TempDir::new().unwrap();
        // a directory where the state file should be makes the rename fail
        let blocked = dir.path().join("state.json");
        std::fs::create_dir_all(blocked.join("occupied")).unwrap();

        let mut h = harness(Vec::new());
        h.daemon.store = StateStore::new(&blocked);
        let seen: SightingSet = [phone()].into_iter().collect();
        let (table, summary) =
            h.daemon.apply_report(TrackerTable::new(), &report(seen, Duration::ZERO), t0());

        assert!(!summary.saved);
        assert!(blocked.is_dir());
        assert_eq!(summary.events, 1);
        assert!(table.get(&phone().key).unwrap().is_present());

        // tracking continues from the in-memory table
        let again: SightingSet = [phone()].into_iter().collect();
        let (table, summary) = h.daemon.apply_report(
            table,
            &report(again, Duration::ZERO),
            t0() + chrono::Duration::seconds(20),
        );
        assert!(!summary.saved);
        assert_eq!(summary.events, 0);
        assert_eq!(
            table.get(&phone().key).unwrap().last_seen,
            t0() + chrono::Duration::seconds(20)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_announces_detects_and_stops() {
        let radio = ScriptedSource::new("radio").then(Ok(vec![phone()]));
        let h = harness(vec![Box::new(radio)]);
        let sink = h.sink.clone();
        let config = PresenceConfig::default();
        let (stop_tx, stop_rx) = watch::channel(false);

        let runner = tokio::spawn(async move {
            let table = h.daemon.run(&config, stop_rx).await;
            (table, h.store, h._dir)
        });

        // three cycles at a 20 s interval
        tokio::time::sleep(Duration::from_secs(50)).await;
        stop_tx.send(true).unwrap();
        let (table, store, _dir) = runner.await.unwrap();
        let table = table.unwrap();

        assert_eq!(table.present_count(), 1);
        assert_eq!(store.load(), table);

        tokio::task::yield_now().await;
        let sent = sink.sent.lock().unwrap().clone();
        assert!(sent[0].starts_with("▶️ Presence started."));
        let detections = sent.iter().filter(|m| m.contains("DETECTED")).count();
        assert_eq!(detections, 1);
    }

    #[tokio::test]
    async fn test_run_aborts_without_adapter() {
        let mut radio = ScriptedSource::new("radio");
        radio.ready = Err(SourceError::NoAdapter {
            interface: "org.bluez.Adapter1",
        });
        let h = harness(vec![Box::new(radio)]);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let result = h.daemon.run(&PresenceConfig::default(), stop_rx).await;
        assert!(result.is_err());
    }
}
