//! # Presence Tracker
//!
//! The per-device state machine that turns noisy, intermittent sightings into
//! stable Present/Gone transitions.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Per-Key Presence States                             │
//! │                                                                         │
//! │                 sighting                                                │
//! │  ┌──────────┐  (emit detected)   ┌──────────┐                          │
//! │  │ unknown  │ ─────────────────► │ Present  │ ◄──┐ sighting             │
//! │  │ (absent) │                    └────┬─────┘ ───┘ (refresh, no event)  │
//! │  └──────────┘                         │                                 │
//! │                     unseen > gone_after (emit lost)                     │
//! │                                       ▼                                 │
//! │                                  ┌──────────┐                           │
//! │                                  │   Gone   │                           │
//! │                                  └────┬─────┘                           │
//! │                                       │ sighting (emit detected)        │
//! │                                       └────────► Present                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Cycle Processing
//! The table goes in by value and comes back out: the caller's scan loop is
//! the only owner, so no locking is needed. One `now` is captured by the caller
//! and used for every key in the cycle.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use crate::error::{CoreError, CoreResult};
use crate::event::{PresenceEvent, TransitionKind};
use crate::types::{DeviceStatus, SightingSet, TrackedDevice, TrackerTable};

/// Everything one cycle of tracking produced.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// The updated table.
    pub table: TrackerTable,
    /// Transitions, at most one per key.
    pub events: Vec<PresenceEvent>,
    /// True if the table differs from the input and should be persisted.
    pub changed: bool,
}

/// Debouncing presence state machine.
#[derive(Debug, Clone, Copy)]
pub struct PresenceTracker {
    gone_after: Duration,
}

impl PresenceTracker {
    /// Creates a tracker with the given gone-after threshold.
    pub fn new(gone_after: StdDuration) -> CoreResult<Self> {
        let gone_after =
            Duration::from_std(gone_after).map_err(|e| CoreError::DurationOutOfRange {
                field: "gone_after".to_string(),
                reason: e.to_string(),
            })?;
        Ok(PresenceTracker { gone_after })
    }

    /// The configured threshold.
    pub fn gone_after(&self) -> Duration {
        self.gone_after
    }

    /// Applies one cycle's merged sightings to the table.
    ///
    /// ## Passes
    /// 1. Sightings: new or Gone keys become Present and emit `detected`;
    ///    Present keys are refreshed silently.
    /// 2. Lost detection: Present keys not sighted this cycle whose
    ///    `now - last_seen` exceeds the threshold become Gone and emit `lost`.
    ///
    /// The passes touch disjoint keys, so each key yields at most one event.
    pub fn process(
        &self,
        mut table: TrackerTable,
        sightings: &SightingSet,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        let mut events = Vec::new();
        let mut changed = false;

        for sighting in sightings.iter() {
            match table.get_mut(&sighting.key) {
                Some(device) if device.is_present() => {
                    // last_seen never moves backwards, even if the wall clock does
                    if now > device.last_seen {
                        device.last_seen = now;
                    }
                    device.signal_strength = sighting.signal_strength;
                    if !sighting.display_name.is_empty() {
                        device.display_name = sighting.display_name.clone();
                    }
                    if device.device_kind.is_unset() {
                        device.device_kind = sighting.device_kind;
                    }
                    changed = true;
                }
                _ => {
                    let device = TrackedDevice::detected(sighting, now);
                    events.push(PresenceEvent::from_device(
                        TransitionKind::Detected,
                        &device,
                        now,
                    ));
                    table.insert(device);
                    changed = true;
                }
            }
        }

        for device in table.iter_mut() {
            if !device.is_present() || sightings.contains(&device.key) {
                continue;
            }
            if now - device.last_seen > self.gone_after {
                device.status = DeviceStatus::Gone;
                events.push(PresenceEvent::from_device(TransitionKind::Lost, device, now));
                changed = true;
            }
        }

        CycleOutcome {
            table,
            events,
            changed,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceKey, DeviceKind, Sighting};
    use chrono::TimeZone;

    const GONE_AFTER_SECS: u64 = 60;

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(StdDuration::from_secs(GONE_AFTER_SECS)).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn phone() -> Sighting {
        Sighting::new(
            DeviceKey::radio("AA:11:22:33:44:55"),
            "Phone",
            DeviceKind::ShortRangeBle,
        )
        .with_signal(Some(-60))
    }

    fn present_table(last_seen: DateTime<Utc>) -> TrackerTable {
        [TrackedDevice::detected(&phone(), last_seen)].into_iter().collect()
    }

    #[test]
    fn test_first_sighting_detects() {
        let sightings: SightingSet = [phone()].into_iter().collect();
        let outcome = tracker().process(TrackerTable::new(), &sightings, t0());

        assert!(outcome.changed);
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].kind, TransitionKind::Detected);

        let device = outcome.table.get(&phone().key).unwrap();
        assert_eq!(device.status, DeviceStatus::Present);
        assert_eq!(device.display_name, "Phone");
        assert_eq!(device.signal_strength, Some(-60));
        assert_eq!(device.last_seen, t0());
    }

    #[test]
    fn test_lost_after_threshold_plus_epsilon() {
        let now = t0() + Duration::seconds(GONE_AFTER_SECS as i64) + Duration::milliseconds(1);
        let outcome = tracker().process(present_table(t0()), &SightingSet::new(), now);

        assert!(outcome.changed);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].kind, TransitionKind::Lost);
        assert_eq!(
            outcome.table.get(&phone().key).unwrap().status,
            DeviceStatus::Gone
        );
    }

    #[test]
    fn test_still_present_before_threshold() {
        let now = t0() + Duration::seconds(GONE_AFTER_SECS as i64) - Duration::milliseconds(1);
        let outcome = tracker().process(present_table(t0()), &SightingSet::new(), now);

        assert!(!outcome.changed);
        assert!(outcome.events.is_empty());
        assert!(outcome.table.get(&phone().key).unwrap().is_present());
    }

    #[test]
    fn test_exactly_at_threshold_is_not_lost() {
        let now = t0() + Duration::seconds(GONE_AFTER_SECS as i64);
        let outcome = tracker().process(present_table(t0()), &SightingSet::new(), now);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_sixty_one_seconds_unseen_is_lost() {
        let now = t0() + Duration::seconds(61);
        let outcome = tracker().process(present_table(t0()), &SightingSet::new(), now);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].key, phone().key);
    }

    #[test]
    fn test_gone_device_reappears_with_detected() {
        let mut table = present_table(t0());
        let lost = tracker().process(table, &SightingSet::new(), t0() + Duration::seconds(120));
        table = lost.table;

        let sightings: SightingSet = [phone()].into_iter().collect();
        let back = tracker().process(table, &sightings, t0() + Duration::seconds(130));

        assert_eq!(back.events.len(), 1);
        assert_eq!(back.events[0].kind, TransitionKind::Detected);
        let device = back.table.get(&phone().key).unwrap();
        assert!(device.is_present());
        assert_eq!(device.last_seen, t0() + Duration::seconds(130));
    }

    #[test]
    fn test_repeated_sighting_is_silent_but_refreshes() {
        let tracker = tracker();
        let mut table = TrackerTable::new();
        let mut all_events = Vec::new();

        for cycle in 0..10i64 {
            let rssi = -60 - cycle as i16;
            let sightings: SightingSet = [phone().with_signal(Some(rssi))].into_iter().collect();
            let now = t0() + Duration::seconds(cycle * 20);
            let outcome = tracker.process(table, &sightings, now);
            assert!(outcome.changed);
            all_events.extend(outcome.events);
            table = outcome.table;

            let device = table.get(&phone().key).unwrap();
            assert!(device.is_present());
            assert_eq!(device.last_seen, now);
            assert_eq!(device.signal_strength, Some(rssi));
        }

        // only the very first cycle produces an event
        assert_eq!(all_events.len(), 1);
        assert_eq!(all_events[0].kind, TransitionKind::Detected);
    }

    #[test]
    fn test_empty_name_does_not_overwrite() {
        let sightings: SightingSet =
            [Sighting::new(phone().key, "", DeviceKind::ShortRangeClassic)]
                .into_iter()
                .collect();
        let outcome = tracker().process(present_table(t0()), &sightings, t0() + Duration::seconds(5));

        let device = outcome.table.get(&phone().key).unwrap();
        assert_eq!(device.display_name, "Phone");
        // kind was already known, so it is kept
        assert_eq!(device.device_kind, DeviceKind::ShortRangeBle);
        assert_eq!(device.signal_strength, None);
    }

    #[test]
    fn test_unset_kind_is_filled_in() {
        let unknown = Sighting::new(DeviceKey::radio("01:02:03:04:05:06"), "Tag", DeviceKind::Unknown);
        let first: SightingSet = [unknown.clone()].into_iter().collect();
        let outcome = tracker().process(TrackerTable::new(), &first, t0());

        let typed: SightingSet = [Sighting::new(unknown.key.clone(), "", DeviceKind::ShortRangeBle)]
            .into_iter()
            .collect();
        let outcome = tracker().process(outcome.table, &typed, t0() + Duration::seconds(1));
        assert_eq!(
            outcome.table.get(&unknown.key).unwrap().device_kind,
            DeviceKind::ShortRangeBle
        );
    }

    #[test]
    fn test_last_seen_never_moves_backwards() {
        let sightings: SightingSet = [phone()].into_iter().collect();
        let outcome =
            tracker().process(present_table(t0()), &sightings, t0() - Duration::seconds(30));
        assert_eq!(outcome.table.get(&phone().key).unwrap().last_seen, t0());
    }

    #[test]
    fn test_gone_device_stays_gone_silently() {
        let lost = tracker().process(
            present_table(t0()),
            &SightingSet::new(),
            t0() + Duration::seconds(90),
        );
        let again = tracker().process(lost.table, &SightingSet::new(), t0() + Duration::seconds(500));
        assert!(again.events.is_empty());
        assert!(!again.changed);
        assert_eq!(again.table.len(), 1);
    }

    #[test]
    fn test_namespaced_keys_are_distinct_entries() {
        let radio = Sighting::new(
            DeviceKey::radio("AA:BB:CC:DD:EE:FF"),
            "Laptop",
            DeviceKind::ShortRangeClassic,
        );
        let network = Sighting::new(
            DeviceKey::network("AA:BB:CC:DD:EE:FF"),
            "Laptop",
            DeviceKind::Network,
        );
        let sightings: SightingSet = [radio, network].into_iter().collect();
        let outcome = tracker().process(TrackerTable::new(), &sightings, t0());

        assert_eq!(outcome.table.len(), 2);
        assert_eq!(outcome.events.len(), 2);
    }

    #[test]
    fn test_one_event_per_key_per_cycle() {
        let a = phone();
        let b = Sighting::new(DeviceKey::network("tv.lan"), "tv.lan", DeviceKind::Network);
        let mut table = present_table(t0() - Duration::seconds(300));
        table.insert(TrackedDevice::detected(&b, t0() - Duration::seconds(300)));

        // `a` is sighted (refresh), `b` is not (lost)
        let sightings: SightingSet = [a.clone()].into_iter().collect();
        let outcome = tracker().process(table, &sightings, t0());

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].key, b.key);
        assert_eq!(outcome.events[0].kind, TransitionKind::Lost);
    }

    #[test]
    fn test_absurd_threshold_is_rejected() {
        assert!(PresenceTracker::new(StdDuration::from_secs(u64::MAX)).is_err());
    }
}
