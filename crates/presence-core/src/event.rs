//! # Transition Events
//!
//! Events raised by the tracker and the human-readable lines sent to the
//! notifier.
//!
//! ## Message Format
//! ```text
//! 🟢 Presence Hallway — DETECTED My Phone [AA:11:22:33:44:55] (BLE) RSSI=-60dBm
//! 🔴 Presence Hallway — LOST My Phone [AA:11:22:33:44:55] (BLE) RSSI=-71dBm
//! ▶️ Presence Hallway started. interval=20s, window=8s, lost_after=60s
//! ```

use std::fmt;

use chrono::{DateTime, Utc};

use crate::types::{DeviceKey, DeviceKind, TrackedDevice};

// =============================================================================
// Event Types
// =============================================================================

/// Which way a device transitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    /// Absent or Gone → Present.
    Detected,
    /// Present → Gone.
    Lost,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::Detected => write!(f, "detected"),
            TransitionKind::Lost => write!(f, "lost"),
        }
    }
}

/// A `detected` or `lost` transition for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    /// Direction of the transition.
    pub kind: TransitionKind,
    /// Device key.
    pub key: DeviceKey,
    /// Display name at the time of the transition.
    pub display_name: String,
    /// Device kind at the time of the transition.
    pub device_kind: DeviceKind,
    /// Last known signal strength.
    pub signal_strength: Option<i16>,
    /// Cycle timestamp the transition was decided at.
    pub at: DateTime<Utc>,
}

impl PresenceEvent {
    /// Snapshots a device into an event.
    pub fn from_device(kind: TransitionKind, device: &TrackedDevice, at: DateTime<Utc>) -> Self {
        PresenceEvent {
            kind,
            key: device.key.clone(),
            display_name: device.display_name.clone(),
            device_kind: device.device_kind,
            signal_strength: device.signal_strength,
            at,
        }
    }
}

// =============================================================================
// Formatting
// =============================================================================

/// Formats the `<name> [<key>] (<kind>) RSSI=<n>dBm` part of a message.
pub fn device_line(name: &str, key: &DeviceKey, kind: DeviceKind, rssi: Option<i16>) -> String {
    let name = if name.is_empty() { "unknown" } else { name };
    match rssi {
        Some(rssi) => format!("{} [{}] ({}) RSSI={}dBm", name, key, kind, rssi),
        None => format!("{} [{}] ({})", name, key, kind),
    }
}

/// Builds notifier messages, prefixed with the daemon's tag.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    tag: String,
}

impl MessageFormatter {
    /// `app_name` plus an optional location, e.g. "Presence Hallway".
    pub fn new(app_name: &str, location_tag: Option<&str>) -> Self {
        let tag = match location_tag.map(str::trim).filter(|l| !l.is_empty()) {
            Some(location) => format!("{} {}", app_name, location),
            None => app_name.to_string(),
        };
        MessageFormatter { tag }
    }

    /// The tag every message starts with.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Formats a transition event.
    pub fn event(&self, event: &PresenceEvent) -> String {
        let line = device_line(
            &event.display_name,
            &event.key,
            event.device_kind,
            event.signal_strength,
        );
        match event.kind {
            TransitionKind::Detected => format!("🟢 {} — DETECTED {}", self.tag, line),
            TransitionKind::Lost => format!("🔴 {} — LOST {}", self.tag, line),
        }
    }

    /// Formats the startup announcement.
    pub fn started(&self, interval_secs: u64, window_secs: u64, gone_after_secs: u64) -> String {
        format!(
            "▶️ {} started. interval={}s, window={}s, lost_after={}s",
            self.tag, interval_secs, window_secs, gone_after_secs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: TransitionKind, name: &str, rssi: Option<i16>) -> PresenceEvent {
        PresenceEvent {
            kind,
            key: DeviceKey::radio("AA:11:22:33:44:55"),
            display_name: name.to_string(),
            device_kind: DeviceKind::ShortRangeBle,
            signal_strength: rssi,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_detected_message() {
        let formatter = MessageFormatter::new("Presence", Some("Hallway"));
        let msg = formatter.event(&event(TransitionKind::Detected, "Phone", Some(-60)));
        assert_eq!(
            msg,
            "🟢 Presence Hallway — DETECTED Phone [AA:11:22:33:44:55] (BLE) RSSI=-60dBm"
        );
    }

    #[test]
    fn test_lost_message_without_name_or_rssi() {
        let formatter = MessageFormatter::new("Presence", None);
        let msg = formatter.event(&event(TransitionKind::Lost, "", None));
        assert_eq!(msg, "🔴 Presence — LOST unknown [AA:11:22:33:44:55] (BLE)");
    }

    #[test]
    fn test_blank_location_is_ignored() {
        let formatter = MessageFormatter::new("Presence", Some("   "));
        assert_eq!(formatter.tag(), "Presence");
        assert_eq!(
            formatter.started(20, 8, 60),
            "▶️ Presence started. interval=20s, window=8s, lost_after=60s"
        );
    }
}
