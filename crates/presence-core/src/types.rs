//! # Domain Types
//!
//! Core domain types used throughout the presence daemon.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   DeviceKey     │   │    Sighting     │   │  TrackedDevice  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  AA:BB:..:FF    │   │  key            │   │  key            │       │
//! │  │  wifi:<host>    │   │  display_name   │   │  display_name   │       │
//! │  │  mdns:<name>    │   │  rssi?          │   │  rssi?          │       │
//! │  └─────────────────┘   │  kind           │   │  last_seen      │       │
//! │                        └─────────────────┘   │  status         │       │
//! │  ┌─────────────────┐   ┌─────────────────┐   └─────────────────┘       │
//! │  │   DeviceKind    │   │  DeviceStatus   │                              │
//! │  │  ─────────────  │   │  ─────────────  │   ┌─────────────────┐       │
//! │  │  BLE / Classic  │   │  Present        │   │  TrackerTable   │       │
//! │  │  Network / mDNS │   │  Gone           │   │  key → device   │       │
//! │  │  Unknown        │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Namespacing
//! Every discovery channel owns its own identity space. Radio devices are keyed
//! by their upper-cased hardware address; reachability targets by
//! `wifi:<host>`; service announcements by `mdns:<host-or-name>`. The same
//! physical phone seen over radio and over Wi-Fi is therefore two entries, and
//! that is intended.

use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key prefix for devices found by the reachability probe.
pub const NETWORK_KEY_PREFIX: &str = "wifi:";

/// Key prefix for devices found by the announcement browser.
pub const ANNOUNCE_KEY_PREFIX: &str = "mdns:";

// =============================================================================
// Device Key
// =============================================================================

/// Identifier of a trackable entity, namespaced by discovery channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    /// Wraps an already-namespaced key verbatim.
    ///
    /// Used when reading keys back from persisted state.
    pub fn new(raw: impl Into<String>) -> Self {
        DeviceKey(raw.into())
    }

    /// Key for a radio device: the hardware address, upper-cased.
    pub fn radio(address: &str) -> Self {
        DeviceKey(address.trim().to_uppercase())
    }

    /// Key for a reachability target: `wifi:<host>`.
    pub fn network(host: &str) -> Self {
        DeviceKey(format!("{}{}", NETWORK_KEY_PREFIX, host.trim()))
    }

    /// Key for an announced service: `mdns:<host-or-name>`.
    pub fn announcement(host_or_name: &str) -> Self {
        DeviceKey(format!("{}{}", ANNOUNCE_KEY_PREFIX, host_or_name.trim()))
    }

    /// Returns the key as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceKey {
    fn from(raw: &str) -> Self {
        DeviceKey::new(raw)
    }
}

// =============================================================================
// Device Kind
// =============================================================================

/// What sort of device a sighting came from.
///
/// Inferred heuristically by each source from whatever metadata it sees.
/// The serialized labels are the ones written to the state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Bluetooth Low Energy device (reports an address type).
    #[serde(rename = "BLE", alias = "ShortRangeBLE")]
    ShortRangeBle,

    /// Bluetooth BR/EDR device (reports a device class).
    #[serde(rename = "Classic", alias = "ShortRangeClassic")]
    ShortRangeClassic,

    /// Host that answered a reachability probe.
    #[serde(rename = "Network")]
    Network,

    /// Service found through multicast DNS announcements.
    #[serde(rename = "mDNS", alias = "ServiceAnnouncement")]
    ServiceAnnouncement,

    /// Nothing to go on.
    #[default]
    #[serde(rename = "Unknown")]
    Unknown,
}

impl DeviceKind {
    /// Label used in messages and the state file.
    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::ShortRangeBle => "BLE",
            DeviceKind::ShortRangeClassic => "Classic",
            DeviceKind::Network => "Network",
            DeviceKind::ServiceAnnouncement => "mDNS",
            DeviceKind::Unknown => "Unknown",
        }
    }

    /// Lenient parse used when recovering persisted state.
    ///
    /// Anything unrecognised becomes [`DeviceKind::Unknown`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "ble" | "shortrangeble" => DeviceKind::ShortRangeBle,
            "classic" | "shortrangeclassic" => DeviceKind::ShortRangeClassic,
            "network" | "wifi" => DeviceKind::Network,
            "mdns" | "serviceannouncement" => DeviceKind::ServiceAnnouncement,
            _ => DeviceKind::Unknown,
        }
    }

    /// True when no source has told us what this device is yet.
    #[inline]
    pub fn is_unset(&self) -> bool {
        matches!(self, DeviceKind::Unknown)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Device Status
// =============================================================================

/// Presence status of a tracked device.
///
/// A key absent from the table is the implicit third state ("unknown").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Seen within the gone-after threshold.
    Present,
    /// Unseen for longer than the gone-after threshold.
    Gone,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Present => write!(f, "present"),
            DeviceStatus::Gone => write!(f, "gone"),
        }
    }
}

// =============================================================================
// Sighting
// =============================================================================

/// One cycle's observation of a device from one discovery source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    /// Namespaced key.
    pub key: DeviceKey,

    /// Human-readable name. May be empty when the source has none.
    pub display_name: String,

    /// Received signal strength in dBm, radio sources only.
    pub signal_strength: Option<i16>,

    /// Heuristic device kind.
    pub device_kind: DeviceKind,
}

impl Sighting {
    /// Creates a sighting without signal strength.
    pub fn new(key: DeviceKey, display_name: impl Into<String>, device_kind: DeviceKind) -> Self {
        Sighting {
            key,
            display_name: display_name.into(),
            signal_strength: None,
            device_kind,
        }
    }

    /// Attaches a signal strength reading.
    pub fn with_signal(mut self, rssi: Option<i16>) -> Self {
        self.signal_strength = rssi;
        self
    }
}

/// The merged sightings of one scan cycle, at most one per key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SightingSet {
    inner: BTreeMap<DeviceKey, Sighting>,
}

impl SightingSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sighting. A repeated key keeps its earlier name if the newer
    /// sighting has none, and takes the newer signal reading when present.
    pub fn insert(&mut self, sighting: Sighting) {
        match self.inner.entry(sighting.key.clone()) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(sighting);
            }
            btree_map::Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if !sighting.display_name.is_empty() {
                    existing.display_name = sighting.display_name;
                }
                if sighting.signal_strength.is_some() {
                    existing.signal_strength = sighting.signal_strength;
                }
                if existing.device_kind.is_unset() {
                    existing.device_kind = sighting.device_kind;
                }
            }
        }
    }

    /// Returns true if the key was sighted this cycle.
    pub fn contains(&self, key: &DeviceKey) -> bool {
        self.inner.contains_key(key)
    }

    /// Looks up the sighting for a key.
    pub fn get(&self, key: &DeviceKey) -> Option<&Sighting> {
        self.inner.get(key)
    }

    /// Number of distinct keys sighted.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if nothing was sighted.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates sightings in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Sighting> {
        self.inner.values()
    }

    /// Keeps only the sightings matching the predicate.
    pub fn retain(&mut self, mut keep: impl FnMut(&Sighting) -> bool) {
        self.inner.retain(|_, s| keep(s));
    }
}

impl FromIterator<Sighting> for SightingSet {
    fn from_iter<I: IntoIterator<Item = Sighting>>(iter: I) -> Self {
        let mut set = SightingSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<Sighting> for SightingSet {
    fn extend<I: IntoIterator<Item = Sighting>>(&mut self, iter: I) {
        for sighting in iter {
            self.insert(sighting);
        }
    }
}

impl IntoIterator for SightingSet {
    type Item = Sighting;
    type IntoIter = btree_map::IntoValues<DeviceKey, Sighting>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_values()
    }
}

// =============================================================================
// Tracked Device
// =============================================================================

/// Durable record of a device, owned by the presence tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedDevice {
    /// Namespaced key (duplicated from the table key for convenience).
    pub key: DeviceKey,

    /// Last non-empty name any sighting supplied.
    pub display_name: String,

    /// Device kind, filled in once known.
    pub device_kind: DeviceKind,

    /// Signal strength from the most recent sighting.
    pub signal_strength: Option<i16>,

    /// When the device was last sighted.
    pub last_seen: DateTime<Utc>,

    /// Present or Gone.
    pub status: DeviceStatus,
}

impl TrackedDevice {
    /// Creates a freshly detected device from a sighting.
    pub fn detected(sighting: &Sighting, now: DateTime<Utc>) -> Self {
        TrackedDevice {
            key: sighting.key.clone(),
            display_name: sighting.display_name.clone(),
            device_kind: sighting.device_kind,
            signal_strength: sighting.signal_strength,
            last_seen: now,
            status: DeviceStatus::Present,
        }
    }

    /// True if the device is currently Present.
    #[inline]
    pub fn is_present(&self) -> bool {
        self.status == DeviceStatus::Present
    }
}

// =============================================================================
// Tracker Table
// =============================================================================

/// Mapping of every device ever seen to its durable record.
///
/// Entries are never removed; departed devices are marked Gone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerTable {
    devices: BTreeMap<DeviceKey, TrackedDevice>,
}

impl TrackerTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a device.
    pub fn get(&self, key: &DeviceKey) -> Option<&TrackedDevice> {
        self.devices.get(key)
    }

    /// Mutable lookup, for the tracker only.
    pub(crate) fn get_mut(&mut self, key: &DeviceKey) -> Option<&mut TrackedDevice> {
        self.devices.get_mut(key)
    }

    /// Inserts or replaces a record, keyed by `device.key`.
    pub fn insert(&mut self, device: TrackedDevice) {
        self.devices.insert(device.key.clone(), device);
    }

    /// Number of tracked devices (present and gone).
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True if nothing has ever been tracked.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Number of devices currently Present.
    pub fn present_count(&self) -> usize {
        self.devices.values().filter(|d| d.is_present()).count()
    }

    /// Iterates devices in key order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackedDevice> {
        self.devices.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrackedDevice> {
        self.devices.values_mut()
    }
}

impl FromIterator<TrackedDevice> for TrackerTable {
    fn from_iter<I: IntoIterator<Item = TrackedDevice>>(iter: I) -> Self {
        let mut table = TrackerTable::new();
        for device in iter {
            table.insert(device);
        }
        table
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
