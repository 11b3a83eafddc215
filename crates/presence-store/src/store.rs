//! # State Store
//!
//! Persists the tracker table as one JSON object keyed by device key.
//!
//! ## Document Shape
//! ```text
//! {
//!   "AA:11:22:33:44:55": {
//!     "name": "My Phone",
//!     "type": "BLE",
//!     "rssi": -61,
//!     "last_seen": "2024-05-01T12:00:00Z",
//!     "status": "present"
//!   },
//!   "wifi:192.168.1.20": { ... }
//! }
//! ```
//!
//! ## Save Sequence
//! ```text
//! ┌──────────────┐    ┌──────────────────┐    ┌──────────┐    ┌───────────┐
//! │ create_dir   │───►│ write <path>.tmp │───►│ sync_all │───►│  rename   │
//! │ (parent)     │    │                  │    │          │    │ over path │
//! └──────────────┘    └──────────────────┘    └──────────┘    └───────────┘
//! ```
//! A crash at any step leaves either the previous document or the new one.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use presence_core::{DeviceKey, DeviceKind, DeviceStatus, TrackedDevice, TrackerTable};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// Naive layouts accepted for timestamps written without an offset.
const NAIVE_LAYOUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

// =============================================================================
// Wire Records
// =============================================================================

/// One entry as written.
#[derive(Debug, Serialize)]
struct StoredDevice<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: DeviceKind,
    rssi: Option<i16>,
    last_seen: String,
    status: DeviceStatus,
}

/// One entry as read. Fields stay untyped so one bad field does not cost
/// the whole entry.
#[derive(Debug, Default, Deserialize)]
struct RawDevice {
    #[serde(default)]
    name: Option<Value>,
    #[serde(default, rename = "type")]
    kind: Option<Value>,
    #[serde(default)]
    rssi: Option<Value>,
    #[serde(default)]
    last_seen: Option<Value>,
    #[serde(default)]
    status: Option<Value>,
}

// =============================================================================
// State Store
// =============================================================================

/// File-backed store for the tracker table.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Creates a store for the given canonical path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateStore { path: path.into() }
    }

    /// The canonical state file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The temporary sibling written before the rename.
    pub fn temp_path(&self) -> PathBuf {
        let mut tmp: OsString = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    /// Loads the table, recovering whatever can be read.
    ///
    /// A missing or unparseable document yields an empty table.
    pub fn load(&self) -> TrackerTable {
        self.load_at(Utc::now())
    }

    /// Like [`load`](Self::load), with `now` standing in for unreadable
    /// timestamps.
    pub fn load_at(&self, now: DateTime<Utc>) -> TrackerTable {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No state file yet, starting empty");
                return TrackerTable::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "State file unreadable, starting empty");
                return TrackerTable::new();
            }
        };

        let document: Map<String, Value> = match serde_json::from_str(&text) {
            Ok(document) => document,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "State file corrupt, starting empty");
                return TrackerTable::new();
            }
        };

        let mut table = TrackerTable::new();
        let mut skipped = 0usize;
        for (key, value) in document {
            match decode_entry(&key, value, now) {
                Some(device) => table.insert(device),
                None => {
                    skipped += 1;
                    warn!(key = %key, "Skipping unreadable state entry");
                }
            }
        }

        info!(
            path = %self.path.display(),
            devices = table.len(),
            present = table.present_count(),
            skipped,
            "Loaded state"
        );
        table
    }

    /// Atomically replaces the state file with the given table.
    pub fn save(&self, table: &TrackerTable) -> StoreResult<()> {
        let document: BTreeMap<&str, StoredDevice<'_>> = table
            .iter()
            .map(|device| (device.key.as_str(), encode_entry(device)))
            .collect();
        let bytes = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io("create_dir", parent, e))?;
        }

        let tmp = self.temp_path();
        if let Err(e) = write_synced(&tmp, &bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io("write", &tmp, e));
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io("rename", &self.path, e));
        }

        debug!(path = %self.path.display(), devices = table.len(), "Saved state");
        Ok(())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

// =============================================================================
// Entry Encoding
// =============================================================================

fn encode_entry(device: &TrackedDevice) -> StoredDevice<'_> {
    StoredDevice {
        name: &device.display_name,
        kind: device.device_kind,
        rssi: device.signal_strength,
        last_seen: device.last_seen.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        status: device.status,
    }
}

fn decode_entry(key: &str, value: Value, now: DateTime<Utc>) -> Option<TrackedDevice> {
    if key.is_empty() || !value.is_object() {
        return None;
    }
    let raw: RawDevice = serde_json::from_value(value).ok()?;

    let last_seen = match raw.last_seen {
        None | Some(Value::Null) => now,
        Some(value) => value.as_str().and_then(parse_timestamp).unwrap_or_else(|| {
            warn!(key = %key, last_seen = %value, "Unreadable timestamp, using now");
            now
        }),
    };

    let status = match raw.status.as_ref().and_then(Value::as_str).map(str::trim) {
        Some(s) if s.eq_ignore_ascii_case("gone") => DeviceStatus::Gone,
        _ => DeviceStatus::Present,
    };

    Some(TrackedDevice {
        key: DeviceKey::new(key),
        display_name: raw
            .name
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        device_kind: raw
            .kind
            .as_ref()
            .and_then(Value::as_str)
            .map(DeviceKind::from_label)
            .unwrap_or_default(),
        signal_strength: raw
            .rssi
            .as_ref()
            .and_then(Value::as_i64)
            .and_then(|v| i16::try_from(v).ok()),
        last_seen,
        status,
    })
}

/// Parses an RFC 3339 timestamp, or an offset-less ISO one taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(text, layout).ok())
        .map(|naive| naive.and_utc())
}

// =============================================================================
// Unit Tests
// =============================================================================
