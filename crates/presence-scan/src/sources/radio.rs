//! # Radio Source
//!
//! Short-range radio discovery through the [`AdapterBus`].
//!
//! ## Probe Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  WINDOWED                         CONTINUOUS                           │
//! │  ────────                         ──────────                           │
//! │  start_discovery                  start_discovery (first cycle only)   │
//! │  sleep(window)                    sleep(window)                        │
//! │  stop_discovery                   ─                                    │
//! │  managed_objects → sightings      managed_objects → sightings          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A device counts as seen if it reports a signal strength or is connected.
//! A snapshot in which the cached adapter is missing or unpowered fails the
//! probe, so the adapter is re-resolved on the next cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use presence_core::{DeviceKey, DeviceKind, Sighting};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::DiscoveryMode;
use crate::error::{SourceError, SourceResult};
use crate::source::DiscoverySource;
use crate::sources::bus::{
    find_adapter, AdapterBus, AdapterRef, DiscoveryFilter, ObjectMap, ADAPTER_INTERFACE,
    DEVICE_INTERFACE,
};

/// Radio discovery source.
pub struct RadioSource {
    bus: Arc<dyn AdapterBus>,
    mode: DiscoveryMode,
    filter: DiscoveryFilter,
    adapter: Option<AdapterRef>,
}

impl RadioSource {
    pub fn new(bus: Arc<dyn AdapterBus>, mode: DiscoveryMode, filter: DiscoveryFilter) -> Self {
        Self {
            bus,
            mode,
            filter,
            adapter: None,
        }
    }

    /// The adapter in use, once resolved.
    pub fn adapter(&self) -> Option<&AdapterRef> {
        self.adapter.as_ref()
    }

    async fn resolve(&mut self) -> SourceResult<AdapterRef> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }

        let objects = self.bus.managed_objects().await?;
        let adapter = find_adapter(&objects)?;

        if !self.bus.is_powered(&adapter).await? {
            info!(adapter = %adapter.path, "Powering on adapter");
            self.bus.set_powered(&adapter, true).await?;
        }

        if let Err(e) = self.bus.set_discovery_filter(&adapter, &self.filter).await {
            warn!(adapter = %adapter.path, error = %e, "Discovery filter not applied");
        }

        info!(adapter = %adapter.path, mode = %self.mode, "Radio adapter ready");
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }
}

#[async_trait]
impl DiscoverySource for RadioSource {
    fn name(&self) -> &'static str {
        "radio"
    }

    async fn ensure_ready(&mut self) -> SourceResult<()> {
        self.resolve().await.map(|_| ())
    }

    async fn probe(&mut self, window: Duration) -> SourceResult<Vec<Sighting>> {
        let adapter = self.resolve().await?;

        self.bus.start_discovery(&adapter).await?;
        tokio::time::sleep(window).await;
        if self.mode == DiscoveryMode::Windowed {
            if let Err(e) = self.bus.stop_discovery(&adapter).await {
                warn!(adapter = %adapter.path, error = %e, "Failed to stop discovery");
            }
        }

        let objects = self.bus.managed_objects().await?;
        check_adapter(&objects, &adapter)?;
        let sightings = seen_devices(&objects);
        debug!(count = sightings.len(), "Radio probe complete");
        Ok(sightings)
    }

    async fn reset(&mut self) {
        if let Some(adapter) = self.adapter.take() {
            debug!(adapter = %adapter.path, "Dropping adapter handle");
            let _ = self.bus.stop_discovery(&adapter).await;
        }
    }

    async fn shutdown(&mut self) {
        if let Some(adapter) = &self.adapter {
            if let Err(e) = self.bus.stop_discovery(adapter).await {
                warn!(error = %e, "Failed to stop discovery at shutdown");
            }
        }
    }
}

/// Confirms the adapter is still exported and powered in a snapshot.
pub fn check_adapter(objects: &ObjectMap, adapter: &AdapterRef) -> SourceResult<()> {
    let props = objects
        .get(&adapter.path)
        .and_then(|interfaces| interfaces.get(ADAPTER_INTERFACE))
        .ok_or_else(|| {
            SourceError::bus(
                "GetManagedObjects",
                format!("adapter {} is no longer present", adapter.path),
            )
        })?;
    if props.get("Powered").and_then(Value::as_bool) == Some(false) {
        return Err(SourceError::bus(
            "GetManagedObjects",
            format!("adapter {} is powered off", adapter.path),
        ));
    }
    Ok(())
}

/// Extracts sightings from a managed object snapshot.
pub fn seen_devices(objects: &ObjectMap) -> Vec<Sighting> {
    objects
        .values()
        .filter_map(|interfaces| interfaces.get(DEVICE_INTERFACE))
        .filter_map(|props| {
            let address = props.get("Address").and_then(Value::as_str)?;
            let rssi = props
                .get("RSSI")
                .and_then(Value::as_i64)
                .and_then(|v| i16::try_from(v).ok());
            let connected = props
                .get("Connected")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if rssi.is_none() && !connected {
                return None;
            }

            let name = ["Name", "Alias"]
                .iter()
                .filter_map(|k| props.get(*k).and_then(Value::as_str))
                .find(|n| !n.is_empty())
                .unwrap_or("");

            let kind = if props.contains_key("AddressType") {
                DeviceKind::ShortRangeBle
            } else if props.contains_key("Class") {
                DeviceKind::ShortRangeClassic
            } else {
                DeviceKind::Unknown
            };

            Some(Sighting::new(DeviceKey::radio(address), name, kind).with_signal(rssi))
        })
        .collect()
}
