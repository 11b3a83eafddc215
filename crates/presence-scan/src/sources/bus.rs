//! # Adapter Bus
//!
//! The radio adapter sits behind the system bus. [`AdapterBus`] is the small
//! set of calls the radio source needs; [`BluezCli`] implements it on top of
//! the stock `busctl` and `bluetoothctl` tools.
//!
//! ## Managed Object Map
//! ```text
//! /org/bluez/hci0                      ← object path
//!   └── org.bluez.Adapter1             ← interface
//!         ├── Address  = "00:1A:7D:DA:71:13"
//!         └── Powered  = true
//! /org/bluez/hci0/dev_AA_11_22_33_44_55
//!   └── org.bluez.Device1
//!         ├── Address     = "aa:11:22:33:44:55"
//!         ├── Name        = "My Phone"
//!         ├── RSSI        = -61
//!         └── AddressType = "random"
//! ```
//!
//! ## Discovery Session
//! The bus daemon ends a discovery session (and forgets its filter) when the
//! client that started it disconnects, so discovery is held open by one
//! long-running `bluetoothctl` child fed commands over stdin.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::RadioTransport;
use crate::error::{SourceError, SourceResult};
use crate::runner::{spawn_error, CommandRunner};

/// Interface exposed by radio adapters.
pub const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";

/// Interface exposed by discovered devices.
pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";

const BUS_NAME: &str = "org.bluez";

/// Property name → value.
pub type Properties = BTreeMap<String, Value>;

/// Interface name → properties.
pub type Interfaces = BTreeMap<String, Properties>;

/// Object path → interfaces.
pub type ObjectMap = BTreeMap<String, Interfaces>;

// =============================================================================
// Adapter Resolution
// =============================================================================

/// A resolved adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterRef {
    /// Object path, e.g. `/org/bluez/hci0`.
    pub path: String,
    /// Controller address, when the adapter reports one.
    pub address: Option<String>,
}

/// Picks the first object exposing the adapter interface.
pub fn find_adapter(objects: &ObjectMap) -> SourceResult<AdapterRef> {
    objects
        .iter()
        .find_map(|(path, interfaces)| {
            interfaces.get(ADAPTER_INTERFACE).map(|props| AdapterRef {
                path: path.clone(),
                address: props
                    .get("Address")
                    .and_then(Value::as_str)
                    .map(String::from),
            })
        })
        .ok_or(SourceError::NoAdapter {
            interface: ADAPTER_INTERFACE,
        })
}

/// Discovery filter applied before scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryFilter {
    pub transport: RadioTransport,
    pub duplicate_data: bool,
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        Self {
            transport: RadioTransport::Auto,
            duplicate_data: true,
        }
    }
}

// =============================================================================
// Adapter Bus Trait
// =============================================================================

/// Bus operations needed by the radio source.
#[async_trait]
pub trait AdapterBus: Send + Sync {
    /// Snapshot of every object the radio service manages.
    async fn managed_objects(&self) -> SourceResult<ObjectMap>;

    /// Reads the adapter's Powered property.
    async fn is_powered(&self, adapter: &AdapterRef) -> SourceResult<bool>;

    /// Writes the adapter's Powered property.
    async fn set_powered(&self, adapter: &AdapterRef, on: bool) -> SourceResult<()>;

    /// Installs a discovery filter for subsequent discovery.
    async fn set_discovery_filter(
        &self,
        adapter: &AdapterRef,
        filter: &DiscoveryFilter,
    ) -> SourceResult<()>;

    /// Starts discovery. Starting while already discovering is a no-op.
    async fn start_discovery(&self, adapter: &AdapterRef) -> SourceResult<()>;

    /// Stops discovery. Stopping while idle is a no-op.
    async fn stop_discovery(&self, adapter: &AdapterRef) -> SourceResult<()>;
}

// =============================================================================
// busctl JSON Decoding
// =============================================================================

/// Strips busctl's `{"type": .., "data": ..}` variant wrapper.
fn unwrap_variant(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 2 && map.contains_key("type") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Decodes `busctl --json=short call ... GetManagedObjects` output.
pub fn parse_managed_objects(text: &str) -> SourceResult<ObjectMap> {
    let reply: Value =
        serde_json::from_str(text).map_err(|e| SourceError::BadReply(e.to_string()))?;

    // The reply is a one-element argument list holding a{oa{sa{sv}}}.
    let root = if reply.get("data").map_or(false, Value::is_array) {
        reply["data"][0].clone()
    } else {
        reply
    };
    let Value::Object(paths) = root else {
        return Err(SourceError::BadReply("managed objects is not a map".into()));
    };

    let mut objects = ObjectMap::new();
    for (path, interfaces) in paths {
        let Value::Object(interfaces) = interfaces else {
            continue;
        };
        let mut decoded = Interfaces::new();
        for (name, props) in interfaces {
            let Value::Object(props) = props else {
                continue;
            };
            decoded.insert(
                name,
                props
                    .into_iter()
                    .map(|(k, v)| (k, unwrap_variant(v)))
                    .collect(),
            );
        }
        objects.insert(path, decoded);
    }
    Ok(objects)
}

// =============================================================================
// BluezCli
// =============================================================================

struct DiscoverySession {
    child: Child,
    stdin: ChildStdin,
}

/// [`AdapterBus`] over `busctl` (queries) and `bluetoothctl` (discovery).
pub struct BluezCli {
    runner: Arc<dyn CommandRunner>,
    call_timeout: Duration,
    filter: Mutex<Option<DiscoveryFilter>>,
    session: Mutex<Option<DiscoverySession>>,
}

impl BluezCli {
    /// Creates a client; every busctl call is bounded by `call_timeout`.
    pub fn new(runner: Arc<dyn CommandRunner>, call_timeout: Duration) -> Self {
        Self {
            runner,
            call_timeout,
            filter: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    async fn busctl(&self, method: &str, args: &[&str]) -> SourceResult<Vec<String>> {
        let output = self.runner.run("busctl", args, self.call_timeout).await?;
        if output.timed_out {
            return Err(SourceError::bus(method, "timed out"));
        }
        if !output.success {
            return Err(SourceError::bus(method, output.stdout.join(" ")));
        }
        Ok(output.stdout)
    }

    fn session_script(adapter: &AdapterRef, filter: Option<&DiscoveryFilter>) -> String {
        let mut script = String::new();
        if let Some(address) = &adapter.address {
            script.push_str(&format!("select {}\n", address));
        }
        if let Some(filter) = filter {
            script.push_str("menu scan\n");
            script.push_str(&format!("transport {}\n", filter.transport));
            let dup = if filter.duplicate_data { "on" } else { "off" };
            script.push_str(&format!("duplicate-data {}\n", dup));
            script.push_str("back\n");
        }
        script.push_str("scan on\n");
        script
    }
}

#[async_trait]
impl AdapterBus for BluezCli {
    async fn managed_objects(&self) -> SourceResult<ObjectMap> {
        let lines = self
            .busctl(
                "GetManagedObjects",
                &[
                    "--json=short",
                    "call",
                    BUS_NAME,
                    "/",
                    "org.freedesktop.DBus.ObjectManager",
                    "GetManagedObjects",
                ],
            )
            .await?;
        parse_managed_objects(&lines.join("\n"))
    }

    async fn is_powered(&self, adapter: &AdapterRef) -> SourceResult<bool> {
        let lines = self
            .busctl(
                "Get(Powered)",
                &[
                    "--json=short",
                    "get-property",
                    BUS_NAME,
                    adapter.path.as_str(),
                    ADAPTER_INTERFACE,
                    "Powered",
                ],
            )
            .await?;
        let reply: Value = serde_json::from_str(&lines.join("\n"))
            .map_err(|e| SourceError::BadReply(e.to_string()))?;
        unwrap_variant(reply)
            .as_bool()
            .ok_or_else(|| SourceError::BadReply("Powered is not a boolean".into()))
    }

    async fn set_powered(&self, adapter: &AdapterRef, on: bool) -> SourceResult<()> {
        self.busctl(
            "Set(Powered)",
            &[
                "set-property",
                BUS_NAME,
                adapter.path.as_str(),
                ADAPTER_INTERFACE,
                "Powered",
                "b",
                if on { "true" } else { "false" },
            ],
        )
        .await?;
        Ok(())
    }

    async fn set_discovery_filter(
        &self,
        _adapter: &AdapterRef,
        filter: &DiscoveryFilter,
    ) -> SourceResult<()> {
        // Filters belong to the session, so this takes effect on the next start.
        *self.filter.lock().await = Some(*filter);
        Ok(())
    }

    async fn start_discovery(&self, adapter: &AdapterRef) -> SourceResult<()> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_mut() {
            match existing.child.try_wait() {
                Ok(None) => return Ok(()),
                _ => {
                    warn!("Discovery session exited on its own, restarting");
                    *session = None;
                }
            }
        }

        let mut child = Command::new("bluetoothctl")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error("bluetoothctl", e))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SourceError::bus("StartDiscovery", "stdin not captured"))?;

        let filter = *self.filter.lock().await;
        let script = Self::session_script(adapter, filter.as_ref());
        stdin
            .write_all(script.as_bytes())
            .await
            .map_err(|e| SourceError::bus("StartDiscovery", e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| SourceError::bus("StartDiscovery", e.to_string()))?;

        debug!(adapter = %adapter.path, "Discovery session started");
        *session = Some(DiscoverySession { child, stdin });
        Ok(())
    }

    async fn stop_discovery(&self, adapter: &AdapterRef) -> SourceResult<()> {
        let Some(mut session) = self.session.lock().await.take() else {
            return Ok(());
        };

        if let Err(e) = session.stdin.write_all(b"scan off\nquit\n").await {
            debug!(error = %e, "Discovery session already gone");
        }
        drop(session.stdin);

        match tokio::time::timeout(self.call_timeout, session.child.wait()).await {
            Ok(_) => {
                debug!(adapter = %adapter.path, "Discovery session stopped");
                Ok(())
            }
            Err(_) => {
                let _ = session.child.kill().await;
                Err(SourceError::bus("StopDiscovery", "bluetoothctl did not exit"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REPLY: &str = r#"{"type":"a{oa{sa{sv}}}","data":[{
        "/org/bluez":{"org.bluez.AgentManager1":{}},
        "/org/bluez/hci0":{"org.bluez.Adapter1":{
            "Address":{"type":"s","data":"00:1A:7D:DA:71:13"},
            "Powered":{"type":"b","data":true}}},
        "/org/bluez/hci0/dev_AA_11_22_33_44_55":{"org.bluez.Device1":{
            "Address":{"type":"s","data":"aa:11:22:33:44:55"},
            "Name":{"type":"s","data":"My Phone"},
            "RSSI":{"type":"n","data":-61},
            "AddressType":{"type":"s","data":"random"}}}
    }]}"#;

    #[test]
    fn test_parse_managed_objects_unwraps_variants() {
        let objects = parse_managed_objects(REPLY).unwrap();
        assert_eq!(objects.len(), 3);

        let device = &objects["/org/bluez/hci0/dev_AA_11_22_33_44_55"][DEVICE_INTERFACE];
        assert_eq!(device["Name"], json!("My Phone"));
        assert_eq!(device["RSSI"], json!(-61));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_managed_objects("Failed to connect to bus").is_err());
        assert!(parse_managed_objects(r#"{"type":"s","data":["nope"]}"#).is_err());
    }

    #[test]
    fn test_find_adapter_picks_adapter_object() {
        let objects = parse_managed_objects(REPLY).unwrap();
        let adapter = find_adapter(&objects).unwrap();
        assert_eq!(adapter.path, "/org/bluez/hci0");
        assert_eq!(adapter.address.as_deref(), Some("00:1A:7D:DA:71:13"));
    }

    #[test]
    fn test_find_adapter_without_adapter_is_fatal() {
        let mut objects = ObjectMap::new();
        objects.insert(
            "/org/bluez/hci0/dev_01".into(),
            [(DEVICE_INTERFACE.to_string(), Properties::new())]
                .into_iter()
                .collect(),
        );
        let err = find_adapter(&objects).unwrap_err();
        assert!(err.is_fatal());
        assert!(find_adapter(&ObjectMap::new()).unwrap_err().is_fatal());
    }

    #[test]
    fn test_session_script() {
        let adapter = AdapterRef {
            path: "/org/bluez/hci0".into(),
            address: Some("00:1A:7D:DA:71:13".into()),
        };
        let script = BluezCli::session_script(&adapter, Some(&DiscoveryFilter::default()));
        assert_eq!(
            script,
            "select 00:1A:7D:DA:71:13\nmenu scan\ntransport auto\nduplicate-data on\nback\nscan on\n"
        );

        let bare = AdapterRef {
            path: "/org/bluez/hci1".into(),
            address: None,
        };
        assert_eq!(BluezCli::session_script(&bare, None), "scan on\n");
    }
}
