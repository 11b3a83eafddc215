//! # Daemon Configuration
//!
//! Configuration management for the presence daemon.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     PRESENCE_SCAN_INTERVAL_SECS=30                                     │
//! │     PRESENCE_NAME_WHITELIST=phone,watch                                │
//! │                                                                         │
//! │  2. TOML Config File (--config, or the platform default)               │
//! │     ~/.config/presenced/presence.toml (Linux)                          │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     interval=20s, window=8s, gone_after=60s, radio only                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [scan]
//! interval_secs = 20
//! window_secs = 8
//! source_timeout_secs = 15
//! gone_after_secs = 60
//! backoff_secs = 5
//! discovery_mode = "windowed"   # windowed | continuous
//! transport = "auto"            # auto | le | bredr
//!
//! [filter]
//! name_whitelist = ["phone", "watch"]
//! ignore_keys = ["AA:BB:CC:DD:EE:FF"]
//!
//! [radio]
//! enabled = true
//!
//! [network]
//! enabled = true
//! hosts = ["192.168.1.20", "tv.lan"]
//! ping_timeout_secs = 2
//!
//! [announce]
//! enabled = false
//!
//! [state]
//! path = "/var/lib/presenced/state.json"
//!
//! [alerts]
//! app_name = "Presence"
//! location_tag = "Hallway"
//! telegram_bot_token = "123:abc"
//! telegram_chat_id = "-100123"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ScanError, ScanResult};

// =============================================================================
// Discovery Mode
// =============================================================================

/// How the radio source runs discovery.
///
/// ## Mode Selection
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                      Discovery Mode Behavior                            │
/// │                                                                         │
/// │  WINDOWED (Default)                                                    │
/// │  ──────────────────                                                    │
/// │  • start discovery, wait one window, stop, sample devices              │
/// │  • radio idles between cycles                                          │
/// │                                                                         │
/// │  CONTINUOUS                                                            │
/// │  ──────────                                                            │
/// │  • discovery session stays open across cycles                          │
/// │  • devices are sampled at the end of each window                       │
/// │  • catches devices that advertise rarely                               │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Start/stop discovery every cycle.
    #[default]
    Windowed,

    /// Keep one discovery session open.
    Continuous,
}

impl std::fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryMode::Windowed => write!(f, "windowed"),
            DiscoveryMode::Continuous => write!(f, "continuous"),
        }
    }
}

impl std::str::FromStr for DiscoveryMode {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "windowed" | "window" => Ok(DiscoveryMode::Windowed),
            "continuous" | "always" => Ok(DiscoveryMode::Continuous),
            other => Err(ScanError::InvalidConfig(format!(
                "Unknown discovery mode: '{}'. Valid options: windowed, continuous",
                other
            ))),
        }
    }
}

/// Radio transport used by the discovery filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioTransport {
    /// Interleaved LE and BR/EDR.
    #[default]
    Auto,
    /// Low Energy only.
    Le,
    /// BR/EDR only.
    Bredr,
}

impl std::fmt::Display for RadioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RadioTransport::Auto => write!(f, "auto"),
            RadioTransport::Le => write!(f, "le"),
            RadioTransport::Bredr => write!(f, "bredr"),
        }
    }
}

impl std::str::FromStr for RadioTransport {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(RadioTransport::Auto),
            "le" | "ble" => Ok(RadioTransport::Le),
            "bredr" | "classic" => Ok(RadioTransport::Bredr),
            other => Err(ScanError::InvalidConfig(format!(
                "Unknown transport: '{}'. Valid options: auto, le, bredr",
                other
            ))),
        }
    }
}

// =============================================================================
// Scan Settings
// =============================================================================

/// Scan cycle timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Target period of one cycle.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// How long each source listens per cycle.
    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// Hard upper bound on a single source's probe.
    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,

    /// Unseen time after which a Present device becomes Gone.
    #[serde(default = "default_gone_after")]
    pub gone_after_secs: u64,

    /// Pause after a cycle in which every source failed.
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,

    /// Windowed or continuous radio discovery.
    #[serde(default)]
    pub discovery_mode: DiscoveryMode,

    /// Radio transport for the discovery filter.
    #[serde(default)]
    pub transport: RadioTransport,
}

fn default_interval() -> u64 {
    20
}
fn default_window() -> u64 {
    8
}
fn default_source_timeout() -> u64 {
    15
}
fn default_gone_after() -> u64 {
    60
}
fn default_backoff() -> u64 {
    5
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            window_secs: default_window(),
            source_timeout_secs: default_source_timeout(),
            gone_after_secs: default_gone_after(),
            backoff_secs: default_backoff(),
            discovery_mode: DiscoveryMode::default(),
            transport: RadioTransport::default(),
        }
    }
}

impl ScanSettings {
    /// Cycle interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Listening window.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Per-source timeout.
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    /// Gone-after threshold.
    pub fn gone_after(&self) -> Duration {
        Duration::from_secs(self.gone_after_secs)
    }

    /// All-failed backoff.
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

// =============================================================================
// Filter / Source / State / Alert Settings
// =============================================================================

/// Sighting filter shared by every source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSettings {
    /// Case-insensitive name substrings. Empty allows everything.
    #[serde(default)]
    pub name_whitelist: Vec<String>,

    /// Device keys that are always dropped.
    #[serde(default)]
    pub ignore_keys: Vec<String>,
}

/// Radio discovery source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Network reachability source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Hosts or addresses to ping each cycle.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Per-ping timeout.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
}

fn default_ping_timeout() -> u64 {
    2
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            hosts: Vec::new(),
            ping_timeout_secs: default_ping_timeout(),
        }
    }
}

/// Service announcement source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnounceSettings {
    #[serde(default)]
    pub enabled: bool,
}

/// State file location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSettings {
    /// Explicit path. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Alert message tagging and transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSettings {
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Appended to the app name in every message.
    #[serde(default)]
    pub location_tag: Option<String>,

    #[serde(default)]
    pub telegram_bot_token: Option<String>,

    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

fn default_app_name() -> String {
    "Presence".to_string()
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            location_tag: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }
}

impl AlertSettings {
    /// Token and chat id, if both are configured.
    pub fn telegram(&self) -> Option<(&str, &str)> {
        let token = self.telegram_bot_token.as_deref().filter(|t| !t.is_empty())?;
        let chat = self.telegram_chat_id.as_deref().filter(|c| !c.is_empty())?;
        Some((token, chat))
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceConfig {
    #[serde(default)]
    pub scan: ScanSettings,

    #[serde(default)]
    pub filter: FilterSettings,

    #[serde(default)]
    pub radio: RadioSettings,

    #[serde(default)]
    pub network: NetworkSettings,

    #[serde(default)]
    pub announce: AnnounceSettings,

    #[serde(default)]
    pub state: StateSettings,

    #[serde(default)]
    pub alerts: AlertSettings,
}

impl PresenceConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (presence.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ScanResult<Self> {
        let mut config = Self::default();

        let explicit = config_path.is_some();
        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else if explicit {
                return Err(ScanError::ConfigLoadFailed(format!(
                    "{} does not exist",
                    path.display()
                )));
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ScanResult<()> {
        let scan = &self.scan;
        for (name, value) in [
            ("interval_secs", scan.interval_secs),
            ("window_secs", scan.window_secs),
            ("source_timeout_secs", scan.source_timeout_secs),
            ("gone_after_secs", scan.gone_after_secs),
        ] {
            if value == 0 {
                return Err(ScanError::InvalidConfig(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        // A probe listens for the whole window and only then samples results.
        if scan.source_timeout_secs <= scan.window_secs {
            return Err(ScanError::InvalidConfig(format!(
                "source_timeout_secs ({}) must be greater than window_secs ({})",
                scan.source_timeout_secs, scan.window_secs
            )));
        }

        if scan.window_secs > scan.interval_secs {
            warn!(
                window_secs = scan.window_secs,
                interval_secs = scan.interval_secs,
                "Scan window is longer than the interval; cycles will run back to back"
            );
        }

        if !self.radio.enabled && !self.network.enabled && !self.announce.enabled {
            return Err(ScanError::InvalidConfig(
                "at least one discovery source must be enabled".into(),
            ));
        }

        if self.network.enabled && self.network.hosts.is_empty() {
            warn!("Network source enabled with no hosts configured");
        }

        let alerts = &self.alerts;
        if alerts.telegram_bot_token.is_some() != alerts.telegram_chat_id.is_some() {
            return Err(ScanError::InvalidConfig(
                "telegram_bot_token and telegram_chat_id must be set together".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `PRESENCE_*` overrides from an arbitrary lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |key: &str, target: &mut u64| {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse::<u64>() {
                    Ok(v) => {
                        debug!(key, value = v, "Overriding from environment");
                        *target = v;
                    }
                    Err(_) => warn!(key, value = %raw, "Ignoring non-numeric override"),
                }
            }
        };
        secs("PRESENCE_SCAN_INTERVAL_SECS", &mut self.scan.interval_secs);
        secs("PRESENCE_SCAN_WINDOW_SECS", &mut self.scan.window_secs);
        secs("PRESENCE_SOURCE_TIMEOUT_SECS", &mut self.scan.source_timeout_secs);
        secs("PRESENCE_GONE_AFTER_SECS", &mut self.scan.gone_after_secs);
        secs("PRESENCE_BACKOFF_SECS", &mut self.scan.backoff_secs);

        if let Some(mode) = lookup("PRESENCE_DISCOVERY_MODE") {
            match mode.parse() {
                Ok(parsed) => self.scan.discovery_mode = parsed,
                Err(_) => warn!(mode = %mode, "Unknown discovery mode in environment"),
            }
        }
        if let Some(transport) = lookup("PRESENCE_TRANSPORT") {
            match transport.parse() {
                Ok(parsed) => self.scan.transport = parsed,
                Err(_) => warn!(transport = %transport, "Unknown transport in environment"),
            }
        }

        if let Some(list) = lookup("PRESENCE_NAME_WHITELIST") {
            self.filter.name_whitelist = split_list(&list);
        }
        if let Some(list) = lookup("PRESENCE_IGNORE_KEYS") {
            self.filter.ignore_keys = split_list(&list);
        }
        if let Some(list) = lookup("PRESENCE_NETWORK_HOSTS") {
            self.network.hosts = split_list(&list);
            self.network.enabled = !self.network.hosts.is_empty();
        }

        if let Some(path) = lookup("PRESENCE_STATE_FILE") {
            self.state.path = Some(PathBuf::from(path));
        }

        if let Some(name) = lookup("PRESENCE_APP_NAME") {
            self.alerts.app_name = name;
        }
        if let Some(tag) = lookup("PRESENCE_LOCATION_TAG") {
            self.alerts.location_tag = Some(tag);
        }
        if let Some(token) = lookup("PRESENCE_TELEGRAM_BOT_TOKEN") {
            self.alerts.telegram_bot_token = Some(token);
        }
        if let Some(chat) = lookup("PRESENCE_TELEGRAM_CHAT_ID") {
            self.alerts.telegram_chat_id = Some(chat);
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "presence", "presenced")
            .map(|dirs| dirs.config_dir().join("presence.toml"))
    }

    /// Resolved state file path.
    pub fn state_path(&self) -> PathBuf {
        self.state.path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("org", "presence", "presenced")
                .map(|dirs| dirs.data_dir().join("state.json"))
                .unwrap_or_else(|| PathBuf::from("presence_state.json"))
        })
    }
}

/// Splits a comma-separated list, dropping blanks.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
