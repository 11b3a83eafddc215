//! # Scan Error Types
//!
//! Error types for discovery sources, notification sinks and the scan loop.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Scan Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │     Fatal       │  │   Transient     │  │     Degraded            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  NoAdapter      │  │  BusCall        │  │  ToolMissing            │ │
//! │  │                 │  │  BadReply       │  │                         │ │
//! │  │  abort startup  │  │  CommandFailed  │  │  skip the source for    │ │
//! │  │                 │  │  TimedOut       │  │  the rest of the run    │ │
//! │  │                 │  │  reset + retry  │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  NotifyError   - alert delivery, logged and swallowed                  │
//! │  ScanError     - config, init and persistence failures of the daemon   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type alias for notification delivery.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Result type alias for daemon-level operations.
pub type ScanResult<T> = Result<T, ScanError>;

// =============================================================================
// Failure Kinds
// =============================================================================

/// How the scan loop reacts to a source failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Abort startup.
    Fatal,
    /// Log, reset the source, retry next cycle.
    Transient,
    /// Skip the source from now on.
    Degraded,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Fatal => write!(f, "fatal"),
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Degraded => write!(f, "degraded"),
        }
    }
}

// =============================================================================
// Source Errors
// =============================================================================

/// A discovery source failed to initialize or probe.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// No object on the bus exposes the adapter interface.
    #[error("No radio adapter found (no object exposes {interface})")]
    NoAdapter { interface: &'static str },

    /// A bus call returned an error.
    #[error("Bus call {method} failed: {detail}")]
    BusCall { method: String, detail: String },

    /// A bus reply could not be understood.
    #[error("Unexpected bus reply: {0}")]
    BadReply(String),

    /// An external tool ran but failed.
    #[error("{tool} failed: {detail}")]
    CommandFailed { tool: String, detail: String },

    /// An external tool is not installed.
    #[error("{tool} is not installed")]
    ToolMissing { tool: String },

    /// The probe did not finish within its timeout.
    #[error("Probe timed out after {0:?}")]
    TimedOut(Duration),
}

impl SourceError {
    /// Creates a CommandFailed error.
    pub fn command(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        SourceError::CommandFailed {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    /// Creates a BusCall error.
    pub fn bus(method: impl Into<String>, detail: impl Into<String>) -> Self {
        SourceError::BusCall {
            method: method.into(),
            detail: detail.into(),
        }
    }

    /// Classifies this error for the scan loop.
    pub fn kind(&self) -> FailureKind {
        match self {
            SourceError::NoAdapter { .. } => FailureKind::Fatal,
            SourceError::ToolMissing { .. } => FailureKind::Degraded,
            SourceError::BusCall { .. }
            | SourceError::BadReply(_)
            | SourceError::CommandFailed { .. }
            | SourceError::TimedOut(_) => FailureKind::Transient,
        }
    }

    /// Returns true if startup must abort.
    pub fn is_fatal(&self) -> bool {
        self.kind() == FailureKind::Fatal
    }

    /// Returns true if the source should be reset and retried.
    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Returns true if the source should be skipped from now on.
    pub fn is_degraded(&self) -> bool {
        self.kind() == FailureKind::Degraded
    }
}

// =============================================================================
// Notification Errors
// =============================================================================

/// Alert delivery failed.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP request could not be made or timed out.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote API answered with a non-success status.
    #[error("Delivery rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The notifier task is gone.
    #[error("Notifier is shut down")]
    Closed,
}

// =============================================================================
// Daemon Errors
// =============================================================================

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read or parse the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// A source failed fatally during startup.
    #[error("Source {source_name} failed to initialize: {error}")]
    Init {
        source_name: &'static str,
        #[source]
        error: SourceError,
    },

    /// Tracker parameters rejected.
    #[error(transparent)]
    Core(#[from] presence_core::CoreError),

    /// State file could not be written.
    #[error(transparent)]
    Persistence(#[from] presence_store::StoreError),

    /// Alert transport could not be built.
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        ScanError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ScanError {
    fn from(err: toml::de::Error) -> Self {
        ScanError::ConfigLoadFailed(err.to_string())
    }
}

impl ScanError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ScanError::InvalidConfig(_) | ScanError::ConfigLoadFailed(_) | ScanError::Core(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_kinds() {
        assert!(SourceError::NoAdapter { interface: "org.bluez.Adapter1" }.is_fatal());
        assert!(SourceError::bus("StartDiscovery", "org.bluez.Error.NotReady").is_transient());
        assert!(SourceError::TimedOut(Duration::from_secs(15)).is_transient());
        assert!(SourceError::ToolMissing { tool: "avahi-browse".into() }.is_degraded());
        assert!(!SourceError::command("ping", "exit 2").is_degraded());
    }

    #[test]
    fn test_error_display() {
        let err = ScanError::Init {
            source_name: "radio",
            error: SourceError::NoAdapter { interface: "org.bluez.Adapter1" },
        };
        assert!(err.to_string().contains("radio"));
        assert!(err.to_string().contains("org.bluez.Adapter1"));
        assert!(ScanError::InvalidConfig("window_secs must be > 0".into()).is_config_error());
    }
}
