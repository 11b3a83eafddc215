//! # presence-scan: Discovery and Scan Loop for the Presence Daemon
//!
//! This crate probes the environment for nearby devices and drives the
//! presence tracker once per cycle.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Presence Daemon                                │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 PresenceDaemon (scan loop)                       │  │
//! │  │                                                                  │  │
//! │  │  cycle → track → persist on change → notify per transition       │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ScanOrchestrator│  │ StateStore     │  │  Notifier              │    │
//! │  │                │  │ (presence-     │  │                        │    │
//! │  │ Concurrent     │  │  store)        │  │ Bounded queue, own     │    │
//! │  │ probes, per-   │  │                │  │ task, log / Telegram   │    │
//! │  │ source timeout │  │ Atomic JSON    │  │ sinks                  │    │
//! │  └───────┬────────┘  └────────────────┘  └────────────────────────┘    │
//! │          │                                                              │
//! │   ┌──────┴───────────────┬─────────────────────┐                       │
//! │   ▼                      ▼                     ▼                        │
//! │ ┌──────────────┐  ┌──────────────────┐  ┌───────────────────┐          │
//! │ │ RadioSource  │  │ReachabilitySource│  │ AnnounceSource    │          │
//! │ │ adapter bus  │  │ ping per host    │  │ avahi-browse      │          │
//! │ └──────────────┘  └──────────────────┘  └───────────────────┘          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Layered configuration (file, environment, validation)
//! - [`daemon`] - The scan loop
//! - [`error`] - Source, notification and daemon error types
//! - [`notify`] - Alert sinks and the notifier task
//! - [`orchestrator`] - One cycle across every enabled source
//! - [`runner`] - External command execution with deadlines
//! - [`source`] - The [`DiscoverySource`] trait
//! - [`sources`] - Source implementations

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod daemon;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod runner;
pub mod source;
pub mod sources;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use config::{DiscoveryMode, PresenceConfig, RadioTransport};
pub use daemon::{build_orchestrator, build_sources, CycleSummary, PresenceDaemon};
pub use error::{
    FailureKind, NotifyError, NotifyResult, ScanError, ScanResult, SourceError, SourceResult,
};
pub use notify::{
    sink_from_settings, LogSink, NotificationSink, Notifier, NotifierHandle, TelegramSink,
};
pub use orchestrator::{ScanOrchestrator, ScanReport, SourceFailure};
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use source::DiscoverySource;
