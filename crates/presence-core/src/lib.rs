//! # presence-core: Pure Tracking Logic for the Presence Daemon
//!
//! This crate turns one cycle's merged sightings into stable Present/Gone
//! transitions. It performs no I/O and never reads the clock.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Presence Daemon Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 presenced (binary)                              │   │
//! │  │        CLI ──► config ──► scan loop ──► shutdown signal         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 presence-scan                                   │   │
//! │  │   radio / reachability / announce sources, orchestrator,       │   │
//! │  │   notifier, daemon loop                                        │   │
//! │  └──────────────┬──────────────────────────────────┬───────────────┘   │
//! │                 │                                  │                    │
//! │  ┌──────────────▼──────────────────┐  ┌───────────▼────────────────┐   │
//! │  │   ★ presence-core (THIS) ★      │  │   presence-store           │   │
//! │  │   types · filter · tracker ·    │  │   atomic JSON state file   │   │
//! │  │   events                        │  │                            │   │
//! │  │   NO I/O • NO CLOCK             │  │                            │   │
//! │  └─────────────────────────────────┘  └────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Keys, sightings, tracked devices and the tracker table
//! - [`filter`] - Whitelist and ignore-list filtering
//! - [`tracker`] - The debouncing Present/Gone state machine
//! - [`event`] - Transition events and notification text
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use std::time::Duration;
//! use chrono::Utc;
//! use presence_core::{DeviceKey, DeviceKind, PresenceTracker, Sighting, SightingSet, TrackerTable};
//!
//! let tracker = PresenceTracker::new(Duration::from_secs(60)).unwrap();
//! let sightings: SightingSet = [Sighting::new(
//!     DeviceKey::radio("aa:11:22:33:44:55"),
//!     "Phone",
//!     DeviceKind::ShortRangeBle,
//! )]
//! .into_iter()
//! .collect();
//!
//! let outcome = tracker.process(TrackerTable::new(), &sightings, Utc::now());
//! assert_eq!(outcome.events.len(), 1);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod event;
pub mod filter;
pub mod tracker;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use event::{MessageFormatter, PresenceEvent, TransitionKind};
pub use filter::SightingFilter;
pub use tracker::{CycleOutcome, PresenceTracker};
pub use types::*;
