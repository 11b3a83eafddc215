//! # presence-store: State Persistence for the Presence Daemon
//!
//! Keeps the tracker table across restarts in a single JSON file.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Presence Data Flow                               │
//! │                                                                         │
//! │  Scan loop (presence-scan)                                             │
//! │       │ table changed?                                                  │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  presence-store (THIS CRATE)                    │   │
//! │  │                                                                 │   │
//! │  │   load()  ── tolerant: bad entries skipped, bad dates → now     │   │
//! │  │   save()  ── atomic: <path>.tmp, sync, rename                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ~/.local/share/presenced/state.json                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use presence_store::StateStore;
//!
//! let store = StateStore::new("/var/lib/presenced/state.json");
//! let table = store.load();
//! store.save(&table)?;
//! ```

pub mod error;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::{parse_timestamp, StateStore};
