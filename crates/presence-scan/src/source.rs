//! # Discovery Source
//!
//! The seam every discovery channel plugs into.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────┐   ensure_ready()   ┌─────────────┐   probe(window)   ┌───────────┐
//! │  Created    │ ─────────────────► │   Ready     │ ────────────────► │ Sightings │
//! └─────────────┘                    └──────┬──────┘ ◄──── next cycle  └───────────┘
//!                                           │ transient failure
//!                                           ▼
//!                                    reset() → re-resolve on next probe
//! ```

use std::time::Duration;

use async_trait::async_trait;
use presence_core::Sighting;

use crate::error::SourceResult;

/// A channel that can report which devices it sees during one window.
///
/// Implementations must return within the orchestrator's per-source timeout
/// on their own; the timeout is a backstop, not the normal exit path.
#[async_trait]
pub trait DiscoverySource: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Per-source initialization. An error classified fatal aborts startup.
    async fn ensure_ready(&mut self) -> SourceResult<()> {
        Ok(())
    }

    /// Listens for about `window` and reports what was seen.
    ///
    /// Keys must be namespaced for this source. Filtering is not the
    /// source's job.
    async fn probe(&mut self, window: Duration) -> SourceResult<Vec<Sighting>>;

    /// Drops cached handles so the next probe starts from scratch.
    async fn reset(&mut self) {}

    /// Releases long-lived resources at daemon exit.
    async fn shutdown(&mut self) {}
}
