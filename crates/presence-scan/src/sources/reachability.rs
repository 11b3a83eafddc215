//! # Reachability Source
//!
//! Pings each configured host once per cycle. All hosts are probed
//! concurrently, each bounded by its own timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use presence_core::{DeviceKey, DeviceKind, Sighting};
use tracing::{debug, trace};

use crate::error::{SourceError, SourceResult};
use crate::runner::CommandRunner;
use crate::source::DiscoverySource;

/// Extra time granted to `ping` beyond its own `-W` wait.
const PING_GRACE: Duration = Duration::from_secs(1);

/// Network reachability source.
pub struct ReachabilitySource {
    runner: Arc<dyn CommandRunner>,
    hosts: Vec<String>,
    ping_timeout: Duration,
}

impl ReachabilitySource {
    pub fn new(runner: Arc<dyn CommandRunner>, hosts: Vec<String>, ping_timeout: Duration) -> Self {
        Self {
            runner,
            hosts,
            ping_timeout,
        }
    }

    /// Pings one host. Ok(true) means it answered.
    async fn ping(&self, host: &str) -> SourceResult<bool> {
        let wait = self.ping_timeout.as_secs().max(1).to_string();
        let output = self
            .runner
            .run(
                "ping",
                &["-c", "1", "-W", wait.as_str(), host],
                self.ping_timeout + PING_GRACE,
            )
            .await?;
        trace!(host, success = output.success, timed_out = output.timed_out, "Ping finished");
        Ok(output.success)
    }
}

#[async_trait]
impl DiscoverySource for ReachabilitySource {
    fn name(&self) -> &'static str {
        "network"
    }

    async fn probe(&mut self, _window: Duration) -> SourceResult<Vec<Sighting>> {
        let this = &*self;
        let results = join_all(
            this.hosts
                .iter()
                .map(|host| async move { (host, this.ping(host).await) }),
        )
        .await;

        let mut sightings = Vec::new();
        for (host, result) in results {
            match result {
                Ok(true) => sightings.push(Sighting::new(
                    DeviceKey::network(host),
                    host.as_str(),
                    DeviceKind::Network,
                )),
                Ok(false) => {}
                Err(e @ SourceError::ToolMissing { .. }) => return Err(e),
                Err(e) => debug!(host = %host, error = %e, "Treating host as unreachable"),
            }
        }

        debug!(reachable = sightings.len(), hosts = self.hosts.len(), "Reachability probe complete");
        Ok(sightings)
    }
}
