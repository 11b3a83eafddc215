//! # Announcement Source
//!
//! Browses multicast DNS service announcements with `avahi-browse`.
//!
//! ## Parsable Output
//! ```text
//! +;wlan0;IPv4;Living\032Room\032TV;_airplay._tcp;local          ← new, unresolved
//! =;wlan0;IPv4;Living\032Room\032TV;_airplay._tcp;local;tv.local;192.168.1.20;7000;"model=TV"
//!  │   │    │         name                type       domain  host     address   port  txt
//! ```
//! Only resolved (`=`) lines are used. Names escape bytes as `\DDD`
//! (decimal) and punctuation as `\.`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use presence_core::{DeviceKey, DeviceKind, Sighting};
use tracing::debug;

use crate::error::{SourceError, SourceResult};
use crate::runner::CommandRunner;
use crate::source::DiscoverySource;

/// One resolved service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub name: String,
    pub host: String,
    pub address: String,
}

impl ResolvedService {
    /// Sighting keyed by host, or by service name when no host is known.
    pub fn to_sighting(&self) -> Sighting {
        let id = if self.host.is_empty() { &self.name } else { &self.host };
        Sighting::new(
            DeviceKey::announcement(id),
            self.name.as_str(),
            DeviceKind::ServiceAnnouncement,
        )
    }
}

/// Parses one `avahi-browse -p` line, keeping only resolved entries.
pub fn parse_resolved_line(line: &str) -> Option<ResolvedService> {
    let fields: Vec<&str> = line.split(';').collect();
    if fields.len() < 9 || fields[0] != "=" {
        return None;
    }
    Some(ResolvedService {
        name: decode_escapes(fields[3]),
        host: decode_escapes(fields[6]),
        address: fields[7].to_string(),
    })
}

/// Decodes avahi's `\DDD` and `\c` escapes.
pub fn decode_escapes(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let digits = bytes.get(i + 1..i + 4);
            if let Some(d) = digits.filter(|d| d.iter().all(u8::is_ascii_digit)) {
                let value = d.iter().fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
            if let Some(&next) = bytes.get(i + 1) {
                out.push(next);
                i += 2;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Service announcement source.
pub struct AnnounceSource {
    runner: Arc<dyn CommandRunner>,
}

impl AnnounceSource {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl DiscoverySource for AnnounceSource {
    fn name(&self) -> &'static str {
        "announce"
    }

    async fn probe(&mut self, window: Duration) -> SourceResult<Vec<Sighting>> {
        let output = self
            .runner
            .run("avahi-browse", &["-a", "-r", "-p", "-t"], window)
            .await?;

        // A timed-out browse still produced usable lines.
        if !output.success && !output.timed_out && output.stdout.is_empty() {
            return Err(SourceError::command("avahi-browse", "exited without output"));
        }

        let sightings: Vec<Sighting> = output
            .stdout
            .iter()
            .filter_map(|line| parse_resolved_line(line))
            .map(|service| service.to_sighting())
            .collect();
        debug!(
            services = sightings.len(),
            lines = output.stdout.len(),
            timed_out = output.timed_out,
            "Announcement browse complete"
        );
        Ok(sightings)
    }
}
