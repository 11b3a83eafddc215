//! # Sighting Filter
//!
//! One filter, applied to the merged output of every discovery source, so a
//! device is kept or dropped the same way whichever channel found it.
//!
//! ## Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Filter Evaluation                                │
//! │                                                                         │
//! │  Sighting                                                              │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  key in ignore set? ──yes──► DROP   (case-insensitive exact match)     │
//! │     │ no                                                                │
//! │     ▼                                                                   │
//! │  whitelist empty?  ──yes──► KEEP                                       │
//! │     │ no                                                                │
//! │     ▼                                                                   │
//! │  name contains any term? ──yes──► KEEP  (case-insensitive substring)   │
//! │     │ no                                                                │
//! │     ▼                                                                   │
//! │    DROP  (nameless sightings never pass a non-empty whitelist)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;

use crate::types::{DeviceKey, Sighting, SightingSet};

/// Whitelist + ignore-list filter shared by all sources.
#[derive(Debug, Clone, Default)]
pub struct SightingFilter {
    /// Lower-cased whitelist terms. Empty allows everything.
    whitelist: Vec<String>,
    /// Lower-cased keys that are always dropped.
    ignored: HashSet<String>,
}

impl SightingFilter {
    /// Builds a filter. Blank terms and keys are discarded.
    pub fn new<W, I>(whitelist: W, ignored: I) -> Self
    where
        W: IntoIterator,
        W::Item: AsRef<str>,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let whitelist = whitelist
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        let ignored = ignored
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        SightingFilter { whitelist, ignored }
    }

    /// A filter that keeps everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Returns true if the name passes the whitelist.
    pub fn matches_whitelist(&self, name: &str) -> bool {
        if self.whitelist.is_empty() {
            return true;
        }
        if name.is_empty() {
            return false;
        }
        let name = name.to_lowercase();
        self.whitelist.iter().any(|term| name.contains(term.as_str()))
    }

    /// Returns true if the key is on the ignore list.
    pub fn is_ignored(&self, key: &DeviceKey) -> bool {
        !self.ignored.is_empty() && self.ignored.contains(&key.as_str().to_lowercase())
    }

    /// Returns true if the sighting should reach the tracker.
    pub fn allows(&self, sighting: &Sighting) -> bool {
        !self.is_ignored(&sighting.key) && self.matches_whitelist(&sighting.display_name)
    }

    /// Filters a merged set in place, returning how many sightings were dropped.
    pub fn apply(&self, sightings: &mut SightingSet) -> usize {
        let before = sightings.len();
        sightings.retain(|s| self.allows(s));
        before - sightings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceKind;

    fn named(key: &str, name: &str) -> Sighting {
        Sighting::new(DeviceKey::radio(key), name, DeviceKind::ShortRangeBle)
    }

    #[test]
    fn test_empty_whitelist_allows_all() {
        let filter = SightingFilter::allow_all();
        assert!(filter.allows(&named("AA:00:00:00:00:01", "")));
        assert!(filter.allows(&named("AA:00:00:00:00:02", "Speaker")));
    }

    #[test]
    fn test_whitelist_substring_case_insensitive() {
        let filter = SightingFilter::new(["phone"], Vec::<String>::new());

        let mut set: SightingSet = [
            named("AA:00:00:00:00:01", "My Phone"),
            named("AA:00:00:00:00:02", "Speaker"),
        ]
        .into_iter()
        .collect();

        let dropped = filter.apply(&mut set);
        assert_eq!(dropped, 1);
        assert_eq!(set.len(), 1);
        assert!(set.contains(&DeviceKey::radio("AA:00:00:00:00:01")));
    }

    #[test]
    fn test_whitelist_rejects_nameless() {
        let filter = SightingFilter::new(["phone"], Vec::<String>::new());
        assert!(!filter.allows(&named("AA:00:00:00:00:01", "")));
    }

    #[test]
    fn test_ignore_list_wins_over_whitelist() {
        let filter = SightingFilter::new(["phone"], ["aa:bb:cc:dd:ee:ff"]);
        assert!(!filter.allows(&named("AA:BB:CC:DD:EE:FF", "My Phone")));
        assert!(filter.allows(&named("AA:BB:CC:DD:EE:00", "My Phone")));
    }

    #[test]
    fn test_ignore_is_exact_not_substring() {
        let filter = SightingFilter::new(Vec::<String>::new(), ["AA:BB:CC:DD:EE:FF"]);
        let network = Sighting::new(
            DeviceKey::network("AA:BB:CC:DD:EE:FF"),
            "laptop",
            DeviceKind::Network,
        );
        assert!(filter.allows(&network));
    }

    #[test]
    fn test_blank_terms_are_discarded() {
        let filter = SightingFilter::new(["  ", ""], [" "]);
        assert!(filter.allows(&named("AA:00:00:00:00:01", "")));
    }
}
