//! Bounded debounce ledger for file events.
//!
//! Editors and downloaders often touch a file several times in a row. The ledger
//! remembers when each file name was last handled and drops events that arrive
//! within the quiet interval.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Last-handled timestamps keyed by file name, with a fixed capacity.
///
/// When full, recording a new name evicts the entry with the oldest timestamp.
#[derive(Debug)]
pub struct DebounceLedger {
    entries: HashMap<String, Instant>,
    capacity: usize,
    quiet_interval: Duration,
}

impl DebounceLedger {
    /// Create a ledger holding at most `capacity` names (minimum 1).
    pub fn new(capacity: usize, quiet_interval: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            quiet_interval,
        }
    }

    /// Decide whether an event for `name` observed at `now` should be handled.
    ///
    /// Returns false when the name was handled less than the quiet interval ago.
    /// Otherwise records `now` and returns true.
    pub fn should_handle(&mut self, name: &str, now: Instant) -> bool {
        if let Some(last) = self.entries.get(name)
            && now.saturating_duration_since(*last) < self.quiet_interval
        {
            return false;
        }

        if !self.entries.contains_key(name) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(name.to_string(), now);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn quiet_interval(&self) -> Duration {
        self.quiet_interval
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, at)| **at)
            .map(|(name, _)| name.clone());

        if let Some(name) = oldest {
            tracing::debug!("[debounce] evicting {name}");
            self.entries.remove(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_secs(5);

    #[test]
    fn test_events_within_interval_collapse() {
        let mut ledger = DebounceLedger::new(16, QUIET);
        let start = Instant::now();

        assert!(ledger.should_handle("report.pdf", start));
        assert!(!ledger.should_handle("report.pdf", start + Duration::from_secs(2)));
        assert!(!ledger.should_handle("report.pdf", start + Duration::from_millis(4_999)));
    }

    #[test]
    fn test_events_past_interval_both_handled() {
        let mut ledger = DebounceLedger::new(16, QUIET);
        let start = Instant::now();

        assert!(ledger.should_handle("report.pdf", start));
        assert!(ledger.should_handle("report.pdf", start + Duration::from_secs(6)));
    }

    #[test]
    fn test_names_are_independent() {
        let mut ledger = DebounceLedger::new(16, QUIET);
        let start = Instant::now();

        assert!(ledger.should_handle("a.txt", start));
        assert!(ledger.should_handle("b.txt", start));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_dropped_event_does_not_extend_window() {
        let mut ledger = DebounceLedger::new(16, QUIET);
        let start = Instant::now();

        assert!(ledger.should_handle("a.txt", start));
        assert!(!ledger.should_handle("a.txt", start + Duration::from_secs(4)));
        // measured from the last handled event, not the last seen one
        assert!(ledger.should_handle("a.txt", start + Duration::from_secs(5)));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut ledger = DebounceLedger::new(2, QUIET);
        let start = Instant::now();

        assert!(ledger.should_handle("first", start));
        assert!(ledger.should_handle("second", start + Duration::from_millis(10)));
        assert!(ledger.should_handle("third", start + Duration::from_millis(20)));

        assert_eq!(ledger.len(), 2);
        assert!(!ledger.contains("first"));
        assert!(ledger.contains("second"));
        assert!(ledger.contains("third"));

        // evicted names are handled again immediately
        assert!(ledger.should_handle("first", start + Duration::from_millis(30)));
        assert!(!ledger.contains("second"));
    }
}
