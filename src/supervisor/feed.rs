//! Bounded event feed shown to operators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedEntry {
    pub time: DateTime<Utc>,
    /// Who posted: the daemon name, a unit, or `operator`
    pub source: String,
    pub message: String,
    pub level: FeedLevel,
}

/// Keeps the newest `capacity` entries
#[derive(Debug)]
pub struct EventFeed {
    entries: VecDeque<FeedEntry>,
    capacity: usize,
}

impl EventFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn post(&mut self, source: impl Into<String>, level: FeedLevel, message: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(FeedEntry {
            time: Utc::now(),
            source: source.into(),
            message: message.into(),
            level,
        });
    }

    pub fn info(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.post(source, FeedLevel::Info, message);
    }

    pub fn warning(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.post(source, FeedLevel::Warning, message);
    }

    pub fn error(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.post(source, FeedLevel::Error, message);
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<FeedEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_drops_oldest_past_capacity() {
        let mut feed = EventFeed::new(3);
        for i in 0..5 {
            feed.info("warden", format!("event {i}"));
        }
        let entries = feed.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "event 2");
        assert_eq!(entries[2].message, "event 4");
    }

    #[test]
    fn test_level_serializes_lowercase() {
        let mut feed = EventFeed::new(10);
        feed.warning("alpha", "stale");
        let v = serde_json::to_value(&feed.entries()[0]).unwrap();
        assert_eq!(v["level"], "warning");
        assert_eq!(v["source"], "alpha");
    }
}
