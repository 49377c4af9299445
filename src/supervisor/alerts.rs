//! Per-unit alert cooldown tracker

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Suppresses repeat alerts for the same unit inside the cooldown.
pub struct AlertLimiter {
    cooldown: Duration,
    last_alert: HashMap<String, Instant>,
}

impl AlertLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_alert: HashMap::new(),
        }
    }

    /// Returns true and records the alert if none was emitted for `unit`
    /// within the cooldown; otherwise returns false and records nothing.
    pub fn try_alert(&mut self, unit: &str, now: Instant) -> bool {
        if let Some(last) = self.last_alert.get(unit) {
            if now.saturating_duration_since(*last) < self.cooldown {
                return false;
            }
        }
        self.last_alert.insert(unit.to_string(), now);
        true
    }
}
