//! Per-check run bookkeeping for the control loop

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Periodic checks the control loop runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Check {
    Health,
    LossStreak,
    Settlement,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    last_run: Option<Instant>,
    interval: Duration,
}

/// Each check runs when `now - last_run >= interval`, independently of the others.
/// A check that has never run is due immediately.
#[derive(Debug, Default)]
pub struct CheckSchedule {
    slots: HashMap<Check, Slot>,
}

impl CheckSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, check: Check, interval: Duration) -> Self {
        self.slots.insert(
            check,
            Slot {
                last_run: None,
                interval,
            },
        );
        self
    }

    /// Unscheduled checks are never due
    pub fn is_due(&self, check: Check, now: Instant) -> bool {
        self.slots.get(&check).is_some_and(|slot| match slot.last_run {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= slot.interval,
        })
    }

    pub fn mark_ran(&mut self, check: Check, now: Instant) {
        if let Some(slot) = self.slots.get_mut(&check) {
            slot.last_run = Some(now);
        }
    }
}
