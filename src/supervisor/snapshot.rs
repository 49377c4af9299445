//! Read-only view of the loop's state for the reporting surface

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::feed::FeedEntry;
use crate::types::{Action, ExecutionRecord, HealthRecord};

/// Written by the control loop once per cycle, read by everyone else
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorSnapshot {
    pub daemon: String,
    pub started_at: DateTime<Utc>,
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub health: BTreeMap<String, HealthRecord>,
    pub pending: Vec<Action>,
    /// Resolved actions, oldest first
    pub history: Vec<Action>,
    /// Executor results, newest first
    pub executions: Vec<ExecutionRecord>,
    pub events: Vec<FeedEntry>,
    /// Restart attempts inside the current cooldown window, per unit
    pub restart_attempts: BTreeMap<String, usize>,
}

impl SupervisorSnapshot {
    pub fn empty(daemon: impl Into<String>) -> Self {
        Self {
            daemon: daemon.into(),
            started_at: Utc::now(),
            cycles: 0,
            last_cycle_at: None,
            health: BTreeMap::new(),
            pending: Vec::new(),
            history: Vec::new(),
            executions: Vec::new(),
            events: Vec::new(),
            restart_attempts: BTreeMap::new(),
        }
    }

    /// The last `limit` history entries, oldest first
    pub fn recent_history(&self, limit: usize) -> &[Action] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }
}

pub type SharedSnapshot = Arc<RwLock<SupervisorSnapshot>>;
