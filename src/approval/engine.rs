//! ApprovalEngine: tiered classification plus the durable queue and history.
//!
//! The engine is owned by the control loop and mutated only from there.
//! Every mutation rewrites the affected collection through the
//! [`ActionStore`]; store failures are logged and the in-memory state stays
//! authoritative for the life of the process.

use super::policy::PermissionPolicy;
use super::store::ActionStore;
use crate::config::defaults::HISTORY_RETENTION;
use crate::types::{
    Action, ActionStatus, ExecutionRecord, Submission, Tier, RESOLVER_OPERATOR, RESOLVER_SYSTEM,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of `submit`
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub status: ActionStatus,
    pub action: Action,
}

// ============================================================================
// Id Generation
// ============================================================================

const ID_PREFIX: &str = "action_";

/// Time-derived ids that never repeat within a process.
///
/// Ids are `action_<unix_millis>`; two submissions in the same millisecond
/// are pushed forward by one.
#[derive(Debug, Default)]
struct IdGenerator {
    last_millis: i64,
}

impl IdGenerator {
    /// Seed from existing ids so a restart never reissues one
    fn seeded<'a>(ids: impl Iterator<Item = &'a str>) -> Self {
        let last_millis = ids
            .filter_map(|id| id.strip_prefix(ID_PREFIX))
            .filter_map(|n| n.parse::<i64>().ok())
            .max()
            .unwrap_or(0);
        Self { last_millis }
    }

    fn next(&mut self, now: DateTime<Utc>) -> String {
        let millis = now.timestamp_millis().max(self.last_millis + 1);
        self.last_millis = millis;
        format!("{ID_PREFIX}{millis}")
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct ApprovalEngine {
    policy: PermissionPolicy,
    /// Resolver identity stamped on auto-approved actions
    daemon_name: String,
    store: Arc<dyn ActionStore>,
    queue: Vec<Action>,
    history: Vec<Action>,
    /// Approved actions awaiting the executor, oldest first
    ready: Vec<Action>,
    ids: IdGenerator,
}

impl ApprovalEngine {
    /// Build the engine and restore queue, history and ready list from the store.
    pub fn new(
        policy: PermissionPolicy,
        daemon_name: impl Into<String>,
        store: Arc<dyn ActionStore>,
    ) -> Self {
        let queue = load_or_empty("queue", store.load_queue());
        let mut history = load_or_empty("history", store.load_history());
        let ready = load_or_empty("ready", store.load_ready());
        truncate_history(&mut history);

        let ids = IdGenerator::seeded(
            queue
                .iter()
                .chain(history.iter())
                .chain(ready.iter())
                .map(|a| a.id.as_str()),
        );

        info!(
            backend = store.backend_name(),
            pending = queue.len(),
            history = history.len(),
            ready = ready.len(),
            "Approval engine restored"
        );

        Self {
            policy,
            daemon_name: daemon_name.into(),
            store,
            queue,
            history,
            ready,
            ids,
        }
    }

    /// Classify a proposal and route it.
    ///
    /// - forbidden: recorded as `blocked` in history, never queued or executed
    /// - auto: recorded as `auto_approved` in history and handed to the executor
    /// - approval (including unknown types): appended to the pending queue
    pub fn submit(&mut self, submission: Submission) -> SubmitOutcome {
        let now = Utc::now();
        let tier = self.policy.tier_for(&submission.action_type);
        let mut action = Action {
            id: self.ids.next(now),
            action_type: submission.action_type,
            description: submission.description,
            reason: submission.reason,
            unit: submission.unit,
            params: submission.params,
            tier,
            status: ActionStatus::Pending,
            submitted_at: now,
            resolved_at: None,
            resolved_by: None,
        };

        match tier {
            Tier::Forbidden => {
                action.status = ActionStatus::Blocked;
                action.resolved_at = Some(now);
                action.resolved_by = Some(RESOLVER_SYSTEM.to_string());
                warn!(id = %action.id, action_type = %action.action_type, unit = ?action.unit, "BLOCKED forbidden action");
                self.push_history(action.clone());
            }
            Tier::Auto => {
                action.status = ActionStatus::AutoApproved;
                action.resolved_at = Some(now);
                action.resolved_by = Some(self.daemon_name.clone());
                info!(id = %action.id, action_type = %action.action_type, "Auto-approved: {}", action.description);
                self.push_history(action.clone());
                self.push_ready(action.clone());
            }
            Tier::Approval => {
                if !self.policy.is_listed(&action.action_type) {
                    warn!(action_type = %action.action_type, "Unlisted action type, holding for approval");
                }
                info!(id = %action.id, action_type = %action.action_type, "Queued for approval: {}", action.description);
                self.queue.push(action.clone());
                self.persist_queue();
            }
        }

        SubmitOutcome {
            status: action.status,
            action,
        }
    }

    /// Operator approval. `None` if the id is not pending (unknown or already resolved).
    pub fn approve(&mut self, id: &str) -> Option<Action> {
        let action = self.resolve(id, ActionStatus::Approved)?;
        info!(id = %action.id, "Operator approved: {}", action.description);
        self.push_ready(action.clone());
        Some(action)
    }

    /// Operator rejection. `None` if the id is not pending (unknown or already resolved).
    pub fn reject(&mut self, id: &str) -> Option<Action> {
        let action = self.resolve(id, ActionStatus::Rejected)?;
        info!(id = %action.id, "Operator rejected: {}", action.description);
        Some(action)
    }

    fn resolve(&mut self, id: &str, status: ActionStatus) -> Option<Action> {
        let idx = self.queue.iter().position(|a| a.id == id)?;
        let mut action = self.queue.remove(idx);
        action.status = status;
        action.resolved_at = Some(Utc::now());
        action.resolved_by = Some(RESOLVER_OPERATOR.to_string());

        self.persist_queue();
        self.push_history(action.clone());
        Some(action)
    }

    /// Pending actions in submission order
    pub fn pending_actions(&self) -> &[Action] {
        &self.queue
    }

    /// The last `limit` resolved actions, oldest first
    pub fn recent_history(&self, limit: usize) -> &[Action] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }

    /// Approved actions not yet executed, oldest first
    pub fn ready_actions(&self) -> Vec<Action> {
        self.ready.clone()
    }

    /// Drop an action from the ready list and log its execution result.
    pub fn mark_executed(&mut self, record: &ExecutionRecord) {
        self.ready.retain(|a| a.id != record.action_id);
        if let Err(e) = self.store.save_ready(&self.ready) {
            error!(error = %e, "Failed to persist ready list");
        }
        if let Err(e) = self.store.record_execution(record) {
            error!(id = %record.action_id, error = %e, "Failed to persist execution record");
        }
    }

    /// Recent executor results, newest first
    pub fn recent_executions(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.store.recent_executions(limit).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read execution ledger");
            Vec::new()
        })
    }

    fn push_history(&mut self, action: Action) {
        self.history.push(action);
        truncate_history(&mut self.history);
        if let Err(e) = self.store.save_history(&self.history) {
            error!(error = %e, "Failed to persist action history");
        }
    }

    fn push_ready(&mut self, action: Action) {
        self.ready.push(action);
        if let Err(e) = self.store.save_ready(&self.ready) {
            error!(error = %e, "Failed to persist ready list");
        }
    }

    fn persist_queue(&self) {
        if let Err(e) = self.store.save_queue(&self.queue) {
            error!(error = %e, "Failed to persist approval queue");
        }
    }
}

fn truncate_history(history: &mut Vec<Action>) {
    if history.len() > HISTORY_RETENTION {
        let excess = history.len() - HISTORY_RETENTION;
        history.drain(..excess);
    }
}

fn load_or_empty(
    name: &str,
    result: Result<Vec<Action>, super::store::StoreError>,
) -> Vec<Action> {
    result.unwrap_or_else(|e| {
        error!(collection = name, error = %e, "Failed to load actions, starting empty");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::InMemoryActionStore;
    use crate::types::ExecutionOutcome;

    fn engine() -> ApprovalEngine {
        let policy = PermissionPolicy::new(
            vec!["restart_crashed_bot", "log_observation"],
            vec!["change_stake_size"],
            vec!["withdraw_funds"],
        );
        ApprovalEngine::new(policy, "warden", Arc::new(InMemoryActionStore::new()))
    }

    #[test]
    fn test_forbidden_goes_straight_to_history() {
        let mut e = engine();
        let out = e.submit(Submission::new("withdraw_funds", "drain", "because"));
        assert_eq!(out.status, ActionStatus::Blocked);
        assert_eq!(out.action.resolved_by.as_deref(), Some("system"));
        assert!(out.action.resolved_at.is_some());
        assert!(e.pending_actions().is_empty());
        assert!(e.ready_actions().is_empty());
        assert_eq!(e.recent_history(10).len(), 1);
    }

    #[test]
    fn test_auto_is_resolved_by_daemon_and_ready() {
        let mut e = engine();
        let out = e.submit(Submission::new("restart_crashed_bot", "restart", "dead").for_unit("alpha"));
        assert_eq!(out.status, ActionStatus::AutoApproved);
        assert_eq!(out.action.resolved_by.as_deref(), Some("warden"));
        assert_eq!(e.ready_actions().len(), 1);
        assert!(e.pending_actions().is_empty());
    }

    #[test]
    fn test_unknown_type_is_queued() {
        let mut e = engine();
        let out = e.submit(Submission::new("teleport_funds", "?", "?"));
        assert_eq!(out.status, ActionStatus::Pending);
        assert_eq!(out.action.tier, Tier::Approval);
        assert_eq!(e.pending_actions().len(), 1);
        assert!(e.recent_history(10).is_empty());
    }

    #[test]
    fn test_approve_is_idempotent() {
        let mut e = engine();
        let id = e.submit(Submission::new("change_stake_size", "d", "r")).action.id;

        let first = e.approve(&id).expect("pending action approves");
        assert_eq!(first.status, ActionStatus::Approved);
        assert_eq!(first.resolved_by.as_deref(), Some("operator"));

        assert!(e.approve(&id).is_none());
        assert!(e.reject(&id).is_none());
        assert_eq!(e.recent_history(10).len(), 1);
        assert_eq!(e.ready_actions().len(), 1);
    }

    #[test]
    fn test_reject_never_reaches_ready() {
        let mut e = engine();
        let id = e.submit(Submission::new("change_stake_size", "d", "r")).action.id;
        let rejected = e.reject(&id).unwrap();
        assert_eq!(rejected.status, ActionStatus::Rejected);
        assert!(e.ready_actions().is_empty());
        assert!(e.approve("action_0").is_none());
    }

    #[test]
    fn test_ids_strictly_increase() {
        let mut e = engine();
        let ids: Vec<i64> = (0..20)
            .map(|_| e.submit(Submission::new("log_observation", "d", "r")).action.id)
            .map(|id| id.trim_start_matches("action_").parse().unwrap())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_history_capped() {
        let mut e = engine();
        for _ in 0..(HISTORY_RETENTION + 15) {
            e.submit(Submission::new("withdraw_funds", "d", "r"));
        }
        assert_eq!(e.recent_history(usize::MAX).len(), HISTORY_RETENTION);
    }

    #[test]
    fn test_recent_history_is_oldest_first() {
        let mut e = engine();
        let a = e.submit(Submission::new("withdraw_funds", "a", "r")).action.id;
        let b = e.submit(Submission::new("withdraw_funds", "b", "r")).action.id;
        let c = e.submit(Submission::new("withdraw_funds", "c", "r")).action.id;
        let ids: Vec<&str> = e.recent_history(2).iter().map(|x| x.id.as_str()).collect();
        assert_eq!(ids, vec![b.as_str(), c.as_str()]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_mark_executed_clears_ready() {
        let mut e = engine();
        let action = e.submit(Submission::new("log_observation", "d", "r")).action;
        let record = ExecutionRecord::new(&action, ExecutionOutcome::succeeded(serde_json::json!({})));
        e.mark_executed(&record);
        assert!(e.ready_actions().is_empty());
        assert_eq!(e.recent_executions(5).len(), 1);
    }

    #[test]
    fn test_id_generator_seeded_past_existing() {
        let mut ids = IdGenerator::seeded(["action_5000000000000", "bogus"].into_iter());
        let now = DateTime::<Utc>::from_timestamp_millis(1_000).unwrap();
        assert_eq!(ids.next(now), "action_5000000000001");
    }
}
