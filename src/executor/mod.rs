//! Executor: applies approved actions to units
//!
//! Dispatch is keyed by [`ActionKind`]; an unrecognized type tag yields
//! `Failed { error: "no_handler" }`. Handler errors and panics are caught
//! here and reported as `Failed`; nothing escapes to the control loop.

mod change_tracker;
mod handlers;
mod parameters;

pub use change_tracker::{ChangeTracker, GitChangeTracker, NoopChangeTracker, TrackerError};
pub use parameters::{OverrideFileChanger, ParameterChange, ParameterChanger};

use futures::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{SupervisorConfig, UnitConfig};
use crate::health::{RestartController, RestartOutcome};
use crate::types::{Action, ActionKind, ExecutionOutcome};

pub const NO_HANDLER: &str = "no_handler";

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("no_unit_specified")]
    NoUnit,
    #[error("unknown_unit: {0}")]
    UnknownUnit(String),
    #[error("no directory configured for unit {0}")]
    NoDirectory(String),
    #[error("no_value_provided")]
    NoValue,
    #[error("no redeem command configured for unit {0}")]
    NoRedeemCommand(String),
    #[error("{reason}")]
    Restart { reason: String },
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("command failed: {0}")]
    Command(String),
    #[error("parameter change failed: {0}")]
    Parameter(String),
    #[error("I/O error ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub struct Executor {
    config: Arc<SupervisorConfig>,
    restarts: RestartController,
    parameters: Arc<dyn ParameterChanger>,
    tracker: Arc<dyn ChangeTracker>,
}

impl Executor {
    pub fn new(
        config: Arc<SupervisorConfig>,
        restarts: RestartController,
        parameters: Arc<dyn ParameterChanger>,
        tracker: Arc<dyn ChangeTracker>,
    ) -> Self {
        Self {
            config,
            restarts,
            parameters,
            tracker,
        }
    }

    /// Run the handler for `action`. Never panics and never returns an error.
    pub async fn execute(&mut self, action: &Action) -> ExecutionOutcome {
        let Some(kind) = action.kind() else {
            warn!(id = %action.id, action_type = %action.action_type, "No handler for action");
            return ExecutionOutcome::failed(NO_HANDLER);
        };

        let result = AssertUnwindSafe(self.dispatch(kind, action)).catch_unwind().await;
        match result {
            Ok(Ok(value)) => {
                info!(id = %action.id, action_type = %action.action_type, result = %value, "Executed action");
                ExecutionOutcome::succeeded(value)
            }
            Ok(Err(e)) => {
                error!(id = %action.id, action_type = %action.action_type, error = %e, "Execute failed");
                ExecutionOutcome::failed(e.to_string())
            }
            Err(_) => {
                error!(id = %action.id, action_type = %action.action_type, "Handler panicked");
                ExecutionOutcome::failed("handler_panicked")
            }
        }
    }

    async fn dispatch(&mut self, kind: ActionKind, action: &Action) -> Result<Value, HandlerError> {
        match kind {
            ActionKind::RestartCrashedUnit => self.restart(action).await,
            ActionKind::RedeemSettlements => {
                let (name, unit) = self.unit_of(action)?;
                let command = unit
                    .redeem_command
                    .as_deref()
                    .ok_or_else(|| HandlerError::NoRedeemCommand(name.to_string()))?;
                handlers::run_redeem(&unit.directory, command).await
            }
            ActionKind::PauseOnLossStreak => {
                let (name, _) = self.unit_of(action)?;
                let reason = action.param_str("reason").unwrap_or("loss_streak");
                self.pause_unit(name, reason)
            }
            ActionKind::ResumeAfterCooldown => {
                let (name, _) = self.unit_of(action)?;
                self.resume_unit(name)
            }
            ActionKind::LogObservation => Ok(json!({
                "logged": true,
                "observation": action.param_str("message").unwrap_or(&action.description),
            })),
            ActionKind::ChangeMovementFilter
            | ActionKind::ChangeStakeSize
            | ActionKind::ChangeEntryTiming
            | ActionKind::ToggleRsiFilter
            | ActionKind::ChangeConvictionRange => self.change_parameters(kind, action).await,
        }
    }

    async fn restart(&mut self, action: &Action) -> Result<Value, HandlerError> {
        let (name, unit) = self.unit_of(action)?;
        let (name, unit) = (name.to_string(), unit.clone());
        let outcome: RestartOutcome = self.restarts.try_restart(&name, &unit).await;
        if outcome.success {
            Ok(json!(outcome))
        } else {
            Err(HandlerError::Restart {
                reason: outcome.reason,
            })
        }
    }

    /// Write the kill switch for a unit. Also used by the `pause` operator command.
    pub fn pause_unit(&self, name: &str, reason: &str) -> Result<Value, HandlerError> {
        let unit = self.lookup(name)?;
        if unit.directory.as_os_str().is_empty() {
            return Err(HandlerError::NoDirectory(name.to_string()));
        }
        handlers::write_kill_switch(&unit.directory, &self.config.daemon.name, reason)
    }

    /// Remove the kill switch for a unit. Also used by the `resume` operator command.
    pub fn resume_unit(&self, name: &str) -> Result<Value, HandlerError> {
        let unit = self.lookup(name)?;
        if unit.directory.as_os_str().is_empty() {
            return Err(HandlerError::NoDirectory(name.to_string()));
        }
        handlers::remove_kill_switch(&unit.directory)
    }

    async fn change_parameters(&self, kind: ActionKind, action: &Action) -> Result<Value, HandlerError> {
        let (name, unit) = self.unit_of(action)?;
        let (changes, message) = parameter_changes(kind, action)?;

        let files = self.parameters.apply(name, &unit.directory, &changes)?;

        let reason = action.param_str("reason").unwrap_or(&action.reason);
        if let Err(e) = self.tracker.record(name, &files, &message, reason).await {
            warn!(unit = %name, error = %e, "Change tracking failed; change itself stands");
        }

        let mut result = serde_json::Map::new();
        result.insert("changed".to_string(), Value::Bool(true));
        for change in changes {
            result.insert(change.key.to_string(), change.value);
        }
        Ok(Value::Object(result))
    }

    fn lookup(&self, name: &str) -> Result<&UnitConfig, HandlerError> {
        self.config
            .unit(name)
            .ok_or_else(|| HandlerError::UnknownUnit(name.to_string()))
    }

    fn unit_of<'a>(&'a self, action: &'a Action) -> Result<(&'a str, &'a UnitConfig), HandlerError> {
        let name = action.unit.as_deref().ok_or(HandlerError::NoUnit)?;
        Ok((name, self.lookup(name)?))
    }

    /// Restart bookkeeping, for status reporting
    pub fn restarts(&self) -> &RestartController {
        &self.restarts
    }
}

/// Map a tuning action onto override keys and a commit message
fn parameter_changes(kind: ActionKind, action: &Action) -> Result<(Vec<ParameterChange>, String), HandlerError> {
    let value = || action.params.get("value").filter(|v| !v.is_null()).cloned();
    match kind {
        ActionKind::ChangeMovementFilter => {
            let v = value().ok_or(HandlerError::NoValue)?;
            let msg = format!("movement filter {v}%");
            Ok((vec![ParameterChange::new("min_price_movement", v)], msg))
        }
        ActionKind::ChangeStakeSize => {
            let v = value().ok_or(HandlerError::NoValue)?;
            let msg = format!("stake size -> ${v}");
            Ok((vec![ParameterChange::new("stake_size", v)], msg))
        }
        ActionKind::ChangeEntryTiming => {
            let v = value().ok_or(HandlerError::NoValue)?;
            let msg = format!("entry timing -> {v}s before close");
            Ok((vec![ParameterChange::new("entry_seconds_before_close", v)], msg))
        }
        ActionKind::ToggleRsiFilter => {
            let enable = action.params.get("enable").and_then(Value::as_bool).unwrap_or(false);
            let msg = format!("RSI filter {}", if enable { "enabled" } else { "disabled" });
            Ok((vec![ParameterChange::new("rsi_filter_enabled", Value::Bool(enable))], msg))
        }
        ActionKind::ChangeConvictionRange => {
            let min = action.params.get("min").filter(|v| !v.is_null()).cloned();
            let max = action.params.get("max").filter(|v| !v.is_null()).cloned();
            if min.is_none() && max.is_none() {
                return Err(HandlerError::NoValue);
            }
            let show = |v: &Option<Value>| v.as_ref().map_or_else(|| "?".to_string(), ToString::to_string);
            let msg = format!("conviction range -> {}-{}", show(&min), show(&max));
            let mut changes = Vec::new();
            if let Some(v) = min {
                changes.push(ParameterChange::new("min_poly_conviction", v));
            }
            if let Some(v) = max {
                changes.push(ParameterChange::new("max_poly_conviction", v));
            }
            Ok((changes, msg))
        }
        _ => Err(HandlerError::Parameter(format!("{kind} is not a tuning action"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchdogConfig;
    use crate::health::{ProbeError, ProcessProbe};
    use crate::types::{ActionStatus, Tier};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::Path;
    use std::sync::Mutex;

    struct AlwaysUp;

    #[async_trait]
    impl ProcessProbe for AlwaysUp {
        async fn is_alive(&self, _s: &str) -> Result<bool, ProbeError> {
            Ok(true)
        }
        async fn terminate(&self, _s: &str) -> Result<(), ProbeError> {
            Ok(())
        }
        async fn launch(&self, _s: &str, _d: &Path, _c: &str) -> Result<(), ProbeError> {
            Ok(())
        }
    }

    /// Records calls; optionally fails every one
    #[derive(Default)]
    struct RecordingTracker {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ChangeTracker for RecordingTracker {
        async fn record(&self, _u: &str, _f: &[PathBuf], message: &str, _r: &str) -> Result<bool, TrackerError> {
            self.calls.lock().unwrap().push(message.to_string());
            if self.fail {
                Err(TrackerError::Timeout("commit".to_string()))
            } else {
                Ok(true)
            }
        }
    }

    fn executor(dir: &Path, tracker: Arc<RecordingTracker>) -> Executor {
        let mut config = SupervisorConfig::default();
        config.units.insert(
            "alpha".to_string(),
            UnitConfig {
                directory: dir.to_path_buf(),
                launch_command: "./run.sh".to_string(),
                redeem_command: Some("echo redeemed".to_string()),
                ..UnitConfig::default()
            },
        );
        let watchdog = WatchdogConfig {
            restart_settle_secs: 0,
            launch_settle_secs: 0,
            ..WatchdogConfig::default()
        };
        Executor::new(
            Arc::new(config),
            RestartController::new(Arc::new(AlwaysUp), &watchdog),
            Arc::new(OverrideFileChanger),
            tracker,
        )
    }

    fn action(action_type: &str, unit: Option<&str>, params: Value) -> Action {
        Action {
            id: "action_1".to_string(),
            action_type: action_type.to_string(),
            description: "d".to_string(),
            reason: "r".to_string(),
            unit: unit.map(String::from),
            params: params.as_object().cloned().unwrap_or_default(),
            tier: Tier::Auto,
            status: ActionStatus::AutoApproved,
            submitted_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
        }
    }

    #[tokio::test]
    async fn test_unknown_type_has_no_handler() {
        let dir = tempfile::tempdir().unwrap();
        let mut ex = executor(dir.path(), Arc::default());
        let out = ex.execute(&action("launch_rockets", Some("alpha"), json!({}))).await;
        assert_eq!(out, ExecutionOutcome::failed(NO_HANDLER));
    }

    #[tokio::test]
    async fn test_restart_succeeds_when_unit_comes_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut ex = executor(dir.path(), Arc::default());
        let out = ex.execute(&action("restart_crashed_bot", Some("alpha"), json!({}))).await;
        assert!(out.is_success(), "{out:?}");
        assert_eq!(ex.restarts().recent_attempts("alpha"), 1);
    }

    #[tokio::test]
    async fn test_missing_value_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut ex = executor(dir.path(), Arc::default());
        let out = ex.execute(&action("change_stake_size", Some("alpha"), json!({}))).await;
        assert_eq!(out, ExecutionOutcome::failed("no_value_provided"));
    }

    #[tokio::test]
    async fn test_unknown_unit_fails_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let mut ex = executor(dir.path(), Arc::default());
        let out = ex.execute(&action("pause_on_loss_streak", Some("ghost"), json!({}))).await;
        assert!(!out.is_success());
        let out = ex.execute(&action("pause_on_loss_streak", None, json!({}))).await;
        assert_eq!(out, ExecutionOutcome::failed("no_unit_specified"));
    }

    #[tokio::test]
    async fn test_tracker_failure_does_not_fail_the_change() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(RecordingTracker {
            fail: true,
            ..RecordingTracker::default()
        });
        let mut ex = executor(dir.path(), tracker.clone());
        let out = ex
            .execute(&action("change_stake_size", Some("alpha"), json!({"value": 2.5})))
            .await;
        assert!(out.is_success());
        assert_eq!(tracker.calls.lock().unwrap().as_slice(), ["stake size -> $2.5"]);
    }

    #[tokio::test]
    async fn test_pause_and_resume_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut ex = executor(dir.path(), Arc::default());
        let pause = action("pause_on_loss_streak", Some("alpha"), json!({"reason": "5_consecutive_losses"}));
        assert!(ex.execute(&pause).await.is_success());
        assert!(ex.execute(&pause).await.is_success());

        let resume = action("resume_after_cooldown", Some("alpha"), json!({}));
        assert!(ex.execute(&resume).await.is_success());
        match ex.execute(&resume).await {
            ExecutionOutcome::Succeeded { result } => assert_eq!(result["note"], "kill_switch_not_found"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_conviction_range_partial() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(RecordingTracker::default());
        let mut ex = executor(dir.path(), tracker.clone());
        let out = ex
            .execute(&action("change_conviction_range", Some("alpha"), json!({"min": 0.6})))
            .await;
        assert!(out.is_success());
        assert_eq!(tracker.calls.lock().unwrap()[0], "conviction range -> 0.6-?");
    }

    #[tokio::test]
    async fn test_log_observation_records_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut ex = executor(dir.path(), Arc::default());
        let out = ex
            .execute(&action("log_observation", None, json!({"message": "win rate dipped"})))
            .await;
        assert_eq!(
            out,
            ExecutionOutcome::succeeded(json!({"logged": true, "observation": "win rate dipped"}))
        );
    }
}
