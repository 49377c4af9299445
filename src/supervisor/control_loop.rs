//! ControlLoop: the single task that owns and mutates supervisor state.
//!
//! One cycle:
//! 1. health check (when due): DEAD units get a restart proposal, STALE units a rate-limited alert
//! 2. loss-streak and settlement checks (when due)
//! 3. queued commands from the HTTP surface and operators
//! 4. every approved, not yet executed action goes to the executor
//! 5. the shared snapshot is refreshed
//!
//! A panic inside a cycle is caught, logged, and followed by the error
//! backoff sleep. Only the cancellation token stops the loop.

use futures::FutureExt;
use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::alerts::AlertLimiter;
use super::commands::{command_channel, Advisor, Command, CommandSender, NullAdvisor, OperatorCommand};
use super::feed::EventFeed;
use super::schedule::{Check, CheckSchedule};
use super::snapshot::{SharedSnapshot, SupervisorSnapshot};
use crate::approval::{ActionStore, ApprovalEngine, PermissionPolicy, SledActionStore, StoreError};
use crate::config::defaults::{
    COMMAND_CHANNEL_CAPACITY, DEFAULT_HISTORY_LIMIT, EVENT_FEED_CAPACITY, KILL_SWITCH_FILE,
    LOSS_STREAK_WINDOW, SETTLEMENT_LOOKBACK_MINUTES,
};
use crate::config::SupervisorConfig;
use crate::executor::{
    ChangeTracker, Executor, GitChangeTracker, NoopChangeTracker, OverrideFileChanger, ParameterChanger,
};
use crate::health::{ActivitySource, HealthMonitor, Probes, RestartController};
use crate::types::{Action, ActionKind, ExecutionOutcome, ExecutionRecord, HealthClass, HealthRecord, Submission};

const OPERATOR_SOURCE: &str = "operator";

// ============================================================================
// Collaborators
// ============================================================================

/// Everything the loop talks to outside its own state
pub struct Collaborators {
    pub probes: Probes,
    pub store: Arc<dyn ActionStore>,
    pub parameters: Arc<dyn ParameterChanger>,
    pub tracker: Arc<dyn ChangeTracker>,
    pub advisor: Arc<dyn Advisor>,
}

impl Collaborators {
    /// Production wiring: system probes, sled store under the data directory,
    /// override-file parameter changes and git change tracking when enabled.
    pub fn system(config: &SupervisorConfig) -> Result<Self, StoreError> {
        let store = SledActionStore::open(config.daemon.data_dir.join("actions"))?;
        let tracker: Arc<dyn ChangeTracker> = if config.change_tracking.enabled {
            Arc::new(GitChangeTracker::new(config.change_tracking.clone()))
        } else {
            Arc::new(NoopChangeTracker)
        };
        Ok(Self {
            probes: Probes::system(Duration::from_secs(config.watchdog.service_probe_timeout_secs)),
            store: Arc::new(store),
            parameters: Arc::new(OverrideFileChanger),
            tracker,
            advisor: Arc::new(NullAdvisor),
        })
    }
}

// ============================================================================
// Loop
// ============================================================================

enum Wake {
    Timer,
    Command(Command),
    ChannelClosed,
    Shutdown,
}

pub struct ControlLoop {
    config: Arc<SupervisorConfig>,
    monitor: HealthMonitor,
    activity: Arc<dyn ActivitySource>,
    engine: ApprovalEngine,
    executor: Executor,
    advisor: Arc<dyn Advisor>,
    schedule: CheckSchedule,
    alerts: AlertLimiter,
    feed: EventFeed,
    health: BTreeMap<String, HealthRecord>,
    commands: mpsc::Receiver<Command>,
    commands_open: bool,
    inbox: VecDeque<Command>,
    snapshot: SharedSnapshot,
    cycles: u64,
}

impl ControlLoop {
    /// Build the loop plus the handles the outside world uses to reach it.
    pub fn new(config: Arc<SupervisorConfig>, collaborators: Collaborators) -> (Self, CommandSender, SharedSnapshot) {
        let Collaborators {
            probes,
            store,
            parameters,
            tracker,
            advisor,
        } = collaborators;
        let watchdog = &config.watchdog;

        let restarts = RestartController::new(probes.process.clone(), watchdog);
        let activity = probes.activity.clone();
        let monitor = HealthMonitor::new(probes, Duration::from_secs(watchdog.stale_threshold_secs));
        let engine = ApprovalEngine::new(
            PermissionPolicy::from_config(&config.permissions),
            config.daemon.name.clone(),
            store,
        );
        let executor = Executor::new(config.clone(), restarts, parameters, tracker);

        let schedule = CheckSchedule::new()
            .with(Check::Health, watchdog.heartbeat_interval())
            .with(Check::LossStreak, watchdog.settlement_check_interval())
            .with(Check::Settlement, watchdog.settlement_check_interval());

        let (sender, commands) = command_channel(COMMAND_CHANNEL_CAPACITY);
        let snapshot = Arc::new(RwLock::new(SupervisorSnapshot::empty(config.daemon.name.clone())));

        let control_loop = Self {
            alerts: AlertLimiter::new(watchdog.stale_alert_interval()),
            config,
            monitor,
            activity,
            engine,
            executor,
            advisor,
            schedule,
            feed: EventFeed::new(EVENT_FEED_CAPACITY),
            health: BTreeMap::new(),
            commands,
            commands_open: true,
            inbox: VecDeque::new(),
            snapshot: snapshot.clone(),
            cycles: 0,
        };
        (control_loop, sender, snapshot)
    }

    /// Run until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let loop_sleep = Duration::from_secs(self.config.watchdog.loop_sleep_secs);
        let backoff = Duration::from_secs(self.config.watchdog.error_backoff_secs);
        info!(
            "[ControlLoop] Task starting with {} units, heartbeat {:?}",
            self.config.units.len(),
            self.config.watchdog.heartbeat_interval()
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let result = AssertUnwindSafe(self.run_cycle()).catch_unwind().await;
            let pause = match result {
                Ok(()) => loop_sleep,
                Err(panic) => {
                    error!(
                        cycle = self.cycles,
                        panic = %panic_message(panic.as_ref()),
                        "[ControlLoop] Cycle failed, backing off {:?}",
                        backoff
                    );
                    self.feed.error(self.config.daemon.name.clone(), "Control loop error, backing off");
                    backoff
                }
            };

            match self.wait(pause, &cancel).await {
                Wake::Shutdown => break,
                Wake::Timer => {}
                Wake::Command(command) => self.inbox.push_back(command),
                Wake::ChannelClosed => {
                    debug!("[ControlLoop] Command channel closed");
                    self.commands_open = false;
                }
            }
        }

        info!("[ControlLoop] Received shutdown signal after {} cycles", self.cycles);
    }

    /// Sleep, returning early for shutdown or an incoming command
    async fn wait(&mut self, pause: Duration, cancel: &CancellationToken) -> Wake {
        let commands_open = self.commands_open;
        tokio::select! {
            _ = cancel.cancelled() => Wake::Shutdown,
            _ = tokio::time::sleep(pause) => Wake::Timer,
            command = self.commands.recv(), if commands_open => match command {
                Some(command) => Wake::Command(command),
                None => Wake::ChannelClosed,
            },
        }
    }

    /// One pass over checks, commands and ready actions.
    pub async fn run_cycle(&mut self) {
        let now = Instant::now();
        self.cycles += 1;

        if self.schedule.is_due(Check::Health, now) {
            self.check_health(now).await;
            self.schedule.mark_ran(Check::Health, now);
        }
        if self.schedule.is_due(Check::LossStreak, now) {
            self.check_loss_streaks();
            self.schedule.mark_ran(Check::LossStreak, now);
        }
        if self.schedule.is_due(Check::Settlement, now) {
            self.check_settlements();
            self.schedule.mark_ran(Check::Settlement, now);
        }

        self.drain_commands().await;
        self.execute_ready().await;
        self.publish().await;
    }

    // ------------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------------

    async fn check_health(&mut self, now: Instant) {
        let report = self.monitor.report(&self.config.units).await;

        for (name, record) in &report {
            match record.class {
                HealthClass::Dead => {
                    if self.has_pending(name, ActionKind::RestartCrashedUnit) {
                        debug!(unit = %name, "Unit is DEAD, restart already awaiting approval");
                        continue;
                    }
                    warn!(unit = %name, "Unit is DEAD, proposing restart");
                    self.feed.warning(name.clone(), format!("{name} is down"));
                    let submission = Submission::new(
                        ActionKind::RestartCrashedUnit.as_str(),
                        format!("Restart {name}"),
                        "process not found",
                    )
                    .for_unit(name.clone());
                    self.engine.submit(submission);
                }
                HealthClass::Stale => {
                    if self.alerts.try_alert(name, now) {
                        let age = record
                            .freshness
                            .stale_seconds
                            .map_or_else(|| "unknown".to_string(), |s| format!("{s}s"));
                        warn!(unit = %name, age = %age, "Unit is STALE");
                        self.feed
                            .warning(name.clone(), format!("{name} is running but has no recent activity ({age})"));
                    }
                }
                HealthClass::Healthy | HealthClass::Disabled => {}
            }
        }

        self.health = report;
    }

    fn check_loss_streaks(&mut self) {
        let limit = self.config.safety.max_consecutive_losses;
        let mut proposals = Vec::new();

        for (name, unit) in self.config.enabled_units() {
            if unit.data_path.as_os_str().is_empty() {
                continue;
            }
            let streak = match self.activity.loss_streak(&unit.data_path, LOSS_STREAK_WINDOW) {
                Ok(streak) => streak,
                Err(e) => {
                    debug!(unit = %name, error = %e, "Loss streak unavailable");
                    continue;
                }
            };
            if streak < limit {
                continue;
            }
            if unit.directory.join(KILL_SWITCH_FILE).exists()
                || self.has_pending(name, ActionKind::PauseOnLossStreak)
            {
                debug!(unit = %name, streak, "Loss streak already handled");
                continue;
            }

            warn!(unit = %name, streak, limit, "Loss streak limit reached");
            proposals.push(
                Submission::new(
                    ActionKind::PauseOnLossStreak.as_str(),
                    format!("Pause {name} after {streak} consecutive losses"),
                    format!("loss streak {streak} >= {limit}"),
                )
                .for_unit(name.clone())
                .with_param("reason", format!("{streak}_consecutive_losses"))
                .with_param("streak", streak),
            );
        }

        for submission in proposals {
            let unit = submission.unit.clone().unwrap_or_default();
            let outcome = self.engine.submit(submission);
            self.feed.warning(
                unit,
                format!("{} ({})", outcome.action.description, outcome.status),
            );
        }
    }

    fn has_pending(&self, unit: &str, kind: ActionKind) -> bool {
        self.engine
            .pending_actions()
            .iter()
            .any(|a| a.unit.as_deref() == Some(unit) && a.kind() == Some(kind))
    }

    fn check_settlements(&mut self) {
        for (name, unit) in self.config.enabled_units() {
            if unit.data_path.as_os_str().is_empty() {
                continue;
            }
            match self
                .activity
                .recent_settlements(&unit.data_path, SETTLEMENT_LOOKBACK_MINUTES)
            {
                Ok(0) => {}
                Ok(count) => {
                    info!(unit = %name, count, "Recent settlements");
                    self.feed.info(
                        name.clone(),
                        format!("{name}: {count} settlements in the last {SETTLEMENT_LOOKBACK_MINUTES} min"),
                    );
                }
                Err(e) => debug!(unit = %name, error = %e, "Settlement count unavailable"),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn drain_commands(&mut self) {
        loop {
            let command = match self.inbox.pop_front() {
                Some(command) => command,
                None => match self.commands.try_recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };
            self.handle_command(command).await;
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { submission, reply } => {
                let outcome = self.engine.submit(submission);
                let _ = reply.send(outcome);
            }
            Command::Approve { id, reply } => {
                let resolved = self.approve(&id);
                let _ = reply.send(resolved);
            }
            Command::Reject { id, reply } => {
                let resolved = self.reject(&id);
                let _ = reply.send(resolved);
            }
            Command::Operator { text, reply } => {
                let answer = self.operator(&text).await;
                let _ = reply.send(answer);
            }
        }
    }

    fn approve(&mut self, id: &str) -> Option<Action> {
        let action = self.engine.approve(id)?;
        self.feed
            .info(OPERATOR_SOURCE, format!("Approved {}: {}", action.id, action.description));
        Some(action)
    }

    fn reject(&mut self, id: &str) -> Option<Action> {
        let action = self.engine.reject(id)?;
        self.feed
            .info(OPERATOR_SOURCE, format!("Rejected {}: {}", action.id, action.description));
        Some(action)
    }

    /// Operator text. Pause and resume run immediately without the approval queue.
    async fn operator(&mut self, text: &str) -> String {
        info!(command = %text, "Operator command");
        match OperatorCommand::parse(text) {
            OperatorCommand::Status => {
                let now = Instant::now();
                self.check_health(now).await;
                self.schedule.mark_ran(Check::Health, now);
                self.health_summary()
            }
            OperatorCommand::Pause(unit) => {
                let answer = match self.executor.pause_unit(&unit, "operator_request") {
                    Ok(_) => format!("Paused {unit}"),
                    Err(e) => format!("Pause failed for {unit}: {e}"),
                };
                self.feed.info(OPERATOR_SOURCE, answer.clone());
                answer
            }
            OperatorCommand::Resume(unit) => {
                let answer = match self.executor.resume_unit(&unit) {
                    Ok(_) => format!("Resumed {unit}"),
                    Err(e) => format!("Resume failed for {unit}: {e}"),
                };
                self.feed.info(OPERATOR_SOURCE, answer.clone());
                answer
            }
            OperatorCommand::Approve(id) => match self.approve(&id) {
                Some(action) => format!("Approved {}", action.id),
                None => format!("No pending action {id}"),
            },
            OperatorCommand::Reject(id) => match self.reject(&id) {
                Some(action) => format!("Rejected {}", action.id),
                None => format!("No pending action {id}"),
            },
            OperatorCommand::Usage(usage) => usage.to_string(),
            OperatorCommand::FreeText(text) => self.advisor.reply(&text).await,
        }
    }

    fn health_summary(&self) -> String {
        if self.health.is_empty() {
            return "No units configured".to_string();
        }
        self.health
            .iter()
            .map(|(name, record)| format!("{name}: {}", record.class))
            .collect::<Vec<_>>()
            .join(", ")
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    async fn execute_ready(&mut self) {
        for action in self.engine.ready_actions() {
            let outcome = if action.status.is_executable() {
                self.executor.execute(&action).await
            } else {
                error!(id = %action.id, status = %action.status, "Refusing to execute unapproved action");
                ExecutionOutcome::failed(format!("not_executable: {}", action.status))
            };

            let source = action.unit.clone().unwrap_or_else(|| self.config.daemon.name.clone());
            match &outcome {
                ExecutionOutcome::Succeeded { .. } => {
                    self.feed.info(source, format!("Done: {}", action.description));
                }
                ExecutionOutcome::Failed { error } => {
                    self.feed.error(source, format!("Failed: {} ({error})", action.description));
                }
            }

            let record = ExecutionRecord::new(&action, outcome);
            self.engine.mark_executed(&record);
        }
    }

    async fn publish(&self) {
        let restart_attempts = self
            .config
            .units
            .keys()
            .map(|name| (name.clone(), self.executor.restarts().recent_attempts(name)))
            .collect();

        let mut snapshot = self.snapshot.write().await;
        snapshot.cycles = self.cycles;
        snapshot.last_cycle_at = Some(chrono::Utc::now());
        snapshot.health.clone_from(&self.health);
        snapshot.pending = self.engine.pending_actions().to_vec();
        snapshot.history = self.engine.recent_history(usize::MAX).to_vec();
        snapshot.executions = self.engine.recent_executions(DEFAULT_HISTORY_LIMIT);
        snapshot.events = self.feed.entries();
        snapshot.restart_attempts = restart_attempts;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
