//! Leaky-bucket restart policy per unit
//!
//! At most `max_attempts` restarts per unit inside any `cooldown` window.
//! Attempt history is pruned lazily on each call to `cooldown * max_attempts`.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::probes::ProcessProbe;
use crate::config::{UnitConfig, WatchdogConfig};

pub const REASON_AUTO_RESTART_DISABLED: &str = "auto_restart_disabled";
pub const REASON_MAX_ATTEMPTS_EXCEEDED: &str = "max_attempts_exceeded";
pub const REASON_RESTARTED: &str = "restarted";
pub const REASON_START_FAILED: &str = "start_failed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartOutcome {
    /// Whether the restart sequence ran at all
    pub attempted: bool,
    /// Liveness after the sequence
    pub success: bool,
    pub reason: String,
    /// Attempts in the current window, including this one
    pub attempts: usize,
}

impl RestartOutcome {
    fn refused(reason: &str, attempts: usize) -> Self {
        Self {
            attempted: false,
            success: false,
            reason: reason.to_string(),
            attempts,
        }
    }
}

pub struct RestartController {
    process: Arc<dyn ProcessProbe>,
    max_attempts: usize,
    cooldown: Duration,
    restart_settle: Duration,
    launch_settle: Duration,
    /// Attempt times per unit, kept in memory only
    attempts: HashMap<String, Vec<Instant>>,
}

impl RestartController {
    pub fn new(process: Arc<dyn ProcessProbe>, watchdog: &WatchdogConfig) -> Self {
        Self {
            process,
            max_attempts: watchdog.max_restart_attempts as usize,
            cooldown: watchdog.restart_cooldown(),
            restart_settle: Duration::from_secs(watchdog.restart_settle_secs),
            launch_settle: Duration::from_secs(watchdog.launch_settle_secs),
            attempts: HashMap::new(),
        }
    }

    pub async fn try_restart(&mut self, name: &str, unit: &UnitConfig) -> RestartOutcome {
        self.try_restart_at(name, unit, Instant::now()).await
    }

    /// Same as `try_restart` with an explicit clock, for deterministic tests
    pub async fn try_restart_at(&mut self, name: &str, unit: &UnitConfig, now: Instant) -> RestartOutcome {
        if !unit.auto_restart {
            info!(unit = %name, "Unit is down but auto_restart is disabled (managed manually)");
            return RestartOutcome::refused(REASON_AUTO_RESTART_DISABLED, 0);
        }

        let recent = self.prune_and_count(name, now);
        if recent >= self.max_attempts {
            warn!(unit = %name, attempts = recent, "Max restart attempts reached");
            return RestartOutcome::refused(REASON_MAX_ATTEMPTS_EXCEEDED, recent);
        }

        let session = unit.session(name);
        let success = match self.run_sequence(session, unit).await {
            Ok(alive) => alive,
            Err(e) => {
                error!(unit = %name, error = %e, "Restart sequence failed");
                false
            }
        };

        self.attempts
            .entry(name.to_string())
            .or_default()
            .push(now);

        if success {
            info!(unit = %name, attempt = recent + 1, "Restarted unit");
        } else {
            error!(unit = %name, attempt = recent + 1, "Unit did not come back after restart");
        }

        RestartOutcome {
            attempted: true,
            success,
            reason: if success { REASON_RESTARTED } else { REASON_START_FAILED }.to_string(),
            attempts: recent + 1,
        }
    }

    /// Terminate, settle, launch, settle, re-probe
    async fn run_sequence(&self, session: &str, unit: &UnitConfig) -> Result<bool, super::ProbeError> {
        if let Err(e) = self.process.terminate(session).await {
            // Usually the session is already gone
            warn!(session = %session, error = %e, "Terminate failed, launching anyway");
        }
        tokio::time::sleep(self.restart_settle).await;
        self.process.launch(session, &unit.directory, &unit.launch_command).await?;
        tokio::time::sleep(self.launch_settle).await;
        self.process.is_alive(session).await
    }

    fn prune_and_count(&mut self, name: &str, now: Instant) -> usize {
        let Some(history) = self.attempts.get_mut(name) else {
            return 0;
        };
        let retention = self.cooldown.saturating_mul(u32::try_from(self.max_attempts).unwrap_or(u32::MAX));
        history.retain(|&at| now.saturating_duration_since(at) < retention);
        history
            .iter()
            .filter(|&&at| now.saturating_duration_since(at) < self.cooldown)
            .count()
    }

    /// Attempts inside the current cooldown window, for status reporting
    pub fn recent_attempts(&self, name: &str) -> usize {
        let now = Instant::now();
        self.attempts.get(name).map_or(0, |h| {
            h.iter()
                .filter(|&&at| now.saturating_duration_since(at) < self.cooldown)
                .count()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ProbeError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Launch succeeds; liveness after launch is configurable
    struct CountingProbe {
        launches: AtomicUsize,
        comes_back: bool,
    }

    #[async_trait]
    impl ProcessProbe for CountingProbe {
        async fn is_alive(&self, _session: &str) -> Result<bool, ProbeError> {
            Ok(self.comes_back)
        }
        async fn terminate(&self, _session: &str) -> Result<(), ProbeError> {
            Err(ProbeError::Timeout("screen quit"))
        }
        async fn launch(&self, _s: &str, _d: &Path, _c: &str) -> Result<(), ProbeError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn controller(comes_back: bool) -> (RestartController, Arc<CountingProbe>) {
        let probe = Arc::new(CountingProbe {
            launches: AtomicUsize::new(0),
            comes_back,
        });
        let watchdog = WatchdogConfig {
            max_restart_attempts: 3,
            restart_cooldown_secs: 60,
            restart_settle_secs: 0,
            launch_settle_secs: 0,
            ..WatchdogConfig::default()
        };
        (RestartController::new(probe.clone(), &watchdog), probe)
    }

    fn unit() -> UnitConfig {
        UnitConfig {
            launch_command: "./run.sh".to_string(),
            ..UnitConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fourth_attempt_in_window_is_refused() {
        let (mut c, probe) = controller(false);
        let t0 = Instant::now();
        for i in 0..3u64 {
            let out = c.try_restart_at("alpha", &unit(), t0 + Duration::from_secs(i)).await;
            assert!(out.attempted);
            assert!(!out.success);
            assert_eq!(out.reason, REASON_START_FAILED);
        }
        let out = c.try_restart_at("alpha", &unit(), t0 + Duration::from_secs(10)).await;
        assert!(!out.attempted);
        assert_eq!(out.reason, REASON_MAX_ATTEMPTS_EXCEEDED);
        assert_eq!(probe.launches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_window_slides_after_cooldown() {
        let (mut c, _) = controller(true);
        let t0 = Instant::now();
        for i in 0..3u64 {
            c.try_restart_at("alpha", &unit(), t0 + Duration::from_secs(i)).await;
        }
        let out = c.try_restart_at("alpha", &unit(), t0 + Duration::from_secs(61)).await;
        assert!(out.attempted);
        assert!(out.success);
        assert_eq!(out.reason, REASON_RESTARTED);
    }

    #[tokio::test]
    async fn test_units_have_independent_buckets() {
        let (mut c, _) = controller(true);
        let t0 = Instant::now();
        for _ in 0..3 {
            c.try_restart_at("alpha", &unit(), t0).await;
        }
        let out = c.try_restart_at("beta", &unit(), t0).await;
        assert!(out.attempted);
    }

    #[tokio::test]
    async fn test_manual_unit_never_restarted() {
        let (mut c, probe) = controller(true);
        let manual = UnitConfig {
            auto_restart: false,
            ..unit()
        };
        let out = c.try_restart("alpha", &manual).await;
        assert!(!out.attempted);
        assert_eq!(out.reason, REASON_AUTO_RESTART_DISABLED);
        assert_eq!(probe.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_history_is_pruned() {
        let (mut c, _) = controller(true);
        let t0 = Instant::now();
        c.try_restart_at("alpha", &unit(), t0).await;
        c.try_restart_at("alpha", &unit(), t0 + Duration::from_secs(500)).await;
        assert_eq!(c.attempts["alpha"].len(), 1);
        assert!(!c.attempts.contains_key("beta"));
    }
}
