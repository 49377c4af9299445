//! Supervisor Configuration - fleet, policy and timing as operator-tunable TOML
//!
//! Every struct implements `Default` so an empty file (or no file at all)
//! yields a runnable daemon that supervises nothing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults::{CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE};
use crate::types::Tier;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one supervisor process.
///
/// Load with `SupervisorConfig::load()` which searches:
/// 1. An explicit path (CLI `--config`)
/// 2. `$WARDEN_CONFIG`
/// 3. `./warden.toml`
/// 4. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Daemon identity and storage location
    #[serde(default)]
    pub daemon: DaemonInfo,

    /// HTTP reporting surface
    #[serde(default)]
    pub server: ServerConfig,

    /// Health check cadence and restart policy
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Safety rails that propose interventions
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Tiered permission policy
    #[serde(default)]
    pub permissions: PermissionsConfig,

    /// Version-control mirroring of changed unit files
    #[serde(default)]
    pub change_tracking: ChangeTrackingConfig,

    /// Managed units, keyed by unique name
    #[serde(default)]
    pub units: BTreeMap<String, UnitConfig>,
}

impl SupervisorConfig {
    /// Load configuration using the standard search order.
    ///
    /// A file that exists but fails to parse or validate is an error: the
    /// supervisor must never run with a policy it could not read.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            info!(path = %path.display(), units = config.units.len(), "Loaded supervisor config");
            return Ok(config);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                let config = Self::load_from_file(&p)?;
                info!(path = %p.display(), units = config.units.len(), "Loaded supervisor config from {}", CONFIG_ENV_VAR);
                return Ok(config);
            }
            warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
        }

        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!(units = config.units.len(), "Loaded supervisor config from ./{}", DEFAULT_CONFIG_FILE);
            return Ok(config);
        }

        info!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
        Ok(Self::default())
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::ParseStr(source) => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate a TOML string. Unknown keys only warn.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents).map_err(ConfigError::ParseStr)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate the configuration for internal consistency.
    ///
    /// Rules:
    /// - An action type may appear in at most one permission set
    /// - Intervals and restart limits must be > 0
    /// - Restartable units need a launch command
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.daemon.name.trim().is_empty() {
            errors.push("daemon.name must not be empty".to_string());
        }
        if self.daemon.name == crate::types::RESOLVER_SYSTEM
            || self.daemon.name == crate::types::RESOLVER_OPERATOR
        {
            errors.push(format!(
                "daemon.name '{}' collides with a reserved resolver identity",
                self.daemon.name
            ));
        }

        errors.extend(self.permissions.overlaps());

        let w = &self.watchdog;
        for (name, value) in [
            ("watchdog.heartbeat_interval_secs", w.heartbeat_interval_secs),
            ("watchdog.settlement_check_interval_secs", w.settlement_check_interval_secs),
            ("watchdog.stale_threshold_secs", w.stale_threshold_secs),
            ("watchdog.restart_cooldown_secs", w.restart_cooldown_secs),
            ("watchdog.loop_sleep_secs", w.loop_sleep_secs),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be > 0"));
            }
        }
        if w.max_restart_attempts == 0 {
            errors.push("watchdog.max_restart_attempts must be > 0".to_string());
        }
        if self.safety.max_consecutive_losses == 0 {
            errors.push("safety.max_consecutive_losses must be > 0".to_string());
        }

        for (name, unit) in &self.units {
            if name.trim().is_empty() || name.contains(char::is_whitespace) {
                errors.push(format!("units.{name:?}: unit names must be non-empty and contain no whitespace"));
            }
            if unit.enabled && unit.auto_restart && unit.launch_command.trim().is_empty() {
                errors.push(format!(
                    "units.{name}.launch_command is required when auto_restart = true"
                ));
            }
        }

        if self.change_tracking.enabled && self.change_tracking.repo_path.as_os_str().is_empty() {
            errors.push("change_tracking.repo_path is required when change tracking is enabled".to_string());
        }

        let (range_errors, range_warnings) = super::validation::validate_ranges(self);
        errors.extend(range_errors);
        for w in &range_warnings {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Look up a unit by name
    pub fn unit(&self, name: &str) -> Option<&UnitConfig> {
        self.units.get(name)
    }

    /// Names of units that are switched on
    pub fn enabled_units(&self) -> impl Iterator<Item = (&String, &UnitConfig)> {
        self.units.iter().filter(|(_, u)| u.enabled)
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Config parse error ({}): {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Config parse error: {0}")]
    ParseStr(toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Daemon Info
// ============================================================================

/// Daemon identity and storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonInfo {
    /// Identity recorded as the resolver of auto-approved actions
    #[serde(default = "default_daemon_name")]
    pub name: String,

    /// Directory for the action store and the process lock
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_daemon_name() -> String {
    "warden".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for DaemonInfo {
    fn default() -> Self {
        Self {
            name: default_daemon_name(),
            data_dir: default_data_dir(),
        }
    }
}

// ============================================================================
// Server Config
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server bind address.
    ///
    /// Can be overridden by the `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    "127.0.0.1:6000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

// ============================================================================
// Watchdog Config
// ============================================================================

/// Health check cadence and the leaky-bucket restart policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// How often the health check runs.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// How often the loss-streak and settlement checks run.
    #[serde(default = "default_settlement_interval")]
    pub settlement_check_interval_secs: u64,

    /// A unit with no recorded activity for this long is STALE.
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_secs: u64,

    /// Restarts allowed per unit within `restart_cooldown_secs`.
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    /// Rolling window over which restart attempts are counted.
    #[serde(default = "default_restart_cooldown")]
    pub restart_cooldown_secs: u64,

    /// Minimum spacing between repeated stale alerts for one unit.
    #[serde(default = "default_stale_alert_interval")]
    pub stale_alert_interval_secs: u64,

    /// Sleep between control loop cycles.
    #[serde(default = "default_loop_sleep")]
    pub loop_sleep_secs: u64,

    /// Sleep after a failed cycle before retrying.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    /// Delay between terminating a session and relaunching it.
    #[serde(default = "default_restart_settle")]
    pub restart_settle_secs: u64,

    /// Delay between relaunching and re-probing liveness.
    #[serde(default = "default_launch_settle")]
    pub launch_settle_secs: u64,

    /// Timeout for the HTTP service probe.
    #[serde(default = "default_service_probe_timeout")]
    pub service_probe_timeout_secs: u64,
}

fn default_heartbeat_interval() -> u64 { 60 }
fn default_settlement_interval() -> u64 { 300 }
fn default_stale_threshold() -> u64 { 1800 }
fn default_max_restart_attempts() -> u32 { 3 }
fn default_restart_cooldown() -> u64 { 300 }
fn default_stale_alert_interval() -> u64 { 300 }
fn default_loop_sleep() -> u64 { 5 }
fn default_error_backoff() -> u64 { 10 }
fn default_restart_settle() -> u64 { 1 }
fn default_launch_settle() -> u64 { 3 }
fn default_service_probe_timeout() -> u64 { 3 }

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            settlement_check_interval_secs: default_settlement_interval(),
            stale_threshold_secs: default_stale_threshold(),
            max_restart_attempts: default_max_restart_attempts(),
            restart_cooldown_secs: default_restart_cooldown(),
            stale_alert_interval_secs: default_stale_alert_interval(),
            loop_sleep_secs: default_loop_sleep(),
            error_backoff_secs: default_error_backoff(),
            restart_settle_secs: default_restart_settle(),
            launch_settle_secs: default_launch_settle(),
            service_probe_timeout_secs: default_service_probe_timeout(),
        }
    }
}

impl WatchdogConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn settlement_check_interval(&self) -> Duration {
        Duration::from_secs(self.settlement_check_interval_secs)
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_secs(self.restart_cooldown_secs)
    }

    pub fn stale_alert_interval(&self) -> Duration {
        Duration::from_secs(self.stale_alert_interval_secs)
    }
}

// ============================================================================
// Safety Config
// ============================================================================

/// Safety rails evaluated on the settlement check cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Consecutive losing trades that trigger a pause proposal.
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
}

fn default_max_consecutive_losses() -> u32 { 5 }

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_consecutive_losses: default_max_consecutive_losses(),
        }
    }
}

// ============================================================================
// Permissions
// ============================================================================

/// Three disjoint sets of action-type tags.
///
/// Types absent from all three sets require approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default = "default_auto_approve")]
    pub auto_approve: Vec<String>,

    #[serde(default = "default_require_approval")]
    pub require_approval: Vec<String>,

    #[serde(default = "default_never_touch")]
    pub never_touch: Vec<String>,
}

fn default_auto_approve() -> Vec<String> {
    ["restart_crashed_bot", "redeem_settlements", "pause_on_loss_streak", "log_observation"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_require_approval() -> Vec<String> {
    [
        "resume_after_cooldown",
        "change_movement_filter",
        "change_stake_size",
        "change_entry_timing",
        "enable_disable_rsi",
        "change_conviction_range",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_never_touch() -> Vec<String> {
    ["modify_api_keys", "withdraw_funds", "delete_database", "change_wallet"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            auto_approve: default_auto_approve(),
            require_approval: default_require_approval(),
            never_touch: default_never_touch(),
        }
    }
}

impl PermissionsConfig {
    /// One error per action type listed in more than one set.
    pub fn overlaps(&self) -> Vec<String> {
        let mut seen: HashMap<&str, Vec<Tier>> = HashMap::new();
        for (tier, set) in [
            (Tier::Auto, &self.auto_approve),
            (Tier::Approval, &self.require_approval),
            (Tier::Forbidden, &self.never_touch),
        ] {
            for tag in set {
                let tiers = seen.entry(tag.as_str()).or_default();
                if !tiers.contains(&tier) {
                    tiers.push(tier);
                }
            }
        }

        let mut errors: Vec<String> = seen
            .into_iter()
            .filter(|(_, tiers)| tiers.len() > 1)
            .map(|(tag, tiers)| {
                let names: Vec<String> = tiers.iter().map(ToString::to_string).collect();
                format!(
                    "permissions: action type '{tag}' appears in more than one tier ({})",
                    names.join(", ")
                )
            })
            .collect();
        errors.sort();
        errors
    }
}

// ============================================================================
// Change Tracking
// ============================================================================

/// Git mirroring of unit files changed by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeTrackingConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Working tree that receives copies of changed files
    #[serde(default)]
    pub repo_path: PathBuf,

    #[serde(default = "default_commit_prefix")]
    pub commit_prefix: String,

    #[serde(default)]
    pub auto_push: bool,

    #[serde(default = "default_remote")]
    pub remote: String,

    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_commit_prefix() -> String {
    "warden:".to_string()
}
fn default_remote() -> String {
    "origin".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}

impl Default for ChangeTrackingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repo_path: PathBuf::new(),
            commit_prefix: default_commit_prefix(),
            auto_push: false,
            remote: default_remote(),
            branch: default_branch(),
        }
    }
}

// ============================================================================
// Units
// ============================================================================

/// One managed worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `false` marks the unit as managed manually: never restarted by the daemon
    #[serde(default = "default_true")]
    pub auto_restart: bool,

    /// Working directory of the worker (kill switch and overrides land here)
    #[serde(default)]
    pub directory: PathBuf,

    /// Shell command that starts the worker inside its session
    #[serde(default)]
    pub launch_command: String,

    /// Terminal session name used for liveness; defaults to the unit name
    #[serde(default)]
    pub session_name: Option<String>,

    /// SQLite store the worker writes its trades to
    #[serde(default)]
    pub data_path: PathBuf,

    /// Optional HTTP endpoint probed for reachability
    #[serde(default)]
    pub service_url: Option<String>,

    /// Command run by the `redeem_settlements` handler
    #[serde(default)]
    pub redeem_command: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_restart: true,
            directory: PathBuf::new(),
            launch_command: String::new(),
            session_name: None,
            data_path: PathBuf::new(),
            service_url: None,
            redeem_command: None,
        }
    }
}

impl UnitConfig {
    /// Session name for liveness probes
    pub fn session<'a>(&'a self, unit_name: &'a str) -> &'a str {
        self.session_name.as_deref().unwrap_or(unit_name)
    }
}

// ============================================================================
// Tests
// ============================================================================
