//! System-wide default constants.
//!
//! Centralises magic numbers that are not operator-tunable.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Configuration
// ============================================================================

/// Environment variable pointing at the config file.
pub const CONFIG_ENV_VAR: &str = "WARDEN_CONFIG";

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "warden.toml";

// ============================================================================
// Approval Engine
// ============================================================================

/// Resolved actions kept in history; older entries are dropped on save.
pub const HISTORY_RETENTION: usize = 200;

/// Default page size for history queries from the reporting surface.
pub const DEFAULT_HISTORY_LIMIT: usize = 30;

// ============================================================================
// Control Loop
// ============================================================================

/// Entries kept in the operator-facing event feed.
pub const EVENT_FEED_CAPACITY: usize = 200;

/// Capacity of the command channel between the HTTP surface and the loop.
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Probes & Handlers
// ============================================================================

/// Timeout for listing terminal sessions (seconds).
pub const SESSION_LIST_TIMEOUT_SECS: u64 = 5;

/// Timeout for launching a new session (seconds).
pub const SESSION_LAUNCH_TIMEOUT_SECS: u64 = 10;

/// Settled trades inspected when counting a loss streak.
pub const LOSS_STREAK_WINDOW: usize = 10;

/// Look-back for the unredeemed-settlement count (minutes).
pub const SETTLEMENT_LOOKBACK_MINUTES: i64 = 60;

/// Timeout for a unit's redeem command (seconds).
pub const REDEEM_TIMEOUT_SECS: u64 = 60;

/// Captured redeem stdout is truncated to this many characters.
pub const REDEEM_STDOUT_LIMIT: usize = 500;

/// Marker file whose presence tells a worker to stop trading.
pub const KILL_SWITCH_FILE: &str = "KILL_SWITCH";

/// Parameter override file written into a unit's directory.
pub const OVERRIDES_FILE: &str = "warden_overrides.toml";
