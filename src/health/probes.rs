//! Probe traits and their production implementations
//!
//! - `ProcessProbe`: terminal-session liveness plus terminate/launch (`screen`)
//! - `ActivitySource`: the unit's trade store (`rusqlite`)
//! - `ServiceProbe`: optional HTTP reachability (`reqwest`)
//!
//! Probes report errors through `ProbeError`; the health monitor downgrades
//! every error to a classification and never lets one escape.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::config::defaults::{SESSION_LAUNCH_TIMEOUT_SECS, SESSION_LIST_TIMEOUT_SECS};
use crate::types::ServiceState;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("{command} failed: {source}")]
    Spawn {
        command: &'static str,
        source: std::io::Error,
    },
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("no data store configured")]
    NoDataPath,
}

// ============================================================================
// Traits
// ============================================================================

/// OS-level session lookup and control
#[async_trait]
pub trait ProcessProbe: Send + Sync {
    async fn is_alive(&self, session: &str) -> Result<bool, ProbeError>;

    /// Best-effort stop of the session; a missing session is not an error
    async fn terminate(&self, session: &str) -> Result<(), ProbeError>;

    /// Start `command` in a detached session rooted at `directory`
    async fn launch(&self, session: &str, directory: &Path, command: &str) -> Result<(), ProbeError>;
}

/// Read-only queries against a unit's trade store.
///
/// Calls are synchronous and short; the control loop runs them inline.
pub trait ActivitySource: Send + Sync {
    /// Raw value of the most recent activity timestamp, if any row exists
    fn last_activity(&self, data_path: &Path) -> Result<Option<String>, ProbeError>;

    /// Consecutive losing settled trades, newest first, over the last `window`
    fn loss_streak(&self, data_path: &Path, window: usize) -> Result<u32, ProbeError>;

    /// Settled trades with an order id within the last `lookback_minutes`
    fn recent_settlements(&self, data_path: &Path, lookback_minutes: i64) -> Result<u64, ProbeError>;
}

/// HTTP reachability check. Failures are states, not errors.
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    async fn check(&self, url: &str) -> ServiceState;
}

/// The probe set shared by the health monitor, restart controller and loop
#[derive(Clone)]
pub struct Probes {
    pub process: Arc<dyn ProcessProbe>,
    pub activity: Arc<dyn ActivitySource>,
    pub service: Arc<dyn ServiceProbe>,
}

impl Probes {
    /// Production probes: `screen`, SQLite and HTTP with the given timeout
    pub fn system(service_timeout: Duration) -> Self {
        Self {
            process: Arc::new(ScreenSessionProbe),
            activity: Arc::new(SqliteActivitySource),
            service: Arc::new(HttpServiceProbe::new(service_timeout)),
        }
    }
}

// ============================================================================
// Screen sessions
// ============================================================================

/// Sessions managed through GNU `screen`
#[derive(Debug, Clone, Copy, Default)]
pub struct ScreenSessionProbe;

impl ScreenSessionProbe {
    async fn run(
        command: &'static str,
        cmd: &mut Command,
        timeout_secs: u64,
    ) -> Result<std::process::Output, ProbeError> {
        let fut = cmd.kill_on_drop(true).output();
        match tokio::time::timeout(Duration::from_secs(timeout_secs), fut).await {
            Ok(result) => result.map_err(|source| ProbeError::Spawn { command, source }),
            Err(_) => Err(ProbeError::Timeout(command)),
        }
    }
}

/// Whether `screen -ls` output lists a session with exactly this name.
///
/// Lines look like `\t12345.name\t(Detached)`.
pub fn screen_lists_session(listing: &str, session: &str) -> bool {
    listing.lines().any(|line| {
        line.split_whitespace()
            .next()
            .and_then(|token| token.split_once('.'))
            .is_some_and(|(pid, name)| pid.chars().all(|c| c.is_ascii_digit()) && name == session)
    })
}

#[async_trait]
impl ProcessProbe for ScreenSessionProbe {
    async fn is_alive(&self, session: &str) -> Result<bool, ProbeError> {
        // screen -ls exits non-zero when no sessions exist; only stdout matters
        let mut cmd = Command::new("screen");
        cmd.arg("-ls");
        let output = Self::run("screen -ls", &mut cmd, SESSION_LIST_TIMEOUT_SECS).await?;
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(screen_lists_session(&listing, session))
    }

    async fn terminate(&self, session: &str) -> Result<(), ProbeError> {
        let mut cmd = Command::new("screen");
        cmd.args(["-S", session, "-X", "quit"]);
        Self::run("screen quit", &mut cmd, SESSION_LIST_TIMEOUT_SECS).await?;
        Ok(())
    }

    async fn launch(&self, session: &str, directory: &Path, command: &str) -> Result<(), ProbeError> {
        let mut cmd = Command::new("screen");
        cmd.args(["-dmS", session, "bash", "-c", command]);
        if !directory.as_os_str().is_empty() {
            cmd.current_dir(directory);
        }
        Self::run("screen launch", &mut cmd, SESSION_LAUNCH_TIMEOUT_SECS).await?;
        Ok(())
    }
}

// ============================================================================
// SQLite trade store
// ============================================================================

/// Reads the `trades` table a unit writes as it works
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteActivitySource;

impl SqliteActivitySource {
    fn open(data_path: &Path) -> Result<Connection, ProbeError> {
        if data_path.as_os_str().is_empty() {
            return Err(ProbeError::NoDataPath);
        }
        Ok(Connection::open_with_flags(
            data_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?)
    }
}

impl ActivitySource for SqliteActivitySource {
    fn last_activity(&self, data_path: &Path) -> Result<Option<String>, ProbeError> {
        let conn = Self::open(data_path)?;
        let value: rusqlite::types::Value =
            conn.query_row("SELECT MAX(timestamp) FROM trades", [], |row| row.get(0))?;
        Ok(match value {
            rusqlite::types::Value::Text(s) => Some(s),
            rusqlite::types::Value::Integer(i) => Some(i.to_string()),
            rusqlite::types::Value::Real(f) => Some(f.to_string()),
            _ => None,
        })
    }

    fn loss_streak(&self, data_path: &Path, window: usize) -> Result<u32, ProbeError> {
        let conn = Self::open(data_path)?;
        let mut stmt = conn.prepare("SELECT won FROM trades WHERE settled = 1 ORDER BY id DESC LIMIT ?1")?;
        let limit = i64::try_from(window).unwrap_or(i64::MAX);
        let outcomes = stmt
            .query_map([limit], |row| row.get::<_, Option<i64>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(count_loss_streak(&outcomes))
    }

    fn recent_settlements(&self, data_path: &Path, lookback_minutes: i64) -> Result<u64, ProbeError> {
        let conn = Self::open(data_path)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trades \
             WHERE settled = 1 AND order_id IS NOT NULL \
             AND settle_time > datetime('now', ?1)",
            [format!("-{lookback_minutes} minutes")],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// Leading run of losses (`won = 0`) in newest-first outcomes
pub fn count_loss_streak(outcomes: &[Option<i64>]) -> u32 {
    let streak = outcomes.iter().take_while(|won| **won == Some(0)).count();
    u32::try_from(streak).unwrap_or(u32::MAX)
}

// ============================================================================
// Activity timestamps
// ============================================================================

/// Parse a stored activity timestamp into UTC.
///
/// Accepts RFC 3339 with `Z` or an offset, the same with a space separator,
/// naive date-times (taken as UTC) and bare epoch seconds or milliseconds.
/// Anything else is `None`; this never fails.
pub fn parse_activity_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(epoch) = s.parse::<f64>() {
        if !epoch.is_finite() || epoch < 0.0 {
            return None;
        }
        // Anything this large is milliseconds
        let millis = if epoch >= 1e12 { epoch } else { epoch * 1000.0 };
        #[allow(clippy::cast_possible_truncation)]
        return DateTime::from_timestamp_millis(millis as i64);
    }

    let normalized = s.replacen(' ', "T", 1);

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

// ============================================================================
// HTTP service probe
// ============================================================================

/// GET probe; reachable iff the response status is 200
#[derive(Debug, Clone)]
pub struct HttpServiceProbe {
    client: reqwest::Client,
}

impl HttpServiceProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for service probes");
                reqwest::Client::new()
            });
        Self { client }
    }
}

#[async_trait]
impl ServiceProbe for HttpServiceProbe {
    async fn check(&self, url: &str) -> ServiceState {
        match self.client.get(url).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => ServiceState::Reachable {
                status_code: resp.status().as_u16(),
            },
            Ok(resp) => ServiceState::Unreachable {
                reason: format!("http_{}", resp.status().as_u16()),
            },
            Err(e) if e.is_timeout() => ServiceState::Unreachable {
                reason: "timeout".to_string(),
            },
            Err(_) => ServiceState::Unreachable {
                reason: "connection_failed".to_string(),
            },
        }
    }
}
