//! File and process handlers that do not need executor state

use chrono::Utc;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use super::HandlerError;
use crate::config::defaults::{KILL_SWITCH_FILE, REDEEM_STDOUT_LIMIT, REDEEM_TIMEOUT_SECS};

/// Write the kill-switch marker. Writing it twice is harmless.
pub fn write_kill_switch(directory: &Path, paused_by: &str, reason: &str) -> Result<Value, HandlerError> {
    let path = directory.join(KILL_SWITCH_FILE);
    let body = format!(
        "Paused by {paused_by}: {reason}\nTime: {}\n",
        Utc::now().to_rfc3339()
    );
    std::fs::write(&path, body).map_err(|source| HandlerError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(json!({ "paused": true, "kill_file": path.display().to_string() }))
}

/// Remove the kill-switch marker. A missing marker still counts as resumed.
pub fn remove_kill_switch(directory: &Path) -> Result<Value, HandlerError> {
    let path = directory.join(KILL_SWITCH_FILE);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(json!({ "resumed": true })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(json!({ "resumed": true, "note": "kill_switch_not_found" }))
        }
        Err(source) => Err(HandlerError::Io { path, source }),
    }
}

/// Run the unit's redeem command with a hard timeout.
///
/// Stdout is truncated; a non-zero exit is reported in the result, not as an error.
pub async fn run_redeem(directory: &Path, command: &str) -> Result<Value, HandlerError> {
    let mut cmd = Command::new("bash");
    cmd.args(["-c", command]).kill_on_drop(true);
    if !directory.as_os_str().is_empty() {
        cmd.current_dir(directory);
    }

    let output = tokio::time::timeout(Duration::from_secs(REDEEM_TIMEOUT_SECS), cmd.output())
        .await
        .map_err(|_| HandlerError::Timeout("redeem"))?
        .map_err(|e| HandlerError::Command(format!("redeem: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(json!({
        "stdout": truncate_chars(&stdout, REDEEM_STDOUT_LIMIT),
        "returncode": output.status.code(),
    }))
}

/// First `limit` characters of `s`
pub fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}
