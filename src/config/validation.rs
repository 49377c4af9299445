//! Config validation: unknown-key detection with Levenshtein suggestions
//! and cross-field timing checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Unknown keys never break a config.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Placeholder segment standing in for any unit name.
const UNIT_WILDCARD: &str = "*";

/// Returns the complete set of valid dotted key paths for `SupervisorConfig`.
///
/// Unit tables are keyed by operator-chosen names, so their fields are listed
/// under `units.*`. Any new config field must be added here too.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [daemon]
        "daemon",
        "daemon.name",
        "daemon.data_dir",
        // [server]
        "server",
        "server.addr",
        // [watchdog]
        "watchdog",
        "watchdog.heartbeat_interval_secs",
        "watchdog.settlement_check_interval_secs",
        "watchdog.stale_threshold_secs",
        "watchdog.max_restart_attempts",
        "watchdog.restart_cooldown_secs",
        "watchdog.stale_alert_interval_secs",
        "watchdog.loop_sleep_secs",
        "watchdog.error_backoff_secs",
        "watchdog.restart_settle_secs",
        "watchdog.launch_settle_secs",
        "watchdog.service_probe_timeout_secs",
        // [safety]
        "safety",
        "safety.max_consecutive_losses",
        // [permissions]
        "permissions",
        "permissions.auto_approve",
        "permissions.require_approval",
        "permissions.never_touch",
        // [change_tracking]
        "change_tracking",
        "change_tracking.enabled",
        "change_tracking.repo_path",
        "change_tracking.commit_prefix",
        "change_tracking.auto_push",
        "change_tracking.remote",
        "change_tracking.branch",
        // [units.<name>]
        "units",
        "units.*",
        "units.*.enabled",
        "units.*.auto_restart",
        "units.*.directory",
        "units.*.launch_command",
        "units.*.session_name",
        "units.*.data_path",
        "units.*.service_url",
        "units.*.redeem_command",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

/// Replace the unit name in `units.<name>...` with the wildcard segment.
fn normalize_unit_key(key: &str) -> String {
    let mut parts = key.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("units"), Some(_), Some(rest)) => format!("units.{UNIT_WILDCARD}.{rest}"),
        (Some("units"), Some(_), None) => format!("units.{UNIT_WILDCARD}"),
        _ => key.to_string(),
    }
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for &k in known {
        let dist = levenshtein(unknown, k);
        if dist <= 3 && best.map_or(true, |(_, d)| dist < d) {
            best = Some((k, dist));
        }
    }
    best.map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys; parse errors are left to serde.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    let mut warnings = Vec::new();

    for key in walk_toml_keys(&value, "") {
        let normalized = normalize_unit_key(&key);
        if known.contains(normalized.as_str()) {
            continue;
        }
        let suggestion = suggest_correction(&normalized, &known).map(|s| {
            // Put the operator's unit name back into the suggestion
            match key.split('.').nth(1) {
                Some(unit) if key.starts_with("units.") => {
                    s.replacen(&format!("units.{UNIT_WILDCARD}"), &format!("units.{unit}"), 1)
                }
                _ => s,
            }
        });
        warnings.push(ValidationWarning {
            message: format!("Unknown config key '{key}'"),
            field: key,
            suggestion,
        });
    }

    warnings
}

// ============================================================================
// Timing Range Validation
// ============================================================================

/// Cross-field checks on a parsed config.
///
/// Returns (errors, warnings). Errors prevent startup; warnings flag
/// settings that work but probably do not do what the operator meant.
pub fn validate_ranges(config: &super::SupervisorConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let w = &config.watchdog;

    if w.service_probe_timeout_secs == 0 {
        errors.push("watchdog.service_probe_timeout_secs must be > 0".to_string());
    }

    if w.stale_threshold_secs > 0 && w.stale_threshold_secs < w.heartbeat_interval_secs {
        warnings.push(ValidationWarning {
            field: "watchdog.stale_threshold_secs".to_string(),
            message: format!(
                "stale_threshold_secs = {} is shorter than heartbeat_interval_secs = {}; units may flap between HEALTHY and STALE",
                w.stale_threshold_secs, w.heartbeat_interval_secs
            ),
            suggestion: None,
        });
    }

    if w.loop_sleep_secs > w.heartbeat_interval_secs {
        warnings.push(ValidationWarning {
            field: "watchdog.loop_sleep_secs".to_string(),
            message: format!(
                "loop_sleep_secs = {} exceeds heartbeat_interval_secs = {}; health checks will run late",
                w.loop_sleep_secs, w.heartbeat_interval_secs
            ),
            suggestion: None,
        });
    }

    if config.units.values().all(|u| !u.enabled) {
        warnings.push(ValidationWarning {
            field: "units".to_string(),
            message: "No enabled units configured; the supervisor will only serve its API".to_string(),
            suggestion: None,
        });
    }

    for (name, unit) in config.enabled_units() {
        if unit.data_path.as_os_str().is_empty() {
            warnings.push(ValidationWarning {
                field: format!("units.{name}.data_path"),
                message: format!("Unit '{name}' has no data_path; it will always read as STALE"),
                suggestion: None,
            });
        }
        if let Some(url) = &unit.service_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!("units.{name}.service_url = '{url}' must be an http(s) URL"));
            }
        }
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================
