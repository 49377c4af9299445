//! Config Validation Tests
//!
//! Typo detection and structural validation, exercised through the public
//! config API the way `warden check-config` uses it.

use warden::config::validation::{known_config_keys, suggest_correction, validate_unknown_keys};
use warden::config::{ConfigError, SupervisorConfig};

// ============================================================================
// Typo detection
// ============================================================================

#[test]
fn typo_in_watchdog_section_warns_with_suggestion() {
    let toml_str = r#"
[watchdog]
heartbeat_intreval_secs = 30
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("heartbeat_intreval_secs"));
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("watchdog.heartbeat_interval_secs")
    );
}

#[test]
fn valid_full_config_produces_zero_warnings() {
    let toml_str = r#"
[daemon]
name = "warden"
data_dir = "/var/lib/warden"

[server]
addr = "127.0.0.1:6000"

[watchdog]
heartbeat_interval_secs = 60
stale_threshold_secs = 1800
max_restart_attempts = 3
restart_cooldown_secs = 300

[safety]
max_consecutive_losses = 5

[permissions]
auto_approve = ["restart_crashed_bot"]
require_approval = ["change_stake_size"]
never_touch = ["withdraw_funds"]

[units.alpha]
directory = "/srv/alpha"
launch_command = "python bot.py"
data_path = "/srv/alpha/trades.db"
service_url = "http://127.0.0.1:7001/health"
"#;
    assert!(validate_unknown_keys(toml_str).is_empty());
    let config = SupervisorConfig::from_toml_str(toml_str).unwrap();
    assert_eq!(config.units["alpha"].session("alpha"), "alpha");
    assert_eq!(config.permissions.auto_approve, vec!["restart_crashed_bot"]);
}

#[test]
fn garbage_key_has_no_suggestion() {
    let known = known_config_keys();
    assert!(suggest_correction("daemon.zzzzzzzzzzzz", &known).is_none());
}

// ============================================================================
// Structural validation
// ============================================================================

fn validation_errors(toml_str: &str) -> Vec<String> {
    match SupervisorConfig::from_toml_str(toml_str) {
        Err(ConfigError::Validation(errors)) => errors,
        other => panic!("expected validation errors, got {other:?}"),
    }
}

#[test]
fn type_in_two_permission_sets_is_rejected() {
    let errors = validation_errors(
        r#"
[permissions]
auto_approve = ["change_stake_size"]
require_approval = ["change_stake_size"]
never_touch = []
"#,
    );
    assert!(errors.iter().any(|e| e.contains("change_stake_size")));
}

#[test]
fn restartable_unit_needs_launch_command() {
    let errors = validation_errors(
        r#"
[units.alpha]
directory = "/srv/alpha"
"#,
    );
    assert!(errors.iter().any(|e| e.contains("units.alpha.launch_command")));
}

#[test]
fn manual_unit_needs_no_launch_command() {
    let config = SupervisorConfig::from_toml_str(
        r#"
[units.alpha]
auto_restart = false
directory = "/srv/alpha"
"#,
    )
    .unwrap();
    assert!(!config.units["alpha"].auto_restart);
}

#[test]
fn zero_limits_are_rejected_together() {
    let errors = validation_errors(
        r#"
[watchdog]
max_restart_attempts = 0
heartbeat_interval_secs = 0

[safety]
max_consecutive_losses = 0
"#,
    );
    assert!(errors.len() >= 3, "all errors are collected: {errors:?}");
}

#[test]
fn effective_config_round_trips_through_toml() {
    let config = SupervisorConfig::default();
    let rendered = config.to_toml().unwrap();
    let reparsed = SupervisorConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(reparsed.watchdog.max_restart_attempts, config.watchdog.max_restart_attempts);
    assert_eq!(reparsed.permissions.never_touch, config.permissions.never_touch);
}

#[test]
fn service_url_must_be_http() {
    let errors = validation_errors(
        r#"
[units.alpha]
launch_command = "python bot.py"
service_url = "tcp://127.0.0.1:7001"
"#,
    );
    assert!(errors.iter().any(|e| e.contains("units.alpha.service_url")));
}
