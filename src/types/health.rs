//! Health classification types produced by the health monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-unit health verdict.
///
/// Precedence when classifying: Disabled > Dead > Stale > Healthy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthClass {
    Healthy,
    Stale,
    Dead,
    Disabled,
}

impl std::fmt::Display for HealthClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthClass::Healthy => write!(f, "HEALTHY"),
            HealthClass::Stale => write!(f, "STALE"),
            HealthClass::Dead => write!(f, "DEAD"),
            HealthClass::Disabled => write!(f, "DISABLED"),
        }
    }
}

/// Result of the data-freshness probe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Freshness {
    pub fresh: bool,
    /// Most recent activity, normalized to UTC
    pub last_activity: Option<DateTime<Utc>>,
    /// Seconds since `last_activity`; `None` when unknown
    pub stale_seconds: Option<i64>,
}

impl Freshness {
    /// Not fresh, age unknown. Used for every probe failure.
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Result of the optional service reachability probe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceState {
    /// No probe configured for this unit
    NotConfigured,
    Reachable { status_code: u16 },
    Unreachable { reason: String },
}

impl ServiceState {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ServiceState::Reachable { .. })
    }
}

/// One unit's health for one check cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthRecord {
    pub unit: String,
    pub class: HealthClass,
    pub process_alive: bool,
    pub freshness: Freshness,
    pub service: ServiceState,
    pub checked_at: DateTime<Utc>,
}

impl HealthRecord {
    /// Record for a unit that is switched off in configuration
    pub fn disabled(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
            class: HealthClass::Disabled,
            process_alive: false,
            freshness: Freshness::unknown(),
            service: ServiceState::NotConfigured,
            checked_at: Utc::now(),
        }
    }
}

/// Classify from probe results. Dead process trumps stale data.
pub fn classify(enabled: bool, process_alive: bool, fresh: bool) -> HealthClass {
    if !enabled {
        HealthClass::Disabled
    } else if !process_alive {
        HealthClass::Dead
    } else if !fresh {
        HealthClass::Stale
    } else {
        HealthClass::Healthy
    }
}
