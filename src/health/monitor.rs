//! HealthMonitor: combine the three probes into one classification per unit

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::probes::{parse_activity_timestamp, Probes};
use crate::config::UnitConfig;
use crate::types::{classify, Freshness, HealthRecord, ServiceState};

pub struct HealthMonitor {
    probes: Probes,
    stale_threshold: Duration,
}

impl HealthMonitor {
    pub fn new(probes: Probes, stale_threshold: Duration) -> Self {
        Self {
            probes,
            stale_threshold,
        }
    }

    /// Probe every unit. Disabled units are reported without being probed.
    pub async fn report(&self, units: &BTreeMap<String, UnitConfig>) -> BTreeMap<String, HealthRecord> {
        let mut report = BTreeMap::new();
        for (name, unit) in units {
            report.insert(name.clone(), self.check_unit(name, unit).await);
        }
        report
    }

    /// Probe a single unit. Never fails: probe errors become "dead" or "not fresh".
    pub async fn check_unit(&self, name: &str, unit: &UnitConfig) -> HealthRecord {
        if !unit.enabled {
            return HealthRecord::disabled(name);
        }

        let session = unit.session(name);
        let process_alive = match self.probes.process.is_alive(session).await {
            Ok(alive) => alive,
            Err(e) => {
                warn!(unit = %name, error = %e, "Liveness probe failed");
                false
            }
        };

        let now = Utc::now();
        let freshness = match self.probes.activity.last_activity(&unit.data_path) {
            Ok(raw) => freshness_at(raw.as_deref(), now, self.stale_threshold),
            Err(e) => {
                debug!(unit = %name, error = %e, "Freshness probe failed");
                Freshness::unknown()
            }
        };

        let service = match &unit.service_url {
            Some(url) => self.probes.service.check(url).await,
            None => ServiceState::NotConfigured,
        };

        let class = classify(true, process_alive, freshness.fresh);
        debug!(unit = %name, class = %class, process_alive, stale_seconds = ?freshness.stale_seconds, "Unit checked");

        HealthRecord {
            unit: name.to_string(),
            class,
            process_alive,
            freshness,
            service,
            checked_at: now,
        }
    }
}

/// Freshness of a raw stored timestamp relative to `now`.
///
/// Missing or unparseable values are "not fresh, unknown age".
pub fn freshness_at(raw: Option<&str>, now: DateTime<Utc>, threshold: Duration) -> Freshness {
    let Some(last) = raw.and_then(parse_activity_timestamp) else {
        return Freshness::unknown();
    };
    let stale_seconds = (now - last).num_seconds();
    let threshold_secs = i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX);
    Freshness {
        fresh: stale_seconds < threshold_secs,
        last_activity: Some(last),
        stale_seconds: Some(stale_seconds),
    }
}
