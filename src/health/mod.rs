//! Unit health: probes, classification and the restart policy

mod monitor;
pub mod probes;
mod restart;

pub use monitor::{freshness_at, HealthMonitor};
pub use probes::{
    ActivitySource, HttpServiceProbe, ProbeError, Probes, ProcessProbe, ScreenSessionProbe,
    ServiceProbe, SqliteActivitySource,
};
pub use restart::{
    RestartController, RestartOutcome, REASON_AUTO_RESTART_DISABLED, REASON_MAX_ATTEMPTS_EXCEEDED,
    REASON_RESTARTED, REASON_START_FAILED,
};
