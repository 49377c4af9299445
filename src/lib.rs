//! Warden: fleet supervisor
//!
//! Watches a set of long-running worker processes ("units"), restarts dead
//! ones under a bounded restart policy, and routes every automated
//! intervention through a tiered approval engine before it is executed.
//!
//! ## Architecture
//!
//! - **Health**: liveness, data freshness and service probes per unit, plus
//!   the leaky-bucket `RestartController`
//! - **Approval**: `PermissionPolicy` tiers, durable pending queue and history
//! - **Executor**: type-keyed handlers, failures contained at the boundary
//! - **Supervisor**: the single `ControlLoop` that owns all mutable state
//! - **API**: read-only reporting and command enqueueing over HTTP

pub mod api;
pub mod approval;
pub mod config;
pub mod executor;
pub mod health;
pub mod storage;
pub mod supervisor;
pub mod types;

pub use approval::{ApprovalEngine, PermissionPolicy, SubmitOutcome};
pub use config::{ConfigError, SupervisorConfig, UnitConfig};
pub use executor::Executor;
pub use health::{HealthMonitor, RestartController, RestartOutcome};
pub use supervisor::{Collaborators, CommandSender, ControlLoop, SharedSnapshot, SupervisorSnapshot};
pub use types::{
    Action, ActionKind, ActionStatus, ExecutionOutcome, ExecutionRecord, HealthClass, HealthRecord,
    Submission, Tier,
};
