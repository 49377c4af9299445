//! Shared domain types

mod action;
mod execution;
mod health;

pub use action::{
    Action, ActionKind, ActionStatus, Submission, Tier, RESOLVER_OPERATOR, RESOLVER_SYSTEM,
};
pub use execution::{ExecutionOutcome, ExecutionRecord};
pub use health::{classify, Freshness, HealthClass, HealthRecord, ServiceState};
