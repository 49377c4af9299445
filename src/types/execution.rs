//! Executor results and the persisted execution ledger entry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of handing one approved action to the executor.
///
/// Handler errors never escape the executor; they arrive here as `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded { result: serde_json::Value },
    Failed { error: String },
}

impl ExecutionOutcome {
    pub fn succeeded(result: serde_json::Value) -> Self {
        ExecutionOutcome::Succeeded { result }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        ExecutionOutcome::Failed {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded { .. })
    }
}

/// One executed action, kept alongside the action history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub action_id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(action: &super::Action, outcome: ExecutionOutcome) -> Self {
        Self {
            action_id: action.id.clone(),
            action_type: action.action_type.clone(),
            unit: action.unit.clone(),
            outcome,
            executed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_outcome_wire_format() {
        let v = serde_json::to_value(ExecutionOutcome::failed("no_handler")).unwrap();
        assert_eq!(v["outcome"], "failed");
        assert_eq!(v["error"], "no_handler");
    }
}
