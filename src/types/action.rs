//! Action types: the proposed / resolved intervention record and its tags

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Permission Tier
// ============================================================================

/// Policy classification of an action type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Executes without a human in the loop
    Auto,
    /// Queued until an operator approves or rejects it
    Approval,
    /// Never executed; recorded as blocked
    Forbidden,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Auto => write!(f, "auto"),
            Tier::Approval => write!(f, "approval"),
            Tier::Forbidden => write!(f, "forbidden"),
        }
    }
}

// ============================================================================
// Action Status
// ============================================================================

/// Lifecycle status of an action.
///
/// `Pending` actions live in the queue; every other status lives in history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    AutoApproved,
    Approved,
    Rejected,
    Blocked,
}

impl ActionStatus {
    /// Whether an action with this status should be handed to the executor
    pub fn is_executable(self) -> bool {
        matches!(self, ActionStatus::AutoApproved | ActionStatus::Approved)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionStatus::Pending => "pending",
            ActionStatus::AutoApproved => "auto_approved",
            ActionStatus::Approved => "approved",
            ActionStatus::Rejected => "rejected",
            ActionStatus::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Action Vocabulary
// ============================================================================

/// The fixed vocabulary of action types the executor knows how to apply.
///
/// Actions carry their type as a free string so collaborators can propose
/// anything; `ActionKind::parse` maps the known tags onto this enum and
/// everything else falls through to `no_handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    RestartCrashedUnit,
    RedeemSettlements,
    PauseOnLossStreak,
    ResumeAfterCooldown,
    ChangeMovementFilter,
    ChangeStakeSize,
    ChangeEntryTiming,
    ToggleRsiFilter,
    ChangeConvictionRange,
    LogObservation,
}

impl ActionKind {
    pub const ALL: [ActionKind; 10] = [
        ActionKind::RestartCrashedUnit,
        ActionKind::RedeemSettlements,
        ActionKind::PauseOnLossStreak,
        ActionKind::ResumeAfterCooldown,
        ActionKind::ChangeMovementFilter,
        ActionKind::ChangeStakeSize,
        ActionKind::ChangeEntryTiming,
        ActionKind::ToggleRsiFilter,
        ActionKind::ChangeConvictionRange,
        ActionKind::LogObservation,
    ];

    /// Wire tag for this kind
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::RestartCrashedUnit => "restart_crashed_bot",
            ActionKind::RedeemSettlements => "redeem_settlements",
            ActionKind::PauseOnLossStreak => "pause_on_loss_streak",
            ActionKind::ResumeAfterCooldown => "resume_after_cooldown",
            ActionKind::ChangeMovementFilter => "change_movement_filter",
            ActionKind::ChangeStakeSize => "change_stake_size",
            ActionKind::ChangeEntryTiming => "change_entry_timing",
            ActionKind::ToggleRsiFilter => "enable_disable_rsi",
            ActionKind::ChangeConvictionRange => "change_conviction_range",
            ActionKind::LogObservation => "log_observation",
        }
    }

    /// Map a wire tag onto a known kind
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Action Record
// ============================================================================

/// Identity recorded on actions resolved by the policy engine itself
pub const RESOLVER_SYSTEM: &str = "system";

/// Identity recorded on actions resolved by a human
pub const RESOLVER_OPERATOR: &str = "operator";

/// A proposed or resolved intervention.
///
/// This is the persisted record: the queue and history stores hold exactly
/// this shape and it must round-trip unchanged across restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    /// Unique, strictly increasing within a process (`action_<unix_millis>`)
    pub id: String,
    /// Type tag, see [`ActionKind`]
    #[serde(rename = "type")]
    pub action_type: String,
    /// Human-readable description
    pub description: String,
    /// Justification supplied by the proposer
    pub reason: String,
    /// Unit this action targets, if any
    #[serde(default)]
    pub unit: Option<String>,
    /// Free-form structured parameters
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    pub tier: Tier,
    pub status: ActionStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_by: Option<String>,
}

impl Action {
    /// Known kind for this action's type tag, if any
    pub fn kind(&self) -> Option<ActionKind> {
        ActionKind::parse(&self.action_type)
    }

    /// Read a string parameter
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// A proposal from a collaborator (or the control loop) before it has been
/// classified.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "type")]
    pub action_type: String,
    pub description: String,
    pub reason: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Submission {
    pub fn new(
        action_type: impl Into<String>,
        description: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            description: description.into(),
            reason: reason.into(),
            unit: None,
            params: serde_json::Map::new(),
        }
    }

    pub fn for_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}
