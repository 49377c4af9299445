//! Permission policy: maps an action type tag to its tier

use crate::config::PermissionsConfig;
use crate::types::Tier;
use std::collections::HashSet;

/// Three disjoint sets of action-type tags.
///
/// Anything not listed requires approval, so a newly invented action type
/// can never run unattended.
#[derive(Debug, Clone, Default)]
pub struct PermissionPolicy {
    auto_approve: HashSet<String>,
    require_approval: HashSet<String>,
    never_touch: HashSet<String>,
}

impl PermissionPolicy {
    pub fn new<I, S>(auto_approve: I, require_approval: I, never_touch: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            auto_approve: auto_approve.into_iter().map(Into::into).collect(),
            require_approval: require_approval.into_iter().map(Into::into).collect(),
            never_touch: never_touch.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &PermissionsConfig) -> Self {
        Self::new(
            config.auto_approve.iter().cloned(),
            config.require_approval.iter().cloned(),
            config.never_touch.iter().cloned(),
        )
    }

    /// Tier for a type tag. Forbidden is checked first.
    pub fn tier_for(&self, action_type: &str) -> Tier {
        if self.never_touch.contains(action_type) {
            Tier::Forbidden
        } else if self.auto_approve.contains(action_type) {
            Tier::Auto
        } else {
            Tier::Approval
        }
    }

    /// Whether a tag is named explicitly in any set
    pub fn is_listed(&self, action_type: &str) -> bool {
        self.auto_approve.contains(action_type)
            || self.require_approval.contains(action_type)
            || self.never_touch.contains(action_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PermissionPolicy {
        PermissionPolicy::new(
            vec!["restart_crashed_bot"],
            vec!["change_stake_size"],
            vec!["withdraw_funds"],
        )
    }

    #[test]
    fn test_listed_types_map_to_their_tier() {
        let p = policy();
        assert_eq!(p.tier_for("restart_crashed_bot"), Tier::Auto);
        assert_eq!(p.tier_for("change_stake_size"), Tier::Approval);
        assert_eq!(p.tier_for("withdraw_funds"), Tier::Forbidden);
    }

    #[test]
    fn test_unknown_type_requires_approval() {
        let p = policy();
        assert_eq!(p.tier_for("teleport_funds"), Tier::Approval);
        assert!(!p.is_listed("teleport_funds"));
    }

    #[test]
    fn test_default_config_policy() {
        let p = PermissionPolicy::from_config(&PermissionsConfig::default());
        assert_eq!(p.tier_for("restart_crashed_bot"), Tier::Auto);
        assert_eq!(p.tier_for("resume_after_cooldown"), Tier::Approval);
        assert_eq!(p.tier_for("withdraw_funds"), Tier::Forbidden);
    }
}
