//! Authorization for state-changing agent steps
//!
//! Credentials are verified upstream; this module only answers whether an
//! already-authenticated [`Principal`] may perform an action on a resource.
//! Action-class steps consult an [`Authorizer`] before dispatch.
//!
//! # Policy rules
//!
//! ```toml
//! [authorization]
//! default_decision = "deny"
//!
//! [[authorization.rules]]
//! role = "hr_manager"
//! actions = ["update", "create"]
//! resources = ["employee*"]
//! ```
//!
//! `*` matches anything; a trailing `*` matches by prefix.

use crate::types::{Principal, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny(String),
}

impl AuthDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthDecision::Allow)
    }
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        principal: &Principal,
        action: &str,
        resource: &str,
    ) -> Result<AuthDecision>;
}

/// Allows everything. For local development and tests.
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _: &Principal, _: &str, _: &str) -> Result<AuthDecision> {
        Ok(AuthDecision::Allow)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultDecision {
    Allow,
    #[default]
    Deny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub role: String,
    #[serde(default = "wildcard")]
    pub actions: Vec<String>,
    #[serde(default = "wildcard")]
    pub resources: Vec<String>,
}

fn wildcard() -> Vec<String> {
    vec!["*".to_string()]
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

impl PolicyRule {
    fn permits(&self, principal: &Principal, action: &str, resource: &str) -> bool {
        (self.role == "*" || principal.roles.iter().any(|r| r == &self.role))
            && self.actions.iter().any(|p| pattern_matches(p, action))
            && self.resources.iter().any(|p| pattern_matches(p, resource))
    }
}

/// Role-based allow list with a configurable fallback decision.
#[derive(Debug, Clone, Default)]
pub struct PolicyAuthorizer {
    rules: Vec<PolicyRule>,
    default_decision: DefaultDecision,
}

impl PolicyAuthorizer {
    pub fn new(rules: Vec<PolicyRule>, default_decision: DefaultDecision) -> Self {
        Self {
            rules,
            default_decision,
        }
    }
}

#[async_trait]
impl Authorizer for PolicyAuthorizer {
    async fn authorize(
        &self,
        principal: &Principal,
        action: &str,
        resource: &str,
    ) -> Result<AuthDecision> {
        if self
            .rules
            .iter()
            .any(|rule| rule.permits(principal, action, resource))
        {
            return Ok(AuthDecision::Allow);
        }

        let decision = match self.default_decision {
            DefaultDecision::Allow => AuthDecision::Allow,
            DefaultDecision::Deny => AuthDecision::Deny(format!(
                "user '{}' may not {} {}",
                principal.user_id, action, resource
            )),
        };
        debug!(user = %principal.user_id, %action, %resource, ?decision, "no policy rule matched");
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PolicyAuthorizer {
        PolicyAuthorizer::new(
            vec![
                PolicyRule {
                    role: "hr_manager".into(),
                    actions: vec!["update".into(), "create".into()],
                    resources: vec!["employee*".into()],
                },
                PolicyRule {
                    role: "admin".into(),
                    actions: wildcard(),
                    resources: wildcard(),
                },
            ],
            DefaultDecision::Deny,
        )
    }

    #[tokio::test]
    async fn test_matching_role_is_allowed() {
        let hr = Principal::new("u1", "o1").with_role("hr_manager");
        let decision = policy().authorize(&hr, "update", "employee_record").await.unwrap();
        assert_eq!(decision, AuthDecision::Allow);
    }

    #[tokio::test]
    async fn test_unmatched_action_falls_back_to_default() {
        let hr = Principal::new("u1", "o1").with_role("hr_manager");
        let decision = policy().authorize(&hr, "delete", "employee_record").await.unwrap();
        assert!(!decision.is_allowed());

        let open = PolicyAuthorizer::new(vec![], DefaultDecision::Allow);
        assert!(open.authorize(&hr, "delete", "invoice").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_wildcard_rule_covers_everything() {
        let admin = Principal::new("root", "o1").with_role("admin");
        assert!(policy()
            .authorize(&admin, "schedule", "meeting")
            .await
            .unwrap()
            .is_allowed());
    }

    #[test]
    fn test_rule_defaults_to_wildcards() {
        let rule: PolicyRule = toml::from_str(r#"role = "viewer""#).unwrap();
        assert_eq!(rule.actions, vec!["*"]);
        assert_eq!(rule.resources, vec!["*"]);
    }
}
