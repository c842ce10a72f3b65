//! Policy Engine (spec §4.J): per-tool rule store guarded by a
//! readers-writer lock, the same guard discipline as the teacher's
//! `ApprovalManager::pending`/`approved_commands` maps — new relative to
//! the teacher (its approval flow is a flat mode+allowlist check, not a
//! rule engine), but built in its idiom.

use std::collections::HashMap;

use helix_common::{Error, Result};
use tokio::sync::RwLock;

use crate::types::{Action, ConfirmationRequest, Decision, Level, Policy};

/// Validate that no two rules share a priority. Action validity is
/// guaranteed by the `Action` enum's closed variant set, so only the
/// priority-uniqueness check needs runtime enforcement.
fn validate_policy(policy: &Policy) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for rule in &policy.rules {
        if !seen.insert(rule.priority) {
            return Err(Error::InvalidArgument(format!("policy {:?}: duplicate rule priority {}", policy.name, rule.priority)));
        }
    }
    Ok(())
}

/// Per-tool policy store.
pub struct PolicyEngine {
    policies: RwLock<HashMap<String, Policy>>,
    default_policy: RwLock<Policy>,
}

impl PolicyEngine {
    #[must_use]
    pub fn new(default_policy: Policy) -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            default_policy: RwLock::new(default_policy),
        }
    }

    /// `SetPolicy(tool, policy)` (spec §4.J).
    pub async fn set_policy(&self, tool: impl Into<String>, policy: Policy) -> Result<()> {
        validate_policy(&policy)?;
        self.policies.write().await.insert(tool.into(), policy);
        Ok(())
    }

    pub async fn get_policy(&self, tool: &str) -> Option<Policy> {
        self.policies.read().await.get(tool).cloned()
    }

    pub async fn set_default_policy(&self, policy: Policy) -> Result<()> {
        validate_policy(&policy)?;
        *self.default_policy.write().await = policy;
        Ok(())
    }

    /// `Evaluate(request) → Decision` (spec §4.J): fetch the tool's policy
    /// or fall back to the default, try rules in descending priority,
    /// first match wins; no match falls through to `default_action`.
    pub async fn evaluate(&self, request: &ConfirmationRequest) -> Decision {
        let found = self.policies.read().await.get(&request.tool_name).cloned();
        let policy = match found {
            Some(policy) => policy,
            None => self.default_policy.read().await.clone(),
        };

        if !policy.enabled {
            return Decision {
                action: Action::Allow,
                matched_rule: None,
                matched_level: Level::Info,
                policy_name: policy.name,
            };
        }

        let mut rules: Vec<_> = policy.rules.iter().collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        for rule in rules {
            if rule.condition.matches(request) {
                return Decision {
                    action: rule.action,
                    matched_rule: Some(rule.name.clone()),
                    matched_level: rule.level,
                    policy_name: policy.name,
                };
            }
        }

        Decision {
            action: policy.default_action,
            matched_rule: None,
            matched_level: Level::Info,
            policy_name: policy.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;
    use crate::types::{Condition, ExecutionContext, Level, Operation, OperationType, Risk, Rule};

    fn request(tool: &str, op_type: OperationType, target: &str) -> ConfirmationRequest {
        ConfirmationRequest {
            tool_name: tool.to_string(),
            operation: Operation {
                op_type,
                description: "test".to_string(),
                target: target.to_string(),
                risk: Risk::Low,
                reversible: true,
                preview: None,
            },
            parameters: HashMap::new(),
            context: ExecutionContext {
                user: "u".to_string(),
                session_id: "s".to_string(),
                conversation_id: "c".to_string(),
                timestamp: Utc::now(),
                is_ci: false,
            },
            batch_mode: false,
        }
    }

    fn default_policy(default_action: Action) -> Policy {
        Policy {
            name: "default".to_string(),
            rules: Vec::new(),
            default_action,
            batch_default_action: Action::Deny,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn set_policy_rejects_duplicate_priorities() {
        let engine = PolicyEngine::new(default_policy(Action::Ask));
        let policy = Policy {
            name: "p".to_string(),
            rules: vec![
                Rule {
                    name: "a".to_string(),
                    priority: 10,
                    condition: Condition::default(),
                    action: Action::Allow,
                    level: Level::Info,
                },
                Rule {
                    name: "b".to_string(),
                    priority: 10,
                    condition: Condition::default(),
                    action: Action::Deny,
                    level: Level::Info,
                },
            ],
            default_action: Action::Ask,
            batch_default_action: Action::Deny,
            enabled: true,
        };
        let err = engine.set_policy("exec", policy).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn first_matching_rule_by_descending_priority_wins() {
        let engine = PolicyEngine::new(default_policy(Action::Ask));
        let policy = Policy {
            name: "exec-policy".to_string(),
            rules: vec![
                Rule {
                    name: "low-prio-allow".to_string(),
                    priority: 1,
                    condition: Condition {
                        operation_types: vec![OperationType::Read],
                        ..Default::default()
                    },
                    action: Action::Allow,
                    level: Level::Info,
                },
                Rule {
                    name: "high-prio-deny".to_string(),
                    priority: 100,
                    condition: Condition {
                        operation_types: vec![OperationType::Read],
                        ..Default::default()
                    },
                    action: Action::Deny,
                    level: Level::Danger,
                },
            ],
            default_action: Action::Ask,
            batch_default_action: Action::Deny,
            enabled: true,
        };
        engine.set_policy("exec", policy).await.expect("test");

        let decision = engine.evaluate(&request("exec", OperationType::Read, "/tmp/x")).await;
        assert_eq!(decision.action, Action::Deny);
        assert_eq!(decision.matched_rule.as_deref(), Some("high-prio-deny"));
    }

    #[tokio::test]
    async fn no_match_falls_through_to_default_action() {
        let engine = PolicyEngine::new(default_policy(Action::Ask));
        let policy = Policy {
            name: "exec-policy".to_string(),
            rules: vec![Rule {
                name: "only-network".to_string(),
                priority: 5,
                condition: Condition {
                    operation_types: vec![OperationType::Network],
                    ..Default::default()
                },
                action: Action::Deny,
                level: Level::Danger,
            }],
            default_action: Action::Allow,
            batch_default_action: Action::Deny,
            enabled: true,
        };
        engine.set_policy("exec", policy).await.expect("test");

        let decision = engine.evaluate(&request("exec", OperationType::Read, "/tmp/x")).await;
        assert_eq!(decision.action, Action::Allow);
        assert!(decision.matched_rule.is_none());
    }

    #[tokio::test]
    async fn empty_path_glob_always_matches() {
        let engine = PolicyEngine::new(default_policy(Action::Ask));
        let policy = Policy {
            name: "any-path".to_string(),
            rules: vec![Rule {
                name: "allow-any-path".to_string(),
                priority: 1,
                condition: Condition::default(),
                action: Action::Allow,
                level: Level::Info,
            }],
            default_action: Action::Deny,
            batch_default_action: Action::Deny,
            enabled: true,
        };
        engine.set_policy("exec", policy).await.expect("test");

        let decision = engine.evaluate(&request("exec", OperationType::Write, "/any/path/at/all")).await;
        assert_eq!(decision.action, Action::Allow);
    }

    #[tokio::test]
    async fn unknown_tool_falls_back_to_default_policy() {
        let engine = PolicyEngine::new(default_policy(Action::Deny));
        let decision = engine.evaluate(&request("unregistered-tool", OperationType::Read, "/tmp")).await;
        assert_eq!(decision.action, Action::Deny);
    }

    #[tokio::test]
    async fn disabled_policy_always_allows() {
        let engine = PolicyEngine::new(default_policy(Action::Ask));
        let mut policy = default_policy(Action::Deny);
        policy.enabled = false;
        engine.set_policy("exec", policy).await.expect("test");

        let decision = engine.evaluate(&request("exec", OperationType::Delete, "/tmp")).await;
        assert_eq!(decision.action, Action::Allow);
    }
}
