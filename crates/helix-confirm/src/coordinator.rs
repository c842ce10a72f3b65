//! Confirmation Coordinator (spec §4.M): the direct generalization of
//! `moltis-tools::approval::ApprovalManager`. Where the teacher's manager
//! is mode+allowlist+pending-channel for exec commands specifically, this
//! coordinator runs the full spec §4.M pipeline for any tool.
//!
//! Reuses the teacher's `approved_commands: RwLock<HashSet<String>>`
//! shape, generalized to `user_choices: RwLock<HashMap<String, Choice>>`
//! for `always`/`never` memoization, and the teacher's 120s approval
//! timeout constant around the prompt wait.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use helix_common::{Error, Result};
use helix_metrics::{confirm as confirm_metrics, counter};
use tokio::sync::RwLock;
use tracing::warn;

use crate::{
    audit::AuditStore,
    danger,
    policy::PolicyEngine,
    prompt::Prompter,
    types::{Action, AuditEntry, Choice, ConfirmationRequest, ConfirmationResult, Level, PromptRequest, Risk},
};

/// Same default as the teacher's `ApprovalManager::timeout` — the spec
/// leaves this constant unfixed, so this revision keeps the teacher's
/// value (recorded as an Open Question resolution in the grounding
/// ledger).
const PROMPT_TIMEOUT: Duration = Duration::from_secs(120);

fn risk_derived_level(risk: Risk) -> Level {
    match risk {
        Risk::Critical | Risk::High => Level::Danger,
        Risk::Medium => Level::Warning,
        Risk::Low | Risk::None => Level::Info,
    }
}

/// The coordinator may succeed at reaching a decision but fail to persist
/// the audit entry; callers get both so they can surface the write
/// failure without pretending the decision never happened (spec §7: never
/// swallow a `Policy`/`AuditStore` error).
pub type CoordinatorOutcome = (ConfirmationResult, Option<Error>);

pub struct ConfirmationCoordinator {
    policy: Arc<PolicyEngine>,
    prompter: Arc<dyn Prompter>,
    audit: Arc<dyn AuditStore>,
    user_choices: RwLock<HashMap<String, Choice>>,
    enabled: RwLock<bool>,
    batch_mode: RwLock<bool>,
}

impl ConfirmationCoordinator {
    #[must_use]
    pub fn new(policy: Arc<PolicyEngine>, prompter: Arc<dyn Prompter>, audit: Arc<dyn AuditStore>) -> Self {
        Self {
            policy,
            prompter,
            audit,
            user_choices: RwLock::new(HashMap::new()),
            enabled: RwLock::new(true),
            batch_mode: RwLock::new(false),
        }
    }

    pub async fn set_enabled(&self, enabled: bool) {
        *self.enabled.write().await = enabled;
    }

    pub async fn set_batch_mode(&self, batch_mode: bool) {
        *self.batch_mode.write().await = batch_mode;
    }

    pub async fn set_user_choice(&self, tool_name: impl Into<String>, choice: Choice) {
        self.user_choices.write().await.insert(tool_name.into(), choice);
    }

    pub async fn get_user_choice(&self, tool_name: &str) -> Option<Choice> {
        self.user_choices.read().await.get(tool_name).copied()
    }

    pub async fn reset_choices(&self) {
        self.user_choices.write().await.clear();
    }

    pub async fn query_audit(&self, filter: crate::types::AuditFilter) -> Result<Vec<AuditEntry>> {
        self.audit.query(filter).await
    }

    /// `Confirm(ctx, request) → result` (spec §4.M steps 1–7).
    pub async fn confirm(&self, mut request: ConfirmationRequest) -> CoordinatorOutcome {
        // Step 1: globally disabled.
        if !*self.enabled.read().await {
            return self.finish(&request, Choice::Allow, true, "confirmation disabled".to_string(), None, None).await;
        }

        // Step 2: permanent per-tool choice.
        if let Some(choice) = self.get_user_choice(&request.tool_name).await {
            match choice {
                Choice::Always => return self.finish(&request, Choice::Always, true, "user choice: always".to_string(), None, None).await,
                Choice::Never => return self.finish(&request, Choice::Never, false, "user choice: never".to_string(), None, None).await,
                _ => {},
            }
        }

        // Step 3: danger detector may raise risk above the request's own.
        let assessment = danger::assess(&request);
        if assessment.risk > request.operation.risk {
            request.operation.risk = assessment.risk;
            request.operation.reversible = assessment.reversible;
        }

        // Step 4: policy evaluation.
        let decision = self.policy.evaluate(&request).await;
        counter!(confirm_metrics::REQUESTS_TOTAL).increment(1);

        // Step 5: batch mode converts `ask` to the policy's batch default.
        let is_batch = request.batch_mode || *self.batch_mode.read().await || request.context.is_ci;
        let effective_action = if is_batch && decision.action == Action::Ask {
            self.policy_batch_default(&request).await
        } else {
            decision.action
        };

        // Step 6: dispatch.
        match effective_action {
            Action::Allow => {
                self.finish(&request, Choice::Allow, true, format!("policy {}: allow", decision.policy_name), Some(decision.policy_name), decision.matched_rule).await
            },
            Action::Deny => {
                self.finish(&request, Choice::Deny, false, format!("policy {}: deny", decision.policy_name), Some(decision.policy_name), decision.matched_rule).await
            },
            Action::Ask => {
                let level = decision.matched_level.max(risk_derived_level(request.operation.risk));
                let prompt_request = PromptRequest {
                    tool_name: request.tool_name.clone(),
                    operation: request.operation.clone(),
                    level,
                    assessment_dangers: assessment.dangers.clone(),
                    preview: request.operation.preview.clone(),
                };

                let prompted = tokio::time::timeout(PROMPT_TIMEOUT, self.prompter.prompt(prompt_request)).await;
                let choice = match prompted {
                    Ok(Ok(response)) => response.choice,
                    Ok(Err(_)) | Err(_) => Choice::Deny,
                };

                if matches!(choice, Choice::Always | Choice::Never) {
                    self.set_user_choice(request.tool_name.clone(), choice).await;
                }

                let allowed = matches!(choice, Choice::Allow | Choice::Always);
                self.finish(&request, choice, allowed, format!("policy {}: ask, user chose {choice:?}", decision.policy_name), Some(decision.policy_name), decision.matched_rule)
                    .await
            },
        }
    }

    async fn policy_batch_default(&self, request: &ConfirmationRequest) -> Action {
        self.policy.get_policy(&request.tool_name).await.map(|p| p.batch_default_action).unwrap_or(Action::Deny)
    }

    /// Step 7: every terminal path writes an audit entry before returning.
    async fn finish(&self, request: &ConfirmationRequest, choice: Choice, allowed: bool, reason: String, policy_name: Option<String>, rule_name: Option<String>) -> CoordinatorOutcome {
        let audit_id = uuid::Uuid::new_v4().to_string();
        let timestamp = Utc::now();

        let entry = AuditEntry {
            id: audit_id.clone(),
            timestamp,
            user: request.context.user.clone(),
            session_id: request.context.session_id.clone(),
            conversation_id: request.context.conversation_id.clone(),
            tool_name: request.tool_name.clone(),
            operation_description: request.operation.description.clone(),
            decision: choice,
            policy_name: policy_name.clone(),
            rule_name,
            reason: reason.clone(),
        };

        let audit_err = match self.audit.store(entry).await {
            Ok(()) => None,
            Err(err) => {
                warn!(error = %err, "failed to persist audit entry");
                Some(err)
            },
        };

        let result = ConfirmationResult {
            allowed,
            reason,
            choice,
            policy_name,
            timestamp,
            audit_id,
        };
        (result, audit_err)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        audit::InMemoryAuditStore,
        prompt::MockPrompter,
        types::{Condition, ExecutionContext, Operation, OperationType, Policy, Rule},
    };

    fn request(tool: &str, op_type: OperationType, risk: Risk, batch_mode: bool, is_ci: bool) -> ConfirmationRequest {
        ConfirmationRequest {
            tool_name: tool.to_string(),
            operation: Operation {
                op_type,
                description: "test operation".to_string(),
                target: "/tmp/x".to_string(),
                risk,
                reversible: true,
                preview: None,
            },
            parameters: HashMap::new(),
            context: ExecutionContext {
                user: "alice".to_string(),
                session_id: "s".to_string(),
                conversation_id: "c".to_string(),
                timestamp: Utc::now(),
                is_ci,
            },
            batch_mode,
        }
    }

    fn default_policy(default_action: Action, batch_default_action: Action) -> Policy {
        Policy {
            name: "default".to_string(),
            rules: Vec::new(),
            default_action,
            batch_default_action,
            enabled: true,
        }
    }

    fn coordinator(default_action: Action, prompter: Arc<dyn Prompter>) -> ConfirmationCoordinator {
        let policy = Arc::new(PolicyEngine::new(default_policy(default_action, Action::Deny)));
        ConfirmationCoordinator::new(policy, prompter, Arc::new(InMemoryAuditStore::new()))
    }

    #[tokio::test]
    async fn globally_disabled_allows_with_fixed_reason() {
        let coord = coordinator(Action::Deny, Arc::new(MockPrompter::always(Choice::Deny)));
        coord.set_enabled(false).await;

        let (result, audit_err) = coord.confirm(request("exec", OperationType::Execute, Risk::Low, false, false)).await;
        assert!(result.allowed);
        assert_eq!(result.reason, "confirmation disabled");
        assert!(audit_err.is_none());
    }

    #[tokio::test]
    async fn permanent_never_choice_denies_without_prompting() {
        let coord = coordinator(Action::Ask, Arc::new(MockPrompter::always(Choice::Allow)));
        coord.set_user_choice("exec", Choice::Never).await;

        let (result, _) = coord.confirm(request("exec", OperationType::Execute, Risk::Low, false, false)).await;
        assert!(!result.allowed);
        assert_eq!(result.choice, Choice::Never);
    }

    #[tokio::test]
    async fn danger_detector_raises_risk_above_request() {
        let coord = coordinator(Action::Allow, Arc::new(MockPrompter::always(Choice::Allow)));
        let (result, _) = coord.confirm(request("exec", OperationType::Delete, Risk::Low, false, false)).await;
        // Allow action still fires (default policy), but the audit reason
        // should reflect the policy path ran after danger escalation.
        assert!(result.allowed);
    }

    #[tokio::test]
    async fn batch_mode_converts_ask_to_batch_default() {
        let coord = coordinator(Action::Ask, Arc::new(MockPrompter::always(Choice::Allow)));
        let (result, _) = coord.confirm(request("exec", OperationType::Execute, Risk::Low, true, false)).await;
        // batch_default_action is Deny.
        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn ci_context_is_treated_as_batch_mode() {
        let coord = coordinator(Action::Ask, Arc::new(MockPrompter::always(Choice::Allow)));
        let (result, _) = coord.confirm(request("exec", OperationType::Execute, Risk::Low, false, true)).await;
        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn ask_action_prompts_and_persists_always_choice() {
        let coord = coordinator(Action::Ask, Arc::new(MockPrompter::always(Choice::Always)));
        let (result, _) = coord.confirm(request("exec", OperationType::Execute, Risk::Low, false, false)).await;
        assert!(result.allowed);
        assert_eq!(coord.get_user_choice("exec").await, Some(Choice::Always));
    }

    #[tokio::test]
    async fn every_terminal_path_writes_an_audit_entry() {
        let coord = coordinator(Action::Deny, Arc::new(MockPrompter::always(Choice::Deny)));
        coord.confirm(request("exec", OperationType::Execute, Risk::Low, false, false)).await;

        let entries = coord.query_audit(crate::types::AuditFilter::default()).await.expect("test");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tool_name, "exec");
    }

    /// Records the `Level` it was prompted with instead of discarding it,
    /// so tests can assert what the coordinator actually escalated to.
    struct LevelCapturingPrompter {
        response: Choice,
        seen_level: RwLock<Option<Level>>,
    }

    #[async_trait::async_trait]
    impl Prompter for LevelCapturingPrompter {
        async fn prompt(&self, request: PromptRequest) -> Result<crate::types::PromptResponse> {
            *self.seen_level.write().await = Some(request.level);
            Ok(crate::types::PromptResponse { choice: self.response })
        }
    }

    #[tokio::test]
    async fn ask_level_is_max_of_rule_level_and_risk_derived_level() {
        // Rule fires at `ask` with level `Warning`, but the request's own
        // risk is `Low` (risk-derived level `Info`) — the prompt must see
        // the rule's higher `Warning`, not the lower risk-derived one.
        let policy = Arc::new(PolicyEngine::new(default_policy(Action::Deny, Action::Deny)));
        policy
            .set_policy(
                "exec",
                Policy {
                    name: "exec-policy".to_string(),
                    rules: vec![Rule {
                        name: "ask-warning".to_string(),
                        priority: 1,
                        condition: Condition::default(),
                        action: Action::Ask,
                        level: Level::Warning,
                    }],
                    default_action: Action::Deny,
                    batch_default_action: Action::Deny,
                    enabled: true,
                },
            )
            .await
            .expect("test");

        let prompter = Arc::new(LevelCapturingPrompter { response: Choice::Allow, seen_level: RwLock::new(None) });
        let coord = ConfirmationCoordinator::new(policy, prompter.clone(), Arc::new(InMemoryAuditStore::new()));
        coord.confirm(request("exec", OperationType::Execute, Risk::Low, false, false)).await;

        assert_eq!(*prompter.seen_level.read().await, Some(Level::Warning));
    }

    #[tokio::test]
    async fn ask_level_escalates_to_risk_when_risk_outranks_rule_level() {
        // Rule level is `Info`, but the request's risk is `Critical`
        // (risk-derived level `Danger`) — the higher of the two must win.
        let policy = Arc::new(PolicyEngine::new(default_policy(Action::Deny, Action::Deny)));
        policy
            .set_policy(
                "exec",
                Policy {
                    name: "exec-policy".to_string(),
                    rules: vec![Rule {
                        name: "ask-info".to_string(),
                        priority: 1,
                        condition: Condition::default(),
                        action: Action::Ask,
                        level: Level::Info,
                    }],
                    default_action: Action::Deny,
                    batch_default_action: Action::Deny,
                    enabled: true,
                },
            )
            .await
            .expect("test");

        let prompter = Arc::new(LevelCapturingPrompter { response: Choice::Allow, seen_level: RwLock::new(None) });
        let coord = ConfirmationCoordinator::new(policy, prompter.clone(), Arc::new(InMemoryAuditStore::new()));
        coord.confirm(request("exec", OperationType::Execute, Risk::Critical, false, false)).await;

        assert_eq!(*prompter.seen_level.read().await, Some(Level::Danger));
    }

    #[tokio::test]
    async fn rule_match_denies_specific_tool() {
        let policy = Arc::new(PolicyEngine::new(default_policy(Action::Allow, Action::Deny)));
        policy
            .set_policy(
                "dangerous-tool",
                Policy {
                    name: "dangerous-tool-policy".to_string(),
                    rules: vec![Rule {
                        name: "deny-always".to_string(),
                        priority: 1,
                        condition: Condition::default(),
                        action: Action::Deny,
                        level: Level::Danger,
                    }],
                    default_action: Action::Allow,
                    batch_default_action: Action::Deny,
                    enabled: true,
                },
            )
            .await
            .expect("test");

        let coord = ConfirmationCoordinator::new(policy, Arc::new(MockPrompter::always(Choice::Allow)), Arc::new(InMemoryAuditStore::new()));
        let (result, _) = coord.confirm(request("dangerous-tool", OperationType::Write, Risk::Low, false, false)).await;
        assert!(!result.allowed);
    }
}
