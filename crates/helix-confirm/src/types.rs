//! Shared types for the confirmation pipeline (spec §3 *Confirmation
//! Request*/*Policy*/*Rule*/*Confirmation Result*/*Audit Entry*).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Read,
    Write,
    Delete,
    Execute,
    Network,
    Filesystem,
    Git,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub op_type: OperationType,
    pub description: String,
    pub target: String,
    pub risk: Risk,
    pub reversible: bool,
    pub preview: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub user: String,
    pub session_id: String,
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub is_ci: bool,
}

#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub tool_name: String,
    pub operation: Operation,
    pub parameters: HashMap<String, serde_json::Value>,
    pub context: ExecutionContext,
    pub batch_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Allow,
    Deny,
    Ask,
}

/// Prompt severity, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Warning,
    Danger,
}

/// A single match condition in a [`Rule`]. Match = conjunction of all
/// *non-empty* fields (spec §4.J); an empty `path_glob` always matches
/// (spec §8 boundary behavior).
#[derive(Clone, Default)]
pub struct Condition {
    pub operation_types: Vec<OperationType>,
    pub path_glob: Option<String>,
    pub risk_levels: Vec<Risk>,
    pub tool_names: Vec<String>,
    pub predicate: Option<std::sync::Arc<dyn Fn(&ConfirmationRequest) -> bool + Send + Sync>>,
}

impl Condition {
    #[must_use]
    pub fn matches(&self, request: &ConfirmationRequest) -> bool {
        if !self.operation_types.is_empty() && !self.operation_types.contains(&request.operation.op_type) {
            return false;
        }
        if let Some(pattern) = &self.path_glob {
            match glob::Pattern::new(pattern) {
                Ok(compiled) if !compiled.matches(&request.operation.target) => return false,
                Err(_) => return false,
                _ => {},
            }
        }
        if !self.risk_levels.is_empty() && !self.risk_levels.contains(&request.operation.risk) {
            return false;
        }
        if !self.tool_names.is_empty() && !self.tool_names.contains(&request.tool_name) {
            return false;
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(request) {
                return false;
            }
        }
        true
    }
}

#[derive(Clone)]
pub struct Rule {
    pub name: String,
    pub priority: i32,
    pub condition: Condition,
    pub action: Action,
    pub level: Level,
}

#[derive(Clone)]
pub struct Policy {
    pub name: String,
    pub rules: Vec<Rule>,
    pub default_action: Action,
    pub batch_default_action: Action,
    pub enabled: bool,
}

/// The policy evaluation outcome (spec §4.J *Decision*): the chosen
/// action, which rule (if any) produced it, and the severity that
/// rule carries (used alongside the risk-derived level at prompt time,
/// spec §4.M step 6).
#[derive(Debug, Clone)]
pub struct Decision {
    pub action: Action,
    pub matched_rule: Option<String>,
    pub matched_level: Level,
    pub policy_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    Allow,
    Deny,
    Always,
    Never,
    Ask,
}

#[derive(Debug, Clone)]
pub struct ConfirmationResult {
    pub allowed: bool,
    pub reason: String,
    pub choice: Choice,
    pub policy_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub audit_id: String,
}

#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub tool_name: String,
    pub operation: Operation,
    pub level: Level,
    pub assessment_dangers: Vec<String>,
    pub preview: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PromptResponse {
    pub choice: Choice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub session_id: String,
    pub conversation_id: String,
    pub tool_name: String,
    pub operation_description: String,
    pub decision: Choice,
    pub policy_name: Option<String>,
    pub rule_name: Option<String>,
    pub reason: String,
}

/// Filter fields for [`crate::audit::AuditStore::query`] (spec §4.L).
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user: Option<String>,
    pub tool: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub decision: Option<Choice>,
    pub limit: Option<usize>,
}
