//! Tool-execution confirmation pipeline (spec §4.I–§4.M).

use std::collections::HashMap;

use clap::Subcommand;
use chrono::Utc;
use helix_config::HelixConfig;
use helix_confirm::{
    Action, AuditFilter, AuditStore, ConfirmationCoordinator, ConfirmationRequest, ExecutionContext, JsonlAuditStore, Operation,
    OperationType, Policy, PolicyEngine, Risk, Rule,
};
use std::sync::Arc;

use crate::terminal_prompter::TerminalPrompter;

#[derive(Subcommand)]
pub enum ConfirmAction {
    /// Run a single confirmation request through the full pipeline:
    /// danger detection, policy evaluation, and (if the policy asks) an
    /// interactive prompt, ending with an audit entry.
    Ask {
        /// Name of the tool requesting the operation.
        #[arg(long)]
        tool_name: String,
        /// What kind of operation this is.
        #[arg(long, value_enum)]
        op_type: OpTypeArg,
        /// Human-readable description shown in the prompt and audit log.
        #[arg(long)]
        description: String,
        /// File path, URL, or other target the operation acts on.
        #[arg(long)]
        target: String,
        /// Whether the operation can be undone.
        #[arg(long, default_value_t = false)]
        reversible: bool,
        /// Optional preview text (e.g. a diff) shown before confirming.
        #[arg(long)]
        preview: Option<String>,
        #[arg(long, default_value_t = false)]
        batch_mode: bool,
        #[arg(long, default_value_t = false)]
        is_ci: bool,
        /// Disable confirmation entirely (every request is allowed).
        #[arg(long, default_value_t = false)]
        disabled: bool,
        /// Path to the JSONL audit log (defaults to the config value).
        #[arg(long)]
        audit_log_path: Option<String>,
    },
    /// Query the JSONL audit log.
    QueryAudit {
        #[arg(long)]
        audit_log_path: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        tool: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Clone, clap::ValueEnum)]
pub enum OpTypeArg {
    Read,
    Write,
    Delete,
    Execute,
    Network,
    Filesystem,
    Git,
}

impl From<OpTypeArg> for OperationType {
    fn from(value: OpTypeArg) -> Self {
        match value {
            OpTypeArg::Read => Self::Read,
            OpTypeArg::Write => Self::Write,
            OpTypeArg::Delete => Self::Delete,
            OpTypeArg::Execute => Self::Execute,
            OpTypeArg::Network => Self::Network,
            OpTypeArg::Filesystem => Self::Filesystem,
            OpTypeArg::Git => Self::Git,
        }
    }
}

/// The engine's built-in default policy when no per-tool policy has been
/// registered: ask about anything medium-risk or above, allow the rest.
fn default_policy() -> Policy {
    Policy {
        name: "default".to_string(),
        rules: vec![Rule {
            name: "ask-above-low-risk".to_string(),
            priority: 0,
            condition: helix_confirm::Condition {
                risk_levels: vec![Risk::Medium, Risk::High, Risk::Critical],
                ..Default::default()
            },
            action: Action::Ask,
            level: helix_confirm::Level::Warning,
        }],
        default_action: Action::Allow,
        batch_default_action: Action::Deny,
        enabled: true,
    }
}

pub async fn handle_confirm(action: ConfirmAction, config: &HelixConfig) -> anyhow::Result<()> {
    match action {
        ConfirmAction::Ask {
            tool_name,
            op_type,
            description,
            target,
            reversible,
            preview,
            batch_mode,
            is_ci,
            disabled,
            audit_log_path,
        } => {
            let audit_path = audit_log_path.unwrap_or_else(|| config.confirm.audit_log_path.clone());
            let audit = Arc::new(JsonlAuditStore::open(audit_path)?);
            let policy = Arc::new(PolicyEngine::new(default_policy()));
            let prompter = Arc::new(TerminalPrompter);
            let coordinator = ConfirmationCoordinator::new(policy, prompter, audit);

            coordinator.set_enabled(!disabled).await;
            coordinator.set_batch_mode(config.confirm.batch_mode).await;

            let request = ConfirmationRequest {
                tool_name,
                operation: Operation {
                    op_type: op_type.into(),
                    description,
                    target,
                    risk: Risk::Medium,
                    reversible,
                    preview,
                },
                parameters: HashMap::new(),
                context: ExecutionContext {
                    user: whoami(),
                    session_id: uuid::Uuid::new_v4().to_string(),
                    conversation_id: uuid::Uuid::new_v4().to_string(),
                    timestamp: Utc::now(),
                    is_ci,
                },
                batch_mode,
            };

            let (result, audit_err) = coordinator.confirm(request).await;
            println!("allowed: {}", result.allowed);
            println!("choice: {:?}", result.choice);
            println!("reason: {}", result.reason);
            println!("audit id: {}", result.audit_id);
            if let Some(err) = audit_err {
                eprintln!("warning: failed to persist audit entry: {err}");
            }
            Ok(())
        },
        ConfirmAction::QueryAudit { audit_log_path, user, tool, limit } => {
            let audit_path = audit_log_path.unwrap_or_else(|| config.confirm.audit_log_path.clone());
            let store = JsonlAuditStore::open(audit_path)?;
            let entries = store
                .query(AuditFilter { user, tool, start_time: None, end_time: None, decision: None, limit })
                .await?;
            if entries.is_empty() {
                println!("no matching audit entries");
                return Ok(());
            }
            for entry in entries {
                println!(
                    "{}  {}  {:<8?}  {:<20}  {}",
                    entry.timestamp.to_rfc3339(),
                    entry.id,
                    entry.decision,
                    entry.tool_name,
                    entry.reason
                );
            }
            Ok(())
        },
    }
}

fn whoami() -> String {
    std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_else(|_| "unknown".to_string())
}
