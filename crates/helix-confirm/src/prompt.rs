//! Prompt Manager (spec §4.K): the external "Prompter port" (spec §6)
//! that renders a prompt request and solicits a choice.
//!
//! Mirrors the teacher's narrow-port style (`service-traits`'s
//! `NoopAgentService`/`NoopSessionService`): a `Noop` implementation that
//! fails explicitly rather than panicking when no interactive UI is wired
//! up, and a canned-response mock for tests.

use async_trait::async_trait;
use helix_common::{Error, Result};

use crate::types::{Choice, PromptRequest, PromptResponse};

#[async_trait]
pub trait Prompter: Send + Sync {
    async fn prompt(&self, request: PromptRequest) -> Result<PromptResponse>;
}

/// Always denies — used when no interactive UI is configured. Explicit
/// failure, not a default-allow, since an unconfigured prompter must never
/// silently approve a dangerous operation.
pub struct NoopPrompter;

#[async_trait]
impl Prompter for NoopPrompter {
    async fn prompt(&self, _request: PromptRequest) -> Result<PromptResponse> {
        Err(Error::Unavailable("prompter not configured".to_string()))
    }
}

/// Returns a fixed, pre-configured response. For tests.
pub struct MockPrompter {
    pub response: Choice,
}

impl MockPrompter {
    #[must_use]
    pub fn always(choice: Choice) -> Self {
        Self { response: choice }
    }
}

#[async_trait]
impl Prompter for MockPrompter {
    async fn prompt(&self, _request: PromptRequest) -> Result<PromptResponse> {
        Ok(PromptResponse { choice: self.response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Level, Operation, OperationType, Risk};

    fn request() -> PromptRequest {
        PromptRequest {
            tool_name: "exec".to_string(),
            operation: Operation {
                op_type: OperationType::Execute,
                description: "run tests".to_string(),
                target: "n/a".to_string(),
                risk: Risk::Low,
                reversible: true,
                preview: None,
            },
            level: Level::Info,
            assessment_dangers: Vec::new(),
            preview: None,
        }
    }

    #[tokio::test]
    async fn noop_prompter_fails_rather_than_allowing() {
        let prompter = NoopPrompter;
        let err = prompter.prompt(request()).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[tokio::test]
    async fn mock_prompter_returns_canned_response() {
        let prompter = MockPrompter::always(Choice::Always);
        let response = prompter.prompt(request()).await.expect("test");
        assert_eq!(response.choice, Choice::Always);
    }
}
