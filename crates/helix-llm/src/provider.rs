//! Abstract provider contract (spec §4.G), generalized from the teacher's
//! `LlmProvider` trait (`moltis-agents::model`): `complete`/`stream` become
//! `generate`/`generate_stream` over the crate's own request/response
//! types instead of raw `serde_json::Value` messages.

use std::pin::Pin;

use async_trait::async_trait;
use helix_common::Result;
use tokio_stream::Stream;

use crate::types::{LlmRequest, LlmResponse};

pub type ResponseStream = Pin<Box<dyn Stream<Item = LlmResponse> + Send>>;

/// An LLM backend (Anthropic, OpenAI, Gemini, a local model server, ...).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse>;

    fn generate_stream(&self, request: LlmRequest) -> ResponseStream;

    /// Cheap liveness probe used by [`crate::registry::ProviderRegistry::get_health`].
    /// Default implementation assumes healthy; real adapters should issue a
    /// minimal test generation.
    async fn health_check(&self) -> bool {
        true
    }
}
