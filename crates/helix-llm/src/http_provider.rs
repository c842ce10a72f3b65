//! A minimal HTTP provider adapter (spec §9: "the adapters here are test
//! doubles / a minimal HTTP adapter, not full vendor SDKs") proving the
//! router contract against a real wire call, grounded in the teacher's
//! `AnthropicProvider` (`moltis-agents::providers::anthropic`): same
//! request shape (`model`/`max_tokens`/`system`/`messages`), same
//! `x-api-key`/`anthropic-version` headers, same HTTP-status-to-error
//! mapping.

use std::pin::Pin;

use async_trait::async_trait;
use helix_common::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use tokio_stream::Stream;

use crate::{
    provider::{LlmProvider, ResponseStream},
    types::{ContentPart, FinishReason, LlmRequest, LlmResponse, Role, ToolCallRecord, Usage},
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Talks to an Anthropic-Messages-compatible endpoint. Non-streaming only:
/// `generate_stream` wraps the single completion in a one-frame stream
/// rather than parsing the vendor's SSE format, which is out of scope for
/// this minimal adapter.
pub struct HttpLlmProvider {
    api_key: SecretString,
    base_url: String,
    client: reqwest::Client,
}

impl HttpLlmProvider {
    #[must_use]
    pub fn new(api_key: SecretString, base_url: impl Into<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn to_wire_messages(request: &LlmRequest) -> (Option<String>, Vec<serde_json::Value>) {
        let mut system_text: Option<String> = None;
        let mut out = Vec::new();

        for message in &request.messages {
            if message.role == Role::System {
                let text = message
                    .content
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text { text } => Some(text.as_str()),
                        ContentPart::Image { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                system_text = Some(match system_text {
                    Some(existing) => format!("{existing}\n\n{text}"),
                    None => text,
                });
                continue;
            }

            let role = match message.role {
                Role::User | Role::Tool => "user",
                Role::Assistant => "assistant",
                Role::System => unreachable!("handled above"),
            };
            let blocks: Vec<serde_json::Value> = message
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => serde_json::json!({"type": "text", "text": text}),
                    ContentPart::Image { image } => serde_json::json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": image.media_type,
                            "data": image.data_base64.clone().unwrap_or_default(),
                        },
                    }),
                })
                .collect();
            out.push(serde_json::json!({"role": role, "content": blocks}));
        }

        (system_text, out)
    }

    fn map_status_error(status: reqwest::StatusCode, body: &str) -> Error {
        match status.as_u16() {
            401 | 403 => Error::Unauthorized(format!("HTTP {status}: {body}")),
            429 => Error::RateLimited(format!("HTTP {status}: {body}")),
            503 => Error::Unavailable(format!("HTTP {status}: {body}")),
            500..=599 => Error::Overloaded(format!("HTTP {status}: {body}")),
            _ => Error::InvalidArgument(format!("HTTP {status}: {body}")),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let (system, messages) = Self::to_wire_messages(request);
        let mut body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.params.max_tokens,
            "messages": messages,
        });
        if let Some(system) = system {
            body["system"] = serde_json::Value::String(system);
        }
        if let Some(temperature) = request.params.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        let http_response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("request to {}: {e}", self.base_url)))?;

        let status = http_response.status();
        if !status.is_success() {
            let text = http_response.text().await.unwrap_or_default();
            return Err(Self::map_status_error(status, &text));
        }

        let parsed: serde_json::Value = http_response.json().await.map_err(|e| Error::message(format!("decoding response: {e}")))?;

        let content = parsed["content"].as_array().cloned().unwrap_or_default();
        let text = content
            .iter()
            .filter_map(|block| {
                if block["type"].as_str() == Some("text") {
                    block["text"].as_str().map(ToString::to_string)
                } else {
                    None
                }
            })
            .reduce(|a, b| a + &b);

        let tool_calls = content
            .iter()
            .filter(|block| block["type"].as_str() == Some("tool_use"))
            .map(|block| ToolCallRecord {
                id: block["id"].as_str().unwrap_or_default().to_string(),
                name: block["name"].as_str().unwrap_or_default().to_string(),
                arguments: block["input"].clone(),
            })
            .collect();

        let finish_reason = match parsed["stop_reason"].as_str() {
            Some("tool_use") => Some(FinishReason::ToolCalls),
            Some("max_tokens") => Some(FinishReason::MaxTokens),
            Some(_) => Some(FinishReason::Stop),
            None => Some(FinishReason::Stop),
        };

        Ok(LlmResponse {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            text,
            tool_calls,
            finish_reason,
            usage: Usage {
                prompt_tokens: parsed["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: parsed["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
                cached_tokens: parsed["usage"]["cache_read_input_tokens"].as_u64().unwrap_or(0) as u32,
            },
            metadata: crate::types::ProviderMetadata::default(),
        })
    }

    fn generate_stream(&self, request: LlmRequest) -> ResponseStream {
        let api_key = self.api_key.clone();
        let base_url = self.base_url.clone();
        let client = self.client.clone();
        Box::pin(async_stream::stream! {
            let provider = HttpLlmProvider { api_key, base_url, client };
            match provider.generate(&request).await {
                Ok(response) => yield response,
                Err(e) => {
                    tracing::warn!(error = %e, "http provider stream fell back to an error frame");
                    yield LlmResponse {
                        id: uuid::Uuid::new_v4().to_string(),
                        request_id: request.id,
                        text: None,
                        tool_calls: Vec::new(),
                        finish_reason: Some(FinishReason::Stop),
                        usage: Usage::default(),
                        metadata: crate::types::ProviderMetadata::default(),
                    }
                },
            }
        })
    }

    async fn health_check(&self) -> bool {
        let probe = LlmRequest::new("health-check", vec![crate::types::Message::text(Role::User, "ping")]);
        self.generate(&probe).await.is_ok()
    }
}

#[allow(dead_code)]
fn _assert_stream_item_is_send(_: &dyn Stream<Item = LlmResponse>) {}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::types::{GenerationParams, Message};

    fn request() -> LlmRequest {
        LlmRequest {
            id: "req-1".to_string(),
            model: "claude-3".to_string(),
            messages: vec![Message::text(Role::User, "hi")],
            tools: Vec::new(),
            params: GenerationParams::default(),
        }
    }

    #[tokio::test]
    async fn generate_parses_text_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "content": [{"type": "text", "text": "hello there"}],
                    "stop_reason": "end_turn",
                    "usage": {"input_tokens": 12, "output_tokens": 4},
                })
                .to_string(),
            )
            .create_async()
            .await;

        let provider = HttpLlmProvider::new(SecretString::from("test-key".to_string()), server.url());
        let response = provider.generate(&request()).await.expect("generate");

        mock.assert_async().await;
        assert_eq!(response.text.as_deref(), Some("hello there"));
        assert_eq!(response.usage.prompt_tokens, 12);
        assert_eq!(response.usage.completion_tokens, 4);
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn generate_maps_429_to_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/v1/messages").with_status(429).with_body("slow down").create_async().await;

        let provider = HttpLlmProvider::new(SecretString::from("test-key".to_string()), server.url());
        let err = provider.generate(&request()).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));
    }

    #[tokio::test]
    async fn generate_maps_401_to_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/v1/messages").with_status(401).with_body("bad key").create_async().await;

        let provider = HttpLlmProvider::new(SecretString::from("test-key".to_string()), server.url());
        let err = provider.generate(&request()).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn generate_maps_503_to_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/v1/messages").with_status(503).with_body("down").create_async().await;

        let provider = HttpLlmProvider::new(SecretString::from("test-key".to_string()), server.url());
        let err = provider.generate(&request()).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[tokio::test]
    async fn generate_parses_tool_use_blocks() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "content": [{"type": "tool_use", "id": "t1", "name": "search", "input": {"q": "rust"}}],
                    "stop_reason": "tool_use",
                    "usage": {"input_tokens": 5, "output_tokens": 2},
                })
                .to_string(),
            )
            .create_async()
            .await;

        let provider = HttpLlmProvider::new(SecretString::from("test-key".to_string()), server.url());
        let response = provider.generate(&request()).await.expect("generate");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "search");
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn health_check_reflects_call_success() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(serde_json::json!({"content": [], "stop_reason": "end_turn", "usage": {}}).to_string())
            .create_async()
            .await;

        let provider = HttpLlmProvider::new(SecretString::from("test-key".to_string()), server.url());
        assert!(provider.health_check().await);
    }
}
