//! Uniform request/response contract (spec §3 *LLM Request*/*LLM Response*,
//! §9 "heterogeneous message parts"): a tagged content-part union kept at
//! the abstract core layer, generalized from the teacher's
//! `OpenAiContent`/`AnthropicContent` enums (`moltis-agents::multimodal`).
//! Vendor-specific wire shapes live only in a provider adapter, never here.

use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A reference to an image, either inline or by URL. Never carries decoded
/// pixel data — that is a provider-adapter concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRef {
    pub media_type: String,
    pub data_base64: Option<String>,
    pub url: Option<String>,
}

/// One piece of message content: text or an image reference. The
/// abstract analogue of the teacher's `OpenAiContent`/`AnthropicContent`
/// tagged unions, generalized so the router never needs to know which
/// vendor it's about to call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { image: ImageRef },
}

impl ContentPart {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    #[must_use]
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }
}

/// A single turn in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    /// Set by the router (step 3/4 of §4.G) to hint the provider this
    /// message is stable across turns and worth caching.
    pub cache_control: bool,
}

impl Message {
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
            cache_control: false,
        }
    }

    #[must_use]
    pub fn has_images(&self) -> bool {
        self.content.iter().any(ContentPart::is_image)
    }
}

/// An abstract tool/function specification offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    pub stream: bool,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: None,
            top_p: None,
            stop: Vec::new(),
            stream: false,
        }
    }
}

/// A request to generate a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub id: String,
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub params: GenerationParams,
}

impl LlmRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model: model.into(),
            messages,
            tools: Vec::new(),
            params: GenerationParams::default(),
        }
    }

    #[must_use]
    pub fn has_images(&self) -> bool {
        self.messages.iter().any(Message::has_images)
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    ToolCalls,
    ContentFilter,
    Cancelled,
}

/// Token accounting for a single exchange.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cached_tokens: u32,
}

impl Usage {
    #[must_use]
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A tool invocation emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Per-request latency/throughput metadata attached to a response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub first_token_ms: Option<u64>,
    pub total_ms: u64,
    pub tokens_per_second: Option<f64>,
}

/// A full (non-streaming) or final-frame (streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub id: String,
    pub request_id: String,
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Usage,
    pub metadata: ProviderMetadata,
}

impl LlmResponse {
    #[must_use]
    pub fn delta(request_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            text: Some(text.into()),
            tool_calls: Vec::new(),
            finish_reason: None,
            usage: Usage::default(),
            metadata: ProviderMetadata::default(),
        }
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Model capability flags (spec §3 *Provider*: `text`, `code`, `vision`,
/// `tools`, `reasoning`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub text: bool,
    pub code: bool,
    pub vision: bool,
    pub tools: bool,
    pub reasoning: bool,
}

/// Static description of a model a provider serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub provider: String,
    pub context_size: u32,
    pub max_output_tokens: u32,
    pub capabilities: Capabilities,
}

impl ModelDescriptor {
    #[must_use]
    pub fn supports_vision(&self) -> bool {
        self.capabilities.vision
    }
}

/// Provider kind, used to group models into logical families for fallback
/// (spec §4.G step 6: "Pro → Flash").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderType(pub String);

/// Static description of a provider and the models it serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub provider_type: ProviderType,
    pub name: String,
    pub models: Vec<ModelDescriptor>,
}
