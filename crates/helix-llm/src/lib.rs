//! Provider registry, request router, and vision-switch manager (spec
//! §4.F–H): the LLM subsystem of the control plane.
//!
//! `registry` enumerates configured providers/models; `router` resolves a
//! request to a provider, gates on token budget, retries/falls back on
//! transient errors, and tracks latency; `vision` detects image content
//! and swaps to a vision-capable model under a chosen persistence mode.

mod http_provider;
mod provider;
mod registry;
mod router;
mod types;
mod vision;

pub use http_provider::HttpLlmProvider;
pub use provider::{LlmProvider, ResponseStream};
pub use registry::{same_family_fallback, ProviderRegistry};
pub use router::{LatencyPercentiles, LlmRouter};
pub use types::{
    Capabilities, ContentPart, FinishReason, GenerationParams, ImageRef, LlmRequest, LlmResponse, Message, ModelDescriptor, ProviderDescriptor, ProviderMetadata, ProviderType, Role,
    ToolCallRecord, ToolSpec, Usage,
};
pub use vision::{DetectionMethod, SwitchEvent, SwitchMode, SwitchResult, VisionSwitchConfig, VisionSwitchManager};
