//! LLM Router (spec §4.G) — the module with the deepest teacher grounding.
//!
//! Generalizes `moltis-agents::provider_chain`'s `ProviderChain` (a fixed
//! failover list with per-entry circuit breakers) into a router that
//! resolves providers dynamically through a [`ProviderRegistry`], adding
//! the token-budget gate, cache-control hints, latency percentiles, and
//! vision auto-switch the spec requires on top.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use helix_common::{Error, Result};
use helix_metrics::{counter, histogram, llm as llm_metrics};
use rand::Rng;
use tokio::sync::{Mutex, RwLock};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    provider::ResponseStream,
    registry::{same_family_fallback, ProviderRegistry},
    types::{LlmRequest, LlmResponse, Message},
    vision::VisionSwitchManager,
};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(200);
const CIRCUIT_TRIP_THRESHOLD: usize = 3;
const CIRCUIT_COOLDOWN: Duration = Duration::from_secs(60);
const LATENCY_WINDOW: usize = 256;

/// How a provider error should be handled — the spec §7 fixed kind set,
/// reusing the teacher's `ProviderErrorKind` split between "rotate to
/// fallback" and "surface immediately".
#[must_use]
fn should_retry(err: &Error) -> bool {
    err.is_retryable()
}

fn should_fallback(err: &Error) -> bool {
    matches!(err, Error::RateLimited(_) | Error::Unavailable(_) | Error::Overloaded(_))
}

/// Per-provider circuit breaker, same shape as the teacher's `ProviderState`.
struct CircuitState {
    consecutive_failures: AtomicUsize,
    last_failure: Mutex<Option<Instant>>,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            consecutive_failures: AtomicUsize::new(0),
            last_failure: Mutex::new(None),
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    async fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
        *self.last_failure.lock().await = Some(Instant::now());
    }

    async fn is_tripped(&self) -> bool {
        if self.consecutive_failures.load(Ordering::SeqCst) < CIRCUIT_TRIP_THRESHOLD {
            return false;
        }
        let mut last = self.last_failure.lock().await;
        match *last {
            Some(t) if t.elapsed() < CIRCUIT_COOLDOWN => true,
            _ => {
                *last = None;
                self.consecutive_failures.store(0, Ordering::SeqCst);
                false
            },
        }
    }
}

/// Rolling latency samples for one provider/model pair.
#[derive(Default)]
struct LatencyWindow {
    total_ms: VecDeque<u64>,
}

impl LatencyWindow {
    fn record(&mut self, total_ms: u64) {
        if self.total_ms.len() >= LATENCY_WINDOW {
            self.total_ms.pop_front();
        }
        self.total_ms.push_back(total_ms);
    }

    fn percentile(&self, p: f64) -> Option<u64> {
        if self.total_ms.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.total_ms.iter().copied().collect();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted.get(idx).copied()
    }
}

/// Latency percentiles for a provider/model pair.
#[derive(Debug, Clone, Copy)]
pub struct LatencyPercentiles {
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

/// Routes generation requests across providers: resolves the model,
/// applies the token-budget gate and cache-control hints, retries
/// transient failures with jittered backoff, falls back to the same
/// logical model family on exhaustion, and tracks latency percentiles.
pub struct LlmRouter {
    registry: Arc<ProviderRegistry>,
    vision: Arc<VisionSwitchManager>,
    circuits: RwLock<HashMap<String, Arc<CircuitState>>>,
    latencies: RwLock<HashMap<String, LatencyWindow>>,
}

impl LlmRouter {
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, vision: Arc<VisionSwitchManager>) -> Self {
        Self {
            registry,
            vision,
            circuits: RwLock::new(HashMap::new()),
            latencies: RwLock::new(HashMap::new()),
        }
    }

    async fn circuit_for(&self, provider_name: &str) -> Arc<CircuitState> {
        if let Some(state) = self.circuits.read().await.get(provider_name) {
            return state.clone();
        }
        self.circuits.write().await.entry(provider_name.to_string()).or_insert_with(|| Arc::new(CircuitState::new())).clone()
    }

    /// Resolve the model, apply the vision-switch and token-budget gates,
    /// and mark cache-control hints. Returns the possibly-rewritten
    /// request plus the resolved provider name and model name.
    async fn prepare(&self, mut request: LlmRequest) -> Result<(LlmRequest, String, String)> {
        let (mut provider_name, mut model) = self.registry.provider_for_model(&request.model).await?;

        if request.has_images() && !model.supports_vision() {
            let all_models = self.registry.list().await.into_iter().flat_map(|d| d.models).collect::<Vec<_>>();
            let switch = self.vision.process_input(&request, &model, &all_models).await;
            if let Some(target_name) = switch.to_model {
                request.model = target_name.clone();
                let (p, m) = self.registry.provider_for_model(&target_name).await?;
                provider_name = p;
                model = m;
            }
        }

        let prompt_tokens = approximate_prompt_tokens(&request.messages);
        if prompt_tokens + request.params.max_tokens > model.context_size {
            return Err(Error::ContextTooLong(format!(
                "prompt {} + max_tokens {} exceeds context size {} for model {}",
                prompt_tokens, request.params.max_tokens, model.context_size, model.name
            )));
        }

        apply_cache_control(&mut request);

        Ok((request, provider_name, model.name))
    }

    /// `Generate(ctx, request) → response` (spec §4.G).
    pub async fn generate(&self, request: LlmRequest, cancellation: &CancellationToken) -> Result<LlmResponse> {
        let (prepared, provider_name, model_name) = self.prepare(request).await?;
        self.generate_with_retry(prepared, &provider_name, &model_name, cancellation).await
    }

    async fn generate_with_retry(&self, request: LlmRequest, provider_name: &str, model_name: &str, cancellation: &CancellationToken) -> Result<LlmResponse> {
        let mut current_provider = provider_name.to_string();
        let mut attempt = 0u32;

        loop {
            if cancellation.is_cancelled() {
                return Err(Error::Cancelled(format!("request {}", request.id)));
            }

            let circuit = self.circuit_for(&current_provider).await;
            if circuit.is_tripped().await {
                if let Some(fallback) = same_family_fallback(&self.registry, &current_provider, model_name).await {
                    current_provider = fallback.provider;
                    continue;
                }
                return Err(Error::Unavailable(format!("provider {current_provider} circuit open, no fallback available")));
            }

            let client = self.registry.client_for(&current_provider).await?;
            let started = Instant::now();
            counter!(llm_metrics::COMPLETIONS_TOTAL).increment(1);

            match client.generate(&request).await {
                Ok(response) => {
                    circuit.record_success();
                    self.record_latency(&current_provider, &request.model, started.elapsed()).await;
                    return Ok(response);
                },
                Err(err) => {
                    circuit.record_failure().await;
                    counter!(llm_metrics::COMPLETION_ERRORS_TOTAL).increment(1);

                    if !should_retry(&err) {
                        return Err(err);
                    }

                    if attempt < MAX_RETRY_ATTEMPTS {
                        attempt += 1;
                        let delay = jittered_backoff(attempt);
                        warn!(provider = %current_provider, attempt, error = %err, "generation failed, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if should_fallback(&err) {
                        if let Some(fallback) = same_family_fallback(&self.registry, &current_provider, model_name).await {
                            counter!(llm_metrics::FAILOVERS_TOTAL).increment(1);
                            current_provider = fallback.provider;
                            attempt = 0;
                            continue;
                        }
                    }

                    return Err(err);
                },
            }
        }
    }

    /// `GenerateStream(ctx, request, sink)` (spec §4.G): the final frame
    /// always carries `finish_reason`/`usage`, enforced here by only
    /// forwarding further frames from the provider while the previous one
    /// had `finish_reason.is_none()`.
    pub async fn generate_stream(&self, request: LlmRequest, cancellation: CancellationToken) -> Result<ResponseStream> {
        let (prepared, provider_name, _model_name) = self.prepare(request).await?;
        let client = self.registry.client_for(&provider_name).await?;
        let upstream = client.generate_stream(prepared);

        let gated = upstream.take_while(move |frame| !cancellation.is_cancelled() || frame.is_final());
        Ok(Box::pin(terminate_after_final(gated)))
    }

    async fn record_latency(&self, provider_name: &str, model_name: &str, elapsed: Duration) {
        let key = format!("{provider_name}:{model_name}");
        let total_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        histogram!(llm_metrics::COMPLETION_DURATION_SECONDS).record(elapsed.as_secs_f64());
        self.latencies.write().await.entry(key).or_default().record(total_ms);
    }

    pub async fn latency_percentiles(&self, provider_name: &str, model_name: &str) -> LatencyPercentiles {
        let key = format!("{provider_name}:{model_name}");
        let latencies = self.latencies.read().await;
        let Some(window) = latencies.get(&key) else {
            return LatencyPercentiles {
                p50_ms: None,
                p95_ms: None,
                p99_ms: None,
            };
        };
        LatencyPercentiles {
            p50_ms: window.percentile(0.50),
            p95_ms: window.percentile(0.95),
            p99_ms: window.percentile(0.99),
        }
    }
}

/// Stop forwarding stream items once a final frame (`finish_reason.is_some()`)
/// has been seen, guaranteeing exactly one terminal frame downstream.
fn terminate_after_final(mut stream: impl tokio_stream::Stream<Item = LlmResponse> + Unpin + Send + 'static) -> impl tokio_stream::Stream<Item = LlmResponse> + Send + 'static {
    async_stream::stream! {
        while let Some(item) = stream.next().await {
            let is_final = item.is_final();
            yield item;
            if is_final {
                break;
            }
        }
    }
}

/// Cheap token-count approximation (chars / 4), used only for the
/// token-budget gate — never billed against.
fn approximate_prompt_tokens(messages: &[Message]) -> u32 {
    let chars: usize = messages
        .iter()
        .flat_map(|m| &m.content)
        .map(|part| match part {
            crate::types::ContentPart::Text { text } => text.len(),
            crate::types::ContentPart::Image { .. } => 1024,
        })
        .sum();
    u32::try_from(chars / 4).unwrap_or(u32::MAX)
}

/// Mark the system message and the last tool spec as cache-control hints
/// (spec §4.G step 3).
fn apply_cache_control(request: &mut LlmRequest) {
    if let Some(system) = request.messages.iter_mut().find(|m| matches!(m.role, crate::types::Role::System)) {
        system.cache_control = true;
    }
    if let Some(last) = request.messages.last_mut() {
        last.cache_control = true;
    }
}

fn jittered_backoff(attempt: u32) -> Duration {
    let base_ms = RETRY_BASE.as_millis() as u64 * u64::from(2u32.saturating_pow(attempt));
    let jitter_ms = rand::rng().random_range(0..=base_ms / 2);
    Duration::from_millis(base_ms + jitter_ms)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        provider::LlmProvider,
        types::{Capabilities, ModelDescriptor, ProviderDescriptor, ProviderType, Role},
        vision::{VisionSwitchConfig, VisionSwitchManager},
    };

    struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<LlmResponse>>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
            let mut responses = self.responses.lock().await;
            responses.pop_front().unwrap_or_else(|| Ok(LlmResponse::delta(request.id.clone(), "fallback-default")))
        }

        fn generate_stream(&self, _request: LlmRequest) -> ResponseStream {
            Box::pin(tokio_stream::empty())
        }
    }

    async fn registry_with(provider: &str, model_name: &str, context_size: u32, vision: bool, client: Arc<dyn LlmProvider>) -> Arc<ProviderRegistry> {
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .register(
                ProviderDescriptor {
                    provider_type: ProviderType(provider.to_string()),
                    name: provider.to_string(),
                    models: vec![ModelDescriptor {
                        name: model_name.to_string(),
                        provider: provider.to_string(),
                        context_size,
                        max_output_tokens: 4096,
                        capabilities: Capabilities {
                            text: true,
                            vision,
                            ..Default::default()
                        },
                    }],
                },
                client,
            )
            .await;
        registry
    }

    fn vision_manager() -> Arc<VisionSwitchManager> {
        Arc::new(VisionSwitchManager::new(
            VisionSwitchConfig::validate("session", &[], "vision-fallback", vec![crate::vision::DetectionMethod::MimeOrExtension]).expect("test"),
        ))
    }

    #[tokio::test]
    async fn token_budget_rejects_oversized_prompt_before_dispatch() {
        let client: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            responses: Mutex::new(VecDeque::new()),
        });
        let registry = registry_with("p", "small-model", 10, false, client).await;
        let router = LlmRouter::new(registry, vision_manager());

        let mut request = LlmRequest::new("small-model", vec![Message::text(Role::User, "x".repeat(1000))]);
        request.params.max_tokens = 100;

        let err = router.generate(request, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::ContextTooLong(_)));
    }

    #[tokio::test]
    async fn retries_rate_limited_then_succeeds() {
        let client: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            responses: Mutex::new(VecDeque::from(vec![Err(Error::RateLimited("slow down".into())), Ok(LlmResponse::delta("r", "ok"))])),
        });
        let registry = registry_with("p", "model", 100_000, false, client).await;
        let router = LlmRouter::new(registry, vision_manager());

        let request = LlmRequest::new("model", vec![Message::text(Role::User, "hi")]);
        let response = router.generate(request, &CancellationToken::new()).await.expect("test");
        assert_eq!(response.text.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn invalid_request_never_retries() {
        let client: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            responses: Mutex::new(VecDeque::from(vec![Err(Error::InvalidArgument("bad json".into()))])),
        });
        let registry = registry_with("p", "model", 100_000, false, client).await;
        let router = LlmRouter::new(registry, vision_manager());

        let request = LlmRequest::new("model", vec![Message::text(Role::User, "hi")]);
        let err = router.generate(request, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn cache_control_marks_system_and_last_message() {
        let client: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            responses: Mutex::new(VecDeque::from(vec![Ok(LlmResponse::delta("r", "ok"))])),
        });
        let registry = registry_with("p", "model", 100_000, false, client).await;
        let router = LlmRouter::new(registry, vision_manager());

        let request = LlmRequest::new("model", vec![Message::text(Role::System, "be nice"), Message::text(Role::User, "hi")]);
        let (prepared, _, _) = router.prepare(request).await.expect("test");
        assert!(prepared.messages[0].cache_control);
        assert!(prepared.messages[1].cache_control);
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let client: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
            responses: Mutex::new(VecDeque::new()),
        });
        let registry = registry_with("p", "model", 100_000, false, client).await;
        let router = LlmRouter::new(registry, vision_manager());
        let token = CancellationToken::new();
        token.cancel();

        let request = LlmRequest::new("model", vec![Message::text(Role::User, "hi")]);
        let err = router.generate(request, &token).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }
}
