//! LLM provider router (spec §4.F–§4.H).
//!
//! Every invocation registers providers fresh from CLI flags — there's no
//! persisted provider registry, so `list-providers`/`generate` both start
//! from the same one-provider bootstrap.

use std::sync::Arc;

use clap::Subcommand;
use helix_config::HelixConfig;
use helix_llm::{
    Capabilities, DetectionMethod, HttpLlmProvider, LlmRequest, LlmRouter, Message, ModelDescriptor, ProviderDescriptor,
    ProviderRegistry, ProviderType, Role, VisionSwitchConfig, VisionSwitchManager,
};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

#[derive(Subcommand)]
pub enum LlmAction {
    /// Register a provider from CLI flags and list its models.
    ListModels {
        #[arg(long)]
        provider_name: String,
        #[arg(long, env = "HELIXCODE_LLM_API_KEY")]
        api_key: String,
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        model: String,
        #[arg(long, default_value_t = 200_000)]
        context_size: u32,
        #[arg(long, default_value_t = 8192)]
        max_output_tokens: u32,
        #[arg(long, default_value_t = false)]
        vision: bool,
    },
    /// Run a single non-streaming generation request.
    Generate {
        #[arg(long)]
        provider_name: String,
        #[arg(long, env = "HELIXCODE_LLM_API_KEY")]
        api_key: String,
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        model: String,
        #[arg(long, default_value_t = 200_000)]
        context_size: u32,
        #[arg(long, default_value_t = 8192)]
        max_output_tokens: u32,
        #[arg(long)]
        prompt: String,
    },
}

fn model_descriptor(provider_name: &str, model: &str, context_size: u32, max_output_tokens: u32, vision: bool) -> ModelDescriptor {
    ModelDescriptor {
        name: model.to_string(),
        provider: provider_name.to_string(),
        context_size,
        max_output_tokens,
        capabilities: Capabilities { text: true, code: true, vision, tools: true, reasoning: false },
    }
}

async fn build_registry(
    provider_name: &str,
    api_key: &str,
    base_url: &str,
    model: ModelDescriptor,
) -> anyhow::Result<Arc<ProviderRegistry>> {
    let registry = Arc::new(ProviderRegistry::new());
    let client = Arc::new(HttpLlmProvider::new(SecretString::from(api_key.to_string()), base_url.to_string()));
    registry
        .register(
            ProviderDescriptor {
                provider_type: ProviderType("anthropic-compatible".to_string()),
                name: provider_name.to_string(),
                models: vec![model],
            },
            client,
        )
        .await;
    Ok(registry)
}

fn vision_manager(config: &HelixConfig) -> anyhow::Result<Arc<VisionSwitchManager>> {
    let detection_methods = config
        .vision
        .detection_methods
        .iter()
        .map(|s| DetectionMethod::parse(s))
        .collect::<Result<Vec<_>, _>>()?;
    let fallback = config.vision.fallback_model.clone().unwrap_or_default();
    let vision_config =
        VisionSwitchConfig::validate(&config.vision.default_mode, &config.vision.preferred_models, &fallback, detection_methods)?;
    Ok(Arc::new(VisionSwitchManager::new(vision_config)))
}

pub async fn handle_llm(action: LlmAction, config: &HelixConfig) -> anyhow::Result<()> {
    match action {
        LlmAction::ListModels { provider_name, api_key, base_url, model, context_size, max_output_tokens, vision } => {
            let descriptor = model_descriptor(&provider_name, &model, context_size, max_output_tokens, vision);
            let registry = build_registry(&provider_name, &api_key, &base_url, descriptor).await?;
            for provider in registry.list().await {
                println!("provider: {} ({})", provider.name, provider.provider_type.0);
                for model in &provider.models {
                    println!(
                        "  {}  context={}  max_output={}  vision={}",
                        model.name, model.context_size, model.max_output_tokens, model.capabilities.vision
                    );
                }
            }
            println!("healthy: {}", registry.get_health(&provider_name).await);
            Ok(())
        },
        LlmAction::Generate { provider_name, api_key, base_url, model, context_size, max_output_tokens, prompt } => {
            let descriptor = model_descriptor(&provider_name, &model, context_size, max_output_tokens, false);
            let registry = build_registry(&provider_name, &api_key, &base_url, descriptor).await?;
            let vision = vision_manager(config)?;
            let router = LlmRouter::new(registry, vision.clone());

            let request = LlmRequest::new(model, vec![Message::text(Role::User, prompt)]);
            let cancellation = CancellationToken::new();
            let response = router.generate(request, &cancellation).await?;

            println!("{}", response.text);
            println!(
                "usage: prompt={} completion={} cached={}",
                response.usage.prompt_tokens, response.usage.completion_tokens, response.usage.cached_tokens
            );
            println!("finish reason: {:?}", response.finish_reason);

            if let Some(persisted) = vision.persisted_default_model().await {
                let mut updated = config.clone();
                updated.vision.fallback_model = Some(persisted.clone());
                helix_config::save_config(&updated)?;
                println!("persisted {persisted} as the default vision model");
            }
            Ok(())
        },
    }
}
