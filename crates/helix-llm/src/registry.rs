//! Provider registry (spec §4.F): enumerate configured providers/models and
//! report cheap (sync) and expensive (async) availability.
//!
//! Grounded in the teacher's split between `LlmProvider::supports_tools()`
//! (cheap, synchronous capability check) and `complete()` (expensive,
//! network round-trip) — generalized here from "does this one provider
//! support X" to "enumerate every configured provider/model and tell me
//! which ones are healthy".

use std::{collections::HashMap, sync::Arc};

use helix_common::{Error, Result};
use tokio::sync::RwLock;

use crate::{
    provider::LlmProvider,
    types::{ModelDescriptor, ProviderDescriptor, ProviderType},
};

/// A registered provider: its static description plus the live client used
/// to issue requests.
struct RegistryEntry {
    descriptor: ProviderDescriptor,
    client: Arc<dyn LlmProvider>,
    /// Cached from the last `get_health` call; `is_available` reads this
    /// without making a call of its own.
    last_known_healthy: bool,
}

/// Enumerates every configured provider and the models it serves.
pub struct ProviderRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a provider. Starts out optimistically marked healthy;
    /// `get_health` is what actually exercises the client.
    pub async fn register(&self, descriptor: ProviderDescriptor, client: Arc<dyn LlmProvider>) {
        let name = descriptor.name.clone();
        self.entries.write().await.insert(
            name,
            RegistryEntry {
                descriptor,
                client,
                last_known_healthy: true,
            },
        );
    }

    pub async fn list(&self) -> Vec<ProviderDescriptor> {
        self.entries.read().await.values().map(|e| e.descriptor.clone()).collect()
    }

    pub async fn get_by_type(&self, provider_type: &ProviderType) -> Vec<ProviderDescriptor> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| &e.descriptor.provider_type == provider_type)
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Find a model by name across all registered providers.
    pub async fn find_model(&self, name: &str) -> Option<ModelDescriptor> {
        self.entries
            .read()
            .await
            .values()
            .flat_map(|e| e.descriptor.models.iter())
            .find(|m| m.name == name)
            .cloned()
    }

    pub async fn list_models_with_capability(&self, cap: impl Fn(&ModelDescriptor) -> bool) -> Vec<ModelDescriptor> {
        self.entries
            .read()
            .await
            .values()
            .flat_map(|e| e.descriptor.models.iter())
            .filter(|m| cap(m))
            .cloned()
            .collect()
    }

    pub(crate) async fn client_for(&self, provider_name: &str) -> Result<Arc<dyn LlmProvider>> {
        self.entries
            .read()
            .await
            .get(provider_name)
            .map(|e| e.client.clone())
            .ok_or_else(|| Error::NotFound(format!("provider {provider_name}")))
    }

    pub(crate) async fn provider_for_model(&self, model_name: &str) -> Result<(String, ModelDescriptor)> {
        self.entries
            .read()
            .await
            .iter()
            .find_map(|(name, e)| e.descriptor.models.iter().find(|m| m.name == model_name).map(|m| (name.clone(), m.clone())))
            .ok_or_else(|| Error::NotFound(format!("model {model_name}")))
    }

    /// Cheap, synchronous-in-spirit availability check: the last health
    /// snapshot, not a live call.
    pub async fn is_available(&self, provider_name: &str) -> bool {
        self.entries
            .read()
            .await
            .get(provider_name)
            .is_some_and(|e| e.last_known_healthy)
    }

    /// Exercise the provider with a minimal test generation and cache the
    /// result for subsequent `is_available` calls.
    pub async fn get_health(&self, provider_name: &str) -> bool {
        let client = {
            let entries = self.entries.read().await;
            match entries.get(provider_name) {
                Some(e) => e.client.clone(),
                None => return false,
            }
        };
        let healthy = client.health_check().await;
        if let Some(entry) = self.entries.write().await.get_mut(provider_name) {
            entry.last_known_healthy = healthy;
        }
        healthy
    }
}

/// Same-family fallback: pick the next model offered by the same provider
/// as `model_name`, preferring a smaller/cheaper model (spec §4.G step 6's
/// "Pro → Flash" example).
pub async fn same_family_fallback(registry: &ProviderRegistry, provider_name: &str, model_name: &str) -> Option<ModelDescriptor> {
    let descriptors = registry.get_by_type(&ProviderType(provider_name.to_string())).await;
    descriptors
        .into_iter()
        .flat_map(|d| d.models)
        .filter(|m| m.name != model_name)
        .min_by_key(|m| m.context_size)
}
