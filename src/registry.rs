//! Provider registry: lifecycle of all built providers

use crate::error::{EventError, Result};
use crate::provider::Provider;
use crate::types::ProviderType;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Built providers keyed by backend and id
///
/// Started once at gateway start and shut down once at gateway stop.
/// Shutdown empties the registry.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<BTreeMap<(ProviderType, String), Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider; ids are unique per backend
    pub async fn register(&self, provider: Arc<dyn Provider>) -> Result<()> {
        let key = (provider.type_id(), provider.id().to_string());
        let mut providers = self.providers.write().await;
        if providers.contains_key(&key) {
            return Err(EventError::Config(format!(
                "{} provider \"{}\" is already registered",
                key.0, key.1
            )));
        }
        providers.insert(key, provider);
        Ok(())
    }

    pub async fn register_all(
        &self,
        providers: impl IntoIterator<Item = Arc<dyn Provider>>,
    ) -> Result<()> {
        for provider in providers {
            self.register(provider).await?;
        }
        Ok(())
    }

    pub async fn get(&self, provider_type: ProviderType, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .read()
            .await
            .get(&(provider_type, id.to_string()))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }

    /// Start every provider; the first failure aborts
    pub async fn startup_all(&self) -> Result<()> {
        let providers: Vec<Arc<dyn Provider>> =
            self.providers.read().await.values().cloned().collect();

        for provider in providers {
            provider.startup().await.map_err(|e| {
                tracing::error!(
                    provider_id = provider.id(),
                    provider_type = %provider.type_id(),
                    error = %e,
                    "Provider startup failed"
                );
                e
            })?;
        }
        Ok(())
    }

    /// Shut every provider down, returning the first failure
    pub async fn shutdown_all(&self) -> Result<()> {
        let providers = std::mem::take(&mut *self.providers.write().await);

        let mut first_error = None;
        for provider in providers.into_values() {
            if let Err(e) = provider.shutdown().await {
                tracing::error!(
                    provider_id = provider.id(),
                    provider_type = %provider.type_id(),
                    error = %e,
                    "Provider shutdown failed"
                );
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
