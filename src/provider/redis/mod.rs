//! Redis pub/sub provider

mod client;
mod factory;

pub use client::RedisAdapter;
pub use factory::RedisEngineDataSourceFactory;

use crate::builder::ProviderBuilder;
use crate::config::RedisEventSource;
use crate::datasource::{write_unique_request_id, EngineDataSourceFactory, EnvelopeEvent};
use crate::error::{EventError, Result};
use crate::hooks::Hooks;
use crate::provider::{EventConfiguration, Provider, PubSubProvider, PublishEventConfiguration};
use crate::types::{EventMetadata, ProviderType, RedisEventConfiguration, StreamEvent};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex};

/// Rendered input of a Redis publish field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisPublishConfiguration {
    pub provider_id: String,
    pub channel: String,
    pub event: EnvelopeEvent,
    #[serde(default)]
    pub root_field_name: String,
}

impl EventConfiguration for RedisPublishConfiguration {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Redis
    }

    fn root_field_name(&self) -> &str {
        &self.root_field_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PublishEventConfiguration for RedisPublishConfiguration {
    fn event(&self) -> StreamEvent {
        StreamEvent::with_metadata(
            self.event.to_stream_event().bytes(),
            EventMetadata::Redis {
                channel: self.channel.clone(),
            },
        )
    }
}

/// Rendered input of a Redis subscription field
///
/// Channels are subscribed as patterns, so `orders.*` receives every
/// matching channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisSubscriptionConfiguration {
    pub provider_id: String,
    pub channels: Vec<String>,
    #[serde(default)]
    pub root_field_name: String,
}

impl EventConfiguration for RedisSubscriptionConfiguration {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Redis
    }

    fn root_field_name(&self) -> &str {
        &self.root_field_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn unique_request_id(input: &[u8], hasher: &mut dyn Hasher) -> Result<()> {
    write_unique_request_id(input, &["channels", "providerId"], hasher)
}

/// Builds Redis providers and field factories
pub struct RedisProviderBuilder {
    hooks: Hooks,
    providers: Mutex<HashMap<String, Arc<PubSubProvider<RedisAdapter>>>>,
}

impl RedisProviderBuilder {
    pub fn new(hooks: Hooks) -> Self {
        Self {
            hooks,
            providers: Mutex::new(HashMap::new()),
        }
    }

    fn provider(&self, id: &str) -> Result<Arc<PubSubProvider<RedisAdapter>>> {
        let providers = self
            .providers
            .lock()
            .map_err(|_| EventError::Config("redis provider map poisoned".to_string()))?;
        providers
            .get(id)
            .cloned()
            .ok_or_else(|| EventError::ProviderNotFound {
                provider_id: id.to_string(),
                provider_type: ProviderType::Redis,
            })
    }
}

impl ProviderBuilder for RedisProviderBuilder {
    type Source = RedisEventSource;
    type Event = RedisEventConfiguration;

    fn type_id(&self) -> ProviderType {
        ProviderType::Redis
    }

    fn build_provider(&self, source: &RedisEventSource) -> Result<Arc<dyn Provider>> {
        let provider = Arc::new(PubSubProvider::new(
            source.id.clone(),
            ProviderType::Redis,
            RedisAdapter::new(source.clone()),
            self.hooks.clone(),
        ));

        self.providers
            .lock()
            .map_err(|_| EventError::Config("redis provider map poisoned".to_string()))?
            .insert(source.id.clone(), provider.clone());
        Ok(provider)
    }

    fn build_engine_data_source_factory(
        &self,
        event: &RedisEventConfiguration,
    ) -> Result<Box<dyn EngineDataSourceFactory>> {
        let provider = self.provider(&event.engine_event_configuration.provider_id)?;
        Ok(Box::new(RedisEngineDataSourceFactory::new(event, provider)))
    }
}
