//! Kafka provider
//!
//! Publishing goes through one shared `FutureProducer`; every subscription
//! gets its own `StreamConsumer` reading from the tail of its topics.

mod client;
mod factory;

pub use client::KafkaAdapter;
pub use factory::KafkaEngineDataSourceFactory;

use crate::builder::ProviderBuilder;
use crate::config::KafkaEventSource;
use crate::datasource::{write_unique_request_id, EngineDataSourceFactory, EnvelopeEvent};
use crate::error::{EventError, Result};
use crate::hooks::Hooks;
use crate::provider::{EventConfiguration, Provider, PubSubProvider, PublishEventConfiguration};
use crate::types::{EventMetadata, KafkaEventConfiguration, ProviderType, StreamEvent};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex};

/// Rendered input of a Kafka publish field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaPublishConfiguration {
    pub provider_id: String,
    pub topic: String,
    pub event: EnvelopeEvent,
    #[serde(default)]
    pub root_field_name: String,
}

impl EventConfiguration for KafkaPublishConfiguration {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Kafka
    }

    fn root_field_name(&self) -> &str {
        &self.root_field_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PublishEventConfiguration for KafkaPublishConfiguration {
    /// The envelope payload, with its key and headers as Kafka metadata
    fn event(&self) -> StreamEvent {
        let event = self.event.to_stream_event();
        let metadata = EventMetadata::Kafka {
            topic: self.topic.clone(),
            partition: None,
            offset: None,
            key: self.event.key.clone().map(Bytes::from),
            headers: self
                .event
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), Bytes::from(v.clone())))
                .collect(),
        };
        StreamEvent::with_metadata(event.bytes(), metadata)
    }
}

/// Rendered input of a Kafka subscription field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaSubscriptionConfiguration {
    pub provider_id: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub root_field_name: String,
}

impl EventConfiguration for KafkaSubscriptionConfiguration {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Kafka
    }

    fn root_field_name(&self) -> &str {
        &self.root_field_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Subscription identity: the topic list and the provider id
pub fn unique_request_id(input: &[u8], hasher: &mut dyn Hasher) -> Result<()> {
    write_unique_request_id(input, &["topics", "providerId"], hasher)
}

/// Builds Kafka providers and field factories
pub struct KafkaProviderBuilder {
    hooks: Hooks,
    providers: Mutex<HashMap<String, Arc<PubSubProvider<KafkaAdapter>>>>,
}

impl KafkaProviderBuilder {
    pub fn new(hooks: Hooks) -> Self {
        Self {
            hooks,
            providers: Mutex::new(HashMap::new()),
        }
    }

    fn provider(&self, id: &str) -> Result<Arc<PubSubProvider<KafkaAdapter>>> {
        let providers = self
            .providers
            .lock()
            .map_err(|_| EventError::Config("kafka provider map poisoned".to_string()))?;
        providers
            .get(id)
            .cloned()
            .ok_or_else(|| EventError::ProviderNotFound {
                provider_id: id.to_string(),
                provider_type: ProviderType::Kafka,
            })
    }
}

impl ProviderBuilder for KafkaProviderBuilder {
    type Source = KafkaEventSource;
    type Event = KafkaEventConfiguration;

    fn type_id(&self) -> ProviderType {
        ProviderType::Kafka
    }

    fn build_provider(&self, source: &KafkaEventSource) -> Result<Arc<dyn Provider>> {
        let provider = Arc::new(PubSubProvider::new(
            source.id.clone(),
            ProviderType::Kafka,
            KafkaAdapter::new(source.clone()),
            self.hooks.clone(),
        ));

        self.providers
            .lock()
            .map_err(|_| EventError::Config("kafka provider map poisoned".to_string()))?
            .insert(source.id.clone(), provider.clone());
        Ok(provider)
    }

    fn build_engine_data_source_factory(
        &self,
        event: &KafkaEventConfiguration,
    ) -> Result<Box<dyn EngineDataSourceFactory>> {
        let provider = self.provider(&event.engine_event_configuration.provider_id)?;
        Ok(Box::new(KafkaEngineDataSourceFactory::new(event, provider)))
    }
}
