//! NATS provider
//!
//! Core NATS subscriptions, JetStream durable consumers, fire-and-forget
//! publish and request/reply on top of `async-nats`.

mod client;
mod factory;
mod subject;

pub use client::NatsAdapter;
pub use factory::NatsEngineDataSourceFactory;
pub use subject::{durable_consumer_name, is_valid_subject, is_valid_subject_template};

use crate::builder::ProviderBuilder;
use crate::config::{InstanceIdentity, NatsEventSource};
use crate::datasource::{write_unique_request_id, EngineDataSourceFactory, EnvelopeEvent};
use crate::error::{EventError, Result};
use crate::hooks::Hooks;
use crate::provider::{EventConfiguration, Provider, PubSubProvider, PublishEventConfiguration};
use crate::types::{NatsEventConfiguration, ProviderType, StreamEvent};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex};

/// Rendered input of a NATS publish or request field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatsPublishConfiguration {
    pub provider_id: String,
    pub subject: String,
    pub event: EnvelopeEvent,
    #[serde(default)]
    pub root_field_name: String,
}

impl EventConfiguration for NatsPublishConfiguration {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Nats
    }

    fn root_field_name(&self) -> &str {
        &self.root_field_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PublishEventConfiguration for NatsPublishConfiguration {
    fn event(&self) -> StreamEvent {
        self.event.to_stream_event()
    }
}

/// JetStream section of a subscription input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatsStreamSubscription {
    pub consumer: String,
    pub stream_name: String,
    #[serde(default)]
    pub consumer_inactive_threshold: i32,
}

/// Rendered input of a NATS subscription field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatsSubscriptionConfiguration {
    pub provider_id: String,
    pub subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_configuration: Option<NatsStreamSubscription>,
    #[serde(default)]
    pub root_field_name: String,
}

impl EventConfiguration for NatsSubscriptionConfiguration {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Nats
    }

    fn root_field_name(&self) -> &str {
        &self.root_field_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Subscription identity: the subject list and the provider id
pub fn unique_request_id(input: &[u8], hasher: &mut dyn Hasher) -> Result<()> {
    write_unique_request_id(input, &["subjects", "providerId"], hasher)
}

/// Builds NATS providers and field factories
pub struct NatsProviderBuilder {
    hooks: Hooks,
    instance: InstanceIdentity,
    providers: Mutex<HashMap<String, Arc<PubSubProvider<NatsAdapter>>>>,
}

impl NatsProviderBuilder {
    pub fn new(hooks: Hooks, instance: InstanceIdentity) -> Self {
        Self {
            hooks,
            instance,
            providers: Mutex::new(HashMap::new()),
        }
    }

    fn provider(&self, id: &str) -> Result<Arc<PubSubProvider<NatsAdapter>>> {
        let providers = self
            .providers
            .lock()
            .map_err(|_| EventError::Config("nats provider map poisoned".to_string()))?;
        providers
            .get(id)
            .cloned()
            .ok_or_else(|| EventError::ProviderNotFound {
                provider_id: id.to_string(),
                provider_type: ProviderType::Nats,
            })
    }
}

impl ProviderBuilder for NatsProviderBuilder {
    type Source = NatsEventSource;
    type Event = NatsEventConfiguration;

    fn type_id(&self) -> ProviderType {
        ProviderType::Nats
    }

    fn build_provider(&self, source: &NatsEventSource) -> Result<Arc<dyn Provider>> {
        let adapter = NatsAdapter::new(source.clone(), self.instance.clone());
        let provider = Arc::new(PubSubProvider::new(
            source.id.clone(),
            ProviderType::Nats,
            adapter,
            self.hooks.clone(),
        ));

        self.providers
            .lock()
            .map_err(|_| EventError::Config("nats provider map poisoned".to_string()))?
            .insert(source.id.clone(), provider.clone());
        Ok(provider)
    }

    fn build_engine_data_source_factory(
        &self,
        event: &NatsEventConfiguration,
    ) -> Result<Box<dyn EngineDataSourceFactory>> {
        let provider = self.provider(&event.engine_event_configuration.provider_id)?;
        Ok(Box::new(NatsEngineDataSourceFactory::new(event, provider)))
    }
}
