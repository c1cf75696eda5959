//! Amazon SQS provider

mod client;
mod factory;

pub use client::SqsAdapter;
pub use factory::SqsEngineDataSourceFactory;

use crate::builder::ProviderBuilder;
use crate::config::SqsEventSource;
use crate::datasource::{write_unique_request_id, EngineDataSourceFactory, EnvelopeEvent};
use crate::error::{EventError, Result};
use crate::hooks::Hooks;
use crate::provider::{EventConfiguration, Provider, PubSubProvider, PublishEventConfiguration};
use crate::types::{EventMetadata, ProviderType, SqsEventConfiguration, StreamEvent};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex};

/// Rendered input of an SQS publish field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqsPublishConfiguration {
    pub provider_id: String,
    pub queue_url: String,
    pub event: EnvelopeEvent,
    #[serde(default)]
    pub root_field_name: String,
}

impl EventConfiguration for SqsPublishConfiguration {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Sqs
    }

    fn root_field_name(&self) -> &str {
        &self.root_field_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PublishEventConfiguration for SqsPublishConfiguration {
    fn event(&self) -> StreamEvent {
        StreamEvent::with_metadata(
            self.event.to_stream_event().bytes(),
            EventMetadata::Sqs {
                queue_url: self.queue_url.clone(),
                message_id: None,
            },
        )
    }
}

/// Rendered input of an SQS subscription field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqsSubscriptionConfiguration {
    pub provider_id: String,
    pub queue_urls: Vec<String>,
    #[serde(default)]
    pub root_field_name: String,
}

impl EventConfiguration for SqsSubscriptionConfiguration {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Sqs
    }

    fn root_field_name(&self) -> &str {
        &self.root_field_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn unique_request_id(input: &[u8], hasher: &mut dyn Hasher) -> Result<()> {
    write_unique_request_id(input, &["queueUrls", "providerId"], hasher)
}

/// Builds SQS providers and field factories
pub struct SqsProviderBuilder {
    hooks: Hooks,
    providers: Mutex<HashMap<String, Arc<PubSubProvider<SqsAdapter>>>>,
}

impl SqsProviderBuilder {
    pub fn new(hooks: Hooks) -> Self {
        Self {
            hooks,
            providers: Mutex::new(HashMap::new()),
        }
    }

    fn provider(&self, id: &str) -> Result<Arc<PubSubProvider<SqsAdapter>>> {
        let providers = self
            .providers
            .lock()
            .map_err(|_| EventError::Config("sqs provider map poisoned".to_string()))?;
        providers
            .get(id)
            .cloned()
            .ok_or_else(|| EventError::ProviderNotFound {
                provider_id: id.to_string(),
                provider_type: ProviderType::Sqs,
            })
    }
}

impl ProviderBuilder for SqsProviderBuilder {
    type Source = SqsEventSource;
    type Event = SqsEventConfiguration;

    fn type_id(&self) -> ProviderType {
        ProviderType::Sqs
    }

    fn build_provider(&self, source: &SqsEventSource) -> Result<Arc<dyn Provider>> {
        let provider = Arc::new(PubSubProvider::new(
            source.id.clone(),
            ProviderType::Sqs,
            SqsAdapter::new(source.clone()),
            self.hooks.clone(),
        ));

        self.providers
            .lock()
            .map_err(|_| EventError::Config("sqs provider map poisoned".to_string()))?
            .insert(source.id.clone(), provider.clone());
        Ok(provider)
    }

    fn build_engine_data_source_factory(
        &self,
        event: &SqsEventConfiguration,
    ) -> Result<Box<dyn EngineDataSourceFactory>> {
        let provider = self.provider(&event.engine_event_configuration.provider_id)?;
        Ok(Box::new(SqsEngineDataSourceFactory::new(event, provider)))
    }
}
