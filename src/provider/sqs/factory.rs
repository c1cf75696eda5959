use super::{unique_request_id, SqsAdapter, SqsPublishConfiguration, SqsSubscriptionConfiguration};
use crate::datasource::{
    check_addresses, render_publish_input, EngineDataSourceFactory, PubSubPublishDataSource,
    PubSubSubscriptionDataSource,
};
use crate::engine::{DataSource, SubscriptionDataSource};
use crate::error::{EventError, Result};
use crate::provider::{Adapter, PubSubProvider};
use crate::types::{EventType, ProviderType, SqsEventConfiguration};
use std::sync::Arc;

/// Field factory of an SQS-backed field
pub struct SqsEngineDataSourceFactory<A = SqsAdapter>
where
    A: Adapter<PublishConfig = SqsPublishConfiguration, SubscriptionConfig = SqsSubscriptionConfiguration>,
{
    provider_id: String,
    field_name: String,
    event_type: EventType,
    queue_urls: Vec<String>,
    provider: Arc<PubSubProvider<A>>,
}

impl<A> SqsEngineDataSourceFactory<A>
where
    A: Adapter<PublishConfig = SqsPublishConfiguration, SubscriptionConfig = SqsSubscriptionConfiguration>,
{
    pub fn new(event: &SqsEventConfiguration, provider: Arc<PubSubProvider<A>>) -> Self {
        let engine = &event.engine_event_configuration;
        Self {
            provider_id: engine.provider_id.clone(),
            field_name: engine.field_name.clone(),
            event_type: engine.event_type,
            queue_urls: event.queue_urls.clone(),
            provider,
        }
    }

    pub fn queue_urls(&self) -> &[String] {
        &self.queue_urls
    }
}

impl<A> EngineDataSourceFactory for SqsEngineDataSourceFactory<A>
where
    A: Adapter<PublishConfig = SqsPublishConfiguration, SubscriptionConfig = SqsSubscriptionConfiguration>,
{
    fn field_name(&self) -> &str {
        &self.field_name
    }

    fn resolve_data_source(&self) -> Result<Arc<dyn DataSource>> {
        match self.event_type {
            EventType::Publish => Ok(Arc::new(PubSubPublishDataSource::new(self.provider.clone()))),
            event_type => Err(EventError::UnsupportedEventType {
                event_type,
                provider_type: ProviderType::Sqs,
            }),
        }
    }

    fn resolve_data_source_input(&self, event_data: &[u8]) -> Result<String> {
        let [queue_url] = self.queue_urls.as_slice() else {
            return Err(EventError::AddressCount {
                provider_type: ProviderType::Sqs,
                event_type: self.event_type,
                address: "queue URL",
                count: self.queue_urls.len(),
            });
        };

        render_publish_input("queueUrl", queue_url, event_data, &self.provider_id, &self.field_name)
    }

    fn resolve_data_source_subscription(&self) -> Result<Arc<dyn SubscriptionDataSource>> {
        Ok(Arc::new(PubSubSubscriptionDataSource::new(
            self.provider.clone(),
            unique_request_id,
        )))
    }

    fn resolve_data_source_subscription_input(&self) -> Result<String> {
        let config = SqsSubscriptionConfiguration {
            provider_id: self.provider_id.clone(),
            queue_urls: self.queue_urls.clone(),
            root_field_name: self.field_name.clone(),
        };
        Ok(serde_json::to_string(&config)?)
    }

    fn transform_event_data(
        &mut self,
        extract: &mut dyn FnMut(&str) -> Result<String>,
    ) -> Result<()> {
        let queue_urls = self
            .queue_urls
            .iter()
            .map(|queue_url| extract(queue_url))
            .collect::<Result<Vec<_>>>()?;
        check_addresses(ProviderType::Sqs, self.event_type, "queue URL", &queue_urls)?;
        self.queue_urls = queue_urls;
        Ok(())
    }
}
