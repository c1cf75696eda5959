use super::{
    unique_request_id, RedisAdapter, RedisPublishConfiguration, RedisSubscriptionConfiguration,
};
use crate::datasource::{
    check_addresses, render_publish_input, EngineDataSourceFactory, PubSubPublishDataSource,
    PubSubSubscriptionDataSource,
};
use crate::engine::{DataSource, SubscriptionDataSource};
use crate::error::{EventError, Result};
use crate::provider::{Adapter, PubSubProvider};
use crate::types::{EventType, ProviderType, RedisEventConfiguration};
use std::sync::Arc;

/// Field factory of a Redis-backed field
pub struct RedisEngineDataSourceFactory<A = RedisAdapter>
where
    A: Adapter<
        PublishConfig = RedisPublishConfiguration,
        SubscriptionConfig = RedisSubscriptionConfiguration,
    >,
{
    provider_id: String,
    field_name: String,
    event_type: EventType,
    channels: Vec<String>,
    provider: Arc<PubSubProvider<A>>,
}

impl<A> RedisEngineDataSourceFactory<A>
where
    A: Adapter<
        PublishConfig = RedisPublishConfiguration,
        SubscriptionConfig = RedisSubscriptionConfiguration,
    >,
{
    pub fn new(event: &RedisEventConfiguration, provider: Arc<PubSubProvider<A>>) -> Self {
        let engine = &event.engine_event_configuration;
        Self {
            provider_id: engine.provider_id.clone(),
            field_name: engine.field_name.clone(),
            event_type: engine.event_type,
            channels: event.channels.clone(),
            provider,
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }
}

impl<A> EngineDataSourceFactory for RedisEngineDataSourceFactory<A>
where
    A: Adapter<
        PublishConfig = RedisPublishConfiguration,
        SubscriptionConfig = RedisSubscriptionConfiguration,
    >,
{
    fn field_name(&self) -> &str {
        &self.field_name
    }

    fn resolve_data_source(&self) -> Result<Arc<dyn DataSource>> {
        if self.event_type != EventType::Publish {
            return Err(EventError::UnsupportedEventType {
                event_type: self.event_type,
                provider_type: ProviderType::Redis,
            });
        }
        Ok(Arc::new(PubSubPublishDataSource::new(self.provider.clone())))
    }

    fn resolve_data_source_input(&self, event_data: &[u8]) -> Result<String> {
        match self.channels.as_slice() {
            [channel] => render_publish_input(
                "channel",
                channel,
                event_data,
                &self.provider_id,
                &self.field_name,
            ),
            channels => Err(EventError::AddressCount {
                provider_type: ProviderType::Redis,
                event_type: self.event_type,
                address: "channel",
                count: channels.len(),
            }),
        }
    }

    fn resolve_data_source_subscription(&self) -> Result<Arc<dyn SubscriptionDataSource>> {
        Ok(Arc::new(PubSubSubscriptionDataSource::new(
            self.provider.clone(),
            unique_request_id,
        )))
    }

    fn resolve_data_source_subscription_input(&self) -> Result<String> {
        Ok(serde_json::to_string(&RedisSubscriptionConfiguration {
            provider_id: self.provider_id.clone(),
            channels: self.channels.clone(),
            root_field_name: self.field_name.clone(),
        })?)
    }

    fn transform_event_data(
        &mut self,
        extract: &mut dyn FnMut(&str) -> Result<String>,
    ) -> Result<()> {
        let channels = self
            .channels
            .iter()
            .map(|channel| extract(channel))
            .collect::<Result<Vec<_>>>()?;
        check_addresses(ProviderType::Redis, self.event_type, "channel", &channels)?;
        self.channels = channels;
        Ok(())
    }
}
