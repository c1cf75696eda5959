use super::{
    is_valid_subject_template, unique_request_id, NatsAdapter, NatsPublishConfiguration,
    NatsStreamSubscription, NatsSubscriptionConfiguration,
};
use crate::datasource::{
    check_addresses, render_publish_input, EngineDataSourceFactory, PubSubPublishDataSource,
    PubSubRequestDataSource, PubSubSubscriptionDataSource,
};
use crate::engine::{DataSource, SubscriptionDataSource};
use crate::error::{EventError, Result};
use crate::provider::{Adapter, PubSubProvider};
use crate::types::{EventType, NatsEventConfiguration, NatsStreamConfiguration, ProviderType};
use std::sync::Arc;

/// Field factory of a NATS-backed field
pub struct NatsEngineDataSourceFactory<A = NatsAdapter>
where
    A: Adapter<
        PublishConfig = NatsPublishConfiguration,
        SubscriptionConfig = NatsSubscriptionConfiguration,
    >,
{
    provider_id: String,
    field_name: String,
    event_type: EventType,
    subjects: Vec<String>,
    stream_configuration: Option<NatsStreamConfiguration>,
    provider: Arc<PubSubProvider<A>>,
}

impl<A> NatsEngineDataSourceFactory<A>
where
    A: Adapter<
        PublishConfig = NatsPublishConfiguration,
        SubscriptionConfig = NatsSubscriptionConfiguration,
    >,
{
    pub fn new(event: &NatsEventConfiguration, provider: Arc<PubSubProvider<A>>) -> Self {
        let engine = &event.engine_event_configuration;
        Self {
            provider_id: engine.provider_id.clone(),
            field_name: engine.field_name.clone(),
            event_type: engine.event_type,
            subjects: event.subjects.clone(),
            stream_configuration: event.stream_configuration.clone(),
            provider,
        }
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }
}

impl<A> EngineDataSourceFactory for NatsEngineDataSourceFactory<A>
where
    A: Adapter<
        PublishConfig = NatsPublishConfiguration,
        SubscriptionConfig = NatsSubscriptionConfiguration,
    >,
{
    fn field_name(&self) -> &str {
        &self.field_name
    }

    fn resolve_data_source(&self) -> Result<Arc<dyn DataSource>> {
        match self.event_type {
            EventType::Publish => Ok(Arc::new(PubSubPublishDataSource::new(self.provider.clone()))),
            EventType::Request => Ok(Arc::new(PubSubRequestDataSource::new(self.provider.clone()))),
            event_type => Err(EventError::UnsupportedEventType {
                event_type,
                provider_type: ProviderType::Nats,
            }),
        }
    }

    fn resolve_data_source_input(&self, event_data: &[u8]) -> Result<String> {
        let [subject] = self.subjects.as_slice() else {
            return Err(EventError::AddressCount {
                provider_type: ProviderType::Nats,
                event_type: self.event_type,
                address: "subject",
                count: self.subjects.len(),
            });
        };

        render_publish_input("subject", subject, event_data, &self.provider_id, &self.field_name)
    }

    fn resolve_data_source_subscription(&self) -> Result<Arc<dyn SubscriptionDataSource>> {
        Ok(Arc::new(PubSubSubscriptionDataSource::new(
            self.provider.clone(),
            unique_request_id,
        )))
    }

    fn resolve_data_source_subscription_input(&self) -> Result<String> {
        let config = NatsSubscriptionConfiguration {
            provider_id: self.provider_id.clone(),
            subjects: self.subjects.clone(),
            stream_configuration: self.stream_configuration.as_ref().map(|s| {
                NatsStreamSubscription {
                    consumer: s.consumer_name.clone(),
                    stream_name: s.stream_name.clone(),
                    consumer_inactive_threshold: s.consumer_inactive_threshold,
                }
            }),
            root_field_name: self.field_name.clone(),
        };
        Ok(serde_json::to_string(&config)?)
    }

    fn transform_event_data(
        &mut self,
        extract: &mut dyn FnMut(&str) -> Result<String>,
    ) -> Result<()> {
        let mut subjects = Vec::with_capacity(self.subjects.len());
        for subject in &self.subjects {
            let extracted = extract(subject)?;
            if !is_valid_subject_template(&extracted) {
                return Err(EventError::InvalidSubject(extracted));
            }
            subjects.push(extracted);
        }

        check_addresses(ProviderType::Nats, self.event_type, "subject", &subjects)?;

        if self.event_type == EventType::Subscribe {
            subjects.sort();
        }
        self.subjects = subjects;
        Ok(())
    }
}
