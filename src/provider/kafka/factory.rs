use super::{
    unique_request_id, KafkaAdapter, KafkaPublishConfiguration, KafkaSubscriptionConfiguration,
};
use crate::datasource::{
    check_addresses, render_publish_input, EngineDataSourceFactory, PubSubPublishDataSource,
    PubSubSubscriptionDataSource,
};
use crate::engine::{DataSource, SubscriptionDataSource};
use crate::error::{EventError, Result};
use crate::provider::{Adapter, PubSubProvider};
use crate::types::{EventType, KafkaEventConfiguration, ProviderType};
use std::sync::Arc;

/// Field factory of a Kafka-backed field
pub struct KafkaEngineDataSourceFactory<A = KafkaAdapter>
where
    A: Adapter<
        PublishConfig = KafkaPublishConfiguration,
        SubscriptionConfig = KafkaSubscriptionConfiguration,
    >,
{
    provider_id: String,
    field_name: String,
    event_type: EventType,
    topics: Vec<String>,
    provider: Arc<PubSubProvider<A>>,
}

impl<A> KafkaEngineDataSourceFactory<A>
where
    A: Adapter<
        PublishConfig = KafkaPublishConfiguration,
        SubscriptionConfig = KafkaSubscriptionConfiguration,
    >,
{
    pub fn new(event: &KafkaEventConfiguration, provider: Arc<PubSubProvider<A>>) -> Self {
        let engine = &event.engine_event_configuration;
        Self {
            provider_id: engine.provider_id.clone(),
            field_name: engine.field_name.clone(),
            event_type: engine.event_type,
            topics: event.topics.clone(),
            provider,
        }
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}

impl<A> EngineDataSourceFactory for KafkaEngineDataSourceFactory<A>
where
    A: Adapter<
        PublishConfig = KafkaPublishConfiguration,
        SubscriptionConfig = KafkaSubscriptionConfiguration,
    >,
{
    fn field_name(&self) -> &str {
        &self.field_name
    }

    fn resolve_data_source(&self) -> Result<Arc<dyn DataSource>> {
        match self.event_type {
            EventType::Publish => Ok(Arc::new(PubSubPublishDataSource::new(self.provider.clone()))),
            event_type => Err(EventError::UnsupportedEventType {
                event_type,
                provider_type: ProviderType::Kafka,
            }),
        }
    }

    fn resolve_data_source_input(&self, event_data: &[u8]) -> Result<String> {
        let [topic] = self.topics.as_slice() else {
            return Err(EventError::AddressCount {
                provider_type: ProviderType::Kafka,
                event_type: self.event_type,
                address: "topic",
                count: self.topics.len(),
            });
        };

        render_publish_input("topic", topic, event_data, &self.provider_id, &self.field_name)
    }

    fn resolve_data_source_subscription(&self) -> Result<Arc<dyn SubscriptionDataSource>> {
        Ok(Arc::new(PubSubSubscriptionDataSource::new(
            self.provider.clone(),
            unique_request_id,
        )))
    }

    fn resolve_data_source_subscription_input(&self) -> Result<String> {
        let config = KafkaSubscriptionConfiguration {
            provider_id: self.provider_id.clone(),
            topics: self.topics.clone(),
            root_field_name: self.field_name.clone(),
        };
        Ok(serde_json::to_string(&config)?)
    }

    fn transform_event_data(
        &mut self,
        extract: &mut dyn FnMut(&str) -> Result<String>,
    ) -> Result<()> {
        let topics = self
            .topics
            .iter()
            .map(|topic| extract(topic))
            .collect::<Result<Vec<_>>>()?;
        check_addresses(ProviderType::Kafka, self.event_type, "topic", &topics)?;
        self.topics = topics;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::SubscriptionEventUpdater;
    use crate::hooks::{publish_hook, Hooks};
    use crate::types::{EngineEventConfiguration, StreamEvent};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct FakeKafka {
        published: Mutex<Vec<(String, Vec<StreamEvent>)>>,
        fail: bool,
    }

    #[async_trait]
    impl Adapter for FakeKafka {
        type PublishConfig = KafkaPublishConfiguration;
        type SubscriptionConfig = KafkaSubscriptionConfiguration;

        async fn startup(&self) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }

        async fn subscribe(
            &self,
            _ctx: CancellationToken,
            _config: &KafkaSubscriptionConfiguration,
            _updater: Arc<dyn SubscriptionEventUpdater>,
        ) -> Result<()> {
            Ok(())
        }

        async fn publish(
            &self,
            config: &KafkaPublishConfiguration,
            events: Vec<StreamEvent>,
        ) -> Result<()> {
            if self.fail {
                return Err(EventError::Publish {
                    destination: config.topic.clone(),
                    reason: "broker unavailable".to_string(),
                });
            }
            self.published
                .lock()
                .unwrap()
                .push((config.topic.clone(), events));
            Ok(())
        }
    }

    fn event(event_type: EventType, topics: &[&str]) -> KafkaEventConfiguration {
        KafkaEventConfiguration {
            engine_event_configuration: EngineEventConfiguration {
                provider_id: "test-provider".to_string(),
                event_type,
                type_name: "Mutation".to_string(),
                field_name: "testField".to_string(),
            },
            topics: topics.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn factory_with(
        adapter: FakeKafka,
        hooks: Hooks,
        event_type: EventType,
        topics: &[&str],
    ) -> (KafkaEngineDataSourceFactory<FakeKafka>, Arc<PubSubProvider<FakeKafka>>) {
        let provider = Arc::new(PubSubProvider::new(
            "test-provider",
            ProviderType::Kafka,
            adapter,
            hooks,
        ));
        (
            KafkaEngineDataSourceFactory::new(&event(event_type, topics), provider.clone()),
            provider,
        )
    }

    fn factory(
        event_type: EventType,
        topics: &[&str],
    ) -> KafkaEngineDataSourceFactory<FakeKafka> {
        factory_with(FakeKafka::default(), Hooks::new(), event_type, topics).0
    }

    #[test]
    fn test_publish_input() {
        let f = factory(EventType::Publish, &["test-topic"]);
        assert_eq!(
            f.resolve_data_source_input(br#"{"test":"data"}"#).unwrap(),
            r#"{"topic":"test-topic", "event": {"data": {"test":"data"}}, "providerId":"test-provider", "rootFieldName":"testField"}"#
        );
    }

    #[test]
    fn test_publish_input_requires_exactly_one_topic() {
        let f = factory(EventType::Publish, &["a", "b"]);
        let err = f.resolve_data_source_input(b"{}").unwrap_err();
        assert!(matches!(
            err,
            EventError::AddressCount {
                address: "topic",
                count: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_only_publish_is_supported() {
        assert!(factory(EventType::Publish, &["a"]).resolve_data_source().is_ok());
        for event_type in [EventType::Request, EventType::Subscribe] {
            assert!(matches!(
                factory(event_type, &["a"]).resolve_data_source(),
                Err(EventError::UnsupportedEventType {
                    provider_type: ProviderType::Kafka,
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_subscription_input() {
        let f = factory(EventType::Subscribe, &["a", "b"]);
        assert_eq!(
            f.resolve_data_source_subscription_input().unwrap(),
            r#"{"providerId":"test-provider","topics":["a","b"],"rootFieldName":"testField"}"#
        );
    }

    #[test]
    fn test_transform_keeps_topic_order() {
        let mut f = factory(EventType::Subscribe, &["b.{{ args.id }}", "a"]);
        f.transform_event_data(&mut |s| Ok(s.replace("{{ args.id }}", "$$0$$")))
            .unwrap();
        assert_eq!(f.topics(), ["b.$$0$$", "a"]);
    }

    #[test]
    fn test_transform_rejects_empty_topics() {
        let mut f = factory(EventType::Subscribe, &[]);
        let err = f.transform_event_data(&mut |s| Ok(s.to_string())).unwrap_err();
        assert!(matches!(
            err,
            EventError::MissingAddress {
                provider_type: ProviderType::Kafka,
                address: "topic",
                ..
            }
        ));

        let mut f = factory(EventType::Publish, &["{{ args.topic }}"]);
        assert!(matches!(
            f.transform_event_data(&mut |_| Ok("  ".to_string())),
            Err(EventError::MissingAddress { .. })
        ));
        assert_eq!(f.topics(), ["{{ args.topic }}"]);
    }

    #[tokio::test]
    async fn test_publish_load_reports_success() {
        let (f, provider) =
            factory_with(FakeKafka::default(), Hooks::new(), EventType::Publish, &["orders"]);
        let input = f.resolve_data_source_input(br#"{"id":7}"#).unwrap();

        let mut out = Vec::new();
        f.resolve_data_source()
            .unwrap()
            .load(CancellationToken::new(), input.as_bytes(), &mut out)
            .await
            .unwrap();

        assert_eq!(out, br#"{"success": true}"#);
        let published = provider.adapter().published.lock().unwrap().clone();
        assert_eq!(published[0].0, "orders");
        assert_eq!(published[0].1[0].data(), br#"{"id":7}"#);
    }

    #[tokio::test]
    async fn test_publish_load_reports_failure() {
        let adapter = FakeKafka {
            fail: true,
            ..Default::default()
        };
        let (f, _) = factory_with(adapter, Hooks::new(), EventType::Publish, &["orders"]);
        let input = f.resolve_data_source_input(br#"{"id":7}"#).unwrap();

        let mut out = Vec::new();
        f.resolve_data_source()
            .unwrap()
            .load(CancellationToken::new(), input.as_bytes(), &mut out)
            .await
            .unwrap();
        assert_eq!(out, br#"{"success": false}"#);
    }

    #[tokio::test]
    async fn test_publish_hooks_rewrite_payload() {
        let hooks = Hooks::new().with_on_publish_events(publish_hook(|_ctx, _conf, events| {
            Ok(events
                .into_iter()
                .map(|e| e.with_data(r#"{"rewritten":true}"#))
                .collect())
        }));
        let (f, provider) = factory_with(FakeKafka::default(), hooks, EventType::Publish, &["t"]);
        let input = f.resolve_data_source_input(br#"{"id":1}"#).unwrap();

        let mut out = Vec::new();
        f.resolve_data_source()
            .unwrap()
            .load(CancellationToken::new(), input.as_bytes(), &mut out)
            .await
            .unwrap();

        let published = provider.adapter().published.lock().unwrap().clone();
        assert_eq!(published[0].1[0].data(), br#"{"rewritten":true}"#);
    }
}
