//! NATS adapter: connections, publish, request, and core/JetStream subscriptions

use super::subject::durable_consumer_name;
use super::{NatsPublishConfiguration, NatsStreamSubscription, NatsSubscriptionConfiguration};
use crate::config::{InstanceIdentity, NatsEventSource};
use crate::datasource::SubscriptionEventUpdater;
use crate::engine::SubscriptionCloseKind;
use crate::error::{EventError, Result};
use crate::provider::{Adapter, LazyClient};
use crate::types::{EventMetadata, ProviderType, StreamEvent};
use async_nats::jetstream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Messages requested per JetStream fetch
const FETCH_BATCH_SIZE: usize = 300;

/// Pause after an empty JetStream fetch
const FETCH_IDLE_INTERVAL: Duration = Duration::from_millis(100);

struct NatsConnection {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

/// NATS adapter of one configured provider
///
/// Connects once at startup. Every subscription runs in its own task
/// tracked by the adapter, so shutdown can wait for all of them.
pub struct NatsAdapter {
    source: Arc<NatsEventSource>,
    instance: InstanceIdentity,
    connection: LazyClient<NatsConnection>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl NatsAdapter {
    pub fn new(source: NatsEventSource, instance: InstanceIdentity) -> Self {
        Self {
            source: Arc::new(source),
            instance,
            connection: LazyClient::new(),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    fn connection(&self) -> Result<&NatsConnection> {
        self.connection
            .get()
            .ok_or(EventError::NotStarted(ProviderType::Nats))
    }

    async fn subscribe_core(
        &self,
        conn: &NatsConnection,
        ctx: CancellationToken,
        config: &NatsSubscriptionConfiguration,
        updater: Arc<dyn SubscriptionEventUpdater>,
    ) -> Result<()> {
        let mut subscribers = Vec::with_capacity(config.subjects.len());
        for subject in &config.subjects {
            let subscriber = conn
                .client
                .subscribe(subject.clone())
                .await
                .map_err(|e| EventError::Subscribe {
                    destination: subject.clone(),
                    reason: e.to_string(),
                })?;
            subscribers.push(subscriber);
        }

        tracing::debug!(
            provider_id = %self.source.id,
            subjects = ?config.subjects,
            "Subscribed to NATS subjects"
        );

        let shutdown = self.shutdown.clone();
        let provider_id = self.source.id.clone();
        self.tasks.spawn(async move {
            let mut messages = futures::stream::select_all(subscribers);
            forward_messages(
                &provider_id,
                (&mut messages).map(|message| stream_event(&message)),
                &shutdown,
                &ctx,
                updater.as_ref(),
            )
            .await;

            for subscriber in messages.iter_mut() {
                if let Err(e) = subscriber.unsubscribe().await {
                    tracing::warn!(provider_id = %provider_id, error = %e, "Failed to unsubscribe");
                }
            }
            tracing::debug!(provider_id = %provider_id, "NATS subscription ended");
        });

        Ok(())
    }

    async fn subscribe_durable(
        &self,
        conn: &NatsConnection,
        ctx: CancellationToken,
        config: &NatsSubscriptionConfiguration,
        stream_config: &NatsStreamSubscription,
        updater: Arc<dyn SubscriptionEventUpdater>,
    ) -> Result<()> {
        let durable_name =
            durable_consumer_name(&stream_config.consumer, &self.instance, &config.subjects);

        let mut consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(durable_name.clone()),
            filter_subjects: config.subjects.clone(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        };
        if stream_config.consumer_inactive_threshold > 0 {
            consumer_config.inactive_threshold =
                Duration::from_secs(stream_config.consumer_inactive_threshold as u64);
        }

        let stream = conn
            .jetstream
            .get_stream(&stream_config.stream_name)
            .await
            .map_err(|e| {
                EventError::Stream(format!(
                    "Failed to get stream '{}': {}",
                    stream_config.stream_name, e
                ))
            })?;

        let consumer = stream
            .create_consumer(consumer_config)
            .await
            .map_err(|e| {
                EventError::Consumer(format!(
                    "Failed to create durable consumer '{}': {}",
                    durable_name, e
                ))
            })?;

        tracing::info!(
            provider_id = %self.source.id,
            stream = %stream_config.stream_name,
            consumer = %durable_name,
            subjects = ?config.subjects,
            "Durable subscription created"
        );

        let shutdown = self.shutdown.clone();
        let provider_id = self.source.id.clone();
        self.tasks.spawn(async move {
            'poll: loop {
                let batch = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ctx.cancelled() => break,
                    batch = consumer.fetch().max_messages(FETCH_BATCH_SIZE).messages() => batch,
                };
                let batch = match batch {
                    Ok(batch) => batch,
                    Err(e) => {
                        tracing::error!(
                            provider_id = %provider_id,
                            consumer = %durable_name,
                            error = %e,
                            "Failed to fetch messages"
                        );
                        updater.close(SubscriptionCloseKind::DownstreamServiceError);
                        break;
                    }
                };

                let mut received = 0usize;
                let mut batch = std::pin::pin!(batch);
                while let Some(message) = batch.next().await {
                    let message = match message {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::error!(
                                provider_id = %provider_id,
                                consumer = %durable_name,
                                error = %e,
                                "Failed to receive message"
                            );
                            updater.close(SubscriptionCloseKind::DownstreamServiceError);
                            break 'poll;
                        }
                    };
                    received += 1;

                    if let Err(e) = updater.update(vec![stream_event(&message.message)]).await {
                        updater.close(e.close_kind());
                        break 'poll;
                    }

                    if let Err(e) = message.ack().await {
                        tracing::error!(
                            provider_id = %provider_id,
                            consumer = %durable_name,
                            error = %e,
                            "Failed to acknowledge message"
                        );
                        updater.close(SubscriptionCloseKind::DownstreamServiceError);
                        break 'poll;
                    }
                }

                if received == 0 {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ctx.cancelled() => break,
                        _ = tokio::time::sleep(FETCH_IDLE_INTERVAL) => {}
                    }
                }
            }
            tracing::debug!(provider_id = %provider_id, consumer = %durable_name, "Durable subscription ended");
        });

        Ok(())
    }
}

#[async_trait]
impl Adapter for NatsAdapter {
    type PublishConfig = NatsPublishConfiguration;
    type SubscriptionConfig = NatsSubscriptionConfiguration;

    async fn startup(&self) -> Result<()> {
        self.connection
            .get_or_connect(|| connect(&self.source))
            .await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        if let Some(conn) = self.connection.get() {
            conn.client.flush().await.map_err(|e| {
                EventError::Connection(format!("failed to flush NATS connection: {}", e))
            })?;
        }

        tracing::info!(provider_id = %self.source.id, "NATS adapter shut down");
        Ok(())
    }

    async fn subscribe(
        &self,
        ctx: CancellationToken,
        config: &NatsSubscriptionConfiguration,
        updater: Arc<dyn SubscriptionEventUpdater>,
    ) -> Result<()> {
        let conn = self.connection()?;
        match &config.stream_configuration {
            Some(stream_config) => {
                self.subscribe_durable(conn, ctx, config, stream_config, updater)
                    .await
            }
            None => self.subscribe_core(conn, ctx, config, updater).await,
        }
    }

    async fn publish(
        &self,
        config: &NatsPublishConfiguration,
        events: Vec<StreamEvent>,
    ) -> Result<()> {
        let conn = self.connection()?;
        for event in events {
            conn.client
                .publish(config.subject.clone(), event.bytes())
                .await
                .map_err(|e| EventError::Publish {
                    destination: config.subject.clone(),
                    reason: e.to_string(),
                })?;
        }

        tracing::debug!(
            provider_id = %self.source.id,
            subject = %config.subject,
            "Events published"
        );
        Ok(())
    }

    async fn request(
        &self,
        config: &NatsPublishConfiguration,
        event: StreamEvent,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let conn = self.connection()?;
        let reply = conn
            .client
            .request(config.subject.clone(), event.bytes())
            .await
            .map_err(|e| EventError::Request {
                subject: config.subject.clone(),
                reason: e.to_string(),
            })?;

        out.extend_from_slice(&reply.payload);
        Ok(())
    }
}

async fn connect(source: &NatsEventSource) -> Result<NatsConnection> {
    let client = build_connect_options(source)
        .connect(&source.url)
        .await
        .map_err(|e| EventError::Connection(format!("{}: {}", source.url, e)))?;

    tracing::info!(provider_id = %source.id, url = %source.url, "Connected to NATS");

    Ok(NatsConnection {
        jetstream: jetstream::new(client.clone()),
        client,
    })
}

fn build_connect_options(source: &NatsEventSource) -> async_nats::ConnectOptions {
    let provider_id = source.id.clone();
    let mut opts = async_nats::ConnectOptions::new()
        .name(format!("a3s.edfs.nats.{}", source.id))
        .connection_timeout(Duration::from_secs(source.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(source.request_timeout_secs)))
        .event_callback(move |event| {
            let provider_id = provider_id.clone();
            async move { log_connection_event(&provider_id, event) }
        });

    if let Some(auth) = &source.authentication {
        if let Some(token) = &auth.token {
            opts = opts.token(token.clone());
        } else if let Some(user) = &auth.user_info {
            opts = opts.user_and_password(user.username.clone(), user.password.clone());
        }
    }

    opts
}

fn log_connection_event(provider_id: &str, event: async_nats::Event) {
    match event {
        async_nats::Event::Connected => {
            tracing::info!(provider_id, "NATS connection established")
        }
        async_nats::Event::Disconnected => {
            tracing::warn!(provider_id, "NATS connection lost, reconnecting")
        }
        async_nats::Event::SlowConsumer(sid) => {
            tracing::warn!(provider_id, sid, "NATS slow consumer, messages dropped")
        }
        other => tracing::info!(provider_id, event = %other, "NATS connection event"),
    }
}

/// Hand every message to the updater until the subscription is cancelled
///
/// A stream that ends on its own means the server dropped the subscription,
/// which closes it with `DownstreamServiceError`.
async fn forward_messages<S>(
    provider_id: &str,
    mut messages: S,
    shutdown: &CancellationToken,
    ctx: &CancellationToken,
    updater: &dyn SubscriptionEventUpdater,
) where
    S: Stream<Item = StreamEvent> + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ctx.cancelled() => break,
            event = messages.next() => {
                let Some(event) = event else {
                    tracing::error!(provider_id = %provider_id, "NATS subscription closed by the server");
                    updater.close(SubscriptionCloseKind::DownstreamServiceError);
                    break;
                };
                if let Err(e) = updater.update(vec![event]).await {
                    updater.close(e.close_kind());
                    break;
                }
            }
        }
    }
}

fn stream_event(message: &async_nats::Message) -> StreamEvent {
    StreamEvent::with_metadata(
        message.payload.clone(),
        EventMetadata::Nats {
            subject: message.subject.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NatsAuthentication;
    use crate::error::HookError;
    use crate::hooks::{receive_hook, Hooks};
    use crate::test_support::recording_event_updater;

    fn adapter() -> NatsAdapter {
        NatsAdapter::new(
            NatsEventSource::new("default", "nats://127.0.0.1:1"),
            InstanceIdentity::new("host", ":3002"),
        )
    }

    #[test]
    fn test_build_connect_options_with_auth() {
        let mut source = NatsEventSource::new("default", "nats://localhost:4222");
        source.authentication = Some(NatsAuthentication {
            token: Some("secret".to_string()),
            user_info: None,
        });
        // ConnectOptions is opaque; building must not panic
        let _opts = build_connect_options(&source);
    }

    #[tokio::test]
    async fn test_publish_before_startup_fails() {
        let adapter = adapter();
        let config: NatsPublishConfiguration = serde_json::from_str(
            r#"{"providerId":"default","subject":"a","event":{"data":{}}}"#,
        )
        .unwrap();

        let err = adapter
            .publish(&config, vec![StreamEvent::new("{}")])
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::NotStarted(ProviderType::Nats)));
    }

    #[tokio::test]
    async fn test_startup_against_unreachable_server_fails() {
        let mut source = NatsEventSource::new("default", "nats://127.0.0.1:1");
        source.connect_timeout_secs = 1;
        let adapter = NatsAdapter::new(source, InstanceIdentity::default());
        assert!(matches!(
            adapter.startup().await,
            Err(EventError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_without_startup_is_clean() {
        adapter().shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_ended_subscription_closes_with_downstream_error() {
        let (updater, sink) = recording_event_updater(Hooks::new());
        let messages = futures::stream::iter(vec![StreamEvent::new("1"), StreamEvent::new("2")]);

        forward_messages(
            "default",
            messages,
            &CancellationToken::new(),
            &CancellationToken::new(),
            updater.as_ref(),
        )
        .await;

        assert_eq!(sink.updates(), vec!["1", "2"]);
        assert_eq!(sink.closes(), vec![SubscriptionCloseKind::DownstreamServiceError]);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_ends_without_close() {
        let (updater, sink) = recording_event_updater(Hooks::new());
        let ctx = CancellationToken::new();
        ctx.cancel();

        forward_messages(
            "default",
            futures::stream::pending(),
            &CancellationToken::new(),
            &ctx,
            updater.as_ref(),
        )
        .await;

        assert!(sink.updates().is_empty());
        assert!(sink.closes().is_empty());
    }

    #[tokio::test]
    async fn test_receive_hook_close_stops_forwarding() {
        let hooks = Hooks::new().with_on_receive_events(receive_hook(|_ctx, _conf, _events| {
            Err(HookError::close_subscription("denied"))
        }));
        let (updater, sink) = recording_event_updater(hooks);

        forward_messages(
            "default",
            futures::stream::iter(vec![StreamEvent::new("1"), StreamEvent::new("2")]),
            &CancellationToken::new(),
            &CancellationToken::new(),
            updater.as_ref(),
        )
        .await;

        assert!(sink.updates().is_empty());
        assert_eq!(sink.closes(), vec![SubscriptionCloseKind::Normal]);
    }
}
