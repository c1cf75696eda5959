//! Redis adapter on top of `redis-rs`

use super::{RedisPublishConfiguration, RedisSubscriptionConfiguration};
use crate::config::RedisEventSource;
use crate::datasource::SubscriptionEventUpdater;
use crate::engine::SubscriptionCloseKind;
use crate::error::{EventError, Result};
use crate::provider::{Adapter, LazyClient};
use crate::types::{EventMetadata, ProviderType, StreamEvent};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{AsyncCommands, RedisResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

enum Publisher {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

impl Publisher {
    async fn publish(&self, channel: &str, data: &[u8]) -> RedisResult<i64> {
        match self {
            Self::Single(conn) => {
                let mut conn = conn.clone();
                conn.publish(channel, data).await
            }
            Self::Cluster(conn) => {
                let mut conn = conn.clone();
                conn.publish(channel, data).await
            }
        }
    }
}

struct RedisConnection {
    /// Pub/sub connections are opened per subscription from this client.
    /// In cluster mode it points at the first node; PUBLISH is broadcast
    /// across the cluster, so any node sees every message.
    subscriber: redis::Client,
    publisher: Publisher,
}

/// Redis adapter of one configured provider
pub struct RedisAdapter {
    source: Arc<RedisEventSource>,
    connection: LazyClient<RedisConnection>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl RedisAdapter {
    pub fn new(source: RedisEventSource) -> Self {
        Self {
            source: Arc::new(source),
            connection: LazyClient::new(),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    fn connection(&self) -> Result<&RedisConnection> {
        self.connection
            .get()
            .ok_or(EventError::NotStarted(ProviderType::Redis))
    }
}

#[async_trait]
impl Adapter for RedisAdapter {
    type PublishConfig = RedisPublishConfiguration;
    type SubscriptionConfig = RedisSubscriptionConfiguration;

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
        tracing::info!(provider_id = %self.source.id, "Redis adapter shut down");
        Ok(())
    }

    async fn subscribe(
        &self,
        ctx: CancellationToken,
        config: &RedisSubscriptionConfiguration,
        updater: Arc<dyn SubscriptionEventUpdater>,
    ) -> Result<()> {
        let conn = self.connection()?;
        let subscribe_error = |e: redis::RedisError| EventError::Subscribe {
            destination: config.channels.join(","),
            reason: e.to_string(),
        };

        let mut pubsub = conn
            .subscriber
            .get_async_pubsub()
            .await
            .map_err(subscribe_error)?;
        for channel in &config.channels {
            pubsub
                .psubscribe(channel.as_str())
                .await
                .map_err(subscribe_error)?;
        }

        tracing::debug!(
            provider_id = %self.source.id,
            channels = ?config.channels,
            "Subscribed to Redis channels"
        );

        let shutdown = self.shutdown.clone();
        let provider_id = self.source.id.clone();
        let channels = config.channels.clone();
        self.tasks.spawn(async move {
            {
                let mut messages = std::pin::pin!(pubsub.on_message());
                loop {
                    let message = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ctx.cancelled() => break,
                        message = messages.next() => message,
                    };
                    let Some(message) = message else {
                        tracing::error!(provider_id = %provider_id, "Redis pub/sub connection closed");
                        updater.close(SubscriptionCloseKind::DownstreamServiceError);
                        break;
                    };

                    let event = StreamEvent::with_metadata(
                        message.get_payload_bytes().to_vec(),
                        EventMetadata::Redis {
                            channel: message.get_channel_name().to_string(),
                        },
                    );
                    if let Err(e) = updater.update(vec![event]).await {
                        updater.close(e.close_kind());
                        break;
                    }
                }
            }

            if let Err(e) = pubsub.punsubscribe(channels).await {
                tracing::warn!(provider_id = %provider_id, error = %e, "Failed to unsubscribe");
            }
            tracing::debug!(provider_id = %provider_id, "Redis subscription ended");
        });

        Ok(())
    }

    async fn publish(
        &self,
        config: &RedisPublishConfiguration,
        events: Vec<StreamEvent>,
    ) -> Result<()> {
        let conn = self.connection()?;
        for event in &events {
            conn.publisher
                .publish(&config.channel, event.data())
                .await
                .map_err(|e| EventError::Publish {
                    destination: config.channel.clone(),
                    reason: e.to_string(),
                })?;
        }

        tracing::debug!(
            provider_id = %self.source.id,
            channel = %config.channel,
            count = events.len(),
            "Events published"
        );
        Ok(())
    }
}

async fn connect(source: &RedisEventSource) -> Result<RedisConnection> {
    let first = source.urls.first().ok_or_else(|| {
        EventError::Config(format!("redis provider \"{}\" has no urls", source.id))
    })?;
    let connection_error = |e: redis::RedisError| EventError::Connection(format!("{}: {}", first, e));

    let subscriber = redis::Client::open(first.as_str()).map_err(connection_error)?;
    let publisher = if source.cluster_enabled {
        let cluster = ClusterClient::new(source.urls.clone()).map_err(connection_error)?;
        Publisher::Cluster(
            cluster
                .get_async_connection()
                .await
                .map_err(connection_error)?,
        )
    } else {
        Publisher::Single(
            subscriber
                .get_connection_manager()
                .await
                .map_err(connection_error)?,
        )
    };

    tracing::info!(
        provider_id = %source.id,
        urls = ?source.urls,
        cluster = source.cluster_enabled,
        "Connected to Redis"
    );
    Ok(RedisConnection {
        subscriber,
        publisher,
    })
}
