//! Kafka adapter on top of `rdkafka`

use super::{KafkaPublishConfiguration, KafkaSubscriptionConfiguration};
use crate::config::KafkaEventSource;
use crate::datasource::SubscriptionEventUpdater;
use crate::engine::SubscriptionCloseKind;
use crate::error::{EventError, Result};
use crate::provider::{Adapter, LazyClient};
use crate::types::{EventMetadata, ProviderType, StreamEvent};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Upper bound of records handed to the updater in one batch
const MAX_POLL_RECORDS: usize = 100;

/// Timeout of blocking metadata and offset lookups while subscribing
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka adapter of one configured provider
///
/// The producer is created at startup and shared by every publish. Each
/// subscription creates its own consumer in a fresh group, assigned to all
/// partitions of its topics at the offsets current when it started, so
/// every subscriber sees every message produced afterwards.
pub struct KafkaAdapter {
    source: Arc<KafkaEventSource>,
    producer: LazyClient<FutureProducer>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl KafkaAdapter {
    pub fn new(source: KafkaEventSource) -> Self {
        Self {
            source: Arc::new(source),
            producer: LazyClient::new(),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    fn producer(&self) -> Result<&FutureProducer> {
        self.producer
            .get()
            .ok_or(EventError::NotStarted(ProviderType::Kafka))
    }
}

#[async_trait]
impl Adapter for KafkaAdapter {
    type PublishConfig = KafkaPublishConfiguration;
    type SubscriptionConfig = KafkaSubscriptionConfiguration;

    async fn startup(&self) -> Result<()> {
        self.producer
            .get_or_connect(|| async { create_producer(&self.source) })
            .await?;
        tracing::info!(
            provider_id = %self.source.id,
            brokers = %self.source.brokers.join(","),
            "Kafka producer created"
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        if let Some(producer) = self.producer.get() {
            let producer = producer.clone();
            let timeout = Duration::from_secs(self.source.request_timeout_secs);
            tokio::task::spawn_blocking(move || producer.flush(timeout))
                .await
                .map_err(|e| EventError::Connection(format!("Kafka flush task failed: {}", e)))?
                .map_err(|e| {
                    EventError::Connection(format!("failed to flush Kafka producer: {}", e))
                })?;
        }

        tracing::info!(provider_id = %self.source.id, "Kafka adapter shut down");
        Ok(())
    }

    async fn subscribe(
        &self,
        ctx: CancellationToken,
        config: &KafkaSubscriptionConfiguration,
        updater: Arc<dyn SubscriptionEventUpdater>,
    ) -> Result<()> {
        self.producer()?;

        let consumer = Arc::new(create_consumer(&self.source)?);
        let assignment = {
            let consumer = consumer.clone();
            let topics = config.topics.clone();
            tokio::task::spawn_blocking(move || assign_at_now(&consumer, &topics))
                .await
                .map_err(|e| EventError::Subscribe {
                    destination: config.topics.join(","),
                    reason: e.to_string(),
                })??
        };

        tracing::debug!(
            provider_id = %self.source.id,
            topics = ?config.topics,
            partitions = assignment,
            "Subscribed to Kafka topics"
        );

        let shutdown = self.shutdown.clone();
        let provider_id = self.source.id.clone();
        self.tasks.spawn(async move {
            let batches = std::pin::pin!(consumer.stream().ready_chunks(MAX_POLL_RECORDS));
            forward_batches(
                &provider_id,
                batches,
                stream_event,
                &shutdown,
                &ctx,
                updater.as_ref(),
            )
            .await;
            tracing::debug!(provider_id = %provider_id, "Kafka subscription ended");
        });

        Ok(())
    }

    async fn publish(
        &self,
        config: &KafkaPublishConfiguration,
        events: Vec<StreamEvent>,
    ) -> Result<()> {
        let producer = self.producer()?;
        let timeout = Duration::from_secs(self.source.request_timeout_secs);

        for event in events {
            let (key, headers) = match event.metadata() {
                EventMetadata::Kafka { key, headers, .. } => (key.clone(), headers.clone()),
                _ => (None, BTreeMap::new()),
            };

            let mut record = FutureRecord::<[u8], [u8]>::to(&config.topic).payload(event.data());
            if let Some(key) = key.as_deref() {
                record = record.key(key);
            }
            if !headers.is_empty() {
                record = record.headers(owned_headers(&headers));
            }

            producer
                .send(record, timeout)
                .await
                .map_err(|(e, _)| EventError::Publish {
                    destination: config.topic.clone(),
                    reason: e.to_string(),
                })?;
        }

        tracing::debug!(
            provider_id = %self.source.id,
            topic = %config.topic,
            "Events published"
        );
        Ok(())
    }
}

/// Connection settings shared by the producer and every consumer
fn client_config(source: &KafkaEventSource) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", source.brokers.join(","))
        .set("client.id", format!("a3s.edfs.kafka.{}", source.id))
        .set(
            "connections.max.idle.ms",
            (source.conn_idle_timeout_secs * 1000).to_string(),
        );

    let tls = source.tls.as_ref().filter(|tls| tls.enabled);
    let sasl = source.authentication.as_ref().and_then(|auth| {
        if let Some(plain) = &auth.sasl_plain {
            Some(("PLAIN", plain.username.as_str(), plain.password.as_str()))
        } else {
            auth.sasl_scram.as_ref().map(|scram| {
                (
                    scram.mechanism.as_str(),
                    scram.username.as_str(),
                    scram.password.as_str(),
                )
            })
        }
    });

    let protocol = match (tls.is_some(), sasl.is_some()) {
        (false, false) => "plaintext",
        (true, false) => "ssl",
        (false, true) => "sasl_plaintext",
        (true, true) => "sasl_ssl",
    };
    config.set("security.protocol", protocol);

    if let Some(tls) = tls {
        if let Some(ca) = &tls.ca_file {
            config.set("ssl.ca.location", ca);
        }
        if let Some(cert) = &tls.cert_file {
            config.set("ssl.certificate.location", cert);
        }
        if let Some(key) = &tls.key_file {
            config.set("ssl.key.location", key);
        }
    }

    if let Some((mechanism, username, password)) = sasl {
        config
            .set("sasl.mechanisms", mechanism)
            .set("sasl.username", username)
            .set("sasl.password", password);
    }

    config
}

fn create_producer(source: &KafkaEventSource) -> Result<FutureProducer> {
    client_config(source)
        .set(
            "message.timeout.ms",
            (source.request_timeout_secs * 1000).to_string(),
        )
        .create()
        .map_err(|e| EventError::Connection(format!("failed to create Kafka producer: {}", e)))
}

fn create_consumer(source: &KafkaEventSource) -> Result<StreamConsumer> {
    client_config(source)
        .set("group.id", consumer_group_id(&source.id))
        .set("enable.auto.commit", "false")
        .set("enable.partition.eof", "false")
        .set("auto.offset.reset", "latest")
        .set("fetch.wait.max.ms", source.fetch_max_wait_ms.to_string())
        .create()
        .map_err(|e| EventError::Connection(format!("failed to create Kafka consumer: {}", e)))
}

/// A group id no other subscription shares
fn consumer_group_id(provider_id: &str) -> String {
    format!("edfs-{}-{}", provider_id, uuid::Uuid::new_v4())
}

/// Assign every partition of `topics` at the first offset produced from now on
///
/// Blocks on broker round trips; run it off the async workers. Returns the
/// number of assigned partitions.
fn assign_at_now(consumer: &StreamConsumer, topics: &[String]) -> Result<usize> {
    let now = chrono::Utc::now().timestamp_millis();
    let mut wanted = TopicPartitionList::new();

    for topic in topics {
        let metadata = consumer
            .fetch_metadata(Some(topic.as_str()), METADATA_TIMEOUT)
            .map_err(|e| subscribe_error(topic, e))?;
        for topic_metadata in metadata.topics() {
            if let Some(e) = topic_metadata.error() {
                return Err(EventError::Subscribe {
                    destination: topic.clone(),
                    reason: format!("{:?}", RDKafkaErrorCode::from(e)),
                });
            }
            for partition in topic_metadata.partitions() {
                wanted
                    .add_partition_offset(topic, partition.id(), Offset::Offset(now))
                    .map_err(|e| subscribe_error(topic, e))?;
            }
        }
    }

    let positions = consumer
        .offsets_for_times(wanted, METADATA_TIMEOUT)
        .map_err(|e| subscribe_error(&topics.join(","), e))?;

    // Partitions without a newer message come back as End, which the consumer
    // would only resolve on its first fetch. Pin them to the high watermark.
    let mut assignment = TopicPartitionList::new();
    for elem in positions.elements() {
        let offset = match elem.offset() {
            Offset::End | Offset::Invalid => {
                let (_, high) = consumer
                    .fetch_watermarks(elem.topic(), elem.partition(), METADATA_TIMEOUT)
                    .map_err(|e| subscribe_error(elem.topic(), e))?;
                Offset::Offset(high)
            }
            offset => offset,
        };
        assignment
            .add_partition_offset(elem.topic(), elem.partition(), offset)
            .map_err(|e| subscribe_error(elem.topic(), e))?;
    }

    consumer
        .assign(&assignment)
        .map_err(|e| subscribe_error(&topics.join(","), e))?;

    Ok(assignment.count())
}

fn subscribe_error(destination: &str, e: KafkaError) -> EventError {
    EventError::Subscribe {
        destination: destination.to_string(),
        reason: e.to_string(),
    }
}

/// Whether a poll error is transient and the consumer keeps running
/// Hand polled batches to the updater until the subscription is cancelled
///
/// Retriable poll errors are skipped. A fatal error, or a consumer stream
/// that ends on its own, closes the subscription with
/// `DownstreamServiceError`.
async fn forward_batches<S, M>(
    provider_id: &str,
    mut batches: S,
    to_event: impl Fn(&M) -> StreamEvent,
    shutdown: &CancellationToken,
    ctx: &CancellationToken,
    updater: &dyn SubscriptionEventUpdater,
) where
    S: Stream<Item = Vec<KafkaResult<M>>> + Unpin,
{
    loop {
        let batch = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ctx.cancelled() => break,
            batch = batches.next() => batch,
        };
        let Some(batch) = batch else {
            tracing::error!(provider_id = %provider_id, "Kafka consumer stream ended, closing subscription");
            updater.close(SubscriptionCloseKind::DownstreamServiceError);
            break;
        };

        let mut events = Vec::with_capacity(batch.len());
        let mut fatal = None;
        for message in batch {
            match message {
                Ok(message) => events.push(to_event(&message)),
                Err(e) if is_retriable(&e) => {
                    tracing::warn!(provider_id = %provider_id, error = %e, "Retriable Kafka poll error");
                }
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
            }
        }

        if !events.is_empty() {
            if let Err(e) = updater.update(events).await {
                updater.close(e.close_kind());
                break;
            }
        }

        if let Some(e) = fatal {
            tracing::error!(provider_id = %provider_id, error = %e, "Kafka poll failed, closing subscription");
            updater.close(SubscriptionCloseKind::DownstreamServiceError);
            break;
        }
    }
}

fn is_retriable(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::PartitionEOF
                | RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::LeaderNotAvailable
                | RDKafkaErrorCode::NotLeaderForPartition
        )
    )
}

fn owned_headers(headers: &BTreeMap<String, Bytes>) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(rdkafka::message::Header {
                key: key.as_str(),
                value: Some(&value[..]),
            })
        })
}

fn stream_event(message: &BorrowedMessage<'_>) -> StreamEvent {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| {
                    (
                        h.key.to_string(),
                        h.value.map(Bytes::copy_from_slice).unwrap_or_default(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    StreamEvent::with_metadata(
        Bytes::copy_from_slice(message.payload().unwrap_or_default()),
        EventMetadata::Kafka {
            topic: message.topic().to_string(),
            partition: Some(message.partition()),
            offset: Some(message.offset()),
            key: message.key().map(Bytes::copy_from_slice),
            headers,
        },
    )
}
