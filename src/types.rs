//! Core types shared by every backend
//!
//! Schema-side configuration types use camelCase JSON serialization, the
//! same wire names the composition tooling emits.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Backend kind of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Kafka,
    Nats,
    Redis,
    Sqs,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kafka => "kafka",
            Self::Nats => "nats",
            Self::Redis => "redis",
            Self::Sqs => "sqs",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of GraphQL field an event configuration backs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Mutation field; fire and forget
    Publish,
    /// Query field; request/reply (NATS only)
    Request,
    /// Subscription field
    Subscribe,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Publish => "publish",
            Self::Request => "request",
            Self::Subscribe => "subscribe",
        })
    }
}

/// Backend-specific delivery context attached to a stream event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EventMetadata {
    #[default]
    None,
    Kafka {
        topic: String,
        /// Unset on events that have not been produced yet
        partition: Option<i32>,
        offset: Option<i64>,
        key: Option<Bytes>,
        headers: BTreeMap<String, Bytes>,
    },
    Nats {
        subject: String,
    },
    Redis {
        channel: String,
    },
    Sqs {
        queue_url: String,
        message_id: Option<String>,
    },
}

/// A single message flowing through a provider
///
/// The payload is opaque bytes. Hooks own the events they receive and may
/// replace payloads in place or build new events; metadata survives a
/// payload replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEvent {
    data: Bytes,
    metadata: EventMetadata,
}

impl StreamEvent {
    /// Create an event without delivery metadata
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata: EventMetadata::None,
        }
    }

    pub fn with_metadata(data: impl Into<Bytes>, metadata: EventMetadata) -> Self {
        Self {
            data: data.into(),
            metadata,
        }
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload as a cheaply clonable buffer
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Replace the payload, keeping metadata
    pub fn set_data(&mut self, data: impl Into<Bytes>) {
        self.data = data.into();
    }

    /// Builder-style payload replacement
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.set_data(data);
        self
    }
}

/// A GraphQL type and the fields of it served by a data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeField {
    pub type_name: String,
    pub field_names: Vec<String>,
}

impl TypeField {
    pub fn new(type_name: impl Into<String>, field_names: Vec<String>) -> Self {
        Self {
            type_name: type_name.into(),
            field_names,
        }
    }
}

/// Backend-independent part of a schema event definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineEventConfiguration {
    pub provider_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub type_name: String,
    pub field_name: String,
}

/// Common view over the per-backend schema event definitions
pub trait EventDefinition: Clone + Send + Sync + 'static {
    fn engine(&self) -> &EngineEventConfiguration;

    fn provider_id(&self) -> &str {
        &self.engine().provider_id
    }
}

/// Kafka-backed field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaEventConfiguration {
    pub engine_event_configuration: EngineEventConfiguration,
    pub topics: Vec<String>,
}

/// JetStream durable consumer settings of a NATS subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatsStreamConfiguration {
    pub consumer_name: String,
    pub stream_name: String,
    /// Seconds of inactivity before the server removes the consumer; 0 keeps the server default
    #[serde(default)]
    pub consumer_inactive_threshold: i32,
}

/// NATS-backed field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatsEventConfiguration {
    pub engine_event_configuration: EngineEventConfiguration,
    pub subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_configuration: Option<NatsStreamConfiguration>,
}

/// Redis-backed field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisEventConfiguration {
    pub engine_event_configuration: EngineEventConfiguration,
    pub channels: Vec<String>,
}

/// SQS-backed field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqsEventConfiguration {
    pub engine_event_configuration: EngineEventConfiguration,
    pub queue_urls: Vec<String>,
}

macro_rules! impl_event_definition {
    ($($ty:ty),*) => {
        $(impl EventDefinition for $ty {
            fn engine(&self) -> &EngineEventConfiguration {
                &self.engine_event_configuration
            }
        })*
    };
}

impl_event_definition!(
    KafkaEventConfiguration,
    NatsEventConfiguration,
    RedisEventConfiguration,
    SqsEventConfiguration
);

/// Event definitions of one data source, grouped by backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomEvents {
    pub kafka: Vec<KafkaEventConfiguration>,
    pub nats: Vec<NatsEventConfiguration>,
    pub redis: Vec<RedisEventConfiguration>,
    pub sqs: Vec<SqsEventConfiguration>,
}

impl CustomEvents {
    pub fn is_empty(&self) -> bool {
        self.kafka.is_empty() && self.nats.is_empty() && self.redis.is_empty() && self.sqs.is_empty()
    }
}

/// Schema-side description of an event-driven subgraph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfiguration {
    pub id: String,
    #[serde(default)]
    pub root_nodes: Vec<TypeField>,
    #[serde(default)]
    pub custom_events: CustomEvents,
}
