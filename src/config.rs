//! Provider configuration
//!
//! Mirrors the `events.providers` section of the gateway config file:
//!
//! ```yaml
//! providers:
//!   nats:
//!     - id: default
//!       url: nats://localhost:4222
//!   kafka:
//!     - id: my-kafka
//!       brokers: ["localhost:9092"]
//! ```

use crate::error::{EventError, Result};
use crate::types::ProviderType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Common view over the connection settings of a provider
pub trait ProviderSource: Send + Sync {
    fn id(&self) -> &str;
}

/// Root of the events configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventsConfiguration {
    pub providers: EventProviders,
}

/// Configured providers, grouped by backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventProviders {
    pub kafka: Vec<KafkaEventSource>,
    pub nats: Vec<NatsEventSource>,
    pub redis: Vec<RedisEventSource>,
    pub sqs: Vec<SqsEventSource>,
}

impl EventsConfiguration {
    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| EventError::Config(format!("invalid events configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| EventError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&yaml)
    }

    /// Check ids and connection parameters
    pub fn validate(&self) -> Result<()> {
        let providers = &self.providers;
        unique_ids(ProviderType::Kafka, &providers.kafka)?;
        unique_ids(ProviderType::Nats, &providers.nats)?;
        unique_ids(ProviderType::Redis, &providers.redis)?;
        unique_ids(ProviderType::Sqs, &providers.sqs)?;

        for source in &providers.kafka {
            source.validate()?;
        }
        for source in &providers.nats {
            if source.url.trim().is_empty() {
                return Err(EventError::Config(format!(
                    "nats provider \"{}\" has no url",
                    source.id
                )));
            }
        }
        for source in &providers.redis {
            if source.urls.is_empty() {
                return Err(EventError::Config(format!(
                    "redis provider \"{}\" has no urls",
                    source.id
                )));
            }
        }
        for source in &providers.sqs {
            source.validate()?;
        }
        Ok(())
    }
}

fn unique_ids<S: ProviderSource>(provider_type: ProviderType, sources: &[S]) -> Result<()> {
    let mut seen = HashSet::new();
    for source in sources {
        if source.id().is_empty() {
            return Err(EventError::Config(format!(
                "{} provider without an id",
                provider_type
            )));
        }
        if !seen.insert(source.id()) {
            return Err(EventError::Config(format!(
                "duplicate {} provider id \"{}\"",
                provider_type,
                source.id()
            )));
        }
    }
    Ok(())
}

fn default_kafka_request_timeout_secs() -> u64 {
    10
}

fn default_kafka_conn_idle_timeout_secs() -> u64 {
    60
}

fn default_kafka_fetch_max_wait_ms() -> u64 {
    500
}

/// Kafka cluster connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaEventSource {
    pub id: String,

    /// Seed brokers (`host:port`)
    pub brokers: Vec<String>,

    #[serde(default)]
    pub tls: Option<KafkaTlsConfiguration>,

    #[serde(default)]
    pub authentication: Option<KafkaAuthentication>,

    /// Upper bound on waiting for a produce acknowledgement
    #[serde(default = "default_kafka_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Idle broker connections are closed after this long
    #[serde(default = "default_kafka_conn_idle_timeout_secs")]
    pub conn_idle_timeout_secs: u64,

    #[serde(default = "default_kafka_fetch_max_wait_ms")]
    pub fetch_max_wait_ms: u64,
}

impl KafkaEventSource {
    pub fn new(id: impl Into<String>, brokers: Vec<String>) -> Self {
        Self {
            id: id.into(),
            brokers,
            tls: None,
            authentication: None,
            request_timeout_secs: default_kafka_request_timeout_secs(),
            conn_idle_timeout_secs: default_kafka_conn_idle_timeout_secs(),
            fetch_max_wait_ms: default_kafka_fetch_max_wait_ms(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(EventError::Config(format!(
                "kafka provider \"{}\" has no brokers",
                self.id
            )));
        }
        if let Some(auth) = &self.authentication {
            if auth.sasl_plain.is_some() && auth.sasl_scram.is_some() {
                return Err(EventError::Config(format!(
                    "kafka provider \"{}\" configures both SASL/PLAIN and SASL/SCRAM",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

impl ProviderSource for KafkaEventSource {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KafkaTlsConfiguration {
    pub enabled: bool,
    pub ca_file: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KafkaAuthentication {
    pub sasl_plain: Option<SaslCredentials>,
    pub sasl_scram: Option<SaslScramCredentials>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaslCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaslScramCredentials {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub mechanism: ScramMechanism,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScramMechanism {
    #[default]
    #[serde(rename = "SCRAM-SHA-256")]
    Sha256,
    #[serde(rename = "SCRAM-SHA-512")]
    Sha512,
}

impl ScramMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "SCRAM-SHA-256",
            Self::Sha512 => "SCRAM-SHA-512",
        }
    }
}

fn default_nats_connect_timeout_secs() -> u64 {
    5
}

fn default_nats_request_timeout_secs() -> u64 {
    10
}

/// NATS server connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatsEventSource {
    pub id: String,

    /// Server URL (e.g., "nats://127.0.0.1:4222")
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub authentication: Option<NatsAuthentication>,

    /// Connection timeout in seconds
    #[serde(default = "default_nats_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Request/reply timeout in seconds
    #[serde(default = "default_nats_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl NatsEventSource {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            authentication: None,
            connect_timeout_secs: default_nats_connect_timeout_secs(),
            request_timeout_secs: default_nats_request_timeout_secs(),
        }
    }
}

impl ProviderSource for NatsEventSource {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Token or user/password; a token wins when both are set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NatsAuthentication {
    pub token: Option<String>,
    pub user_info: Option<NatsUserInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatsUserInfo {
    pub username: String,
    pub password: String,
}

/// Redis server or cluster connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisEventSource {
    pub id: String,

    /// `redis://` URLs; a single URL unless `cluster_enabled`
    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default)]
    pub cluster_enabled: bool,
}

impl RedisEventSource {
    pub fn new(id: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            id: id.into(),
            urls,
            cluster_enabled: false,
        }
    }
}

impl ProviderSource for RedisEventSource {
    fn id(&self) -> &str {
        &self.id
    }
}

fn default_sqs_wait_time_seconds() -> i32 {
    20
}

fn default_sqs_max_number_of_messages() -> i32 {
    10
}

fn default_sqs_visibility_timeout_seconds() -> i32 {
    30
}

/// Amazon SQS account and polling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqsEventSource {
    pub id: String,

    pub region: String,

    /// Endpoint override (e.g., a local emulator)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Static credentials; the default AWS provider chain is used otherwise
    #[serde(default)]
    pub authentication: Option<SqsAuthentication>,

    /// Long-poll duration, 0..=20
    #[serde(default = "default_sqs_wait_time_seconds")]
    pub wait_time_seconds: i32,

    /// Batch size per receive, 1..=10
    #[serde(default = "default_sqs_max_number_of_messages")]
    pub max_number_of_messages: i32,

    #[serde(default = "default_sqs_visibility_timeout_seconds")]
    pub visibility_timeout_seconds: i32,
}

impl SqsEventSource {
    pub fn new(id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            region: region.into(),
            endpoint: None,
            authentication: None,
            wait_time_seconds: default_sqs_wait_time_seconds(),
            max_number_of_messages: default_sqs_max_number_of_messages(),
            visibility_timeout_seconds: default_sqs_visibility_timeout_seconds(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(EventError::Config(format!(
                "sqs provider \"{}\" has no region",
                self.id
            )));
        }
        if !(0..=20).contains(&self.wait_time_seconds) {
            return Err(EventError::Config(format!(
                "sqs provider \"{}\": waitTimeSeconds must be within 0..=20",
                self.id
            )));
        }
        if !(1..=10).contains(&self.max_number_of_messages) {
            return Err(EventError::Config(format!(
                "sqs provider \"{}\": maxNumberOfMessages must be within 1..=10",
                self.id
            )));
        }
        if self.visibility_timeout_seconds < 0 {
            return Err(EventError::Config(format!(
                "sqs provider \"{}\": visibilityTimeoutSeconds must not be negative",
                self.id
            )));
        }
        Ok(())
    }
}

impl ProviderSource for SqsEventSource {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqsAuthentication {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

/// Identity of this gateway instance
///
/// Durable consumer names derive from it so that every instance gets its
/// own JetStream consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub host_name: String,
    pub listen_addr: String,
}

impl InstanceIdentity {
    pub fn new(host_name: impl Into<String>, listen_addr: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            listen_addr: listen_addr.into(),
        }
    }

    /// Identity of the current host listening on `listen_addr`
    pub fn detect(listen_addr: impl Into<String>) -> Self {
        let host_name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self::new(host_name, listen_addr)
    }

    /// `host-listenAddr`
    pub fn identifier(&self) -> String {
        format!("{}-{}", self.host_name, self.listen_addr)
    }
}
