//! Error types for a3s-edfs

use crate::engine::SubscriptionCloseKind;
use crate::types::{EventType, ProviderType};
use std::fmt;
use thiserror::Error;

/// Errors that can occur in the event data-source framework
#[derive(Debug, Error)]
pub enum EventError {
    /// Broker connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish failure
    #[error("Failed to publish event to '{destination}': {reason}")]
    Publish { destination: String, reason: String },

    /// Subscribe failure
    #[error("Failed to subscribe to '{destination}': {reason}")]
    Subscribe { destination: String, reason: String },

    /// Request/reply failure
    #[error("Request to subject '{subject}' failed: {reason}")]
    Request { subject: String, reason: String },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// An event references a provider id that no configured source defines
    #[error("failed to find {provider_type} provider with id \"{provider_id}\": provider not defined")]
    ProviderNotDefined {
        provider_id: String,
        provider_type: ProviderType,
    },

    /// No built provider exists for the id
    #[error("no {provider_type} provider exists with id \"{provider_id}\"")]
    ProviderNotFound {
        provider_id: String,
        provider_type: ProviderType,
    },

    /// The event type is not supported by the backend for this operation
    #[error("event type \"{event_type}\" is not supported by {provider_type} for this operation")]
    UnsupportedEventType {
        event_type: EventType,
        provider_type: ProviderType,
    },

    /// The backend has no request/reply semantics
    #[error("{provider_type} does not support request/reply")]
    RequestNotSupported { provider_type: ProviderType },

    /// Publish and request operations address exactly one destination
    #[error("{provider_type} {event_type} events must define exactly one {address}, found {count}")]
    AddressCount {
        provider_type: ProviderType,
        event_type: EventType,
        address: &'static str,
        count: usize,
    },

    /// A subscription has no addresses, or an address is blank
    #[error("{provider_type} {event_type} events must define non-empty {address}s")]
    MissingAddress {
        provider_type: ProviderType,
        event_type: EventType,
        address: &'static str,
    },

    /// NATS subject failed validation
    #[error("invalid subject \"{0}\"")]
    InvalidSubject(String),

    /// Argument template extraction or rendering failure
    #[error("Template error: {0}")]
    Template(String),

    /// A required key is missing from a JSON input
    #[error("key path not found: {0}")]
    KeyPathNotFound(String),

    /// Stream management error (JetStream)
    #[error("Stream error: {0}")]
    Stream(String),

    /// Consumer creation or management error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Operation attempted before `startup` completed
    #[error("{0} adapter is not started")]
    NotStarted(ProviderType),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Hook pipeline failure
    #[error(transparent)]
    Hook(#[from] HookError),

    /// Error carrying a client-safe message
    #[error(transparent)]
    Public(#[from] PublicError),
}

/// Result type alias for event operations
pub type Result<T> = std::result::Result<T, EventError>;

/// Error returned by user hooks
///
/// A hook error may carry a close tag. Tagged errors terminate the
/// subscription with the given close kind; untagged errors only drop the
/// batch being processed (receive hooks) or abort the operation (publish
/// and start hooks).
#[derive(Debug)]
pub struct HookError {
    message: String,
    close: Option<SubscriptionCloseKind>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HookError {
    /// A plain hook failure
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            close: None,
            source: None,
        }
    }

    /// A hook failure that closes the subscription normally
    pub fn close_subscription(message: impl Into<String>) -> Self {
        Self::new(message).with_close_kind(SubscriptionCloseKind::Normal)
    }

    /// Tag the error with the close kind the subscription ends with
    pub fn with_close_kind(mut self, kind: SubscriptionCloseKind) -> Self {
        self.close = Some(kind);
        self
    }

    /// Attach the underlying cause
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the subscription must be closed
    pub fn should_close_subscription(&self) -> bool {
        self.close.is_some()
    }

    /// Close kind to report to the engine; `Normal` for untagged errors
    pub fn close_kind(&self) -> SubscriptionCloseKind {
        self.close.unwrap_or(SubscriptionCloseKind::Normal)
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Error with a message safe to return to GraphQL clients
///
/// `Display` renders only the public message; the broker-level cause stays
/// available through `source()` for logging.
#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct PublicError {
    public_message: String,
    #[source]
    internal: Box<dyn std::error::Error + Send + Sync>,
}

impl PublicError {
    pub fn new(
        public_message: impl Into<String>,
        internal: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            public_message: public_message.into(),
            internal: internal.into(),
        }
    }

    pub fn public_message(&self) -> &str {
        &self.public_message
    }

    pub fn internal(&self) -> &(dyn std::error::Error + Send + Sync) {
        self.internal.as_ref()
    }
}
