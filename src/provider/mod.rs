//! Provider abstraction, one configured broker connection per provider
//!
//! A backend implements `Adapter` (connect, subscribe, publish and, for
//! NATS, request). `PubSubProvider` wraps exactly one adapter, applies the
//! process-wide hooks around it, and is what the registry starts and stops
//! through the object-safe `Provider` trait.

use crate::datasource::SubscriptionEventUpdater;
use crate::error::{EventError, Result};
use crate::hooks::{HookContext, Hooks};
use crate::types::{ProviderType, StreamEvent};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod kafka;
mod lazy;
pub mod nats;
pub mod redis;
pub mod sqs;

pub use lazy::LazyClient;

/// Runtime configuration of one publish, request or subscription operation
pub trait EventConfiguration: Send + Sync + fmt::Debug {
    fn provider_id(&self) -> &str;

    fn provider_type(&self) -> ProviderType;

    /// GraphQL field the operation was planned for
    fn root_field_name(&self) -> &str;

    /// Downcast hook for hooks that need backend-specific fields
    fn as_any(&self) -> &dyn Any;
}

/// Configuration of a publish or request operation carrying its event
pub trait PublishEventConfiguration: EventConfiguration {
    fn event(&self) -> StreamEvent;
}

/// Backend-specific broker plumbing
///
/// `subscribe` must return as soon as delivery is running; messages are
/// then pushed to the updater from a task owned by the adapter until either
/// the subscription token or the adapter's shutdown fires. Calls made
/// before `startup` fail with `EventError::NotStarted`.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    type PublishConfig: PublishEventConfiguration + DeserializeOwned + 'static;
    type SubscriptionConfig: EventConfiguration + DeserializeOwned + Clone + 'static;

    async fn startup(&self) -> Result<()>;

    /// Stop every subscription task and release broker handles
    async fn shutdown(&self) -> Result<()>;

    async fn subscribe(
        &self,
        ctx: CancellationToken,
        config: &Self::SubscriptionConfig,
        updater: Arc<dyn SubscriptionEventUpdater>,
    ) -> Result<()>;

    async fn publish(&self, config: &Self::PublishConfig, events: Vec<StreamEvent>) -> Result<()>;

    /// Request/reply; writes the raw reply to `out`
    ///
    /// Only NATS has request semantics. Every other backend reports
    /// `EventError::RequestNotSupported`.
    async fn request(
        &self,
        config: &Self::PublishConfig,
        _event: StreamEvent,
        _out: &mut Vec<u8>,
    ) -> Result<()> {
        Err(EventError::RequestNotSupported {
            provider_type: config.provider_type(),
        })
    }
}

/// Lifecycle view of a provider, independent of its backend
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    fn type_id(&self) -> ProviderType;

    async fn startup(&self) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;
}

/// A provider backed by one adapter, with hooks applied around it
pub struct PubSubProvider<A: Adapter> {
    id: String,
    type_id: ProviderType,
    adapter: A,
    hooks: Hooks,
}

impl<A: Adapter> PubSubProvider<A> {
    pub fn new(id: impl Into<String>, type_id: ProviderType, adapter: A, hooks: Hooks) -> Self {
        Self {
            id: id.into(),
            type_id,
            adapter,
            hooks,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Run the publish hooks, then hand the resulting events to the adapter
    ///
    /// A hook error aborts the publish without reaching the broker.
    pub async fn publish(
        &self,
        ctx: &HookContext,
        config: &A::PublishConfig,
        events: Vec<StreamEvent>,
    ) -> Result<()> {
        let events = self
            .hooks
            .apply_publish_event_hooks(ctx, config, events)
            .await
            .map_err(|e| {
                tracing::warn!(
                    provider_id = %self.id,
                    provider_type = %self.type_id,
                    field = config.root_field_name(),
                    error = %e,
                    "Publish hook rejected events"
                );
                EventError::Hook(e)
            })?;

        if events.is_empty() {
            tracing::debug!(
                provider_id = %self.id,
                field = config.root_field_name(),
                "Publish hooks dropped all events"
            );
            return Ok(());
        }

        self.adapter.publish(config, events).await
    }

    pub async fn subscribe(
        &self,
        ctx: CancellationToken,
        config: &A::SubscriptionConfig,
        updater: Arc<dyn SubscriptionEventUpdater>,
    ) -> Result<()> {
        self.adapter.subscribe(ctx, config, updater).await
    }

    pub async fn request(
        &self,
        config: &A::PublishConfig,
        event: StreamEvent,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        self.adapter.request(config, event, out).await
    }
}

impl<A: Adapter> fmt::Debug for PubSubProvider<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubProvider")
            .field("id", &self.id)
            .field("type_id", &self.type_id)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<A: Adapter> Provider for PubSubProvider<A> {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_id(&self) -> ProviderType {
        self.type_id
    }

    async fn startup(&self) -> Result<()> {
        tracing::info!(provider_id = %self.id, provider_type = %self.type_id, "Starting provider");
        self.adapter.startup().await
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!(provider_id = %self.id, provider_type = %self.type_id, "Shutting down provider");
        self.adapter.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HookError;
    use crate::hooks::publish_hook;
    use crate::test_support::{MockAdapter, TestConfig};

    fn provider(hooks: Hooks) -> PubSubProvider<MockAdapter> {
        PubSubProvider::new("test-provider", ProviderType::Kafka, MockAdapter::default(), hooks)
    }

    #[tokio::test]
    async fn test_startup_and_shutdown_delegate_to_adapter() {
        let provider = provider(Hooks::new());
        assert_eq!(provider.id(), "test-provider");
        assert_eq!(Provider::type_id(&provider), ProviderType::Kafka);

        provider.startup().await.unwrap();
        provider.shutdown().await.unwrap();
        assert_eq!(provider.adapter().startups(), 1);
        assert_eq!(provider.adapter().shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_startup_error_propagates() {
        let provider = PubSubProvider::new(
            "p",
            ProviderType::Nats,
            MockAdapter::failing_startup(),
            Hooks::new(),
        );
        assert!(matches!(provider.startup().await, Err(EventError::Connection(_))));
    }

    #[tokio::test]
    async fn test_publish_without_hooks_sends_events_unchanged() {
        let provider = provider(Hooks::new());
        let events = vec![StreamEvent::new("a"), StreamEvent::new("b")];

        provider
            .publish(&HookContext::default(), &TestConfig::default(), events.clone())
            .await
            .unwrap();
        assert_eq!(provider.adapter().published(), vec![events]);
    }

    #[tokio::test]
    async fn test_publish_applies_hooks_before_adapter() {
        let hooks = Hooks::new().with_on_publish_events(publish_hook(|_, _, events| {
            Ok(events.into_iter().map(|e| e.with_data("modified")).collect())
        }));
        let provider = provider(hooks);

        provider
            .publish(
                &HookContext::default(),
                &TestConfig::default(),
                vec![StreamEvent::new("original")],
            )
            .await
            .unwrap();
        assert_eq!(
            provider.adapter().published(),
            vec![vec![StreamEvent::new("modified")]]
        );
    }

    #[tokio::test]
    async fn test_publish_hook_error_skips_adapter() {
        let hooks = Hooks::new()
            .with_on_publish_events(publish_hook(|_, _, _| Err(HookError::new("rejected"))));
        let provider = provider(hooks);

        let err = provider
            .publish(
                &HookContext::default(),
                &TestConfig::default(),
                vec![StreamEvent::new("e")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::Hook(ref h) if h.message() == "rejected"));
        assert!(provider.adapter().published().is_empty());
    }

    #[tokio::test]
    async fn test_adapter_publish_error_propagates() {
        let provider = PubSubProvider::new(
            "p",
            ProviderType::Kafka,
            MockAdapter::failing_publish(),
            Hooks::new(),
        );
        let err = provider
            .publish(
                &HookContext::default(),
                &TestConfig::default(),
                vec![StreamEvent::new("e")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::Publish { .. }));
    }

    #[tokio::test]
    async fn test_request_defaults_to_unsupported() {
        let provider = provider(Hooks::new());
        let mut out = Vec::new();
        let err = provider
            .request(&TestConfig::default(), StreamEvent::new("q"), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EventError::RequestNotSupported {
                provider_type: ProviderType::Kafka
            }
        ));
        assert!(out.is_empty());
    }
}
