//! Engine data sources backed by providers
//!
//! One generic implementation per operation kind, parameterised by the
//! adapter: `PubSubPublishDataSource` for mutation fields,
//! `PubSubRequestDataSource` for NATS query fields and
//! `PubSubSubscriptionDataSource` for subscription fields. Each backend's
//! `EngineDataSourceFactory` picks the right one for a field.

mod envelope;
mod updater;

pub use envelope::{
    render_publish_input, write_unique_request_id, EnvelopeEvent, PUBLISH_FAILURE,
    PUBLISH_SUCCESS,
};
pub use updater::{EventUpdater, SubscriptionEventUpdater};

use crate::engine::{DataSource, SubscriptionDataSource, SubscriptionUpdater};
use crate::error::{EventError, PublicError, Result};
use crate::hooks::{HookContext, StartupHookContext};
use crate::provider::{Adapter, EventConfiguration, PubSubProvider, PublishEventConfiguration};
use crate::types::{EventType, ProviderType};
use async_trait::async_trait;
use std::hash::Hasher;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-field factory handing the planner everything it needs for one
/// event-backed field
pub trait EngineDataSourceFactory: Send + Sync {
    fn field_name(&self) -> &str;

    /// Data source of a publish or request field
    fn resolve_data_source(&self) -> Result<Arc<dyn DataSource>>;

    /// Input template of a publish or request field
    fn resolve_data_source_input(&self, event_data: &[u8]) -> Result<String>;

    fn resolve_data_source_subscription(&self) -> Result<Arc<dyn SubscriptionDataSource>>;

    fn resolve_data_source_subscription_input(&self) -> Result<String>;

    /// Rewrite every address (subject, topic, channel, queue URL) through
    /// `extract`, which turns argument templates into variable placeholders
    fn transform_event_data(
        &mut self,
        extract: &mut dyn FnMut(&str) -> Result<String>,
    ) -> Result<()>;
}

/// Reject blank addresses, and subscriptions without any address
pub fn check_addresses(
    provider_type: ProviderType,
    event_type: EventType,
    address: &'static str,
    addresses: &[String],
) -> Result<()> {
    let none = event_type == EventType::Subscribe && addresses.is_empty();
    if none || addresses.iter().any(|a| a.trim().is_empty()) {
        return Err(EventError::MissingAddress {
            provider_type,
            event_type,
            address,
        });
    }
    Ok(())
}

/// Hashing function of a backend's subscription input
pub type UniqueRequestIdFn = fn(&[u8], &mut dyn Hasher) -> Result<()>;

/// Data source of a publish field
///
/// Business-level failures, including hook rejections, are reported in the
/// field result as `{"success": false}` rather than as errors.
pub struct PubSubPublishDataSource<A: Adapter> {
    provider: Arc<PubSubProvider<A>>,
}

impl<A: Adapter> PubSubPublishDataSource<A> {
    pub fn new(provider: Arc<PubSubProvider<A>>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<A: Adapter> DataSource for PubSubPublishDataSource<A> {
    async fn load(&self, ctx: CancellationToken, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let config: A::PublishConfig = serde_json::from_slice(input)?;
        let events = vec![config.event()];

        match self
            .provider
            .publish(&HookContext::new(ctx), &config, events)
            .await
        {
            Ok(()) => out.extend_from_slice(PUBLISH_SUCCESS),
            Err(e) => {
                tracing::error!(
                    provider_id = config.provider_id(),
                    provider_type = %config.provider_type(),
                    field = config.root_field_name(),
                    error = %e,
                    "Publish failed"
                );
                out.extend_from_slice(PUBLISH_FAILURE);
            }
        }
        Ok(())
    }
}

/// Data source of a request/reply field
pub struct PubSubRequestDataSource<A: Adapter> {
    provider: Arc<PubSubProvider<A>>,
}

impl<A: Adapter> PubSubRequestDataSource<A> {
    pub fn new(provider: Arc<PubSubProvider<A>>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<A: Adapter> DataSource for PubSubRequestDataSource<A> {
    async fn load(&self, ctx: CancellationToken, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let config: A::PublishConfig = serde_json::from_slice(input)?;
        let event = config.event();

        let result = tokio::select! {
            _ = ctx.cancelled() => Err(EventError::Timeout("request cancelled".to_string())),
            result = self.provider.request(&config, event, out) => result,
        };

        result.map_err(|e| {
            tracing::error!(
                provider_id = config.provider_id(),
                provider_type = %config.provider_type(),
                field = config.root_field_name(),
                error = %e,
                "Request failed"
            );
            PublicError::new(
                format!("failed to request from {} provider", config.provider_type()),
                e,
            )
            .into()
        })
    }
}

/// Data source of a subscription field
pub struct PubSubSubscriptionDataSource<A: Adapter> {
    provider: Arc<PubSubProvider<A>>,
    unique_request_id: UniqueRequestIdFn,
}

impl<A: Adapter> PubSubSubscriptionDataSource<A> {
    pub fn new(provider: Arc<PubSubProvider<A>>, unique_request_id: UniqueRequestIdFn) -> Self {
        Self {
            provider,
            unique_request_id,
        }
    }
}

#[async_trait]
impl<A: Adapter> SubscriptionDataSource for PubSubSubscriptionDataSource<A> {
    fn unique_request_id(&self, input: &[u8], hasher: &mut dyn Hasher) -> Result<()> {
        (self.unique_request_id)(input, hasher)
    }

    async fn start(
        &self,
        ctx: CancellationToken,
        input: &[u8],
        updater: Arc<dyn SubscriptionUpdater>,
    ) -> Result<()> {
        let config: A::SubscriptionConfig = serde_json::from_slice(input)?;
        let event_updater = Arc::new(EventUpdater::new(
            Arc::new(config.clone()),
            self.provider.hooks().clone(),
            HookContext::new(ctx.clone()),
            updater,
        ));

        self.provider.subscribe(ctx, &config, event_updater).await
    }

    async fn subscription_on_start(&self, ctx: &StartupHookContext, input: &[u8]) -> Result<bool> {
        let config: A::SubscriptionConfig = serde_json::from_slice(input)?;

        match self
            .provider
            .hooks()
            .apply_subscription_on_start_hooks(ctx, &config)
            .await
        {
            Ok(()) => Ok(false),
            Err(e) if e.should_close_subscription() => {
                tracing::info!(
                    provider_id = config.provider_id(),
                    field = config.root_field_name(),
                    reason = %e,
                    "Subscription closed by start hook"
                );
                Ok(true)
            }
            Err(e) => Err(PublicError::new(e.message().to_string(), e).into()),
        }
    }
}
