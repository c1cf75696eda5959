//! Contracts between the GraphQL engine and event data sources
//!
//! The planner and executor live outside this crate. These traits are the
//! boundary they call through: `DataSource` for publish and request fields,
//! `SubscriptionDataSource` for subscription fields, and
//! `SubscriptionUpdater` as the engine-side sink of one subscription.

use crate::error::Result;
use crate::hooks::StartupHookContext;
use async_trait::async_trait;
use std::hash::Hasher;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Reason a subscription is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionCloseKind {
    /// The stream ended normally
    Normal,
    /// The backend or a hook failed
    DownstreamServiceError,
    /// The gateway is shutting down
    GoingAway,
}

/// Engine-side sink of a single subscription
pub trait SubscriptionUpdater: Send + Sync {
    /// Deliver one payload to the client
    fn update(&self, data: &[u8]);

    /// The stream has no more data
    fn complete(&self);

    /// Terminate the subscription
    fn close(&self, kind: SubscriptionCloseKind);
}

/// Engine data source of a publish or request field
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Execute the operation for a rendered input, writing the field result to `out`
    async fn load(&self, ctx: CancellationToken, input: &[u8], out: &mut Vec<u8>) -> Result<()>;
}

/// Engine data source of a subscription field
#[async_trait]
pub trait SubscriptionDataSource: Send + Sync {
    /// Hash the identity of a subscription so the engine can share one
    /// backend subscription between equivalent client subscriptions
    fn unique_request_id(&self, input: &[u8], hasher: &mut dyn Hasher) -> Result<()>;

    /// Open the backend subscription. Returns once delivery is running;
    /// events then flow to `updater` until `ctx` is cancelled.
    async fn start(
        &self,
        ctx: CancellationToken,
        input: &[u8],
        updater: Arc<dyn SubscriptionUpdater>,
    ) -> Result<()>;

    /// Run the subscription-start hooks. `Ok(true)` means the subscription
    /// must be closed right away.
    async fn subscription_on_start(&self, ctx: &StartupHookContext, input: &[u8]) -> Result<bool>;
}
