//! User hooks around publish, receive and subscription start
//!
//! Hooks are registered once per process and passed to every provider
//! through its constructor. Each list runs in registration order, with the
//! output of one hook feeding the next.
//!
//! ```rust
//! use a3s_edfs::hooks::{publish_hook, receive_hook, Hooks};
//!
//! let hooks = Hooks::new()
//!     .with_on_publish_events(publish_hook(|_ctx, _config, events| Ok(events)))
//!     .with_on_receive_events(receive_hook(|_ctx, _config, events| {
//!         Ok(events
//!             .into_iter()
//!             .map(|e| {
//!                 let upper = e.data().to_ascii_uppercase();
//!                 e.with_data(upper)
//!             })
//!             .collect())
//!     }));
//! assert_eq!(hooks.max_concurrent_receive_handlers(), 100);
//! ```

use crate::engine::{SubscriptionCloseKind, SubscriptionUpdater};
use crate::error::HookError;
use crate::provider::EventConfiguration;
use crate::types::StreamEvent;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

/// Default cap on concurrently running receive-hook chains
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 100;

/// Context handed to publish and receive hooks
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    cancellation: CancellationToken,
}

impl HookContext {
    pub fn new(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    /// Token cancelled when the request or subscription ends
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Context handed to subscription-start hooks
///
/// Besides the subscription's cancellation token, it lets a hook emit
/// synthetic events straight to the client before any broker message
/// arrives.
#[derive(Clone)]
pub struct StartupHookContext {
    cancellation: CancellationToken,
    updater: Arc<dyn SubscriptionUpdater>,
}

impl StartupHookContext {
    pub fn new(cancellation: CancellationToken, updater: Arc<dyn SubscriptionUpdater>) -> Self {
        Self {
            cancellation,
            updater,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Send an event to the subscribing client
    pub fn emit(&self, event: &StreamEvent) {
        self.updater.update(event.data());
    }
}

impl fmt::Debug for StartupHookContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupHookContext")
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Runs before events are handed to a backend for publishing
#[async_trait]
pub trait OnPublishEvents: Send + Sync {
    async fn on_publish_events(
        &self,
        ctx: &HookContext,
        config: &dyn EventConfiguration,
        events: Vec<StreamEvent>,
    ) -> Result<Vec<StreamEvent>, HookError>;
}

/// Runs on every batch received from a backend, before delivery to the client
#[async_trait]
pub trait OnReceiveEvents: Send + Sync {
    async fn on_receive_events(
        &self,
        ctx: &HookContext,
        config: &dyn EventConfiguration,
        events: Vec<StreamEvent>,
    ) -> Result<Vec<StreamEvent>, HookError>;
}

/// Runs once when a client subscription starts
#[async_trait]
pub trait SubscriptionOnStart: Send + Sync {
    async fn on_subscription_start(
        &self,
        ctx: &StartupHookContext,
        config: &dyn EventConfiguration,
    ) -> Result<(), HookError>;
}

struct PublishFn<F>(F);
struct ReceiveFn<F>(F);
struct StartFn<F>(F);

#[async_trait]
impl<F> OnPublishEvents for PublishFn<F>
where
    F: Fn(&HookContext, &dyn EventConfiguration, Vec<StreamEvent>) -> Result<Vec<StreamEvent>, HookError>
        + Send
        + Sync,
{
    async fn on_publish_events(
        &self,
        ctx: &HookContext,
        config: &dyn EventConfiguration,
        events: Vec<StreamEvent>,
    ) -> Result<Vec<StreamEvent>, HookError> {
        (self.0)(ctx, config, events)
    }
}

#[async_trait]
impl<F> OnReceiveEvents for ReceiveFn<F>
where
    F: Fn(&HookContext, &dyn EventConfiguration, Vec<StreamEvent>) -> Result<Vec<StreamEvent>, HookError>
        + Send
        + Sync,
{
    async fn on_receive_events(
        &self,
        ctx: &HookContext,
        config: &dyn EventConfiguration,
        events: Vec<StreamEvent>,
    ) -> Result<Vec<StreamEvent>, HookError> {
        (self.0)(ctx, config, events)
    }
}

#[async_trait]
impl<F> SubscriptionOnStart for StartFn<F>
where
    F: Fn(&StartupHookContext, &dyn EventConfiguration) -> Result<(), HookError> + Send + Sync,
{
    async fn on_subscription_start(
        &self,
        ctx: &StartupHookContext,
        config: &dyn EventConfiguration,
    ) -> Result<(), HookError> {
        (self.0)(ctx, config)
    }
}

/// Wrap a synchronous function as a publish hook
pub fn publish_hook<F>(f: F) -> Arc<dyn OnPublishEvents>
where
    F: Fn(&HookContext, &dyn EventConfiguration, Vec<StreamEvent>) -> Result<Vec<StreamEvent>, HookError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(PublishFn(f))
}

/// Wrap a synchronous function as a receive hook
pub fn receive_hook<F>(f: F) -> Arc<dyn OnReceiveEvents>
where
    F: Fn(&HookContext, &dyn EventConfiguration, Vec<StreamEvent>) -> Result<Vec<StreamEvent>, HookError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(ReceiveFn(f))
}

/// Wrap a synchronous function as a subscription-start hook
pub fn start_hook<F>(f: F) -> Arc<dyn SubscriptionOnStart>
where
    F: Fn(&StartupHookContext, &dyn EventConfiguration) -> Result<(), HookError> + Send + Sync + 'static,
{
    Arc::new(StartFn(f))
}

/// Process-wide hook registrations
#[derive(Clone)]
pub struct Hooks {
    subscription_on_start: Vec<Arc<dyn SubscriptionOnStart>>,
    on_publish_events: Vec<Arc<dyn OnPublishEvents>>,
    on_receive_events: Vec<Arc<dyn OnReceiveEvents>>,
    max_concurrent_receive_handlers: usize,
    receive_limiter: Arc<Semaphore>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            subscription_on_start: Vec::new(),
            on_publish_events: Vec::new(),
            on_receive_events: Vec::new(),
            max_concurrent_receive_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            receive_limiter: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_HANDLERS)),
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("subscription_on_start", &self.subscription_on_start.len())
            .field("on_publish_events", &self.on_publish_events.len())
            .field("on_receive_events", &self.on_receive_events.len())
            .field(
                "max_concurrent_receive_handlers",
                &self.max_concurrent_receive_handlers,
            )
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscription_on_start(mut self, hook: Arc<dyn SubscriptionOnStart>) -> Self {
        self.subscription_on_start.push(hook);
        self
    }

    pub fn with_on_publish_events(mut self, hook: Arc<dyn OnPublishEvents>) -> Self {
        self.on_publish_events.push(hook);
        self
    }

    pub fn with_on_receive_events(mut self, hook: Arc<dyn OnReceiveEvents>) -> Self {
        self.on_receive_events.push(hook);
        self
    }

    /// Cap concurrently running receive-hook chains across all subscriptions
    pub fn with_max_concurrent_receive_handlers(mut self, max: usize) -> Self {
        let max = max.max(1);
        self.max_concurrent_receive_handlers = max;
        self.receive_limiter = Arc::new(Semaphore::new(max));
        self
    }

    pub fn max_concurrent_receive_handlers(&self) -> usize {
        self.max_concurrent_receive_handlers
    }

    pub fn has_receive_hooks(&self) -> bool {
        !self.on_receive_events.is_empty()
    }

    pub(crate) async fn acquire_receive_permit(&self) -> Option<SemaphorePermit<'_>> {
        self.receive_limiter.acquire().await.ok()
    }

    /// Run the publish hooks left to right; the first error aborts the chain
    pub async fn apply_publish_event_hooks(
        &self,
        ctx: &HookContext,
        config: &dyn EventConfiguration,
        mut events: Vec<StreamEvent>,
    ) -> Result<Vec<StreamEvent>, HookError> {
        for hook in &self.on_publish_events {
            events = hook.on_publish_events(ctx, config, events).await?;
        }
        Ok(events)
    }

    /// Run the receive hooks left to right
    ///
    /// A panicking hook is contained and reported as a close-tagged error
    /// with `DownstreamServiceError`.
    pub async fn apply_receive_event_hooks(
        &self,
        ctx: &HookContext,
        config: &dyn EventConfiguration,
        mut events: Vec<StreamEvent>,
    ) -> Result<Vec<StreamEvent>, HookError> {
        for hook in &self.on_receive_events {
            let outcome = AssertUnwindSafe(hook.on_receive_events(ctx, config, events))
                .catch_unwind()
                .await;
            events = match outcome {
                Ok(result) => result?,
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    tracing::error!(
                        provider_id = config.provider_id(),
                        field = config.root_field_name(),
                        panic = %reason,
                        "Receive hook panicked"
                    );
                    return Err(HookError::new(format!("receive hook panicked: {}", reason))
                        .with_close_kind(SubscriptionCloseKind::DownstreamServiceError));
                }
            };
        }
        Ok(events)
    }

    /// Run the subscription-start hooks in order; the first error stops the chain
    pub async fn apply_subscription_on_start_hooks(
        &self,
        ctx: &StartupHookContext,
        config: &dyn EventConfiguration,
    ) -> Result<(), HookError> {
        for hook in &self.subscription_on_start {
            hook.on_subscription_start(ctx, config).await?;
        }
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingUpdater, TestConfig};

    fn append(suffix: &'static str) -> Arc<dyn OnPublishEvents> {
        publish_hook(move |_ctx, _config, events| {
            Ok(events
                .into_iter()
                .map(|e| {
                    let mut data = e.data().to_vec();
                    data.extend_from_slice(suffix.as_bytes());
                    e.with_data(data)
                })
                .collect())
        })
    }

    #[tokio::test]
    async fn test_publish_hooks_run_in_order() {
        let hooks = Hooks::new()
            .with_on_publish_events(append("-1"))
            .with_on_publish_events(append("-2"));
        let config = TestConfig::default();

        let events = hooks
            .apply_publish_event_hooks(
                &HookContext::default(),
                &config,
                vec![StreamEvent::new("e")],
            )
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data(), b"e-1-2");
    }

    #[tokio::test]
    async fn test_publish_hook_error_stops_chain() {
        let hooks = Hooks::new()
            .with_on_publish_events(publish_hook(|_, _, _| Err(HookError::new("denied"))))
            .with_on_publish_events(publish_hook(|_, _, _| panic!("must not run")));
        let config = TestConfig::default();

        let err = hooks
            .apply_publish_event_hooks(
                &HookContext::default(),
                &config,
                vec![StreamEvent::new("e")],
            )
            .await
            .unwrap_err();
        assert_eq!(err.message(), "denied");
    }

    #[tokio::test]
    async fn test_no_publish_hooks_passes_through() {
        let hooks = Hooks::new();
        let config = TestConfig::default();
        let input = vec![StreamEvent::new("a"), StreamEvent::new("b")];

        let events = hooks
            .apply_publish_event_hooks(&HookContext::default(), &config, input.clone())
            .await
            .unwrap();
        assert_eq!(events, input);
    }

    #[tokio::test]
    async fn test_receive_hook_panic_is_contained() {
        let hooks = Hooks::new().with_on_receive_events(receive_hook(|_, _, _| {
            panic!("hook exploded");
        }));
        let config = TestConfig::default();

        let err = hooks
            .apply_receive_event_hooks(
                &HookContext::default(),
                &config,
                vec![StreamEvent::new("e")],
            )
            .await
            .unwrap_err();

        assert!(err.should_close_subscription());
        assert_eq!(err.close_kind(), SubscriptionCloseKind::DownstreamServiceError);
        assert!(err.message().contains("hook exploded"));
    }

    #[tokio::test]
    async fn test_receive_hook_may_drop_all_events() {
        let hooks = Hooks::new().with_on_receive_events(receive_hook(|_, _, _| Ok(Vec::new())));
        let config = TestConfig::default();

        let events = hooks
            .apply_receive_event_hooks(
                &HookContext::default(),
                &config,
                vec![StreamEvent::new("e")],
            )
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_start_hooks_can_emit() {
        let hooks = Hooks::new()
            .with_subscription_on_start(start_hook(|ctx, _| {
                ctx.emit(&StreamEvent::new(r#"{"hello":"world"}"#));
                Ok(())
            }))
            .with_subscription_on_start(start_hook(|_, config| {
                assert_eq!(config.provider_id(), "test-provider");
                Ok(())
            }));
        let updater = Arc::new(RecordingUpdater::default());
        let ctx = StartupHookContext::new(CancellationToken::new(), updater.clone());

        hooks
            .apply_subscription_on_start_hooks(&ctx, &TestConfig::default())
            .await
            .unwrap();
        assert_eq!(updater.updates(), vec![r#"{"hello":"world"}"#.to_string()]);
    }

    #[test]
    fn test_max_concurrent_handlers_default_and_override() {
        assert_eq!(Hooks::new().max_concurrent_receive_handlers(), 100);
        assert_eq!(
            Hooks::new()
                .with_max_concurrent_receive_handlers(4)
                .max_concurrent_receive_handlers(),
            4
        );
        assert_eq!(
            Hooks::new()
                .with_max_concurrent_receive_handlers(0)
                .max_concurrent_receive_handlers(),
            1
        );
    }
}
