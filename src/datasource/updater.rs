//! Per-subscription bridge from adapters to the engine sink

use crate::engine::{SubscriptionCloseKind, SubscriptionUpdater};
use crate::error::HookError;
use crate::hooks::{HookContext, Hooks};
use crate::provider::EventConfiguration;
use crate::types::StreamEvent;
use async_trait::async_trait;
use std::sync::Arc;

/// What adapters push received batches into
#[async_trait]
pub trait SubscriptionEventUpdater: Send + Sync {
    /// Deliver a batch to the client, running receive hooks first
    ///
    /// An `Err` is always close-tagged: the adapter must stop delivering,
    /// call `close(err.close_kind())`, and end its task.
    async fn update(&self, events: Vec<StreamEvent>) -> Result<(), HookError>;

    fn complete(&self);

    fn close(&self, kind: SubscriptionCloseKind);
}

/// `SubscriptionEventUpdater` bound to one subscription
pub struct EventUpdater {
    config: Arc<dyn EventConfiguration>,
    hooks: Hooks,
    ctx: HookContext,
    updater: Arc<dyn SubscriptionUpdater>,
}

impl EventUpdater {
    pub fn new(
        config: Arc<dyn EventConfiguration>,
        hooks: Hooks,
        ctx: HookContext,
        updater: Arc<dyn SubscriptionUpdater>,
    ) -> Self {
        Self {
            config,
            hooks,
            ctx,
            updater,
        }
    }

    fn forward(&self, events: &[StreamEvent]) {
        for event in events {
            self.updater.update(event.data());
        }
    }
}

#[async_trait]
impl SubscriptionEventUpdater for EventUpdater {
    async fn update(&self, events: Vec<StreamEvent>) -> Result<(), HookError> {
        if !self.hooks.has_receive_hooks() {
            self.forward(&events);
            return Ok(());
        }

        let _permit = self.hooks.acquire_receive_permit().await;
        match self
            .hooks
            .apply_receive_event_hooks(&self.ctx, self.config.as_ref(), events)
            .await
        {
            Ok(events) => {
                self.forward(&events);
                Ok(())
            }
            Err(err) if err.should_close_subscription() => {
                tracing::warn!(
                    provider_id = self.config.provider_id(),
                    field = self.config.root_field_name(),
                    close_kind = ?err.close_kind(),
                    error = %err,
                    "Receive hook closed subscription"
                );
                Err(err)
            }
            Err(err) => {
                tracing::error!(
                    provider_id = self.config.provider_id(),
                    provider_type = %self.config.provider_type(),
                    field = self.config.root_field_name(),
                    error = %err,
                    "Receive hook failed, dropping events"
                );
                Ok(())
            }
        }
    }

    fn complete(&self) {
        self.updater.complete();
    }

    fn close(&self, kind: SubscriptionCloseKind) {
        self.updater.close(kind);
    }
}
