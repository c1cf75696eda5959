//! SQS adapter on top of `aws-sdk-sqs`

use super::{SqsPublishConfiguration, SqsSubscriptionConfiguration};
use crate::config::SqsEventSource;
use crate::datasource::SubscriptionEventUpdater;
use crate::engine::SubscriptionCloseKind;
use crate::error::{EventError, Result};
use crate::provider::{Adapter, LazyClient};
use crate::types::{EventMetadata, ProviderType, StreamEvent};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::{Credentials, Region};
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Pause before retrying a failed receive
const RECEIVE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// SQS adapter of one configured provider
///
/// Subscriptions long-poll each of their queues from a dedicated task and
/// delete a message once the engine has been handed its batch.
pub struct SqsAdapter {
    source: Arc<SqsEventSource>,
    client: LazyClient<Client>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl SqsAdapter {
    pub fn new(source: SqsEventSource) -> Self {
        Self {
            source: Arc::new(source),
            client: LazyClient::new(),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .get()
            .ok_or(EventError::NotStarted(ProviderType::Sqs))
    }
}

#[async_trait]
impl Adapter for SqsAdapter {
    type PublishConfig = SqsPublishConfiguration;
    type SubscriptionConfig = SqsSubscriptionConfiguration;

    async fn startup(&self) -> Result<()> {
        self.client
            .get_or_connect(|| async { Ok(build_client(&self.source).await) })
            .await?;
        tracing::info!(
            provider_id = %self.source.id,
            region = %self.source.region,
            "SQS client created"
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!(provider_id = %self.source.id, "SQS adapter shut down");
        Ok(())
    }

    async fn subscribe(
        &self,
        ctx: CancellationToken,
        config: &SqsSubscriptionConfiguration,
        updater: Arc<dyn SubscriptionEventUpdater>,
    ) -> Result<()> {
        let queues = Arc::new(SqsQueues {
            client: self.client()?.clone(),
            source: self.source.clone(),
        });
        spawn_pollers(
            &self.tasks,
            queues,
            &self.source.id,
            &config.queue_urls,
            &self.shutdown,
            &ctx,
            updater,
        );

        tracing::debug!(
            provider_id = %self.source.id,
            queue_urls = ?config.queue_urls,
            "Polling SQS queues"
        );
        Ok(())
    }

    async fn publish(
        &self,
        config: &SqsPublishConfiguration,
        events: Vec<StreamEvent>,
    ) -> Result<()> {
        let client = self.client()?;
        let publish_error = |reason: String| EventError::Publish {
            destination: config.queue_url.clone(),
            reason,
        };

        for event in &events {
            let body = std::str::from_utf8(event.data())
                .map_err(|e| publish_error(format!("message body is not UTF-8: {}", e)))?;
            client
                .send_message()
                .queue_url(&config.queue_url)
                .message_body(body)
                .send()
                .await
                .map_err(|e| publish_error(e.to_string()))?;
        }

        tracing::debug!(
            provider_id = %self.source.id,
            queue_url = %config.queue_url,
            count = events.len(),
            "Events published"
        );
        Ok(())
    }
}

/// Long-polls one queue on behalf of one subscription
/// Why a receive call returned no messages
enum ReceiveFailure {
    QueueMissing,
    Other(String),
}

/// Queue operations a poller needs
#[async_trait]
trait QueueApi: Send + Sync + 'static {
    async fn receive(&self, queue_url: &str) -> std::result::Result<Vec<Message>, ReceiveFailure>;

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> std::result::Result<(), String>;
}

struct SqsQueues {
    client: Client,
    source: Arc<SqsEventSource>,
}

#[async_trait]
impl QueueApi for SqsQueues {
    async fn receive(&self, queue_url: &str) -> std::result::Result<Vec<Message>, ReceiveFailure> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .wait_time_seconds(self.source.wait_time_seconds)
            .max_number_of_messages(self.source.max_number_of_messages)
            .visibility_timeout(self.source.visibility_timeout_seconds)
            .send()
            .await
            .map_err(|e| {
                let queue_missing = e
                    .as_service_error()
                    .is_some_and(|err| err.is_queue_does_not_exist());
                if queue_missing {
                    ReceiveFailure::QueueMissing
                } else {
                    ReceiveFailure::Other(e.to_string())
                }
            })?;
        Ok(output.messages.unwrap_or_default())
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> std::result::Result<(), String> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Start one poller per queue of a subscription
///
/// The pollers share a token derived from `ctx`: when one of them closes the
/// subscription, the others stop too.
fn spawn_pollers<Q: QueueApi>(
    tasks: &TaskTracker,
    queues: Arc<Q>,
    provider_id: &str,
    queue_urls: &[String],
    shutdown: &CancellationToken,
    ctx: &CancellationToken,
    updater: Arc<dyn SubscriptionEventUpdater>,
) {
    let subscription = ctx.child_token();
    for queue_url in queue_urls {
        let poller = QueuePoller {
            queues: queues.clone(),
            provider_id: provider_id.to_string(),
            queue_url: queue_url.clone(),
            updater: updater.clone(),
        };
        tasks.spawn(poller.run(shutdown.clone(), subscription.clone()));
    }
}

struct QueuePoller<Q> {
    queues: Arc<Q>,
    provider_id: String,
    queue_url: String,
    updater: Arc<dyn SubscriptionEventUpdater>,
}

impl<Q: QueueApi> QueuePoller<Q> {
    /// Close the subscription once, stopping every sibling poller
    fn close(&self, subscription: &CancellationToken, kind: SubscriptionCloseKind) {
        if !subscription.is_cancelled() {
            subscription.cancel();
            self.updater.close(kind);
        }
    }

    async fn run(self, shutdown: CancellationToken, subscription: CancellationToken) {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = subscription.cancelled() => break,
                received = self.queues.receive(&self.queue_url) => received,
            };

            let messages = match received {
                Ok(messages) => messages,
                Err(ReceiveFailure::QueueMissing) => {
                    tracing::error!(
                        provider_id = %self.provider_id,
                        queue_url = %self.queue_url,
                        "SQS queue does not exist, closing subscription"
                    );
                    self.close(&subscription, SubscriptionCloseKind::DownstreamServiceError);
                    break;
                }
                Err(ReceiveFailure::Other(e)) => {
                    tracing::warn!(
                        provider_id = %self.provider_id,
                        queue_url = %self.queue_url,
                        error = %e,
                        "Failed to receive SQS messages, retrying"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = subscription.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_RETRY_INTERVAL) => continue,
                    }
                }
            };

            if messages.is_empty() {
                continue;
            }

            let events = messages
                .iter()
                .map(|message| stream_event(&self.queue_url, message))
                .collect();
            if let Err(e) = self.updater.update(events).await {
                self.close(&subscription, e.close_kind());
                break;
            }

            for receipt_handle in messages.iter().filter_map(Message::receipt_handle) {
                if let Err(e) = self.queues.delete(&self.queue_url, receipt_handle).await {
                    tracing::warn!(
                        provider_id = %self.provider_id,
                        queue_url = %self.queue_url,
                        error = %e,
                        "Failed to delete SQS message"
                    );
                }
            }
        }
        tracing::debug!(provider_id = %self.provider_id, queue_url = %self.queue_url, "SQS poller stopped");
    }
}

async fn build_client(source: &SqsEventSource) -> Client {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(source.region.clone()));
    if let Some(endpoint) = &source.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let Some(auth) = &source.authentication {
        loader = loader.credentials_provider(Credentials::new(
            auth.access_key_id.clone(),
            auth.secret_access_key.clone(),
            auth.session_token.clone(),
            None,
            "a3s-edfs",
        ));
    }
    Client::new(&loader.load().await)
}

fn stream_event(queue_url: &str, message: &Message) -> StreamEvent {
    StreamEvent::with_metadata(
        message.body().unwrap_or_default().as_bytes().to_vec(),
        EventMetadata::Sqs {
            queue_url: queue_url.to_string(),
            message_id: message.message_id().map(str::to_string),
        },
    )
}
