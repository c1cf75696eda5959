//! Shared test doubles for unit tests

use crate::datasource::{EnvelopeEvent, EventUpdater, SubscriptionEventUpdater};
use crate::engine::{SubscriptionCloseKind, SubscriptionUpdater};
use crate::error::{EventError, Result};
use crate::hooks::{HookContext, Hooks};
use crate::provider::{Adapter, EventConfiguration, PublishEventConfiguration};
use crate::types::{ProviderType, StreamEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

/// Engine sink that records everything it receives
#[derive(Default)]
pub struct RecordingUpdater {
    updates: Mutex<Vec<Vec<u8>>>,
    closes: Mutex<Vec<SubscriptionCloseKind>>,
    completions: AtomicUsize,
}

impl RecordingUpdater {
    pub fn updates(&self) -> Vec<String> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|d| String::from_utf8_lossy(d).into_owned())
            .collect()
    }

    pub fn closes(&self) -> Vec<SubscriptionCloseKind> {
        self.closes.lock().unwrap().clone()
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

impl SubscriptionUpdater for RecordingUpdater {
    fn update(&self, data: &[u8]) {
        self.updates.lock().unwrap().push(data.to_vec());
    }

    fn complete(&self) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self, kind: SubscriptionCloseKind) {
        self.closes.lock().unwrap().push(kind);
    }
}

/// Adapter-facing updater whose engine sink records everything
pub fn recording_event_updater(hooks: Hooks) -> (Arc<EventUpdater>, Arc<RecordingUpdater>) {
    let sink = Arc::new(RecordingUpdater::default());
    let updater = EventUpdater::new(
        Arc::new(TestConfig::default()),
        hooks,
        HookContext::default(),
        sink.clone(),
    );
    (Arc::new(updater), sink)
}

fn default_provider_id() -> String {
    "test-provider".to_string()
}

fn default_field() -> String {
    "testField".to_string()
}

/// Event configuration used as both publish and subscription config of the mock adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConfig {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default = "default_field")]
    pub root_field_name: String,
    #[serde(default)]
    pub event: Option<EnvelopeEvent>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            root_field_name: default_field(),
            event: None,
        }
    }
}

impl EventConfiguration for TestConfig {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Kafka
    }

    fn root_field_name(&self) -> &str {
        &self.root_field_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PublishEventConfiguration for TestConfig {
    fn event(&self) -> StreamEvent {
        self.event
            .as_ref()
            .map(EnvelopeEvent::to_stream_event)
            .unwrap_or_default()
    }
}

/// In-process adapter recording every call
#[derive(Default)]
pub struct MockAdapter {
    fail_startup: bool,
    fail_publish: bool,
    startups: AtomicUsize,
    shutdowns: AtomicUsize,
    published: Mutex<Vec<Vec<StreamEvent>>>,
    subscriptions: Mutex<Vec<Arc<dyn SubscriptionEventUpdater>>>,
    subscription_tokens: Mutex<Vec<CancellationToken>>,
    started: AtomicBool,
}

impl MockAdapter {
    pub fn failing_startup() -> Self {
        Self {
            fail_startup: true,
            ..Default::default()
        }
    }

    pub fn failing_publish() -> Self {
        Self {
            fail_publish: true,
            ..Default::default()
        }
    }

    pub fn startups(&self) -> usize {
        self.startups.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<Vec<StreamEvent>> {
        self.published.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<Arc<dyn SubscriptionEventUpdater>> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn subscription_tokens(&self) -> Vec<CancellationToken> {
        self.subscription_tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    type PublishConfig = TestConfig;
    type SubscriptionConfig = TestConfig;

    async fn startup(&self) -> Result<()> {
        self.startups.fetch_add(1, Ordering::SeqCst);
        if self.fail_startup {
            return Err(EventError::Connection("mock broker unreachable".to_string()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(
        &self,
        ctx: CancellationToken,
        _config: &TestConfig,
        updater: Arc<dyn SubscriptionEventUpdater>,
    ) -> Result<()> {
        self.subscriptions.lock().unwrap().push(updater);
        self.subscription_tokens.lock().unwrap().push(ctx);
        Ok(())
    }

    async fn publish(&self, config: &TestConfig, events: Vec<StreamEvent>) -> Result<()> {
        if self.fail_publish {
            return Err(EventError::Publish {
                destination: config.root_field_name.clone(),
                reason: "mock broker rejected".to_string(),
            });
        }
        self.published.lock().unwrap().push(events);
        Ok(())
    }
}

/// Captured `tracing` output of the current thread
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl CapturedLogs {
    pub fn contains(&self, needle: &str) -> bool {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).contains(needle)
    }
}

#[derive(Clone)]
struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for BufferWriter {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Route `tracing` events of the current thread into a buffer
pub fn capture_logs() -> CapturedLogs {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BufferWriter(buffer.clone()))
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    CapturedLogs {
        buffer,
        _guard: tracing::subscriber::set_default(subscriber),
    }
}
