//! Helpers shared by the integration tests

#![allow(dead_code)]

use a3s_edfs::{SubscriptionCloseKind, SubscriptionUpdater};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// What the engine saw on a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Data(String),
    Complete,
    Close(SubscriptionCloseKind),
}

/// Engine sink forwarding everything into a channel
pub struct ChannelUpdater {
    tx: mpsc::UnboundedSender<Update>,
}

impl SubscriptionUpdater for ChannelUpdater {
    fn update(&self, data: &[u8]) {
        let _ = self
            .tx
            .send(Update::Data(String::from_utf8_lossy(data).into_owned()));
    }

    fn complete(&self) {
        let _ = self.tx.send(Update::Complete);
    }

    fn close(&self, kind: SubscriptionCloseKind) {
        let _ = self.tx.send(Update::Close(kind));
    }
}

pub fn channel_updater() -> (Arc<ChannelUpdater>, mpsc::UnboundedReceiver<Update>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelUpdater { tx }), rx)
}

/// Next update, or `None` after `secs` seconds of silence
pub async fn next_update(rx: &mut mpsc::UnboundedReceiver<Update>, secs: u64) -> Option<Update> {
    tokio::time::timeout(Duration::from_secs(secs), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Suffix keeping broker-side names of concurrent test runs apart
pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}
