//! Ordered, partitioned pub/sub channel between producer and engine.
//!
//! Messages with the same key always land on the same partition, and each
//! partition is delivered in offset order. Cross-partition order is not
//! guaranteed.

pub mod memory;

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::error::PipelineError;

pub use memory::InMemoryBroker;

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: u32,
    pub offset: u64,
}

pub trait Transport: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        timestamp_ms: i64,
    ) -> Result<Delivery, PipelineError>;

    /// Subscribe from the latest offset: only messages published afterwards are seen.
    fn subscribe(&self, topic: &str) -> Result<Subscription, PipelineError>;
}

/// Receiving end of a topic subscription.
pub struct Subscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, rx: mpsc::UnboundedReceiver<Message>) -> Self {
        Self {
            topic: topic.into(),
            rx,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// `None` once the transport side has gone away.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Wait for at least one message, then take whatever else is already
    /// queued, up to `max`. Empty only when the channel is closed.
    pub async fn recv_batch(&mut self, max: usize) -> Vec<Message> {
        let mut batch = Vec::with_capacity(max.min(1024));
        self.rx.recv_many(&mut batch, max.max(1)).await;
        batch
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> impl Stream<Item = Message> {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|msg| (msg, sub))
        })
    }
}

/// Stable key -> partition mapping (FNV-1a).
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash % partitions.max(1)
}
