use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use super::{partition_for, Delivery, Message, Subscription, Transport};
use crate::error::PipelineError;

#[derive(Debug)]
struct TopicState {
    next_offsets: Vec<u64>,
    subscribers: Vec<mpsc::UnboundedSender<Message>>,
}

impl TopicState {
    fn new(partitions: u32) -> Self {
        Self {
            next_offsets: vec![0; partitions as usize],
            subscribers: Vec::new(),
        }
    }
}

/// Process-local broker. Topics are created on first publish or subscribe.
#[derive(Debug)]
pub struct InMemoryBroker {
    address: String,
    partitions: u32,
    available: AtomicBool,
    topics: Mutex<HashMap<String, TopicState>>,
}

impl InMemoryBroker {
    pub fn new(address: impl Into<String>, partitions: u32) -> Self {
        Self {
            address: address.into(),
            partitions: partitions.max(1),
            available: AtomicBool::new(true),
            topics: Mutex::new(HashMap::new()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Simulate an outage: while unavailable, publish and subscribe fail.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Total messages accepted on `topic` across partitions.
    pub fn published_count(&self, topic: &str) -> u64 {
        self.topics
            .lock()
            .ok()
            .and_then(|topics| topics.get(topic).map(|t| t.next_offsets.iter().sum()))
            .unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), PipelineError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(PipelineError::TransportUnavailable {
                attempts: 1,
                reason: format!("broker {} is unreachable", self.address),
            })
        }
    }

    fn poisoned(&self) -> PipelineError {
        PipelineError::TransportUnavailable {
            attempts: 1,
            reason: format!("broker {} state lock poisoned", self.address),
        }
    }
}

impl Transport for InMemoryBroker {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        timestamp_ms: i64,
    ) -> Result<Delivery, PipelineError> {
        self.check_available()?;
        let mut topics = self.topics.lock().map_err(|_| self.poisoned())?;
        let state = topics.entry(topic.to_string()).or_insert_with(|| {
            tracing::info!(topic, partitions = self.partitions, "Auto-created topic");
            TopicState::new(self.partitions)
        });

        let partition = partition_for(key, self.partitions);
        let offset = state.next_offsets[partition as usize];
        state.next_offsets[partition as usize] += 1;

        let message = Message {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.to_string(),
            payload,
            timestamp_ms,
        };
        state
            .subscribers
            .retain(|tx| tx.send(message.clone()).is_ok());

        Ok(Delivery { partition, offset })
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription, PipelineError> {
        self.check_available()?;
        let mut topics = self.topics.lock().map_err(|_| self.poisoned())?;
        let (tx, rx) = mpsc::unbounded_channel();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.partitions))
            .subscribers
            .push(tx);
        Ok(Subscription::new(topic, rx))
    }
}
