use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::PipelineError;
use crate::model::tick::Tick;
use crate::transport::{Delivery, Transport};

/// Exponential backoff between publish attempts.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    max: Duration,
    factor: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            current: initial,
            max,
            factor,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.factor).min(self.max.as_secs_f64()),
        );
        delay
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

/// What the producer loop does once a tick exhausts its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFailurePolicy {
    #[default]
    DropAndContinue,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub delivery: Delivery,
    pub attempts: u32,
}

/// Serializes ticks and hands them to the transport keyed by symbol.
pub struct Publisher<T: Transport> {
    transport: Arc<T>,
    topic: String,
    retry: RetryPolicy,
}

impl<T: Transport> Publisher<T> {
    pub fn new(transport: Arc<T>, topic: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            topic: topic.into(),
            retry,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish with bounded retry. Only transport unavailability is retried.
    pub async fn publish(&self, tick: &Tick) -> Result<PublishReceipt, PipelineError> {
        let payload = tick.to_payload()?;
        let mut backoff = ExponentialBackoff::new(
            self.retry.initial_backoff,
            self.retry.max_backoff,
            2.0,
        );
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.transport.publish(
                &self.topic,
                &tick.symbol,
                payload.clone(),
                tick.event_time_ms(),
            ) {
                Ok(delivery) => {
                    return Ok(PublishReceipt {
                        delivery,
                        attempts: attempt,
                    })
                }
                Err(PipelineError::TransportUnavailable { reason, .. }) => {
                    if attempt >= max_attempts {
                        return Err(PipelineError::TransportUnavailable {
                            attempts: attempt,
                            reason,
                        });
                    }
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        symbol = %tick.symbol,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
