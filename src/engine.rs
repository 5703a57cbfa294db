//! Sliding-window aggregation over the tick stream.
//!
//! Window lifecycle is `Active -> Closed -> Evicted`: a window becomes active
//! when the first event maps into it, and is closed once the watermark
//! reaches `end + allowed_lateness`. Closing emits one final snapshot per
//! symbol and frees the window's state in the same step.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::watch;

use crate::aggregate::AggregationState;
use crate::error::PipelineError;
use crate::model::snapshot::WindowSnapshot;
use crate::model::tick::Tick;
use crate::sink::Sink;
use crate::transport::{Message, Subscription};
use crate::watermark::WatermarkTracker;
use crate::window::{WindowAssigner, WindowId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub ingested: u64,
    pub late_dropped: u64,
    pub malformed: u64,
    pub snapshots_emitted: u64,
    pub windows_closed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Snapshots for every window x symbol pair the event updated.
    Aggregated(Vec<WindowSnapshot>),
    /// Older than `watermark - allowed_lateness`; not aggregated.
    LateDropped,
}

pub struct AggregationEngine {
    assigner: WindowAssigner,
    allowed_lateness_ms: i64,
    watermark: WatermarkTracker,
    windows: BTreeMap<WindowId, BTreeMap<String, AggregationState>>,
    stats: EngineStats,
}

impl AggregationEngine {
    pub fn new(
        assigner: WindowAssigner,
        allowed_lateness_ms: u64,
        watermark: WatermarkTracker,
    ) -> Self {
        Self {
            assigner,
            allowed_lateness_ms: i64::try_from(allowed_lateness_ms).unwrap_or(i64::MAX),
            watermark,
            windows: BTreeMap::new(),
            stats: EngineStats::default(),
        }
    }

    pub fn watermark(&self) -> Option<i64> {
        self.watermark.current()
    }

    pub fn watermark_tracker(&self) -> &WatermarkTracker {
        &self.watermark
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn active_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn state(&self, window: &WindowId, symbol: &str) -> Option<&AggregationState> {
        self.windows.get(window).and_then(|states| states.get(symbol))
    }

    /// Events strictly older than this are dropped as late.
    pub fn late_threshold(&self) -> Option<i64> {
        self.watermark
            .current()
            .map(|wm| wm.saturating_sub(self.allowed_lateness_ms))
    }

    /// Merge one event into every window it belongs to.
    pub fn ingest(&mut self, partition: u32, tick: &Tick) -> IngestOutcome {
        let event_time_ms = tick.event_time_ms();
        if let Some(threshold) = self.late_threshold() {
            if event_time_ms < threshold {
                self.stats.late_dropped += 1;
                tracing::debug!(
                    symbol = %tick.symbol,
                    event_time_ms,
                    threshold,
                    "Late event dropped"
                );
                return IngestOutcome::LateDropped;
            }
        }

        self.watermark.observe(partition, event_time_ms);
        self.stats.ingested += 1;

        let mut snapshots = Vec::with_capacity(self.assigner.windows_per_event());
        for window in self.assigner.assign(event_time_ms) {
            let states = self.windows.entry(window).or_insert_with(|| {
                tracing::debug!(
                    start_ms = window.start_ms,
                    end_ms = window.end_ms,
                    "Window activated"
                );
                BTreeMap::new()
            });
            let state = states.entry(tick.symbol.clone()).or_default();
            state.update(tick.price, tick.volume);
            if let Some(snapshot) = snapshot_of(window, &tick.symbol, state, false) {
                snapshots.push(snapshot);
            }
        }
        self.stats.snapshots_emitted += snapshots.len() as u64;
        IngestOutcome::Aggregated(snapshots)
    }

    /// Decode a transport message and ingest it. Malformed payloads are
    /// counted and returned as `MalformedPayload`.
    pub fn ingest_message(&mut self, message: &Message) -> Result<IngestOutcome, PipelineError> {
        match Tick::from_payload(&message.payload) {
            Ok(tick) => Ok(self.ingest(message.partition, &tick)),
            Err(e) => {
                self.stats.malformed += 1;
                tracing::debug!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Skipping malformed payload"
                );
                Err(e)
            }
        }
    }

    /// Move the watermark forward and close every window it has passed.
    ///
    /// Returns one final snapshot per symbol of each closed window.
    pub fn advance_watermark(&mut self) -> Vec<WindowSnapshot> {
        let Some(watermark) = self.watermark.advance() else {
            return Vec::new();
        };

        let mut finals = Vec::new();
        while let Some(entry) = self.windows.first_entry() {
            let window = *entry.key();
            if window.end_ms.saturating_add(self.allowed_lateness_ms) > watermark {
                break;
            }
            let states = entry.remove();
            tracing::debug!(
                start_ms = window.start_ms,
                end_ms = window.end_ms,
                symbols = states.len(),
                watermark,
                "Window closed"
            );
            finals.extend(
                states
                    .iter()
                    .filter_map(|(symbol, state)| snapshot_of(window, symbol, state, true)),
            );
            self.stats.windows_closed += 1;
        }
        self.stats.snapshots_emitted += finals.len() as u64;
        finals
    }

    /// Ingest a batch, then advance the watermark once.
    pub fn process_batch(&mut self, messages: &[Message]) -> Vec<WindowSnapshot> {
        let mut out = Vec::new();
        for message in messages {
            if let Ok(IngestOutcome::Aggregated(snapshots)) = self.ingest_message(message) {
                out.extend(snapshots);
            }
        }
        out.extend(self.advance_watermark());
        out
    }
}

fn snapshot_of(
    window: WindowId,
    symbol: &str,
    state: &AggregationState,
    is_final: bool,
) -> Option<WindowSnapshot> {
    state.avg_price().map(|avg_price| WindowSnapshot {
        window,
        symbol: symbol.to_string(),
        avg_price,
        volume: state.volume_sum(),
        msg_count: state.count(),
        is_final,
    })
}

/// Consume `subscription` in batches and push snapshots to `sink` until
/// shutdown or until the subscription closes. The watermark is also
/// advanced on every `trigger_interval` tick.
pub async fn run_engine<S: Sink>(
    engine: &mut AggregationEngine,
    mut subscription: Subscription,
    sink: &mut S,
    batch_size: usize,
    trigger_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<EngineStats, PipelineError> {
    let mut trigger = tokio::time::interval(trigger_interval);
    trigger.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(topic = %subscription.topic(), batch_size, "Engine started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            batch = subscription.recv_batch(batch_size) => {
                if batch.is_empty() {
                    tracing::info!("Subscription closed, engine exiting");
                    break;
                }
                let snapshots = engine.process_batch(&batch);
                if !snapshots.is_empty() {
                    sink.emit(&snapshots)?;
                }
            }
            _ = trigger.tick() => {
                let finals = engine.advance_watermark();
                if !finals.is_empty() {
                    sink.emit(&finals)?;
                }
                let stats = engine.stats();
                tracing::debug!(
                    ingested = stats.ingested,
                    late_dropped = stats.late_dropped,
                    malformed = stats.malformed,
                    active_windows = engine.active_windows(),
                    watermark = engine.watermark(),
                    "Engine progress"
                );
            }
            _ = shutdown.changed() => break,
        }
    }

    let stats = engine.stats();
    tracing::info!(
        ingested = stats.ingested,
        late_dropped = stats.late_dropped,
        malformed = stats.malformed,
        snapshots = stats.snapshots_emitted,
        windows_closed = stats.windows_closed,
        "Engine stopped"
    );
    Ok(stats)
}

struct StreamState {
    engine: AggregationEngine,
    subscription: Subscription,
    pending: VecDeque<WindowSnapshot>,
    batch_size: usize,
}

/// Lazy sequence of snapshots produced by consuming `subscription`.
/// Ends when the subscription closes.
pub fn snapshot_stream(
    engine: AggregationEngine,
    subscription: Subscription,
    batch_size: usize,
) -> impl Stream<Item = WindowSnapshot> {
    let state = StreamState {
        engine,
        subscription,
        pending: VecDeque::new(),
        batch_size,
    };
    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(next) = st.pending.pop_front() {
                return Some((next, st));
            }
            let batch = st.subscription.recv_batch(st.batch_size).await;
            if batch.is_empty() {
                return None;
            }
            st.pending.extend(st.engine.process_batch(&batch));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn tick(symbol: &str, price: f64, volume: u64, at_ms: i64) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            price,
            volume,
            event_time: DateTime::<Utc>::from_timestamp_millis(at_ms).unwrap(),
            sequence_id: 0,
        }
    }

    fn engine(lateness_ms: u64, ooo_ms: u64) -> AggregationEngine {
        AggregationEngine::new(
            WindowAssigner::new(10_000, 5_000).unwrap(),
            lateness_ms,
            WatermarkTracker::new(ooo_ms),
        )
    }

    fn aggregated(outcome: IngestOutcome) -> Vec<WindowSnapshot> {
        match outcome {
            IngestOutcome::Aggregated(s) => s,
            IngestOutcome::LateDropped => panic!("unexpected late drop"),
        }
    }

    #[test]
    fn each_event_refreshes_every_overlapping_window() {
        let mut engine = engine(0, 0);
        let snaps = aggregated(engine.ingest(0, &tick("SYM001", 100.0, 10, 7_000)));
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].window.start_ms, 0);
        assert_eq!(snaps[1].window.start_ms, 5_000);
        assert!(snaps.iter().all(|s| !s.is_final && s.msg_count == 1));
        assert_eq!(engine.active_windows(), 2);
    }

    #[test]
    fn empty_watermark_never_drops() {
        let mut engine = engine(0, 0);
        assert_eq!(engine.late_threshold(), None);
        aggregated(engine.ingest(0, &tick("SYM001", 1.0, 1, -50_000)));
    }

    #[test]
    fn event_at_threshold_is_accepted() {
        let mut engine = engine(2_000, 0);
        engine.ingest(0, &tick("SYM001", 1.0, 1, 20_000));
        engine.advance_watermark();
        assert_eq!(engine.late_threshold(), Some(18_000));
        aggregated(engine.ingest(0, &tick("SYM001", 1.0, 1, 18_000)));
        assert_eq!(
            engine.ingest(0, &tick("SYM001", 1.0, 1, 17_999)),
            IngestOutcome::LateDropped
        );
        assert_eq!(engine.stats().late_dropped, 1);
    }

    #[test]
    fn closed_windows_are_evicted() {
        let mut engine = engine(0, 0);
        engine.ingest(0, &tick("SYM001", 1.0, 1, 1_000));
        engine.ingest(0, &tick("SYM001", 1.0, 1, 30_000));
        let finals = engine.advance_watermark();
        // [-5s,5s) and [0s,10s) close, [25s,35s) and [30s,40s) stay open
        assert_eq!(finals.len(), 2);
        assert!(finals.iter().all(|s| s.is_final));
        assert_eq!(engine.active_windows(), 2);
        assert_eq!(engine.stats().windows_closed, 2);
    }

    #[test]
    fn malformed_message_is_counted_and_skipped() {
        let mut engine = engine(0, 0);
        let msg = Message {
            topic: "ticks".to_string(),
            partition: 0,
            offset: 0,
            key: "SYM001".to_string(),
            payload: b"not json".to_vec(),
            timestamp_ms: 0,
        };
        assert!(matches!(
            engine.ingest_message(&msg),
            Err(PipelineError::MalformedPayload(_))
        ));
        assert!(engine.process_batch(&[msg]).is_empty());
        assert_eq!(engine.stats().malformed, 2);
        assert_eq!(engine.stats().ingested, 0);
    }
}
