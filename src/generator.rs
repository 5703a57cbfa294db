use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::PipelineError;
use crate::model::snapshot::round_cents;
use crate::model::tick::{SymbolUniverse, Tick};
use crate::publisher::{DeliveryFailurePolicy, Publisher};
use crate::transport::Transport;

/// Prices never walk below one cent.
pub const PRICE_FLOOR: f64 = 0.01;
const BASE_PRICE_MIN: f64 = 100.0;
const BASE_PRICE_MAX: f64 = 200.0;
const REPORT_EVERY: u64 = 1_000;

/// How the next symbol is chosen. Both modes are deterministic for a seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolSelection {
    /// Uniform draw from the universe.
    #[default]
    Random,
    /// Cycle through the universe in order.
    RoundRobin,
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub rate_per_sec: f64,
    pub symbols: usize,
    pub seed: u64,
    pub selection: SymbolSelection,
    pub volume_min: u64,
    pub volume_max: u64,
    /// Largest relative move per tick, e.g. `0.005` for +/-0.5%.
    pub max_step_pct: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 100.0,
            symbols: 100,
            seed: 42,
            selection: SymbolSelection::Random,
            volume_min: 50,
            volume_max: 1_000,
            max_step_pct: 0.005,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_rate(self.rate_per_sec)?;
        if self.symbols == 0 {
            return Err(PipelineError::config("generator.symbols must be > 0"));
        }
        if self.volume_min == 0 || self.volume_min > self.volume_max {
            return Err(PipelineError::config(format!(
                "generator volume range [{}, {}] must be positive and ordered",
                self.volume_min, self.volume_max
            )));
        }
        if !(self.max_step_pct > 0.0 && self.max_step_pct < 0.5) {
            return Err(PipelineError::config(format!(
                "generator.max_step_pct {} must be in (0, 0.5)",
                self.max_step_pct
            )));
        }
        Ok(())
    }
}

fn validate_rate(rate_per_sec: f64) -> Result<(), PipelineError> {
    if !rate_per_sec.is_finite() || rate_per_sec <= 0.0 {
        return Err(PipelineError::config(format!(
            "emission rate must be a positive number, got {}",
            rate_per_sec
        )));
    }
    Ok(())
}

/// Random-walk tick source over a fixed symbol universe.
///
/// Also an infinite `Iterator`; pacing is left to [`Pacer`].
#[derive(Debug, Clone)]
pub struct TickGenerator {
    universe: SymbolUniverse,
    last_prices: Vec<f64>,
    rng: ChaCha8Rng,
    selection: SymbolSelection,
    next_round_robin: usize,
    volume_min: u64,
    volume_max: u64,
    max_step_pct: f64,
    next_sequence: u64,
    last_event_time: Option<DateTime<Utc>>,
}

impl TickGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let universe = SymbolUniverse::new(config.symbols)?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let last_prices = (0..universe.len())
            .map(|_| round_cents(rng.gen_range(BASE_PRICE_MIN..BASE_PRICE_MAX)))
            .collect();
        Ok(Self {
            universe,
            last_prices,
            rng,
            selection: config.selection,
            next_round_robin: 0,
            volume_min: config.volume_min,
            volume_max: config.volume_max,
            max_step_pct: config.max_step_pct,
            next_sequence: 0,
            last_event_time: None,
        })
    }

    pub fn universe(&self) -> &SymbolUniverse {
        &self.universe
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.universe
            .iter()
            .position(|s| s == symbol)
            .map(|idx| self.last_prices[idx])
    }

    /// Next tick stamped with the wall clock.
    pub fn next_tick(&mut self) -> Tick {
        self.next_tick_at(Utc::now())
    }

    /// Next tick stamped at `now`, clamped so event time never goes backwards.
    pub fn next_tick_at(&mut self, now: DateTime<Utc>) -> Tick {
        let event_time = match self.last_event_time {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_event_time = Some(event_time);

        let idx = self.pick_symbol();
        let step = self.rng.gen_range(-self.max_step_pct..=self.max_step_pct);
        let price = round_cents(self.last_prices[idx] * (1.0 + step)).max(PRICE_FLOOR);
        self.last_prices[idx] = price;

        let volume = self.rng.gen_range(self.volume_min..=self.volume_max);
        let sequence_id = self.next_sequence;
        self.next_sequence += 1;

        Tick {
            symbol: self.universe.get(idx).unwrap_or_default().to_string(),
            price,
            volume,
            event_time,
            sequence_id,
        }
    }

    fn pick_symbol(&mut self) -> usize {
        match self.selection {
            SymbolSelection::Random => self.rng.gen_range(0..self.universe.len()),
            SymbolSelection::RoundRobin => {
                let idx = self.next_round_robin;
                self.next_round_robin = (idx + 1) % self.universe.len();
                idx
            }
        }
    }
}

impl Iterator for TickGenerator {
    type Item = Tick;

    fn next(&mut self) -> Option<Tick> {
        Some(self.next_tick())
    }
}

/// Deadline-based pacing for a target emission rate.
///
/// A caller that falls behind by less than one interval is let through
/// immediately; further behind, the schedule is re-anchored to now so no
/// burst is replayed.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_deadline: Option<Instant>,
}

impl Pacer {
    pub fn new(rate_per_sec: f64) -> Result<Self, PipelineError> {
        validate_rate(rate_per_sec)?;
        Ok(Self {
            interval: Duration::from_secs_f64(1.0 / rate_per_sec),
            next_deadline: None,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn wait(&mut self) {
        let now = Instant::now();
        let deadline = match self.next_deadline {
            None => now,
            Some(deadline) if deadline > now => {
                tokio::time::sleep_until(deadline).await;
                deadline
            }
            Some(deadline) if now.duration_since(deadline) < self.interval => deadline,
            Some(_) => now,
        };
        self.next_deadline = Some(deadline + self.interval);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub published: u64,
    pub dropped: u64,
    pub retries: u64,
}

/// Generate, pace and publish until `shutdown` flips to `true`.
///
/// Cancellation is checked before every emission. A tick that exhausts its
/// publish retries is dropped or aborts the loop according to `on_failure`.
pub async fn run_producer<T: Transport>(
    mut generator: TickGenerator,
    mut pacer: Pacer,
    publisher: &Publisher<T>,
    on_failure: DeliveryFailurePolicy,
    mut shutdown: watch::Receiver<bool>,
) -> Result<ProducerStats, PipelineError> {
    let mut stats = ProducerStats::default();
    tracing::info!(
        topic = %publisher.topic(),
        symbols = generator.universe().len(),
        interval_us = pacer.interval().as_micros() as u64,
        "Producer started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = pacer.wait() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let tick = generator.next_tick();
        match publisher.publish(&tick).await {
            Ok(receipt) => {
                stats.published += 1;
                stats.retries += u64::from(receipt.attempts.saturating_sub(1));
                tracing::trace!(
                    symbol = %tick.symbol,
                    sequence_id = tick.sequence_id,
                    partition = receipt.delivery.partition,
                    offset = receipt.delivery.offset,
                    "Tick published"
                );
            }
            Err(e @ PipelineError::TransportUnavailable { .. }) => match on_failure {
                DeliveryFailurePolicy::DropAndContinue => {
                    stats.dropped += 1;
                    tracing::warn!(
                        symbol = %tick.symbol,
                        sequence_id = tick.sequence_id,
                        error = %e,
                        "Delivery failed, dropping tick"
                    );
                }
                DeliveryFailurePolicy::Abort => {
                    tracing::error!(error = %e, "Delivery failed, aborting producer");
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }

        let emitted = stats.published + stats.dropped;
        if emitted % REPORT_EVERY == 0 {
            tracing::info!(
                published = stats.published,
                dropped = stats.dropped,
                retries = stats.retries,
                "Producer progress"
            );
        }
    }

    tracing::info!(
        published = stats.published,
        dropped = stats.dropped,
        retries = stats.retries,
        "Producer stopped"
    );
    Ok(stats)
}
