use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::error::PipelineError;
use crate::generator::{GeneratorConfig, SymbolSelection};
use crate::publisher::{DeliveryFailurePolicy, RetryPolicy};
use crate::sink::SinkKind;
use crate::window::WindowAssigner;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub generator: GeneratorSection,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub broker: String,
    pub topic: String,
    pub partitions: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            broker: "localhost:9092".to_string(),
            topic: "ticks".to_string(),
            partitions: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    pub rate_per_sec: f64,
    pub symbols: usize,
    pub seed: u64,
    pub selection: SymbolSelection,
    pub volume_min: u64,
    pub volume_max: u64,
    pub max_step_pct: f64,
    pub on_delivery_failure: DeliveryFailurePolicy,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        let g = GeneratorConfig::default();
        Self {
            rate_per_sec: g.rate_per_sec,
            symbols: g.symbols,
            seed: g.seed,
            selection: g.selection,
            volume_min: g.volume_min,
            volume_max: g.volume_max,
            max_step_pct: g.max_step_pct,
            on_delivery_failure: DeliveryFailurePolicy::default(),
        }
    }
}

impl GeneratorSection {
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            rate_per_sec: self.rate_per_sec,
            symbols: self.symbols,
            seed: self.seed,
            selection: self.selection,
            volume_min: self.volume_min,
            volume_max: self.volume_max,
            max_step_pct: self.max_step_pct,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        let r = RetryPolicy::default();
        Self {
            max_attempts: r.max_attempts,
            initial_backoff_ms: r.initial_backoff.as_millis() as u64,
            max_backoff_ms: r.max_backoff.as_millis() as u64,
        }
    }
}

impl PublisherConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub length: String,
    pub slide: String,
    pub max_out_of_orderness: String,
    pub allowed_lateness: String,
    pub batch_size: usize,
    pub trigger_interval: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            length: "10s".to_string(),
            slide: "5s".to_string(),
            max_out_of_orderness: "1m".to_string(),
            allowed_lateness: "0s".to_string(),
            batch_size: 512,
            trigger_interval: "1s".to_string(),
        }
    }
}

impl WindowConfig {
    pub fn length_ms(&self) -> Result<u64> {
        parse_duration_ms(&self.length).context("window.length is invalid")
    }

    pub fn slide_ms(&self) -> Result<u64> {
        parse_duration_ms(&self.slide).context("window.slide is invalid")
    }

    pub fn max_out_of_orderness_ms(&self) -> Result<u64> {
        parse_duration_ms(&self.max_out_of_orderness)
            .context("window.max_out_of_orderness is invalid")
    }

    pub fn allowed_lateness_ms(&self) -> Result<u64> {
        parse_duration_ms(&self.allowed_lateness).context("window.allowed_lateness is invalid")
    }

    pub fn trigger_interval(&self) -> Result<Duration> {
        parse_duration_ms(&self.trigger_interval)
            .map(Duration::from_millis)
            .context("window.trigger_interval is invalid")
    }

    pub fn assigner(&self) -> Result<WindowAssigner> {
        Ok(WindowAssigner::new(self.length_ms()?, self.slide_ms()?)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub max_rows: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Console,
            max_rows: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Parse a duration such as `"500ms"`, `"10s"`, `"1m"` or `"2h"` into milliseconds.
pub fn parse_duration_ms(s: &str) -> Result<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .with_context(|| format!("invalid duration '{}': missing unit (ms/s/m/h)", s))?;
    let (num_str, suffix) = s.split_at(split);
    if num_str.is_empty() {
        bail!("invalid duration '{}': expected format like '10s'", s);
    }
    let n: u64 = num_str.parse().with_context(|| {
        format!(
            "invalid duration '{}': quantity must be a non-negative integer",
            s
        )
    })?;

    let unit_ms = match suffix.trim() {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        other => bail!(
            "invalid duration '{}': unsupported unit '{}', expected one of ms/s/m/h",
            s,
            other
        ),
    };

    n.checked_mul(unit_ms)
        .with_context(|| format!("invalid duration '{}': value is too large", s))
}

fn config_path() -> PathBuf {
    std::env::var("TICKS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/default.toml"))
}

impl Config {
    /// Load `.env`, then the TOML file (if present), then env overrides; validate.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = config_path();
        let mut config = if path.exists() {
            Self::from_path(&path)?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Self::from_toml_str("")?
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("failed to parse config TOML")
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(broker) = std::env::var("TICKS_BROKER") {
            self.transport.broker = broker;
        }
        if let Ok(topic) = std::env::var("TICKS_TOPIC") {
            self.transport.topic = topic;
        }
        if let Ok(rate) = std::env::var("TICKS_RATE") {
            self.generator.rate_per_sec = rate
                .parse()
                .with_context(|| format!("TICKS_RATE '{}' is not a number", rate))?;
        }
        if let Ok(symbols) = std::env::var("TICKS_SYMBOLS") {
            self.generator.symbols = symbols
                .parse()
                .with_context(|| format!("TICKS_SYMBOLS '{}' is not an integer", symbols))?;
        }
        Ok(())
    }

    /// Reject every invalid combination before anything starts.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.transport.topic.trim().is_empty() {
            return Err(PipelineError::config("transport.topic must not be empty"));
        }
        if self.transport.partitions == 0 {
            return Err(PipelineError::config("transport.partitions must be > 0"));
        }
        if self.publisher.max_attempts == 0 {
            return Err(PipelineError::config("publisher.max_attempts must be > 0"));
        }
        if self.window.batch_size == 0 {
            return Err(PipelineError::config("window.batch_size must be > 0"));
        }
        self.generator.generator_config().validate()?;

        let window = &self.window;
        let ms = |r: Result<u64>| r.map_err(|e| PipelineError::config(format!("{:#}", e)));
        WindowAssigner::new(ms(window.length_ms())?, ms(window.slide_ms())?)?;
        ms(window.max_out_of_orderness_ms())?;
        ms(window.allowed_lateness_ms())?;
        if ms(window.trigger_interval().map(|d| d.as_millis() as u64))? == 0 {
            return Err(PipelineError::config("window.trigger_interval must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_valid() {
        assert_eq!(parse_duration_ms("500ms").unwrap(), 500);
        assert_eq!(parse_duration_ms("10s").unwrap(), 10_000);
        assert_eq!(parse_duration_ms("1m").unwrap(), 60_000);
        assert_eq!(parse_duration_ms("2h").unwrap(), 7_200_000);
        assert_eq!(parse_duration_ms("0s").unwrap(), 0);
    }

    #[test]
    fn parse_duration_rejects_invalid_inputs() {
        assert!(parse_duration_ms("").is_err());
        assert!(parse_duration_ms("s").is_err());
        assert!(parse_duration_ms("10").is_err());
        assert!(parse_duration_ms("-5s").is_err());
        assert!(parse_duration_ms("1d").is_err());
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.transport.broker, "localhost:9092");
        assert_eq!(config.transport.topic, "ticks");
        assert_eq!(config.generator.symbols, 100);
        assert_eq!(config.window.length_ms().unwrap(), 10_000);
        assert_eq!(config.window.slide_ms().unwrap(), 5_000);
        assert_eq!(config.window.max_out_of_orderness_ms().unwrap(), 60_000);
        assert_eq!(config.sink.max_rows, 50);
        assert!(config.validate().is_ok());
    }
}
