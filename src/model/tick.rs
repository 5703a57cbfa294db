use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// One synthetic trade print. Wire shape is the JSON object of these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub volume: u64,
    pub event_time: DateTime<Utc>,
    pub sequence_id: u64,
}

impl Tick {
    pub fn event_time_ms(&self) -> i64 {
        self.event_time.timestamp_millis()
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.symbol.trim().is_empty() {
            return Err(PipelineError::MalformedPayload("empty symbol".to_string()));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(PipelineError::MalformedPayload(format!(
                "non-positive price {} for {}",
                self.price, self.symbol
            )));
        }
        if self.volume == 0 {
            return Err(PipelineError::MalformedPayload(format!(
                "zero volume for {}",
                self.symbol
            )));
        }
        Ok(())
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, PipelineError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and validate a wire payload. Every failure is `MalformedPayload`.
    pub fn from_payload(payload: &[u8]) -> Result<Self, PipelineError> {
        let tick: Tick = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::MalformedPayload(e.to_string()))?;
        tick.validate()?;
        Ok(tick)
    }
}

/// Fixed, ordered set of synthetic tickers: `SYM000`, `SYM001`, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolUniverse {
    symbols: Vec<String>,
}

impl SymbolUniverse {
    pub fn new(count: usize) -> Result<Self, PipelineError> {
        if count == 0 {
            return Err(PipelineError::config("symbol universe must not be empty"));
        }
        let width = (count - 1).to_string().len().max(3);
        let symbols = (0..count)
            .map(|idx| format!("SYM{:0width$}", idx, width = width))
            .collect();
        Ok(Self { symbols })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.symbols.get(idx).map(String::as_str)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }
}
