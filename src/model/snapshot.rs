use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::window::WindowId;

/// One emitted aggregate for a window x symbol pair.
///
/// Update mode: a new snapshot follows every mutation of the pair's state,
/// and exactly one snapshot with `is_final = true` follows window closure.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    pub window: WindowId,
    pub symbol: String,
    pub avg_price: f64,
    pub volume: u64,
    pub msg_count: u64,
    pub is_final: bool,
}

impl WindowSnapshot {
    pub fn to_record(&self) -> SnapshotRecord {
        SnapshotRecord {
            window_start: millis_to_utc(self.window.start_ms),
            window_end: millis_to_utc(self.window.end_ms),
            symbol: self.symbol.clone(),
            avg_price: round_cents(self.avg_price),
            volume: self.volume,
            msg_count: self.msg_count,
        }
    }
}

/// Wire shape shipped to sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub symbol: String,
    pub avg_price: f64,
    pub volume: u64,
    pub msg_count: u64,
}

pub fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_rounds_for_display_and_formats_bounds() {
        let snap = WindowSnapshot {
            window: WindowId {
                start_ms: 1_709_294_400_000,
                end_ms: 1_709_294_410_000,
            },
            symbol: "SYM003".to_string(),
            avg_price: 101.23456,
            volume: 300,
            msg_count: 3,
            is_final: false,
        };
        let record = snap.to_record();
        assert!((record.avg_price - 101.23).abs() < 1e-9);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["window_start"], "2024-03-01T12:00:00Z");
        assert_eq!(json["window_end"], "2024-03-01T12:00:10Z");
        assert_eq!(json["msg_count"], 3);
    }
}
