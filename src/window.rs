use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Half-open interval `[start_ms, end_ms)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl WindowId {
    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start_ms && timestamp_ms < self.end_ms
    }
}

/// Maps event timestamps onto sliding windows aligned to the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAssigner {
    length_ms: i64,
    slide_ms: i64,
}

impl WindowAssigner {
    /// `length_ms` must be a positive multiple of `slide_ms`, so that every
    /// timestamp lands in exactly `length / slide` windows.
    pub fn new(length_ms: u64, slide_ms: u64) -> Result<Self, PipelineError> {
        if slide_ms == 0 {
            return Err(PipelineError::config("window slide must be > 0"));
        }
        if slide_ms > length_ms {
            return Err(PipelineError::config(format!(
                "window slide ({}ms) must not exceed window length ({}ms)",
                slide_ms, length_ms
            )));
        }
        if length_ms % slide_ms != 0 {
            return Err(PipelineError::config(format!(
                "window length ({}ms) must be a multiple of slide ({}ms)",
                length_ms, slide_ms
            )));
        }
        let length_ms = i64::try_from(length_ms)
            .map_err(|_| PipelineError::config("window length is too large"))?;
        Ok(Self {
            length_ms,
            slide_ms: slide_ms as i64,
        })
    }

    pub fn length_ms(&self) -> i64 {
        self.length_ms
    }

    pub fn slide_ms(&self) -> i64 {
        self.slide_ms
    }

    /// Number of windows every timestamp belongs to.
    pub fn windows_per_event(&self) -> usize {
        (self.length_ms / self.slide_ms) as usize
    }

    /// All windows `[k*S, k*S + L)` containing `timestamp_ms`, oldest first.
    pub fn assign(&self, timestamp_ms: i64) -> Vec<WindowId> {
        let latest_start = timestamp_ms.div_euclid(self.slide_ms) * self.slide_ms;
        let n = self.windows_per_event() as i64;
        (0..n)
            .rev()
            .map(|i| {
                let start_ms = latest_start - i * self.slide_ms;
                WindowId {
                    start_ms,
                    end_ms: start_ms + self.length_ms,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_overlapping_windows_oldest_first() {
        let assigner = WindowAssigner::new(10_000, 5_000).unwrap();
        let windows = assigner.assign(12_345);
        assert_eq!(
            windows,
            vec![
                WindowId {
                    start_ms: 5_000,
                    end_ms: 15_000
                },
                WindowId {
                    start_ms: 10_000,
                    end_ms: 20_000
                },
            ]
        );
    }

    #[test]
    fn boundary_timestamp_opens_new_window_and_leaves_old_one() {
        let assigner = WindowAssigner::new(10_000, 5_000).unwrap();
        let windows = assigner.assign(10_000);
        assert!(windows.iter().any(|w| w.start_ms == 10_000));
        assert!(windows.iter().all(|w| w.end_ms != 10_000));
    }

    #[test]
    fn tumbling_windows_are_accepted() {
        let assigner = WindowAssigner::new(5_000, 5_000).unwrap();
        assert_eq!(
            assigner.assign(4_999),
            vec![WindowId {
                start_ms: 0,
                end_ms: 5_000
            }]
        );
    }

    #[test]
    fn pre_epoch_timestamps_align_downwards() {
        let assigner = WindowAssigner::new(10_000, 5_000).unwrap();
        let windows = assigner.assign(-1);
        assert_eq!(windows[1].start_ms, -5_000);
        assert!(windows.iter().all(|w| w.contains(-1)));
    }

    #[test]
    fn rejects_misconfigured_windows() {
        assert!(WindowAssigner::new(10_000, 0).is_err());
        assert!(WindowAssigner::new(5_000, 10_000).is_err());
        assert!(WindowAssigner::new(10_000, 3_000).is_err());
    }
}
