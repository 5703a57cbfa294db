use std::collections::BTreeMap;

/// Low-watermark over all partitions that have delivered events.
///
/// Each partition contributes `max(event_time) - max_out_of_orderness`; the
/// global watermark is the minimum of those, so a lagging partition holds
/// window closure back. The published value never decreases.
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    max_out_of_orderness_ms: i64,
    partition_max_ms: BTreeMap<u32, i64>,
    current_ms: Option<i64>,
}

impl WatermarkTracker {
    pub fn new(max_out_of_orderness_ms: u64) -> Self {
        Self {
            max_out_of_orderness_ms: i64::try_from(max_out_of_orderness_ms).unwrap_or(i64::MAX),
            partition_max_ms: BTreeMap::new(),
            current_ms: None,
        }
    }

    /// Record an event time seen on `partition`. Does not move the watermark.
    pub fn observe(&mut self, partition: u32, event_time_ms: i64) {
        self.partition_max_ms
            .entry(partition)
            .and_modify(|max| *max = (*max).max(event_time_ms))
            .or_insert(event_time_ms);
    }

    /// Recompute the global low watermark. Returns the (possibly unchanged) value.
    pub fn advance(&mut self) -> Option<i64> {
        let low = self
            .partition_max_ms
            .values()
            .min()
            .map(|max| max.saturating_sub(self.max_out_of_orderness_ms));
        self.current_ms = match (self.current_ms, low) {
            (Some(current), Some(low)) => Some(current.max(low)),
            (current, low) => current.or(low),
        };
        self.current_ms
    }

    pub fn current(&self) -> Option<i64> {
        self.current_ms
    }

    pub fn partition_watermark(&self, partition: u32) -> Option<i64> {
        self.partition_max_ms
            .get(&partition)
            .map(|max| max.saturating_sub(self.max_out_of_orderness_ms))
    }

    pub fn partitions(&self) -> usize {
        self.partition_max_ms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_watermark_before_first_event() {
        let mut tracker = WatermarkTracker::new(1_000);
        assert_eq!(tracker.current(), None);
        assert_eq!(tracker.advance(), None);
    }

    #[test]
    fn observe_alone_does_not_advance() {
        let mut tracker = WatermarkTracker::new(1_000);
        tracker.observe(0, 10_000);
        assert_eq!(tracker.current(), None);
        assert_eq!(tracker.advance(), Some(9_000));
    }

    #[test]
    fn lagging_partition_holds_watermark_back() {
        let mut tracker = WatermarkTracker::new(0);
        tracker.observe(0, 50_000);
        tracker.observe(1, 20_000);
        assert_eq!(tracker.advance(), Some(20_000));

        tracker.observe(1, 60_000);
        assert_eq!(tracker.advance(), Some(50_000));
    }

    #[test]
    fn late_joining_partition_cannot_pull_watermark_back() {
        let mut tracker = WatermarkTracker::new(0);
        tracker.observe(0, 50_000);
        assert_eq!(tracker.advance(), Some(50_000));

        tracker.observe(1, 10_000);
        assert_eq!(tracker.advance(), Some(50_000));
        assert_eq!(tracker.partition_watermark(1), Some(10_000));
    }

    #[test]
    fn older_events_do_not_lower_partition_max() {
        let mut tracker = WatermarkTracker::new(500);
        tracker.observe(3, 8_000);
        tracker.observe(3, 2_000);
        assert_eq!(tracker.partition_watermark(3), Some(7_500));
    }
}
