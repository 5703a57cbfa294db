/// Running totals for one window x symbol pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationState {
    count: u64,
    price_sum: f64,
    volume_sum: u64,
}

impl AggregationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, price: f64, volume: u64) {
        self.count += 1;
        self.price_sum += price;
        self.volume_sum = self.volume_sum.saturating_add(volume);
    }

    /// Fold another partial aggregate into this one.
    pub fn merge(&mut self, other: &AggregationState) {
        self.count += other.count;
        self.price_sum += other.price_sum;
        self.volume_sum = self.volume_sum.saturating_add(other.volume_sum);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn price_sum(&self) -> f64 {
        self.price_sum
    }

    pub fn volume_sum(&self) -> u64 {
        self.volume_sum
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `None` for an empty state.
    pub fn avg_price(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.price_sum / self.count as f64)
    }
}
