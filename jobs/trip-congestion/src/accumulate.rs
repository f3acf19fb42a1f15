use serde::{Deserialize, Serialize};

/// Partial aggregation state for a stream of congestion ratios: the sum of
/// the ratios seen and how many there were. `merge` is associative and
/// commutative with `IDENTITY` as its unit, so partials can be folded in any
/// grouping, any number of times, without changing the final mean.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct RatioSum {
    pub sum: f64,
    pub count: u64,
}

impl RatioSum {
    pub const IDENTITY: RatioSum = RatioSum { sum: 0.0, count: 0 };

    /// The raw `(ratio, 1)` pair a mapper emits for one trip/segment.
    pub fn unit(ratio: f64) -> Self {
        Self {
            sum: ratio,
            count: 1,
        }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            sum: self.sum + other.sum,
            count: self.count + other.count,
        }
    }

    /// Mean of the accumulated ratios. Callers only invoke this on partials
    /// that have absorbed at least one ratio.
    pub fn mean(self) -> f64 {
        debug_assert!(self.count > 0);
        self.sum / self.count as f64
    }
}
