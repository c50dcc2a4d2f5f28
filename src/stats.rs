// =============================================================================
// Online statistics primitives: EWMA and Welford variance
// =============================================================================
//
// Every behavioral profile field is one of these two accumulators. Both are
// O(1) per update and require no retained history, which is what lets a
// `ClientProfile` stay a small fixed-size struct no matter how long a client
// has been transacting.

use serde::{Deserialize, Serialize};

/// Exponentially weighted moving average. `alpha` close to 1.0 reacts fast to
/// new samples; close to 0.0 smooths over a long history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ewma {
    alpha: f64,
    value: f64,
    initialized: bool,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            value: 0.0,
            initialized: false,
        }
    }

    /// Seed the average directly, e.g. when rehydrating a persisted profile.
    pub fn with_value(alpha: f64, value: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            value,
            initialized: true,
        }
    }

    /// `x ← (1-α)·x + α·sample`. The first sample seeds the average directly
    /// rather than blending against zero.
    pub fn update(&mut self, sample: f64) {
        if !self.initialized {
            self.value = sample;
            self.initialized = true;
        } else {
            self.value = (1.0 - self.alpha) * self.value + self.alpha * sample;
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl Default for Ewma {
    fn default() -> Self {
        Self::new(0.2)
    }
}

/// Welford's online mean/variance accumulator. Numerically stable and
/// streams in O(1) space — no retained sample window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WelfordStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl WelfordStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, sample: f64) {
        self.count += 1;
        let n = self.count as f64;
        let delta = sample - self.mean;
        self.mean += delta / n;
        let delta2 = sample - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance. Undefined below 2 samples; callers should use
    /// [`Self::stddev`] which floors to a safe default instead.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count as f64 - 1.0)
        }
    }

    /// Standard deviation, floored to `min_floor` when fewer than 2 samples
    /// have been observed or the computed value would be degenerate. Mirrors
    /// the `.max(1.0)` floor used by statistical z-score detectors so a
    /// cold-start client never produces a divide-by-near-zero blowup.
    pub fn stddev(&self, min_floor: f64) -> f64 {
        if self.count < 2 {
            return min_floor;
        }
        self.variance().sqrt().max(min_floor)
    }

    /// Z-score of `sample` against the current mean/stddev, using `min_floor`
    /// as the stddev floor.
    pub fn zscore(&self, sample: f64, min_floor: f64) -> f64 {
        (sample - self.mean) / self.stddev(min_floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_seeds_on_first_sample() {
        let mut e = Ewma::new(0.3);
        e.update(10.0);
        assert_eq!(e.value(), 10.0);
    }

    #[test]
    fn ewma_blends_subsequent_samples() {
        let mut e = Ewma::new(0.5);
        e.update(10.0);
        e.update(20.0);
        assert_eq!(e.value(), 15.0);
    }

    #[test]
    fn welford_matches_known_variance() {
        let mut w = WelfordStats::new();
        for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            w.update(x);
        }
        assert!((w.mean() - 5.0).abs() < 1e-9);
        assert!((w.variance() - 4.571428571428571).abs() < 1e-6);
    }

    #[test]
    fn welford_stddev_floors_below_two_samples() {
        let mut w = WelfordStats::new();
        assert_eq!(w.stddev(1.0), 1.0);
        w.update(100.0);
        assert_eq!(w.stddev(1.0), 1.0);
    }

    #[test]
    fn welford_zscore_uses_floor() {
        let mut w = WelfordStats::new();
        w.update(50.0);
        // single sample: stddev floors to min_floor, zscore is 0/floor = 0
        assert_eq!(w.zscore(50.0, 1.0), 0.0);
    }
}
