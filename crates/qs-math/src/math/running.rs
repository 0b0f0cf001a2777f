//! Running per-process sample statistics.
//!
//! Accumulators are raw power sums so they can be persisted as-is and
//! reduced later. Derived metrics are computed once, at report time:
//!
//! - mean: `Σp / n`
//! - standard deviation: `sqrt(Σp² / n)`
//! - sigma4 deviation: `(Σp⁴ / n)^(1/4)`, which weights bursts more heavily
//!   than the standard deviation does
//!
//! The "deviation" metrics are root moments about zero, not about the
//! mean. For CPU percentages that idle at zero this is what makes a single
//! burst stand out.

use serde::{Deserialize, Serialize};

/// Default strike threshold in percent.
pub const DEFAULT_STRIKE_THRESHOLD_PERCENT: f64 = 2.0;

/// Cumulative statistics over a sequence of per-tick CPU percentages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    /// Number of samples recorded.
    pub sample_count: u64,
    /// Σ percent.
    pub percent_cumulative: f64,
    /// Σ percent².
    pub variance_cumulative: f64,
    /// Σ percent⁴.
    pub sigma4_cumulative: f64,
    /// Largest single sample.
    pub max_percent: f64,
    /// Samples strictly above the strike threshold.
    pub samples_above_threshold: u32,
}

impl SampleStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one tick's percent.
    pub fn record(&mut self, percent: f64, strike_threshold: f64) {
        let squared = percent * percent;
        self.sample_count += 1;
        self.percent_cumulative += percent;
        self.variance_cumulative += squared;
        self.sigma4_cumulative += squared * squared;
        if percent > self.max_percent {
            self.max_percent = percent;
        }
        if percent > strike_threshold {
            self.samples_above_threshold = self.samples_above_threshold.saturating_add(1);
        }
    }

    /// Build statistics from a full series (mostly useful for tests and replay).
    pub fn from_samples(samples: &[f64], strike_threshold: f64) -> Self {
        let mut stats = Self::new();
        for &p in samples {
            stats.record(p, strike_threshold);
        }
        stats
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Mean percent, or 0 with no samples.
    pub fn average_percent(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.percent_cumulative / self.sample_count as f64
    }

    /// `sqrt(Σp² / n)`, or 0 with no samples.
    pub fn standard_deviation(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        (self.variance_cumulative / self.sample_count as f64).sqrt()
    }

    /// `(Σp⁴ / n)^(1/4)`, or 0 with no samples.
    pub fn sigma4_deviation(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        (self.sigma4_cumulative / self.sample_count as f64).sqrt().sqrt()
    }

    /// Derived metrics in one shot.
    pub fn derived(&self) -> DerivedMetrics {
        DerivedMetrics {
            average_percent: self.average_percent(),
            standard_deviation: self.standard_deviation(),
            sigma4_deviation: self.sigma4_deviation(),
        }
    }
}

/// Metrics derived from [`SampleStats`] at session end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub average_percent: f64,
    pub standard_deviation: f64,
    pub sigma4_deviation: f64,
}
