use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace};

const MICROS_PER_MINUTE: f64 = 60_000_000.0;

#[derive(Debug, Clone, Copy)]
pub struct RpmConfig {
    pub period: Duration,
    /// Pulses older than this are ignored.
    pub max_age: Duration,
    /// Smoothing factor. Values outside (0, 1) replace the published value
    /// directly.
    pub alpha: f64,
    /// Raw estimates closer than this to the published value are dropped.
    pub min_delta: f64,
}

impl Default for RpmConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(100),
            max_age: Duration::from_secs(2),
            alpha: 0.2,
            min_delta: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RpmEstimate {
    pub raw: f64,
    pub smoothed: f64,
}

impl RpmEstimate {
    pub const STOPPED: RpmEstimate = RpmEstimate {
        raw: 0.0,
        smoothed: 0.0,
    };

    /// Published value rounded for display.
    pub fn rpm(&self) -> u32 {
        self.smoothed.max(0.0).round() as u32
    }

    pub fn is_stopped(&self) -> bool {
        self.smoothed == 0.0 && self.raw == 0.0
    }
}

/// Instantaneous RPM from time-ordered pulse timestamps.
///
/// Returns `None` when fewer than two pulses are younger than `max_age_us`,
/// which is the stopped state rather than an error.
pub fn raw_rpm(timestamps: &[u64], now_us: u64, max_age_us: u64) -> Option<f64> {
    let mut valid = timestamps
        .iter()
        .copied()
        .filter(|&ts| now_us.saturating_sub(ts) <= max_age_us);

    let first = valid.next()?;
    let (count, last) = valid.fold((1u64, first), |(n, _), ts| (n + 1, ts));
    if count < 2 || last <= first {
        return None;
    }

    // Mean of successive deltas telescopes to the overall span.
    let mean_delta_us = (last - first) as f64 / (count - 1) as f64;
    Some(MICROS_PER_MINUTE / mean_delta_us)
}

#[derive(Debug, Clone)]
pub struct RpmEstimator {
    config: RpmConfig,
    estimate: RpmEstimate,
}

impl RpmEstimator {
    pub fn new(config: RpmConfig) -> Self {
        Self {
            config,
            estimate: RpmEstimate::STOPPED,
        }
    }

    pub fn config(&self) -> &RpmConfig {
        &self.config
    }

    pub fn estimate(&self) -> RpmEstimate {
        self.estimate
    }

    fn smoothing_enabled(&self) -> bool {
        self.config.alpha > 0.0 && self.config.alpha < 1.0
    }

    /// One estimator tick over a snapshot of the pulse buffer.
    pub fn update(&mut self, timestamps: &[u64], now_us: u64) -> RpmEstimate {
        let max_age_us = self.config.max_age.as_micros() as u64;
        let Some(raw) = raw_rpm(timestamps, now_us, max_age_us) else {
            if !self.estimate.is_stopped() {
                debug!(samples = timestamps.len(), "Spindle stopped");
            }
            self.estimate = RpmEstimate::STOPPED;
            return self.estimate;
        };

        self.estimate.raw = raw;
        let previous = self.estimate.smoothed;
        if (raw - previous).abs() > self.config.min_delta {
            self.estimate.smoothed = if self.smoothing_enabled() {
                self.config.alpha * raw + (1.0 - self.config.alpha) * previous
            } else {
                raw
            };
            trace!(raw, smoothed = self.estimate.smoothed, "RPM updated");
        }
        self.estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evenly_spaced(count: u64, period_us: u64, start_us: u64) -> Vec<u64> {
        (0..count).map(|i| start_us + i * period_us).collect()
    }

    #[test]
    fn constant_period_gives_exact_rpm() {
        let ts = evenly_spaced(5, 100_000, 1_000_000);
        let now = *ts.last().unwrap();
        assert_eq!(raw_rpm(&ts, now, 2_000_000), Some(600.0));
    }

    #[test]
    fn fewer_than_two_pulses_is_stopped() {
        assert_eq!(raw_rpm(&[], 0, 1_000), None);
        assert_eq!(raw_rpm(&[500], 500, 1_000), None);
    }

    #[test]
    fn stale_pulses_are_discarded() {
        // Only the last two are within 150 ms of now.
        let ts = [0, 10_000, 900_000, 1_000_000];
        let rpm = raw_rpm(&ts, 1_050_000, 150_000).unwrap();
        assert!((rpm - 600.0).abs() < 1e-9);
        assert_eq!(raw_rpm(&ts, 5_000_000, 150_000), None);
    }

    #[test]
    fn first_smoothed_update_blends_from_zero() {
        let mut est = RpmEstimator::new(RpmConfig {
            alpha: 0.2,
            min_delta: 5.0,
            ..RpmConfig::default()
        });
        let ts = evenly_spaced(5, 100_000, 0);
        let out = est.update(&ts, 400_000);
        assert_eq!(out.raw, 600.0);
        assert!((out.smoothed - 120.0).abs() < 1e-9);
    }

    #[test]
    fn small_changes_are_suppressed() {
        let mut est = RpmEstimator::new(RpmConfig {
            alpha: 1.0,
            min_delta: 10.0,
            ..RpmConfig::default()
        });
        let ts = evenly_spaced(3, 100_000, 0);
        assert_eq!(est.update(&ts, 200_000).smoothed, 600.0);

        // 99_000 us -> ~606 rpm, inside the jitter band.
        let ts = evenly_spaced(3, 99_000, 0);
        let out = est.update(&ts, 198_000);
        assert!(out.raw > 600.0);
        assert_eq!(out.smoothed, 600.0);
    }

    #[test]
    fn out_of_range_alpha_replaces_directly() {
        let mut est = RpmEstimator::new(RpmConfig {
            alpha: 1.7,
            min_delta: 0.0,
            ..RpmConfig::default()
        });
        let ts = evenly_spaced(4, 50_000, 0);
        assert_eq!(est.update(&ts, 150_000).smoothed, 1200.0);
    }

    #[test]
    fn losing_pulses_resets_to_zero() {
        let mut est = RpmEstimator::new(RpmConfig::default());
        let ts = evenly_spaced(4, 100_000, 0);
        assert!(est.update(&ts, 300_000).smoothed > 0.0);
        let out = est.update(&ts, 60_000_000);
        assert_eq!(out, RpmEstimate::STOPPED);
        assert_eq!(out.rpm(), 0);
    }
}
