// Adaptive per-metric baselines for the smart-alert pipeline.
//
// Each watched metric keeps a ring of recent samples bucketed by hour of
// day, so "normal" at 03:00 and "normal" at 20:00 are judged separately.
// Until warm-up completes the static threshold applies; afterwards the
// adaptive bound is mean + k*sigma (latency, jitter) or the 95th
// percentile (loss).

use chrono::{DateTime, Timelike, Utc};

const HOURS: usize = 24;
/// Per-hour ring capacity; at one pipeline tick per 30s this spans weeks.
const BUCKET_CAP: usize = 256;

#[derive(Debug, Clone, Default)]
struct HourBucket {
    ring: Vec<f64>,
    next: usize,
}

impl HourBucket {
    fn push(&mut self, value: f64) {
        if self.ring.len() < BUCKET_CAP {
            self.ring.push(value);
        } else {
            self.ring[self.next] = value;
            self.next = (self.next + 1) % BUCKET_CAP;
        }
    }
}

/// One metric's baseline state.
#[derive(Debug, Clone)]
pub struct AdaptiveBaseline {
    buckets: Vec<HourBucket>,
    /// Total samples absorbed; warm-up gate
    samples: usize,
    min_samples: usize,
}

impl AdaptiveBaseline {
    pub fn new(min_samples: usize) -> Self {
        Self {
            buckets: vec![HourBucket::default(); HOURS],
            samples: 0,
            min_samples,
        }
    }

    pub fn observe(&mut self, at: DateTime<Utc>, value: f64) {
        if !value.is_finite() || value < 0.0 {
            return;
        }
        self.buckets[at.hour() as usize % HOURS].push(value);
        self.samples += 1;
    }

    pub fn warmed_up(&self) -> bool {
        self.samples >= self.min_samples
    }

    fn hour_values(&self, at: DateTime<Utc>) -> &[f64] {
        &self.buckets[at.hour() as usize % HOURS].ring
    }

    /// Moving mean for the hour of `at`, falling back to the all-hours mean
    /// while that hour is still empty.
    pub fn mean(&self, at: DateTime<Utc>) -> f64 {
        let hour = self.hour_values(at);
        if !hour.is_empty() {
            return hour.iter().sum::<f64>() / hour.len() as f64;
        }
        self.global_mean()
    }

    fn global_mean(&self) -> f64 {
        let mut sum = 0.0;
        let mut n = 0usize;
        for b in &self.buckets {
            sum += b.ring.iter().sum::<f64>();
            n += b.ring.len();
        }
        if n == 0 {
            0.0
        } else {
            sum / n as f64
        }
    }

    pub fn stdev(&self, at: DateTime<Utc>) -> f64 {
        let values = self.hour_values(at);
        let values: Vec<f64> = if values.is_empty() {
            self.buckets.iter().flat_map(|b| b.ring.iter().cloned()).collect()
        } else {
            values.to_vec()
        };
        crate::core::monitor::repository::stdev(&values)
    }

    /// `mean + k * sigma` bound, or the static threshold before warm-up.
    pub fn sigma_threshold(&self, at: DateTime<Utc>, k: f64, static_threshold: f64) -> f64 {
        if !self.warmed_up() {
            return static_threshold;
        }
        let adaptive = self.mean(at) + k * self.stdev(at);
        // A dead-flat baseline would otherwise alert on any measurable value
        adaptive.max(static_threshold * 0.25)
    }

    /// 95th-percentile bound (nearest-rank), or the static threshold
    /// before warm-up.
    pub fn p95_threshold(&self, at: DateTime<Utc>, static_threshold: f64) -> f64 {
        if !self.warmed_up() {
            return static_threshold;
        }
        let mut values: Vec<f64> = {
            let hour = self.hour_values(at);
            if hour.is_empty() {
                self.buckets.iter().flat_map(|b| b.ring.iter().cloned()).collect()
            } else {
                hour.to_vec()
            }
        };
        if values.is_empty() {
            return static_threshold;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = (((values.len() as f64) * 0.95).ceil() as usize).saturating_sub(1);
        values[idx].max(static_threshold * 0.25)
    }
}
