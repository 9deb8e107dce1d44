// Composite DNS health score.
//
// score = 0.40 * record_success_rate
//       + 0.30 * benchmark_reliability
//       + 0.30 * (1 - normalized_latency)
//
// scaled to 0..100. The latency term normalizes the uncached benchmark
// average (the kind that exercises recursion) against DNS_SLOW_THRESHOLD,
// falling back to monitor record latencies before the benchmark has data.

use crate::core::monitor::repository::StatsSnapshot;
use crate::core::monitor::types::{DnsScoreBucket, DnsTestKind};

#[derive(Debug, Clone, PartialEq)]
pub struct DnsScoreInputs {
    pub record_success_rate: f64,
    pub reliability: f64,
    pub latency_ms: f64,
    pub slow_threshold_ms: f64,
}

impl DnsScoreInputs {
    pub fn from_snapshot(snapshot: &StatsSnapshot, slow_threshold_ms: f64) -> Self {
        let record_success_rate = if snapshot.dns_records.is_empty() {
            1.0
        } else {
            let ok = snapshot.dns_records.iter().filter(|r| r.ok).count();
            ok as f64 / snapshot.dns_records.len() as f64
        };

        let reliabilities: Vec<f64> = snapshot
            .dns_benchmarks
            .iter()
            .filter(|(_, _, stats)| stats.total > 0)
            .map(|(_, _, stats)| stats.reliability())
            .collect();
        let reliability = if reliabilities.is_empty() {
            1.0
        } else {
            reliabilities.iter().sum::<f64>() / reliabilities.len() as f64
        };

        let uncached: Vec<f64> = snapshot
            .dns_benchmarks
            .iter()
            .filter(|(_, kind, stats)| *kind == DnsTestKind::Uncached && stats.ok > 0)
            .map(|(_, _, stats)| stats.avg_ms)
            .collect();
        let latency_ms = if !uncached.is_empty() {
            uncached.iter().sum::<f64>() / uncached.len() as f64
        } else {
            let record_latencies: Vec<f64> = snapshot
                .dns_records
                .iter()
                .filter_map(|r| r.latency_ms)
                .collect();
            if record_latencies.is_empty() {
                0.0
            } else {
                record_latencies.iter().sum::<f64>() / record_latencies.len() as f64
            }
        };

        Self {
            record_success_rate,
            reliability,
            latency_ms,
            slow_threshold_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DnsScore {
    /// 0..100
    pub score: f64,
    pub bucket: DnsScoreBucket,
}

pub fn dns_score(inputs: &DnsScoreInputs) -> DnsScore {
    let normalized_latency = if inputs.slow_threshold_ms <= 0.0 {
        0.0
    } else {
        (inputs.latency_ms / inputs.slow_threshold_ms).min(1.0)
    };
    let raw = 0.40 * inputs.record_success_rate.clamp(0.0, 1.0)
        + 0.30 * inputs.reliability.clamp(0.0, 1.0)
        + 0.30 * (1.0 - normalized_latency);
    let score = (raw * 100.0).clamp(0.0, 100.0);
    let bucket = if score >= 90.0 {
        DnsScoreBucket::Excellent
    } else if score >= 75.0 {
        DnsScoreBucket::Good
    } else if score >= 60.0 {
        DnsScoreBucket::Fair
    } else if score >= 40.0 {
        DnsScoreBucket::Poor
    } else {
        DnsScoreBucket::Critical
    };
    DnsScore { score, bucket }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(rsr: f64, rel: f64, lat: f64) -> DnsScoreInputs {
        DnsScoreInputs {
            record_success_rate: rsr,
            reliability: rel,
            latency_ms: lat,
            slow_threshold_ms: 200.0,
        }
    }

    #[test]
    fn perfect_inputs_score_100() {
        let s = dns_score(&inputs(1.0, 1.0, 0.0));
        assert_eq!(s.score, 100.0);
        assert_eq!(s.bucket, DnsScoreBucket::Excellent);
    }

    #[test]
    fn score_stays_in_range_for_garbage() {
        for rsr in [-1.0, 0.0, 0.5, 1.0, 7.0] {
            for rel in [-2.0, 0.0, 1.0, 5.0] {
                for lat in [0.0, 100.0, 1e9] {
                    let s = dns_score(&inputs(rsr, rel, lat));
                    assert!((0.0..=100.0).contains(&s.score));
                }
            }
        }
    }

    #[test]
    fn degraded_resolver_lands_at_or_below_poor() {
        // Resolver failing ~70% of everything, slow when it answers
        let s = dns_score(&inputs(0.3, 0.3, 300.0));
        assert!(s.bucket <= DnsScoreBucket::Poor);
        assert!(s.score < 40.0 + 20.0);
    }

    #[test]
    fn latency_normalization_saturates() {
        let slow = dns_score(&inputs(1.0, 1.0, 200.0));
        let slower = dns_score(&inputs(1.0, 1.0, 5000.0));
        assert_eq!(slow.score, slower.score);
        assert_eq!(slow.score, 70.0);
    }

    #[test]
    fn bucket_ordering_supports_threshold_checks() {
        assert!(DnsScoreBucket::Critical < DnsScoreBucket::Poor);
        assert!(DnsScoreBucket::Poor < DnsScoreBucket::Fair);
        assert!(DnsScoreBucket::Fair < DnsScoreBucket::Good);
        assert!(DnsScoreBucket::Good < DnsScoreBucket::Excellent);
    }
}
