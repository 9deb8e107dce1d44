/*!
Read-only surfaces over repository snapshots.

The transport (HTTP server, exposition wire format) stays outside the
engine; what lives here is the semantic mapping: every numeric attribute of
the data model becomes a named sample with labels, and the health view
answers live/ready from snapshot recency alone.
*/

use crate::core::monitor::repository::StatsSnapshot;
use crate::core::monitor::types::utc_now;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// One exported number.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: &'static str,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl MetricSample {
    fn plain(name: &'static str, value: f64) -> Self {
        Self {
            name,
            labels: Vec::new(),
            value,
        }
    }

    fn labeled(name: &'static str, labels: Vec<(&'static str, String)>, value: f64) -> Self {
        Self {
            name,
            labels,
            value,
        }
    }
}

/// Flatten a snapshot into exportable samples.
pub fn metric_samples(snapshot: &StatsSnapshot) -> Vec<MetricSample> {
    let target = snapshot.target.clone();
    let tl = |name: &'static str, value: f64| {
        MetricSample::labeled(name, vec![("target", target.clone())], value)
    };

    let mut out = vec![
        tl("netpulse_pings_sent_total", snapshot.counters.sent as f64),
        tl("netpulse_pings_ok_total", snapshot.counters.ok as f64),
        tl("netpulse_pings_lost_total", snapshot.counters.lost as f64),
        tl(
            "netpulse_consecutive_losses",
            snapshot.counters.consecutive_lost as f64,
        ),
        tl("netpulse_latency_avg_ms", snapshot.avg_latency_ms),
        tl("netpulse_latency_min_ms", snapshot.min_latency_ms),
        tl("netpulse_latency_max_ms", snapshot.max_latency_ms),
        tl("netpulse_jitter_ms", snapshot.jitter_ema_ms),
        tl("netpulse_loss_30m_pct", snapshot.loss_pct_30m),
        tl(
            "netpulse_connection_lost",
            if snapshot.connection_lost { 1.0 } else { 0.0 },
        ),
        tl("netpulse_route_changes_total", snapshot.route.change_count as f64),
        tl("netpulse_route_hops", snapshot.route_stats.hop_count as f64),
        tl("netpulse_route_avg_latency_ms", snapshot.route_stats.avg_latency_ms),
        tl("netpulse_route_loss_pct", snapshot.route_stats.loss_pct),
        tl(
            "netpulse_mtu_issue",
            if snapshot.mtu.issue { 1.0 } else { 0.0 },
        ),
        tl(
            "netpulse_update_available",
            if snapshot.update_available.is_some() { 1.0 } else { 0.0 },
        ),
    ];
    if let Some(mtu) = snapshot.mtu.path_mtu {
        out.push(tl("netpulse_path_mtu_bytes", mtu as f64));
    }
    if let Some(hops) = snapshot.ttl.estimated_hops {
        out.push(tl("netpulse_estimated_hops", hops as f64));
    }
    if let Some(provider) = &snapshot.public_ip.provider {
        out.push(MetricSample::labeled(
            "netpulse_public_ip_known",
            vec![("provider", provider.clone())],
            if snapshot.public_ip.ip.is_some() { 1.0 } else { 0.0 },
        ));
    }

    for hop in &snapshot.hops {
        let labels = |extra: &str| {
            vec![
                ("target", target.clone()),
                ("hop_index", hop.index.to_string()),
                ("hop_ip", extra.to_string()),
            ]
        };
        let ip = hop.ip.to_string();
        if let Some(rtt) = hop.last_rtt_ms {
            out.push(MetricSample::labeled(
                "netpulse_hop_latency_ms",
                labels(&ip),
                rtt,
            ));
        }
        out.push(MetricSample::labeled(
            "netpulse_hop_jitter_ms",
            labels(&ip),
            hop.jitter_ms,
        ));
        out.push(MetricSample::labeled(
            "netpulse_hop_loss_pct",
            labels(&ip),
            hop.loss_pct(),
        ));
    }

    for record in &snapshot.dns_records {
        let labels = vec![
            ("record_type", record.record_type.as_str().to_string()),
            ("server", record.server.clone()),
        ];
        out.push(MetricSample::labeled(
            "netpulse_dns_record_ok",
            labels.clone(),
            if record.ok { 1.0 } else { 0.0 },
        ));
        if let Some(latency) = record.latency_ms {
            out.push(MetricSample::labeled(
                "netpulse_dns_record_latency_ms",
                labels,
                latency,
            ));
        }
    }

    for (server, kind, stats) in &snapshot.dns_benchmarks {
        let labels = vec![
            ("server", server.clone()),
            ("test_kind", kind.as_str().to_string()),
        ];
        out.push(MetricSample::labeled(
            "netpulse_dns_benchmark_avg_ms",
            labels.clone(),
            stats.avg_ms,
        ));
        out.push(MetricSample::labeled(
            "netpulse_dns_benchmark_reliability",
            labels,
            stats.reliability(),
        ));
    }

    for alert in &snapshot.active_alerts {
        out.push(MetricSample::labeled(
            "netpulse_alert_active",
            vec![
                ("kind", alert.kind.as_str().to_string()),
                ("priority", format!("{:?}", alert.priority)),
            ],
            1.0,
        ));
    }

    out.push(MetricSample::plain(
        "netpulse_problem_risk",
        if snapshot.diagnosis.prediction == crate::core::monitor::types::Prediction::Risk {
            1.0
        } else {
            0.0
        },
    ));

    out
}

/// Render samples in the conventional `name{labels} value` text form.
pub fn render_text(samples: &[MetricSample]) -> String {
    let mut out = String::new();
    for sample in samples {
        out.push_str(sample.name);
        if !sample.labels.is_empty() {
            out.push('{');
            for (i, (key, value)) in sample.labels.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&format!("{}=\"{}\"", key, value.replace('"', "'")));
            }
            out.push('}');
        }
        out.push_str(&format!(" {}\n", sample.value));
    }
    out
}

/// Liveness/readiness over snapshot recency.
pub struct HealthView {
    interval: Duration,
}

impl HealthView {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Live: at least one sample committed in the last two intervals.
    pub fn live(&self, snapshot: &StatsSnapshot, now: DateTime<Utc>) -> bool {
        match snapshot.last_sample_at {
            Some(at) => {
                let age = (now - at).num_milliseconds().max(0) as u128;
                age <= self.interval.as_millis() * 2
            }
            None => false,
        }
    }

    /// Ready: live, and the ping worker completed its first tick.
    pub fn ready(&self, snapshot: &StatsSnapshot, now: DateTime<Utc>) -> bool {
        self.live(snapshot, now) && snapshot.first_tick_done
    }

    pub fn live_now(&self, snapshot: &StatsSnapshot) -> bool {
        self.live(snapshot, utc_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monitor::repository::{RepositoryLimits, StatsRepository};
    use crate::core::monitor::types::{utc_now, Sample};

    fn repo() -> StatsRepository {
        StatsRepository::new("1.1.1.1".into(), RepositoryLimits::default())
    }

    #[test]
    fn samples_cover_core_counters() {
        let r = repo();
        for _ in 0..5 {
            r.record_ping_result(Sample::ok(utc_now(), 20.0));
        }
        let samples = metric_samples(&r.snapshot());
        let sent = samples
            .iter()
            .find(|s| s.name == "netpulse_pings_sent_total")
            .unwrap();
        assert_eq!(sent.value, 5.0);
        assert_eq!(sent.labels[0].0, "target");
    }

    #[test]
    fn text_rendering_shapes_labels() {
        let samples = vec![MetricSample::labeled(
            "netpulse_hop_latency_ms",
            vec![("hop_index", "3".into()), ("hop_ip", "10.0.0.1".into())],
            7.5,
        )];
        let text = render_text(&samples);
        assert_eq!(
            text,
            "netpulse_hop_latency_ms{hop_index=\"3\",hop_ip=\"10.0.0.1\"} 7.5\n"
        );
    }

    #[test]
    fn health_requires_recent_samples_and_first_tick() {
        let r = repo();
        let view = HealthView::new(Duration::from_secs(1));
        let now = utc_now();
        assert!(!view.live(&r.snapshot(), now));

        r.record_ping_result(Sample::ok(now, 10.0));
        assert!(view.live(&r.snapshot(), now));
        assert!(!view.ready(&r.snapshot(), now), "first tick not noted yet");

        r.note_first_tick();
        assert!(view.ready(&r.snapshot(), now));

        // Stale: three intervals later without samples
        let later = now + chrono::Duration::seconds(3);
        assert!(!view.live(&r.snapshot(), later));
        assert!(!view.ready(&r.snapshot(), later));
    }
}
