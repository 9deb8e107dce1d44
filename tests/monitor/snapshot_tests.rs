//! Repository laws observable through the public snapshot surface.

use crate::common::{feed_lost, feed_ok, harness};
use netpulse::core::monitor::dns::{dns_score, DnsScoreInputs};
use netpulse::core::monitor::{metric_samples, render_text, HealthView};
use std::time::Duration;

#[test]
fn counters_law_holds_under_mixed_traffic() {
    let h = harness();
    for round in 0..20 {
        feed_ok(&h.repo, 7, 10.0 + round as f64);
        feed_lost(&h.repo, round % 3);
    }
    let snap = h.repo.snapshot();
    assert_eq!(snap.counters.sent, snap.counters.ok + snap.counters.lost);
    assert!(snap.counters.consecutive_lost as u64 <= snap.counters.lost);
    assert!(snap.latency_window_ms.len() <= 100);
    assert!(snap.latency_window_ms.iter().all(|v| *v >= 0.0));
}

#[test]
fn snapshots_are_isolated_from_the_repository() {
    let h = harness();
    feed_ok(&h.repo, 10, 25.0);
    let mut snap = h.repo.snapshot();

    snap.counters.sent = 0;
    snap.latency_window_ms.clear();
    snap.hops.push(netpulse::core::monitor::types::HopStatus::new(
        1,
        "10.0.0.1".parse().unwrap(),
        None,
    ));

    let fresh = h.repo.snapshot();
    assert_eq!(fresh.counters.sent, 10);
    assert_eq!(fresh.latency_window_ms.len(), 10);
    assert!(fresh.hops.is_empty());
}

#[test]
fn dns_score_is_bounded_for_all_inputs() {
    for rsr in [-5.0, 0.0, 0.3, 1.0, 42.0] {
        for rel in [-1.0, 0.0, 0.5, 1.0, 9.0] {
            for lat in [-10.0, 0.0, 50.0, 1e12] {
                let score = dns_score(&DnsScoreInputs {
                    record_success_rate: rsr,
                    reliability: rel,
                    latency_ms: lat,
                    slow_threshold_ms: 200.0,
                });
                assert!(
                    (0.0..=100.0).contains(&score.score),
                    "score {} out of range",
                    score.score
                );
            }
        }
    }
}

#[test]
fn metrics_surface_tracks_snapshot() {
    let h = harness();
    feed_ok(&h.repo, 42, 18.0);
    let samples = metric_samples(&h.repo.snapshot());
    let text = render_text(&samples);
    assert!(text.contains("netpulse_pings_sent_total{target=\"1.1.1.1\"} 42"));
    assert!(text.contains("netpulse_connection_lost{target=\"1.1.1.1\"} 0"));
}

#[test]
fn health_view_follows_sample_recency() {
    let h = harness();
    let view = HealthView::new(Duration::from_secs(1));
    assert!(!view.live_now(&h.repo.snapshot()));
    feed_ok(&h.repo, 1, 9.0);
    h.repo.note_first_tick();
    let snap = h.repo.snapshot();
    assert!(view.live_now(&snap));
    assert!(view.ready(&snap, netpulse::core::monitor::types::utc_now()));
}
