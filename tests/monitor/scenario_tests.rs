//! End-to-end engine scenarios driven through the repository, classifier
//! and alert pipeline exactly as the workers drive them.

use crate::common::{feed_lost, feed_ok, harness};
use chrono::Duration as ChronoDuration;
use netpulse::core::monitor::alerts::{AlertKind, AlertSeverity};
use netpulse::core::monitor::route::{parse_traceroute, route_fingerprint};
use netpulse::core::monitor::types::*;

const UNIX_TRACE_A: &str = "\
traceroute to 1.1.1.1 (1.1.1.1), 30 hops max, 60 byte packets
 1  192.168.1.1  1.1 ms  1.0 ms  1.2 ms
 2  10.10.0.1  4.8 ms  4.9 ms  5.0 ms
 3  172.16.5.9  9.1 ms  9.0 ms  9.2 ms
 4  1.1.1.1  11.0 ms  11.1 ms  10.9 ms
";

const UNIX_TRACE_B: &str = "\
traceroute to 1.1.1.1 (1.1.1.1), 30 hops max, 60 byte packets
 1  192.168.1.1  1.1 ms  1.0 ms  1.2 ms
 2  10.10.0.1  4.8 ms  4.9 ms  5.0 ms
 3  172.16.99.1  9.4 ms  9.5 ms  9.3 ms
 4  1.1.1.1  11.0 ms  11.1 ms  10.9 ms
";

#[test]
fn stable_link_stays_quiet() {
    let h = harness();
    feed_ok(&h.repo, 600, 20.0);

    let diagnosis = h.classifier.evaluate_now();
    assert_eq!(diagnosis.kind, ProblemKind::None);
    assert_eq!(diagnosis.prediction, Prediction::Stable);

    let now = utc_now();
    for i in 0..5 {
        h.pipeline.tick(now + ChronoDuration::seconds(30 * i));
    }

    let snap = h.repo.snapshot();
    assert_eq!(snap.counters.sent, 600);
    assert_eq!(snap.counters.ok, 600);
    assert_eq!(snap.counters.lost, 0);
    assert!(snap.active_alerts.is_empty());
    // Ping activity alone never touches MTU or DNS state
    assert!(!snap.mtu.issue);
    assert!(snap.mtu.path_mtu.is_none());
    assert!(snap.dns_records.is_empty());
    assert!(snap.dns_benchmarks.is_empty());
}

#[test]
fn isp_outage_alerts_and_recovers() {
    let h = harness();
    feed_ok(&h.repo, 100, 18.0);

    // Inject consecutive failures; the 5th crosses the threshold
    for i in 1..=10u32 {
        feed_lost(&h.repo, 1);
        let snap = h.repo.snapshot();
        if i < 5 {
            assert!(!snap.connection_lost, "not lost before the threshold");
        } else {
            assert!(snap.connection_lost, "lost from the 5th failure on");
        }
    }

    let diagnosis = h.classifier.evaluate_now();
    assert_eq!(diagnosis.kind, ProblemKind::Isp);
    assert_eq!(diagnosis.prediction, Prediction::Risk);

    let base = utc_now();
    h.pipeline.tick(base);
    let active = h.repo.active_alerts();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].kind, AlertKind::ConnectionLost);
    assert_eq!(active[0].severity, AlertSeverity::Critical);

    // Recovery: a single ok sample clears the lost state
    feed_ok(&h.repo, 1, 19.0);
    assert!(!h.repo.snapshot().connection_lost);
    assert_eq!(h.repo.snapshot().counters.consecutive_lost, 0);

    // Three further evaluations with the condition false recover the alert
    for i in 1..=3i64 {
        h.pipeline.tick(base + ChronoDuration::seconds(30 * i));
    }
    assert!(h.repo.active_alerts().is_empty());
    assert_eq!(h.repo.snapshot().alert_history_len, 1);

    let after = h.classifier.evaluate_now();
    assert_ne!(after.kind, ProblemKind::Isp);
}

#[test]
fn route_change_commits_after_two_detections_and_resets_hop() {
    let h = harness();

    // Initial discovery commits immediately
    let hops_a = parse_traceroute(UNIX_TRACE_A);
    let fp_a = route_fingerprint(&hops_a);
    let (commit, _) = h.repo.update_route_hysteresis(&fp_a);
    assert!(commit);
    h.repo.install_route(hops_a.clone(), fp_a.clone());

    // Hop 3 accumulates some probe state
    h.repo.record_hop_ping(3, Some(9.0));
    h.repo.record_hop_ping(3, Some(9.5));
    assert_eq!(h.repo.snapshot().hops[2].sent, 2);

    // hops[3] changes; first detection must not commit
    let hops_b = parse_traceroute(UNIX_TRACE_B);
    let fp_b = route_fingerprint(&hops_b);
    assert_ne!(fp_a, fp_b);
    let (commit, run) = h.repo.update_route_hysteresis(&fp_b);
    assert!(!commit);
    assert_eq!(run, 1);
    // Second consecutive identical detection commits
    let (commit, run) = h.repo.update_route_hysteresis(&fp_b);
    assert!(commit);
    assert_eq!(run, 2);
    h.repo.install_route(hops_b, fp_b.clone());

    let snap = h.repo.snapshot();
    assert_eq!(snap.route.change_count, 1);
    assert_eq!(snap.route.fingerprint, fp_b);
    // Hop 3 state was rebuilt: fresh counters, empty history, new address
    let hop3 = snap.hops.iter().find(|h| h.index == 3).unwrap();
    assert_eq!(hop3.sent, 0);
    assert!(hop3.latency_window.is_empty());
    assert_eq!(hop3.ip.to_string(), "172.16.99.1");
    // The prober picks the hop up again on its next tick
    h.repo.record_hop_ping(3, Some(9.4));
    assert_eq!(h.repo.snapshot().hops[2].sent, 1);
}

#[test]
fn dns_degradation_without_ping_loss_classifies_dns() {
    let h = harness();
    feed_ok(&h.repo, 200, 15.0);

    // Record lookups mostly failing
    for (i, rt) in [DnsRecordType::A, DnsRecordType::Aaaa, DnsRecordType::Mx, DnsRecordType::Ns]
        .iter()
        .enumerate()
    {
        h.repo.record_dns_record_status(DnsRecordStatus {
            record_type: *rt,
            server: "system".into(),
            ok: i == 0,
            latency_ms: if i == 0 { Some(160.0) } else { None },
            record_count: if i == 0 { 2 } else { 0 },
            error: (i != 0).then(|| "query timed out".to_string()),
            checked_at: utc_now(),
        });
    }
    // Uncached benchmark reliability collapses to 0.3
    for i in 0..10 {
        let latency = (i < 3).then_some(150.0);
        h.repo
            .record_dns_benchmark("1.1.1.1", DnsTestKind::Uncached, latency);
    }

    let diagnosis = h.classifier.evaluate_now();
    assert_eq!(diagnosis.kind, ProblemKind::Dns);
    assert_eq!(diagnosis.prediction, Prediction::Risk);

    // Repeated evaluations collapse into a single dns alert
    let base = utc_now();
    for i in 0..4 {
        h.pipeline.tick(base + ChronoDuration::seconds(30 * i));
    }
    let dns_alerts: Vec<_> = h
        .repo
        .active_alerts()
        .into_iter()
        .filter(|a| a.kind == AlertKind::DnsDegraded)
        .collect();
    assert_eq!(dns_alerts.len(), 1);
    assert!(dns_alerts[0].suppression_count >= 1);
}

#[test]
fn sustained_outage_notifications_follow_fatigue_schedule() {
    let h = harness();
    feed_ok(&h.repo, 50, 20.0);
    feed_lost(&h.repo, 10);
    assert!(h.repo.snapshot().connection_lost);

    let start = utc_now();
    let mut notifications = 0;
    // 30 minutes of pipeline evaluations every 30 seconds
    for i in 0..60 {
        h.pipeline.tick(start + ChronoDuration::seconds(30 * i));
        let sounded = h.repo.with_alert_book(|book| book.sound_pending.take());
        if sounded.is_some() {
            notifications += 1;
        }
    }

    // Escalation schedule {1,3,5,15,30} bounds visible emissions to 6
    assert!(notifications >= 2, "got only {} notifications", notifications);
    assert!(notifications <= 6, "got {} notifications", notifications);
    // One entity absorbed every suppressed re-emission
    let active = h.repo.active_alerts();
    assert_eq!(active.len(), 1);
    assert!(active[0].suppression_count > 20);
}
