/*!
Problem classifier: turns raw repository signals into a single diagnosis.

The classification table is evaluated top-down, first match wins:

| condition                                             | kind    |
|-------------------------------------------------------|---------|
| connection lost, or consecutive losses >= threshold   | isp     |
| 30m loss over threshold and first-hop loss high       | local   |
| dns score at or below poor while ping loss acceptable | dns     |
| mtu issue present alongside intermittent loss         | mtu     |
| loss > 0 with no clear bucket                         | unknown |
| none of the above                                     | none    |

Prediction flips to risk when a kind is present, or when the same kind
recurred three or more times in the rolling hour. The suppression-window
check happens before the recurring history is appended so a flapping
condition cannot flood the history.
*/

use crate::config::Config;
use crate::core::monitor::debug_logger::get_debug_logger;
use crate::core::monitor::dns::score::{dns_score, DnsScoreInputs};
use crate::core::monitor::repository::{StatsRepository, StatsSnapshot};
use crate::core::monitor::scheduler::{ShutdownSignal, Worker};
use crate::core::monitor::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct ProblemClassifier {
    repo: Arc<StatsRepository>,
    analysis_interval: Duration,
    loss_threshold_pct: f64,
    consecutive_loss_threshold: u32,
    dns_slow_threshold_ms: f64,
    recurring_count: usize,
    suppression_window: ChronoDuration,
    recurring: Mutex<VecDeque<(DateTime<Utc>, ProblemKind)>>,
}

impl ProblemClassifier {
    pub fn new(cfg: &Config, repo: Arc<StatsRepository>) -> Self {
        Self {
            repo,
            analysis_interval: cfg.problem_analysis_interval,
            loss_threshold_pct: cfg.packet_loss_threshold_pct,
            consecutive_loss_threshold: cfg.consecutive_loss_threshold,
            dns_slow_threshold_ms: cfg.dns_slow_threshold_ms,
            recurring_count: crate::config::defaults::RECURRING_PROBLEM_COUNT,
            suppression_window: ChronoDuration::seconds(
                crate::config::defaults::RECURRING_SUPPRESSION_SECS as i64,
            ),
            recurring: Mutex::new(VecDeque::new()),
        }
    }

    /// Classify one snapshot. Pure: no repository access, fully testable.
    pub fn classify(&self, snapshot: &StatsSnapshot) -> (ProblemKind, String) {
        if snapshot.connection_lost
            || snapshot.counters.consecutive_lost >= self.consecutive_loss_threshold
        {
            return (
                ProblemKind::Isp,
                format!(
                    "target unreachable ({} consecutive losses)",
                    snapshot.counters.consecutive_lost
                ),
            );
        }

        let first_hop_loss = snapshot
            .hops
            .iter()
            .min_by_key(|h| h.index)
            .map(|h| h.loss_pct())
            .unwrap_or(0.0);
        if snapshot.loss_pct_30m > self.loss_threshold_pct && first_hop_loss > 20.0 {
            return (
                ProblemKind::Local,
                format!(
                    "first hop losing {:.0}% while end-to-end loss is {:.1}%",
                    first_hop_loss, snapshot.loss_pct_30m
                ),
            );
        }

        let dns = dns_score(&DnsScoreInputs::from_snapshot(
            snapshot,
            self.dns_slow_threshold_ms,
        ));
        if dns.bucket <= DnsScoreBucket::Poor
            && snapshot.loss_pct_30m <= self.loss_threshold_pct
            && !snapshot.dns_records.is_empty()
        {
            return (
                ProblemKind::Dns,
                format!("dns health score {:.0} while ping loss is acceptable", dns.score),
            );
        }

        if snapshot.mtu.issue && snapshot.loss_pct_30m > 0.0 {
            return (
                ProblemKind::Mtu,
                format!(
                    "path MTU {} below link MTU {} with intermittent loss",
                    snapshot
                        .mtu
                        .path_mtu
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "unknown".into()),
                    snapshot.mtu.link_mtu
                ),
            );
        }

        if snapshot.loss_pct_30m > 0.0 {
            return (
                ProblemKind::Unknown,
                format!("{:.1}% loss with no clear cause", snapshot.loss_pct_30m),
            );
        }

        (ProblemKind::None, String::new())
    }

    /// Full evaluation: classify, update recurrence history, derive the
    /// prediction and write the diagnosis back atomically.
    pub fn evaluate_at(&self, now: DateTime<Utc>) -> ProblemDiagnosis {
        let snapshot = self.repo.snapshot();
        let (kind, cause) = self.classify(&snapshot);

        let recurring = self.update_recurrence(kind, now);
        let prediction = if kind != ProblemKind::None || recurring {
            Prediction::Risk
        } else {
            Prediction::Stable
        };

        let diagnosis = ProblemDiagnosis {
            kind,
            prediction,
            recurring,
            evaluated_at: Some(now),
            cause,
        };
        if snapshot.diagnosis.kind != kind {
            get_debug_logger().info(
                "Classifier",
                &format!("diagnosis {} -> {}", snapshot.diagnosis.kind, kind),
            );
        }
        self.repo.set_diagnosis(diagnosis.clone());
        diagnosis
    }

    /// Synchronous re-evaluation requested by the ping worker on
    /// connection-state transitions.
    pub fn evaluate_now(&self) -> ProblemDiagnosis {
        self.evaluate_at(utc_now())
    }

    /// Maintain the rolling-hour recurrence history. Returns whether the
    /// current kind has recurred enough to predict risk.
    fn update_recurrence(&self, kind: ProblemKind, now: DateTime<Utc>) -> bool {
        let mut history = self.recurring.lock().unwrap_or_else(|e| e.into_inner());
        let hour_ago = now - ChronoDuration::hours(1);
        while history.front().map(|(at, _)| *at < hour_ago).unwrap_or(false) {
            history.pop_front();
        }

        if kind == ProblemKind::None {
            return false;
        }

        // Suppression check before append: a kind re-observed within the
        // window does not add a new history entry.
        let suppressed = history
            .iter()
            .rev()
            .find(|(_, k)| *k == kind)
            .map(|(at, _)| now - *at < self.suppression_window)
            .unwrap_or(false);
        if !suppressed {
            history.push_back((now, kind));
        }

        history.iter().filter(|(_, k)| *k == kind).count() >= self.recurring_count
    }
}

/// Periodic wrapper so the classifier also runs on its own schedule.
pub struct ClassifierWorker {
    classifier: Arc<ProblemClassifier>,
}

impl ClassifierWorker {
    pub fn new(classifier: Arc<ProblemClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Worker for ClassifierWorker {
    fn name(&self) -> &'static str {
        "problem-classifier"
    }

    fn period(&self) -> Duration {
        self.classifier.analysis_interval
    }

    async fn run_once(&self, _shutdown: &ShutdownSignal) -> Result<(), MonitorError> {
        self.classifier.evaluate_now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monitor::repository::RepositoryLimits;

    fn classifier_with_repo() -> (ProblemClassifier, Arc<StatsRepository>) {
        let repo = Arc::new(StatsRepository::new(
            "1.1.1.1".into(),
            RepositoryLimits::default(),
        ));
        let cfg = Config::default();
        (ProblemClassifier::new(&cfg, Arc::clone(&repo)), repo)
    }

    #[test]
    fn healthy_link_classifies_none() {
        let (c, repo) = classifier_with_repo();
        for _ in 0..50 {
            repo.record_ping_result(Sample::ok(utc_now(), 20.0));
        }
        let d = c.evaluate_now();
        assert_eq!(d.kind, ProblemKind::None);
        assert_eq!(d.prediction, Prediction::Stable);
        assert!(!d.recurring);
    }

    #[test]
    fn outage_classifies_isp_with_risk() {
        let (c, repo) = classifier_with_repo();
        for _ in 0..10 {
            repo.record_ping_result(Sample::failed(utc_now(), FailureKind::TransientIo));
        }
        let d = c.evaluate_now();
        assert_eq!(d.kind, ProblemKind::Isp);
        assert_eq!(d.prediction, Prediction::Risk);
        assert_eq!(repo.snapshot().diagnosis.kind, ProblemKind::Isp);
    }

    #[test]
    fn first_hop_loss_classifies_local() {
        let (c, repo) = classifier_with_repo();
        // ~6% end-to-end loss, never more than one consecutive failure
        for _ in 0..88 {
            repo.record_ping_result(Sample::ok(utc_now(), 20.0));
        }
        for _ in 0..6 {
            repo.record_ping_result(Sample::failed(utc_now(), FailureKind::TransientIo));
            repo.record_ping_result(Sample::ok(utc_now(), 20.0));
        }
        repo.install_route(
            vec![RouteHop {
                index: 1,
                ip: Some("192.168.1.1".parse().unwrap()),
                hostname: None,
            }],
            "fp".into(),
        );
        for _ in 0..7 {
            repo.record_hop_ping(1, None);
        }
        for _ in 0..3 {
            repo.record_hop_ping(1, Some(1.0));
        }
        let snapshot = repo.snapshot();
        // Preconditions: loss over threshold, first hop losing hard
        assert!(snapshot.loss_pct_30m > 5.0);
        let (kind, _) = c.classify(&snapshot);
        // Either isp (if consecutive crossed) or local; the sample pattern
        // above never exceeds one consecutive loss.
        assert_eq!(kind, ProblemKind::Local);
    }

    #[test]
    fn mtu_issue_with_intermittent_loss_classifies_mtu() {
        let (c, repo) = classifier_with_repo();
        for _ in 0..98 {
            repo.record_ping_result(Sample::ok(utc_now(), 20.0));
        }
        repo.record_ping_result(Sample::failed(utc_now(), FailureKind::TransientIo));
        repo.record_ping_result(Sample::ok(utc_now(), 20.0));
        repo.set_path_mtu(Some(1400));
        let d = c.evaluate_now();
        assert_eq!(d.kind, ProblemKind::Mtu);
    }

    #[test]
    fn unexplained_loss_classifies_unknown() {
        let (c, repo) = classifier_with_repo();
        for _ in 0..99 {
            repo.record_ping_result(Sample::ok(utc_now(), 20.0));
        }
        repo.record_ping_result(Sample::failed(utc_now(), FailureKind::TransientIo));
        repo.record_ping_result(Sample::ok(utc_now(), 20.0));
        let d = c.evaluate_now();
        assert_eq!(d.kind, ProblemKind::Unknown);
        assert_eq!(d.prediction, Prediction::Risk);
    }

    #[test]
    fn recurrence_flips_prediction_and_suppression_bounds_history() {
        let (c, repo) = classifier_with_repo();
        for _ in 0..10 {
            repo.record_ping_result(Sample::failed(utc_now(), FailureKind::TransientIo));
        }
        let base = utc_now();
        // Three appearances spaced past the suppression window
        for i in 0..3 {
            let d = c.evaluate_at(base + ChronoDuration::minutes(3 * i));
            assert_eq!(d.kind, ProblemKind::Isp);
            if i == 2 {
                assert!(d.recurring);
            }
        }
        // Rapid re-evaluations within the window do not grow the history
        let before = c.recurring.lock().unwrap().len();
        for s in 0..5 {
            c.evaluate_at(base + ChronoDuration::minutes(6) + ChronoDuration::seconds(s));
        }
        let after = c.recurring.lock().unwrap().len();
        assert_eq!(before, after);
    }
}
