//! Shared fixtures for integration tests.

use netpulse::config::Config;
use netpulse::core::monitor::alerts::{PipelineConfig, SmartAlertPipeline};
use netpulse::core::monitor::classifier::ProblemClassifier;
use netpulse::core::monitor::repository::{RepositoryLimits, StatsRepository};
use netpulse::core::monitor::types::{utc_now, FailureKind, Sample};
use std::sync::Arc;

pub struct Harness {
    pub repo: Arc<StatsRepository>,
    pub classifier: ProblemClassifier,
    pub pipeline: SmartAlertPipeline,
}

/// Repository, classifier and alert pipeline wired exactly as the engine
/// wires them, minus the probe workers: tests feed samples directly.
pub fn harness() -> Harness {
    let config = Config::default();
    let repo = Arc::new(StatsRepository::new(
        config.target.to_string(),
        RepositoryLimits::from_config(&config),
    ));
    let classifier = ProblemClassifier::new(&config, Arc::clone(&repo));
    let pipeline = SmartAlertPipeline::new(PipelineConfig::from_config(&config), Arc::clone(&repo));
    Harness {
        repo,
        classifier,
        pipeline,
    }
}

pub fn feed_ok(repo: &StatsRepository, count: usize, rtt_ms: f64) {
    for _ in 0..count {
        repo.record_ping_result(Sample::ok(utc_now(), rtt_ms));
    }
}

pub fn feed_lost(repo: &StatsRepository, count: usize) {
    for _ in 0..count {
        repo.record_ping_result(Sample::failed(utc_now(), FailureKind::TransientIo));
    }
}
