/*!
Path-MTU worker: a descending don't-fragment sweep on a long period.

Each candidate payload gets one fast-failing DF ping; the largest that
passes sets the path MTU (payload + 28 bytes of IP/ICMP header). The issue
flag flips only through the repository's hysteresis so one congested probe
cannot flap the state, except on the very first run, which bypasses
hysteresis so the dashboard has a value immediately.
*/

use crate::config::Config;
use crate::core::monitor::debug_logger::get_debug_logger;
use crate::core::monitor::ping::ping_df_argv;
use crate::core::monitor::process::ProbeRunner;
use crate::core::monitor::repository::StatsRepository;
use crate::core::monitor::scheduler::{ShutdownSignal, Worker};
use crate::core::monitor::types::MonitorError;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// ICMP echo payload sizes probed, largest first. 1472 + 28 = 1500.
const PROBE_PAYLOADS: [u32; 7] = [1472, 1464, 1452, 1400, 1372, 1300, 1200];
/// IP + ICMP header overhead on top of the echo payload
const HEADER_OVERHEAD: u32 = 28;
/// Per-ping bound so the whole sweep completes in seconds
const PER_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct MtuWorker {
    target: IpAddr,
    check_interval: Duration,
    link_mtu: u32,
    repo: Arc<StatsRepository>,
    runner: Arc<dyn ProbeRunner>,
}

impl MtuWorker {
    pub fn new(cfg: &Config, repo: Arc<StatsRepository>, runner: Arc<dyn ProbeRunner>) -> Self {
        Self {
            target: cfg.target,
            check_interval: cfg.mtu_check_interval,
            link_mtu: cfg.link_mtu,
            repo,
            runner,
        }
    }

    /// Largest payload that passes with DF set, if any.
    async fn sweep(&self, shutdown: &ShutdownSignal) -> Result<Option<u32>, MonitorError> {
        for payload in PROBE_PAYLOADS {
            if shutdown.is_shutdown() {
                return Err(MonitorError::Cancelled);
            }
            let argv = ping_df_argv(self.target, payload, PER_PROBE_TIMEOUT);
            let result = self.runner.run(&argv, PER_PROBE_TIMEOUT, shutdown).await?;
            if result.succeeded() {
                return Ok(Some(payload + HEADER_OVERHEAD));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Worker for MtuWorker {
    fn name(&self) -> &'static str {
        "mtu"
    }

    fn period(&self) -> Duration {
        self.check_interval
    }

    async fn run_once(&self, shutdown: &ShutdownSignal) -> Result<(), MonitorError> {
        // An outage would read as "every size blocked"; skip the sweep and
        // keep the last known MTU state instead.
        if self.repo.connection_lost() {
            return Ok(());
        }

        let path_mtu = self.sweep(shutdown).await?;
        let first_run = self.repo.set_path_mtu(path_mtu);

        let issue_now = match path_mtu {
            Some(mtu) => mtu < self.link_mtu,
            // A sweep where even the smallest probe failed is suspicious
            // but not an MTU verdict; treat as issue only via hysteresis.
            None => true,
        };

        if first_run {
            get_debug_logger().info(
                "MtuWorker",
                &format!("initial path MTU {:?} (link {})", path_mtu, self.link_mtu),
            );
            return Ok(());
        }

        let (changed, state) = self.repo.update_mtu_hysteresis(issue_now);
        if changed {
            get_debug_logger().info(
                "MtuWorker",
                &format!("mtu issue state now {} (path {:?})", state, path_mtu),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monitor::process::{SpawnKind, SpawnResult};
    use crate::core::monitor::repository::RepositoryLimits;
    use tokio::sync::watch;

    /// Passes DF pings at or below a configured payload ceiling.
    struct ClampedPathRunner {
        max_payload: u32,
    }

    #[async_trait]
    impl ProbeRunner for ClampedPathRunner {
        async fn run(
            &self,
            argv: &[String],
            _timeout: Duration,
            _shutdown: &ShutdownSignal,
        ) -> Result<SpawnResult, MonitorError> {
            let payload: u32 = argv
                .iter()
                .filter_map(|a| a.parse().ok())
                .find(|p| *p >= 1000)
                .unwrap_or(0);
            let pass = payload <= self.max_payload;
            Ok(SpawnResult {
                stdout: if pass {
                    "64 bytes from target: time=10 ms\n".into()
                } else {
                    "ping: local error: message too long\n".into()
                },
                exit_code: Some(if pass { 0 } else { 1 }),
                kind: SpawnKind::Ok,
                elapsed: Duration::from_millis(5),
            })
        }
    }

    fn worker_with(max_payload: u32) -> (MtuWorker, Arc<StatsRepository>) {
        let repo = Arc::new(StatsRepository::new(
            "1.1.1.1".into(),
            RepositoryLimits::default(),
        ));
        let cfg = Config::default();
        let worker = MtuWorker::new(
            &cfg,
            Arc::clone(&repo),
            Arc::new(ClampedPathRunner { max_payload }),
        );
        (worker, repo)
    }

    fn signal() -> ShutdownSignal {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        ShutdownSignal::from_receiver(rx)
    }

    #[tokio::test]
    async fn clean_path_reports_full_mtu() {
        let (worker, repo) = worker_with(1472);
        worker.run_once(&signal()).await.unwrap();
        let mtu = repo.snapshot().mtu;
        assert_eq!(mtu.path_mtu, Some(1500));
        assert!(!mtu.issue);
    }

    #[tokio::test]
    async fn first_run_shows_issue_without_hysteresis() {
        let (worker, repo) = worker_with(1400);
        worker.run_once(&signal()).await.unwrap();
        let mtu = repo.snapshot().mtu;
        // 1400 + 28 header bytes
        assert_eq!(mtu.path_mtu, Some(1428));
        assert!(mtu.issue);
    }

    #[tokio::test]
    async fn later_runs_flip_only_after_consecutive_observations() {
        let (worker, repo) = worker_with(1472);
        // First run: clean path, no issue
        worker.run_once(&signal()).await.unwrap();
        assert!(!repo.snapshot().mtu.issue);

        // Path clamps down afterwards
        let clamped = MtuWorker::new(
            &Config::default(),
            Arc::clone(&repo),
            Arc::new(ClampedPathRunner { max_payload: 1300 }),
        );
        clamped.run_once(&signal()).await.unwrap();
        assert!(!repo.snapshot().mtu.issue, "one observation must not flip");
        clamped.run_once(&signal()).await.unwrap();
        assert!(!repo.snapshot().mtu.issue, "two observations must not flip");
        clamped.run_once(&signal()).await.unwrap();
        assert!(repo.snapshot().mtu.issue, "third consecutive flips");
    }
}
