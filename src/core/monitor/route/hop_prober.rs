/*!
Hop prober: pings every discovered hop in parallel each tick.

Each hop probe is its own subprocess invocation bounded by
`HOP_PING_TIMEOUT`; results funnel back into the repository's per-hop
windows (latency, stdev jitter, delta vs previous hop, loss counters,
sparkline history). Geo attribution fills in lazily through the
rate-limited cache and is allowed to stay empty indefinitely.
*/

use crate::config::Config;
use crate::core::monitor::ping::{ping_argv, PingOutputParser};
use crate::core::monitor::process::ProbeRunner;
use crate::core::monitor::repository::StatsRepository;
use crate::core::monitor::route::geo::GeoClient;
use crate::core::monitor::scheduler::{ShutdownSignal, Worker};
use crate::core::monitor::types::MonitorError;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

pub struct HopProberWorker {
    hop_ping_interval: Duration,
    hop_ping_timeout: Duration,
    latency_good_ms: f64,
    latency_warn_ms: f64,
    repo: Arc<StatsRepository>,
    runner: Arc<dyn ProbeRunner>,
    geo: Arc<GeoClient>,
    parser: PingOutputParser,
}

impl HopProberWorker {
    pub fn new(
        cfg: &Config,
        repo: Arc<StatsRepository>,
        runner: Arc<dyn ProbeRunner>,
        geo: Arc<GeoClient>,
    ) -> Self {
        Self {
            hop_ping_interval: cfg.hop_ping_interval,
            hop_ping_timeout: cfg.hop_ping_timeout,
            latency_good_ms: cfg.hop_latency_good_ms,
            latency_warn_ms: cfg.hop_latency_warn_ms,
            repo,
            runner,
            geo,
            parser: PingOutputParser::new(),
        }
    }

    async fn ping_hop(
        &self,
        index: u8,
        ip: IpAddr,
        shutdown: &ShutdownSignal,
    ) -> Result<(u8, Option<f64>), MonitorError> {
        let argv = ping_argv(ip, self.hop_ping_timeout);
        let result = self.runner.run(&argv, self.hop_ping_timeout, shutdown).await?;
        let rtt = if result.succeeded() {
            self.parser.parse(&result.stdout).map(|r| r.rtt_ms)
        } else {
            None
        };
        Ok((index, rtt))
    }
}

#[async_trait]
impl Worker for HopProberWorker {
    fn name(&self) -> &'static str {
        "hop-prober"
    }

    fn period(&self) -> Duration {
        self.hop_ping_interval
    }

    async fn run_once(&self, shutdown: &ShutdownSignal) -> Result<(), MonitorError> {
        let route = self.repo.current_route();
        let targets: Vec<(u8, IpAddr)> = route
            .hops
            .iter()
            .filter_map(|h| h.ip.map(|ip| (h.index, ip)))
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        // All hops in parallel; each is an independent subprocess
        let probes = targets
            .iter()
            .map(|(index, ip)| self.ping_hop(*index, *ip, shutdown));
        let results = futures::future::join_all(probes).await;

        let mut cancelled = false;
        for result in results {
            match result {
                Ok((index, rtt)) => self.repo.record_hop_ping(index, rtt),
                Err(MonitorError::Cancelled) => cancelled = true,
                Err(_) => {}
            }
        }
        if cancelled {
            return Err(MonitorError::Cancelled);
        }

        // Fill missing geo within the lookup budget
        let snapshot_hops = self.repo.snapshot().hops;
        for hop in snapshot_hops.iter().filter(|h| h.country.is_none()) {
            if shutdown.is_shutdown() {
                return Err(MonitorError::Cancelled);
            }
            if let Some(info) = self.geo.lookup(hop.ip).await {
                self.repo.set_hop_geo(hop.index, info.country, info.asn);
            }
        }

        self.repo
            .recompute_route_stats(self.latency_good_ms, self.latency_warn_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monitor::process::{SpawnKind, SpawnResult};
    use crate::core::monitor::repository::RepositoryLimits;
    use crate::core::monitor::route::geo::{GeoInfo, GeoProvider};
    use crate::core::monitor::types::{RouteHealth, RouteHop};
    use tokio::sync::watch;

    struct CannedRunner {
        rtt_by_target: std::collections::HashMap<String, f64>,
    }

    #[async_trait]
    impl ProbeRunner for CannedRunner {
        async fn run(
            &self,
            argv: &[String],
            _timeout: Duration,
            _shutdown: &ShutdownSignal,
        ) -> Result<SpawnResult, MonitorError> {
            let target = argv.last().cloned().unwrap_or_default();
            match self.rtt_by_target.get(&target) {
                Some(rtt) => Ok(SpawnResult {
                    stdout: format!("64 bytes from {}: icmp_seq=1 ttl=60 time={} ms\n", target, rtt),
                    exit_code: Some(0),
                    kind: SpawnKind::Ok,
                    elapsed: Duration::from_millis(1),
                }),
                None => Ok(SpawnResult {
                    stdout: String::new(),
                    exit_code: Some(1),
                    kind: SpawnKind::Ok,
                    elapsed: Duration::from_millis(1),
                }),
            }
        }
    }

    struct StaticGeo;

    #[async_trait]
    impl GeoProvider for StaticGeo {
        async fn fetch(&self, _ip: IpAddr) -> Result<GeoInfo, MonitorError> {
            Ok(GeoInfo {
                country: Some("NL".into()),
                asn: Some("AS1136".into()),
                city: None,
            })
        }
    }

    fn test_config() -> Config {
        Config::default()
    }

    #[tokio::test]
    async fn probes_all_hops_and_summarizes() {
        let repo = Arc::new(StatsRepository::new(
            "1.1.1.1".into(),
            RepositoryLimits::default(),
        ));
        let hops = vec![
            RouteHop { index: 1, ip: Some("192.168.1.1".parse().unwrap()), hostname: None },
            RouteHop { index: 2, ip: Some("10.0.0.1".parse().unwrap()), hostname: None },
            RouteHop { index: 3, ip: None, hostname: None },
        ];
        repo.install_route(hops, "fp".into());

        let mut rtt_by_target = std::collections::HashMap::new();
        rtt_by_target.insert("192.168.1.1".to_string(), 2.0);
        rtt_by_target.insert("10.0.0.1".to_string(), 8.5);
        let worker = HopProberWorker::new(
            &test_config(),
            Arc::clone(&repo),
            Arc::new(CannedRunner { rtt_by_target }),
            Arc::new(GeoClient::new(
                Arc::new(StaticGeo),
                40,
                Duration::from_secs(3600),
            )),
        );

        let (_tx, rx) = watch::channel(false);
        let signal = ShutdownSignal::from_receiver(rx);
        worker.run_once(&signal).await.unwrap();

        let snap = repo.snapshot();
        // The silent hop (no ip) is not in the hop table
        assert_eq!(snap.hops.len(), 2);
        assert_eq!(snap.hops[0].sent, 1);
        assert_eq!(snap.hops[0].last_rtt_ms, Some(2.0));
        assert_eq!(snap.hops[1].last_rtt_ms, Some(8.5));
        // Delta vs previous hop
        assert!((snap.hops[1].delta_prev_ms.unwrap() - 6.5).abs() < 1e-9);
        assert_eq!(snap.hops[0].country.as_deref(), Some("NL"));
        assert_eq!(snap.route_stats.hop_count, 2);
        assert_eq!(snap.route_stats.health, RouteHealth::Healthy);
    }

    #[tokio::test]
    async fn lost_hop_probe_counts_as_loss() {
        let repo = Arc::new(StatsRepository::new(
            "1.1.1.1".into(),
            RepositoryLimits::default(),
        ));
        repo.install_route(
            vec![RouteHop {
                index: 1,
                ip: Some("172.16.0.1".parse().unwrap()),
                hostname: None,
            }],
            "fp".into(),
        );
        let worker = HopProberWorker::new(
            &test_config(),
            Arc::clone(&repo),
            Arc::new(CannedRunner {
                rtt_by_target: std::collections::HashMap::new(),
            }),
            Arc::new(GeoClient::new(
                Arc::new(StaticGeo),
                40,
                Duration::from_secs(3600),
            )),
        );
        let (_tx, rx) = watch::channel(false);
        worker
            .run_once(&ShutdownSignal::from_receiver(rx))
            .await
            .unwrap();
        let hop = &repo.snapshot().hops[0];
        assert_eq!(hop.sent, 1);
        assert_eq!(hop.lost, 1);
        assert_eq!(hop.loss_pct(), 100.0);
    }
}
