/*!
DNS benchmark: cached / uncached / dotcom latency per configured server.

Servers rotate round-robin, one per tick, bounding socket load. The three
test kinds:

- **cached**: two sequential queries for the same name; the second latency
  is the measurement (first warms the server's cache)
- **uncached**: a freshly generated random subdomain under a wildcard-free
  parent, forcing recursion; NXDOMAIN is a valid measurement, transport
  failure is not; one attempt only
- **dotcom**: a popular .com name as a stable reference point
*/

use crate::config::Config;
use crate::core::monitor::dns::client::DnsClient;
use crate::core::monitor::repository::StatsRepository;
use crate::core::monitor::scheduler::{ShutdownSignal, Worker};
use crate::core::monitor::types::{DnsRecordType, DnsTestKind, MonitorError};
use async_trait::async_trait;
use rand::Rng;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct DnsBenchmarkWorker {
    servers: Vec<IpAddr>,
    interval: Duration,
    timeout: Duration,
    cached_name: String,
    uncached_parent: String,
    dotcom_name: String,
    repo: Arc<StatsRepository>,
    client: Arc<dyn DnsClient>,
    rotation: AtomicUsize,
}

impl DnsBenchmarkWorker {
    pub fn new(cfg: &Config, repo: Arc<StatsRepository>, client: Arc<dyn DnsClient>) -> Self {
        Self {
            servers: cfg.dns_benchmark_servers.clone(),
            interval: cfg.dns_benchmark_interval,
            timeout: cfg.dns_timeout,
            cached_name: cfg.dns_test_domain.clone(),
            uncached_parent: cfg.dns_uncached_parent.clone(),
            dotcom_name: cfg.dns_dotcom_name.clone(),
            repo,
            client,
            rotation: AtomicUsize::new(0),
        }
    }

    fn random_subdomain(&self) -> String {
        let label: String = rand::thread_rng()
            .sample_iter(rand::distributions::Alphanumeric)
            .take(12)
            .map(|b| (b as char).to_ascii_lowercase())
            .collect();
        format!("{}.{}", label, self.uncached_parent)
    }

    async fn run_kind(
        &self,
        server: IpAddr,
        kind: DnsTestKind,
        shutdown: &ShutdownSignal,
    ) -> Result<(), MonitorError> {
        let server_label = server.to_string();
        let latency = match kind {
            DnsTestKind::Cached => {
                // Warm the server cache, then measure the second query
                let warm = shutdown
                    .guard(self.client.query(
                        Some(server),
                        &self.cached_name,
                        DnsRecordType::A,
                        self.timeout,
                    ))
                    .await
                    .ok_or(MonitorError::Cancelled)?;
                if warm.is_err() {
                    None
                } else {
                    shutdown
                        .guard(self.client.query(
                            Some(server),
                            &self.cached_name,
                            DnsRecordType::A,
                            self.timeout,
                        ))
                        .await
                        .ok_or(MonitorError::Cancelled)?
                        .ok()
                        .map(|a| a.latency_ms)
                }
            }
            DnsTestKind::Uncached => {
                // Single attempt; no retry on failure
                let name = self.random_subdomain();
                shutdown
                    .guard(self.client.query(
                        Some(server),
                        &name,
                        DnsRecordType::A,
                        self.timeout,
                    ))
                    .await
                    .ok_or(MonitorError::Cancelled)?
                    .ok()
                    .map(|a| a.latency_ms)
            }
            DnsTestKind::DotCom => shutdown
                .guard(self.client.query(
                    Some(server),
                    &self.dotcom_name,
                    DnsRecordType::A,
                    self.timeout,
                ))
                .await
                .ok_or(MonitorError::Cancelled)?
                .ok()
                .map(|a| a.latency_ms),
        };

        self.repo.record_dns_benchmark(&server_label, kind, latency);
        Ok(())
    }
}

#[async_trait]
impl Worker for DnsBenchmarkWorker {
    fn name(&self) -> &'static str {
        "dns-benchmark"
    }

    fn period(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self, shutdown: &ShutdownSignal) -> Result<(), MonitorError> {
        if self.servers.is_empty() {
            return Ok(());
        }
        let index = self.rotation.fetch_add(1, Ordering::SeqCst) % self.servers.len();
        let server = self.servers[index];

        for kind in [DnsTestKind::Cached, DnsTestKind::Uncached, DnsTestKind::DotCom] {
            self.run_kind(server, kind, shutdown).await?;
        }
        Ok(())
    }
}
