/*!
DNS monitor: resolves the configured test domain for every watched record
type and keeps the latest per-type status in the repository.

Queries run through the resolver's worker pool and never block the
scheduler; one slow record type cannot starve the others because each
query carries its own timeout.
*/

use crate::config::Config;
use crate::core::monitor::dns::client::DnsClient;
use crate::core::monitor::repository::StatsRepository;
use crate::core::monitor::scheduler::{ShutdownSignal, Worker};
use crate::core::monitor::types::{utc_now, DnsRecordStatus, DnsRecordType, MonitorError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub struct DnsMonitorWorker {
    domain: String,
    record_types: Vec<DnsRecordType>,
    check_interval: Duration,
    timeout: Duration,
    repo: Arc<StatsRepository>,
    client: Arc<dyn DnsClient>,
}

impl DnsMonitorWorker {
    pub fn new(cfg: &Config, repo: Arc<StatsRepository>, client: Arc<dyn DnsClient>) -> Self {
        Self {
            domain: cfg.dns_test_domain.clone(),
            record_types: cfg.dns_record_types.clone(),
            check_interval: cfg.dns_check_interval,
            timeout: cfg.dns_timeout,
            repo,
            client,
        }
    }
}

#[async_trait]
impl Worker for DnsMonitorWorker {
    fn name(&self) -> &'static str {
        "dns-monitor"
    }

    fn period(&self) -> Duration {
        self.check_interval
    }

    async fn run_once(&self, shutdown: &ShutdownSignal) -> Result<(), MonitorError> {
        for record_type in &self.record_types {
            let Some(outcome) = shutdown
                .guard(self.client.query(None, &self.domain, *record_type, self.timeout))
                .await
            else {
                return Err(MonitorError::Cancelled);
            };

            let status = match outcome {
                // NXDOMAIN means the type has no records at this domain;
                // resolution itself worked, so it is not a failure.
                Ok(answer) => DnsRecordStatus {
                    record_type: *record_type,
                    server: "system".into(),
                    ok: true,
                    latency_ms: Some(answer.latency_ms),
                    record_count: answer.records,
                    error: None,
                    checked_at: utc_now(),
                },
                Err(message) => DnsRecordStatus {
                    record_type: *record_type,
                    server: "system".into(),
                    ok: false,
                    latency_ms: None,
                    record_count: 0,
                    error: Some(message),
                    checked_at: utc_now(),
                },
            };
            self.repo.record_dns_record_status(status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monitor::dns::client::DnsAnswer;
    use crate::core::monitor::repository::RepositoryLimits;
    use std::net::IpAddr;
    use tokio::sync::watch;

    struct ScriptedClient;

    #[async_trait]
    impl DnsClient for ScriptedClient {
        async fn query(
            &self,
            _server: Option<IpAddr>,
            _name: &str,
            record_type: DnsRecordType,
            _timeout: Duration,
        ) -> Result<DnsAnswer, String> {
            match record_type {
                DnsRecordType::A => Ok(DnsAnswer {
                    records: 2,
                    nxdomain: false,
                    latency_ms: 12.0,
                }),
                DnsRecordType::Mx => Err("connection refused".to_string()),
                _ => Ok(DnsAnswer {
                    records: 0,
                    nxdomain: true,
                    latency_ms: 9.0,
                }),
            }
        }
    }

    #[tokio::test]
    async fn records_status_per_type() {
        let repo = Arc::new(StatsRepository::new(
            "1.1.1.1".into(),
            RepositoryLimits::default(),
        ));
        let mut cfg = Config::default();
        cfg.dns_record_types = vec![DnsRecordType::A, DnsRecordType::Mx, DnsRecordType::Aaaa];
        let worker = DnsMonitorWorker::new(&cfg, Arc::clone(&repo), Arc::new(ScriptedClient));

        let (_tx, rx) = watch::channel(false);
        worker
            .run_once(&ShutdownSignal::from_receiver(rx))
            .await
            .unwrap();

        let snap = repo.snapshot();
        assert_eq!(snap.dns_records.len(), 3);
        let a = snap
            .dns_records
            .iter()
            .find(|r| r.record_type == DnsRecordType::A)
            .unwrap();
        assert!(a.ok);
        assert_eq!(a.record_count, 2);
        let mx = snap
            .dns_records
            .iter()
            .find(|r| r.record_type == DnsRecordType::Mx)
            .unwrap();
        assert!(!mx.ok);
        assert_eq!(mx.error.as_deref(), Some("connection refused"));
    }
}
