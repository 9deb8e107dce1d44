/*!
Public-IP worker: provider rotation with structural validation.

Providers are plain-text "what is my IP" endpoints tried round-robin. A
response only counts when it parses as a globally routable address; a
provider returning an HTML error page or a private address is a transient
failure and the next provider is tried, never an IP-changed signal. A
genuine change raises an informational alert through the pipeline and
refreshes geo attribution.
*/

use crate::config::Config;
use crate::core::monitor::alerts::{AlertKind, AlertSeverity, RawAlert, SmartAlertPipeline};
use crate::core::monitor::debug_logger::get_debug_logger;
use crate::core::monitor::http::HttpFetcher;
use crate::core::monitor::repository::StatsRepository;
use crate::core::monitor::route::geo::GeoClient;
use crate::core::monitor::scheduler::{ShutdownSignal, Worker};
use crate::core::monitor::types::{validate_public_ip, MonitorError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct PublicIpWorker {
    providers: Vec<String>,
    check_interval: Duration,
    http_timeout: Duration,
    repo: Arc<StatsRepository>,
    fetcher: Arc<dyn HttpFetcher>,
    geo: Arc<GeoClient>,
    pipeline: Arc<SmartAlertPipeline>,
    rotation: AtomicUsize,
}

impl PublicIpWorker {
    pub fn new(
        cfg: &Config,
        repo: Arc<StatsRepository>,
        fetcher: Arc<dyn HttpFetcher>,
        geo: Arc<GeoClient>,
        pipeline: Arc<SmartAlertPipeline>,
    ) -> Self {
        Self {
            providers: cfg.ip_providers.clone(),
            check_interval: cfg.ip_check_interval,
            http_timeout: cfg.ip_http_timeout,
            repo,
            fetcher,
            geo,
            pipeline,
            rotation: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Worker for PublicIpWorker {
    fn name(&self) -> &'static str {
        "public-ip"
    }

    fn period(&self) -> Duration {
        self.check_interval
    }

    async fn run_once(&self, shutdown: &ShutdownSignal) -> Result<(), MonitorError> {
        if self.providers.is_empty() {
            return Ok(());
        }
        let start = self.rotation.fetch_add(1, Ordering::SeqCst);

        for offset in 0..self.providers.len() {
            let provider = &self.providers[(start + offset) % self.providers.len()];
            let Some(outcome) = shutdown
                .guard(self.fetcher.get_text(provider, self.http_timeout))
                .await
            else {
                return Err(MonitorError::Cancelled);
            };

            let body = match outcome {
                Ok(body) => body,
                Err(e) => {
                    get_debug_logger()
                        .debug("PublicIpWorker", &format!("{} failed: {}", provider, e));
                    continue;
                }
            };

            let Some(ip) = validate_public_ip(&body) else {
                // Garbage response: drop it, try the next provider, and
                // leave the stored address untouched.
                get_debug_logger().debug(
                    "PublicIpWorker",
                    &format!("{} returned an invalid address", provider),
                );
                continue;
            };

            let had_previous = self.repo.snapshot().public_ip.ip.is_some();
            let changed = self.repo.set_public_ip(ip.to_string(), provider.clone());
            if changed && had_previous {
                self.pipeline.raise_event(RawAlert {
                    kind: AlertKind::IpChanged,
                    severity: AlertSeverity::Info,
                    subject: "public-ip".into(),
                    message: format!("public IP changed to {}", ip),
                });
            }
            if changed {
                if let Some(info) = self.geo.lookup(ip).await {
                    self.repo.set_public_ip_geo(info.country, info.asn, info.city);
                }
            }
            return Ok(());
        }

        Err(MonitorError::HttpError(
            "all public-IP providers failed".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monitor::alerts::PipelineConfig;
    use crate::core::monitor::repository::RepositoryLimits;
    use crate::core::monitor::route::geo::{GeoInfo, GeoProvider};
    use std::collections::HashMap;
    use std::net::IpAddr;
    use std::sync::Mutex;
    use tokio::sync::watch;

    struct CannedFetcher {
        responses: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl HttpFetcher for CannedFetcher {
        async fn get_text(&self, url: &str, _timeout: Duration) -> Result<String, MonitorError> {
            self.responses
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| MonitorError::HttpError("unreachable".into()))
        }
    }

    struct NoGeo;

    #[async_trait]
    impl GeoProvider for NoGeo {
        async fn fetch(&self, _ip: IpAddr) -> Result<GeoInfo, MonitorError> {
            Err(MonitorError::HttpError("none".into()))
        }
    }

    fn build(responses: HashMap<String, String>) -> (PublicIpWorker, Arc<StatsRepository>) {
        let repo = Arc::new(StatsRepository::new(
            "1.1.1.1".into(),
            RepositoryLimits::default(),
        ));
        let cfg = Config::default();
        let pipeline = Arc::new(SmartAlertPipeline::new(
            PipelineConfig::from_config(&cfg),
            Arc::clone(&repo),
        ));
        let worker = PublicIpWorker::new(
            &cfg,
            Arc::clone(&repo),
            Arc::new(CannedFetcher {
                responses: Mutex::new(responses),
            }),
            Arc::new(GeoClient::new(Arc::new(NoGeo), 40, Duration::from_secs(3600))),
            pipeline,
        );
        (worker, repo)
    }

    fn signal() -> ShutdownSignal {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        ShutdownSignal::from_receiver(rx)
    }

    #[tokio::test]
    async fn malformed_provider_response_falls_through() {
        let mut responses = HashMap::new();
        responses.insert(
            "https://api.ipify.org".to_string(),
            "<html>rate limited</html>".to_string(),
        );
        responses.insert(
            "https://ifconfig.me/ip".to_string(),
            "203.0.113.77\n".to_string(),
        );
        let (worker, repo) = build(responses);
        worker.run_once(&signal()).await.unwrap();

        let ip = repo.snapshot().public_ip;
        assert_eq!(ip.ip.as_deref(), Some("203.0.113.77"));
        // No IP-changed alert from garbage or from the first acquisition
        assert!(repo.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn private_address_is_rejected() {
        let mut responses = HashMap::new();
        responses.insert(
            "https://api.ipify.org".to_string(),
            "192.168.0.20".to_string(),
        );
        let (worker, repo) = build(responses);
        // Only one provider has a canned response; rejection of it plus
        // unreachable others means the tick fails transiently.
        assert!(worker.run_once(&signal()).await.is_err());
        assert!(repo.snapshot().public_ip.ip.is_none());
    }
}
