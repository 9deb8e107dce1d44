/*!
The monitoring engine: repository, orchestrator and workers wired together.

`MonitorEngine` owns the full lifecycle:

1. Build the repository, process supervisor, classifier and alert pipeline
2. Register every enabled worker with the orchestrator (each gets its own
   scheduling loop and the shared shutdown signal)
3. Run until the shutdown future resolves (ctrl-c in production)
4. Wind down: signal cancellation, await in-flight work up to the grace
   bound, sweep orphaned subprocesses, flush state

The strict single-writer rule from the repository applies to the whole
engine: workers talk to the repository and to nothing else; derived
components (classifier, pipeline) read snapshots and write their results
back through typed methods.
*/

pub mod alerts;
pub mod classifier;
pub mod debug_logger;
pub mod dns;
pub mod http;
pub mod instance;
pub mod mtu;
pub mod ping;
pub mod process;
pub mod public_ip;
pub mod repository;
pub mod route;
pub mod scheduler;
pub mod surfaces;
pub mod types;
pub mod version;

// Re-export commonly used items
pub use instance::InstanceLock;
pub use repository::{RepositoryLimits, StatsRepository, StatsSnapshot};
pub use scheduler::{ShutdownSignal, TaskOrchestrator, Worker};
pub use surfaces::{metric_samples, render_text, HealthView, MetricSample};
pub use types::*;

use crate::config::Config;
use crate::core::monitor::alerts::{PipelineConfig, SmartAlertPipeline};
use crate::core::monitor::classifier::{ClassifierWorker, ProblemClassifier};
use crate::core::monitor::debug_logger::get_debug_logger;
use crate::core::monitor::dns::{DnsBenchmarkWorker, DnsMonitorWorker, HickoryDnsClient};
use crate::core::monitor::http::IsahcFetcher;
use crate::core::monitor::mtu::MtuWorker;
use crate::core::monitor::ping::{PingBackend, PingWorker};
use crate::core::monitor::process::{ping_binary_available, ProcessSupervisor};
use crate::core::monitor::public_ip::PublicIpWorker;
use crate::core::monitor::route::{
    GeoClient, HopProberWorker, IpApiGeoProvider, RouteDetectorWorker, RouteProbeTrigger,
};
use crate::core::monitor::version::{GithubReleaseSource, VersionWorker};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Drives the smart-alert pipeline on its evaluation cadence.
struct PipelineWorker {
    pipeline: Arc<SmartAlertPipeline>,
    period: Duration,
}

#[async_trait]
impl Worker for PipelineWorker {
    fn name(&self) -> &'static str {
        "alert-pipeline"
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn run_once(&self, _shutdown: &ShutdownSignal) -> Result<(), MonitorError> {
        self.pipeline.tick(utc_now());
        Ok(())
    }
}

pub struct MonitorEngine {
    config: Config,
    repo: Arc<StatsRepository>,
    supervisor: Arc<ProcessSupervisor>,
    orchestrator: TaskOrchestrator,
    pipeline: Arc<SmartAlertPipeline>,
}

impl MonitorEngine {
    /// Build the engine and register all enabled workers. Fails only on
    /// genuinely unrunnable setups (no ping backend, no HTTP client).
    pub fn new(config: Config) -> Result<Self, MonitorError> {
        let logger = get_debug_logger();
        let repo = Arc::new(StatsRepository::new(
            config.target.to_string(),
            RepositoryLimits::from_config(&config),
        ));
        let supervisor = Arc::new(ProcessSupervisor::new());
        let classifier = Arc::new(ProblemClassifier::new(&config, Arc::clone(&repo)));
        let pipeline = Arc::new(SmartAlertPipeline::new(
            PipelineConfig::from_config(&config),
            Arc::clone(&repo),
        ));

        let backend = if ping_binary_available() {
            PingBackend::System
        } else if config.enable_raw_ping_fallback {
            #[cfg(feature = "raw-ping")]
            {
                logger.warn("Engine", "no ping binary; using raw-socket fallback");
                PingBackend::RawSocket
            }
            #[cfg(not(feature = "raw-ping"))]
            {
                return Err(MonitorError::SpawnError(
                    "no ping binary and the raw-ping feature is not compiled in".into(),
                ));
            }
        } else {
            return Err(MonitorError::SpawnError(
                "no ping binary on PATH (set ENABLE_RAW_PING_FALLBACK with the raw-ping build to use raw sockets)"
                    .into(),
            ));
        };

        let fetcher: Arc<dyn http::HttpFetcher> = Arc::new(IsahcFetcher::new()?);
        let geo = Arc::new(GeoClient::new(
            Arc::new(IpApiGeoProvider::new(fetcher.clone(), config.ip_http_timeout)),
            crate::config::defaults::GEO_RATE_LIMIT_PER_MIN,
            Duration::from_secs(crate::config::defaults::GEO_CACHE_TTL_SECS),
        ));
        let trigger = Arc::new(RouteProbeTrigger::new());
        let dns_client = Arc::new(HickoryDnsClient);

        let mut orchestrator = TaskOrchestrator::new();

        orchestrator.register(Arc::new(PingWorker::new(
            &config,
            Arc::clone(&repo),
            supervisor.clone(),
            Arc::clone(&classifier),
            Arc::clone(&trigger),
            backend,
        )));
        orchestrator.register(Arc::new(ClassifierWorker::new(Arc::clone(&classifier))));
        orchestrator.register(Arc::new(PipelineWorker {
            pipeline: Arc::clone(&pipeline),
            period: config.problem_analysis_interval,
        }));
        orchestrator.register(Arc::new(PublicIpWorker::new(
            &config,
            Arc::clone(&repo),
            fetcher.clone(),
            Arc::clone(&geo),
            Arc::clone(&pipeline),
        )));
        orchestrator.register(Arc::new(VersionWorker::new(
            &config,
            Arc::clone(&repo),
            Arc::new(GithubReleaseSource::new(Duration::from_secs(
                crate::config::defaults::VERSION_HTTP_TIMEOUT_SECS,
            ))),
        )));

        if config.enable_dns_monitoring {
            orchestrator.register(Arc::new(DnsMonitorWorker::new(
                &config,
                Arc::clone(&repo),
                dns_client.clone(),
            )));
        }
        if config.enable_dns_benchmark {
            orchestrator.register(Arc::new(DnsBenchmarkWorker::new(
                &config,
                Arc::clone(&repo),
                dns_client,
            )));
        }
        if config.enable_mtu_monitoring {
            orchestrator.register(Arc::new(MtuWorker::new(
                &config,
                Arc::clone(&repo),
                supervisor.clone(),
            )));
        }
        if config.enable_hop_monitoring || config.enable_auto_traceroute {
            orchestrator.register(Arc::new(RouteDetectorWorker::new(
                &config,
                Arc::clone(&repo),
                supervisor.clone(),
                Arc::clone(&pipeline),
                Arc::clone(&trigger),
            )));
        }
        if config.enable_hop_monitoring {
            orchestrator.register(Arc::new(HopProberWorker::new(
                &config,
                Arc::clone(&repo),
                supervisor.clone(),
                geo,
            )));
        }

        logger.info("Engine", "monitoring engine constructed");
        Ok(Self {
            config,
            repo,
            supervisor,
            orchestrator,
            pipeline,
        })
    }

    pub fn repository(&self) -> Arc<StatsRepository> {
        Arc::clone(&self.repo)
    }

    pub fn pipeline(&self) -> Arc<SmartAlertPipeline> {
        Arc::clone(&self.pipeline)
    }

    pub fn health_view(&self) -> HealthView {
        HealthView::new(self.config.interval)
    }

    /// Run until `shutdown` resolves, then wind everything down within the
    /// grace bound.
    pub async fn run_until(
        &mut self,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<(), MonitorError> {
        shutdown.await;
        self.shutdown().await;
        Ok(())
    }

    /// Cooperative wind-down: cancel workers, sweep subprocess orphans.
    pub async fn shutdown(&mut self) {
        let grace = Duration::from_secs(crate::config::defaults::SHUTDOWN_GRACE_SECS);
        let clean = self.orchestrator.shutdown(grace).await;
        if !clean {
            get_debug_logger().warn("Engine", "workers exceeded shutdown grace; aborted");
        }
        self.supervisor.kill_orphans();
        get_debug_logger().info("Engine", "engine stopped");
    }
}
