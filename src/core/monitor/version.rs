/*!
Version poller: checks the release endpoint on a long period.

Each tick makes up to three attempts with exponential backoff (0.5s
initial). Tags are parsed as semver with prerelease suffixes like `-rc1`
tolerated; an available update is only ever surfaced through the
repository, never as its own alert or output channel.
*/

use crate::config::Config;
use crate::core::monitor::debug_logger::get_debug_logger;
use crate::core::monitor::repository::StatsRepository;
use crate::core::monitor::scheduler::{ShutdownSignal, Worker};
use crate::core::monitor::types::MonitorError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const RELEASES_URL: &str = "https://api.github.com/repos/netpulse/netpulse/releases/latest";

/// Blocking fetch of the latest published version string.
pub trait VersionSource: Send + Sync {
    fn fetch_latest(&self) -> Result<String, MonitorError>;
}

pub struct GithubReleaseSource {
    url: String,
    timeout: Duration,
}

impl GithubReleaseSource {
    pub fn new(timeout: Duration) -> Self {
        Self {
            url: RELEASES_URL.to_string(),
            timeout,
        }
    }
}

impl VersionSource for GithubReleaseSource {
    fn fetch_latest(&self) -> Result<String, MonitorError> {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build();
        let agent: ureq::Agent = config.into();
        let mut response = agent
            .get(&self.url)
            .header(
                "User-Agent",
                concat!("netpulse/", env!("CARGO_PKG_VERSION")),
            )
            .call()
            .map_err(|e| MonitorError::HttpError(e.to_string()))?;
        let body: serde_json::Value = response
            .body_mut()
            .read_json()
            .map_err(|e| MonitorError::ParseError(e.to_string()))?;
        body.get("tag_name")
            .and_then(|v| v.as_str())
            .map(|tag| tag.trim_start_matches('v').to_string())
            .ok_or_else(|| MonitorError::ParseError("release has no tag_name".into()))
    }
}

pub struct VersionWorker {
    interval: Duration,
    retry_attempts: u32,
    retry_initial: Duration,
    current: semver::Version,
    repo: Arc<StatsRepository>,
    source: Arc<dyn VersionSource>,
}

impl VersionWorker {
    pub fn new(cfg: &Config, repo: Arc<StatsRepository>, source: Arc<dyn VersionSource>) -> Self {
        use crate::config::defaults as d;
        Self {
            interval: cfg.version_check_interval,
            retry_attempts: d::VERSION_RETRY_ATTEMPTS,
            retry_initial: Duration::from_millis(d::VERSION_RETRY_INITIAL_MS),
            current: semver::Version::parse(env!("CARGO_PKG_VERSION"))
                .unwrap_or_else(|_| semver::Version::new(0, 0, 0)),
            repo,
            source,
        }
    }

    /// Is `tag` a newer release than the running binary? Suffixed tags
    /// (`1.3.0-rc2`) parse fine and compare per semver prerelease rules.
    pub fn is_newer(&self, tag: &str) -> Option<bool> {
        let latest = semver::Version::parse(tag.trim()).ok()?;
        Some(latest > self.current)
    }

    async fn fetch_with_backoff(
        &self,
        shutdown: &ShutdownSignal,
    ) -> Result<String, MonitorError> {
        let mut delay = self.retry_initial;
        let mut last_error = MonitorError::HttpError("no attempt made".into());
        for attempt in 0..self.retry_attempts {
            if attempt > 0 {
                if shutdown.guard(tokio::time::sleep(delay)).await.is_none() {
                    return Err(MonitorError::Cancelled);
                }
                delay *= 2;
            }
            let source = Arc::clone(&self.source);
            let outcome = shutdown
                .guard(tokio::task::spawn_blocking(move || source.fetch_latest()))
                .await;
            match outcome {
                None => return Err(MonitorError::Cancelled),
                Some(Ok(Ok(tag))) => return Ok(tag),
                Some(Ok(Err(e))) => last_error = e,
                Some(Err(join_err)) => {
                    last_error = MonitorError::HttpError(join_err.to_string())
                }
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl Worker for VersionWorker {
    fn name(&self) -> &'static str {
        "version"
    }

    fn period(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self, shutdown: &ShutdownSignal) -> Result<(), MonitorError> {
        let tag = self.fetch_with_backoff(shutdown).await?;
        match self.is_newer(&tag) {
            Some(true) => {
                get_debug_logger().info("VersionWorker", &format!("update available: {}", tag));
                self.repo.set_update_available(Some(tag));
            }
            Some(false) => self.repo.set_update_available(None),
            None => {
                get_debug_logger().debug("VersionWorker", &format!("unparsable tag {:?}", tag));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monitor::repository::RepositoryLimits;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::watch;

    struct FlakySource {
        calls: AtomicU32,
        fail_first: u32,
        tag: String,
    }

    impl VersionSource for FlakySource {
        fn fetch_latest(&self) -> Result<String, MonitorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(MonitorError::HttpError("503".into()))
            } else {
                Ok(self.tag.clone())
            }
        }
    }

    fn worker_with(source: Arc<FlakySource>) -> (VersionWorker, Arc<StatsRepository>) {
        let repo = Arc::new(StatsRepository::new(
            "1.1.1.1".into(),
            RepositoryLimits::default(),
        ));
        let mut worker = VersionWorker::new(&Config::default(), Arc::clone(&repo), source);
        worker.retry_initial = Duration::from_millis(1);
        (worker, repo)
    }

    fn signal() -> ShutdownSignal {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        ShutdownSignal::from_receiver(rx)
    }

    #[tokio::test]
    async fn retries_then_surfaces_update() {
        let source = Arc::new(FlakySource {
            calls: AtomicU32::new(0),
            fail_first: 2,
            tag: "99.0.0".into(),
        });
        let (worker, repo) = worker_with(Arc::clone(&source));
        worker.run_once(&signal()).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(repo.snapshot().update_available.as_deref(), Some("99.0.0"));
    }

    #[tokio::test]
    async fn exhausted_retries_fail_transiently() {
        let source = Arc::new(FlakySource {
            calls: AtomicU32::new(0),
            fail_first: 10,
            tag: "99.0.0".into(),
        });
        let (worker, repo) = worker_with(Arc::clone(&source));
        assert!(worker.run_once(&signal()).await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert!(repo.snapshot().update_available.is_none());
    }

    #[test]
    fn version_comparison_tolerates_suffixes() {
        let repo = Arc::new(StatsRepository::new(
            "t".into(),
            RepositoryLimits::default(),
        ));
        let worker = VersionWorker::new(
            &Config::default(),
            repo,
            Arc::new(FlakySource {
                calls: AtomicU32::new(0),
                fail_first: 0,
                tag: String::new(),
            }),
        );
        assert_eq!(worker.is_newer("99.0.0"), Some(true));
        assert_eq!(worker.is_newer("99.0.0-rc1"), Some(true));
        assert_eq!(worker.is_newer("0.0.1"), Some(false));
        assert_eq!(worker.is_newer("not-a-version"), None);
    }
}
