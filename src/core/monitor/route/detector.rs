/*!
Route detector: periodic traceroute plus on-demand runs during incidents.

The worker fires on a short gate period and decides internally whether a
discovery is due: either the rediscovery interval elapsed, or the ping
worker requested a probe (connection-problem escalation) and the cooldown
since the last triggered run has passed.

Traceroute always runs numeric (`-n`/`-d`); hostnames resolve afterwards in
a detached task so discovery latency never depends on reverse DNS. A
detected change commits only after `ROUTE_CHANGE_CONSECUTIVE` identical
detections, and a single timeout at a position inherits the committed
route's address there - only two or more consecutive timeouts at the same
position count as a real silence.
*/

use crate::config::Config;
use crate::core::monitor::alerts::{AlertKind, AlertSeverity, RawAlert, SmartAlertPipeline};
use crate::core::monitor::debug_logger::get_debug_logger;
use crate::core::monitor::process::{traceroute_binary, ProbeRunner};
use crate::core::monitor::repository::StatsRepository;
use crate::core::monitor::route::parsing::{parse_traceroute, route_fingerprint};
use crate::core::monitor::scheduler::{ShutdownSignal, Worker};
use crate::core::monitor::types::*;
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// On-demand probe request flag set by the ping worker during loss streaks.
pub struct RouteProbeTrigger {
    requested: AtomicBool,
}

impl RouteProbeTrigger {
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}

impl Default for RouteProbeTrigger {
    fn default() -> Self {
        Self::new()
    }
}

struct DetectorState {
    last_run: Option<Instant>,
    last_triggered_run: Option<Instant>,
    /// Consecutive silent detections per hop position
    timeout_streaks: HashMap<u8, u32>,
}

pub struct RouteDetectorWorker {
    target: IpAddr,
    max_hops: u8,
    traceroute_timeout: Duration,
    rediscover_interval: Duration,
    cooldown: Duration,
    auto_traceroute: bool,
    snapshots_dir: PathBuf,
    repo: Arc<StatsRepository>,
    runner: Arc<dyn ProbeRunner>,
    pipeline: Arc<SmartAlertPipeline>,
    trigger: Arc<RouteProbeTrigger>,
    resolver: TokioAsyncResolver,
    state: Mutex<DetectorState>,
}

impl RouteDetectorWorker {
    pub fn new(
        cfg: &Config,
        repo: Arc<StatsRepository>,
        runner: Arc<dyn ProbeRunner>,
        pipeline: Arc<SmartAlertPipeline>,
        trigger: Arc<RouteProbeTrigger>,
    ) -> Self {
        let resolver = TokioAsyncResolver::tokio(
            hickory_resolver::config::ResolverConfig::default(),
            hickory_resolver::config::ResolverOpts::default(),
        );
        Self {
            target: cfg.target,
            max_hops: cfg.traceroute_max_hops,
            traceroute_timeout: cfg.traceroute_timeout,
            rediscover_interval: cfg.hop_rediscover_interval,
            cooldown: cfg.traceroute_cooldown,
            auto_traceroute: cfg.enable_auto_traceroute,
            snapshots_dir: cfg.state_dir.join("traceroutes"),
            repo,
            runner,
            pipeline,
            trigger,
            resolver,
            state: Mutex::new(DetectorState {
                last_run: None,
                last_triggered_run: None,
                timeout_streaks: HashMap::new(),
            }),
        }
    }

    fn traceroute_argv(&self) -> Option<Vec<String>> {
        let binary = traceroute_binary()?;
        let addr = self.target.to_string();
        Some(if binary == "tracert" {
            vec![
                binary.to_string(),
                "-d".into(),
                "-h".into(),
                self.max_hops.to_string(),
                addr,
            ]
        } else {
            vec![
                binary.to_string(),
                "-n".into(),
                "-m".into(),
                self.max_hops.to_string(),
                "-q".into(),
                "2".into(),
                "-w".into(),
                "2".into(),
                addr,
            ]
        })
    }

    /// Decide whether this gate tick should actually run a traceroute.
    /// Returns whether to run and whether the run is incident-triggered.
    fn due(&self) -> (bool, bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let periodic_due = state
            .last_run
            .map(|at| at.elapsed() >= self.rediscover_interval)
            .unwrap_or(true);
        if periodic_due {
            return (true, false);
        }
        if self.auto_traceroute && self.trigger.take() {
            let cooled = state
                .last_triggered_run
                .map(|at| at.elapsed() >= self.cooldown)
                .unwrap_or(true);
            if cooled {
                state.last_triggered_run = Some(Instant::now());
                return (true, true);
            }
        }
        (false, false)
    }

    /// A position that timed out only once inherits the committed route's
    /// address; two consecutive silences count as real.
    fn smooth_timeouts(&self, mut hops: Vec<RouteHop>) -> Vec<RouteHop> {
        let committed = self.repo.current_route();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for hop in &mut hops {
            if hop.ip.is_none() {
                let streak = state.timeout_streaks.entry(hop.index).or_insert(0);
                *streak += 1;
                if *streak < 2 {
                    if let Some(prev) = committed
                        .hops
                        .iter()
                        .find(|h| h.index == hop.index)
                        .and_then(|h| h.ip)
                    {
                        hop.ip = Some(prev);
                    }
                }
            } else {
                state.timeout_streaks.remove(&hop.index);
            }
        }
        hops
    }

    fn spawn_hostname_resolution(&self, hops: Vec<RouteHop>) {
        let resolver = self.resolver.clone();
        let repo = Arc::clone(&self.repo);
        tokio::spawn(async move {
            for hop in hops {
                let Some(ip) = hop.ip else { continue };
                let lookup = tokio::time::timeout(
                    Duration::from_secs(2),
                    resolver.reverse_lookup(ip),
                )
                .await;
                if let Ok(Ok(names)) = lookup {
                    if let Some(name) = names.iter().next() {
                        let name = name.to_string();
                        let trimmed = name.trim_end_matches('.').to_string();
                        if trimmed != ip.to_string() {
                            repo.set_hop_hostname(hop.index, trimmed);
                        }
                    }
                }
            }
        });
    }

    /// Persist the raw traceroute output during connection incidents.
    fn save_snapshot(&self, stdout: &str) {
        if let Err(e) = std::fs::create_dir_all(&self.snapshots_dir) {
            get_debug_logger().warn("RouteDetector", &format!("snapshot dir: {}", e));
            return;
        }
        let name = format!("traceroute_{}.txt", utc_file_stamp(utc_now()));
        let path = self.snapshots_dir.join(name);
        if let Err(e) = std::fs::write(&path, stdout) {
            get_debug_logger().warn("RouteDetector", &format!("snapshot write: {}", e));
            return;
        }
        self.prune_snapshots();
    }

    fn prune_snapshots(&self) {
        let Ok(entries) = std::fs::read_dir(&self.snapshots_dir) else {
            return;
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("traceroute_") && n.ends_with(".txt"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        while files.len() > crate::config::defaults::TRACEROUTE_SNAPSHOTS_KEPT {
            let oldest = files.remove(0);
            let _ = std::fs::remove_file(oldest);
        }
    }
}

#[async_trait]
impl Worker for RouteDetectorWorker {
    fn name(&self) -> &'static str {
        "route-detector"
    }

    /// Short gate period; the real cadence is decided in `due`.
    fn period(&self) -> Duration {
        Duration::from_secs(15)
    }

    async fn run_once(&self, shutdown: &ShutdownSignal) -> Result<(), MonitorError> {
        let (run, incident_triggered) = self.due();
        if !run {
            return Ok(());
        }

        let Some(argv) = self.traceroute_argv() else {
            get_debug_logger().warn("RouteDetector", "no traceroute binary on PATH");
            return Ok(());
        };

        let result = self
            .runner
            .run(&argv, self.traceroute_timeout, shutdown)
            .await?;
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.last_run = Some(Instant::now());
        }
        if !result.succeeded() && result.stdout.is_empty() {
            return Err(MonitorError::SpawnError(
                "traceroute produced no output".into(),
            ));
        }

        let parsed = parse_traceroute(&result.stdout);
        if parsed.is_empty() {
            return Err(MonitorError::ParseError("no hops in traceroute output".into()));
        }

        if incident_triggered {
            self.save_snapshot(&result.stdout);
        }

        let hops = self.smooth_timeouts(parsed);
        let fingerprint = route_fingerprint(&hops);
        let (committed, run_count) = self.repo.update_route_hysteresis(&fingerprint);

        let first_discovery = self.repo.current_route().fingerprint.is_empty();
        if committed {
            get_debug_logger().info(
                "RouteDetector",
                &format!(
                    "route {} after {} identical detections ({} hops)",
                    if first_discovery { "discovered" } else { "changed" },
                    run_count,
                    hops.len()
                ),
            );
            self.repo.install_route(hops.clone(), fingerprint);
            self.spawn_hostname_resolution(hops);
            if !first_discovery {
                self.pipeline.raise_event(RawAlert {
                    kind: AlertKind::RouteChanged,
                    severity: AlertSeverity::Info,
                    subject: self.target.to_string(),
                    message: format!("network path to {} changed", self.target),
                });
            }
        }
        Ok(())
    }
}
