/*!
Ping worker: one system `ping` per tick against the fixed target.

Command construction is OS-specific (count 1, per-probe wait bounded by the
tick interval, numeric output so no DNS stalls the probe). Parsing policy:
a non-zero exit code is a failure even when latency-looking numbers appear
in the output; some platforms print `time=0ms` lines on timeout.

Every `TTL_INTERVAL` pings the reply TTL is parsed from the same output and
committed to the TTL state. Connection-state transitions trigger an
immediate classifier re-evaluation so the diagnosis never lags a visible
outage, plus a route-probe request once losses reach the traceroute
trigger threshold.
*/

use crate::config::Config;
use crate::core::monitor::classifier::ProblemClassifier;
use crate::core::monitor::debug_logger::get_debug_logger;
use crate::core::monitor::process::{ProbeRunner, SpawnKind};
use crate::core::monitor::repository::StatsRepository;
use crate::core::monitor::route::detector::RouteProbeTrigger;
use crate::core::monitor::scheduler::{ShutdownSignal, Worker};
use crate::core::monitor::types::*;
use async_trait::async_trait;
use regex::Regex;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Build the per-platform ping argv for a single probe.
pub fn ping_argv(target: IpAddr, timeout: Duration) -> Vec<String> {
    let addr = target.to_string();
    if cfg!(windows) {
        let ms = timeout.as_millis().max(100).to_string();
        let fam = if target.is_ipv6() { "-6" } else { "-4" };
        vec![
            "ping".into(),
            fam.into(),
            "-n".into(),
            "1".into(),
            "-w".into(),
            ms,
            addr,
        ]
    } else if cfg!(target_os = "macos") {
        let binary = if target.is_ipv6() { "ping6" } else { "ping" };
        let mut argv = vec![binary.to_string(), "-n".into(), "-c".into(), "1".into()];
        if !target.is_ipv6() {
            // -W takes milliseconds on macOS ping
            argv.push("-W".into());
            argv.push(timeout.as_millis().max(100).to_string());
        }
        argv.push(addr);
        argv
    } else {
        let secs = timeout.as_secs().max(1).to_string();
        let mut argv = vec!["ping".to_string()];
        if target.is_ipv6() {
            argv.push("-6".into());
        }
        argv.extend(["-n".into(), "-c".into(), "1".into(), "-W".into(), secs, addr]);
        argv
    }
}

/// Build the don't-fragment probe argv used by the MTU worker.
pub fn ping_df_argv(target: IpAddr, payload_size: u32, timeout: Duration) -> Vec<String> {
    let addr = target.to_string();
    if cfg!(windows) {
        let ms = timeout.as_millis().max(100).to_string();
        vec![
            "ping".into(),
            "-n".into(),
            "1".into(),
            "-w".into(),
            ms,
            "-f".into(),
            "-l".into(),
            payload_size.to_string(),
            addr,
        ]
    } else if cfg!(target_os = "macos") {
        vec![
            "ping".into(),
            "-n".into(),
            "-c".into(),
            "1".into(),
            "-D".into(),
            "-s".into(),
            payload_size.to_string(),
            addr,
        ]
    } else {
        let secs = timeout.as_secs().max(1).to_string();
        vec![
            "ping".into(),
            "-n".into(),
            "-c".into(),
            "1".into(),
            "-W".into(),
            secs,
            "-M".into(),
            "do".into(),
            "-s".into(),
            payload_size.to_string(),
            addr,
        ]
    }
}

/// Parsed fields from one ping invocation's stdout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingReply {
    pub rtt_ms: f64,
    pub ttl: Option<u8>,
}

pub struct PingOutputParser {
    rtt_re: Regex,
    ttl_re: Regex,
}

impl PingOutputParser {
    pub fn new() -> Self {
        Self {
            // `time=12.3 ms` (unix), `time=12ms` / `time<1ms` (windows)
            rtt_re: Regex::new(r"(?i)time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").expect("static regex"),
            ttl_re: Regex::new(r"(?i)ttl[=:]\s*([0-9]{1,3})").expect("static regex"),
        }
    }

    pub fn parse(&self, stdout: &str) -> Option<PingReply> {
        let rtt_ms: f64 = self
            .rtt_re
            .captures(stdout)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())?;
        let ttl = self
            .ttl_re
            .captures(stdout)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
        Some(PingReply { rtt_ms, ttl })
    }
}

impl Default for PingOutputParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Which backend executes echo probes.
pub enum PingBackend {
    /// The system ping binary via the process supervisor
    System,
    /// Raw-socket ICMP; needs privileges, enabled only by explicit flag
    #[cfg(feature = "raw-ping")]
    RawSocket,
}

pub struct PingWorker {
    target: IpAddr,
    interval: Duration,
    ttl_interval: u64,
    traceroute_trigger_losses: u32,
    repo: Arc<StatsRepository>,
    runner: Arc<dyn ProbeRunner>,
    classifier: Arc<ProblemClassifier>,
    route_trigger: Arc<RouteProbeTrigger>,
    parser: PingOutputParser,
    backend: PingBackend,
    ticks: AtomicU64,
}

impl PingWorker {
    pub fn new(
        cfg: &Config,
        repo: Arc<StatsRepository>,
        runner: Arc<dyn ProbeRunner>,
        classifier: Arc<ProblemClassifier>,
        route_trigger: Arc<RouteProbeTrigger>,
        backend: PingBackend,
    ) -> Self {
        Self {
            target: cfg.target,
            interval: cfg.interval,
            ttl_interval: cfg.ttl_interval.max(1),
            traceroute_trigger_losses: cfg.traceroute_trigger_losses,
            repo,
            runner,
            classifier,
            route_trigger,
            parser: PingOutputParser::new(),
            backend,
            ticks: AtomicU64::new(0),
        }
    }

    async fn probe_once(&self, shutdown: &ShutdownSignal) -> Result<ProbeVerdict, MonitorError> {
        match self.backend {
            PingBackend::System => {
                let argv = ping_argv(self.target, self.interval);
                let result = self.runner.run(&argv, self.interval, shutdown).await?;
                Ok(match result.kind {
                    SpawnKind::Ok if result.exit_code == Some(0) => {
                        match self.parser.parse(&result.stdout) {
                            Some(reply) => ProbeVerdict::Reply(reply),
                            None => {
                                get_debug_logger().debug(
                                    "PingWorker",
                                    "exit 0 but no rtt in output; counting as parse failure",
                                );
                                ProbeVerdict::Failed(FailureKind::ParseError)
                            }
                        }
                    }
                    // Non-zero exit wins over any latency text in stdout
                    SpawnKind::Ok => ProbeVerdict::Failed(FailureKind::TransientIo),
                    SpawnKind::Timeout => ProbeVerdict::Failed(FailureKind::TransientIo),
                    SpawnKind::Killed => ProbeVerdict::Failed(FailureKind::Cancelled),
                    SpawnKind::SpawnError => ProbeVerdict::Failed(FailureKind::TransientIo),
                })
            }
            #[cfg(feature = "raw-ping")]
            PingBackend::RawSocket => {
                let payload = [0u8; 16];
                let fut = surge_ping::ping(self.target, &payload);
                match shutdown.guard(tokio::time::timeout(self.interval, fut)).await {
                    None => Err(MonitorError::Cancelled),
                    Some(Err(_elapsed)) => Ok(ProbeVerdict::Failed(FailureKind::TransientIo)),
                    Some(Ok(Ok((_packet, rtt)))) => Ok(ProbeVerdict::Reply(PingReply {
                        rtt_ms: rtt.as_secs_f64() * 1000.0,
                        ttl: None,
                    })),
                    Some(Ok(Err(_))) => Ok(ProbeVerdict::Failed(FailureKind::TransientIo)),
                }
            }
        }
    }
}

enum ProbeVerdict {
    Reply(PingReply),
    Failed(FailureKind),
}

#[async_trait]
impl Worker for PingWorker {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn period(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self, shutdown: &ShutdownSignal) -> Result<(), MonitorError> {
        let sent_at = utc_now();
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;

        let verdict = match self.probe_once(shutdown).await {
            Ok(v) => v,
            Err(MonitorError::Cancelled) => {
                // Shutdown mid-probe: record the fact, never an ok sample
                self.repo
                    .record_ping_result(Sample::failed(sent_at, FailureKind::Cancelled));
                return Err(MonitorError::Cancelled);
            }
            Err(e) => {
                self.repo
                    .record_ping_result(Sample::failed(sent_at, e.failure_kind()));
                return Err(e);
            }
        };

        let transition = match verdict {
            ProbeVerdict::Reply(reply) => {
                let t = self
                    .repo
                    .record_ping_result(Sample::ok(sent_at, reply.rtt_ms));
                if tick % self.ttl_interval == 0 {
                    if let Some(ttl) = reply.ttl {
                        self.repo.record_ttl(ttl);
                    }
                }
                t
            }
            ProbeVerdict::Failed(kind) => self.repo.record_ping_result(Sample::failed(sent_at, kind)),
        };

        if tick == 1 {
            self.repo.note_first_tick();
        }

        match transition {
            ConnectionTransition::None => {}
            ConnectionTransition::Lost | ConnectionTransition::Recovered => {
                get_debug_logger().info(
                    "PingWorker",
                    &format!(
                        "connection {} (consecutive losses {})",
                        if transition == ConnectionTransition::Lost {
                            "lost"
                        } else {
                            "recovered"
                        },
                        self.repo.consecutive_lost()
                    ),
                );
                // Synchronous re-evaluation closes the stale-diagnosis window
                self.classifier.evaluate_now();
            }
        }

        if self.repo.consecutive_lost() >= self.traceroute_trigger_losses {
            self.route_trigger.request();
        }

        Ok(())
    }
}
