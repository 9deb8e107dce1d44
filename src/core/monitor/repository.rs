/*!
Stats repository - the single authoritative writer for all monitoring state.

Every worker commits deltas through typed methods here; every reader gets an
immutable [`StatsSnapshot`]. No caller ever sees a lock or a live reference
into the internals.

## Locking

Two locks, never nested:

- `inner` guards all numeric state (counters, windows, route, DNS, MTU,
  diagnosis). Critical sections are short: probes run outside, results are
  committed in a second acquisition.
- `alerts` guards the alert sub-state (entities, groups, history, fatigue),
  which the smart-alert pipeline mutates at its own cadence.

## Failure mode

Mutators are infallible. Out-of-range input is clamped and the anomaly is
logged as invariant-violated; the process never crashes on bad state.
*/

use crate::core::monitor::alerts::types::{AlertBook, AlertEntity, AlertKind, AlertSeverity};
use crate::core::monitor::debug_logger::get_debug_logger;
use crate::core::monitor::types::*;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Everything a reader can observe, deep-copied at one instant.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StatsSnapshot {
    pub target: String,
    pub taken_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,

    pub counters: Counters,
    pub latency_window_ms: Vec<f64>,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub jitter_ema_ms: f64,
    pub loss_pct_30m: f64,
    pub connection_lost: bool,
    pub link_status: LinkStatus,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub first_tick_done: bool,

    pub public_ip: PublicIpInfo,
    pub mtu: MtuState,
    pub ttl: TtlState,

    pub route: Route,
    pub hops: Vec<HopStatus>,
    pub route_stats: RouteStats,

    pub dns_records: Vec<DnsRecordStatus>,
    pub dns_benchmarks: Vec<(String, DnsTestKind, DnsBenchmarkStats)>,

    pub diagnosis: ProblemDiagnosis,
    pub update_available: Option<String>,

    pub active_alerts: Vec<AlertEntity>,
    pub alert_history_len: usize,
}

impl StatsSnapshot {
    /// Route/MTU/hop readings older than this are masked by the UI during
    /// outages to prevent inconsistent displays.
    pub fn route_is_stale(&self, now: DateTime<Utc>, max_age_secs: i64) -> bool {
        match self.route.captured_at {
            Some(at) => (now - at).num_seconds() > max_age_secs,
            None => true,
        }
    }
}

/// Bounds and thresholds the repository enforces; a subset of [`crate::config::Config`]
/// so the repository never depends on surface options.
#[derive(Debug, Clone)]
pub struct RepositoryLimits {
    pub latency_window: usize,
    pub loss_window: usize,
    pub hop_latency_window: usize,
    pub consecutive_loss_threshold: u32,
    pub mtu_issue_consecutive: u32,
    pub mtu_clear_consecutive: u32,
    pub route_change_consecutive: u32,
    pub link_mtu: u32,
    pub dns_benchmark_history: usize,
    pub alert_history: usize,
    pub jitter_ema_alpha: f64,
}

impl Default for RepositoryLimits {
    fn default() -> Self {
        use crate::config::defaults as d;
        Self {
            latency_window: d::LATENCY_WINDOW,
            loss_window: d::WINDOW_SIZE,
            hop_latency_window: d::HOP_LATENCY_WINDOW,
            consecutive_loss_threshold: d::CONSECUTIVE_LOSS_THRESHOLD,
            mtu_issue_consecutive: d::MTU_ISSUE_CONSECUTIVE,
            mtu_clear_consecutive: d::MTU_CLEAR_CONSECUTIVE,
            route_change_consecutive: d::ROUTE_CHANGE_CONSECUTIVE,
            link_mtu: d::LINK_MTU,
            dns_benchmark_history: d::DNS_BENCHMARK_HISTORY_SIZE,
            alert_history: d::ALERT_HISTORY_SIZE,
            jitter_ema_alpha: d::JITTER_EMA_ALPHA,
        }
    }
}

impl RepositoryLimits {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self {
            latency_window: cfg.latency_window,
            loss_window: cfg.window_size,
            hop_latency_window: cfg.hop_latency_window,
            consecutive_loss_threshold: cfg.consecutive_loss_threshold,
            mtu_issue_consecutive: cfg.mtu_issue_consecutive,
            mtu_clear_consecutive: cfg.mtu_clear_consecutive,
            route_change_consecutive: cfg.route_change_consecutive,
            link_mtu: cfg.link_mtu,
            dns_benchmark_history: cfg.dns_benchmark_history_size,
            alert_history: cfg.alert_history_size,
            jitter_ema_alpha: crate::config::defaults::JITTER_EMA_ALPHA,
        }
    }
}

struct StatsInner {
    target: String,
    started_at: DateTime<Utc>,

    counters: Counters,
    latency_window: VecDeque<f64>,
    loss_window: VecDeque<Sample>,
    jitter_ema_ms: f64,
    last_rtt_ms: Option<f64>,
    connection_lost: bool,
    last_sample_at: Option<DateTime<Utc>>,
    first_tick_done: bool,

    public_ip: PublicIpInfo,
    mtu: MtuState,
    mtu_first_probe_done: bool,
    ttl: TtlState,

    route: Route,
    pending_fingerprint: Option<String>,
    pending_run: u32,
    hops: Vec<HopStatus>,
    route_stats: RouteStats,

    dns_records: HashMap<(DnsRecordType, String), DnsRecordStatus>,
    dns_benchmarks: HashMap<(String, DnsTestKind), DnsBenchmarkStats>,

    diagnosis: ProblemDiagnosis,
    update_available: Option<String>,
}

/// The repository. One per process, created at startup, shared by `Arc`.
pub struct StatsRepository {
    limits: RepositoryLimits,
    inner: Mutex<StatsInner>,
    alerts: Mutex<AlertBook>,
}

impl StatsRepository {
    pub fn new(target: String, limits: RepositoryLimits) -> Self {
        let alert_history = limits.alert_history;
        Self {
            inner: Mutex::new(StatsInner {
                target,
                started_at: utc_now(),
                counters: Counters::default(),
                latency_window: VecDeque::new(),
                loss_window: VecDeque::new(),
                jitter_ema_ms: 0.0,
                last_rtt_ms: None,
                connection_lost: false,
                last_sample_at: None,
                first_tick_done: false,
                public_ip: PublicIpInfo::default(),
                mtu: MtuState {
                    link_mtu: limits.link_mtu,
                    ..MtuState::default()
                },
                mtu_first_probe_done: false,
                ttl: TtlState::default(),
                route: Route::default(),
                pending_fingerprint: None,
                pending_run: 0,
                hops: Vec::new(),
                route_stats: RouteStats::default(),
                dns_records: HashMap::new(),
                dns_benchmarks: HashMap::new(),
                diagnosis: ProblemDiagnosis::default(),
                update_available: None,
            }),
            alerts: Mutex::new(AlertBook::new(alert_history)),
            limits,
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, StatsInner> {
        // A poisoned lock means a panic mid-mutation; the state is still
        // structurally sound (all mutators restore invariants before
        // returning), so recover rather than cascade the panic.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- ping path ----

    /// Commit one ping sample: counters, windows, EMA jitter and the
    /// connection-lost state machine, atomically.
    pub fn record_ping_result(&self, sample: Sample) -> ConnectionTransition {
        let limits = &self.limits;
        let mut inner = self.lock_inner();

        // Monotonic last-seen even if a worker committed out of order
        inner.last_sample_at = Some(match inner.last_sample_at {
            Some(prev) => prev.max(sample.sent_at),
            None => sample.sent_at,
        });

        let mut transition = ConnectionTransition::None;

        if sample.ok {
            let rtt = sample.rtt_ms.unwrap_or_else(|| {
                get_debug_logger().warn("Repository", "ok sample without rtt; clamping to 0");
                0.0
            });
            let rtt = if rtt < 0.0 {
                get_debug_logger().warn("Repository", "negative rtt clamped to 0");
                0.0
            } else {
                rtt
            };

            inner.counters.sent += 1;
            inner.counters.ok += 1;
            if inner.connection_lost {
                // One ok sample ends an outage
                inner.connection_lost = false;
                transition = ConnectionTransition::Recovered;
            }
            inner.counters.consecutive_lost = 0;

            // EMA jitter over successive deltas
            if let Some(prev) = inner.last_rtt_ms {
                let delta = (rtt - prev).abs();
                let alpha = limits.jitter_ema_alpha;
                inner.jitter_ema_ms = alpha * delta + (1.0 - alpha) * inner.jitter_ema_ms;
            }
            inner.last_rtt_ms = Some(rtt);

            inner.latency_window.push_back(rtt);
            while inner.latency_window.len() > limits.latency_window {
                inner.latency_window.pop_front();
            }
        } else if sample.counts_as_loss() {
            inner.counters.sent += 1;
            inner.counters.lost += 1;
            inner.counters.consecutive_lost += 1;
            if inner.counters.consecutive_lost > inner.counters.max_consecutive_lost {
                inner.counters.max_consecutive_lost = inner.counters.consecutive_lost;
            }
            if !inner.connection_lost
                && inner.counters.consecutive_lost >= limits.consecutive_loss_threshold
            {
                inner.connection_lost = true;
                transition = ConnectionTransition::Lost;
            }
        }
        // Cancelled samples are kept in the window for the record but touch
        // no counters, so sent == ok + lost stays intact.

        inner.loss_window.push_back(sample);
        while inner.loss_window.len() > limits.loss_window {
            inner.loss_window.pop_front();
        }

        if inner.counters.sent != inner.counters.ok + inner.counters.lost {
            get_debug_logger().error("Repository", "counter invariant violated; clamping");
            inner.counters.sent = inner.counters.ok + inner.counters.lost;
        }

        transition
    }

    pub fn record_ttl(&self, ttl: u8) {
        let mut inner = self.lock_inner();
        inner.ttl.observed_ttl = Some(ttl);
        inner.ttl.estimated_hops = Some(TtlState::estimate_hops(ttl));
    }

    /// The ping worker calls this after its first completed tick; the
    /// readiness surface keys off it.
    pub fn note_first_tick(&self) {
        self.lock_inner().first_tick_done = true;
    }

    pub fn connection_lost(&self) -> bool {
        self.lock_inner().connection_lost
    }

    pub fn consecutive_lost(&self) -> u32 {
        self.lock_inner().counters.consecutive_lost
    }

    // ---- MTU path ----

    /// Store the latest path-MTU estimate. The very first probe bypasses
    /// hysteresis so the UI shows a value immediately.
    pub fn set_path_mtu(&self, path_mtu: Option<u32>) -> bool {
        let mut inner = self.lock_inner();
        inner.mtu.path_mtu = path_mtu;
        inner.mtu.checked_at = Some(utc_now());
        let first = !inner.mtu_first_probe_done;
        if first {
            inner.mtu_first_probe_done = true;
            if let Some(mtu) = path_mtu {
                inner.mtu.issue = mtu < inner.mtu.link_mtu;
            }
        }
        first
    }

    /// Hysteresis step: `issue_now` is this probe's raw verdict. The stored
    /// state flips only after the configured number of consecutive
    /// agreeing observations. Returns `(state_changed, new_state)`.
    pub fn update_mtu_hysteresis(&self, issue_now: bool) -> (bool, bool) {
        let limits = &self.limits;
        let mut inner = self.lock_inner();
        if issue_now {
            inner.mtu.consecutive_issue += 1;
            inner.mtu.consecutive_clear = 0;
        } else {
            inner.mtu.consecutive_clear += 1;
            inner.mtu.consecutive_issue = 0;
        }

        let mut changed = false;
        if !inner.mtu.issue && inner.mtu.consecutive_issue >= limits.mtu_issue_consecutive {
            inner.mtu.issue = true;
            changed = true;
        } else if inner.mtu.issue && inner.mtu.consecutive_clear >= limits.mtu_clear_consecutive {
            inner.mtu.issue = false;
            changed = true;
        }
        (changed, inner.mtu.issue)
    }

    // ---- route path ----

    /// Route-change hysteresis: a new fingerprint must be observed
    /// `route_change_consecutive` times in a row before it commits.
    /// Returns `(committed_change, run_of_identical_detections)`.
    pub fn update_route_hysteresis(&self, new_fingerprint: &str) -> (bool, u32) {
        let limits = &self.limits;
        let mut inner = self.lock_inner();

        if inner.route.fingerprint == new_fingerprint {
            // Same as committed route; any pending change was a blip
            inner.pending_fingerprint = None;
            inner.pending_run = 0;
            return (false, 0);
        }

        match inner.pending_fingerprint.as_deref() {
            Some(pending) if pending == new_fingerprint => {
                inner.pending_run += 1;
            }
            _ => {
                inner.pending_fingerprint = Some(new_fingerprint.to_string());
                inner.pending_run = 1;
            }
        }

        let run = inner.pending_run;
        if inner.route.fingerprint.is_empty() {
            // First ever discovery commits immediately
            return (true, run);
        }
        (run >= limits.route_change_consecutive, run)
    }

    /// Commit a discovered route and rebuild the hop table from scratch.
    /// Per-hop state never survives a route change.
    pub fn install_route(&self, hops: Vec<RouteHop>, fingerprint: String) {
        let mut inner = self.lock_inner();
        let changed = !inner.route.fingerprint.is_empty() && inner.route.fingerprint != fingerprint;
        if changed {
            inner.route.change_count += 1;
        }
        inner.hops = hops
            .iter()
            .filter_map(|h| h.ip.map(|ip| HopStatus::new(h.index, ip, h.hostname.clone())))
            .collect();
        inner.route = Route {
            hops,
            fingerprint,
            captured_at: Some(utc_now()),
            change_count: inner.route.change_count,
        };
        inner.pending_fingerprint = None;
        inner.pending_run = 0;
        inner.route_stats = RouteStats::default();
    }

    pub fn current_route(&self) -> Route {
        self.lock_inner().route.clone()
    }

    /// Commit one hop ping. `rtt_ms` of `None` is a lost probe.
    pub fn record_hop_ping(&self, index: u8, rtt_ms: Option<f64>) {
        let limits = &self.limits;
        let mut inner = self.lock_inner();

        // Previous hop's last rtt for the delta column
        let prev_rtt = inner
            .hops
            .iter()
            .filter(|h| h.index < index)
            .max_by_key(|h| h.index)
            .and_then(|h| h.last_rtt_ms);

        let Some(hop) = inner.hops.iter_mut().find(|h| h.index == index) else {
            return; // route changed under us; drop the stale result
        };

        hop.sent += 1;
        match rtt_ms {
            Some(rtt) if rtt >= 0.0 => {
                hop.last_rtt_ms = Some(rtt);
                hop.latency_window.push(rtt);
                if hop.latency_window.len() > limits.hop_latency_window {
                    hop.latency_window.remove(0);
                }
                hop.jitter_ms = stdev(&hop.latency_window);
                hop.delta_prev_ms = prev_rtt.map(|p| rtt - p);
            }
            Some(_) => {
                get_debug_logger().warn("Repository", "negative hop rtt dropped");
                hop.sent -= 1;
                return;
            }
            None => {
                hop.lost += 1;
            }
        }
        hop.sparkline = sparkline_bins(
            &hop.latency_window,
            crate::config::defaults::HOP_SPARKLINE_SAMPLES,
            crate::config::defaults::HOP_SPARKLINE_BINS,
        );
    }

    pub fn set_hop_geo(&self, index: u8, country: Option<String>, asn: Option<String>) {
        let mut inner = self.lock_inner();
        if let Some(hop) = inner.hops.iter_mut().find(|h| h.index == index) {
            hop.country = country;
            hop.asn = asn;
        }
    }

    pub fn set_hop_hostname(&self, index: u8, hostname: String) {
        let mut inner = self.lock_inner();
        if let Some(hop) = inner.hops.iter_mut().find(|h| h.index == index) {
            hop.hostname = Some(hostname.clone());
        }
        if let Some(rh) = inner.route.hops.iter_mut().find(|h| h.index == index) {
            rh.hostname = Some(hostname);
        }
    }

    /// Recompute and store the compact route summary.
    pub fn recompute_route_stats(&self, good_ms: f64, warn_ms: f64) -> RouteStats {
        let mut inner = self.lock_inner();
        let hops = &inner.hops;
        let stats = if hops.is_empty() {
            RouteStats::default()
        } else {
            let answered: Vec<f64> = hops.iter().filter_map(|h| h.last_rtt_ms).collect();
            let avg = if answered.is_empty() {
                0.0
            } else {
                answered.iter().sum::<f64>() / answered.len() as f64
            };
            let max = answered.iter().cloned().fold(0.0, f64::max);
            let sent: u64 = hops.iter().map(|h| h.sent).sum();
            let lost: u64 = hops.iter().map(|h| h.lost).sum();
            let loss_pct = if sent == 0 {
                0.0
            } else {
                lost as f64 * 100.0 / sent as f64
            };
            let health = if answered.is_empty() {
                RouteHealth::Unknown
            } else if loss_pct > 20.0 || max > warn_ms * 2.0 {
                RouteHealth::Critical
            } else if loss_pct > 5.0 || avg > warn_ms || max > warn_ms {
                RouteHealth::Degraded
            } else if avg <= good_ms || avg <= warn_ms {
                RouteHealth::Healthy
            } else {
                RouteHealth::Degraded
            };
            RouteStats {
                hop_count: hops.len(),
                avg_latency_ms: avg,
                max_latency_ms: max,
                loss_pct,
                health,
            }
        };
        inner.route_stats = stats.clone();
        stats
    }

    // ---- public IP / version ----

    /// Accept a validated public IP. Returns true when the address actually
    /// changed (provider rotation noise never reaches here unvalidated).
    pub fn set_public_ip(&self, ip: String, provider: String) -> bool {
        let mut inner = self.lock_inner();
        let changed = inner.public_ip.ip.as_deref() != Some(ip.as_str());
        if changed {
            // Geo attribution belongs to the previous address
            inner.public_ip.country = None;
            inner.public_ip.asn = None;
            inner.public_ip.city = None;
        }
        inner.public_ip.ip = Some(ip);
        inner.public_ip.provider = Some(provider);
        inner.public_ip.fetched_at = Some(utc_now());
        changed
    }

    pub fn set_public_ip_geo(&self, country: Option<String>, asn: Option<String>, city: Option<String>) {
        let mut inner = self.lock_inner();
        inner.public_ip.country = country;
        inner.public_ip.asn = asn;
        inner.public_ip.city = city;
    }

    pub fn set_update_available(&self, version: Option<String>) {
        self.lock_inner().update_available = version;
    }

    // ---- DNS ----

    pub fn record_dns_record_status(&self, status: DnsRecordStatus) {
        let mut inner = self.lock_inner();
        inner
            .dns_records
            .insert((status.record_type, status.server.clone()), status);
    }

    /// Commit one benchmark measurement; `latency_ms` of `None` is a failure.
    pub fn record_dns_benchmark(&self, server: &str, kind: DnsTestKind, latency_ms: Option<f64>) {
        let bound = self.limits.dns_benchmark_history;
        let mut inner = self.lock_inner();
        let stats = inner
            .dns_benchmarks
            .entry((server.to_string(), kind))
            .or_default();
        stats.total += 1;
        if let Some(ms) = latency_ms {
            stats.ok += 1;
            stats.history_ms.push(ms);
            if stats.history_ms.len() > bound {
                stats.history_ms.remove(0);
            }
            let h = &stats.history_ms;
            stats.min_ms = h.iter().cloned().fold(f64::INFINITY, f64::min);
            stats.max_ms = h.iter().cloned().fold(0.0, f64::max);
            stats.avg_ms = h.iter().sum::<f64>() / h.len() as f64;
            stats.stdev_ms = stdev(h);
        }
    }

    // ---- classifier ----

    pub fn set_diagnosis(&self, diagnosis: ProblemDiagnosis) {
        self.lock_inner().diagnosis = diagnosis;
    }

    // ---- alert sub-state ----

    /// Record a visible alert. This is the sole write path for alert
    /// entities; the smart pipeline decides *whether* to call it.
    pub fn add_alert(&self, entity: AlertEntity) {
        let mut book = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        book.admit(entity);
    }

    /// Queue a sound notification of the given kind (a no-op when sound is
    /// disabled or quiet hours are active; the pipeline makes that call).
    pub fn trigger_alert_sound(&self, kind: AlertKind) {
        let mut book = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        book.sound_pending = Some(kind);
    }

    /// Expire archived alerts past the retention window.
    pub fn clean_old_alerts(&self, now: DateTime<Utc>, max_age_secs: i64) {
        let mut book = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        book.clean(now, max_age_secs);
    }

    /// Single entry for the smart-alert pipeline's bookkeeping pass.
    /// Nothing else may reach into the book.
    pub fn with_alert_book<R>(&self, f: impl FnOnce(&mut AlertBook) -> R) -> R {
        let mut book = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut book)
    }

    pub fn active_alerts(&self) -> Vec<AlertEntity> {
        let book = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        book.active().cloned().collect()
    }

    /// Highest severity among active alerts, if any.
    pub fn max_active_severity(&self) -> Option<AlertSeverity> {
        let book = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        book.active().map(|a| a.severity).max()
    }

    // ---- snapshots ----

    /// Produce a consistent deep copy of all reader-visible state.
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock_inner();
        let latency: Vec<f64> = inner.latency_window.iter().cloned().collect();
        let (min, max, avg) = if latency.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                latency.iter().cloned().fold(f64::INFINITY, f64::min),
                latency.iter().cloned().fold(0.0, f64::max),
                latency.iter().sum::<f64>() / latency.len() as f64,
            )
        };

        let counted: Vec<&Sample> = inner
            .loss_window
            .iter()
            .filter(|s| s.ok || s.counts_as_loss())
            .collect();
        let lost_in_window = counted.iter().filter(|s| !s.ok).count();
        let loss_pct_30m = if counted.is_empty() {
            0.0
        } else {
            lost_in_window as f64 * 100.0 / counted.len() as f64
        };

        let link_status = if inner.counters.sent == 0 {
            LinkStatus::Unknown
        } else if inner.connection_lost {
            LinkStatus::Down
        } else if loss_pct_30m > 0.0 || inner.diagnosis.kind != ProblemKind::None {
            LinkStatus::Degraded
        } else {
            LinkStatus::Healthy
        };

        let mut dns_benchmarks: Vec<(String, DnsTestKind, DnsBenchmarkStats)> = inner
            .dns_benchmarks
            .iter()
            .map(|((server, kind), stats)| (server.clone(), *kind, stats.clone()))
            .collect();
        dns_benchmarks.sort_by(|a, b| (a.0.as_str(), a.1.as_str()).cmp(&(b.0.as_str(), b.1.as_str())));

        let mut dns_records: Vec<DnsRecordStatus> = inner.dns_records.values().cloned().collect();
        dns_records.sort_by(|a, b| {
            (a.server.as_str(), a.record_type.as_str())
                .cmp(&(b.server.as_str(), b.record_type.as_str()))
        });

        let snapshot_core = StatsSnapshot {
            target: inner.target.clone(),
            taken_at: Some(utc_now()),
            started_at: Some(inner.started_at),
            counters: inner.counters.clone(),
            latency_window_ms: latency,
            avg_latency_ms: avg,
            min_latency_ms: if min.is_finite() { min } else { 0.0 },
            max_latency_ms: max,
            jitter_ema_ms: inner.jitter_ema_ms,
            loss_pct_30m,
            connection_lost: inner.connection_lost,
            link_status,
            last_sample_at: inner.last_sample_at,
            first_tick_done: inner.first_tick_done,
            public_ip: inner.public_ip.clone(),
            mtu: inner.mtu.clone(),
            ttl: inner.ttl.clone(),
            route: inner.route.clone(),
            hops: inner.hops.clone(),
            route_stats: inner.route_stats.clone(),
            dns_records,
            dns_benchmarks,
            diagnosis: inner.diagnosis.clone(),
            update_available: inner.update_available.clone(),
            active_alerts: Vec::new(),
            alert_history_len: 0,
        };
        drop(inner);

        let mut snapshot = snapshot_core;
        let book = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        snapshot.active_alerts = book.active().cloned().collect();
        snapshot.alert_history_len = book.history_len();
        snapshot
    }
}

/// Population standard deviation; 0 for fewer than two values.
pub fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Normalize the last `samples` values into `bins` buckets (0..bins-1)
/// for sparkline display.
pub fn sparkline_bins(window: &[f64], samples: usize, bins: u8) -> Vec<u8> {
    let tail: Vec<f64> = window.iter().rev().take(samples).rev().cloned().collect();
    if tail.is_empty() {
        return Vec::new();
    }
    let min = tail.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = tail.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let span = (max - min).max(f64::EPSILON);
    tail.iter()
        .map(|v| {
            let norm = (v - min) / span;
            ((norm * (bins.saturating_sub(1)) as f64).round() as u8).min(bins.saturating_sub(1))
        })
        .collect()
}
