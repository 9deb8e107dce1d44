// Core types for network path monitoring
use chrono::{DateTime, Utc};
use std::net::IpAddr;

/// Connection health levels derived from ping samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Target responding within thresholds
    Healthy,
    /// Elevated latency, jitter or intermittent loss
    Degraded,
    /// Connection considered lost (consecutive-loss threshold crossed)
    Down,
    /// Not enough samples yet
    #[default]
    Unknown,
}

/// Failure taxonomy carried by failed samples and probe outcomes.
///
/// Kinds, never type names: workers map whatever went wrong into one of
/// these buckets and the rest of the engine only ever looks at the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A single probe failed (timeout, 5xx, subprocess timeout); retried next tick
    TransientIo,
    /// Missing binary or unresolvable config; fatal at startup only
    PermanentIo,
    /// Unexpected tool output; treated as a failed sample
    ParseError,
    /// External input failed a structural check; sample dropped
    ValidationError,
    /// Shutdown-signalled I/O; recorded but never counted as packet loss
    Cancelled,
    /// Internal check failed; state clamped, never a crash
    InvariantViolated,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::TransientIo => write!(f, "transient-io"),
            FailureKind::PermanentIo => write!(f, "permanent-io"),
            FailureKind::ParseError => write!(f, "parse-error"),
            FailureKind::ValidationError => write!(f, "validation-error"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::InvariantViolated => write!(f, "invariant-violated"),
        }
    }
}

/// A single ping observation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Sample {
    /// UTC send instant (monotonic-backed by the worker loop ordering)
    pub sent_at: DateTime<Utc>,
    pub ok: bool,
    /// Round-trip in milliseconds, present iff ok
    pub rtt_ms: Option<f64>,
    /// Failure bucket, present iff not ok
    pub error: Option<FailureKind>,
}

impl Sample {
    pub fn ok(sent_at: DateTime<Utc>, rtt_ms: f64) -> Self {
        Self {
            sent_at,
            ok: true,
            rtt_ms: Some(rtt_ms),
            error: None,
        }
    }

    pub fn failed(sent_at: DateTime<Utc>, kind: FailureKind) -> Self {
        Self {
            sent_at,
            ok: false,
            rtt_ms: None,
            error: Some(kind),
        }
    }

    /// Cancelled samples are recorded for completeness but excluded
    /// from loss accounting.
    pub fn counts_as_loss(&self) -> bool {
        !self.ok && self.error != Some(FailureKind::Cancelled)
    }
}

/// Aggregate send/receive counters. `sent == ok + lost` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Counters {
    pub sent: u64,
    pub ok: u64,
    pub lost: u64,
    pub consecutive_lost: u32,
    pub max_consecutive_lost: u32,
}

/// Last validated public IP plus geo attribution
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PublicIpInfo {
    pub ip: Option<String>,
    pub country: Option<String>,
    pub asn: Option<String>,
    pub city: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub provider: Option<String>,
}

/// Path-MTU state under hysteresis
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MtuState {
    /// Interface MTU assumed for the link (what we expect to see)
    pub link_mtu: u32,
    /// Last measured path MTU, if any probe has completed
    pub path_mtu: Option<u32>,
    /// True while the path MTU is below the link MTU (flips under hysteresis)
    pub issue: bool,
    pub consecutive_issue: u32,
    pub consecutive_clear: u32,
    pub checked_at: Option<DateTime<Utc>>,
}

impl Default for MtuState {
    fn default() -> Self {
        Self {
            link_mtu: 1500,
            path_mtu: None,
            issue: false,
            consecutive_issue: 0,
            consecutive_clear: 0,
            checked_at: None,
        }
    }
}

/// TTL observed on echo replies plus the hop-count estimate derived from it
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TtlState {
    pub observed_ttl: Option<u8>,
    pub estimated_hops: Option<u8>,
}

impl TtlState {
    /// Estimate hop count from a reply TTL assuming the usual initial
    /// values of 64, 128 or 255.
    pub fn estimate_hops(ttl: u8) -> u8 {
        let initial = if ttl <= 64 {
            64u16
        } else if ttl <= 128 {
            128
        } else {
            255
        };
        (initial - ttl as u16 + 1).min(255) as u8
    }
}

/// One hop on the discovered route
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RouteHop {
    /// 1-based hop index as reported by traceroute
    pub index: u8,
    /// None for hops that never answered
    pub ip: Option<IpAddr>,
    pub hostname: Option<String>,
}

/// The discovered route with its identity fingerprint
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Route {
    pub hops: Vec<RouteHop>,
    pub fingerprint: String,
    pub captured_at: Option<DateTime<Utc>>,
    pub change_count: u64,
}

/// Per-hop probe state maintained by the hop prober.
///
/// Recreated from scratch whenever the route detector commits a new route,
/// so counters and history never mix measurements from different paths.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HopStatus {
    pub index: u8,
    pub ip: IpAddr,
    pub hostname: Option<String>,
    /// Bounded recent round-trips in ms
    pub latency_window: Vec<f64>,
    /// Stdev over the latency window
    pub jitter_ms: f64,
    pub last_rtt_ms: Option<f64>,
    /// Latency delta vs the previous hop's last measurement
    pub delta_prev_ms: Option<f64>,
    pub sent: u64,
    pub lost: u64,
    /// Last ~10 samples normalized into 5 bins for sparkline display
    pub sparkline: Vec<u8>,
    pub country: Option<String>,
    pub asn: Option<String>,
}

impl HopStatus {
    pub fn new(index: u8, ip: IpAddr, hostname: Option<String>) -> Self {
        Self {
            index,
            ip,
            hostname,
            latency_window: Vec::new(),
            jitter_ms: 0.0,
            last_rtt_ms: None,
            delta_prev_ms: None,
            sent: 0,
            lost: 0,
            sparkline: Vec::new(),
            country: None,
            asn: None,
        }
    }

    pub fn loss_pct(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.lost as f64 * 100.0 / self.sent as f64
        }
    }
}

/// Route-level classification for the hop table summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouteHealth {
    Healthy,
    Degraded,
    Critical,
    #[default]
    Unknown,
}

/// Compact summary over all hop statuses
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RouteStats {
    pub hop_count: usize,
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,
    pub loss_pct: f64,
    pub health: RouteHealth,
}

/// DNS record types the monitor queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DnsRecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
    Ns,
}

impl DnsRecordType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Self::A),
            "AAAA" => Some(Self::Aaaa),
            "CNAME" => Some(Self::Cname),
            "MX" => Some(Self::Mx),
            "TXT" => Some(Self::Txt),
            "NS" => Some(Self::Ns),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Cname => "CNAME",
            Self::Mx => "MX",
            Self::Txt => "TXT",
            Self::Ns => "NS",
        }
    }
}

impl std::fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of the latest lookup for one (record type, server) pair
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DnsRecordStatus {
    pub record_type: DnsRecordType,
    pub server: String,
    pub ok: bool,
    pub latency_ms: Option<f64>,
    pub record_count: usize,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Benchmark test kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsTestKind {
    /// Second of two sequential queries for the same name
    Cached,
    /// Freshly generated random subdomain forcing recursion
    Uncached,
    /// A popular .com name
    DotCom,
}

impl DnsTestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Uncached => "uncached",
            Self::DotCom => "dotcom",
        }
    }
}

/// Bounded benchmark statistics for one (server, test kind)
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DnsBenchmarkStats {
    pub history_ms: Vec<f64>,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub stdev_ms: f64,
    pub total: u64,
    pub ok: u64,
}

impl DnsBenchmarkStats {
    /// ok / total; 1.0 before any attempt so an idle benchmark never
    /// drags the composite score down.
    pub fn reliability(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.ok as f64 / self.total as f64
        }
    }
}

/// DNS score buckets used by the classifier and surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsScoreBucket {
    Critical,
    Poor,
    Fair,
    Good,
    Excellent,
}

/// Problem classification. Exclusive: exactly one kind at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    #[default]
    None,
    Isp,
    Local,
    Dns,
    Mtu,
    Unknown,
}

impl std::fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProblemKind::None => "none",
            ProblemKind::Isp => "isp",
            ProblemKind::Local => "local",
            ProblemKind::Dns => "dns",
            ProblemKind::Mtu => "mtu",
            ProblemKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Prediction {
    #[default]
    Stable,
    Risk,
}

/// Result of one classifier evaluation
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProblemDiagnosis {
    pub kind: ProblemKind,
    pub prediction: Prediction,
    pub recurring: bool,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub cause: String,
}

/// Connection-state edge reported by the repository after a sample commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTransition {
    None,
    /// consecutive-lost crossed the threshold upward
    Lost,
    /// first ok sample after a lost period
    Recovered,
}

/// Monitoring engine errors
#[derive(Debug)]
pub enum MonitorError {
    HomeDirNotFound,
    ConfigError(String),
    SpawnError(String),
    ParseError(String),
    HttpError(String),
    DnsError(String),
    StateFileError(String),
    LockHeld(String),
    Cancelled,
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::HomeDirNotFound => write!(f, "Home directory not found"),
            MonitorError::ConfigError(msg) => write!(f, "Config error: {}", msg),
            MonitorError::SpawnError(msg) => write!(f, "Spawn error: {}", msg),
            MonitorError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            MonitorError::HttpError(msg) => write!(f, "HTTP error: {}", msg),
            MonitorError::DnsError(msg) => write!(f, "DNS error: {}", msg),
            MonitorError::StateFileError(msg) => write!(f, "State file error: {}", msg),
            MonitorError::LockHeld(msg) => write!(f, "Another instance is running: {}", msg),
            MonitorError::Cancelled => write!(f, "Cancelled by shutdown"),
        }
    }
}

impl std::error::Error for MonitorError {}

impl From<std::io::Error> for MonitorError {
    fn from(error: std::io::Error) -> Self {
        MonitorError::StateFileError(error.to_string())
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(error: serde_json::Error) -> Self {
        MonitorError::ParseError(error.to_string())
    }
}

impl MonitorError {
    /// Map an engine error into the sample-level failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            MonitorError::HomeDirNotFound | MonitorError::ConfigError(_) => {
                FailureKind::PermanentIo
            }
            MonitorError::SpawnError(_) | MonitorError::HttpError(_) | MonitorError::DnsError(_) => {
                FailureKind::TransientIo
            }
            MonitorError::ParseError(_) => FailureKind::ParseError,
            MonitorError::StateFileError(_) | MonitorError::LockHeld(_) => FailureKind::TransientIo,
            MonitorError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Validate a string returned by a public-IP provider.
///
/// Accepts only a parseable, globally routable unicast address. Loopback,
/// private, link-local and unspecified addresses are provider garbage as
/// far as the IP worker is concerned.
pub fn validate_public_ip(raw: &str) -> Option<IpAddr> {
    let ip: IpAddr = raw.trim().parse().ok()?;
    let acceptable = match ip {
        IpAddr::V4(v4) => {
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation())
        }
        IpAddr::V6(v6) => {
            !(v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00)
        }
    };
    acceptable.then_some(ip)
}

// Timestamp helpers

/// UTC now. All repository timestamps are UTC; display layers convert.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// UTC ISO-8601 timestamp safe for filenames (colons replaced)
pub fn utc_file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%SZ").to_string()
}
