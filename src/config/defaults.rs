// Built-in defaults and bounds for every recognized option.
//
// Environment variables override the optional config file, which overrides
// these constants. Numeric values outside their bounds are clamped, not
// rejected, so a bad value degrades to a sane one instead of killing the
// monitor.

/// Ping target when nothing else is configured
pub const TARGET_IP: &str = "1.1.1.1";

/// Seconds between pings
pub const INTERVAL_SECS: u64 = 1;
pub const INTERVAL_BOUNDS: (u64, u64) = (1, 300);

/// Loss window bound (30 minutes at 1 Hz)
pub const WINDOW_SIZE: usize = 1800;
pub const WINDOW_SIZE_BOUNDS: (usize, usize) = (60, 7200);

/// Latency window bound
pub const LATENCY_WINDOW: usize = 100;
pub const LATENCY_WINDOW_BOUNDS: (usize, usize) = (10, 1000);

/// EMA smoothing factor for jitter
pub const JITTER_EMA_ALPHA: f64 = 0.1;

pub const PACKET_LOSS_THRESHOLD_PCT: f64 = 5.0;
pub const AVG_LATENCY_THRESHOLD_MS: f64 = 150.0;
pub const JITTER_THRESHOLD_MS: f64 = 30.0;
pub const CONSECUTIVE_LOSS_THRESHOLD: u32 = 5;

/// How many pings between TTL re-parses
pub const TTL_INTERVAL: u64 = 30;

// Alerting policy
pub const ENABLE_SOUND_ALERTS: bool = true;
pub const ALERT_COOLDOWN_SECS: u64 = 60;
pub const ENABLE_QUIET_HOURS: bool = false;
pub const QUIET_HOURS_START: u8 = 22;
pub const QUIET_HOURS_END: u8 = 7;
pub const ALERT_HISTORY_SIZE: usize = 200;
pub const ALERT_ESCALATION_TIME_MINUTES: u64 = 30;
/// Token bucket per alert fingerprint
pub const ALERT_RATE_LIMIT_PER_MIN: u32 = 10;
pub const ALERT_RATE_LIMIT_BURST: u32 = 5;
/// Jaccard similarity above which two alerts are near-duplicates
pub const ALERT_NEAR_DUP_JACCARD: f64 = 0.85;
/// Dedup lookup window
pub const ALERT_DEDUP_WINDOW_SECS: u64 = 300;
/// Re-emission escalation schedule during an ongoing incident, minutes
pub const ALERT_FATIGUE_SCHEDULE_MIN: [u64; 5] = [1, 3, 5, 15, 30];
/// Consecutive false evaluations before an active alert auto-recovers
pub const ALERT_RECOVERY_EVALS: u32 = 3;
/// Baseline warm-up: samples required before adaptive thresholds engage
pub const BASELINE_MIN_SAMPLES: usize = 30;
/// Sigma multiplier for adaptive latency/jitter thresholds
pub const BASELINE_SIGMA_K: f64 = 3.0;

// DNS monitor
pub const ENABLE_DNS_MONITORING: bool = true;
pub const DNS_TEST_DOMAIN: &str = "example.com";
pub const DNS_RECORD_TYPES: &str = "A,AAAA,MX";
pub const DNS_CHECK_INTERVAL_SECS: u64 = 120;
pub const DNS_SLOW_THRESHOLD_MS: f64 = 200.0;
pub const DNS_TIMEOUT_SECS: u64 = 2;

// DNS benchmark
pub const ENABLE_DNS_BENCHMARK: bool = true;
pub const DNS_BENCHMARK_SERVERS: &str = "1.1.1.1,8.8.8.8";
pub const DNS_BENCHMARK_INTERVAL_SECS: u64 = 300;
pub const DNS_BENCHMARK_HISTORY_SIZE: usize = 20;
/// Wildcard-free parent for the uncached (forced recursion) test
pub const DNS_UNCACHED_PARENT: &str = "example.com";
pub const DNS_DOTCOM_NAME: &str = "google.com";

// Path MTU
pub const ENABLE_MTU_MONITORING: bool = true;
pub const MTU_CHECK_INTERVAL_SECS: u64 = 600;
pub const MTU_ISSUE_CONSECUTIVE: u32 = 3;
pub const MTU_CLEAR_CONSECUTIVE: u32 = 3;
pub const LINK_MTU: u32 = 1500;

// Hop probing
pub const ENABLE_HOP_MONITORING: bool = true;
pub const HOP_PING_INTERVAL_SECS: u64 = 10;
pub const HOP_PING_TIMEOUT_SECS: u64 = 2;
pub const HOP_REDISCOVER_INTERVAL_SECS: u64 = 1800;
pub const HOP_LATENCY_GOOD_MS: f64 = 50.0;
pub const HOP_LATENCY_WARN_MS: f64 = 150.0;
pub const HOP_LATENCY_WINDOW: usize = 20;
pub const HOP_SPARKLINE_SAMPLES: usize = 10;
pub const HOP_SPARKLINE_BINS: u8 = 5;

// Route detector
pub const ENABLE_AUTO_TRACEROUTE: bool = true;
pub const TRACEROUTE_TRIGGER_LOSSES: u32 = 3;
pub const TRACEROUTE_COOLDOWN_SECS: u64 = 300;
pub const TRACEROUTE_MAX_HOPS: u8 = 30;
pub const TRACEROUTE_TIMEOUT_SECS: u64 = 60;
/// Identical detections required before a route change commits
pub const ROUTE_CHANGE_CONSECUTIVE: u32 = 2;
/// Traceroute snapshots kept on disk
pub const TRACEROUTE_SNAPSHOTS_KEPT: usize = 20;

// Public IP / geo
pub const IP_CHECK_INTERVAL_SECS: u64 = 300;
pub const IP_PROVIDERS: &str = "https://api.ipify.org,https://ifconfig.me/ip,https://icanhazip.com";
pub const IP_HTTP_TIMEOUT_SECS: u64 = 5;
/// Geo endpoint allows ~45 req/min; stay under it
pub const GEO_RATE_LIMIT_PER_MIN: u32 = 40;
pub const GEO_CACHE_TTL_SECS: u64 = 3600;

// Version polling
pub const VERSION_CHECK_INTERVAL_SECS: u64 = 3600;
pub const VERSION_HTTP_TIMEOUT_SECS: u64 = 5;
pub const VERSION_RETRY_ATTEMPTS: u32 = 3;
pub const VERSION_RETRY_INITIAL_MS: u64 = 500;

// Problem classifier
pub const PROBLEM_ANALYSIS_INTERVAL_SECS: u64 = 30;
/// Same-kind recurrences within the rolling hour that flip prediction to risk
pub const RECURRING_PROBLEM_COUNT: usize = 3;
/// Suppression window between recurring-history appends
pub const RECURRING_SUPPRESSION_SECS: u64 = 120;

// External read-only surfaces
pub const METRICS_ADDR: &str = "127.0.0.1";
pub const METRICS_PORT: u16 = 9710;
pub const HEALTH_ADDR: &str = "127.0.0.1";
pub const HEALTH_PORT: u16 = 9711;

/// Shutdown: workers must observe the signal within this bound
pub const SHUTDOWN_GRACE_SECS: u64 = 2;
