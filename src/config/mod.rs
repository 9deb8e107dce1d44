//! Typed configuration: environment variables over file defaults.
//!
//! Resolution order for every option:
//!
//! 1. Environment variable (always wins)
//! 2. Optional TOML config file (`~/.config/netpulse/netpulse.toml` or
//!    `NETPULSE_CONFIG`)
//! 3. Built-in default from [`defaults`]
//!
//! Numeric options are clamped to their documented bounds; booleans accept
//! only `true`/`false` (case-insensitive) and fall back to the default
//! otherwise. The only configuration states that abort startup are the ones
//! the engine cannot run through: an unparsable target address and a
//! non-loopback surface bind without credentials.

pub mod defaults;

use crate::core::monitor::types::{DnsRecordType, MonitorError};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Raw file layer; every field optional so partial files are fine.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    target_ip: Option<String>,
    interval: Option<u64>,
    window_size: Option<usize>,
    latency_window: Option<usize>,
    packet_loss_threshold: Option<f64>,
    avg_latency_threshold: Option<f64>,
    jitter_threshold: Option<f64>,
    consecutive_loss_threshold: Option<u32>,
    enable_sound_alerts: Option<bool>,
    enable_quiet_hours: Option<bool>,
    quiet_hours_start: Option<u8>,
    quiet_hours_end: Option<u8>,
    enable_dns_monitoring: Option<bool>,
    dns_test_domain: Option<String>,
    dns_record_types: Option<String>,
    enable_dns_benchmark: Option<bool>,
    dns_benchmark_servers: Option<String>,
    enable_mtu_monitoring: Option<bool>,
    enable_hop_monitoring: Option<bool>,
    enable_auto_traceroute: Option<bool>,
    metrics_addr: Option<String>,
    health_addr: Option<String>,
    surface_auth_token: Option<String>,
    allow_insecure_bind: Option<bool>,
}

/// Fully resolved engine configuration. Constructed once at startup and
/// shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub target: IpAddr,
    pub interval: Duration,
    pub window_size: usize,
    pub latency_window: usize,

    pub packet_loss_threshold_pct: f64,
    pub avg_latency_threshold_ms: f64,
    pub jitter_threshold_ms: f64,
    pub consecutive_loss_threshold: u32,
    pub ttl_interval: u64,

    pub enable_sound_alerts: bool,
    pub alert_cooldown: Duration,
    pub enable_quiet_hours: bool,
    pub quiet_hours_start: u8,
    pub quiet_hours_end: u8,
    pub alert_history_size: usize,
    pub alert_escalation_minutes: u64,
    pub alert_rate_limit_per_min: u32,
    pub alert_rate_limit_burst: u32,
    pub baseline_min_samples: usize,
    pub baseline_sigma_k: f64,

    pub enable_dns_monitoring: bool,
    pub dns_test_domain: String,
    pub dns_record_types: Vec<DnsRecordType>,
    pub dns_check_interval: Duration,
    pub dns_slow_threshold_ms: f64,
    pub dns_timeout: Duration,

    pub enable_dns_benchmark: bool,
    pub dns_benchmark_servers: Vec<IpAddr>,
    pub dns_benchmark_interval: Duration,
    pub dns_benchmark_history_size: usize,
    pub dns_uncached_parent: String,
    pub dns_dotcom_name: String,

    pub enable_mtu_monitoring: bool,
    pub mtu_check_interval: Duration,
    pub mtu_issue_consecutive: u32,
    pub mtu_clear_consecutive: u32,
    pub link_mtu: u32,

    pub enable_hop_monitoring: bool,
    pub hop_ping_interval: Duration,
    pub hop_ping_timeout: Duration,
    pub hop_rediscover_interval: Duration,
    pub hop_latency_good_ms: f64,
    pub hop_latency_warn_ms: f64,
    pub hop_latency_window: usize,

    pub enable_auto_traceroute: bool,
    pub traceroute_trigger_losses: u32,
    pub traceroute_cooldown: Duration,
    pub traceroute_max_hops: u8,
    pub traceroute_timeout: Duration,
    pub route_change_consecutive: u32,

    pub ip_check_interval: Duration,
    pub ip_providers: Vec<String>,
    pub ip_http_timeout: Duration,

    pub version_check_interval: Duration,

    pub problem_analysis_interval: Duration,

    pub metrics_addr: IpAddr,
    pub metrics_port: u16,
    pub health_addr: IpAddr,
    pub health_port: u16,
    pub surface_auth_token: Option<String>,
    pub allow_insecure_bind: bool,

    /// Use the raw-socket ICMP library when no system ping binary exists.
    /// Requires elevated privileges, so never enabled implicitly.
    pub enable_raw_ping_fallback: bool,

    pub state_dir: PathBuf,

    /// Set when TARGET_IP was present but unparsable; checked by validate()
    target_override_invalid: bool,
}

impl Default for Config {
    fn default() -> Self {
        use defaults as d;
        Self {
            target: d::TARGET_IP.parse().expect("default target parses"),
            interval: Duration::from_secs(d::INTERVAL_SECS),
            window_size: d::WINDOW_SIZE,
            latency_window: d::LATENCY_WINDOW,
            packet_loss_threshold_pct: d::PACKET_LOSS_THRESHOLD_PCT,
            avg_latency_threshold_ms: d::AVG_LATENCY_THRESHOLD_MS,
            jitter_threshold_ms: d::JITTER_THRESHOLD_MS,
            consecutive_loss_threshold: d::CONSECUTIVE_LOSS_THRESHOLD,
            ttl_interval: d::TTL_INTERVAL,
            enable_sound_alerts: d::ENABLE_SOUND_ALERTS,
            alert_cooldown: Duration::from_secs(d::ALERT_COOLDOWN_SECS),
            enable_quiet_hours: d::ENABLE_QUIET_HOURS,
            quiet_hours_start: d::QUIET_HOURS_START,
            quiet_hours_end: d::QUIET_HOURS_END,
            alert_history_size: d::ALERT_HISTORY_SIZE,
            alert_escalation_minutes: d::ALERT_ESCALATION_TIME_MINUTES,
            alert_rate_limit_per_min: d::ALERT_RATE_LIMIT_PER_MIN,
            alert_rate_limit_burst: d::ALERT_RATE_LIMIT_BURST,
            baseline_min_samples: d::BASELINE_MIN_SAMPLES,
            baseline_sigma_k: d::BASELINE_SIGMA_K,
            enable_dns_monitoring: d::ENABLE_DNS_MONITORING,
            dns_test_domain: d::DNS_TEST_DOMAIN.to_string(),
            dns_record_types: parse_record_types(d::DNS_RECORD_TYPES),
            dns_check_interval: Duration::from_secs(d::DNS_CHECK_INTERVAL_SECS),
            dns_slow_threshold_ms: d::DNS_SLOW_THRESHOLD_MS,
            dns_timeout: Duration::from_secs(d::DNS_TIMEOUT_SECS),
            enable_dns_benchmark: d::ENABLE_DNS_BENCHMARK,
            dns_benchmark_servers: parse_ip_list(d::DNS_BENCHMARK_SERVERS),
            dns_benchmark_interval: Duration::from_secs(d::DNS_BENCHMARK_INTERVAL_SECS),
            dns_benchmark_history_size: d::DNS_BENCHMARK_HISTORY_SIZE,
            dns_uncached_parent: d::DNS_UNCACHED_PARENT.to_string(),
            dns_dotcom_name: d::DNS_DOTCOM_NAME.to_string(),
            enable_mtu_monitoring: d::ENABLE_MTU_MONITORING,
            mtu_check_interval: Duration::from_secs(d::MTU_CHECK_INTERVAL_SECS),
            mtu_issue_consecutive: d::MTU_ISSUE_CONSECUTIVE,
            mtu_clear_consecutive: d::MTU_CLEAR_CONSECUTIVE,
            link_mtu: d::LINK_MTU,
            enable_hop_monitoring: d::ENABLE_HOP_MONITORING,
            hop_ping_interval: Duration::from_secs(d::HOP_PING_INTERVAL_SECS),
            hop_ping_timeout: Duration::from_secs(d::HOP_PING_TIMEOUT_SECS),
            hop_rediscover_interval: Duration::from_secs(d::HOP_REDISCOVER_INTERVAL_SECS),
            hop_latency_good_ms: d::HOP_LATENCY_GOOD_MS,
            hop_latency_warn_ms: d::HOP_LATENCY_WARN_MS,
            hop_latency_window: d::HOP_LATENCY_WINDOW,
            enable_auto_traceroute: d::ENABLE_AUTO_TRACEROUTE,
            traceroute_trigger_losses: d::TRACEROUTE_TRIGGER_LOSSES,
            traceroute_cooldown: Duration::from_secs(d::TRACEROUTE_COOLDOWN_SECS),
            traceroute_max_hops: d::TRACEROUTE_MAX_HOPS,
            traceroute_timeout: Duration::from_secs(d::TRACEROUTE_TIMEOUT_SECS),
            route_change_consecutive: d::ROUTE_CHANGE_CONSECUTIVE,
            ip_check_interval: Duration::from_secs(d::IP_CHECK_INTERVAL_SECS),
            ip_providers: d::IP_PROVIDERS.split(',').map(str::to_string).collect(),
            ip_http_timeout: Duration::from_secs(d::IP_HTTP_TIMEOUT_SECS),
            version_check_interval: Duration::from_secs(d::VERSION_CHECK_INTERVAL_SECS),
            problem_analysis_interval: Duration::from_secs(d::PROBLEM_ANALYSIS_INTERVAL_SECS),
            metrics_addr: d::METRICS_ADDR.parse().expect("default addr parses"),
            metrics_port: d::METRICS_PORT,
            health_addr: d::HEALTH_ADDR.parse().expect("default addr parses"),
            health_port: d::HEALTH_PORT,
            surface_auth_token: None,
            allow_insecure_bind: false,
            enable_raw_ping_fallback: false,
            state_dir: default_state_dir(),
            target_override_invalid: false,
        }
    }
}

impl Config {
    /// Load the file layer (if any) and overlay the environment.
    pub fn load() -> Result<Self, MonitorError> {
        let file = load_file_layer();
        let mut cfg = Config::default();
        cfg.apply_file(&file);
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_file(&mut self, file: &FileConfig) {
        if let Some(ref v) = file.target_ip {
            if let Ok(ip) = v.parse() {
                self.target = ip;
            }
        }
        if let Some(v) = file.interval {
            self.interval = Duration::from_secs(clamp(v, defaults::INTERVAL_BOUNDS));
        }
        if let Some(v) = file.window_size {
            self.window_size = clamp(v, defaults::WINDOW_SIZE_BOUNDS);
        }
        if let Some(v) = file.latency_window {
            self.latency_window = clamp(v, defaults::LATENCY_WINDOW_BOUNDS);
        }
        if let Some(v) = file.packet_loss_threshold {
            self.packet_loss_threshold_pct = v.clamp(0.0, 100.0);
        }
        if let Some(v) = file.avg_latency_threshold {
            self.avg_latency_threshold_ms = v.max(1.0);
        }
        if let Some(v) = file.jitter_threshold {
            self.jitter_threshold_ms = v.max(0.1);
        }
        if let Some(v) = file.consecutive_loss_threshold {
            self.consecutive_loss_threshold = v.clamp(1, 100);
        }
        if let Some(v) = file.enable_sound_alerts {
            self.enable_sound_alerts = v;
        }
        if let Some(v) = file.enable_quiet_hours {
            self.enable_quiet_hours = v;
        }
        if let Some(v) = file.quiet_hours_start {
            self.quiet_hours_start = v.min(23);
        }
        if let Some(v) = file.quiet_hours_end {
            self.quiet_hours_end = v.min(23);
        }
        if let Some(v) = file.enable_dns_monitoring {
            self.enable_dns_monitoring = v;
        }
        if let Some(ref v) = file.dns_test_domain {
            self.dns_test_domain = v.clone();
        }
        if let Some(ref v) = file.dns_record_types {
            let parsed = parse_record_types(v);
            if !parsed.is_empty() {
                self.dns_record_types = parsed;
            }
        }
        if let Some(v) = file.enable_dns_benchmark {
            self.enable_dns_benchmark = v;
        }
        if let Some(ref v) = file.dns_benchmark_servers {
            let parsed = parse_ip_list(v);
            if !parsed.is_empty() {
                self.dns_benchmark_servers = parsed;
            }
        }
        if let Some(v) = file.enable_mtu_monitoring {
            self.enable_mtu_monitoring = v;
        }
        if let Some(v) = file.enable_hop_monitoring {
            self.enable_hop_monitoring = v;
        }
        if let Some(v) = file.enable_auto_traceroute {
            self.enable_auto_traceroute = v;
        }
        if let Some(ref v) = file.metrics_addr {
            if let Ok(ip) = v.parse() {
                self.metrics_addr = ip;
            }
        }
        if let Some(ref v) = file.health_addr {
            if let Ok(ip) = v.parse() {
                self.health_addr = ip;
            }
        }
        if let Some(ref v) = file.surface_auth_token {
            self.surface_auth_token = Some(v.clone());
        }
        if let Some(v) = file.allow_insecure_bind {
            self.allow_insecure_bind = v;
        }
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_str("TARGET_IP") {
            if let Ok(ip) = v.parse() {
                self.target = ip;
            } else {
                // Leave the bad string in place for validate() to reject:
                // a misconfigured target must exit 2, not silently default.
                self.target_override_invalid = true;
            }
        }
        if let Some(v) = env_num::<u64>("INTERVAL") {
            self.interval = Duration::from_secs(clamp(v, defaults::INTERVAL_BOUNDS));
        }
        if let Some(v) = env_num::<usize>("WINDOW_SIZE") {
            self.window_size = clamp(v, defaults::WINDOW_SIZE_BOUNDS);
        }
        if let Some(v) = env_num::<usize>("LATENCY_WINDOW") {
            self.latency_window = clamp(v, defaults::LATENCY_WINDOW_BOUNDS);
        }
        if let Some(v) = env_num::<f64>("PACKET_LOSS_THRESHOLD") {
            self.packet_loss_threshold_pct = v.clamp(0.0, 100.0);
        }
        if let Some(v) = env_num::<f64>("AVG_LATENCY_THRESHOLD") {
            self.avg_latency_threshold_ms = v.max(1.0);
        }
        if let Some(v) = env_num::<f64>("JITTER_THRESHOLD") {
            self.jitter_threshold_ms = v.max(0.1);
        }
        if let Some(v) = env_num::<u32>("CONSECUTIVE_LOSS_THRESHOLD") {
            self.consecutive_loss_threshold = v.clamp(1, 100);
        }
        if let Some(v) = env_bool("ENABLE_SOUND_ALERTS") {
            self.enable_sound_alerts = v;
        }
        if let Some(v) = env_num::<u64>("ALERT_COOLDOWN") {
            self.alert_cooldown = Duration::from_secs(v.clamp(1, 3600));
        }
        if let Some(v) = env_bool("ENABLE_QUIET_HOURS") {
            self.enable_quiet_hours = v;
        }
        if let Some(v) = env_num::<u8>("QUIET_HOURS_START") {
            self.quiet_hours_start = v.min(23);
        }
        if let Some(v) = env_num::<u8>("QUIET_HOURS_END") {
            self.quiet_hours_end = v.min(23);
        }
        if let Some(v) = env_num::<u64>("SMART_ALERT_ESCALATION_MINUTES") {
            self.alert_escalation_minutes = v.clamp(1, 1440);
        }
        if let Some(v) = env_num::<u32>("SMART_ALERT_RATE_LIMIT_PER_MIN") {
            self.alert_rate_limit_per_min = v.clamp(1, 600);
        }
        if let Some(v) = env_num::<u32>("SMART_ALERT_RATE_LIMIT_BURST") {
            self.alert_rate_limit_burst = v.clamp(1, 100);
        }
        if let Some(v) = env_num::<usize>("SMART_ALERT_BASELINE_MIN_SAMPLES") {
            self.baseline_min_samples = v.clamp(5, 10_000);
        }
        if let Some(v) = env_num::<f64>("SMART_ALERT_BASELINE_SIGMA_K") {
            self.baseline_sigma_k = v.clamp(1.0, 10.0);
        }
        if let Some(v) = env_bool("ENABLE_DNS_MONITORING") {
            self.enable_dns_monitoring = v;
        }
        if let Some(v) = env_str("DNS_TEST_DOMAIN") {
            self.dns_test_domain = v;
        }
        if let Some(v) = env_str("DNS_RECORD_TYPES") {
            let parsed = parse_record_types(&v);
            if !parsed.is_empty() {
                self.dns_record_types = parsed;
            }
        }
        if let Some(v) = env_num::<u64>("DNS_CHECK_INTERVAL") {
            self.dns_check_interval = Duration::from_secs(v.clamp(10, 3600));
        }
        if let Some(v) = env_num::<f64>("DNS_SLOW_THRESHOLD") {
            self.dns_slow_threshold_ms = v.max(1.0);
        }
        if let Some(v) = env_num::<u64>("DNS_TIMEOUT") {
            self.dns_timeout = Duration::from_secs(v.clamp(1, 30));
        }
        if let Some(v) = env_bool("ENABLE_DNS_BENCHMARK") {
            self.enable_dns_benchmark = v;
        }
        if let Some(v) = env_str("DNS_BENCHMARK_SERVERS") {
            let parsed = parse_ip_list(&v);
            if !parsed.is_empty() {
                self.dns_benchmark_servers = parsed;
            }
        }
        if let Some(v) = env_num::<usize>("DNS_BENCHMARK_HISTORY_SIZE") {
            self.dns_benchmark_history_size = v.clamp(5, 500);
        }
        if let Some(v) = env_bool("ENABLE_MTU_MONITORING") {
            self.enable_mtu_monitoring = v;
        }
        if let Some(v) = env_num::<u64>("MTU_CHECK_INTERVAL") {
            self.mtu_check_interval = Duration::from_secs(v.clamp(60, 86_400));
        }
        if let Some(v) = env_num::<u32>("MTU_ISSUE_CONSECUTIVE") {
            self.mtu_issue_consecutive = v.clamp(1, 20);
        }
        if let Some(v) = env_num::<u32>("MTU_CLEAR_CONSECUTIVE") {
            self.mtu_clear_consecutive = v.clamp(1, 20);
        }
        if let Some(v) = env_bool("ENABLE_HOP_MONITORING") {
            self.enable_hop_monitoring = v;
        }
        if let Some(v) = env_num::<u64>("HOP_PING_INTERVAL") {
            self.hop_ping_interval = Duration::from_secs(v.clamp(1, 600));
        }
        if let Some(v) = env_num::<u64>("HOP_PING_TIMEOUT") {
            self.hop_ping_timeout = Duration::from_secs(v.clamp(1, 30));
        }
        if let Some(v) = env_num::<u64>("HOP_REDISCOVER_INTERVAL") {
            self.hop_rediscover_interval = Duration::from_secs(v.clamp(60, 86_400));
        }
        if let Some(v) = env_num::<f64>("HOP_LATENCY_GOOD") {
            self.hop_latency_good_ms = v.max(1.0);
        }
        if let Some(v) = env_num::<f64>("HOP_LATENCY_WARN") {
            self.hop_latency_warn_ms = v.max(self.hop_latency_good_ms);
        }
        if let Some(v) = env_bool("ENABLE_AUTO_TRACEROUTE") {
            self.enable_auto_traceroute = v;
        }
        if let Some(v) = env_num::<u32>("TRACEROUTE_TRIGGER_LOSSES") {
            self.traceroute_trigger_losses = v.clamp(1, 100);
        }
        if let Some(v) = env_num::<u64>("TRACEROUTE_COOLDOWN") {
            self.traceroute_cooldown = Duration::from_secs(v.clamp(30, 86_400));
        }
        if let Some(v) = env_num::<u8>("TRACEROUTE_MAX_HOPS") {
            self.traceroute_max_hops = v.clamp(1, 64);
        }
        if let Some(v) = env_num::<u64>("IP_CHECK_INTERVAL") {
            self.ip_check_interval = Duration::from_secs(v.clamp(60, 86_400));
        }
        if let Some(v) = env_str("IP_PROVIDERS") {
            let providers: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !providers.is_empty() {
                self.ip_providers = providers;
            }
        }
        if let Some(v) = env_str("METRICS_ADDR") {
            if let Ok(ip) = v.parse() {
                self.metrics_addr = ip;
            }
        }
        if let Some(v) = env_num::<u16>("METRICS_PORT") {
            self.metrics_port = v;
        }
        if let Some(v) = env_str("HEALTH_ADDR") {
            if let Ok(ip) = v.parse() {
                self.health_addr = ip;
            }
        }
        if let Some(v) = env_num::<u16>("HEALTH_PORT") {
            self.health_port = v;
        }
        if let Some(v) = env_str("SURFACE_AUTH_TOKEN") {
            if !v.is_empty() {
                self.surface_auth_token = Some(v);
            }
        }
        if let Some(v) = env_bool("ALLOW_INSECURE_BIND") {
            self.allow_insecure_bind = v;
        }
        if let Some(v) = env_bool("ENABLE_RAW_PING_FALLBACK") {
            self.enable_raw_ping_fallback = v;
        }
    }

    /// Startup-fatal checks. Everything else clamps.
    fn validate(&self) -> Result<(), MonitorError> {
        if self.target_override_invalid {
            return Err(MonitorError::ConfigError(
                "TARGET_IP is not a valid IP address".to_string(),
            ));
        }
        for addr in [self.metrics_addr, self.health_addr] {
            if !addr.is_loopback() && self.surface_auth_token.is_none() && !self.allow_insecure_bind
            {
                return Err(MonitorError::ConfigError(format!(
                    "refusing non-loopback bind {} without SURFACE_AUTH_TOKEN or ALLOW_INSECURE_BIND",
                    addr
                )));
            }
        }
        Ok(())
    }

    pub fn quiet_hours_active(&self, hour: u8) -> bool {
        if !self.enable_quiet_hours {
            return false;
        }
        let (start, end) = (self.quiet_hours_start, self.quiet_hours_end);
        if start <= end {
            hour >= start && hour < end
        } else {
            // Window wraps midnight, e.g. 22..7
            hour >= start || hour < end
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("netpulse")
}

fn load_file_layer() -> FileConfig {
    let path = std::env::var("NETPULSE_CONFIG")
        .map(PathBuf::from)
        .ok()
        .or_else(|| dirs::config_dir().map(|d| d.join("netpulse").join("netpulse.toml")));
    let Some(path) = path else {
        return FileConfig::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(raw) => toml::from_str(&raw).unwrap_or_default(),
        Err(_) => FileConfig::default(),
    }
}

fn clamp<T: Ord + Copy>(v: T, bounds: (T, T)) -> T {
    v.max(bounds.0).min(bounds.1)
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_num<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_str(name).and_then(|v| v.trim().parse().ok())
}

/// Strict boolean parsing: only "true"/"false" (case insensitive).
fn env_bool(name: &str) -> Option<bool> {
    env_str(name).and_then(|v| match v.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    })
}

fn parse_record_types(raw: &str) -> Vec<DnsRecordType> {
    raw.split(',').filter_map(DnsRecordType::parse).collect()
}

fn parse_ip_list(raw: &str) -> Vec<IpAddr> {
    raw.split(',').filter_map(|s| s.trim().parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_are_self_consistent() {
        let cfg = Config::default();
        assert_eq!(cfg.interval, Duration::from_secs(1));
        assert!(cfg.window_size >= cfg.latency_window);
        assert_eq!(cfg.dns_benchmark_servers.len(), 2);
        assert!(!cfg.quiet_hours_active(23));
    }

    #[test]
    #[serial]
    fn env_overrides_and_clamps() {
        std::env::set_var("INTERVAL", "0");
        std::env::set_var("CONSECUTIVE_LOSS_THRESHOLD", "3");
        std::env::set_var("ENABLE_DNS_BENCHMARK", "false");
        let mut cfg = Config::default();
        cfg.apply_env();
        std::env::remove_var("INTERVAL");
        std::env::remove_var("CONSECUTIVE_LOSS_THRESHOLD");
        std::env::remove_var("ENABLE_DNS_BENCHMARK");

        // 0 clamps up to the lower bound
        assert_eq!(cfg.interval, Duration::from_secs(1));
        assert_eq!(cfg.consecutive_loss_threshold, 3);
        assert!(!cfg.enable_dns_benchmark);
    }

    #[test]
    #[serial]
    fn invalid_target_is_fatal() {
        std::env::set_var("TARGET_IP", "not-an-ip");
        let mut cfg = Config::default();
        cfg.apply_env();
        std::env::remove_var("TARGET_IP");
        assert!(cfg.validate().is_err());
    }

    #[test]
    #[serial]
    fn insecure_bind_requires_opt_in() {
        let mut cfg = Config::default();
        cfg.metrics_addr = "0.0.0.0".parse().unwrap();
        assert!(cfg.validate().is_err());
        cfg.surface_auth_token = Some("secret".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn quiet_hours_wrap_midnight() {
        let mut cfg = Config::default();
        cfg.enable_quiet_hours = true;
        cfg.quiet_hours_start = 22;
        cfg.quiet_hours_end = 7;
        assert!(cfg.quiet_hours_active(23));
        assert!(cfg.quiet_hours_active(3));
        assert!(!cfg.quiet_hours_active(12));
    }
}
