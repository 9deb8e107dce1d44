// Traceroute output parsing for both Unix traceroute and Windows tracert.
//
// Only numeric output is ever requested (-n / -d), so a hop line is a hop
// index followed by either an address or timeout markers. Everything that
// does not look like a hop line (headers, "Trace complete.") is skipped.

use crate::core::monitor::types::RouteHop;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::OnceLock;

fn hop_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d{1,2})\s+(.*)$").expect("static regex"))
}

fn ip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // v4 dotted quad or a colon-grouped v6; validation happens via parse()
        Regex::new(r"([0-9]{1,3}(?:\.[0-9]{1,3}){3}|[0-9a-fA-F:]*:[0-9a-fA-F:]+)")
            .expect("static regex")
    })
}

/// Parse traceroute/tracert stdout into an ordered hop list. Hops that
/// never answered carry `ip: None`.
pub fn parse_traceroute(stdout: &str) -> Vec<RouteHop> {
    let mut hops: Vec<RouteHop> = Vec::new();
    for line in stdout.lines() {
        let Some(caps) = hop_line_re().captures(line) else {
            continue;
        };
        let Ok(index) = caps[1].parse::<u8>() else {
            continue;
        };
        let rest = &caps[2];

        let ip: Option<IpAddr> = ip_re()
            .captures_iter(rest)
            .filter_map(|c| c[1].parse().ok())
            .next();

        // A line with neither address nor timeout marker is not a hop line
        if ip.is_none() && !rest.contains('*') && !rest.to_lowercase().contains("timed out") {
            continue;
        }

        // traceroute repeats an index when a hop answers from two addresses;
        // first answer wins
        if hops.iter().any(|h| h.index == index) {
            continue;
        }

        hops.push(RouteHop {
            index,
            ip,
            hostname: None,
        });
    }
    hops.sort_by_key(|h| h.index);
    hops
}

/// Stable route identity: hash over the ordered hop addresses, `*` for
/// silent positions. Identical hop sequences produce identical
/// fingerprints; any single hop change flips it.
pub fn route_fingerprint(hops: &[RouteHop]) -> String {
    let mut hasher = Sha256::new();
    for hop in hops {
        match hop.ip {
            Some(ip) => hasher.update(ip.to_string().as_bytes()),
            None => hasher.update(b"*"),
        }
        hasher.update(b"|");
    }
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIX_OUTPUT: &str = "\
traceroute to 1.1.1.1 (1.1.1.1), 30 hops max, 60 byte packets
 1  192.168.1.1  1.123 ms  0.987 ms  1.045 ms
 2  * * *
 3  10.10.0.1  5.210 ms  5.401 ms *
 4  1.1.1.1  11.008 ms  10.94 ms  11.2 ms
";

    const WINDOWS_OUTPUT: &str = "\
Tracing route to 1.1.1.1 over a maximum of 30 hops\r
\r
  1    <1 ms    <1 ms    <1 ms  192.168.1.1\r
  2     *        *        *     Request timed out.\r
  3     5 ms     6 ms     5 ms  10.10.0.1\r
  4    11 ms    11 ms    11 ms  1.1.1.1\r
\r
Trace complete.\r
";

    #[test]
    fn parses_unix_traceroute() {
        let hops = parse_traceroute(UNIX_OUTPUT);
        assert_eq!(hops.len(), 4);
        assert_eq!(hops[0].ip.unwrap().to_string(), "192.168.1.1");
        assert!(hops[1].ip.is_none());
        assert_eq!(hops[2].ip.unwrap().to_string(), "10.10.0.1");
        assert_eq!(hops[3].index, 4);
    }

    #[test]
    fn parses_windows_tracert() {
        let hops = parse_traceroute(WINDOWS_OUTPUT);
        assert_eq!(hops.len(), 4);
        assert_eq!(hops[0].ip.unwrap().to_string(), "192.168.1.1");
        assert!(hops[1].ip.is_none());
        assert_eq!(hops[3].ip.unwrap().to_string(), "1.1.1.1");
    }

    #[test]
    fn fingerprint_is_order_sensitive_and_stable() {
        let a = parse_traceroute(UNIX_OUTPUT);
        let b = parse_traceroute(UNIX_OUTPUT);
        assert_eq!(route_fingerprint(&a), route_fingerprint(&b));

        let mut changed = a.clone();
        changed[2].ip = Some("10.10.0.99".parse().unwrap());
        assert_ne!(route_fingerprint(&a), route_fingerprint(&changed));

        let mut reordered = a.clone();
        reordered.swap(0, 3);
        assert_ne!(route_fingerprint(&a), route_fingerprint(&reordered));
    }

    #[test]
    fn timeout_position_affects_fingerprint() {
        let a = parse_traceroute(UNIX_OUTPUT);
        let mut silenced = a.clone();
        silenced[0].ip = None;
        assert_ne!(route_fingerprint(&a), route_fingerprint(&silenced));
    }
}
