// Alert entities, groups and the repository-owned alert book.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};

/// What went wrong. Drives fingerprints, grouping and sound selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ConnectionLost,
    PacketLoss,
    HighLatency,
    HighJitter,
    DnsDegraded,
    MtuIssue,
    RouteChanged,
    IpChanged,
    UpdateAvailable,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionLost => "connection_lost",
            Self::PacketLoss => "packet_loss",
            Self::HighLatency => "high_latency",
            Self::HighJitter => "high_jitter",
            Self::DnsDegraded => "dns_degraded",
            Self::MtuIssue => "mtu_issue",
            Self::RouteChanged => "route_changed",
            Self::IpChanged => "ip_changed",
            Self::UpdateAvailable => "update_available",
        }
    }

    /// Root-cause map for the grouping stage: when an alert of this kind is
    /// active, alerts of the returned kinds are effects and get folded into
    /// its group instead of standing alone.
    pub fn suppresses(&self) -> &'static [AlertKind] {
        match self {
            Self::ConnectionLost => &[Self::PacketLoss, Self::HighLatency, Self::HighJitter],
            Self::RouteChanged => &[Self::HighJitter],
            _ => &[],
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Priority from the scoring stage; distinct from severity (which reflects
/// the underlying condition, not the routing urgency).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Lifecycle: pending -> active -> recovered -> archived.
/// Only `Active` is user-visible; `Archived` lives in bounded history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Pending,
    Active,
    Recovered,
    Archived,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AlertEntity {
    pub id: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub priority: AlertPriority,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub fingerprint: String,
    pub suppression_count: u64,
    pub state: AlertState,
    pub recovered_at: Option<DateTime<Utc>>,
}

impl AlertEntity {
    pub fn new(
        kind: AlertKind,
        severity: AlertSeverity,
        message: String,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            severity,
            priority: AlertPriority::Low,
            message,
            created_at: now,
            last_seen_at: now,
            fingerprint: fingerprint(kind, subject),
            suppression_count: 0,
            state: AlertState::Pending,
            recovered_at: None,
        }
    }
}

/// Alerts sharing a root cause, collapsed within a temporal window.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AlertGroup {
    pub leader_fingerprint: String,
    pub root_cause: AlertKind,
    pub members: HashSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Per-fingerprint fatigue suppression: next earliest re-emission and the
/// index into the escalation schedule. Cooldowns only grow while an
/// incident stays active.
#[derive(Debug, Clone, Default)]
pub struct FatigueState {
    pub next_emit_at: Option<DateTime<Utc>>,
    pub streak: usize,
}

/// The alert sub-state owned by the repository behind its own lock.
#[derive(Debug)]
pub struct AlertBook {
    alerts: Vec<AlertEntity>,
    history: VecDeque<AlertEntity>,
    groups: Vec<AlertGroup>,
    fatigue: HashMap<String, FatigueState>,
    pub sound_pending: Option<AlertKind>,
    history_bound: usize,
}

impl AlertBook {
    pub fn new(history_bound: usize) -> Self {
        Self {
            alerts: Vec::new(),
            history: VecDeque::new(),
            groups: Vec::new(),
            fatigue: HashMap::new(),
            sound_pending: None,
            history_bound,
        }
    }

    /// Admit an entity. An existing live alert with the same fingerprint is
    /// bumped (last-seen, suppression count, monotonic severity) instead of
    /// duplicated.
    pub fn admit(&mut self, entity: AlertEntity) {
        if let Some(existing) = self
            .alerts
            .iter_mut()
            .find(|a| a.fingerprint == entity.fingerprint && a.state != AlertState::Recovered)
        {
            existing.last_seen_at = existing.last_seen_at.max(entity.last_seen_at);
            existing.suppression_count += 1;
            // Severity is monotonic within a live alert
            if entity.severity > existing.severity {
                existing.severity = entity.severity;
            }
            if entity.priority > existing.priority {
                existing.priority = entity.priority;
            }
            if existing.state == AlertState::Pending {
                existing.state = AlertState::Active;
            }
            return;
        }
        let mut entity = entity;
        entity.state = AlertState::Active;
        self.alerts.push(entity);
    }

    pub fn active(&self) -> impl Iterator<Item = &AlertEntity> {
        self.alerts.iter().filter(|a| a.state == AlertState::Active)
    }

    pub fn find_live(&self, fingerprint: &str) -> Option<&AlertEntity> {
        self.alerts
            .iter()
            .find(|a| a.fingerprint == fingerprint && a.state == AlertState::Active)
    }

    pub fn live_mut(&mut self) -> impl Iterator<Item = &mut AlertEntity> {
        self.alerts
            .iter_mut()
            .filter(|a| a.state == AlertState::Active)
    }

    /// Transition one live alert to recovered and archive it.
    pub fn recover(&mut self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        let Some(pos) = self
            .alerts
            .iter()
            .position(|a| a.fingerprint == fingerprint && a.state == AlertState::Active)
        else {
            return false;
        };
        let mut alert = self.alerts.remove(pos);
        alert.recovered_at = Some(now);
        // Recovered is transient; what history keeps is the archived form
        alert.state = AlertState::Archived;
        self.history.push_back(alert);
        while self.history.len() > self.history_bound {
            self.history.pop_front();
        }
        self.fatigue.remove(fingerprint);
        self.groups.retain(|g| g.leader_fingerprint != fingerprint);
        true
    }

    /// Drop archived alerts older than the retention window.
    pub fn clean(&mut self, now: DateTime<Utc>, max_age_secs: i64) {
        self.history
            .retain(|a| (now - a.last_seen_at).num_seconds() <= max_age_secs);
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> impl Iterator<Item = &AlertEntity> {
        self.history.iter()
    }

    pub fn fatigue_mut(&mut self, fingerprint: &str) -> &mut FatigueState {
        self.fatigue.entry(fingerprint.to_string()).or_default()
    }

    pub fn groups(&self) -> &[AlertGroup] {
        &self.groups
    }

    /// Fold `member` into the group led by `leader`, creating the group on
    /// first use.
    pub fn group_under(
        &mut self,
        leader_fingerprint: &str,
        root_cause: AlertKind,
        member_fingerprint: &str,
        now: DateTime<Utc>,
    ) {
        if let Some(group) = self
            .groups
            .iter_mut()
            .find(|g| g.leader_fingerprint == leader_fingerprint)
        {
            group.members.insert(member_fingerprint.to_string());
            group.last_seen = group.last_seen.max(now);
            return;
        }
        let mut members = HashSet::new();
        members.insert(member_fingerprint.to_string());
        self.groups.push(AlertGroup {
            leader_fingerprint: leader_fingerprint.to_string(),
            root_cause,
            members,
            first_seen: now,
            last_seen: now,
        });
    }
}

/// Stable alert identity: hash of (kind, normalized subject).
pub fn fingerprint(kind: AlertKind, subject: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(normalize_subject(subject).as_bytes());
    let digest = hasher.finalize();
    // 16 hex chars are plenty for in-process identity
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Case-fold and collapse whitespace so cosmetic message differences do not
/// split identities.
pub fn normalize_subject(subject: &str) -> String {
    subject
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaccard similarity over case-folded word tokens. Long digit runs
/// (timestamps, counters) are dropped before comparison so two messages
/// differing only in a timestamp still match.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let tokens = |s: &str| -> HashSet<String> {
        s.to_lowercase()
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '.'))
            .filter(|t| !t.is_empty())
            .filter(|t| !(t.len() >= 4 && t.chars().all(|c| c.is_ascii_digit())))
            .map(str::to_string)
            .collect()
    };
    let (ta, tb) = (tokens(a), tokens(b));
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monitor::types::utc_now;

    #[test]
    fn fingerprint_is_stable_and_normalized() {
        let a = fingerprint(AlertKind::PacketLoss, "Loss on  Target 1.1.1.1");
        let b = fingerprint(AlertKind::PacketLoss, "loss on target 1.1.1.1");
        let c = fingerprint(AlertKind::HighLatency, "loss on target 1.1.1.1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn admit_dedups_and_keeps_severity_monotonic() {
        let mut book = AlertBook::new(10);
        let now = utc_now();
        let base = AlertEntity::new(
            AlertKind::PacketLoss,
            AlertSeverity::Warning,
            "loss 6%".into(),
            "target",
            now,
        );
        book.admit(base.clone());
        let mut repeat = base.clone();
        repeat.severity = AlertSeverity::Critical;
        book.admit(repeat);
        let mut downgrade = base.clone();
        downgrade.severity = AlertSeverity::Info;
        book.admit(downgrade);

        let active: Vec<_> = book.active().collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].severity, AlertSeverity::Critical);
        assert_eq!(active[0].suppression_count, 2);
    }

    #[test]
    fn recover_moves_to_bounded_history() {
        let mut book = AlertBook::new(2);
        let now = utc_now();
        for i in 0..4 {
            let e = AlertEntity::new(
                AlertKind::HighLatency,
                AlertSeverity::Warning,
                format!("spike {}", i),
                &format!("subject-{}", i),
                now,
            );
            let fp = e.fingerprint.clone();
            book.admit(e);
            assert!(book.recover(&fp, now));
        }
        assert_eq!(book.history_len(), 2);
        assert_eq!(book.active().count(), 0);
    }

    #[test]
    fn jaccard_near_duplicates() {
        let a = "packet loss 6.2% on target 1.1.1.1 window 1800";
        let b = "packet loss 6.3% on target 1.1.1.1 window 1800";
        assert!(jaccard_similarity(a, b) >= 0.85);
        let c = "dns benchmark reliability degraded on 8.8.8.8";
        assert!(jaccard_similarity(a, c) < 0.5);
    }

    #[test]
    fn jaccard_ignores_long_digit_runs() {
        let a = "outage started at 1716200000 on link";
        let b = "outage started at 1716200300 on link";
        assert_eq!(jaccard_similarity(a, b), 1.0);
    }

    #[test]
    fn root_cause_map() {
        assert!(AlertKind::ConnectionLost
            .suppresses()
            .contains(&AlertKind::PacketLoss));
        assert!(AlertKind::DnsDegraded.suppresses().is_empty());
    }
}
