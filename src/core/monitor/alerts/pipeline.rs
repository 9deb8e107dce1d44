/*!
Smart-alert pipeline: raw threshold crossings in, de-noised alerts out.

Stages, applied in order per tick:

1. Adaptive thresholds (static until warm-up, then mean + k*sigma /
   p95 per hour-of-day baseline)
2. Per-fingerprint token-bucket rate limiting
3. Priority scoring with age-based escalation
4. Fingerprint + Jaccard near-duplicate deduplication
5. Root-cause grouping (e.g. connection-lost suppresses packet-loss and
   high-latency members)
6. Auto-recovery after three consecutive false evaluations
7. Fatigue suppression on the {1,3,5,15,30}-minute escalation schedule
8. Quiet hours (sound suppressed, visual entries still recorded)

The pipeline owns its baselines and rate limiter behind their own locks;
alert entities themselves live in the repository's alert book.
*/

use crate::config::Config;
use crate::core::monitor::alerts::baseline::AdaptiveBaseline;
use crate::core::monitor::alerts::types::*;
use crate::core::monitor::debug_logger::get_debug_logger;
use crate::core::monitor::dns::score::{dns_score, DnsScoreInputs};
use crate::core::monitor::repository::{StatsRepository, StatsSnapshot};
use crate::core::monitor::types::DnsScoreBucket;
use chrono::{DateTime, Timelike, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub static_latency_ms: f64,
    pub static_jitter_ms: f64,
    pub static_loss_pct: f64,
    pub sigma_k: f64,
    pub min_samples: usize,
    pub rate_per_min: u32,
    pub burst: u32,
    pub escalation_minutes: u64,
    pub dedup_window_secs: i64,
    pub near_dup_jaccard: f64,
    pub recovery_evals: u32,
    pub fatigue_schedule_min: Vec<u64>,
    pub quiet_hours: Option<(u8, u8)>,
    pub sound_enabled: bool,
    pub dns_slow_threshold_ms: f64,
    pub history_retention_secs: i64,
}

impl PipelineConfig {
    pub fn from_config(cfg: &Config) -> Self {
        use crate::config::defaults as d;
        Self {
            static_latency_ms: cfg.avg_latency_threshold_ms,
            static_jitter_ms: cfg.jitter_threshold_ms,
            static_loss_pct: cfg.packet_loss_threshold_pct,
            sigma_k: cfg.baseline_sigma_k,
            min_samples: cfg.baseline_min_samples,
            rate_per_min: cfg.alert_rate_limit_per_min,
            burst: cfg.alert_rate_limit_burst,
            escalation_minutes: cfg.alert_escalation_minutes,
            dedup_window_secs: d::ALERT_DEDUP_WINDOW_SECS as i64,
            near_dup_jaccard: d::ALERT_NEAR_DUP_JACCARD,
            recovery_evals: d::ALERT_RECOVERY_EVALS,
            fatigue_schedule_min: d::ALERT_FATIGUE_SCHEDULE_MIN.to_vec(),
            quiet_hours: cfg
                .enable_quiet_hours
                .then_some((cfg.quiet_hours_start, cfg.quiet_hours_end)),
            sound_enabled: cfg.enable_sound_alerts,
            dns_slow_threshold_ms: cfg.dns_slow_threshold_ms,
            history_retention_secs: 24 * 3600,
        }
    }
}

/// Token bucket; refills continuously at `rate_per_min`.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    fn try_take(&mut self, now: DateTime<Utc>, rate_per_min: u32, burst: u32) -> bool {
        let elapsed = (now - self.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * rate_per_min as f64 / 60.0).min(burst as f64);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// A threshold crossing or edge event entering the pipeline.
#[derive(Debug, Clone)]
pub struct RawAlert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub subject: String,
    pub message: String,
}

struct Baselines {
    latency: AdaptiveBaseline,
    jitter: AdaptiveBaseline,
    loss: AdaptiveBaseline,
}

pub struct SmartAlertPipeline {
    cfg: PipelineConfig,
    repo: Arc<StatsRepository>,
    baselines: Mutex<Baselines>,
    /// Rate-limiter state behind its own lock (never nested into the
    /// repository lock)
    buckets: Mutex<HashMap<String, TokenBucket>>,
    /// Consecutive false evaluations per live fingerprint
    false_runs: Mutex<HashMap<String, u32>>,
    /// Recently admitted (fingerprint, message, at) for near-dup lookup
    recent: Mutex<VecDeque<(String, String, DateTime<Utc>)>>,
    /// Edge events queued by other workers for the next tick
    pending_events: Mutex<Vec<RawAlert>>,
}

impl SmartAlertPipeline {
    pub fn new(cfg: PipelineConfig, repo: Arc<StatsRepository>) -> Self {
        let min = cfg.min_samples;
        Self {
            cfg,
            repo,
            baselines: Mutex::new(Baselines {
                latency: AdaptiveBaseline::new(min),
                jitter: AdaptiveBaseline::new(min),
                loss: AdaptiveBaseline::new(min),
            }),
            buckets: Mutex::new(HashMap::new()),
            false_runs: Mutex::new(HashMap::new()),
            recent: Mutex::new(VecDeque::new()),
            pending_events: Mutex::new(Vec::new()),
        }
    }

    /// Queue an edge-triggered alert (route change, IP change) for the next
    /// evaluation. Level conditions are derived from snapshots instead.
    pub fn raise_event(&self, raw: RawAlert) {
        self.pending_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(raw);
    }

    /// One full pipeline evaluation.
    pub fn tick(&self, now: DateTime<Utc>) {
        let snapshot = self.repo.snapshot();

        // Stage 1: feed baselines and resolve today's thresholds
        let (latency_thr, jitter_thr, loss_thr) = {
            let mut b = self.baselines.lock().unwrap_or_else(|e| e.into_inner());
            if snapshot.counters.sent > 0 && !snapshot.connection_lost {
                if snapshot.avg_latency_ms > 0.0 {
                    b.latency.observe(now, snapshot.avg_latency_ms);
                }
                b.jitter.observe(now, snapshot.jitter_ema_ms);
                b.loss.observe(now, snapshot.loss_pct_30m);
            }
            (
                b.latency
                    .sigma_threshold(now, self.cfg.sigma_k, self.cfg.static_latency_ms),
                b.jitter
                    .sigma_threshold(now, self.cfg.sigma_k, self.cfg.static_jitter_ms),
                b.loss.p95_threshold(now, self.cfg.static_loss_pct),
            )
        };

        let conditions = self.evaluate_conditions(&snapshot, latency_thr, jitter_thr, loss_thr);

        let mut raws: Vec<RawAlert> = conditions
            .iter()
            .filter(|c| c.active)
            .map(|c| c.raw.clone())
            .collect();
        raws.extend(
            self.pending_events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .drain(..),
        );

        for raw in raws {
            self.process_raw(raw, now);
        }

        // Stage 6: recovery for live alerts whose condition has gone quiet
        self.recovery_pass(&conditions, now);

        self.repo
            .clean_old_alerts(now, self.cfg.history_retention_secs);
    }

    fn evaluate_conditions(
        &self,
        snapshot: &StatsSnapshot,
        latency_thr: f64,
        jitter_thr: f64,
        loss_thr: f64,
    ) -> Vec<Condition> {
        let mut out = Vec::new();
        let target = snapshot.target.clone();

        out.push(Condition {
            active: snapshot.connection_lost,
            raw: RawAlert {
                kind: AlertKind::ConnectionLost,
                severity: AlertSeverity::Critical,
                subject: target.clone(),
                message: format!(
                    "connection to {} lost after {} consecutive failures",
                    target, snapshot.counters.consecutive_lost
                ),
            },
        });

        out.push(Condition {
            active: !snapshot.connection_lost && snapshot.loss_pct_30m > loss_thr,
            raw: RawAlert {
                kind: AlertKind::PacketLoss,
                severity: if snapshot.loss_pct_30m > loss_thr * 3.0 {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::Warning
                },
                subject: target.clone(),
                message: format!(
                    "packet loss {:.1}% over 30m exceeds {:.1}%",
                    snapshot.loss_pct_30m, loss_thr
                ),
            },
        });

        out.push(Condition {
            active: !snapshot.connection_lost
                && snapshot.avg_latency_ms > latency_thr
                && !snapshot.latency_window_ms.is_empty(),
            raw: RawAlert {
                kind: AlertKind::HighLatency,
                severity: AlertSeverity::Warning,
                subject: target.clone(),
                message: format!(
                    "average latency {:.0}ms exceeds {:.0}ms",
                    snapshot.avg_latency_ms, latency_thr
                ),
            },
        });

        out.push(Condition {
            active: !snapshot.connection_lost && snapshot.jitter_ema_ms > jitter_thr,
            raw: RawAlert {
                kind: AlertKind::HighJitter,
                severity: AlertSeverity::Warning,
                subject: target.clone(),
                message: format!(
                    "jitter {:.1}ms exceeds {:.1}ms",
                    snapshot.jitter_ema_ms, jitter_thr
                ),
            },
        });

        let dns = dns_score(&DnsScoreInputs::from_snapshot(
            snapshot,
            self.cfg.dns_slow_threshold_ms,
        ));
        out.push(Condition {
            active: dns.bucket <= DnsScoreBucket::Poor && !snapshot.dns_records.is_empty(),
            raw: RawAlert {
                kind: AlertKind::DnsDegraded,
                severity: AlertSeverity::Warning,
                subject: "resolver".into(),
                message: format!("dns health score {:.0} in bucket {:?}", dns.score, dns.bucket),
            },
        });

        out.push(Condition {
            active: snapshot.mtu.issue,
            raw: RawAlert {
                kind: AlertKind::MtuIssue,
                severity: AlertSeverity::Warning,
                subject: target,
                message: format!(
                    "path MTU {} below link MTU {}",
                    snapshot
                        .mtu
                        .path_mtu
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "unknown".into()),
                    snapshot.mtu.link_mtu
                ),
            },
        });

        out
    }

    /// Stages 2-5, 7, 8 for one raw alert.
    fn process_raw(&self, raw: RawAlert, now: DateTime<Utc>) {
        let fp = fingerprint(raw.kind, &raw.subject);

        // Stage 5: an active root-cause leader absorbs effects entirely;
        // they join its group instead of standing alone.
        let absorbed = self.repo.with_alert_book(|book| {
            let leader = book
                .active()
                .find(|a| a.kind.suppresses().contains(&raw.kind))
                .map(|a| (a.fingerprint.clone(), a.kind));
            if let Some((leader_fp, leader_kind)) = leader {
                book.group_under(&leader_fp, leader_kind, &fp, now);
                if let Some(existing) = book.live_mut().find(|a| a.fingerprint == leader_fp) {
                    existing.last_seen_at = existing.last_seen_at.max(now);
                }
                true
            } else {
                false
            }
        });
        if absorbed {
            return;
        }

        // Stage 4a: an ongoing incident with the same fingerprint is bumped,
        // never duplicated; whether it re-notifies is the fatigue stage's call.
        let ongoing = self.repo.with_alert_book(|book| {
            if let Some(existing) = book.live_mut().find(|a| {
                a.fingerprint == fp
                    && (now - a.last_seen_at).num_seconds() <= self.cfg.dedup_window_secs
            }) {
                existing.last_seen_at = existing.last_seen_at.max(now);
                existing.suppression_count += 1;
                if raw.severity > existing.severity {
                    existing.severity = raw.severity;
                }
                true
            } else {
                false
            }
        });
        if ongoing {
            // Stage 7: re-emission follows the escalation schedule
            if self.fatigue_allows(&fp, now) && self.cfg.sound_enabled {
                if !self.quiet_hours_active(now) && raw.severity >= AlertSeverity::Warning {
                    // Stage 8 applied: quiet hours mute the re-notification
                    self.repo.trigger_alert_sound(raw.kind);
                }
            }
            return;
        }

        // Stage 4b: near-duplicate detection over recently emitted messages
        {
            let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            let near = recent.iter().find(|(other_fp, msg, at)| {
                *other_fp != fp
                    && (now - *at).num_seconds() <= self.cfg.dedup_window_secs
                    && jaccard_similarity(msg, &raw.message) >= self.cfg.near_dup_jaccard
            });
            if let Some((other_fp, _, _)) = near {
                let other_fp = other_fp.clone();
                drop(recent);
                self.repo.with_alert_book(|book| {
                    if let Some(existing) = book.live_mut().find(|a| a.fingerprint == other_fp) {
                        existing.suppression_count += 1;
                        existing.last_seen_at = existing.last_seen_at.max(now);
                    }
                });
                return;
            }
        }

        // Stage 2: token bucket per fingerprint for genuinely new emissions
        let allowed = {
            let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
            let bucket = buckets.entry(fp.clone()).or_insert(TokenBucket {
                tokens: self.cfg.burst as f64,
                last_refill: now,
            });
            bucket.try_take(now, self.cfg.rate_per_min, self.cfg.burst)
        };
        if !allowed {
            get_debug_logger().debug("AlertPipeline", "rate limit suppressed emission");
            return;
        }

        // Stage 3: priority scoring
        let mut entity =
            AlertEntity::new(raw.kind, raw.severity, raw.message.clone(), &raw.subject, now);
        entity.priority = score_priority(raw.kind, raw.severity, now);

        self.repo.add_alert(entity);
        // Start the fatigue clock so the next re-notification waits
        let _ = self.fatigue_allows(&fp, now);
        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            recent.push_back((fp.clone(), raw.message, now));
            while recent.len() > 64 {
                recent.pop_front();
            }
        }
        self.false_runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&fp);

        // Stage 8: sound policy
        if self.cfg.sound_enabled
            && raw.severity >= AlertSeverity::Warning
            && !self.quiet_hours_active(now)
        {
            self.repo.trigger_alert_sound(raw.kind);
        }
    }

    /// Consult and advance the per-fingerprint fatigue schedule. Returns
    /// true when a (re-)notification may fire now. The cooldown is
    /// monotonic non-decreasing while the incident stays active.
    fn fatigue_allows(&self, fp: &str, now: DateTime<Utc>) -> bool {
        let schedule = self.cfg.fatigue_schedule_min.clone();
        self.repo.with_alert_book(|book| {
            let fatigue = book.fatigue_mut(fp);
            if let Some(next) = fatigue.next_emit_at {
                if now < next {
                    return false;
                }
            }
            let step_min = schedule
                .get(fatigue.streak)
                .or_else(|| schedule.last())
                .copied()
                .unwrap_or(30);
            let proposed = now + chrono::Duration::minutes(step_min as i64);
            fatigue.next_emit_at = Some(match fatigue.next_emit_at {
                Some(prev) => prev.max(proposed),
                None => proposed,
            });
            fatigue.streak = (fatigue.streak + 1).min(schedule.len());
            true
        })
    }

    /// Stage 6 plus age-based priority escalation over all live alerts.
    fn recovery_pass(&self, conditions: &[Condition], now: DateTime<Utc>) {
        let active_kinds: HashMap<AlertKind, bool> =
            conditions.iter().map(|c| (c.raw.kind, c.active)).collect();

        let live: Vec<(String, AlertKind, DateTime<Utc>)> = self.repo.with_alert_book(|book| {
            book.active()
                .map(|a| (a.fingerprint.clone(), a.kind, a.created_at))
                .collect()
        });

        let mut to_recover = Vec::new();
        {
            let mut runs = self.false_runs.lock().unwrap_or_else(|e| e.into_inner());
            for (fp, kind, _) in &live {
                // Edge-triggered kinds have no level condition and age out
                // through the same three-strikes rule.
                let condition_now = active_kinds.get(kind).copied().unwrap_or(false);
                if condition_now {
                    runs.remove(fp);
                } else {
                    let run = runs.entry(fp.clone()).or_insert(0);
                    *run += 1;
                    if *run >= self.cfg.recovery_evals {
                        to_recover.push(fp.clone());
                    }
                }
            }
            runs.retain(|fp, _| live.iter().any(|(l, _, _)| l == fp));
        }

        for fp in to_recover {
            self.repo.with_alert_book(|book| book.recover(&fp, now));
            self.false_runs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&fp);
            get_debug_logger().info("AlertPipeline", "alert auto-recovered");
        }

        // Auto-escalate entries older than the escalation bound
        let escalation = chrono::Duration::minutes(self.cfg.escalation_minutes as i64);
        self.repo.with_alert_book(|book| {
            for alert in book.live_mut() {
                if now - alert.created_at >= escalation && alert.priority < AlertPriority::Critical {
                    alert.priority = bump_priority(alert.priority);
                }
            }
        });
    }

    fn quiet_hours_active(&self, now: DateTime<Utc>) -> bool {
        let Some((start, end)) = self.cfg.quiet_hours else {
            return false;
        };
        let hour = now.hour() as u8;
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

struct Condition {
    active: bool,
    raw: RawAlert,
}

/// Priority = 0.4*business + 0.3*user + 0.2*service + 0.1*time.
fn score_priority(kind: AlertKind, severity: AlertSeverity, now: DateTime<Utc>) -> AlertPriority {
    let business = match severity {
        AlertSeverity::Critical => 1.0,
        AlertSeverity::Warning => 0.6,
        AlertSeverity::Info => 0.2,
    };
    let user = match kind {
        AlertKind::ConnectionLost => 1.0,
        AlertKind::HighLatency => 0.8,
        AlertKind::PacketLoss => 0.7,
        AlertKind::DnsDegraded => 0.6,
        AlertKind::HighJitter => 0.5,
        AlertKind::MtuIssue => 0.4,
        AlertKind::RouteChanged => 0.3,
        AlertKind::IpChanged => 0.2,
        AlertKind::UpdateAvailable => 0.1,
    };
    let service = match kind {
        AlertKind::ConnectionLost => 1.0,
        AlertKind::DnsDegraded => 0.7,
        _ => 0.5,
    };
    // Working hours weigh heavier than the dead of night
    let time = if (8..20).contains(&now.hour()) { 1.0 } else { 0.5 };

    let score = 0.4 * business + 0.3 * user + 0.2 * service + 0.1 * time;
    if score >= 0.8 {
        AlertPriority::Critical
    } else if score >= 0.6 {
        AlertPriority::High
    } else if score >= 0.4 {
        AlertPriority::Medium
    } else {
        AlertPriority::Low
    }
}

fn bump_priority(p: AlertPriority) -> AlertPriority {
    match p {
        AlertPriority::Low => AlertPriority::Medium,
        AlertPriority::Medium => AlertPriority::High,
        AlertPriority::High | AlertPriority::Critical => AlertPriority::Critical,
    }
}
