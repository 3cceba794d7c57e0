use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::clock::Clock;
use crate::config::{QuotaSettings, TierLimitsConfig};
use crate::models::Tier;

const WEEK_MS: u64 = 7 * 24 * 60 * 60 * 1000;
// Fixed 30-day month, not calendar-aware. Advisory limits only.
const MONTH_MS: u64 = 30 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, Default)]
struct UserRecord {
    count: u32,
    last_reset: u64,
    weekly_count: u32,
    weekly_last_reset: u64,
    monthly_count: u32,
    monthly_last_reset: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,

    /// Requests left in the minute window. `u32::MAX` for admins.
    pub remaining: u32,

    /// When the minute window resets (unix millis).
    pub reset_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_remaining: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_remaining: Option<u32>,
}

impl QuotaDecision {
    fn unlimited(now: u64) -> Self {
        Self {
            allowed: true,
            remaining: u32::MAX,
            reset_ms: now,
            retry_after_seconds: None,
            weekly_remaining: None,
            monthly_remaining: None,
        }
    }

    /// Human-readable denial message with the reset countdown.
    #[must_use]
    pub fn denial_message(&self) -> String {
        let secs = self.retry_after_seconds.unwrap_or(0);
        if secs >= 3600 {
            format!("Search limit reached. Try again in {} hours.", secs.div_ceil(3600))
        } else if secs >= 60 {
            format!("Search limit reached. Try again in {} minutes.", secs.div_ceil(60))
        } else {
            format!("Search limit reached. Try again in {secs} seconds.")
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserActivity {
    pub user_id: String,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaStats {
    pub tracked_users: usize,
    pub blocked_users: usize,
    /// Users active within the last hour, sorted by request count descending.
    pub active_last_hour: Vec<UserActivity>,
}

/// Per-user sliding window counters (minute / week / month) with tier-based
/// ceilings. Window-based rather than token-bucket: burst behavior at window
/// boundaries is imprecise, which is acceptable for a soft advisory limit.
pub struct QuotaService {
    records: Mutex<HashMap<String, UserRecord>>,
    settings: QuotaSettings,
    clock: Arc<dyn Clock>,
}

impl QuotaService {
    #[must_use]
    pub fn new(settings: QuotaSettings, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(HashMap::new()),
            settings,
            clock,
        })
    }

    /// Ceilings for a tier. Admin is unlimited; anonymous carries no weekly
    /// or monthly allowance at all.
    #[must_use]
    pub fn limits(&self, tier: Tier) -> TierLimitsConfig {
        match tier {
            Tier::Anonymous => self.settings.anonymous,
            Tier::Basic => self.settings.basic,
            Tier::Premium => self.settings.premium,
            Tier::Admin => TierLimitsConfig {
                per_minute: u32::MAX,
                per_week: None,
                per_month: None,
            },
        }
    }

    /// Checks and, when allowed, consumes one request in every applicable
    /// window. Admins short-circuit with no side effects.
    pub fn check(&self, user_id: &str, tier: Tier) -> QuotaDecision {
        let now = self.clock.now_ms();

        if tier == Tier::Admin {
            return QuotaDecision::unlimited(now);
        }

        let limits = self.limits(tier);
        let window_ms = self.settings.window_seconds * 1000;

        let mut records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let record = records.entry(user_id.to_string()).or_insert(UserRecord {
            last_reset: now,
            weekly_last_reset: now,
            monthly_last_reset: now,
            ..UserRecord::default()
        });

        if now.saturating_sub(record.last_reset) > window_ms {
            record.count = 0;
            record.last_reset = now;
        }
        if now.saturating_sub(record.weekly_last_reset) > WEEK_MS {
            record.weekly_count = 0;
            record.weekly_last_reset = now;
        }
        if now.saturating_sub(record.monthly_last_reset) > MONTH_MS {
            record.monthly_count = 0;
            record.monthly_last_reset = now;
        }

        let minute_exceeded = record.count >= limits.per_minute;
        let week_exceeded = limits.per_week.is_some_and(|w| record.weekly_count >= w);
        let month_exceeded = limits.per_month.is_some_and(|m| record.monthly_count >= m);

        let allowed = !(minute_exceeded || week_exceeded || month_exceeded);

        // First exceeded window in minute -> week -> month priority order.
        let retry_after_seconds = if minute_exceeded {
            Some((record.last_reset + window_ms).saturating_sub(now).div_ceil(1000))
        } else if week_exceeded {
            Some((record.weekly_last_reset + WEEK_MS).saturating_sub(now).div_ceil(1000))
        } else if month_exceeded {
            Some((record.monthly_last_reset + MONTH_MS).saturating_sub(now).div_ceil(1000))
        } else {
            None
        };

        if allowed {
            record.count += 1;
            record.weekly_count += 1;
            record.monthly_count += 1;
            metrics::counter!("guardarr_quota_allowed_total").increment(1);
        } else {
            metrics::counter!("guardarr_quota_denied_total").increment(1);
        }

        QuotaDecision {
            allowed,
            remaining: limits.per_minute.saturating_sub(record.count),
            reset_ms: record.last_reset + window_ms,
            retry_after_seconds,
            weekly_remaining: limits.per_week.map(|w| w.saturating_sub(record.weekly_count)),
            monthly_remaining: limits
                .per_month
                .map(|m| m.saturating_sub(record.monthly_count)),
        }
    }

    pub fn clear_user(&self, user_id: &str) -> bool {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(user_id)
            .is_some()
    }

    pub fn clear_all(&self) {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn stats(&self) -> QuotaStats {
        let now = self.clock.now_ms();
        let records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let blocked_users = records
            .values()
            .filter(|r| r.count >= self.settings.blocked_threshold)
            .count();

        let hour_ago = now.saturating_sub(60 * 60 * 1000);
        let mut active_last_hour: Vec<UserActivity> = records
            .iter()
            .filter(|(_, r)| r.last_reset >= hour_ago)
            .map(|(id, r)| UserActivity {
                user_id: id.clone(),
                count: r.count,
            })
            .collect();
        active_last_hour.sort_by(|a, b| b.count.cmp(&a.count));

        QuotaStats {
            tracked_users: records.len(),
            blocked_users,
            active_last_hour,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn settings() -> QuotaSettings {
        QuotaSettings {
            window_seconds: 60,
            blocked_threshold: 30,
            anonymous: TierLimitsConfig {
                per_minute: 5,
                per_week: None,
                per_month: None,
            },
            basic: TierLimitsConfig {
                per_minute: 5,
                per_week: Some(8),
                per_month: Some(20),
            },
            premium: TierLimitsConfig {
                per_minute: 30,
                per_week: Some(500),
                per_month: Some(2000),
            },
            admin_emails: vec![],
        }
    }

    #[test]
    fn minute_window_denies_then_resets() {
        let clock = ManualClock::new(0);
        let quota = QuotaService::new(settings(), clock.clone());

        for i in 0..5 {
            let d = quota.check("u1", Tier::Anonymous);
            assert!(d.allowed, "call {i} should pass");
        }

        let denied = quota.check("u1", Tier::Anonymous);
        assert!(!denied.allowed);
        assert!(denied.retry_after_seconds.unwrap_or(0) > 0);

        clock.advance(61_000);
        let after = quota.check("u1", Tier::Anonymous);
        assert!(after.allowed);
        assert_eq!(after.remaining, 4);
    }

    #[test]
    fn admin_always_allowed_without_side_effects() {
        let clock = ManualClock::new(0);
        let quota = QuotaService::new(settings(), clock);

        for _ in 0..100 {
            let d = quota.check("root", Tier::Admin);
            assert!(d.allowed);
            assert_eq!(d.remaining, u32::MAX);
        }
        assert_eq!(quota.stats().tracked_users, 0);
    }

    #[test]
    fn weekly_ceiling_wins_after_minute_windows_pass() {
        let clock = ManualClock::new(0);
        let quota = QuotaService::new(settings(), clock.clone());

        // 8 allowed requests spread over minute windows exhaust the week.
        for _ in 0..8 {
            assert!(quota.check("u1", Tier::Basic).allowed);
            clock.advance(61_000);
        }

        let denied = quota.check("u1", Tier::Basic);
        assert!(!denied.allowed);
        assert_eq!(denied.weekly_remaining, Some(0));
        // Week window exceeded, minute window fresh: retry points at the week.
        assert!(denied.retry_after_seconds.unwrap_or(0) > 60);
    }

    #[test]
    fn minute_denial_reports_minute_retry_even_when_week_also_full() {
        let clock = ManualClock::new(0);
        let mut s = settings();
        s.basic.per_week = Some(5);
        let quota = QuotaService::new(s, clock);

        for _ in 0..5 {
            assert!(quota.check("u1", Tier::Basic).allowed);
        }
        let denied = quota.check("u1", Tier::Basic);
        assert!(!denied.allowed);
        // Both windows are full; minute has priority.
        assert!(denied.retry_after_seconds.unwrap_or(0) <= 60);
    }

    #[test]
    fn anonymous_has_no_weekly_or_monthly_allowance() {
        let clock = ManualClock::new(0);
        let quota = QuotaService::new(settings(), clock);
        let d = quota.check("anon", Tier::Anonymous);
        assert!(d.allowed);
        assert_eq!(d.weekly_remaining, None);
        assert_eq!(d.monthly_remaining, None);
    }

    #[test]
    fn clear_user_resets_counters() {
        let clock = ManualClock::new(0);
        let quota = QuotaService::new(settings(), clock);

        for _ in 0..5 {
            quota.check("u1", Tier::Anonymous);
        }
        assert!(!quota.check("u1", Tier::Anonymous).allowed);

        assert!(quota.clear_user("u1"));
        assert!(quota.check("u1", Tier::Anonymous).allowed);
    }

    #[test]
    fn stats_sorts_active_users_by_count() {
        let clock = ManualClock::new(0);
        let quota = QuotaService::new(settings(), clock);

        quota.check("light", Tier::Premium);
        for _ in 0..3 {
            quota.check("heavy", Tier::Premium);
        }

        let stats = quota.stats();
        assert_eq!(stats.tracked_users, 2);
        assert_eq!(stats.active_last_hour[0].user_id, "heavy");
        assert_eq!(stats.active_last_hour[0].count, 3);
    }

    #[test]
    fn blocked_threshold_counts_users() {
        let clock = ManualClock::new(0);
        let mut s = settings();
        s.premium.per_minute = 100;
        let quota = QuotaService::new(s, clock);

        for _ in 0..30 {
            quota.check("busy", Tier::Premium);
        }
        assert_eq!(quota.stats().blocked_users, 1);
    }

    #[test]
    fn denial_message_includes_countdown() {
        let d = QuotaDecision {
            allowed: false,
            remaining: 0,
            reset_ms: 0,
            retry_after_seconds: Some(42),
            weekly_remaining: None,
            monthly_remaining: None,
        };
        assert_eq!(d.denial_message(), "Search limit reached. Try again in 42 seconds.");
    }
}
