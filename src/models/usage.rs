use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UsageHistoryEntry {
    pub used_at: DateTime<Utc>,
    pub count: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub monthly_usage_count: i64,
    pub total_usage_count: i64,
    pub last_usage_date: Option<DateTime<Utc>>,
    pub last_month_reset: DateTime<Utc>,
    pub usage_history: Vec<UsageHistoryEntry>,
    pub referral_code: String,
    pub referral_count: i64,
    pub referred_by: Option<String>,
    pub referred_users: Vec<String>,
    pub referral_bonus: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// A zeroed record whose accounting window starts at `now`.
    pub fn new(user_id: &str, referral_code: String, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            monthly_usage_count: 0,
            total_usage_count: 0,
            last_usage_date: None,
            last_month_reset: now,
            usage_history: Vec::new(),
            referral_code,
            referral_count: 0,
            referred_by: None,
            referred_users: Vec::new(),
            referral_bonus: None,
            created_at: now,
        }
    }

    /// True when `now` falls in a different calendar month than the current window.
    pub fn needs_month_reset(&self, now: DateTime<Utc>) -> bool {
        (self.last_month_reset.year(), self.last_month_reset.month()) != (now.year(), now.month())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct UsageAllowance {
    pub can_use: bool,
    pub remaining_count: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchivedUsageRecord {
    pub record: UsageRecord,
    pub archived_at: DateTime<Utc>,
}
