use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::usage::{ArchivedUsageRecord, UsageRecord};

mod memory;
mod postgres;

pub use memory::MemoryUsageRepository;
pub use postgres::PgUsageRepository;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(UsageRecord),
    /// Another writer created the record first.
    Existing(UsageRecord),
    /// The referral code is already owned by a different record.
    CodeTaken,
}

/// Per-user usage documents, keyed by user id.
///
/// Every method is a single atomic operation against the backing store.
/// Nothing spans more than one user's record.
#[async_trait]
pub trait UsageStore: Send + Sync + 'static {
    async fn get(&self, user_id: &str) -> Result<Option<UsageRecord>, anyhow::Error>;

    async fn create_if_absent(&self, record: UsageRecord) -> Result<CreateOutcome, anyhow::Error>;

    async fn find_by_referral_code(
        &self,
        referral_code: &str,
    ) -> Result<Option<UsageRecord>, anyhow::Error>;

    /// Zeroes the monthly counter and moves the window to `now`, but only if
    /// the window still starts at `observed`. Returns the record as stored
    /// afterwards, or `None` if the user has no record.
    async fn reset_month(
        &self,
        user_id: &str,
        observed: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, anyhow::Error>;

    /// Bumps both counters, stamps `last_usage_date` and appends a history
    /// entry, keeping at most `history_limit` entries.
    async fn record_usage(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        history_limit: usize,
    ) -> Result<Option<UsageRecord>, anyhow::Error>;

    /// Adds `referred_user_id` to the referrer's set and increments the
    /// referral count. Returns `false` when the user was already present.
    async fn add_referred_user(
        &self,
        referrer_id: &str,
        referred_user_id: &str,
    ) -> Result<bool, anyhow::Error>;

    async fn set_referred_by(
        &self,
        user_id: &str,
        referrer_id: &str,
        referral_bonus: i64,
    ) -> Result<(), anyhow::Error>;

    /// Copies the record into the archive, then deletes the live one.
    async fn archive(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ArchivedUsageRecord>, anyhow::Error>;
}
