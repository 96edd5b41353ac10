use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};

use super::{CreateOutcome, UsageStore};
use crate::models::usage::{ArchivedUsageRecord, UsageHistoryEntry, UsageRecord};

#[derive(Clone, Default)]
pub struct MemoryUsageRepository {
    records: Arc<DashMap<String, UsageRecord>>,
    by_referral_code: Arc<DashMap<String, String>>,
    archived: Arc<DashMap<String, Vec<ArchivedUsageRecord>>>,
}

impl MemoryUsageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn archived(&self, user_id: &str) -> Vec<ArchivedUsageRecord> {
        self.archived
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageRepository {
    async fn get(&self, user_id: &str) -> Result<Option<UsageRecord>, anyhow::Error> {
        Ok(self.records.get(user_id).map(|r| r.value().clone()))
    }

    async fn create_if_absent(&self, record: UsageRecord) -> Result<CreateOutcome, anyhow::Error> {
        match self.records.entry(record.user_id.clone()) {
            Entry::Occupied(existing) => Ok(CreateOutcome::Existing(existing.get().clone())),
            Entry::Vacant(slot) => match self.by_referral_code.entry(record.referral_code.clone()) {
                Entry::Occupied(_) => Ok(CreateOutcome::CodeTaken),
                Entry::Vacant(code) => {
                    code.insert(record.user_id.clone());
                    slot.insert(record.clone());
                    Ok(CreateOutcome::Created(record))
                }
            },
        }
    }

    async fn find_by_referral_code(
        &self,
        referral_code: &str,
    ) -> Result<Option<UsageRecord>, anyhow::Error> {
        let owner = self
            .by_referral_code
            .get(referral_code)
            .map(|id| id.value().clone());

        Ok(owner.and_then(|id| self.records.get(&id).map(|r| r.value().clone())))
    }

    async fn reset_month(
        &self,
        user_id: &str,
        observed: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, anyhow::Error> {
        Ok(self.records.get_mut(user_id).map(|mut record| {
            if record.last_month_reset == observed {
                record.monthly_usage_count = 0;
                record.last_month_reset = now;
            }
            record.clone()
        }))
    }

    async fn record_usage(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        history_limit: usize,
    ) -> Result<Option<UsageRecord>, anyhow::Error> {
        Ok(self.records.get_mut(user_id).map(|mut record| {
            record.monthly_usage_count += 1;
            record.total_usage_count += 1;
            record.last_usage_date = Some(now);
            record.usage_history.push(UsageHistoryEntry {
                used_at: now,
                count: 1,
            });

            let len = record.usage_history.len();
            if len > history_limit {
                record.usage_history.drain(..len - history_limit);
            }
            record.clone()
        }))
    }

    async fn add_referred_user(
        &self,
        referrer_id: &str,
        referred_user_id: &str,
    ) -> Result<bool, anyhow::Error> {
        let Some(mut referrer) = self.records.get_mut(referrer_id) else {
            bail!("No usage record for referrer {}", referrer_id)
        };

        if referrer.referred_users.iter().any(|id| id == referred_user_id) {
            return Ok(false);
        }

        referrer.referred_users.push(referred_user_id.to_string());
        referrer.referral_count += 1;
        Ok(true)
    }

    async fn set_referred_by(
        &self,
        user_id: &str,
        referrer_id: &str,
        referral_bonus: i64,
    ) -> Result<(), anyhow::Error> {
        let Some(mut record) = self.records.get_mut(user_id) else {
            bail!("No usage record for user {}", user_id)
        };

        record.referred_by = Some(referrer_id.to_string());
        record.referral_bonus = Some(referral_bonus);
        Ok(())
    }

    async fn archive(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ArchivedUsageRecord>, anyhow::Error> {
        let Some((_, record)) = self.records.remove(user_id) else {
            return Ok(None);
        };

        self.by_referral_code
            .remove_if(&record.referral_code, |_, owner| owner == user_id);

        let archived = ArchivedUsageRecord {
            record,
            archived_at: now,
        };
        self.archived
            .entry(user_id.to_string())
            .or_default()
            .push(archived.clone());

        Ok(Some(archived))
    }
}
