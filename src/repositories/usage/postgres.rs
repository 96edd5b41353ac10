use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};

use super::{CreateOutcome, UsageStore};
use crate::models::usage::{ArchivedUsageRecord, UsageHistoryEntry, UsageRecord};

#[derive(sqlx::FromRow)]
struct UsageRecordRow {
    user_id: String,
    monthly_usage_count: i64,
    total_usage_count: i64,
    last_usage_date: Option<DateTime<Utc>>,
    last_month_reset: DateTime<Utc>,
    referral_code: String,
    referral_count: i64,
    referred_by: Option<String>,
    referred_users: Vec<String>,
    referral_bonus: Option<i64>,
    created_at: DateTime<Utc>,
}

impl UsageRecordRow {
    fn into_record(self, usage_history: Vec<UsageHistoryEntry>) -> UsageRecord {
        UsageRecord {
            user_id: self.user_id,
            monthly_usage_count: self.monthly_usage_count,
            total_usage_count: self.total_usage_count,
            last_usage_date: self.last_usage_date,
            last_month_reset: self.last_month_reset,
            usage_history,
            referral_code: self.referral_code,
            referral_count: self.referral_count,
            referred_by: self.referred_by,
            referred_users: self.referred_users,
            referral_bonus: self.referral_bonus,
            created_at: self.created_at,
        }
    }
}

const RECORD_COLUMNS: &str = "user_id, monthly_usage_count, total_usage_count, last_usage_date, \
    last_month_reset, referral_code, referral_count, referred_by, referred_users, referral_bonus, \
    created_at";

#[derive(Clone)]
pub struct PgUsageRepository {
    conn: PgPool,
}

impl PgUsageRepository {
    pub fn new(conn: PgPool) -> Self {
        PgUsageRepository { conn }
    }

    pub async fn migrate(&self) -> Result<(), anyhow::Error> {
        sqlx::migrate!("./migrations").run(&self.conn).await?;
        Ok(())
    }

    async fn load_history<'e, E>(
        executor: E,
        user_id: &str,
    ) -> Result<Vec<UsageHistoryEntry>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, UsageHistoryEntry>(
            "SELECT used_at, count FROM usage_history WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(executor)
        .await
    }
}

#[async_trait]
impl UsageStore for PgUsageRepository {
    async fn get(&self, user_id: &str) -> Result<Option<UsageRecord>, anyhow::Error> {
        let row = sqlx::query_as::<_, UsageRecordRow>(&format!(
            "SELECT {} FROM usage_records WHERE user_id = $1",
            RECORD_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.conn)
        .await?;

        match row {
            Some(row) => {
                let history = Self::load_history(&self.conn, user_id).await?;
                Ok(Some(row.into_record(history)))
            }
            None => Ok(None),
        }
    }

    async fn create_if_absent(&self, record: UsageRecord) -> Result<CreateOutcome, anyhow::Error> {
        let inserted = sqlx::query_as::<_, UsageRecordRow>(&format!(
            r#"INSERT INTO usage_records
            (user_id, monthly_usage_count, total_usage_count, last_usage_date, last_month_reset,
             referral_code, referral_count, referred_by, referred_users, referral_bonus, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING {}"#,
            RECORD_COLUMNS
        ))
        .bind(&record.user_id)
        .bind(record.monthly_usage_count)
        .bind(record.total_usage_count)
        .bind(record.last_usage_date)
        .bind(record.last_month_reset)
        .bind(&record.referral_code)
        .bind(record.referral_count)
        .bind(&record.referred_by)
        .bind(&record.referred_users)
        .bind(record.referral_bonus)
        .bind(record.created_at)
        .fetch_optional(&self.conn)
        .await;

        match inserted {
            Ok(Some(row)) => Ok(CreateOutcome::Created(row.into_record(Vec::new()))),
            Ok(None) => match self.get(&record.user_id).await? {
                Some(existing) => Ok(CreateOutcome::Existing(existing)),
                None => bail!("Usage record for {} vanished during creation", record.user_id),
            },
            // user_id conflicts are absorbed above, so this is the referral code index.
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(CreateOutcome::CodeTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_referral_code(
        &self,
        referral_code: &str,
    ) -> Result<Option<UsageRecord>, anyhow::Error> {
        let user_id: Option<String> =
            sqlx::query_scalar("SELECT user_id FROM usage_records WHERE referral_code = $1")
                .bind(referral_code)
                .fetch_optional(&self.conn)
                .await?;

        match user_id {
            Some(user_id) => self.get(&user_id).await,
            None => Ok(None),
        }
    }

    async fn reset_month(
        &self,
        user_id: &str,
        observed: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<UsageRecord>, anyhow::Error> {
        sqlx::query(
            r#"UPDATE usage_records
            SET monthly_usage_count = 0, last_month_reset = $3, updated_at = CURRENT_TIMESTAMP
            WHERE user_id = $1 AND last_month_reset = $2"#,
        )
        .bind(user_id)
        .bind(observed)
        .bind(now)
        .execute(&self.conn)
        .await?;

        self.get(user_id).await
    }

    async fn record_usage(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        history_limit: usize,
    ) -> Result<Option<UsageRecord>, anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        let row = sqlx::query_as::<_, UsageRecordRow>(&format!(
            r#"UPDATE usage_records
            SET monthly_usage_count = monthly_usage_count + 1,
                total_usage_count = total_usage_count + 1,
                last_usage_date = $2,
                updated_at = CURRENT_TIMESTAMP
            WHERE user_id = $1
            RETURNING {}"#,
            RECORD_COLUMNS
        ))
        .bind(user_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("INSERT INTO usage_history (user_id, used_at, count) VALUES ($1, $2, 1)")
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"DELETE FROM usage_history
            WHERE user_id = $1 AND id NOT IN (
                SELECT id FROM usage_history WHERE user_id = $1 ORDER BY id DESC LIMIT $2
            )"#,
        )
        .bind(user_id)
        .bind(i64::try_from(history_limit).unwrap_or(i64::MAX))
        .execute(&mut *tx)
        .await?;

        let history = Self::load_history(&mut *tx, user_id).await?;
        tx.commit().await?;

        Ok(Some(row.into_record(history)))
    }

    async fn add_referred_user(
        &self,
        referrer_id: &str,
        referred_user_id: &str,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"UPDATE usage_records
            SET referral_count = referral_count + 1,
                referred_users = array_append(referred_users, $2),
                updated_at = CURRENT_TIMESTAMP
            WHERE user_id = $1 AND NOT ($2 = ANY(referred_users))"#,
        )
        .bind(referrer_id)
        .bind(referred_user_id)
        .execute(&self.conn)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM usage_records WHERE user_id = $1)")
                .bind(referrer_id)
                .fetch_one(&self.conn)
                .await?;
        if !exists {
            bail!("No usage record for referrer {}", referrer_id)
        }

        Ok(false)
    }

    async fn set_referred_by(
        &self,
        user_id: &str,
        referrer_id: &str,
        referral_bonus: i64,
    ) -> Result<(), anyhow::Error> {
        let result = sqlx::query(
            r#"UPDATE usage_records
            SET referred_by = $2, referral_bonus = $3, updated_at = CURRENT_TIMESTAMP
            WHERE user_id = $1"#,
        )
        .bind(user_id)
        .bind(referrer_id)
        .bind(referral_bonus)
        .execute(&self.conn)
        .await?;

        if result.rows_affected() == 0 {
            bail!("No usage record for user {}", user_id)
        }

        Ok(())
    }

    async fn archive(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ArchivedUsageRecord>, anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        let row = sqlx::query_as::<_, UsageRecordRow>(&format!(
            "SELECT {} FROM usage_records WHERE user_id = $1 FOR UPDATE",
            RECORD_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let history = Self::load_history(&mut *tx, user_id).await?;

        let archive_id: i64 = sqlx::query_scalar(&format!(
            r#"INSERT INTO archived_usage_records ({columns}, archived_at)
            SELECT {columns}, $2 FROM usage_records WHERE user_id = $1
            RETURNING id"#,
            columns = RECORD_COLUMNS
        ))
        .bind(user_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO archived_usage_history (archive_id, used_at, count)
            SELECT $1, used_at, count FROM usage_history WHERE user_id = $2 ORDER BY id"#,
        )
        .bind(archive_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM usage_records WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(ArchivedUsageRecord {
            record: row.into_record(history),
            archived_at: now,
        }))
    }
}
