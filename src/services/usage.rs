use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::referrals::ReferralInfo;
use crate::models::usage::{UsageAllowance, UsageRecord};
use crate::repositories::usage::{CreateOutcome, UsageStore};
use crate::settings::Quota;
use crate::utils::{self, Clock};

const MAX_REFERRAL_CODE_ATTEMPTS: usize = 5;
const SIGNUP_PATH: &str = "/signup";

pub enum UsageRequest {
    GetUsage {
        user_id: String,
        response: oneshot::Sender<Result<UsageRecord, ServiceError>>,
    },
    CanUseAiSuggestion {
        user_id: String,
        response: oneshot::Sender<Result<UsageAllowance, ServiceError>>,
    },
    RecordAiUsage {
        user_id: String,
        response: oneshot::Sender<Result<UsageRecord, ServiceError>>,
    },
    GetReferralInfo {
        user_id: String,
        response: oneshot::Sender<Result<ReferralInfo, ServiceError>>,
    },
    ArchiveUsage {
        user_id: String,
        response: oneshot::Sender<Result<bool, ServiceError>>,
    },
}

/// Allowance for the current window. `remaining_count` goes negative when
/// racing writers pushed usage past the allowance; callers read that as zero.
pub fn compute_allowance(record: &UsageRecord, quota: &Quota) -> UsageAllowance {
    let effective_bonus = match (record.referral_bonus, &record.referred_by) {
        (Some(bonus), _) => bonus,
        (None, Some(_)) => quota.referral_reward,
        (None, None) => 0,
    };

    let allowed = quota.base_free_allowance
        + record.referral_count * quota.referral_reward
        + effective_bonus;
    let remaining = allowed - record.monthly_usage_count;

    UsageAllowance {
        can_use: remaining > 0,
        remaining_count: remaining,
    }
}

pub(crate) fn validate_user_id(user_id: &str) -> Result<(), ServiceError> {
    if user_id.trim().is_empty() {
        return Err(ServiceError::InvalidInput("user id must not be empty".to_string()));
    }

    Ok(())
}

fn repository_error(e: anyhow::Error) -> ServiceError {
    log::error!("Usage repository failure: {}", e);
    ServiceError::Repository("Usage".to_string(), e.to_string())
}

#[derive(Clone)]
pub struct UsageRequestHandler {
    repository: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
    quota: Quota,
    referral_base_url: String,
}

impl UsageRequestHandler {
    pub fn new(
        repository: Arc<dyn UsageStore>,
        clock: Arc<dyn Clock>,
        quota: Quota,
        referral_base_url: String,
    ) -> Self {
        UsageRequestHandler {
            repository,
            clock,
            quota,
            referral_base_url,
        }
    }

    pub async fn get_user_usage(&self, user_id: &str) -> Result<UsageRecord, ServiceError> {
        validate_user_id(user_id)?;
        let now = self.clock.now();

        let existing = self
            .repository
            .get(user_id)
            .await
            .map_err(repository_error)?;

        match existing {
            Some(record) if record.needs_month_reset(now) => {
                log::info!(
                    "Starting new usage window for {} (previous window {}, {} uses)",
                    user_id,
                    record.last_month_reset,
                    record.monthly_usage_count
                );
                self.repository
                    .reset_month(user_id, record.last_month_reset, now)
                    .await
                    .map_err(repository_error)?
                    .ok_or_else(|| {
                        ServiceError::Internal(format!("Usage record for {} disappeared", user_id))
                    })
            }
            Some(record) => Ok(record),
            None => self.create_usage(user_id, now).await,
        }
    }

    async fn create_usage(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord, ServiceError> {
        for _ in 0..MAX_REFERRAL_CODE_ATTEMPTS {
            let code = utils::generate_referral_code(user_id, now)
                .map_err(|e| ServiceError::InvalidInput(e.to_string()))?;

            match self
                .repository
                .create_if_absent(UsageRecord::new(user_id, code.clone(), now))
                .await
                .map_err(repository_error)?
            {
                CreateOutcome::Created(record) => {
                    log::info!("Created usage record for {} with code {}", user_id, code);
                    return Ok(record);
                }
                CreateOutcome::Existing(record) => return Ok(record),
                CreateOutcome::CodeTaken => {
                    log::warn!("Referral code {} already taken, regenerating", code);
                }
            }
        }

        Err(ServiceError::Internal(format!(
            "Could not allocate a unique referral code for {}",
            user_id
        )))
    }

    pub async fn can_use_ai_suggestion(
        &self,
        user_id: &str,
    ) -> Result<UsageAllowance, ServiceError> {
        let record = self.get_user_usage(user_id).await?;

        Ok(compute_allowance(&record, &self.quota))
    }

    /// Counts one use. Callers check `can_use_ai_suggestion` first.
    pub async fn record_ai_usage(&self, user_id: &str) -> Result<UsageRecord, ServiceError> {
        // Rolls the window over before counting.
        self.get_user_usage(user_id).await?;

        self.repository
            .record_usage(user_id, self.clock.now(), self.quota.history_limit)
            .await
            .map_err(repository_error)?
            .ok_or_else(|| {
                ServiceError::Internal(format!("Usage record for {} disappeared", user_id))
            })
    }

    pub async fn get_user_referral_info(
        &self,
        user_id: &str,
    ) -> Result<ReferralInfo, ServiceError> {
        let record = self.get_user_usage(user_id).await?;

        Ok(ReferralInfo {
            referral_link: format!(
                "{}{}?ref={}",
                self.referral_base_url.trim_end_matches('/'),
                SIGNUP_PATH,
                record.referral_code
            ),
            referral_code: record.referral_code,
            referral_count: record.referral_count,
            referred_users: record.referred_users,
        })
    }

    pub async fn archive_user_usage(&self, user_id: &str) -> Result<bool, ServiceError> {
        validate_user_id(user_id)?;

        let archived = self
            .repository
            .archive(user_id, self.clock.now())
            .await
            .map_err(repository_error)?;

        if archived.is_some() {
            log::info!("Archived usage record for {}", user_id);
        }

        Ok(archived.is_some())
    }
}

#[async_trait]
impl RequestHandler<UsageRequest> for UsageRequestHandler {
    async fn handle_request(&self, request: UsageRequest) {
        match request {
            UsageRequest::GetUsage { user_id, response } => {
                let usage = self.get_user_usage(&user_id).await;
                let _ = response.send(usage);
            }
            UsageRequest::CanUseAiSuggestion { user_id, response } => {
                let allowance = self.can_use_ai_suggestion(&user_id).await;
                let _ = response.send(allowance);
            }
            UsageRequest::RecordAiUsage { user_id, response } => {
                let usage = self.record_ai_usage(&user_id).await;
                let _ = response.send(usage);
            }
            UsageRequest::GetReferralInfo { user_id, response } => {
                let info = self.get_user_referral_info(&user_id).await;
                let _ = response.send(info);
            }
            UsageRequest::ArchiveUsage { user_id, response } => {
                let archived = self.archive_user_usage(&user_id).await;
                let _ = response.send(archived);
            }
        }
    }
}

pub struct UsageService;

impl UsageService {
    pub fn new() -> Self {
        UsageService {}
    }
}

#[async_trait]
impl Service<UsageRequest, UsageRequestHandler> for UsageService {}
