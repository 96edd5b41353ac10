use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::usage::{validate_user_id, UsageRequest};
use super::{RequestHandler, Service, ServiceError};
use crate::repositories::usage::UsageStore;

pub enum ReferralRequest {
    ProcessReferral {
        new_user_id: String,
        referral_code: String,
        response: oneshot::Sender<bool>,
    },
}

#[derive(Clone)]
pub struct ReferralRequestHandler {
    repository: Arc<dyn UsageStore>,
    usage_channel: mpsc::Sender<UsageRequest>,
    referral_reward: i64,
}

impl ReferralRequestHandler {
    pub fn new(
        repository: Arc<dyn UsageStore>,
        usage_channel: mpsc::Sender<UsageRequest>,
        referral_reward: i64,
    ) -> Self {
        ReferralRequestHandler {
            repository,
            usage_channel,
            referral_reward,
        }
    }

    /// Attributes `new_user_id` to the owner of `referral_code`. Failures are
    /// logged and reported as `false`; writes already applied are kept.
    pub async fn process_referral(&self, new_user_id: &str, referral_code: &str) -> bool {
        match self.apply_referral(new_user_id, referral_code).await {
            Ok(applied) => applied,
            Err(e) => {
                log::error!(
                    "Failed to process referral code {} for {}: {}",
                    referral_code,
                    new_user_id,
                    e
                );
                false
            }
        }
    }

    async fn apply_referral(
        &self,
        new_user_id: &str,
        referral_code: &str,
    ) -> Result<bool, ServiceError> {
        validate_user_id(new_user_id)?;
        let code = referral_code.trim().to_uppercase();

        let referrer = self
            .repository
            .find_by_referral_code(&code)
            .await
            .map_err(|e| ServiceError::Repository("Referral".to_string(), e.to_string()))?;

        let Some(referrer) = referrer else {
            log::warn!("Referral code {} does not match any user", code);
            return Ok(false);
        };

        if referrer.user_id == new_user_id {
            log::warn!("User {} tried to use their own referral code", new_user_id);
            return Ok(false);
        }

        let existing = self
            .repository
            .get(new_user_id)
            .await
            .map_err(|e| ServiceError::Repository("Referral".to_string(), e.to_string()))?;
        if let Some(previous) = existing.and_then(|record| record.referred_by) {
            if previous != referrer.user_id {
                log::warn!(
                    "{} was already referred by {}, ignoring code {}",
                    new_user_id,
                    previous,
                    code
                );
                return Ok(false);
            }
        }

        let added = self
            .repository
            .add_referred_user(&referrer.user_id, new_user_id)
            .await
            .map_err(|e| ServiceError::Repository("Referral".to_string(), e.to_string()))?;
        if !added {
            log::info!(
                "{} was already attributed to {}",
                new_user_id,
                referrer.user_id
            );
        }

        self.ensure_usage(new_user_id).await?;

        self.repository
            .set_referred_by(new_user_id, &referrer.user_id, self.referral_reward)
            .await
            .map_err(|e| ServiceError::Repository("Referral".to_string(), e.to_string()))?;

        log::info!("{} referred by {}", new_user_id, referrer.user_id);
        Ok(true)
    }

    async fn ensure_usage(&self, user_id: &str) -> Result<(), ServiceError> {
        let (usage_tx, usage_rx) = oneshot::channel();

        self.usage_channel
            .send(UsageRequest::GetUsage {
                user_id: user_id.to_string(),
                response: usage_tx,
            })
            .await
            .map_err(|e| ServiceError::Communication("Referral".to_string(), e.to_string()))?;

        usage_rx
            .await
            .map_err(|e| ServiceError::Communication("Referral".to_string(), e.to_string()))??;

        Ok(())
    }
}

#[async_trait]
impl RequestHandler<ReferralRequest> for ReferralRequestHandler {
    async fn handle_request(&self, request: ReferralRequest) {
        match request {
            ReferralRequest::ProcessReferral {
                new_user_id,
                referral_code,
                response,
            } => {
                let applied = self.process_referral(&new_user_id, &referral_code).await;
                let _ = response.send(applied);
            }
        }
    }
}

pub struct ReferralService;

impl ReferralService {
    pub fn new() -> Self {
        ReferralService {}
    }
}

#[async_trait]
impl Service<ReferralRequest, ReferralRequestHandler> for ReferralService {}
