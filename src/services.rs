use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::repositories::usage::UsageStore;
use crate::settings::Settings;
use crate::utils::Clock;

pub mod http;
pub mod referrals;
pub mod usage;

const CHANNEL_CAPACITY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Repository error: {0} - {1}")]
    Repository(String, String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

#[derive(Clone)]
pub struct ServiceChannels {
    pub usage: mpsc::Sender<usage::UsageRequest>,
    pub referrals: mpsc::Sender<referrals::ReferralRequest>,
}

/// Spawns the usage and referral services and returns their request channels.
pub fn spawn_services(
    repository: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
    settings: &Settings,
) -> ServiceChannels {
    let (usage_tx, mut usage_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (referral_tx, mut referral_rx) = mpsc::channel(CHANNEL_CAPACITY);

    log::info!("Starting usage service.");
    let usage_handler = usage::UsageRequestHandler::new(
        repository.clone(),
        clock,
        settings.quota.clone(),
        settings.referral.base_url.clone(),
    );
    let mut usage_service = usage::UsageService::new();
    tokio::spawn(async move {
        usage_service.run(usage_handler, &mut usage_rx).await;
    });

    log::info!("Starting referral service.");
    let referral_handler = referrals::ReferralRequestHandler::new(
        repository,
        usage_tx.clone(),
        settings.quota.referral_reward,
    );
    let mut referral_service = referrals::ReferralService::new();
    tokio::spawn(async move {
        referral_service
            .run(referral_handler, &mut referral_rx)
            .await;
    });

    ServiceChannels {
        usage: usage_tx,
        referrals: referral_tx,
    }
}

pub async fn start_services(
    repository: Arc<dyn UsageStore>,
    clock: Arc<dyn Clock>,
    settings: Settings,
) -> Result<(), anyhow::Error> {
    let channels = spawn_services(repository, clock, &settings);

    log::info!("Starting HTTP server.");
    http::start_http_server(&settings.http.listen, channels).await
}
