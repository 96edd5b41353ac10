use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const BASE_FREE_ALLOWANCE: i64 = 5;
pub const REFERRAL_REWARD: i64 = 5;
pub const HISTORY_LIMIT: usize = 1000;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Default, Deserialize)]
pub struct Storage {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Quota {
    #[serde(default = "default_base_free_allowance")]
    pub base_free_allowance: i64,
    #[serde(default = "default_referral_reward")]
    pub referral_reward: i64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Referral {
    pub base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub storage: Storage,
    pub postgres: Option<Postgres>,
    #[serde(default)]
    pub quota: Quota,
    pub referral: Referral,
    #[serde(default)]
    pub http: Http,
}

impl Default for Quota {
    fn default() -> Self {
        Quota {
            base_free_allowance: BASE_FREE_ALLOWANCE,
            referral_reward: REFERRAL_REWARD,
            history_limit: HISTORY_LIMIT,
        }
    }
}

impl Default for Http {
    fn default() -> Self {
        Http {
            listen: default_listen(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_base_free_allowance() -> i64 {
    BASE_FREE_ALLOWANCE
}

fn default_referral_reward() -> i64 {
    REFERRAL_REWARD
}

fn default_history_limit() -> usize {
    HISTORY_LIMIT
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CLINIC_QUOTA").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
