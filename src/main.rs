use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

mod models;
mod repositories;
pub mod services;
pub mod settings;
pub mod utils;

use repositories::usage::{MemoryUsageRepository, PgUsageRepository, UsageStore};
use settings::StorageBackend;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_logging(&args.log4rs)?;
    let settings = settings::Settings::new(&args.config)?;
    log::info!("Starting clinic quota service.");

    let repository: Arc<dyn UsageStore> = match settings.storage.backend {
        StorageBackend::Postgres => {
            let postgres = settings
                .postgres
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Missing [postgres] section for postgres storage"))?;
            let conn = PgPoolOptions::new()
                .max_connections(postgres.max_connections)
                .connect(&postgres.url)
                .await?;

            let repository = PgUsageRepository::new(conn);
            repository.migrate().await?;
            Arc::new(repository)
        }
        StorageBackend::Memory => {
            log::warn!("Using in-memory storage; usage records are lost on restart.");
            Arc::new(MemoryUsageRepository::new())
        }
    };

    services::start_services(repository, Arc::new(utils::SystemClock), settings).await
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    log4rs::init_file(path, Default::default())
        .map_err(|e| anyhow::anyhow!("Could not initialize logging: {}", e))
}
