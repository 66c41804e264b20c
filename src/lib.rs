pub mod backend;
pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod validation;

use std::sync::Arc;

use backend::client::EvalClient;
use config::AppConfig;
use db::storage::SqliteStorage;
use db::DbPool;
use engine::{HistoryStore, Orchestrator};
use error::AppError;

/// Shared application state handed to every command.
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub history: Arc<HistoryStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Open the database, prepare the history document and connect the backend client.
    pub fn init(config: AppConfig) -> Result<Self, AppError> {
        let pool = db::init_db(&config.data_dir)?;
        tracing::info!("Database pool ready (max_size=4)");

        let history = Arc::new(HistoryStore::new(Arc::new(SqliteStorage::new(pool.clone()))));
        history.init()?;

        let client = EvalClient::new(&config.api_url, config.request_timeout)?;
        tracing::info!(api_url = %client.base_url(), timeout_secs = config.request_timeout.as_secs(), "Evaluation backend configured");

        let orchestrator = Arc::new(Orchestrator::new(Arc::new(client), history.clone()));

        Ok(Self {
            config,
            db: pool,
            history,
            orchestrator,
        })
    }
}
