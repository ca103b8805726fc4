pub mod api;
pub mod config;
pub mod db;

pub use db::DbPool;

use config::Config;

/// Shared application state, constructed once in `main` and handed to
/// every handler through axum's state.
pub struct AppState {
    pub config: Config,
    pub db: DbPool,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        Self { config, db }
    }
}
