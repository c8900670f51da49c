//! Connection pool setup.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::error::DbError;

/// Pool sizing for the local store.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Connect to the local PostgreSQL database.
///
/// # Errors
///
/// Returns `DbError::ConnectionFailed` if no connection can be opened.
pub async fn connect(database_url: &str, settings: PoolSettings) -> Result<PgPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(DbError::ConnectionFailed)?;

    info!(
        max_connections = settings.max_connections,
        "Connected to local store"
    );
    Ok(pool)
}
