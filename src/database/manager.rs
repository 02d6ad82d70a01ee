use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::DatabaseConfig;

/// Errors from DatabaseManager
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Invalid tenant database name: {0}")]
    InvalidTenantName(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Central registry database access. Tenant databases are never pooled here:
/// the orchestrator opens one dedicated connection per tenant run.
pub struct DatabaseManager;

impl DatabaseManager {
    /// Longest identifier Postgres keeps without truncation
    const MAX_DB_NAME_LEN: usize = 63;

    /// Get main registry database pool, created lazily from DATABASE_URL
    pub async fn main_pool() -> Result<PgPool, DatabaseError> {
        static MAIN_POOL: OnceCell<PgPool> = OnceCell::const_new();

        let pool = MAIN_POOL
            .get_or_try_init(|| async {
                let settings = &crate::config::config().database;
                let url = Self::central_url()?;
                let pool = Self::pool_options(settings).connect(&url).await?;
                info!("Created registry database pool");
                Ok::<PgPool, DatabaseError>(pool)
            })
            .await?;

        Ok(pool.clone())
    }

    fn pool_options(settings: &DatabaseConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(settings.connection_timeout.max(1)))
    }

    /// The registry database URL as configured
    pub fn central_url() -> Result<String, DatabaseError> {
        std::env::var("DATABASE_URL").map_err(|_| DatabaseError::ConfigMissing("DATABASE_URL"))
    }

    /// Swap the database name in DATABASE_URL's path
    pub fn build_connection_string(database_name: &str) -> Result<String, DatabaseError> {
        if !Self::is_valid_db_name(database_name) {
            return Err(DatabaseError::InvalidTenantName(database_name.to_string()));
        }

        let base = Self::central_url()?;
        let mut url = url::Url::parse(&base).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        // Replace the path to the database name (ensure leading slash)
        url.set_path(&format!("/{}", database_name));
        Ok(url.into())
    }

    /// Pings the main pool to ensure connectivity
    pub async fn health_check() -> Result<(), DatabaseError> {
        let pool = Self::main_pool().await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    /// Database names come from the registry and end up in connection
    /// strings: ASCII alphanumerics and underscores only, 1..=63 bytes.
    pub fn is_valid_db_name(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= Self::MAX_DB_NAME_LEN
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}
