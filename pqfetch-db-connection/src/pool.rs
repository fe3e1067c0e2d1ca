use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DbConnectionConfig;
use crate::error::DbConnectionError;
use crate::utils::{config_metadata, sanitize_database_url};

pub type DbPool = PgPool;

const POSTGRES_SCHEMES: &[&str] = &["postgres://", "postgresql://"];

/// Creates the PostgreSQL connection pool and records the attempt in the trace log.
///
/// A connection is established before returning, so a wrong url or an
/// unreachable server surfaces here rather than on the first write-back.
pub async fn create_pool(config: &DbConnectionConfig) -> Result<DbPool, DbConnectionError> {
    let metadata = config_metadata(config);
    tracing::debug!(config = %metadata, "creating database pool");

    match create_pool_inner(config).await {
        Ok(pool) => {
            tracing::info!(
                db_url = %sanitize_database_url(&config.url),
                max_connections = config.max_connections,
                "database pool ready"
            );
            Ok(pool)
        }
        Err(err) => {
            tracing::error!(
                db_url = %sanitize_database_url(&config.url),
                error = %err,
                "failed to create database pool"
            );
            Err(err)
        }
    }
}

async fn create_pool_inner(config: &DbConnectionConfig) -> Result<DbPool, DbConnectionError> {
    let url = config.url.trim();
    if url.is_empty() {
        return Err(DbConnectionError::EmptyDatabaseUrl);
    }
    if !is_postgres_url(url) {
        return Err(DbConnectionError::UnsupportedScheme(
            sanitize_database_url(url).into_owned(),
        ));
    }

    let mut opts = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout())
        .test_before_acquire(config.test_before_acquire);

    if let Some(idle) = config.idle_timeout() {
        opts = opts.idle_timeout(idle);
    }

    opts.connect(url).await.map_err(Into::into)
}

pub(crate) fn is_postgres_url(url: &str) -> bool {
    let bytes = url.as_bytes();
    POSTGRES_SCHEMES.iter().any(|scheme| {
        bytes.len() >= scheme.len() && bytes[..scheme.len()].eq_ignore_ascii_case(scheme.as_bytes())
    })
}
