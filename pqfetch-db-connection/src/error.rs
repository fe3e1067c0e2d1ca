use thiserror::Error;

/// Errors that can occur while configuring or creating the database pool.
#[derive(Debug, Error)]
pub enum DbConnectionError {
    #[error("environment variable {0} is missing")]
    MissingEnvVar(String),
    #[error("database url cannot be empty")]
    EmptyDatabaseUrl,
    #[error("database url must use the postgres scheme: {0}")]
    UnsupportedScheme(String),
    #[error("invalid pool size for {var}: {reason}")]
    InvalidPoolSize { var: String, reason: &'static str },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}
