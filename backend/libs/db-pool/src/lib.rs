//! Database connection pool management
//!
//! Builds deadpool-postgres pools from environment configuration and runs
//! each service's embedded sqlx migrations.

pub mod env_utils;

use deadpool_postgres::tokio_postgres::{Config as PgConfig, NoTls};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use env_utils::{parse_env_required, parse_env_with_default};
use sqlx::postgres::PgConnection;
use sqlx::Connection;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

pub use deadpool_postgres::PoolError;
pub use sqlx::migrate::Migrator;

pub type PgPool = Pool;

/// Errors raised while building or migrating a pool
#[derive(Debug, Error)]
pub enum DbPoolError {
    #[error("Invalid database configuration: {0}")]
    Config(String),

    #[error("Failed to build pool: {0}")]
    Build(String),

    #[error("Database connection failed: {0}")]
    Connect(#[from] PoolError),

    #[error("Database query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("Database connection verification timed out after {0}s")]
    Timeout(u64),

    #[error("Migration connection failed: {0}")]
    MigrationConnect(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Database connection pool configuration
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Service name used in log fields
    pub service_name: String,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Connections opened eagerly at startup
    pub min_connections: u32,
    /// Connection creation timeout (new connection to PostgreSQL)
    pub connect_timeout_secs: u64,
    /// Connection acquisition timeout (get connection from pool)
    pub acquire_timeout_secs: u64,
    /// Recycle check timeout
    pub recycle_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            service_name: String::from("unknown"),
            database_url: String::new(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 10,
            recycle_timeout_secs: 5,
        }
    }
}

impl DbConfig {
    /// Read pool settings from `DATABASE_URL` and the `DB_*` variables.
    pub fn from_env(service_name: &str) -> Result<Self, DbPoolError> {
        let database_url =
            parse_env_required::<String>("DATABASE_URL").map_err(DbPoolError::Config)?;
        Ok(Self::with_url(service_name, database_url))
    }

    /// Same as [`DbConfig::from_env`] with an explicit connection URL.
    pub fn with_url(service_name: &str, database_url: String) -> Self {
        let defaults = Self::default();
        Self {
            service_name: service_name.to_string(),
            database_url,
            max_connections: parse_env_with_default(
                "DB_MAX_CONNECTIONS",
                defaults.max_connections,
            ),
            min_connections: parse_env_with_default(
                "DB_MIN_CONNECTIONS",
                defaults.min_connections,
            ),
            connect_timeout_secs: parse_env_with_default(
                "DB_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            ),
            acquire_timeout_secs: parse_env_with_default(
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout_secs,
            ),
            recycle_timeout_secs: parse_env_with_default(
                "DB_RECYCLE_TIMEOUT_SECS",
                defaults.recycle_timeout_secs,
            ),
        }
    }

    pub fn log_config(&self) {
        info!(
            service = %self.service_name,
            max_connections = self.max_connections,
            min_connections = self.min_connections,
            connect_timeout_secs = self.connect_timeout_secs,
            acquire_timeout_secs = self.acquire_timeout_secs,
            "Database pool configuration"
        );
    }
}

/// Build a deadpool-postgres pool and verify it with `SELECT 1`.
pub async fn create_pool(config: DbConfig) -> Result<PgPool, DbPoolError> {
    debug!(
        service = %config.service_name,
        max = config.max_connections,
        min = config.min_connections,
        "Creating database pool"
    );

    let pg_config: PgConfig = config
        .database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| DbPoolError::Config(e.to_string()))?;

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    let pool = Pool::builder(mgr)
        .max_size(config.max_connections as usize)
        .runtime(Runtime::Tokio1)
        .wait_timeout(Some(Duration::from_secs(config.acquire_timeout_secs)))
        .create_timeout(Some(Duration::from_secs(config.connect_timeout_secs)))
        .recycle_timeout(Some(Duration::from_secs(config.recycle_timeout_secs)))
        .build()
        .map_err(|e| DbPoolError::Build(e.to_string()))?;

    let verify = async {
        // Warm up the eager connections; each one is returned on drop.
        let mut warm = Vec::with_capacity(config.min_connections as usize);
        for _ in 0..config.min_connections.max(1) {
            warm.push(pool.get().await?);
        }
        warm[0].simple_query("SELECT 1").await?;
        Ok::<(), DbPoolError>(())
    };

    match tokio::time::timeout(Duration::from_secs(config.connect_timeout_secs), verify).await {
        Ok(Ok(())) => {
            info!(
                service = %config.service_name,
                "Database pool created and verified successfully"
            );
            Ok(pool)
        }
        Ok(Err(e)) => {
            error!(
                service = %config.service_name,
                error = %e,
                "Database connection verification failed"
            );
            Err(e)
        }
        Err(_) => {
            error!(
                service = %config.service_name,
                timeout_secs = config.connect_timeout_secs,
                "Database connection verification timeout"
            );
            Err(DbPoolError::Timeout(config.connect_timeout_secs))
        }
    }
}

/// Migrate database schema
///
/// Runs on a dedicated sqlx connection; sqlx records applied versions in
/// `_sqlx_migrations` and serialises concurrent runners with an advisory lock.
pub async fn migrate(database_url: &str, migrator: &Migrator) -> Result<(), DbPoolError> {
    debug!(migrations = migrator.iter().count(), "Running database migrations");

    let mut conn = PgConnection::connect(database_url).await?;
    migrator.run(&mut conn).await?;
    conn.close().await?;

    info!("Database migrations completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_pool_env() {
        for key in [
            "DB_MAX_CONNECTIONS",
            "DB_MIN_CONNECTIONS",
            "DB_CONNECT_TIMEOUT_SECS",
            "DB_ACQUIRE_TIMEOUT_SECS",
            "DB_RECYCLE_TIMEOUT_SECS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.connect_timeout_secs, 5);
        assert_eq!(config.acquire_timeout_secs, 10);
    }

    #[test]
    #[serial_test::serial]
    fn test_config_from_env_without_override() {
        clear_pool_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/test");

        let config = DbConfig::from_env("im-message-service").unwrap();
        assert_eq!(config.service_name, "im-message-service");
        assert_eq!(config.database_url, "postgres://localhost/test");
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.acquire_timeout_secs, 10);

        std::env::remove_var("DATABASE_URL");
    }

    #[test]
    #[serial_test::serial]
    fn test_config_from_env_requires_url() {
        std::env::remove_var("DATABASE_URL");
        let err = DbConfig::from_env("im-message-service").unwrap_err();
        assert!(matches!(err, DbPoolError::Config(_)));
    }

    #[test]
    #[serial_test::serial]
    fn test_env_override() {
        clear_pool_env();
        std::env::set_var("DB_MAX_CONNECTIONS", "64");
        std::env::set_var("DB_MIN_CONNECTIONS", "not-a-number");

        let config = DbConfig::with_url("svc", "postgres://localhost/x".into());
        assert_eq!(config.max_connections, 64);
        assert_eq!(config.min_connections, 2);

        clear_pool_env();
    }

    #[tokio::test]
    async fn test_create_pool_rejects_bad_url() {
        let config = DbConfig::with_url("svc", "not a url at all ::".into());
        let err = create_pool(config).await.unwrap_err();
        assert!(matches!(err, DbPoolError::Config(_)));
    }
}
