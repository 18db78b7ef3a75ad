use db_pool::{create_pool as create_pg_pool, migrate, DbConfig as DbPoolConfig, DbPoolError, Migrator};
use deadpool_postgres::Pool;

/// Schema for messages, conversation rows and per-pair counters.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn init_pool(database_url: &str) -> Result<Pool, DbPoolError> {
    let cfg = DbPoolConfig::with_url("im-message-service", database_url.to_string());
    cfg.log_config();
    let pool = create_pg_pool(cfg).await?;
    migrate(database_url, &MIGRATOR).await?;
    Ok(pool)
}
