use crate::config::DbConfig;
use crate::metrics;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn init_pool(config: &DbConfig) -> Result<PgPool, sqlx::Error> {
    debug!(
        max = config.max_connections,
        min = config.min_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "creating database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect(&config.database_url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    info!("database pool created and verified");

    let pool_clone = pool.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            metrics::update_pool_metrics(&pool_clone);
        }
    });

    Ok(pool)
}

/// Apply embedded migrations. Failure is fatal for startup.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await?;
    info!("messaging migrations applied");
    Ok(())
}
