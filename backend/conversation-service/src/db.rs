use db_pool::{create_pool, DbConfig};
use sqlx::migrate::Migrator;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn init_pool(config: DbConfig) -> AppResult<PgPool> {
    config.log_config();
    create_pool(config)
        .await
        .map_err(|e| AppError::StartServer(format!("db: {e}")))
}

pub async fn run_migrations(pool: &PgPool) -> AppResult<()> {
    tracing::info!("Running database migrations");
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| AppError::StartServer(format!("migrations: {e}")))
}
