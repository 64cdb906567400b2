//! Embedded migrations for the auth store.

use sqlx::SqlitePool;

static AUTH_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/auth");

pub async fn run(pool: &SqlitePool) -> anyhow::Result<()> {
    AUTH_MIGRATOR.run(pool).await?;
    Ok(())
}
