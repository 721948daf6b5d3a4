use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(5));

    // Every connection to :memory: opens its own database, so pin exactly one
    // and never let it be recycled.
    let options = if database_url.contains(":memory:") {
        options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        options.max_connections(5)
    };

    options.connect(database_url).await
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Create key/value storage table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS storage (
            key VARCHAR(255) PRIMARY KEY,
            value TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create deployments table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deployment (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            application TEXT NOT NULL,
            environment TEXT NOT NULL,
            "commit" TEXT,
            tag TEXT,
            date_created TIMESTAMP NOT NULL,
            date_last_modified TIMESTAMP NOT NULL,
            deployed BOOLEAN,
            tested BOOLEAN,
            msg TEXT,
            status TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_deployment_app_env ON deployment(application, environment)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}
