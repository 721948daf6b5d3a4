//! Key/Value Service

use ads_deploy_core::domain::key_value::KeyValue;
use ads_deploy_core::domain::payload::Payload;
use sqlx::SqlitePool;

use crate::repository::key_value_repository;

/// Record now as the last time this payload's environment was used
pub async fn touch_last_used(pool: &SqlitePool, payload: &Payload) -> Result<KeyValue, sqlx::Error> {
    let key = payload.last_used_key();
    let now = chrono::Utc::now().to_rfc3339();

    let row = key_value_repository::upsert(pool, &key, &now).await?;
    tracing::info!(key = %row.key, value = %now, "Environment last-used timestamp recorded");
    Ok(row)
}

pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<KeyValue>, sqlx::Error> {
    key_value_repository::find(pool, key).await
}
