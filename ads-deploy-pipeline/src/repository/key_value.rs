//! Key/Value Repository
//!
//! Generic persistent key/value storage; at most one row per key.

use ads_deploy_core::domain::key_value::KeyValue;
use sqlx::SqlitePool;

/// Insert the key or overwrite its value, atomically
pub async fn upsert(pool: &SqlitePool, key: &str, value: &str) -> Result<KeyValue, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, KeyValueRow>(
        r#"
        INSERT INTO storage (key, value)
        VALUES (?, ?)
        ON CONFLICT (key) DO UPDATE SET value = excluded.value
        RETURNING key, value
        "#,
    )
    .bind(key)
    .bind(value)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row.into())
}

/// Find a value by key
pub async fn find(pool: &SqlitePool, key: &str) -> Result<Option<KeyValue>, sqlx::Error> {
    let row = sqlx::query_as::<_, KeyValueRow>("SELECT key, value FROM storage WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.into()))
}

/// List all rows whose key starts with `prefix`
pub async fn list_by_prefix(pool: &SqlitePool, prefix: &str) -> Result<Vec<KeyValue>, sqlx::Error> {
    let rows = sqlx::query_as::<_, KeyValueRow>(
        "SELECT key, value FROM storage WHERE substr(key, 1, length(?)) = ? ORDER BY key",
    )
    .bind(prefix)
    .bind(prefix)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct KeyValueRow {
    key: String,
    value: Option<String>,
}

impl From<KeyValueRow> for KeyValue {
    fn from(row: KeyValueRow) -> Self {
        KeyValue {
            key: row.key,
            value: row.value,
        }
    }
}
