//! Deployment Repository
//!
//! Handles all database operations related to deployment records.
//! Rows are never deleted; every write runs in its own transaction.

use ads_deploy_core::domain::deployment::{Deployment, DeploymentUpdate};
use ads_deploy_core::dto::deployment::SubmitDeployment;
use sqlx::SqlitePool;

const COLUMNS: &str = r#"id, application, environment, "commit", tag, date_created,
    date_last_modified, deployed, tested, msg, status"#;

/// Create a new deployment record
pub async fn create(pool: &SqlitePool, req: &SubmitDeployment) -> Result<Deployment, sqlx::Error> {
    let now = chrono::Utc::now();
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, DeploymentRow>(&format!(
        r#"
        INSERT INTO deployment (application, environment, "commit", tag, date_created,
                                date_last_modified, status)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING {}
        "#,
        COLUMNS
    ))
    .bind(&req.application)
    .bind(&req.environment)
    .bind(&req.commit)
    .bind(&req.tag)
    .bind(now)
    .bind(now)
    .bind("submitted")
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row.into())
}

/// Apply an update to a deployment, bumping its modification date
///
/// Returns `None` if no deployment has this id.
pub async fn update(
    pool: &SqlitePool,
    id: i64,
    changes: &DeploymentUpdate,
) -> Result<Option<Deployment>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, DeploymentRow>(&format!(
        r#"
        UPDATE deployment
        SET deployed = COALESCE(?, deployed),
            tested = COALESCE(?, tested),
            msg = COALESCE(?, msg),
            status = COALESCE(?, status),
            date_last_modified = ?
        WHERE id = ?
        RETURNING {}
        "#,
        COLUMNS
    ))
    .bind(changes.deployed)
    .bind(changes.tested)
    .bind(&changes.msg)
    .bind(&changes.status)
    .bind(chrono::Utc::now())
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row.map(|r| r.into()))
}

/// Find a deployment by ID
pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Deployment>, sqlx::Error> {
    let row = sqlx::query_as::<_, DeploymentRow>(&format!(
        "SELECT {} FROM deployment WHERE id = ?",
        COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List deployments, newest first, optionally narrowed to an application
/// and/or environment
pub async fn list(
    pool: &SqlitePool,
    application: Option<&str>,
    environment: Option<&str>,
) -> Result<Vec<Deployment>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DeploymentRow>(&format!(
        r#"
        SELECT {}
        FROM deployment
        WHERE (? IS NULL OR application = ?)
          AND (? IS NULL OR environment = ?)
        ORDER BY id DESC
        "#,
        COLUMNS
    ))
    .bind(application)
    .bind(application)
    .bind(environment)
    .bind(environment)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct DeploymentRow {
    id: i64,
    application: String,
    environment: String,
    commit: Option<String>,
    tag: Option<String>,
    date_created: chrono::DateTime<chrono::Utc>,
    date_last_modified: chrono::DateTime<chrono::Utc>,
    deployed: Option<bool>,
    tested: Option<bool>,
    msg: Option<String>,
    status: Option<String>,
}

impl From<DeploymentRow> for Deployment {
    fn from(row: DeploymentRow) -> Self {
        Deployment {
            id: row.id,
            application: row.application,
            environment: row.environment,
            commit: row.commit,
            tag: row.tag,
            date_created: row.date_created,
            date_last_modified: row.date_last_modified,
            deployed: row.deployed,
            tested: row.tested,
            msg: row.msg,
            status: row.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn submit(application: &str, environment: &str) -> SubmitDeployment {
        SubmitDeployment {
            application: application.to_string(),
            environment: environment.to_string(),
            action: Default::default(),
            commit: Some("a1b2c3".to_string()),
            tag: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let pool = test_pool().await;

        let created = create(&pool, &submit("sandbox", "sandbox-prod")).await.unwrap();
        assert_eq!(created.status.as_deref(), Some("submitted"));
        assert_eq!(created.version(), Some("a1b2c3"));
        assert_eq!(created.deployed, None);

        let found = find_by_id(&pool, created.id).await.unwrap().unwrap();
        assert_eq!(found.application, "sandbox");
        assert_eq!(found.date_created, created.date_created);
    }

    #[tokio::test]
    async fn test_update_keeps_unset_columns_and_creation_date() {
        let pool = test_pool().await;
        let created = create(&pool, &submit("sandbox", "sandbox-prod")).await.unwrap();

        let first = DeploymentUpdate {
            deployed: Some(true),
            msg: Some("deployed".to_string()),
            ..Default::default()
        };
        update(&pool, created.id, &first).await.unwrap().unwrap();

        let second = DeploymentUpdate {
            tested: Some(false),
            status: Some("test:failed".to_string()),
            ..Default::default()
        };
        let updated = update(&pool, created.id, &second).await.unwrap().unwrap();

        assert_eq!(updated.deployed, Some(true));
        assert_eq!(updated.tested, Some(false));
        assert_eq!(updated.msg.as_deref(), Some("deployed"));
        assert_eq!(updated.status.as_deref(), Some("test:failed"));
        assert_eq!(updated.date_created, created.date_created);
        assert!(updated.date_last_modified >= created.date_last_modified);

        assert!(update(&pool, 9999, &second).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let pool = test_pool().await;
        create(&pool, &submit("sandbox", "sandbox-prod")).await.unwrap();
        create(&pool, &submit("sandbox", "sandbox-dev")).await.unwrap();
        create(&pool, &submit("myads", "myads-prod")).await.unwrap();

        assert_eq!(list(&pool, None, None).await.unwrap().len(), 3);
        assert_eq!(list(&pool, Some("sandbox"), None).await.unwrap().len(), 2);

        let narrowed = list(&pool, Some("sandbox"), Some("sandbox-dev")).await.unwrap();
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].environment, "sandbox-dev");

        // newest first
        let all = list(&pool, None, None).await.unwrap();
        assert_eq!(all[0].application, "myads");
    }
}
