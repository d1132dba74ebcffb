use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use super::{OwnerRecord, OwnerUpdate, PersistenceAdapter, PersistenceError, ProvisioningStatus};
use crate::config::DatabaseConfig;
use crate::workflow::types::{DerivedResourceId, OwnerId, SourceResourceId};

/// SQLite-backed owner record store
#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Open (creating if needed) the database and optionally run migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, PersistenceError> {
        if !Sqlite::database_exists(&config.url).await? {
            info!("Creating database at {}", config.url);
            Sqlite::create_database(&config.url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect(&config.url)
            .await?;

        if config.auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Database migrations completed");
        }

        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get_record(&self, owner_id: &OwnerId) -> Result<Option<OwnerRecord>, PersistenceError> {
        let row = sqlx::query(
            r#"
            SELECT owner_id, source_resource_id, derived_resource_id, status, error,
                   completed_at, updated_at
            FROM owner_provisioning
            WHERE owner_id = ?1
            "#,
        )
        .bind(owner_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<OwnerRecord, PersistenceError> {
    let owner_id: String = row.try_get("owner_id")?;
    let source: Option<String> = row.try_get("source_resource_id")?;
    let derived: Option<String> = row.try_get("derived_resource_id")?;
    let status: Option<String> = row.try_get("status")?;
    let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(OwnerRecord {
        owner_id: OwnerId(owner_id),
        source_resource_id: source.map(SourceResourceId),
        derived_resource_id: derived.map(DerivedResourceId),
        status: status.as_deref().and_then(ProvisioningStatus::parse),
        error: row.try_get("error")?,
        completed_at,
        updated_at,
    })
}

#[async_trait]
impl PersistenceAdapter for SqlitePersistence {
    async fn update(&self, owner_id: &OwnerId, update: OwnerUpdate) -> Result<(), PersistenceError> {
        let overwrite_derived = update.derived_resource_id.is_some();
        let derived = update.derived_resource_id.flatten();
        let overwrite_error = update.error.is_some();
        let error = update.error.flatten();
        let overwrite_completed_at = update.completed_at.is_some();
        let completed_at = update.completed_at.flatten();

        sqlx::query(
            r#"
            INSERT INTO owner_provisioning
                (owner_id, source_resource_id, derived_resource_id, status, error, completed_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(owner_id) DO UPDATE SET
                source_resource_id = COALESCE(excluded.source_resource_id, owner_provisioning.source_resource_id),
                derived_resource_id = CASE WHEN ?8 THEN excluded.derived_resource_id ELSE owner_provisioning.derived_resource_id END,
                status = COALESCE(excluded.status, owner_provisioning.status),
                error = CASE WHEN ?9 THEN excluded.error ELSE owner_provisioning.error END,
                completed_at = CASE WHEN ?10 THEN excluded.completed_at ELSE owner_provisioning.completed_at END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(owner_id.as_str())
        .bind(update.source_resource_id.as_ref().map(|s| s.as_str()))
        .bind(derived.as_ref().map(|d| d.as_str()))
        .bind(update.status.map(ProvisioningStatus::as_str))
        .bind(error)
        .bind(completed_at)
        .bind(update.updated_at)
        .bind(overwrite_derived)
        .bind(overwrite_error)
        .bind(overwrite_completed_at)
        .execute(&self.pool)
        .await?;

        debug!(owner_id = %owner_id, "Owner provisioning record stored");
        Ok(())
    }

    async fn pending_records(&self) -> Result<Vec<OwnerRecord>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT owner_id, source_resource_id, derived_resource_id, status, error,
                   completed_at, updated_at
            FROM owner_provisioning
            WHERE source_resource_id IS NOT NULL
              AND (status IS NULL OR status NOT IN ('completed', 'failed', 'cancelled'))
            ORDER BY owner_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}
