//! Asset registry — the single source of truth for queryability.
//!
//! Assets are created `Pending`, move to `Indexed` only after every chunk
//! of the ingestion batch has been embedded and stored, and to `Failed` on
//! any stage error. Queries consult the status here instead of locking the
//! index, so a search can never observe a half-written partition.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::models::{Asset, AssetStatus};

#[derive(Clone)]
pub struct AssetRegistry {
    pool: SqlitePool,
}

impl AssetRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a new asset in `Pending` state and return its id.
    pub async fn create(&self, source_path: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO assets (id, source_path, status, chunk_count, created_at, updated_at)
            VALUES (?, ?, 'pending', 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(source_path)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Transition `Pending → Indexed` once all chunk upserts succeeded.
    pub async fn mark_indexed(&self, asset_id: &str, chunk_count: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE assets SET status = 'indexed', chunk_count = ?, error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(chunk_count)
        .bind(now)
        .bind(asset_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transition to `Failed`, recording the stage error.
    pub async fn mark_failed(&self, asset_id: &str, reason: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE assets SET status = 'failed', error = ?, updated_at = ? WHERE id = ?")
            .bind(reason)
            .bind(now)
            .bind(asset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch an asset, or `AssetNotFound`.
    pub async fn get(&self, asset_id: &str) -> Result<Asset> {
        let row = sqlx::query(
            "SELECT id, source_path, status, chunk_count, error, created_at, updated_at FROM assets WHERE id = ?",
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| ServiceError::AssetNotFound(asset_id.to_string()))?;
        Ok(asset_from_row(&row))
    }

    /// Fetch an asset and require it to be queryable. Missing assets are
    /// `AssetNotFound`; Pending/Failed assets are `AssetNotReady`.
    pub async fn get_indexed(&self, asset_id: &str) -> Result<Asset> {
        let asset = self.get(asset_id).await?;
        if asset.status != AssetStatus::Indexed {
            return Err(ServiceError::AssetNotReady(asset_id.to_string()));
        }
        Ok(asset)
    }

    /// All assets, newest first.
    pub async fn list(&self) -> Result<Vec<Asset>> {
        let rows = sqlx::query(
            "SELECT id, source_path, status, chunk_count, error, created_at, updated_at FROM assets ORDER BY created_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(asset_from_row).collect())
    }
}

fn asset_from_row(row: &sqlx::sqlite::SqliteRow) -> Asset {
    let status: String = row.get("status");
    Asset {
        id: row.get("id"),
        source_path: row.get("source_path"),
        status: AssetStatus::parse(&status).unwrap_or(AssetStatus::Failed),
        chunk_count: row.get("chunk_count"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
