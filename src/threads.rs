//! Chat thread store: thread rows, seq-ordered turns, per-thread busy guard.
//!
//! A thread binds to exactly one asset for its whole lifetime. Turns are
//! totally ordered by `seq`, assigned inside a transaction at append time,
//! so a concurrent history read observes only fully-committed turns.
//!
//! At most one generation may be in flight per thread. The guard is an
//! in-memory concurrent map entry released on drop; a second caller fails
//! fast with `ThreadBusy` instead of interleaving turns.

use dashmap::DashMap;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::models::{ChatThread, RetrievedChunk, Role, Turn};
use crate::registry::AssetRegistry;

#[derive(Clone)]
pub struct ThreadStore {
    pool: SqlitePool,
    busy: Arc<DashMap<String, ()>>,
}

/// Held for the duration of one generation; releases the thread on drop.
pub struct BusyGuard {
    busy: Arc<DashMap<String, ()>>,
    thread_id: String,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.remove(&self.thread_id);
    }
}

impl ThreadStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            busy: Arc::new(DashMap::new()),
        }
    }

    /// Create a thread bound to an asset. The asset must exist
    /// (`AssetNotFound`) and be Indexed (`AssetNotReady`); on failure no
    /// thread is created.
    pub async fn start(&self, registry: &AssetRegistry, asset_id: &str) -> Result<String> {
        registry.get_indexed(asset_id).await?;

        let thread_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO threads (id, asset_id, created_at) VALUES (?, ?, ?)")
            .bind(&thread_id)
            .bind(asset_id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(thread_id)
    }

    /// Fetch a thread, or `ThreadNotFound`.
    pub async fn get(&self, thread_id: &str) -> Result<ChatThread> {
        let row = sqlx::query("SELECT id, asset_id, created_at FROM threads WHERE id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;

        let row = row.ok_or_else(|| ServiceError::ThreadNotFound(thread_id.to_string()))?;
        Ok(ChatThread {
            id: row.get("id"),
            asset_id: row.get("asset_id"),
            created_at: row.get("created_at"),
        })
    }

    /// Claim the thread for a generation, or `ThreadBusy` if one is
    /// already in flight.
    pub fn try_begin_generation(&self, thread_id: &str) -> Result<BusyGuard> {
        match self.busy.entry(thread_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ServiceError::ThreadBusy(thread_id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(());
                Ok(BusyGuard {
                    busy: self.busy.clone(),
                    thread_id: thread_id.to_string(),
                })
            }
        }
    }

    /// Append a user turn; returns its sequence number.
    pub async fn append_user_turn(&self, thread_id: &str, content: &str) -> Result<i64> {
        self.append_turn(thread_id, Role::User, content, &[], false)
            .await
    }

    /// Append an agent turn with the chunk set that grounded it. Called
    /// after generation completes — or is cut short, in which case the
    /// partial content is kept and flagged `truncated`.
    pub async fn append_agent_turn(
        &self,
        thread_id: &str,
        content: &str,
        retrieved_context: &[RetrievedChunk],
        truncated: bool,
    ) -> Result<i64> {
        self.append_turn(thread_id, Role::Agent, content, retrieved_context, truncated)
            .await
    }

    async fn append_turn(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
        retrieved_context: &[RetrievedChunk],
        truncated: bool,
    ) -> Result<i64> {
        let context_json = serde_json::to_string(retrieved_context)
            .map_err(|e| ServiceError::Internal(anyhow::Error::new(e)))?;
        let now = chrono::Utc::now().timestamp();

        // Seq assignment and insert share one transaction so appends are
        // atomic and seq stays gapless per thread.
        let mut tx = self.pool.begin().await?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM threads WHERE id = ?")
            .bind(thread_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(ServiceError::ThreadNotFound(thread_id.to_string()));
        }

        let seq: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM turns WHERE thread_id = ?")
                .bind(thread_id)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO turns (thread_id, seq, role, content, truncated, context_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(thread_id)
        .bind(seq)
        .bind(role.as_str())
        .bind(content)
        .bind(truncated as i64)
        .bind(&context_json)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(seq)
    }

    /// All turns of a thread in sequence order.
    pub async fn history(&self, thread_id: &str) -> Result<Vec<Turn>> {
        // Distinguish an empty thread from an unknown one.
        self.get(thread_id).await?;

        let rows = sqlx::query(
            "SELECT seq, role, content, truncated, context_json FROM turns WHERE thread_id = ? ORDER BY seq",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        let turns = rows
            .iter()
            .map(|row| {
                let role: String = row.get("role");
                let context_json: String = row.get("context_json");
                let truncated: i64 = row.get("truncated");
                Turn {
                    role: Role::parse(&role).unwrap_or(Role::User),
                    content: row.get("content"),
                    sequence_number: row.get("seq"),
                    truncated: truncated != 0,
                    retrieved_context: serde_json::from_str(&context_json).unwrap_or_default(),
                }
            })
            .collect();

        Ok(turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn busy_guard_excludes_second_claim() {
        let store = ThreadStore {
            pool: SqlitePool::connect_lazy("sqlite::memory:").unwrap(),
            busy: Arc::new(DashMap::new()),
        };

        let guard = store.try_begin_generation("t1").unwrap();
        let second = store.try_begin_generation("t1");
        assert!(matches!(second, Err(ServiceError::ThreadBusy(_))));

        // Independent threads are unaffected.
        let other = store.try_begin_generation("t2");
        assert!(other.is_ok());

        drop(guard);
        assert!(store.try_begin_generation("t1").is_ok());
    }
}
