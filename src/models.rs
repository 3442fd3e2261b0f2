//! Core data models for the ingestion and chat pipeline.
//!
//! These types mirror the persisted rows: assets, chunks, chat threads,
//! and turns. They are plain data; the stores in [`crate::registry`],
//! [`crate::index`], and [`crate::threads`] own the persistence logic.

use serde::{Deserialize, Serialize};

/// Ingestion state of an asset. Only `Indexed` assets are queryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Pending,
    Indexed,
    Failed,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::Indexed => "indexed",
            AssetStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AssetStatus::Pending),
            "indexed" => Some(AssetStatus::Indexed),
            "failed" => Some(AssetStatus::Failed),
            _ => None,
        }
    }
}

/// One ingested document.
#[derive(Debug, Clone, Serialize)]
pub struct Asset {
    pub id: String,
    pub source_path: String,
    pub status: AssetStatus,
    pub chunk_count: i64,
    /// Failure reason for `Failed` assets.
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A passage of an asset's extracted text, plus traceability metadata.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// `{asset_id}_{chunk_index}` — deterministic, so re-upserting the same
    /// ingestion batch is idempotent.
    pub id: String,
    pub asset_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// Byte offset of this chunk in the extracted document text.
    pub start_offset: i64,
    pub end_offset: i64,
    /// 1-based page containing the chunk start.
    pub page: i64,
}

/// A chunk returned from similarity search, with its score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub page: i64,
    pub score: f32,
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "agent" => Some(Role::Agent),
            _ => None,
        }
    }
}

/// One message within a chat thread. Ordering within a thread is solely by
/// `sequence_number`; consecutive turns with the same role are legal.
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub sequence_number: i64,
    /// True when the agent content is a partial result (mid-stream failure
    /// or client cancellation).
    pub truncated: bool,
    /// Chunk set that grounded this agent turn; empty for user turns.
    pub retrieved_context: Vec<RetrievedChunk>,
}

/// A conversation bound to one asset for its whole lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct ChatThread {
    pub id: String,
    pub asset_id: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for s in [AssetStatus::Pending, AssetStatus::Indexed, AssetStatus::Failed] {
            assert_eq!(AssetStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(AssetStatus::parse("archived"), None);
    }

    #[test]
    fn role_roundtrip() {
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::parse("agent"), Some(Role::Agent));
        assert_eq!(Role::parse("system"), None);
    }
}
