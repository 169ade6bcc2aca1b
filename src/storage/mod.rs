//! Storage layer for exported sessions and backend call logs.
//!
//! The engine keeps live sessions in memory; this layer only receives the
//! frozen [`SessionRecord`] at export time, its flat [`RoundRow`] projection,
//! and one [`GenerationLog`] per generative backend call.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::session::{RoundRow, SessionRecord, SessionSummary};

/// One call to the generative backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationLog {
    /// Unique log identifier.
    pub id: String,
    pub session_id: String,
    pub round_index: usize,
    /// Model that answered; `None` when every attempt failed.
    pub model: Option<String>,
    pub latency_ms: i64,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl GenerationLog {
    /// Create a successful log entry.
    pub fn success(
        session_id: impl Into<String>,
        round_index: usize,
        model: impl Into<String>,
        latency_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            round_index,
            model: Some(model.into()),
            latency_ms,
            success: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Create a failed log entry.
    pub fn failure(
        session_id: impl Into<String>,
        round_index: usize,
        error: impl Into<String>,
        latency_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            round_index,
            model: None,
            latency_ms,
            success: false,
            error: Some(error.into()),
            created_at: Utc::now(),
        }
    }
}

/// Storage trait for database operations.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or replace a session record together with its round rows.
    async fn save_session_record(&self, record: &SessionRecord) -> StorageResult<()>;
    /// Get a stored session record by ID.
    async fn get_session_record(&self, session_id: &str) -> StorageResult<Option<SessionRecord>>;
    /// Round rows of a session, ordered by round index.
    async fn get_round_rows(&self, session_id: &str) -> StorageResult<Vec<RoundRow>>;
    /// Most recently created sessions first.
    async fn list_session_records(&self, limit: u32) -> StorageResult<Vec<SessionSummary>>;

    /// Record a backend call.
    async fn log_generation(&self, log: &GenerationLog) -> StorageResult<()>;
    /// Backend calls of a session, oldest first.
    async fn get_generation_logs(&self, session_id: &str) -> StorageResult<Vec<GenerationLog>>;
}
