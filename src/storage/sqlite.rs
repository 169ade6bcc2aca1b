use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{GenerationLog, Storage};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::session::{RoundRow, SessionRecord, SessionSummary};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// In-memory database, mainly for tests. A single connection keeps every
    /// query on the same database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_session_record(&self, record: &SessionRecord) -> StorageResult<()> {
        let document = serde_json::to_string(record)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, participant_id, phase, condition, round_count, created_at, ended_at, exported_at, record)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                phase = excluded.phase,
                condition = excluded.condition,
                round_count = excluded.round_count,
                ended_at = excluded.ended_at,
                exported_at = excluded.exported_at,
                record = excluded.record
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.participant_id)
        .bind(record.phase.as_str())
        .bind(record.condition.map(|c| c.as_str()))
        .bind(record.rounds.len() as i64)
        .bind(record.created_at.to_rfc3339())
        .bind(record.ended_at.map(|t| t.to_rfc3339()))
        .bind(record.exported_at.to_rfc3339())
        .bind(&document)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM round_rows WHERE session_id = ?")
            .bind(&record.session_id)
            .execute(&mut *tx)
            .await?;

        for row in record.rows() {
            sqlx::query(
                r#"
                INSERT INTO round_rows (
                    session_id, participant_id, round_index, scaffolding_type, intensity,
                    node_count, edge_count, added_nodes, removed_nodes, added_edges, removed_edges,
                    node_coverage_pct, edge_coverage_pct, learner_turns, agent_turns,
                    generated_turns, fallback_turns, duration_secs, zpd_estimate, completion_reason
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&row.session_id)
            .bind(&row.participant_id)
            .bind(row.round_index as i64)
            .bind(row.scaffolding_type.map(|k| k.as_str()))
            .bind(row.intensity.map(|i| i.as_str()))
            .bind(row.node_count as i64)
            .bind(row.edge_count as i64)
            .bind(row.added_nodes as i64)
            .bind(row.removed_nodes as i64)
            .bind(row.added_edges as i64)
            .bind(row.removed_edges as i64)
            .bind(row.node_coverage_pct)
            .bind(row.edge_coverage_pct)
            .bind(row.learner_turns as i64)
            .bind(row.agent_turns as i64)
            .bind(row.generated_turns as i64)
            .bind(row.fallback_turns as i64)
            .bind(row.duration_secs)
            .bind(row.zpd_estimate)
            .bind(row.completion_reason.map(|r| r.as_str()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            session_id = %record.session_id,
            rounds = record.rounds.len(),
            "Session record stored"
        );
        Ok(())
    }

    async fn get_session_record(&self, session_id: &str) -> StorageResult<Option<SessionRecord>> {
        let document: Option<(String,)> = sqlx::query_as("SELECT record FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        match document {
            Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn get_round_rows(&self, session_id: &str) -> StorageResult<Vec<RoundRow>> {
        let rows: Vec<RoundRowRecord> = sqlx::query_as(
            r#"
            SELECT session_id, participant_id, round_index, scaffolding_type, intensity,
                   node_count, edge_count, added_nodes, removed_nodes, added_edges, removed_edges,
                   node_coverage_pct, edge_coverage_pct, learner_turns, agent_turns,
                   generated_turns, fallback_turns, duration_secs, zpd_estimate, completion_reason
            FROM round_rows
            WHERE session_id = ?
            ORDER BY round_index ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RoundRow::try_from).collect()
    }

    async fn list_session_records(&self, limit: u32) -> StorageResult<Vec<SessionSummary>> {
        let rows: Vec<SessionSummaryRow> = sqlx::query_as(
            r#"
            SELECT id, participant_id, phase, round_count, created_at, ended_at
            FROM sessions
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn log_generation(&self, log: &GenerationLog) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO generation_logs (id, session_id, round_index, model, latency_ms, success, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.id)
        .bind(&log.session_id)
        .bind(log.round_index as i64)
        .bind(&log.model)
        .bind(log.latency_ms)
        .bind(log.success)
        .bind(&log.error)
        .bind(log.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_generation_logs(&self, session_id: &str) -> StorageResult<Vec<GenerationLog>> {
        let rows: Vec<GenerationLogRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, round_index, model, latency_ms, success, error, created_at
            FROM generation_logs
            WHERE session_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_column<T: FromStr<Err = String>>(raw: Option<String>) -> StorageResult<Option<T>> {
    raw.map(|value| value.parse::<T>())
        .transpose()
        .map_err(|message| StorageError::Query { message })
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct RoundRowRecord {
    session_id: String,
    participant_id: String,
    round_index: i64,
    scaffolding_type: Option<String>,
    intensity: Option<String>,
    node_count: i64,
    edge_count: i64,
    added_nodes: i64,
    removed_nodes: i64,
    added_edges: i64,
    removed_edges: i64,
    node_coverage_pct: Option<f64>,
    edge_coverage_pct: Option<f64>,
    learner_turns: i64,
    agent_turns: i64,
    generated_turns: i64,
    fallback_turns: i64,
    duration_secs: Option<i64>,
    zpd_estimate: Option<f64>,
    completion_reason: Option<String>,
}

impl TryFrom<RoundRowRecord> for RoundRow {
    type Error = StorageError;

    fn try_from(row: RoundRowRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            session_id: row.session_id,
            participant_id: row.participant_id,
            round_index: row.round_index as usize,
            scaffolding_type: parse_column(row.scaffolding_type)?,
            intensity: parse_column(row.intensity)?,
            node_count: row.node_count as usize,
            edge_count: row.edge_count as usize,
            added_nodes: row.added_nodes as usize,
            removed_nodes: row.removed_nodes as usize,
            added_edges: row.added_edges as usize,
            removed_edges: row.removed_edges as usize,
            node_coverage_pct: row.node_coverage_pct,
            edge_coverage_pct: row.edge_coverage_pct,
            learner_turns: row.learner_turns as usize,
            agent_turns: row.agent_turns as usize,
            generated_turns: row.generated_turns as usize,
            fallback_turns: row.fallback_turns as usize,
            duration_secs: row.duration_secs,
            zpd_estimate: row.zpd_estimate,
            completion_reason: parse_column(row.completion_reason)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionSummaryRow {
    id: String,
    participant_id: String,
    phase: String,
    round_count: i64,
    created_at: String,
    ended_at: Option<String>,
}

impl From<SessionSummaryRow> for SessionSummary {
    fn from(row: SessionSummaryRow) -> Self {
        Self {
            session_id: row.id,
            participant_id: row.participant_id,
            phase: row.phase,
            rounds: row.round_count as usize,
            created_at: parse_timestamp(&row.created_at),
            ended_at: row.ended_at.as_deref().map(parse_timestamp),
        }
    }
}

#[derive(sqlx::FromRow)]
struct GenerationLogRow {
    id: String,
    session_id: String,
    round_index: i64,
    model: Option<String>,
    latency_ms: i64,
    success: bool,
    error: Option<String>,
    created_at: String,
}

impl From<GenerationLogRow> for GenerationLog {
    fn from(row: GenerationLogRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            round_index: row.round_index as usize,
            model: row.model,
            latency_ms: row.latency_ms,
            success: row.success,
            error: row.error,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}
