//! Integration tests for SQLite storage layer
//!
//! Tests database operations using in-memory and on-disk SQLite databases.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use mcp_concept_scaffolding::agents::{ExperimentalCondition, ScaffoldingType, SequencePolicy};
use mcp_concept_scaffolding::concept_map::{
    coverage_report, diff, Concept, ConceptMap, ExpertConceptMap, Relationship,
};
use mcp_concept_scaffolding::config::DatabaseConfig;
use mcp_concept_scaffolding::session::{
    CompletionReason, Round, SessionPhase, SessionRecord, SessionState,
};
use mcp_concept_scaffolding::storage::{GenerationLog, SqliteStorage, Storage};
use mcp_concept_scaffolding::zpd::Intensity;

/// Create an in-memory storage instance for testing
async fn create_test_storage() -> SqliteStorage {
    SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage")
}

fn concept(id: &str, label: &str) -> Concept {
    Concept {
        id: id.to_string(),
        label: label.to_string(),
    }
}

fn reference() -> ExpertConceptMap {
    let map = ConceptMap::from_parts(
        0,
        vec![concept("ref-light", "Light"), concept("ref-sugar", "Sugar")],
        vec![Relationship {
            id: "ref-edge".to_string(),
            source: "ref-light".to_string(),
            target: "ref-sugar".to_string(),
            label: "yields".to_string(),
        }],
    )
    .unwrap();
    ExpertConceptMap::new(map).unwrap()
}

/// A session with a completed baseline and an interrupted first round.
fn sample_record(session_id: &str, phase: SessionPhase) -> SessionRecord {
    let sequence = SequencePolicy::Fixed(ScaffoldingType::ALL.to_vec()).generate();
    let mut state =
        SessionState::new(session_id, "participant-9", None, sequence, Some(reference()));
    let start = Utc::now() - Duration::minutes(10);

    let baseline_map =
        ConceptMap::from_parts(0, vec![concept("c-light-0001", "light")], vec![]).unwrap();
    let mut baseline = Round::new(0, None, None, ConceptMap::default(), start);
    baseline.diff = Some(diff(&ConceptMap::default(), &baseline_map));
    baseline.coverage =
        Some(coverage_report(&baseline_map, &ConceptMap::default(), reference().map()).unwrap());
    baseline.map = baseline_map.clone();
    baseline.completed = true;
    baseline.completed_at = Some(start + Duration::seconds(90));
    baseline.completion_reason = Some(CompletionReason::LearnerFinished);

    let interrupted = Round::new(
        1,
        Some(ScaffoldingType::Conceptual),
        Some(Intensity::High),
        ConceptMap::default(),
        start + Duration::seconds(120),
    );

    state.rounds = vec![baseline, interrupted];
    state.phase = phase;
    state.ended_at = Some(Utc::now());
    SessionRecord::from_state(&state, Utc::now())
}

#[cfg(test)]
mod session_record_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_save_and_get_session_record() {
        let storage = create_test_storage().await;
        let record = sample_record("session-a", SessionPhase::Abandoned);

        storage.save_session_record(&record).await.unwrap();
        let retrieved = storage.get_session_record("session-a").await.unwrap();

        assert_eq!(retrieved, Some(record));
    }

    #[tokio::test]
    async fn test_condition_survives_storage() {
        let storage = create_test_storage().await;
        let mut record = sample_record("session-arm", SessionPhase::Finalized);
        record.condition = Some(ExperimentalCondition::Reversed);

        storage.save_session_record(&record).await.unwrap();
        let retrieved = storage.get_session_record("session-arm").await.unwrap().unwrap();

        assert_eq!(retrieved.condition, Some(ExperimentalCondition::Reversed));
        assert_eq!(retrieved, record);
    }

    #[tokio::test]
    async fn test_get_nonexistent_session_record() {
        let storage = create_test_storage().await;

        let result = storage.get_session_record("nonexistent-id").await.unwrap();

        assert!(result.is_none(), "Should return None for nonexistent session");
    }

    #[tokio::test]
    async fn test_round_rows_are_flattened() {
        let storage = create_test_storage().await;
        let record = sample_record("session-b", SessionPhase::Abandoned);

        storage.save_session_record(&record).await.unwrap();
        let rows = storage.get_round_rows("session-b").await.unwrap();

        assert_eq!(rows, record.rows());
        assert_eq!(rows.len(), 2);

        let baseline = &rows[0];
        assert_eq!(baseline.round_index, 0);
        assert_eq!(baseline.scaffolding_type, None);
        assert_eq!(baseline.added_nodes, 1);
        assert_eq!(baseline.node_coverage_pct, Some(50.0));
        assert_eq!(baseline.duration_secs, Some(90));
        assert_eq!(
            baseline.completion_reason,
            Some(CompletionReason::LearnerFinished)
        );

        let interrupted = &rows[1];
        assert_eq!(interrupted.scaffolding_type, Some(ScaffoldingType::Conceptual));
        assert_eq!(interrupted.intensity, Some(Intensity::High));
        assert_eq!(interrupted.completion_reason, None);
        assert_eq!(interrupted.duration_secs, None);
    }

    #[tokio::test]
    async fn test_resaving_replaces_rows() {
        let storage = create_test_storage().await;
        let mut record = sample_record("session-c", SessionPhase::Abandoned);
        storage.save_session_record(&record).await.unwrap();

        record.rounds.truncate(1);
        storage.save_session_record(&record).await.unwrap();

        let rows = storage.get_round_rows("session-c").await.unwrap();
        assert_eq!(rows.len(), 1);

        let listed = storage.list_session_records(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].rounds, 1);
    }

    #[tokio::test]
    async fn test_list_session_records_limit() {
        let storage = create_test_storage().await;
        for i in 0..3 {
            let record = sample_record(&format!("session-{}", i), SessionPhase::Finalized);
            storage.save_session_record(&record).await.unwrap();
        }

        let listed = storage.list_session_records(2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|s| s.phase == "finalized"));
        assert!(listed.iter().all(|s| s.participant_id == "participant-9"));
    }
}

#[cfg(test)]
mod generation_log_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_log_generation_success_and_failure() {
        let storage = create_test_storage().await;

        let ok = GenerationLog::success("session-x", 1, "gpt-4o", 420);
        let failed = GenerationLog::failure("session-x", 2, "Rate limited: slow down", 30);
        storage.log_generation(&ok).await.unwrap();
        storage.log_generation(&failed).await.unwrap();
        storage
            .log_generation(&GenerationLog::success("other", 1, "gpt-4o", 1))
            .await
            .unwrap();

        let logs = storage.get_generation_logs("session-x").await.unwrap();
        assert_eq!(logs.len(), 2);

        let success = logs.iter().find(|l| l.success).unwrap();
        assert_eq!(success.model.as_deref(), Some("gpt-4o"));
        assert_eq!(success.latency_ms, 420);

        let failure = logs.iter().find(|l| !l.success).unwrap();
        assert_eq!(failure.model, None);
        assert_eq!(failure.round_index, 2);
        assert_eq!(failure.error.as_deref(), Some("Rate limited: slow down"));
    }

    #[tokio::test]
    async fn test_logs_do_not_require_an_exported_session() {
        let storage = create_test_storage().await;
        let log = GenerationLog::failure("live-session", 1, "generation disabled", 0);

        assert!(storage.log_generation(&log).await.is_ok());
    }
}

#[cfg(test)]
mod file_database_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested").join("scaffolding.db"),
            max_connections: 2,
        };

        {
            let storage = SqliteStorage::new(&config).await.unwrap();
            let record = sample_record("durable", SessionPhase::Finalized);
            storage.save_session_record(&record).await.unwrap();
            storage.pool().close().await;
        }

        assert!(config.path.exists());

        let reopened = SqliteStorage::new(&config).await.unwrap();
        let record = reopened.get_session_record("durable").await.unwrap().unwrap();
        assert_eq!(record.phase, SessionPhase::Finalized);
        assert_eq!(reopened.get_round_rows("durable").await.unwrap().len(), 2);
    }
}
