//! Export records handed to persistence.
//!
//! [`SessionRecord`] is the full nested document. [`RoundRow`] is the flat
//! one-row-per-round projection used for statistical analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{CompletionReason, LearnerProfile, Round, SessionPhase, SessionState};
use crate::agents::{ExperimentalCondition, ScaffoldingType, SequencePolicyKind};
use crate::zpd::{Intensity, ZpdTracePoint};

/// Complete record of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub participant_id: String,
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub phase: SessionPhase,
    pub sequence_policy: SequencePolicyKind,
    pub sequence: Vec<ScaffoldingType>,
    #[serde(default)]
    pub condition: Option<ExperimentalCondition>,
    pub profile: Option<LearnerProfile>,
    pub rounds: Vec<Round>,
    pub zpd_trace: Vec<ZpdTracePoint>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exported_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn from_state(state: &SessionState, exported_at: DateTime<Utc>) -> Self {
        Self {
            session_id: state.session_id.clone(),
            participant_id: state.participant_id.clone(),
            display_name: state.display_name.clone(),
            phase: state.phase,
            sequence_policy: state.sequence.policy(),
            sequence: state.sequence.as_slice().to_vec(),
            condition: state.sequence.condition(),
            profile: state.profile.clone(),
            rounds: state.rounds.clone(),
            zpd_trace: state.zpd_trace.clone(),
            created_at: state.created_at,
            ended_at: state.ended_at,
            exported_at,
        }
    }

    /// Flat projection, one row per recorded round.
    pub fn rows(&self) -> Vec<RoundRow> {
        self.rounds
            .iter()
            .map(|round| RoundRow::from_round(&self.session_id, &self.participant_id, round))
            .collect()
    }

    /// Short listing entry.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            participant_id: self.participant_id.clone(),
            phase: self.phase.as_str().to_string(),
            rounds: self.rounds.len(),
            created_at: self.created_at,
            ended_at: self.ended_at,
        }
    }
}

/// One round, flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRow {
    pub session_id: String,
    pub participant_id: String,
    pub round_index: usize,
    pub scaffolding_type: Option<ScaffoldingType>,
    pub intensity: Option<Intensity>,
    pub node_count: usize,
    pub edge_count: usize,
    pub added_nodes: usize,
    pub removed_nodes: usize,
    pub added_edges: usize,
    pub removed_edges: usize,
    pub node_coverage_pct: Option<f64>,
    pub edge_coverage_pct: Option<f64>,
    pub learner_turns: usize,
    pub agent_turns: usize,
    pub generated_turns: usize,
    pub fallback_turns: usize,
    pub duration_secs: Option<i64>,
    /// Smoothed estimate after this round, when the round fed the estimator.
    pub zpd_estimate: Option<f64>,
    /// `None` for a round interrupted by abandonment.
    pub completion_reason: Option<CompletionReason>,
}

impl RoundRow {
    pub fn from_round(session_id: &str, participant_id: &str, round: &Round) -> Self {
        let counts = round.diff.as_ref().map(|d| d.counts()).unwrap_or_default();
        Self {
            session_id: session_id.to_string(),
            participant_id: participant_id.to_string(),
            round_index: round.index,
            scaffolding_type: round.scaffolding_type,
            intensity: round.intensity,
            node_count: round.map.concept_count(),
            edge_count: round.map.relationship_count(),
            added_nodes: counts.added_nodes,
            removed_nodes: counts.removed_nodes,
            added_edges: counts.added_edges,
            removed_edges: counts.removed_edges,
            node_coverage_pct: round.coverage.map(|c| c.coverage.node_coverage_pct),
            edge_coverage_pct: round.coverage.map(|c| c.coverage.edge_coverage_pct),
            learner_turns: round.learner_turns(),
            agent_turns: round.agent_turns(),
            generated_turns: round.generated_turns(),
            fallback_turns: round.fallback_turns(),
            duration_secs: round.duration_secs(),
            zpd_estimate: round.zpd_trace.as_ref().map(|p| p.updated),
            completion_reason: round.completion_reason,
        }
    }
}

/// Listing entry for stored sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub participant_id: String,
    pub phase: String,
    pub rounds: usize,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}
