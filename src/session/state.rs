use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{AgentSequence, ExperimentalCondition, ScaffoldingType};
use crate::concept_map::{ConceptMap, CoverageReport, ExpertConceptMap, MapDiff};
use crate::error::{ValidationError, ValidationResult};
use crate::templates::{TemplateUsage, TextSource};
use crate::zpd::{Intensity, ZpdEstimates, ZpdTracePoint};

/// Self-rated confidence is collected on a 1 to 5 scale.
pub const CONFIDENCE_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

/// Background text longer than this is rejected.
const MAX_BACKGROUND_CHARS: usize = 10_000;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SessionPhase {
    Created,
    ProfileCollected,
    RoundActive { round: usize },
    RoundComplete { round: usize },
    Finalized,
    Abandoned,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Created => "created",
            SessionPhase::ProfileCollected => "profile_collected",
            SessionPhase::RoundActive { .. } => "round_active",
            SessionPhase::RoundComplete { .. } => "round_complete",
            SessionPhase::Finalized => "finalized",
            SessionPhase::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Finalized | SessionPhase::Abandoned)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::RoundActive { round } | SessionPhase::RoundComplete { round } => {
                write!(f, "{}({})", self.as_str(), round)
            }
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

/// Structured answers from the profiling step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileAnswers {
    /// Free text about prior knowledge of the task domain.
    #[serde(default)]
    pub background: String,
    /// Self-rated confidence, 1 (low) to 5 (high).
    pub confidence: u8,
    #[serde(default)]
    pub goals: String,
    /// Experimental arm. When set it replaces the session's agent sequence.
    #[serde(default)]
    pub condition: Option<ExperimentalCondition>,
}

impl ProfileAnswers {
    pub fn validate(&self) -> ValidationResult<()> {
        if !CONFIDENCE_RANGE.contains(&self.confidence) {
            return Err(ValidationError::field(
                "confidence",
                format!(
                    "must be between {} and {}",
                    CONFIDENCE_RANGE.start(),
                    CONFIDENCE_RANGE.end()
                ),
            ));
        }
        if self.background.chars().count() > MAX_BACKGROUND_CHARS {
            return Err(ValidationError::field(
                "background",
                format!("must be at most {} characters", MAX_BACKGROUND_CHARS),
            ));
        }
        Ok(())
    }
}

/// The learner, as profiled and as tracked by the estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerProfile {
    pub participant_id: String,
    pub display_name: Option<String>,
    pub background: String,
    pub confidence: u8,
    pub goals: String,
    /// Arm the session's sequence follows, if any.
    pub condition: Option<ExperimentalCondition>,
    pub background_score: u8,
    pub zpd: ZpdEstimates,
    /// Tier used for the next scaffolded round.
    pub intensity: Intensity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Learner,
    Agent,
}

/// How the text of a turn was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnSource {
    Learner,
    /// Template, map summary or canned reply.
    Deterministic { detail: TextSource },
    Generated { model: String },
    /// Deterministic text used after a failed or disabled generation.
    Fallback { reason: String, detail: TextSource },
}

/// One message of a round's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Position within the round.
    pub index: usize,
    pub speaker: Speaker,
    pub scaffolding_type: Option<ScaffoldingType>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Pattern tag of a learner turn.
    pub classification: Option<String>,
    pub source: TurnSource,
}

/// Why a round was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    LearnerFinished,
    ExchangeLimit,
    TimeLimit,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionReason::LearnerFinished => "learner_finished",
            CompletionReason::ExchangeLimit => "exchange_limit",
            CompletionReason::TimeLimit => "time_limit",
        }
    }
}

impl std::fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CompletionReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "learner_finished" => Ok(CompletionReason::LearnerFinished),
            "exchange_limit" => Ok(CompletionReason::ExchangeLimit),
            "time_limit" => Ok(CompletionReason::TimeLimit),
            _ => Err(format!("Unknown completion reason: {}", s)),
        }
    }
}

/// A single round and everything recorded in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub index: usize,
    /// `None` for the baseline round.
    pub scaffolding_type: Option<ScaffoldingType>,
    pub intensity: Option<Intensity>,
    pub turns: Vec<Turn>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed: bool,
    pub completion_reason: Option<CompletionReason>,
    /// Map frozen at the end of the previous round.
    #[serde(skip)]
    pub start_map: ConceptMap,
    /// Working map while active, frozen snapshot once completed.
    pub map: ConceptMap,
    pub diff: Option<MapDiff>,
    /// Present when the session has a reference map.
    pub coverage: Option<CoverageReport>,
    pub zpd_trace: Option<ZpdTracePoint>,
}

impl Round {
    pub fn new(
        index: usize,
        scaffolding_type: Option<ScaffoldingType>,
        intensity: Option<Intensity>,
        start_map: ConceptMap,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            index,
            scaffolding_type,
            intensity,
            turns: Vec::new(),
            started_at,
            completed_at: None,
            completed: false,
            completion_reason: None,
            map: start_map.carried_into(index),
            start_map,
            diff: None,
            coverage: None,
            zpd_trace: None,
        }
    }

    pub fn is_baseline(&self) -> bool {
        self.scaffolding_type.is_none()
    }

    pub fn learner_turns(&self) -> usize {
        self.count(|t| t.speaker == Speaker::Learner)
    }

    pub fn agent_turns(&self) -> usize {
        self.count(|t| t.speaker == Speaker::Agent)
    }

    pub fn generated_turns(&self) -> usize {
        self.count(|t| matches!(t.source, TurnSource::Generated { .. }))
    }

    pub fn fallback_turns(&self) -> usize {
        self.count(|t| matches!(t.source, TurnSource::Fallback { .. }))
    }

    fn count(&self, predicate: impl Fn(&Turn) -> bool) -> usize {
        self.turns.iter().filter(|t| predicate(t)).count()
    }

    pub fn push_learner_turn(
        &mut self,
        text: impl Into<String>,
        classification: &str,
        timestamp: DateTime<Utc>,
    ) {
        self.turns.push(Turn {
            index: self.turns.len(),
            speaker: Speaker::Learner,
            scaffolding_type: self.scaffolding_type,
            text: text.into(),
            timestamp,
            classification: Some(classification.to_string()),
            source: TurnSource::Learner,
        });
    }

    pub fn push_agent_turn(
        &mut self,
        text: impl Into<String>,
        source: TurnSource,
        timestamp: DateTime<Utc>,
    ) {
        self.turns.push(Turn {
            index: self.turns.len(),
            speaker: Speaker::Agent,
            scaffolding_type: self.scaffolding_type,
            text: text.into(),
            timestamp,
            classification: None,
            source,
        });
    }

    /// Whole seconds since the round started.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.started_at).num_seconds().max(0) as u64
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_seconds().max(0))
    }
}

/// Everything the engine knows about one session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    pub participant_id: String,
    pub display_name: Option<String>,
    pub phase: SessionPhase,
    pub profile: Option<LearnerProfile>,
    pub sequence: AgentSequence,
    pub rounds: Vec<Round>,
    pub zpd_trace: Vec<ZpdTracePoint>,
    pub expert_map: Option<ExpertConceptMap>,
    pub usage: TemplateUsage,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new(
        session_id: impl Into<String>,
        participant_id: impl Into<String>,
        display_name: Option<String>,
        sequence: AgentSequence,
        expert_map: Option<ExpertConceptMap>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            participant_id: participant_id.into(),
            display_name,
            phase: SessionPhase::Created,
            profile: None,
            sequence,
            rounds: Vec::new(),
            zpd_trace: Vec::new(),
            expert_map,
            usage: TemplateUsage::new(),
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Baseline round plus one round per scheduled scaffolding type.
    pub fn total_rounds(&self) -> usize {
        self.sequence.len() + 1
    }

    /// Index of the last scheduled round.
    pub fn last_round_index(&self) -> usize {
        self.sequence.len()
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.last()
    }

    /// The round the learner is working in, if one is active.
    pub fn active_round(&self) -> Option<&Round> {
        match self.phase {
            SessionPhase::RoundActive { round } => {
                self.rounds.last().filter(|r| r.index == round)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::Created.to_string(), "created");
        assert_eq!(
            SessionPhase::RoundActive { round: 2 }.to_string(),
            "round_active(2)"
        );
        assert!(SessionPhase::Abandoned.is_terminal());
        assert!(!SessionPhase::RoundComplete { round: 4 }.is_terminal());
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_value(SessionPhase::RoundComplete { round: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"phase": "round_complete", "round": 3}));
    }

    #[test]
    fn test_profile_validation() {
        let answers = ProfileAnswers {
            background: "Some trade courses".into(),
            confidence: 3,
            goals: String::new(),
            condition: None,
        };
        assert!(answers.validate().is_ok());

        let bad = ProfileAnswers {
            confidence: 0,
            ..answers.clone()
        };
        assert!(matches!(
            bad.validate(),
            Err(ValidationError::Field { ref field, .. }) if field == "confidence"
        ));
    }

    #[test]
    fn test_round_turn_bookkeeping() {
        let now = Utc::now();
        let mut round = Round::new(
            1,
            Some(ScaffoldingType::Conceptual),
            Some(Intensity::High),
            ConceptMap::new(0),
            now,
        );
        assert_eq!(round.map.round(), 1);
        round.push_agent_turn(
            "Opening",
            TurnSource::Deterministic {
                detail: TextSource::Canned,
            },
            now,
        );
        round.push_learner_turn("I think so because", "idea_bearing", now);
        round.push_agent_turn("Reply", TurnSource::Generated { model: "m".into() }, now);

        assert_eq!(round.learner_turns(), 1);
        assert_eq!(round.agent_turns(), 2);
        assert_eq!(round.generated_turns(), 1);
        assert_eq!(round.fallback_turns(), 0);
        assert_eq!(round.turns[2].index, 2);
        assert_eq!(round.turns[1].classification.as_deref(), Some("idea_bearing"));
    }
}
