//! The session engine.
//!
//! [`Orchestrator`] drives every session through
//! `Created → ProfileCollected → RoundActive(n) → RoundComplete(n) → … → Finalized`
//! (or `Abandoned`). Each learner turn is classified first; only substantive
//! on-topic turns reach the generative backend, and any backend failure falls
//! back to a template reply so a round never stalls.
//!
//! The session lock is never held across a backend call. A per-session turn
//! gate keeps one learner turn in flight, and ending a session cancels that
//! call without waiting on it.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::export::SessionRecord;
use super::state::{
    CompletionReason, LearnerProfile, ProfileAnswers, Round, SessionPhase, SessionState, Speaker,
    TurnSource,
};
use super::store::{SessionHandle, SessionStore};
use crate::agents::{agent_for, ScaffoldingType, SequencePolicy, SequencePolicyKind};
use crate::classifier::{Classification, ClassifierContext, ResponseClassifier};
use crate::concept_map::{
    coverage, diff, ConceptMap, ConceptMapInput, Coverage, CoverageReport, DiffCounts,
    ExpertConceptMap, MapDiff, MapEdit,
};
use crate::config::{SessionConfig, ZpdConfig};
use crate::error::{AppError, AppResult, GenerationError, StateViolation, ValidationError};
use crate::llm::{ChatMessage, GenerationOutcome, GenerationRequest, Generator};
use crate::prompts::{BASELINE_ROUND_PROMPT, BASELINE_ROUND_REPLY};
use crate::storage::{GenerationLog, Storage};
use crate::templates::{
    SelectedText, SelectionContext, TemplateCategory, TemplateLibrary, TemplateSelector,
    TextSource,
};
use crate::zpd::{Intensity, KnowledgeScorer, ZpdEstimator, ZpdTracePoint};

/// One save plus one retry.
const EXPORT_ATTEMPTS: u32 = 2;

/// Snapshot of a session for the interaction surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub participant_id: String,
    #[serde(flatten)]
    pub phase: SessionPhase,
    pub current_round: Option<usize>,
    pub total_rounds: usize,
    pub sequence: Vec<ScaffoldingType>,
    pub scaffolding_type: Option<ScaffoldingType>,
    pub intensity: Option<Intensity>,
    pub node_count: usize,
    pub edge_count: usize,
    pub learner_turns: usize,
    /// Only while a timed round is active.
    pub remaining_secs: Option<u64>,
    pub coverage: Option<Coverage>,
}

/// Returned when a round starts.
#[derive(Debug, Clone, Serialize)]
pub struct RoundOpening {
    pub session_id: String,
    pub round: usize,
    pub scaffolding_type: Option<ScaffoldingType>,
    pub intensity: Option<Intensity>,
    pub prompt: String,
    pub time_limit_secs: Option<u64>,
}

/// Working map figures after an edit.
#[derive(Debug, Clone, Serialize)]
pub struct MapView {
    pub session_id: String,
    pub round: usize,
    pub node_count: usize,
    pub edge_count: usize,
    pub coverage: Option<Coverage>,
}

/// Figures of a round that just closed.
#[derive(Debug, Clone, Serialize)]
pub struct RoundSummary {
    pub session_id: String,
    pub round: usize,
    pub scaffolding_type: Option<ScaffoldingType>,
    pub completion_reason: CompletionReason,
    pub node_count: usize,
    pub edge_count: usize,
    pub diff: DiffCounts,
    pub coverage: Option<Coverage>,
    pub zpd: Option<ZpdTracePoint>,
    /// Tier the next scaffolded round will use.
    pub next_intensity: Option<Intensity>,
    /// Every scheduled round is done; only `end_session` remains.
    pub session_complete: bool,
}

/// The agent's answer to one learner turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub session_id: String,
    pub round: usize,
    pub reply: String,
    /// Pattern tag of the learner turn.
    pub pattern: String,
    pub source: TurnSource,
    /// Closing message when the exchange limit ended the round.
    pub conclusion: Option<String>,
    /// Present when this turn closed the round.
    pub round_summary: Option<RoundSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimerStatus {
    pub session_id: String,
    pub round: usize,
    pub elapsed_secs: u64,
    pub remaining_secs: Option<u64>,
    pub expired: bool,
    pub completed: Option<RoundSummary>,
}

/// Result of a successful export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReceipt {
    pub session_id: String,
    #[serde(flatten)]
    pub phase: SessionPhase,
    pub rounds: usize,
    pub attempts: u32,
    pub exported_at: DateTime<Utc>,
}

/// Outcome of the locked half of a learner turn.
enum PreparedTurn {
    Answered(TurnReply),
    Forward {
        round: usize,
        kind: ScaffoldingType,
        classification: Classification,
        request: GenerationRequest,
    },
}

/// Owns every live session and the components that act on them.
pub struct Orchestrator {
    config: SessionConfig,
    policy: SequencePolicy,
    classifier: ResponseClassifier,
    selector: TemplateSelector,
    estimator: ZpdEstimator,
    generator: Arc<dyn Generator>,
    storage: Arc<dyn Storage>,
    store: SessionStore,
    default_reference: Option<ExpertConceptMap>,
}

impl Orchestrator {
    pub fn new(
        config: SessionConfig,
        zpd: ZpdConfig,
        generator: Arc<dyn Generator>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let policy = match config.sequence_policy {
            SequencePolicyKind::Fixed => SequencePolicy::Fixed(config.fixed_sequence.clone()),
            SequencePolicyKind::Randomized => SequencePolicy::Randomized {
                seed: config.sequence_seed,
            },
            SequencePolicyKind::Condition => {
                SequencePolicy::Condition(config.fixed_sequence.clone())
            }
        };
        Self {
            classifier: ResponseClassifier::new(config.min_idea_length),
            selector: TemplateSelector::new(
                Arc::new(TemplateLibrary::new()),
                config.early_turn_count,
            ),
            estimator: ZpdEstimator::new(zpd),
            policy,
            config,
            generator,
            storage,
            store: SessionStore::new(),
            default_reference: None,
        }
    }

    /// Reference map used by sessions created without their own.
    pub fn with_reference(mut self, reference: ExpertConceptMap) -> Self {
        self.default_reference = Some(reference);
        self
    }

    pub fn with_library(mut self, library: TemplateLibrary) -> Self {
        self.selector = TemplateSelector::new(Arc::new(library), self.config.early_turn_count);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn default_reference(&self) -> Option<&ExpertConceptMap> {
        self.default_reference.as_ref()
    }

    /// Open a session and fix its agent sequence.
    pub async fn create_session(
        &self,
        participant_id: &str,
        display_name: Option<String>,
        expert_map: Option<ExpertConceptMap>,
    ) -> AppResult<SessionStatus> {
        let participant_id = participant_id.trim();
        if participant_id.is_empty() {
            return Err(ValidationError::field("participant_id", "must not be blank").into());
        }

        let session_uuid = Uuid::new_v4();
        let session_id = session_uuid.to_string();
        let sequence = self.policy.generate_for(&session_uuid);
        let reference = expert_map.or_else(|| self.default_reference.clone());
        let display_name = display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        info!(
            session_id = %session_id,
            participant_id = %participant_id,
            policy = %sequence.policy(),
            condition = ?sequence.condition(),
            sequence = ?sequence.as_slice(),
            has_reference = reference.is_some(),
            "Session created"
        );

        let state = SessionState::new(&session_id, participant_id, display_name, sequence, reference);
        self.store.insert(state).await;
        self.status(&session_id).await
    }

    /// Record the profiling answers and derive the starting intensity.
    pub async fn submit_profile(
        &self,
        session_id: &str,
        answers: ProfileAnswers,
    ) -> AppResult<LearnerProfile> {
        answers.validate()?;
        let handle = self.live(session_id, "submit_profile").await?;
        let mut state = handle.lock().await;
        if state.phase != SessionPhase::Created {
            return Err(invalid_phase("submit_profile", state.phase));
        }

        let background_score = state
            .expert_map
            .as_ref()
            .map(|reference| KnowledgeScorer::from_reference(reference).score(&answers.background))
            .unwrap_or(0);

        if let Some(condition) = answers.condition {
            state.sequence = self.policy.for_condition(condition);
            info!(
                session_id = %session_id,
                condition = %condition,
                sequence = ?state.sequence.as_slice(),
                "Sequence assigned by condition"
            );
        }

        let profile = LearnerProfile {
            participant_id: state.participant_id.clone(),
            display_name: state.display_name.clone(),
            background: answers.background,
            confidence: answers.confidence,
            goals: answers.goals,
            condition: state.sequence.condition(),
            background_score,
            zpd: self.estimator.initial_estimates(background_score),
            intensity: self.estimator.initial_intensity(background_score),
        };

        info!(
            session_id = %session_id,
            background_score,
            intensity = %profile.intensity,
            "Profile collected"
        );

        state.profile = Some(profile.clone());
        state.phase = SessionPhase::ProfileCollected;
        Ok(profile)
    }

    /// Open the next round: the baseline after profiling, otherwise the round
    /// after the one just completed.
    pub async fn start_round(&self, session_id: &str) -> AppResult<RoundOpening> {
        let handle = self.live(session_id, "start_round").await?;
        let mut state = handle.lock().await;
        let index = match state.phase {
            SessionPhase::ProfileCollected => 0,
            SessionPhase::RoundComplete { round } => round + 1,
            phase => return Err(invalid_phase("start_round", phase)),
        };

        let (kind, intensity) = if index == 0 {
            (None, None)
        } else {
            let kind = state.sequence.next_agent(index)?;
            let intensity = state
                .profile
                .as_ref()
                .map(|p| p.intensity)
                .unwrap_or(Intensity::High);
            (Some(kind), Some(intensity))
        };

        let now = Utc::now();
        let start_map = state
            .rounds
            .last()
            .map(|r| r.map.clone())
            .unwrap_or_default();
        let mut round = Round::new(index, kind, intensity, start_map, now);

        let opening = match kind {
            None => SelectedText::canned(BASELINE_ROUND_PROMPT),
            Some(kind) => {
                let ctx = selection_context(&round, None);
                agent_for(kind).build_initial_prompt(&self.selector, &mut state.usage, &ctx)
            }
        };
        round.push_agent_turn(
            opening.text.clone(),
            TurnSource::Deterministic {
                detail: opening.source,
            },
            now,
        );

        state.rounds.push(round);
        state.phase = SessionPhase::RoundActive { round: index };

        info!(
            session_id = %session_id,
            round = index,
            scaffolding = ?kind,
            intensity = ?intensity,
            "Round started"
        );

        Ok(RoundOpening {
            session_id: session_id.to_string(),
            round: index,
            scaffolding_type: kind,
            intensity,
            prompt: opening.text,
            time_limit_secs: self.time_limit(),
        })
    }

    /// Apply one edit to the working map of the active round.
    pub async fn apply_edit(&self, session_id: &str, edit: MapEdit) -> AppResult<MapView> {
        let handle = self.live(session_id, "apply_edit").await?;
        let mut state = handle.lock().await;
        active_round_index(&state, "apply_edit")?;

        let round = state.rounds.last_mut().ok_or_else(missing_round)?;
        round.map.apply(edit)?;
        map_view(&state)
    }

    /// Replace the working map wholesale. Elements present when the round
    /// started may only be removed through explicit edits, so only ids the
    /// working map still holds are checked.
    pub async fn replace_snapshot(
        &self,
        session_id: &str,
        input: ConceptMapInput,
    ) -> AppResult<MapView> {
        let handle = self.live(session_id, "replace_snapshot").await?;
        let mut state = handle.lock().await;
        let index = active_round_index(&state, "replace_snapshot")?;

        let candidate = ConceptMap::try_from(ConceptMapInput {
            round: index,
            ..input
        })?;
        let round = state.rounds.last_mut().ok_or_else(missing_round)?;
        let missing: Vec<String> = round
            .start_map
            .ids_missing_from(&candidate)
            .into_iter()
            .filter(|id| round.map.concept(id).is_some() || round.map.relationship(id).is_some())
            .collect();
        if let Some(first) = missing.first() {
            return Err(ValidationError::SnapshotDropsElements {
                count: missing.len(),
                first: first.clone(),
            }
            .into());
        }
        round.map = candidate;
        map_view(&state)
    }

    /// Process one learner utterance and produce the agent's reply.
    pub async fn submit_utterance(&self, session_id: &str, text: &str) -> AppResult<TurnReply> {
        let handle = self.live(session_id, "submit_utterance").await?;
        let _turn = handle.begin_turn(session_id)?;

        let prepared = {
            let mut state = handle.lock().await;
            self.prepare_turn(&mut state, text, Utc::now())?
        };

        let (round, kind, classification, request) = match prepared {
            PreparedTurn::Answered(reply) => return Ok(reply),
            PreparedTurn::Forward {
                round,
                kind,
                classification,
                request,
            } => (round, kind, classification, request),
        };

        let cancel = handle.cancel_token().clone();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            outcome = self.generate(&request) => Some(outcome),
        };

        let mut state = handle.lock().await;
        let Some(outcome) = outcome else {
            debug!(session_id = %session_id, round, "Turn cancelled while generating, not recorded");
            return Err(invalid_phase("submit_utterance", state.phase));
        };
        if state.phase != (SessionPhase::RoundActive { round }) {
            return Err(invalid_phase("submit_utterance", state.phase));
        }

        let (reply, source) = {
            let SessionState { rounds, usage, .. } = &mut *state;
            let active = rounds.last().ok_or_else(missing_round)?;
            match outcome {
                GenerationOutcome::Success { text, model } => {
                    (active.map.scrub_identifiers(&text), TurnSource::Generated { model })
                }
                GenerationOutcome::Fallback { reason } => {
                    let focus = classification.mentioned_concepts.first().map(String::as_str);
                    let ctx = selection_context(active, focus);
                    let selected = agent_for(kind).select_follow_up(&self.selector, usage, &ctx);
                    (
                        selected.text,
                        TurnSource::Fallback {
                            reason,
                            detail: selected.source,
                        },
                    )
                }
            }
        };

        self.record_exchange(&mut state, text, &classification, reply, source, Utc::now())
    }

    /// Close the active round on the learner's request.
    pub async fn finish_round(&self, session_id: &str) -> AppResult<RoundSummary> {
        let handle = self.live(session_id, "finish_round").await?;
        let _turn = handle.begin_turn(session_id)?;
        let mut state = handle.lock().await;
        let index = active_round_index(&state, "finish_round")?;

        let round = state.rounds.last().ok_or_else(missing_round)?;
        if index >= 1 && round.learner_turns() == 0 {
            return Err(StateViolation::NoLearnerTurn { round: index }.into());
        }
        self.complete_round(&mut state, CompletionReason::LearnerFinished, Utc::now())
    }

    /// Report the round timer and close an expired round when allowed.
    ///
    /// A scaffolded round without a learner turn stays open past its limit,
    /// and a round with a turn in flight is left for that turn to close.
    pub async fn check_round_timer(&self, session_id: &str) -> AppResult<TimerStatus> {
        let handle = self.live(session_id, "check_round_timer").await?;
        let mut state = handle.lock().await;
        let index = active_round_index(&state, "check_round_timer")?;

        let now = Utc::now();
        let round = state.rounds.last().ok_or_else(missing_round)?;
        let elapsed_secs = round.elapsed_secs(now);
        let remaining_secs = self.time_limit().map(|limit| limit.saturating_sub(elapsed_secs));
        let expired = remaining_secs == Some(0);
        let eligible = index == 0 || round.learner_turns() > 0;

        let completed = if expired && eligible {
            match handle.begin_turn(session_id) {
                Ok(_gate) => Some(self.complete_round(&mut state, CompletionReason::TimeLimit, now)?),
                Err(_) => None,
            }
        } else {
            None
        };

        Ok(TimerStatus {
            session_id: session_id.to_string(),
            round: index,
            elapsed_secs,
            remaining_secs,
            expired,
            completed,
        })
    }

    /// End the session and export it.
    ///
    /// After the last scheduled round the session is finalized; from any
    /// other live phase it is abandoned, keeping an active round as
    /// incomplete. An in-flight backend call is cancelled, not awaited.
    pub async fn end_session(&self, session_id: &str) -> AppResult<ExportReceipt> {
        let handle = self.live(session_id, "end_session").await?;
        handle.cancel();

        {
            let mut state = handle.lock().await;
            let next = match state.phase {
                phase if phase.is_terminal() => return Err(invalid_phase("end_session", phase)),
                SessionPhase::RoundComplete { round } if round == state.last_round_index() => {
                    SessionPhase::Finalized
                }
                _ => SessionPhase::Abandoned,
            };
            if let SessionPhase::RoundActive { .. } = state.phase {
                let SessionState {
                    rounds, expert_map, ..
                } = &mut *state;
                let round = rounds.last_mut().ok_or_else(missing_round)?;
                let (map_diff, covered) = measure_round(round, expert_map.as_ref())?;
                round.coverage = covered.map(|c| coverage_with_counts(Some(c), map_diff.counts()));
                round.diff = Some(map_diff);
            }
            info!(
                session_id = %session_id,
                from = %state.phase,
                to = %next,
                rounds = state.rounds.len(),
                "Session ended"
            );
            state.phase = next;
            state.ended_at = Some(Utc::now());
        }

        self.export_session(session_id).await
    }

    /// Persist the record of an ended session, retrying once.
    ///
    /// A stored session leaves the live store. On failure it stays in memory
    /// so the export can be retried.
    pub async fn export_session(&self, session_id: &str) -> AppResult<ExportReceipt> {
        let handle = self.live(session_id, "export_session").await?;
        let record = {
            let state = handle.lock().await;
            if !state.phase.is_terminal() {
                return Err(invalid_phase("export_session", state.phase));
            }
            SessionRecord::from_state(&state, Utc::now())
        };

        let mut last_error = String::new();
        for attempt in 1..=EXPORT_ATTEMPTS {
            match self.storage.save_session_record(&record).await {
                Ok(()) => {
                    self.store.remove(session_id).await;
                    info!(
                        session_id = %session_id,
                        rounds = record.rounds.len(),
                        attempt,
                        live_sessions = self.store.live_count().await,
                        "Session exported"
                    );
                    return Ok(ExportReceipt {
                        session_id: record.session_id.clone(),
                        phase: record.phase,
                        rounds: record.rounds.len(),
                        attempts: attempt,
                        exported_at: record.exported_at,
                    });
                }
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        attempt,
                        error = %e,
                        "Session export failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err(AppError::Export {
            session_id: session_id.to_string(),
            attempts: EXPORT_ATTEMPTS,
            message: last_error,
        })
    }

    pub async fn status(&self, session_id: &str) -> AppResult<SessionStatus> {
        let handle = self.live(session_id, "status").await?;
        let state = handle.lock().await;
        let now = Utc::now();
        let round = state.current_round();

        let coverage = match (round, &state.expert_map) {
            (Some(round), Some(reference)) => Some(coverage(&round.map, reference.map())?),
            _ => None,
        };
        let remaining_secs = match (state.active_round(), self.time_limit()) {
            (Some(active), Some(limit)) => Some(limit.saturating_sub(active.elapsed_secs(now))),
            _ => None,
        };

        Ok(SessionStatus {
            session_id: state.session_id.clone(),
            participant_id: state.participant_id.clone(),
            phase: state.phase,
            current_round: round.map(|r| r.index),
            total_rounds: state.total_rounds(),
            sequence: state.sequence.as_slice().to_vec(),
            scaffolding_type: round.and_then(|r| r.scaffolding_type),
            intensity: state.profile.as_ref().map(|p| p.intensity),
            node_count: round.map_or(0, |r| r.map.concept_count()),
            edge_count: round.map_or(0, |r| r.map.relationship_count()),
            learner_turns: round.map_or(0, |r| r.learner_turns()),
            remaining_secs,
            coverage,
        })
    }

    /// Full record, whatever the phase. Exported sessions are read back from
    /// storage.
    pub async fn record(&self, session_id: &str) -> AppResult<SessionRecord> {
        match self.store.get(session_id).await {
            Ok(handle) => {
                let state = handle.lock().await;
                Ok(SessionRecord::from_state(&state, Utc::now()))
            }
            Err(missing) => self
                .storage
                .get_session_record(session_id)
                .await?
                .ok_or_else(|| missing.into()),
        }
    }

    /// Handle of a live session. A session already exported has left the
    /// store and is reported by its stored phase.
    async fn live(&self, session_id: &str, operation: &str) -> AppResult<Arc<SessionHandle>> {
        match self.store.get(session_id).await {
            Ok(handle) => Ok(handle),
            Err(missing) => match self.storage.get_session_record(session_id).await? {
                Some(record) => Err(invalid_phase(operation, record.phase)),
                None => Err(missing.into()),
            },
        }
    }

    fn time_limit(&self) -> Option<u64> {
        (self.config.round_time_limit_secs > 0).then_some(self.config.round_time_limit_secs)
    }

    /// Classify and answer deterministically, or build the backend request.
    fn prepare_turn(
        &self,
        state: &mut SessionState,
        text: &str,
        now: DateTime<Utc>,
    ) -> AppResult<PreparedTurn> {
        let index = active_round_index(state, "submit_utterance")?;
        let round = state.rounds.last().ok_or_else(missing_round)?;
        let classification = self.classifier.classify(
            text,
            &ClassifierContext {
                scaffolding_type: round.scaffolding_type,
                turn_index: round.learner_turns(),
                map: &round.map,
            },
        );

        let Some(kind) = round.scaffolding_type else {
            let source = TurnSource::Deterministic {
                detail: TextSource::Canned,
            };
            return self
                .record_exchange(state, text, &classification, BASELINE_ROUND_REPLY.to_string(), source, now)
                .map(PreparedTurn::Answered);
        };

        if kind.is_scaffolding() && classification.forwards_to_generator() {
            let request = self.generation_request(state, round, kind, text);
            return Ok(PreparedTurn::Forward {
                round: index,
                kind,
                classification,
                request,
            });
        }

        let selected = {
            let SessionState { rounds, usage, .. } = &mut *state;
            let round = rounds.last().ok_or_else(missing_round)?;
            let focus = classification.mentioned_concepts.first().map(String::as_str);
            let ctx = selection_context(round, focus);
            agent_for(kind).deterministic_reply(&classification, text, &self.selector, usage, &ctx)
        };
        let source = TurnSource::Deterministic {
            detail: selected.source,
        };
        self.record_exchange(state, text, &classification, selected.text, source, now)
            .map(PreparedTurn::Answered)
    }

    fn generation_request(
        &self,
        state: &SessionState,
        round: &Round,
        kind: ScaffoldingType,
        text: &str,
    ) -> GenerationRequest {
        let intensity = round.intensity.unwrap_or(Intensity::High);
        let ctx = selection_context(round, None);
        let seed_template = self
            .selector
            .peek(kind, TemplateCategory::FollowUp, &state.usage, &ctx)
            .map(|(_, seed)| round.map.scrub_identifiers(&seed));

        let mut turns: Vec<ChatMessage> = round
            .turns
            .iter()
            .map(|turn| match turn.speaker {
                Speaker::Learner => ChatMessage::user(&turn.text),
                Speaker::Agent => ChatMessage::assistant(&turn.text),
            })
            .collect();
        turns.push(ChatMessage::user(text));

        GenerationRequest {
            session_id: state.session_id.clone(),
            round: round.index,
            system: agent_for(kind).system_prompt(intensity),
            scaffolding_type: kind,
            seed_template,
            map_description: round.map.describe(),
            turns,
        }
    }

    /// Call the backend under an outer budget and log the call. Never fails.
    async fn generate(&self, request: &GenerationRequest) -> GenerationOutcome {
        let started = Instant::now();
        let budget = self.generator.budget();
        let result = match tokio::time::timeout(budget, self.generator.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout {
                timeout_ms: budget.as_millis() as u64,
            }),
        };
        let latency_ms = started.elapsed().as_millis() as i64;

        let (log, outcome) = match result {
            Ok(generated) => (
                GenerationLog::success(
                    &request.session_id,
                    request.round,
                    &generated.model,
                    generated.latency_ms as i64,
                ),
                GenerationOutcome::Success {
                    text: generated.text,
                    model: generated.model,
                },
            ),
            Err(e) => {
                warn!(
                    session_id = %request.session_id,
                    round = request.round,
                    error = %e,
                    "Generation failed, falling back to template"
                );
                let reason = match &e {
                    GenerationError::Disabled { reason } => reason.clone(),
                    other => other.to_string(),
                };
                (
                    GenerationLog::failure(&request.session_id, request.round, e.to_string(), latency_ms),
                    GenerationOutcome::Fallback { reason },
                )
            }
        };

        if let Err(e) = self.storage.log_generation(&log).await {
            warn!(error = %e, "Failed to log generation call");
        }
        outcome
    }

    /// Append a learner turn and its reply together, then apply the round
    /// limits.
    fn record_exchange(
        &self,
        state: &mut SessionState,
        text: &str,
        classification: &Classification,
        reply: String,
        source: TurnSource,
        now: DateTime<Utc>,
    ) -> AppResult<TurnReply> {
        let round = state.rounds.last_mut().ok_or_else(missing_round)?;
        round.push_learner_turn(text, classification.pattern.tag(), now);
        round.push_agent_turn(reply.clone(), source.clone(), now);

        let index = round.index;
        let learner_turns = round.learner_turns();
        let timed_out = self
            .time_limit()
            .is_some_and(|limit| round.elapsed_secs(now) >= limit);

        debug!(
            session_id = %state.session_id,
            round = index,
            pattern = classification.pattern.tag(),
            learner_turns,
            "Exchange recorded"
        );

        let (conclusion, round_summary) = if index >= 1 && learner_turns >= self.config.max_exchanges {
            let conclusion = self.push_conclusion(state, now)?;
            let summary = self.complete_round(state, CompletionReason::ExchangeLimit, now)?;
            (conclusion, Some(summary))
        } else if timed_out {
            let summary = self.complete_round(state, CompletionReason::TimeLimit, now)?;
            (None, Some(summary))
        } else {
            (None, None)
        };

        Ok(TurnReply {
            session_id: state.session_id.clone(),
            round: index,
            reply,
            pattern: classification.pattern.tag().to_string(),
            source,
            conclusion,
            round_summary,
        })
    }

    fn push_conclusion(&self, state: &mut SessionState, now: DateTime<Utc>) -> AppResult<Option<String>> {
        let SessionState { rounds, usage, .. } = state;
        let round = rounds.last_mut().ok_or_else(missing_round)?;
        let Some(kind) = round.scaffolding_type else {
            return Ok(None);
        };
        let ctx = selection_context(round, None);
        let selected = agent_for(kind).conclusion(&self.selector, usage, &ctx);
        round.push_agent_turn(
            selected.text.clone(),
            TurnSource::Deterministic {
                detail: selected.source,
            },
            now,
        );
        Ok(Some(selected.text))
    }

    /// Freeze the current round: diff, coverage and estimator update.
    fn complete_round(
        &self,
        state: &mut SessionState,
        reason: CompletionReason,
        now: DateTime<Utc>,
    ) -> AppResult<RoundSummary> {
        let last_round_index = state.last_round_index();
        let SessionState {
            session_id,
            rounds,
            expert_map,
            profile,
            zpd_trace,
            phase,
            ..
        } = state;

        let prior = rounds
            .len()
            .checked_sub(2)
            .and_then(|i| rounds[i].coverage)
            .map(|report| report.coverage);
        let round = rounds.last_mut().ok_or_else(missing_round)?;

        let (map_diff, covered) = measure_round(round, expert_map.as_ref())?;
        let counts = map_diff.counts();
        let report = coverage_with_counts(covered, counts);

        let point = match (round.scaffolding_type, profile.as_mut()) {
            (Some(kind), Some(profile)) if kind.is_scaffolding() => {
                let point =
                    self.estimator
                        .update(&mut profile.zpd, round.index, kind, &report, prior.as_ref());
                if let Some(point) = &point {
                    profile.intensity = point.next_intensity;
                }
                point
            }
            _ => None,
        };

        round.diff = Some(map_diff);
        round.coverage = covered.map(|_| report);
        round.zpd_trace = point.clone();
        round.completed = true;
        round.completed_at = Some(now);
        round.completion_reason = Some(reason);
        if let Some(point) = &point {
            zpd_trace.push(point.clone());
        }
        *phase = SessionPhase::RoundComplete { round: round.index };

        info!(
            session_id = %session_id,
            round = round.index,
            reason = %reason,
            nodes = round.map.concept_count(),
            edges = round.map.relationship_count(),
            added_nodes = counts.added_nodes,
            added_edges = counts.added_edges,
            "Round completed"
        );

        Ok(RoundSummary {
            session_id: session_id.clone(),
            round: round.index,
            scaffolding_type: round.scaffolding_type,
            completion_reason: reason,
            node_count: round.map.concept_count(),
            edge_count: round.map.relationship_count(),
            diff: counts,
            coverage: covered,
            zpd: point,
            next_intensity: profile.as_ref().map(|p| p.intensity),
            session_complete: round.index == last_round_index,
        })
    }
}

/// Diff of a round against its start map, and coverage when a reference is
/// set.
fn measure_round(
    round: &Round,
    reference: Option<&ExpertConceptMap>,
) -> AppResult<(MapDiff, Option<Coverage>)> {
    let map_diff = diff(&round.start_map, &round.map);
    let covered = match reference {
        Some(reference) => Some(coverage(&round.map, reference.map())?),
        None => None,
    };
    Ok((map_diff, covered))
}

fn coverage_with_counts(covered: Option<Coverage>, counts: DiffCounts) -> CoverageReport {
    CoverageReport {
        coverage: covered.unwrap_or_default(),
        added_nodes: counts.added_nodes,
        removed_nodes: counts.removed_nodes,
        added_edges: counts.added_edges,
        removed_edges: counts.removed_edges,
    }
}

fn selection_context<'a>(round: &'a Round, focus: Option<&'a str>) -> SelectionContext<'a> {
    SelectionContext {
        map: &round.map,
        turn_index: round.learner_turns(),
        intensity: round.intensity.unwrap_or(Intensity::High),
        focus,
    }
}

fn active_round_index(state: &SessionState, operation: &str) -> AppResult<usize> {
    match state.phase {
        SessionPhase::RoundActive { round } => Ok(round),
        phase => Err(invalid_phase(operation, phase)),
    }
}

fn map_view(state: &SessionState) -> AppResult<MapView> {
    let round = state.current_round().ok_or_else(missing_round)?;
    let coverage = match &state.expert_map {
        Some(reference) => Some(coverage(&round.map, reference.map())?),
        None => None,
    };
    Ok(MapView {
        session_id: state.session_id.clone(),
        round: round.index,
        node_count: round.map.concept_count(),
        edge_count: round.map.relationship_count(),
        coverage,
    })
}

fn invalid_phase(operation: &str, phase: SessionPhase) -> AppError {
    StateViolation::InvalidPhase {
        operation: operation.to_string(),
        phase: phase.to_string(),
    }
    .into()
}

fn missing_round() -> AppError {
    AppError::Internal {
        message: "session phase names a round that is not recorded".to_string(),
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod orchestrator_tests;
