//! Deterministic classification of learner utterances.
//!
//! Each utterance gets exactly one primary [`Pattern`], chosen by fixed
//! precedence, plus side flags. The orchestrator uses the result to decide
//! whether a turn is answered from templates or forwarded to the generative
//! backend (see [`Classification::forwards_to_generator`]).

mod gibberish;
mod lexicon;

pub use gibberish::is_gibberish;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agents::ScaffoldingType;
use crate::concept_map::ConceptMap;
use lexicon::{
    normalize_text, APPROACH_LEX, CONFUSION_LEX, CONTENT_LEX, DISAGREEMENT_LEX, FRUSTRATION_LEX,
    IDEA_LEX, INAPPROPRIATE_LEX, INTERFACE_LEX, OFF_TOPIC_LEX, PREMATURE_LEX, QUESTION_OPENERS,
};

/// What a question is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// About the subject matter.
    Domain,
    /// About the mapping tool itself.
    Interface,
}

/// What a disagreement targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisagreementKind {
    Content,
    Approach,
    General,
}

/// Flavour of a frustration/confusion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffectKind {
    Frustrated,
    Confused,
}

/// Primary interaction pattern, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern", content = "kind", rename_all = "snake_case")]
pub enum Pattern {
    Empty,
    Inappropriate,
    Question(QuestionKind),
    Disagreement(DisagreementKind),
    PrematureEnding,
    Frustration(AffectKind),
    OffTopic,
    IdeaBearing,
    Generic,
}

impl Pattern {
    /// Flat tag used in logs and turn records.
    pub fn tag(&self) -> &'static str {
        match self {
            Pattern::Empty => "empty",
            Pattern::Inappropriate => "inappropriate",
            Pattern::Question(QuestionKind::Domain) => "domain_question",
            Pattern::Question(QuestionKind::Interface) => "interface_question",
            Pattern::Disagreement(DisagreementKind::Content) => "content_disagreement",
            Pattern::Disagreement(DisagreementKind::Approach) => "approach_disagreement",
            Pattern::Disagreement(DisagreementKind::General) => "general_disagreement",
            Pattern::PrematureEnding => "premature_ending",
            Pattern::Frustration(AffectKind::Frustrated) => "frustration",
            Pattern::Frustration(AffectKind::Confused) => "confusion",
            Pattern::OffTopic => "off_topic",
            Pattern::IdeaBearing => "idea_bearing",
            Pattern::Generic => "generic",
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Result of classifying one utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub pattern: Pattern,
    /// Some current map label occurs in the utterance.
    pub mentions_concept: bool,
    /// Labels found in the utterance, as written in the map.
    pub mentioned_concepts: Vec<String>,
    pub is_gibberish: bool,
    /// Very short reply such as "okay" or "yes".
    pub is_minimal: bool,
    /// Nothing specific matched and the utterance fell through to generic.
    pub ambiguous: bool,
}

impl Classification {
    /// Only substantive on-topic generic statements go to the backend.
    pub fn forwards_to_generator(&self) -> bool {
        self.pattern == Pattern::Generic
            && self.mentions_concept
            && !self.is_gibberish
            && !self.is_minimal
    }
}

/// Inputs beside the utterance itself.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierContext<'a> {
    /// `None` in the baseline round.
    pub scaffolding_type: Option<ScaffoldingType>,
    /// Learner turns already recorded in the round.
    pub turn_index: usize,
    pub map: &'a ConceptMap,
}

/// Rule-based utterance classifier.
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    min_idea_length: usize,
}

/// Below either bound an utterance counts as minimal.
const MINIMAL_WORDS: usize = 3;
const MINIMAL_CHARS: usize = 10;

impl ResponseClassifier {
    pub fn new(min_idea_length: usize) -> Self {
        Self { min_idea_length }
    }

    /// Classify an utterance against the current context.
    pub fn classify(&self, utterance: &str, ctx: &ClassifierContext<'_>) -> Classification {
        let trimmed = utterance.trim();
        let normalized = normalize_text(trimmed);

        let mentioned_concepts = mentioned_labels(&normalized, ctx.map);
        let is_gibberish = !trimmed.is_empty() && is_gibberish(trimmed);
        let is_minimal = normalized.split_whitespace().count() < MINIMAL_WORDS
            || trimmed.chars().count() < MINIMAL_CHARS;

        let pattern = self.primary_pattern(trimmed, &normalized, !mentioned_concepts.is_empty());
        let ambiguous = pattern == Pattern::Generic;

        debug!(
            pattern = %pattern,
            turn = ctx.turn_index,
            scaffolding = ?ctx.scaffolding_type,
            mentions_concept = !mentioned_concepts.is_empty(),
            is_gibberish,
            is_minimal,
            "Classified utterance"
        );
        if ambiguous && !is_minimal && !is_gibberish {
            debug!("No specific pattern matched, using generic path");
        }

        Classification {
            pattern,
            mentions_concept: !mentioned_concepts.is_empty(),
            mentioned_concepts,
            is_gibberish,
            is_minimal,
            ambiguous,
        }
    }

    fn primary_pattern(&self, trimmed: &str, normalized: &str, mentions_concept: bool) -> Pattern {
        if normalized.is_empty() {
            return Pattern::Empty;
        }
        if INAPPROPRIATE_LEX.matches(normalized) {
            return Pattern::Inappropriate;
        }
        if let Some(kind) = question_kind(trimmed, normalized, mentions_concept) {
            return Pattern::Question(kind);
        }
        if DISAGREEMENT_LEX.matches(normalized) {
            return Pattern::Disagreement(disagreement_kind(normalized, mentions_concept));
        }
        if PREMATURE_LEX.matches(normalized) {
            return Pattern::PrematureEnding;
        }
        if FRUSTRATION_LEX.matches(normalized) {
            return Pattern::Frustration(AffectKind::Frustrated);
        }
        if CONFUSION_LEX.matches(normalized) {
            return Pattern::Frustration(AffectKind::Confused);
        }
        if OFF_TOPIC_LEX.matches(normalized) {
            return Pattern::OffTopic;
        }
        if trimmed.chars().count() > self.min_idea_length && IDEA_LEX.matches(normalized) {
            return Pattern::IdeaBearing;
        }
        Pattern::Generic
    }
}

fn question_kind(trimmed: &str, normalized: &str, mentions_concept: bool) -> Option<QuestionKind> {
    let opener = normalized
        .split_whitespace()
        .next()
        .map(|first| QUESTION_OPENERS.contains(&first))
        .unwrap_or(false);
    let multi_word = normalized.contains(' ');
    if !(trimmed.contains('?') || (opener && multi_word)) {
        return None;
    }

    let interface = INTERFACE_LEX.matches(normalized);
    // an interrogative carrying nothing but small talk is off-topic
    if !interface && !mentions_concept && OFF_TOPIC_LEX.matches(normalized) {
        return None;
    }

    Some(if interface {
        QuestionKind::Interface
    } else {
        QuestionKind::Domain
    })
}

fn disagreement_kind(normalized: &str, mentions_concept: bool) -> DisagreementKind {
    if mentions_concept || CONTENT_LEX.matches(normalized) {
        DisagreementKind::Content
    } else if APPROACH_LEX.matches(normalized) {
        DisagreementKind::Approach
    } else {
        DisagreementKind::General
    }
}

/// Map labels occurring in the normalized utterance. Labels shorter than three
/// characters must match a whole word.
fn mentioned_labels(normalized: &str, map: &ConceptMap) -> Vec<String> {
    if normalized.is_empty() {
        return Vec::new();
    }
    let padded = format!(" {} ", normalized);
    let mut found: Vec<String> = Vec::new();
    for concept in map.concepts() {
        let key = normalize_text(&concept.label);
        if key.is_empty() || found.contains(&concept.label) {
            continue;
        }
        let hit = if key.chars().count() < 3 {
            padded.contains(&format!(" {} ", key))
        } else {
            normalized.contains(&key)
        };
        if hit {
            found.push(concept.label.clone());
        }
    }
    found
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod classifier_tests;
