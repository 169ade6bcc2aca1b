//! Scaffolding prompt templates.
//!
//! Templates are grouped into pools keyed by (scaffolding type, category).
//! Placeholders such as `{concept}` are resolved against the live concept map
//! at selection time; see [`Slot`] for the supported names.

mod library;
mod selector;

pub use library::*;
pub use selector::*;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::zpd::Intensity;

static SLOT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_0-9]+)\}").expect("slot pattern is a valid regex"));

/// Role of a template within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    /// Opens a scaffolded round.
    InitialPrompt,
    /// Answers a learner turn.
    FollowUp,
    /// Closes a round that hit its exchange limit.
    Conclusion,
}

impl TemplateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateCategory::InitialPrompt => "initial_prompt",
            TemplateCategory::FollowUp => "follow_up",
            TemplateCategory::Conclusion => "conclusion",
        }
    }
}

impl std::fmt::Display for TemplateCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a template is a broad opener or targets specific concepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Breadth {
    Open,
    Specific,
}

/// A placeholder that can be filled from the concept map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// `{concept}`: the learner's focus concept or the best-connected one.
    Concept,
    /// `{concept_2}`: a second concept, preferably not yet linked to the first.
    SecondConcept,
    /// `{recent_concept}`: the most recently added concept.
    RecentConcept,
    /// `{isolated_concept}`: a concept without relationships.
    IsolatedConcept,
    /// `{relationship}`: a relationship rendered as "source label target".
    Relationship,
    /// `{node_count}`
    NodeCount,
    /// `{edge_count}`
    EdgeCount,
}

impl Slot {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "concept" => Some(Slot::Concept),
            "concept_2" => Some(Slot::SecondConcept),
            "recent_concept" => Some(Slot::RecentConcept),
            "isolated_concept" => Some(Slot::IsolatedConcept),
            "relationship" => Some(Slot::Relationship),
            "node_count" => Some(Slot::NodeCount),
            "edge_count" => Some(Slot::EdgeCount),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Slot::Concept => "concept",
            Slot::SecondConcept => "concept_2",
            Slot::RecentConcept => "recent_concept",
            Slot::IsolatedConcept => "isolated_concept",
            Slot::Relationship => "relationship",
            Slot::NodeCount => "node_count",
            Slot::EdgeCount => "edge_count",
        }
    }
}

/// A prompt text with parsed placeholder slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub text: String,
    pub breadth: Breadth,
    /// Intensity tier this wording suits best; `None` fits any tier.
    pub intensity: Option<Intensity>,
    /// Known placeholders in order of first appearance.
    pub slots: Vec<Slot>,
    /// Placeholder names that no [`Slot`] understands. Such a template can
    /// never be filled.
    pub unknown_slots: Vec<String>,
}

impl Template {
    pub fn new(text: impl Into<String>, breadth: Breadth) -> Self {
        let text = text.into();
        let mut slots = Vec::new();
        let mut unknown_slots = Vec::new();
        for capture in SLOT_PATTERN.captures_iter(&text) {
            let name = &capture[1];
            match Slot::from_name(name) {
                Some(slot) if !slots.contains(&slot) => slots.push(slot),
                Some(_) => {}
                None => unknown_slots.push(name.to_string()),
            }
        }
        Self {
            text,
            breadth,
            intensity: None,
            slots,
            unknown_slots,
        }
    }

    pub fn open(text: impl Into<String>) -> Self {
        Self::new(text, Breadth::Open)
    }

    pub fn specific(text: impl Into<String>) -> Self {
        Self::new(text, Breadth::Specific)
    }

    pub fn with_intensity(mut self, intensity: Intensity) -> Self {
        self.intensity = Some(intensity);
        self
    }

    /// Substitute every placeholder using `value`. Returns `None` if any slot
    /// has no value.
    pub fn render(&self, mut value: impl FnMut(Slot) -> Option<String>) -> Option<String> {
        if !self.unknown_slots.is_empty() {
            return None;
        }
        let mut out = self.text.clone();
        for slot in &self.slots {
            let filled = value(*slot)?;
            out = out.replace(&format!("{{{}}}", slot.name()), &filled);
        }
        Some(out)
    }
}
