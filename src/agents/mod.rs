//! Scaffolding agents.
//!
//! Each scaffolding type maps to one static [`ScaffoldingAgent`] entry. The
//! orchestrator looks the entry up with [`agent_for`] and calls the same
//! capability set on every type, so adding a type means adding a table row
//! and its template pools. The neutral control agent shares the table but
//! only acknowledges.

mod sequencer;

pub use sequencer::*;

use serde::{Deserialize, Serialize};

use crate::classifier::{AffectKind, Classification, DisagreementKind, Pattern, QuestionKind};
use crate::prompts::{
    AGENT_GROUND_RULES, CONCEPTUAL_PROMPT, HIGH_INTENSITY_GUIDANCE, LOW_INTENSITY_GUIDANCE,
    MEDIUM_INTENSITY_GUIDANCE, METACOGNITIVE_PROMPT, NEUTRAL_PROMPT, PROCEDURAL_PROMPT,
    STRATEGIC_PROMPT,
};
use crate::templates::{
    SelectedText, SelectionContext, TemplateCategory, TemplateSelector, TemplateUsage,
};
use crate::zpd::Intensity;

/// Pedagogical support strategy assigned to a round.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ScaffoldingType {
    Conceptual,
    Procedural,
    Strategic,
    Metacognitive,
    /// Acknowledgement-only control agent. Never scaffolds and never reaches
    /// the generative backend.
    Neutral,
}

impl ScaffoldingType {
    /// The scaffolding strategies, in the default fixed order.
    pub const ALL: [ScaffoldingType; 4] = [
        ScaffoldingType::Conceptual,
        ScaffoldingType::Procedural,
        ScaffoldingType::Strategic,
        ScaffoldingType::Metacognitive,
    ];

    /// Every agent in the table, the control agent last.
    pub const ROSTER: [ScaffoldingType; 5] = [
        ScaffoldingType::Conceptual,
        ScaffoldingType::Procedural,
        ScaffoldingType::Strategic,
        ScaffoldingType::Metacognitive,
        ScaffoldingType::Neutral,
    ];

    /// False for the control agent.
    pub fn is_scaffolding(&self) -> bool {
        !matches!(self, ScaffoldingType::Neutral)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScaffoldingType::Conceptual => "conceptual",
            ScaffoldingType::Procedural => "procedural",
            ScaffoldingType::Strategic => "strategic",
            ScaffoldingType::Metacognitive => "metacognitive",
            ScaffoldingType::Neutral => "neutral",
        }
    }

    fn index(&self) -> usize {
        match self {
            ScaffoldingType::Conceptual => 0,
            ScaffoldingType::Procedural => 1,
            ScaffoldingType::Strategic => 2,
            ScaffoldingType::Metacognitive => 3,
            ScaffoldingType::Neutral => 4,
        }
    }
}

impl std::fmt::Display for ScaffoldingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ScaffoldingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conceptual" => Ok(ScaffoldingType::Conceptual),
            "procedural" => Ok(ScaffoldingType::Procedural),
            "strategic" => Ok(ScaffoldingType::Strategic),
            "metacognitive" => Ok(ScaffoldingType::Metacognitive),
            "neutral" => Ok(ScaffoldingType::Neutral),
            _ => Err(format!("Unknown scaffolding type: {}", s)),
        }
    }
}

/// Static description and behavior of one scaffolding type.
#[derive(Debug)]
pub struct ScaffoldingAgent {
    pub kind: ScaffoldingType,
    pub name: &'static str,
    /// What this agent keeps the learner working on.
    pub focus: &'static str,
    /// Question that steers the learner back to the focus.
    pub redirect: &'static str,
    /// A single concrete action offered to a stuck learner.
    pub small_step: &'static str,
    system_prompt: &'static str,
}

static AGENTS: [ScaffoldingAgent; 5] = [
    ScaffoldingAgent {
        kind: ScaffoldingType::Conceptual,
        name: "Conceptual scaffolding agent",
        focus: "the key concepts and how they relate",
        redirect: "Which concept in your map would you like to explain or connect next?",
        small_step: "Pick one concept in your map and add a single relationship that says how it relates to another one.",
        system_prompt: CONCEPTUAL_PROMPT,
    },
    ScaffoldingAgent {
        kind: ScaffoldingType::Procedural,
        name: "Procedural scaffolding agent",
        focus: "the next concrete step in building your map",
        redirect: "What is the next step you want to take in your map?",
        small_step: "Add one concept you are sure about, then connect it to something already in the map.",
        system_prompt: PROCEDURAL_PROMPT,
    },
    ScaffoldingAgent {
        kind: ScaffoldingType::Strategic,
        name: "Strategic scaffolding agent",
        focus: "your plan for the map as a whole",
        redirect: "Which part of the topic do you want to work on first?",
        small_step: "Choose the one area of the topic your map covers least and add a concept there.",
        system_prompt: STRATEGIC_PROMPT,
    },
    ScaffoldingAgent {
        kind: ScaffoldingType::Metacognitive,
        name: "Metacognitive scaffolding agent",
        focus: "how you think about your own understanding",
        redirect: "Which part of your map are you least sure about right now?",
        small_step: "Look at your map and mark for yourself one relationship you feel unsure about; then tell me why.",
        system_prompt: METACOGNITIVE_PROMPT,
    },
    ScaffoldingAgent {
        kind: ScaffoldingType::Neutral,
        name: "Neutral control agent",
        focus: "the task as described in the instructions",
        redirect: "Please continue with your concept map as described in the task.",
        small_step: "Continue building your concept map according to the task instructions.",
        system_prompt: NEUTRAL_PROMPT,
    },
];

/// Table lookup for a scaffolding type.
pub fn agent_for(kind: ScaffoldingType) -> &'static ScaffoldingAgent {
    &AGENTS[kind.index()]
}

/// Guidance line for an intensity tier.
pub fn intensity_guidance(intensity: Intensity) -> &'static str {
    match intensity {
        Intensity::High => HIGH_INTENSITY_GUIDANCE,
        Intensity::Medium => MEDIUM_INTENSITY_GUIDANCE,
        Intensity::Low => LOW_INTENSITY_GUIDANCE,
    }
}

impl ScaffoldingAgent {
    /// Full system instructions for the generative backend.
    pub fn system_prompt(&self, intensity: Intensity) -> String {
        format!(
            "{}\n\n{}\n\n{}",
            self.system_prompt,
            intensity_guidance(intensity),
            AGENT_GROUND_RULES
        )
    }

    /// Opening message of a scaffolded round.
    pub fn build_initial_prompt(
        &self,
        selector: &TemplateSelector,
        usage: &mut TemplateUsage,
        ctx: &SelectionContext<'_>,
    ) -> SelectedText {
        selector.select(self.kind, TemplateCategory::InitialPrompt, usage, ctx)
    }

    /// Next follow-up question for the round.
    pub fn select_follow_up(
        &self,
        selector: &TemplateSelector,
        usage: &mut TemplateUsage,
        ctx: &SelectionContext<'_>,
    ) -> SelectedText {
        selector.select(self.kind, TemplateCategory::FollowUp, usage, ctx)
    }

    /// Closing message when the exchange limit ends the round.
    pub fn conclusion(
        &self,
        selector: &TemplateSelector,
        usage: &mut TemplateUsage,
        ctx: &SelectionContext<'_>,
    ) -> SelectedText {
        selector.select(self.kind, TemplateCategory::Conclusion, usage, ctx)
    }

    /// Reply for a turn that is not forwarded to the generative backend.
    ///
    /// Never evaluates whether the learner is right about the domain.
    pub fn deterministic_reply(
        &self,
        classification: &Classification,
        utterance: &str,
        selector: &TemplateSelector,
        usage: &mut TemplateUsage,
        ctx: &SelectionContext<'_>,
    ) -> SelectedText {
        if !self.kind.is_scaffolding() {
            return self.acknowledge(classification, utterance, selector, usage, ctx);
        }
        let redirect = |prefix: &str| SelectedText::canned(format!("{} {}", prefix, self.redirect));
        let small_step = |prefix: &str| SelectedText::canned(format!("{} {}", prefix, self.small_step));

        match classification.pattern {
            Pattern::Empty => redirect("I didn't catch anything there."),
            Pattern::Inappropriate => {
                redirect("Let's keep our conversation respectful and focused on your map.")
            }
            Pattern::Question(QuestionKind::Domain) => self
                .select_follow_up(selector, usage, ctx)
                .prefixed("That's a good question to explore in your own map rather than one I should answer for you."),
            Pattern::Question(QuestionKind::Interface) => redirect(
                "You can add, rename or remove concepts and relationships directly in the map editor, and finish the round whenever you are ready.",
            ),
            Pattern::Disagreement(DisagreementKind::Content) => self
                .select_follow_up(selector, usage, ctx)
                .prefixed("It's fine to see it differently. It's your map, so change the part you disagree with."),
            Pattern::Disagreement(DisagreementKind::Approach) => {
                redirect("We can approach it another way.")
            }
            Pattern::Disagreement(DisagreementKind::General) => redirect("Thanks for telling me."),
            Pattern::PrematureEnding => small_step(
                "You can finish the round whenever you are ready. Before you do, one more idea:",
            ),
            Pattern::Frustration(AffectKind::Frustrated) => {
                small_step("This can be hard, and that's okay. Let's try one small step:")
            }
            Pattern::Frustration(AffectKind::Confused) => {
                small_step("Let me put it differently. Focus on one thing:")
            }
            Pattern::OffTopic => redirect("Let's bring our focus back to your concept map."),
            Pattern::IdeaBearing => {
                let affirmation = match classification.mentioned_concepts.first() {
                    Some(label) => format!("That's a thoughtful point about {}.", label),
                    None => format!("That's a thoughtful point: \"{}\".", snippet(utterance)),
                };
                self.select_follow_up(selector, usage, ctx)
                    .prefixed(&affirmation)
            }
            Pattern::Generic if classification.is_gibberish => {
                redirect("I couldn't quite follow that.")
            }
            Pattern::Generic => self.select_follow_up(selector, usage, ctx),
        }
    }

    /// Control-agent reply: acknowledges and points back to the task, with
    /// no concepts, strategies or questions about the domain.
    fn acknowledge(
        &self,
        classification: &Classification,
        utterance: &str,
        selector: &TemplateSelector,
        usage: &mut TemplateUsage,
        ctx: &SelectionContext<'_>,
    ) -> SelectedText {
        match classification.pattern {
            Pattern::Question(_) => SelectedText::canned(
                "That's something for you to decide based on the task instructions. Continue working as you think appropriate.",
            ),
            Pattern::Frustration(_) => SelectedText::canned(
                "Please take your time with the concept mapping task. Continue working according to the provided instructions.",
            ),
            Pattern::OffTopic => SelectedText::canned(
                "Please focus on the concept mapping task as described. Continue building your map according to the instructions.",
            ),
            Pattern::Inappropriate => SelectedText::canned(
                "Please keep our conversation respectful and continue with the concept mapping task.",
            ),
            Pattern::IdeaBearing => SelectedText::canned(format!(
                "I see you mentioned \"{}\". Continue developing your concept map as you think best.",
                snippet(utterance)
            )),
            Pattern::Generic if !classification.is_gibberish => {
                self.select_follow_up(selector, usage, ctx)
            }
            _ => SelectedText::canned(self.redirect),
        }
    }
}

const SNIPPET_WORDS: usize = 8;

/// First few words of an utterance for echoing back.
fn snippet(utterance: &str) -> String {
    let words: Vec<&str> = utterance.split_whitespace().collect();
    let mut out = words
        .iter()
        .take(SNIPPET_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    out = out
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_string();
    if words.len() > SNIPPET_WORDS {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierContext, ResponseClassifier};
    use crate::concept_map::ConceptMap;
    use crate::templates::{TemplateLibrary, TextSource};
    use std::sync::Arc;

    fn map() -> ConceptMap {
        let mut map = ConceptMap::new(1);
        map.add_concept("concept-alpha-01", "Supply").unwrap();
        map.add_concept("concept-beta-02", "Demand").unwrap();
        map
    }

    fn reply(kind: ScaffoldingType, utterance: &str) -> SelectedText {
        let map = map();
        let classifier = ResponseClassifier::new(20);
        let classification = classifier.classify(
            utterance,
            &ClassifierContext {
                scaffolding_type: Some(kind),
                turn_index: 1,
                map: &map,
            },
        );
        let selector = TemplateSelector::new(Arc::new(TemplateLibrary::new()), 2);
        let mut usage = TemplateUsage::new();
        agent_for(kind).deterministic_reply(
            &classification,
            utterance,
            &selector,
            &mut usage,
            &SelectionContext {
                map: &map,
                turn_index: 1,
                intensity: Intensity::Medium,
                focus: classification.mentioned_concepts.first().map(String::as_str),
            },
        )
    }

    #[test]
    fn test_table_lookup_matches_kind() {
        for kind in ScaffoldingType::ROSTER {
            assert_eq!(agent_for(kind).kind, kind);
        }
        assert!(!ScaffoldingType::ALL.contains(&ScaffoldingType::Neutral));
    }

    #[test]
    fn test_neutral_agent_only_acknowledges() {
        let question = reply(ScaffoldingType::Neutral, "What is the link between Supply and Demand?");
        assert_eq!(question.source, TextSource::Canned);
        assert!(question.text.starts_with("That's something for you to decide"));

        let idea = reply(
            ScaffoldingType::Neutral,
            "I think Supply drives Demand because prices move together",
        );
        assert!(idea.text.starts_with("I see you mentioned"));
        assert!(!idea.text.contains('?'));

        let stuck = reply(ScaffoldingType::Neutral, "This is so frustrating, I'm stuck");
        assert!(!stuck.text.contains(agent_for(ScaffoldingType::Strategic).small_step));
        assert!(stuck.text.starts_with("Please take your time"));
    }

    #[test]
    fn test_scaffolding_type_parsing() {
        assert_eq!(
            "Metacognitive".parse::<ScaffoldingType>(),
            Ok(ScaffoldingType::Metacognitive)
        );
        assert_eq!(
            "Neutral".parse::<ScaffoldingType>(),
            Ok(ScaffoldingType::Neutral)
        );
        assert_eq!(
            "social".parse::<ScaffoldingType>(),
            Err("Unknown scaffolding type: social".to_string())
        );
    }

    #[test]
    fn test_system_prompt_carries_intensity_and_rules() {
        let prompt = agent_for(ScaffoldingType::Strategic).system_prompt(Intensity::High);
        assert!(prompt.contains(STRATEGIC_PROMPT));
        assert!(prompt.contains(HIGH_INTENSITY_GUIDANCE));
        assert!(prompt.contains(AGENT_GROUND_RULES));
    }

    #[test]
    fn test_empty_reply_redirects() {
        let text = reply(ScaffoldingType::Procedural, "   ");
        assert_eq!(text.source, TextSource::Canned);
        assert!(text.text.ends_with(agent_for(ScaffoldingType::Procedural).redirect));
    }

    #[test]
    fn test_idea_bearing_reply_affirms_and_follows_up() {
        let text = reply(
            ScaffoldingType::Conceptual,
            "I think Supply drives Demand because prices move together",
        );
        assert!(text.text.starts_with("That's a thoughtful point about"));
        assert!(matches!(text.source, TextSource::Template { .. }));
    }

    #[test]
    fn test_minimal_reply_is_not_affirmed() {
        let text = reply(ScaffoldingType::Conceptual, "okay");
        assert!(!text.text.contains("thoughtful point"));
    }

    #[test]
    fn test_frustration_offers_small_step() {
        let text = reply(ScaffoldingType::Strategic, "This is so frustrating, I'm stuck");
        assert!(text.text.contains(agent_for(ScaffoldingType::Strategic).small_step));
    }

    #[test]
    fn test_snippet_truncates() {
        assert_eq!(snippet("one two three."), "one two three");
        assert_eq!(
            snippet("a b c d e f g h i j"),
            "a b c d e f g h..."
        );
    }
}
