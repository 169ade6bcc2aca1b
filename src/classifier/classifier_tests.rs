//! Unit tests for the response classifier.
//!
//! Covers pattern precedence, sub-kinds, side flags and the routing rule
//! that decides which turns reach the generative backend.

use super::*;
use crate::concept_map::ConceptMap;

fn map_with(labels: &[&str]) -> ConceptMap {
    let mut map = ConceptMap::new(1);
    for (i, label) in labels.iter().enumerate() {
        map.add_concept(format!("c{}", i), *label).unwrap();
    }
    map
}

fn classify_with(text: &str, map: &ConceptMap) -> Classification {
    let classifier = ResponseClassifier::new(20);
    let ctx = ClassifierContext {
        scaffolding_type: Some(ScaffoldingType::Conceptual),
        turn_index: 1,
        map,
    };
    classifier.classify(text, &ctx)
}

fn classify(text: &str) -> Classification {
    classify_with(text, &ConceptMap::new(1))
}

// ============================================================================
// Primary patterns
// ============================================================================

#[test]
fn test_empty_and_whitespace() {
    assert_eq!(classify("").pattern, Pattern::Empty);
    assert_eq!(classify("   \n\t").pattern, Pattern::Empty);
    assert_eq!(classify("?!").pattern, Pattern::Empty);
}

#[test]
fn test_inappropriate_language() {
    assert_eq!(classify("This is stupid and useless").pattern, Pattern::Inappropriate);
    // outranks a question
    assert_eq!(classify("Why is this so dumb?").pattern, Pattern::Inappropriate);
}

#[test]
fn test_domain_questions() {
    for text in [
        "What is AMG exactly?",
        "Can you explain how market entry works?",
        "how are pricing and competition related",
    ] {
        assert_eq!(
            classify(text).pattern,
            Pattern::Question(QuestionKind::Domain),
            "{}",
            text
        );
    }
}

#[test]
fn test_interface_questions() {
    for text in ["How do I create a node?", "Where is the delete button?"] {
        assert_eq!(
            classify(text).pattern,
            Pattern::Question(QuestionKind::Interface),
            "{}",
            text
        );
    }
}

#[test]
fn test_small_talk_question_is_off_topic() {
    assert_eq!(classify("What's the weather like today?").pattern, Pattern::OffTopic);
    assert_eq!(classify("Did you see the game last night?").pattern, Pattern::OffTopic);
}

#[test]
fn test_disagreement_sub_kinds() {
    assert_eq!(
        classify("I don't agree with that approach").pattern,
        Pattern::Disagreement(DisagreementKind::Approach)
    );
    assert_eq!(
        classify("That's not right, I think differently").pattern,
        Pattern::Disagreement(DisagreementKind::General)
    );
    assert_eq!(
        classify("I disagree with how this concept is linked").pattern,
        Pattern::Disagreement(DisagreementKind::Content)
    );

    let map = map_with(&["Export"]);
    assert_eq!(
        classify_with("I disagree, export matters less here", &map).pattern,
        Pattern::Disagreement(DisagreementKind::Content)
    );
}

#[test]
fn test_premature_ending() {
    assert_eq!(classify("I'm done, that's all").pattern, Pattern::PrematureEnding);
    assert_eq!(classify("Can't think of anything more").pattern, Pattern::PrematureEnding);
}

#[test]
fn test_frustration_and_confusion() {
    assert_eq!(
        classify("This is too difficult, I'm struggling").pattern,
        Pattern::Frustration(AffectKind::Frustrated)
    );
    assert_eq!(
        classify("I'm not sure about the link between pricing and export").pattern,
        Pattern::Frustration(AffectKind::Confused)
    );
    // frustration outranks an idea marker
    assert_eq!(
        classify("I think this is too hard because nothing connects").pattern,
        Pattern::Frustration(AffectKind::Frustrated)
    );
}

#[test]
fn test_idea_bearing_requires_length_and_marker() {
    let c = classify("I think ConceptA causes ConceptB because they share a dependency");
    assert_eq!(c.pattern, Pattern::IdeaBearing);
    assert!(!c.ambiguous);

    // marker but too short
    assert_eq!(classify("I think so").pattern, Pattern::Generic);
    // long but no marker
    assert_eq!(
        classify("Pricing and distribution and capital and more").pattern,
        Pattern::Generic
    );
}

#[test]
fn test_acknowledgements_are_never_ideas() {
    for text in ["okay", "yes", "I see", "hmm", "sure, sounds good"] {
        let c = classify(text);
        assert_eq!(c.pattern, Pattern::Generic, "{}", text);
        assert!(c.ambiguous);
    }
    assert!(classify("okay").is_minimal);
}

// ============================================================================
// Side flags and routing
// ============================================================================

#[test]
fn test_mentions_concept_uses_current_labels() {
    let map = map_with(&["Market Entry", "Pricing"]);
    let c = classify_with("Market entry seems to matter most for small firms", &map);
    assert!(c.mentions_concept);
    assert_eq!(c.mentioned_concepts, vec!["Market Entry".to_string()]);
    assert_eq!(c.pattern, Pattern::Generic);
    assert!(c.forwards_to_generator());
}

#[test]
fn test_short_labels_match_whole_words_only() {
    let map = map_with(&["AI"]);
    assert!(!classify_with("I said that already", &map).mentions_concept);
    assert!(classify_with("AI shapes the whole market here", &map).mentions_concept);
}

#[test]
fn test_gibberish_flag_blocks_forwarding() {
    let c = classify("asdf qwerty");
    assert!(c.is_gibberish);
    assert!(!c.forwards_to_generator());
}

#[test]
fn test_non_generic_patterns_never_forward() {
    let map = map_with(&["Pricing"]);
    for text in [
        "What does pricing mean?",
        "I think pricing drives demand because buyers compare offers",
        "I'm done with pricing",
    ] {
        let c = classify_with(text, &map);
        assert!(c.mentions_concept, "{}", text);
        assert!(!c.forwards_to_generator(), "{}", text);
    }
}

#[test]
fn test_pattern_tags() {
    assert_eq!(Pattern::Question(QuestionKind::Interface).tag(), "interface_question");
    assert_eq!(Pattern::Frustration(AffectKind::Confused).to_string(), "confusion");
    let json = serde_json::to_value(Pattern::Disagreement(DisagreementKind::Approach)).unwrap();
    assert_eq!(json["pattern"], "disagreement");
    assert_eq!(json["kind"], "approach");
}
