use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Breadth, Slot, Template, TemplateCategory, TemplateLibrary};
use crate::agents::ScaffoldingType;
use crate::concept_map::{normalize_label, ConceptMap};
use crate::zpd::Intensity;

/// Weight of every fillable slot.
const SLOT_WEIGHT: u32 = 2;
/// Bonus when breadth matches the turn position.
const POSITION_WEIGHT: u32 = 6;
const INTENSITY_MATCH: u32 = 2;
const INTENSITY_NEUTRAL: u32 = 1;

/// Where a piece of agent text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TextSource {
    /// An entry of a template pool.
    Template {
        category: TemplateCategory,
        index: usize,
    },
    /// Built from map statistics because no unused template fit.
    MapSummary { category: TemplateCategory },
    /// A fixed reply that needs no pool.
    Canned,
}

/// Agent text ready for the learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedText {
    pub text: String,
    #[serde(flatten)]
    pub source: TextSource,
}

impl SelectedText {
    pub fn canned(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: TextSource::Canned,
        }
    }

    /// Prefix the text, keeping the source.
    pub fn prefixed(mut self, prefix: &str) -> Self {
        if !prefix.is_empty() {
            self.text = format!("{} {}", prefix.trim_end(), self.text);
        }
        self
    }
}

/// Per-session record of consumed template indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateUsage {
    used: HashMap<(ScaffoldingType, TemplateCategory), BTreeSet<usize>>,
}

impl TemplateUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_used(&self, kind: ScaffoldingType, category: TemplateCategory, index: usize) -> bool {
        self.used
            .get(&(kind, category))
            .is_some_and(|set| set.contains(&index))
    }

    pub fn mark_used(&mut self, kind: ScaffoldingType, category: TemplateCategory, index: usize) {
        self.used.entry((kind, category)).or_default().insert(index);
    }

    pub fn used_count(&self, kind: ScaffoldingType, category: TemplateCategory) -> usize {
        self.used.get(&(kind, category)).map_or(0, BTreeSet::len)
    }
}

/// Live inputs for one selection.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub map: &'a ConceptMap,
    /// Learner turns already recorded in the round.
    pub turn_index: usize,
    pub intensity: Intensity,
    /// A concept label the learner just mentioned.
    pub focus: Option<&'a str>,
}

/// Picks the best unused template for a pool and fills it from the map.
#[derive(Debug, Clone)]
pub struct TemplateSelector {
    library: Arc<TemplateLibrary>,
    early_turn_count: usize,
}

impl TemplateSelector {
    pub fn new(library: Arc<TemplateLibrary>, early_turn_count: usize) -> Self {
        Self {
            library,
            early_turn_count,
        }
    }

    pub fn library(&self) -> &TemplateLibrary {
        &self.library
    }

    /// Best unused, fillable template index without consuming it.
    pub fn peek(
        &self,
        kind: ScaffoldingType,
        category: TemplateCategory,
        usage: &TemplateUsage,
        ctx: &SelectionContext<'_>,
    ) -> Option<(usize, String)> {
        let values = SlotValues::from_context(ctx);
        let early = ctx.turn_index < self.early_turn_count;

        let mut best: Option<(u32, usize, String)> = None;
        for (index, template) in self.library.pool(kind, category).iter().enumerate() {
            if usage.is_used(kind, category, index) {
                continue;
            }
            let Some(text) = template.render(|slot| values.get(slot)) else {
                continue;
            };
            let score = fit_score(template, early, ctx.intensity);
            // strict comparison keeps the lowest index on ties
            if best.as_ref().map_or(true, |(top, _, _)| score > *top) {
                best = Some((score, index, text));
            }
        }
        best.map(|(_, index, text)| (index, text))
    }

    /// Choose, mark used and render. Falls back to a map summary when no
    /// unused template can be filled.
    pub fn select(
        &self,
        kind: ScaffoldingType,
        category: TemplateCategory,
        usage: &mut TemplateUsage,
        ctx: &SelectionContext<'_>,
    ) -> SelectedText {
        match self.peek(kind, category, usage, ctx) {
            Some((index, text)) => {
                usage.mark_used(kind, category, index);
                debug!(
                    scaffolding = %kind,
                    category = %category,
                    index,
                    "Selected template"
                );
                SelectedText {
                    text: ctx.map.scrub_identifiers(&text),
                    source: TextSource::Template { category, index },
                }
            }
            None => {
                debug!(
                    scaffolding = %kind,
                    category = %category,
                    used = usage.used_count(kind, category),
                    pool = self.library.pool(kind, category).len(),
                    "No fillable template left, using map summary"
                );
                SelectedText {
                    text: ctx.map.scrub_identifiers(&map_summary(kind, category, ctx)),
                    source: TextSource::MapSummary { category },
                }
            }
        }
    }
}

fn fit_score(template: &Template, early: bool, intensity: Intensity) -> u32 {
    let slots = template.slots.len() as u32 * SLOT_WEIGHT;
    let position = match (early, template.breadth) {
        (true, Breadth::Open) | (false, Breadth::Specific) => POSITION_WEIGHT,
        _ => 0,
    };
    let affinity = match template.intensity {
        Some(tier) if tier == intensity => INTENSITY_MATCH,
        None => INTENSITY_NEUTRAL,
        Some(_) => 0,
    };
    slots + position + affinity
}

/// Contextual message used once a pool is exhausted.
fn map_summary(
    kind: ScaffoldingType,
    category: TemplateCategory,
    ctx: &SelectionContext<'_>,
) -> String {
    let map = ctx.map;
    let nodes = map.concept_count();
    let edges = map.relationship_count();
    let counts = format!(
        "Your map has {} {} and {} {}.",
        nodes,
        if nodes == 1 { "concept" } else { "concepts" },
        edges,
        if edges == 1 { "relationship" } else { "relationships" }
    );

    if category == TemplateCategory::Conclusion {
        return format!("This round is complete. {}", counts);
    }
    if !kind.is_scaffolding() {
        return format!("{} Please continue with the task as described.", counts);
    }
    if nodes == 0 {
        return "Your map is still empty. What is one concept you would like to start with?"
            .to_string();
    }
    if let Some(isolated) = map.isolated_concepts().first() {
        return format!(
            "{} {} is not connected yet. How might it relate to the rest of your map?",
            counts, isolated.label
        );
    }
    let values = SlotValues::from_context(ctx);
    match values.concept {
        Some(concept) => format!(
            "{} Which concept could you connect to {} next, and what would the link say?",
            counts, concept
        ),
        None => format!("{} What would you like to add next?", counts),
    }
}

/// Slot values resolved once per selection. Everything here is a display
/// label or a number; identifiers never reach the output.
struct SlotValues {
    concept: Option<String>,
    second_concept: Option<String>,
    recent_concept: Option<String>,
    isolated_concept: Option<String>,
    relationship: Option<String>,
    node_count: String,
    edge_count: String,
}

impl SlotValues {
    fn from_context(ctx: &SelectionContext<'_>) -> Self {
        let map = ctx.map;

        let mut degree: HashMap<&str, usize> = HashMap::new();
        for r in map.relationships() {
            *degree.entry(r.source.as_str()).or_default() += 1;
            *degree.entry(r.target.as_str()).or_default() += 1;
        }

        let focus_id = ctx.focus.and_then(|label| {
            let key = normalize_label(label);
            map.concepts()
                .find(|c| normalize_label(&c.label) == key)
                .map(|c| c.id.as_str())
        });
        let hub_id = map
            .concepts()
            .max_by(|a, b| {
                let da = degree.get(a.id.as_str()).copied().unwrap_or(0);
                let db = degree.get(b.id.as_str()).copied().unwrap_or(0);
                // prefer the earlier id on equal degree
                da.cmp(&db).then_with(|| b.id.cmp(&a.id))
            })
            .map(|c| c.id.as_str());
        let primary_id = focus_id.or(hub_id);

        let second_id = primary_id.and_then(|primary| {
            let linked: BTreeSet<&str> = map
                .relationships()
                .filter(|r| r.source == primary || r.target == primary)
                .flat_map(|r| [r.source.as_str(), r.target.as_str()])
                .collect();
            let others = || map.concepts().filter(|c| c.id != primary);
            others()
                .find(|c| !linked.contains(c.id.as_str()))
                .or_else(|| others().next())
                .map(|c| c.id.as_str())
        });

        let relationship = primary_id
            .and_then(|primary| {
                map.relationships()
                    .find(|r| r.source == primary || r.target == primary)
            })
            .or_else(|| map.relationships().next())
            .and_then(|r| map.resolve(r))
            .map(|r| {
                if r.label.trim().is_empty() {
                    format!("{} and {}", r.source, r.target)
                } else {
                    format!("{} {} {}", r.source, r.label.trim(), r.target)
                }
            });

        let label = |id: Option<&str>| id.and_then(|id| map.label_of(id)).map(str::to_string);

        Self {
            concept: label(primary_id),
            second_concept: label(second_id),
            recent_concept: map.last_added_label().map(str::to_string),
            isolated_concept: map.isolated_concepts().first().map(|c| c.label.clone()),
            relationship,
            node_count: map.concept_count().to_string(),
            edge_count: map.relationship_count().to_string(),
        }
    }

    fn get(&self, slot: Slot) -> Option<String> {
        match slot {
            Slot::Concept => self.concept.clone(),
            Slot::SecondConcept => self.second_concept.clone(),
            Slot::RecentConcept => self.recent_concept.clone(),
            Slot::IsolatedConcept => self.isolated_concept.clone(),
            Slot::Relationship => self.relationship.clone(),
            Slot::NodeCount => Some(self.node_count.clone()),
            Slot::EdgeCount => Some(self.edge_count.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept_map::{Concept, Relationship};
    use std::collections::HashSet;

    fn concept(id: &str, label: &str) -> Concept {
        Concept {
            id: id.into(),
            label: label.into(),
        }
    }

    fn sample_map() -> ConceptMap {
        let mut map = ConceptMap::from_parts(
            1,
            vec![
                concept("c-0001-market", "Market"),
                concept("c-0002-pricing", "Pricing"),
                concept("c-0003-export", "Export"),
            ],
            vec![Relationship {
                id: "r-0001-market-pricing".into(),
                source: "c-0001-market".into(),
                target: "c-0002-pricing".into(),
                label: "shapes".into(),
            }],
        )
        .unwrap();
        map.add_concept("c-0004-tariff", "Tariff").unwrap();
        map
    }

    fn ctx(map: &ConceptMap, turn_index: usize) -> SelectionContext<'_> {
        SelectionContext {
            map,
            turn_index,
            intensity: Intensity::High,
            focus: None,
        }
    }

    fn selector() -> TemplateSelector {
        TemplateSelector::new(Arc::new(TemplateLibrary::new()), 2)
    }

    #[test]
    fn test_no_repeat_until_exhausted() {
        let selector = selector();
        let map = sample_map();
        let mut usage = TemplateUsage::new();
        let kind = ScaffoldingType::Conceptual;
        let pool_len = selector.library().pool(kind, TemplateCategory::FollowUp).len();

        let mut seen = HashSet::new();
        for turn in 0..pool_len {
            let selected = selector.select(kind, TemplateCategory::FollowUp, &mut usage, &ctx(&map, turn));
            match selected.source {
                TextSource::Template { index, .. } => assert!(seen.insert(index)),
                other => panic!("pool exhausted early: {:?}", other),
            }
        }

        let fallback = selector.select(kind, TemplateCategory::FollowUp, &mut usage, &ctx(&map, 9));
        assert_eq!(
            fallback.source,
            TextSource::MapSummary {
                category: TemplateCategory::FollowUp
            }
        );
        assert!(fallback.text.contains("4 concepts"));
    }

    #[test]
    fn test_usage_is_scoped_per_type_and_category() {
        let selector = selector();
        let map = sample_map();
        let mut usage = TemplateUsage::new();
        selector.select(
            ScaffoldingType::Strategic,
            TemplateCategory::FollowUp,
            &mut usage,
            &ctx(&map, 0),
        );
        assert_eq!(usage.used_count(ScaffoldingType::Strategic, TemplateCategory::FollowUp), 1);
        assert_eq!(usage.used_count(ScaffoldingType::Strategic, TemplateCategory::InitialPrompt), 0);
        assert_eq!(usage.used_count(ScaffoldingType::Procedural, TemplateCategory::FollowUp), 0);
    }

    #[test]
    fn test_early_turns_prefer_open_templates() {
        let mut library = TemplateLibrary::empty();
        let kind = ScaffoldingType::Procedural;
        library.register(kind, TemplateCategory::FollowUp, Template::specific("Link {concept}?"));
        library.register(kind, TemplateCategory::FollowUp, Template::open("What next?"));
        let selector = TemplateSelector::new(Arc::new(library), 2);
        let map = sample_map();

        let usage = TemplateUsage::new();
        let early = selector.peek(kind, TemplateCategory::FollowUp, &usage, &ctx(&map, 0));
        assert_eq!(early.map(|(i, _)| i), Some(1));
        let late = selector.peek(kind, TemplateCategory::FollowUp, &usage, &ctx(&map, 3));
        assert_eq!(late.map(|(i, _)| i), Some(0));
    }

    #[test]
    fn test_ties_break_to_lowest_index() {
        let mut library = TemplateLibrary::empty();
        let kind = ScaffoldingType::Strategic;
        library.register(kind, TemplateCategory::FollowUp, Template::open("First?"));
        library.register(kind, TemplateCategory::FollowUp, Template::open("Second?"));
        let selector = TemplateSelector::new(Arc::new(library), 2);
        let map = sample_map();
        let picked = selector.peek(kind, TemplateCategory::FollowUp, &TemplateUsage::new(), &ctx(&map, 0));
        assert_eq!(picked.map(|(i, _)| i), Some(0));
    }

    #[test]
    fn test_unfillable_templates_are_skipped() {
        let mut library = TemplateLibrary::empty();
        let kind = ScaffoldingType::Conceptual;
        library.register(kind, TemplateCategory::FollowUp, Template::specific("Explain {relationship}?"));
        let selector = TemplateSelector::new(Arc::new(library), 0);
        let empty = ConceptMap::new(1);
        let mut usage = TemplateUsage::new();
        let selected = selector.select(kind, TemplateCategory::FollowUp, &mut usage, &ctx(&empty, 0));
        assert!(matches!(selected.source, TextSource::MapSummary { .. }));
        assert_eq!(usage.used_count(kind, TemplateCategory::FollowUp), 0);
    }

    #[test]
    fn test_neutral_summary_asks_nothing() {
        let selector = TemplateSelector::new(Arc::new(TemplateLibrary::empty()), 0);
        let map = sample_map();
        let mut usage = TemplateUsage::new();
        let selected = selector.select(
            ScaffoldingType::Neutral,
            TemplateCategory::FollowUp,
            &mut usage,
            &ctx(&map, 3),
        );
        assert!(matches!(selected.source, TextSource::MapSummary { .. }));
        assert!(!selected.text.contains('?'), "{}", selected.text);
    }

    #[test]
    fn test_filled_text_never_contains_identifiers() {
        let selector = selector();
        let map = sample_map();
        let mut usage = TemplateUsage::new();
        for kind in ScaffoldingType::ROSTER {
            for category in [TemplateCategory::InitialPrompt, TemplateCategory::FollowUp] {
                for turn in 0..10 {
                    let selected = selector.select(kind, category, &mut usage, &ctx(&map, turn));
                    for c in map.concepts() {
                        assert!(!selected.text.contains(&c.id), "{}", selected.text);
                    }
                    for r in map.relationships() {
                        assert!(!selected.text.contains(&r.id), "{}", selected.text);
                    }
                    assert!(!selected.text.contains('{'), "{}", selected.text);
                }
            }
        }
    }

    #[test]
    fn test_slot_resolution() {
        let map = sample_map();
        let values = SlotValues::from_context(&ctx(&map, 0));
        // Market and Pricing share the only edge; equal degree resolves to the earlier id
        assert_eq!(values.concept.as_deref(), Some("Market"));
        assert_eq!(values.second_concept.as_deref(), Some("Export"));
        assert_eq!(values.recent_concept.as_deref(), Some("Tariff"));
        assert_eq!(values.isolated_concept.as_deref(), Some("Export"));
        assert_eq!(values.relationship.as_deref(), Some("Market shapes Pricing"));

        let focused = SelectionContext {
            focus: Some("pricing"),
            ..ctx(&map, 0)
        };
        let values = SlotValues::from_context(&focused);
        assert_eq!(values.concept.as_deref(), Some("Pricing"));
    }
}
