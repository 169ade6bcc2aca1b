//! Concept map model and structural analysis.
//!
//! A [`ConceptMap`] is the validated, in-core representation of a learner's
//! graph. It is built at the boundary from a [`ConceptMapInput`] or mutated
//! through [`MapEdit`] operations; both paths reject malformed shapes before
//! anything reaches the session engine.
//!
//! Identifiers are opaque and never leave the engine in learner-facing text.
//! Everything rendered for the learner or the generative backend goes through
//! label resolution ([`ConceptMap::describe`], [`ConceptMap::resolve`]).
//!
//! - [`diff`]: added/removed elements between two snapshots
//! - [`coverage`]: structural coverage against a reference map
//! - [`longitudinal`]: growth across an ordered list of snapshots

mod coverage;
mod diff;

pub use coverage::*;
pub use diff::*;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};

/// Identifiers at least this long are always scrubbed from free text.
/// Shorter ones are scrubbed only when they carry a digit or separator, so
/// plain words such as `a` or `root` survive.
const MIN_SCRUB_ID_LEN: usize = 8;

/// Normalization key for labels: trimmed and case-folded.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

/// A node in a concept map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    /// Opaque identifier, never shown to the learner.
    pub id: String,
    /// Display text.
    pub label: String,
}

/// A directed, labelled edge between two concepts of the same map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Opaque identifier.
    pub id: String,
    /// Source concept id.
    pub source: String,
    /// Target concept id.
    pub target: String,
    /// Relation text, may be empty.
    #[serde(default)]
    pub label: String,
}

/// A relationship with both endpoints resolved to display labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRelationship {
    pub source: String,
    pub target: String,
    pub label: String,
}

/// Wire shape of a concept map, validated into [`ConceptMap`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConceptMapInput {
    #[serde(default)]
    pub round: usize,
    #[serde(default)]
    pub concepts: Vec<Concept>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_added: Option<String>,
}

/// A single learner edit applied to the working map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MapEdit {
    AddConcept { id: String, label: String },
    RemoveConcept { id: String },
    RelabelConcept { id: String, label: String },
    AddRelationship {
        id: String,
        source: String,
        target: String,
        #[serde(default)]
        label: String,
    },
    RemoveRelationship { id: String },
    RelabelRelationship { id: String, label: String },
}

/// Validated concept map snapshot tagged with the round it belongs to.
///
/// Invariant: every relationship endpoint references a concept of this map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConceptMapInput", into = "ConceptMapInput")]
pub struct ConceptMap {
    round: usize,
    concepts: BTreeMap<String, Concept>,
    relationships: BTreeMap<String, Relationship>,
    last_added: Option<String>,
}

impl ConceptMap {
    /// Create an empty map for the given round.
    pub fn new(round: usize) -> Self {
        Self {
            round,
            ..Default::default()
        }
    }

    /// Build a map from loose parts, validating every element.
    pub fn from_parts(
        round: usize,
        concepts: Vec<Concept>,
        relationships: Vec<Relationship>,
    ) -> ValidationResult<Self> {
        Self::try_from(ConceptMapInput {
            round,
            concepts,
            relationships,
            last_added: None,
        })
    }

    /// Clone this map as the starting point of another round.
    pub fn carried_into(&self, round: usize) -> Self {
        let mut next = self.clone();
        next.round = round;
        next
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.concepts.values()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    pub fn concept(&self, id: &str) -> Option<&Concept> {
        self.concepts.get(id)
    }

    pub fn relationship(&self, id: &str) -> Option<&Relationship> {
        self.relationships.get(id)
    }

    pub fn concept_count(&self) -> usize {
        self.concepts.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty() && self.relationships.is_empty()
    }

    /// Display label of a concept id.
    pub fn label_of(&self, id: &str) -> Option<&str> {
        self.concepts.get(id).map(|c| c.label.as_str())
    }

    /// Label of the most recently added concept that is still present.
    pub fn last_added_label(&self) -> Option<&str> {
        self.last_added.as_deref().and_then(|id| self.label_of(id))
    }

    /// Resolve a relationship's endpoints to labels.
    pub fn resolve(&self, relationship: &Relationship) -> Option<ResolvedRelationship> {
        Some(ResolvedRelationship {
            source: self.label_of(&relationship.source)?.to_string(),
            target: self.label_of(&relationship.target)?.to_string(),
            label: relationship.label.clone(),
        })
    }

    /// All relationships, resolved, in identifier order.
    pub fn resolved_relationships(&self) -> Vec<ResolvedRelationship> {
        self.relationships
            .values()
            .filter_map(|r| self.resolve(r))
            .collect()
    }

    /// Concepts that take part in no relationship.
    pub fn isolated_concepts(&self) -> Vec<&Concept> {
        let linked: BTreeSet<&str> = self
            .relationships
            .values()
            .flat_map(|r| [r.source.as_str(), r.target.as_str()])
            .collect();
        self.concepts
            .values()
            .filter(|c| !linked.contains(c.id.as_str()))
            .collect()
    }

    /// Set of normalized concept labels.
    pub fn label_keys(&self) -> BTreeSet<String> {
        self.concepts
            .values()
            .map(|c| normalize_label(&c.label))
            .collect()
    }

    /// Set of relationship keys (normalized source, target and relation labels).
    pub fn relationship_keys(&self) -> BTreeSet<RelationshipKey> {
        self.relationships
            .values()
            .filter_map(|r| self.resolve(r))
            .map(|r| RelationshipKey::new(&r.source, &r.target, &r.label))
            .collect()
    }

    /// Render the map for the generative backend. Labels only.
    pub fn describe(&self) -> String {
        if self.concepts.is_empty() {
            return "The concept map is empty.".to_string();
        }

        let mut out = String::from("Concepts:\n");
        for concept in self.concepts.values() {
            out.push_str("- ");
            out.push_str(&concept.label);
            out.push('\n');
        }

        let resolved = self.resolved_relationships();
        if resolved.is_empty() {
            out.push_str("Relationships: none yet\n");
        } else {
            out.push_str("Relationships:\n");
            for r in resolved {
                if r.label.trim().is_empty() {
                    out.push_str(&format!("- {} --> {}\n", r.source, r.target));
                } else {
                    out.push_str(&format!("- {} --[{}]--> {}\n", r.source, r.label, r.target));
                }
            }
        }
        out
    }

    /// Replace identifiers standing as whole tokens in `text` with their
    /// display labels.
    pub fn scrub_identifiers(&self, text: &str) -> String {
        let mut out = text.to_string();
        for concept in self.concepts.values() {
            if is_scrubbable(&concept.id) {
                out = replace_token(&out, &concept.id, &concept.label);
            }
        }
        for relationship in self.relationships.values() {
            if is_scrubbable(&relationship.id) {
                let replacement = if relationship.label.trim().is_empty() {
                    "this relationship"
                } else {
                    relationship.label.as_str()
                };
                out = replace_token(&out, &relationship.id, replacement);
            }
        }
        out
    }

    /// Identifiers present in `self` but missing from `other`.
    pub fn ids_missing_from(&self, other: &ConceptMap) -> Vec<String> {
        let concepts = self
            .concepts
            .keys()
            .filter(|id| !other.concepts.contains_key(*id));
        let relationships = self
            .relationships
            .keys()
            .filter(|id| !other.relationships.contains_key(*id));
        concepts.chain(relationships).cloned().collect()
    }

    /// Apply an edit atomically: on error the map is unchanged.
    pub fn apply(&mut self, edit: MapEdit) -> ValidationResult<()> {
        match edit {
            MapEdit::AddConcept { id, label } => self.add_concept(id, label),
            MapEdit::RemoveConcept { id } => self.remove_concept(&id).map(|_| ()),
            MapEdit::RelabelConcept { id, label } => self.relabel_concept(&id, label),
            MapEdit::AddRelationship {
                id,
                source,
                target,
                label,
            } => self.add_relationship(Relationship {
                id,
                source,
                target,
                label,
            }),
            MapEdit::RemoveRelationship { id } => self.remove_relationship(&id).map(|_| ()),
            MapEdit::RelabelRelationship { id, label } => self.relabel_relationship(&id, label),
        }
    }

    pub fn add_concept(
        &mut self,
        id: impl Into<String>,
        label: impl Into<String>,
    ) -> ValidationResult<()> {
        let concept = validate_concept(Concept {
            id: id.into(),
            label: label.into(),
        })?;
        if self.concepts.contains_key(&concept.id) {
            return Err(ValidationError::DuplicateConcept { id: concept.id });
        }
        self.last_added = Some(concept.id.clone());
        self.concepts.insert(concept.id.clone(), concept);
        Ok(())
    }

    /// Remove a concept together with every relationship touching it.
    pub fn remove_concept(&mut self, id: &str) -> ValidationResult<Vec<Relationship>> {
        if self.concepts.remove(id).is_none() {
            return Err(ValidationError::UnknownConcept { id: id.to_string() });
        }
        let touching: Vec<String> = self
            .relationships
            .values()
            .filter(|r| r.source == id || r.target == id)
            .map(|r| r.id.clone())
            .collect();
        let removed = touching
            .iter()
            .filter_map(|rid| self.relationships.remove(rid))
            .collect();
        if self.last_added.as_deref() == Some(id) {
            self.last_added = None;
        }
        Ok(removed)
    }

    pub fn relabel_concept(&mut self, id: &str, label: impl Into<String>) -> ValidationResult<()> {
        let label = validate_label("label", label.into())?;
        let concept = self
            .concepts
            .get_mut(id)
            .ok_or_else(|| ValidationError::UnknownConcept { id: id.to_string() })?;
        concept.label = label;
        Ok(())
    }

    pub fn add_relationship(&mut self, relationship: Relationship) -> ValidationResult<()> {
        let relationship = self.validate_relationship(relationship)?;
        if self.relationships.contains_key(&relationship.id) {
            return Err(ValidationError::DuplicateRelationship {
                id: relationship.id,
            });
        }
        self.relationships
            .insert(relationship.id.clone(), relationship);
        Ok(())
    }

    pub fn remove_relationship(&mut self, id: &str) -> ValidationResult<Relationship> {
        self.relationships
            .remove(id)
            .ok_or_else(|| ValidationError::UnknownRelationship { id: id.to_string() })
    }

    pub fn relabel_relationship(
        &mut self,
        id: &str,
        label: impl Into<String>,
    ) -> ValidationResult<()> {
        let relationship = self
            .relationships
            .get_mut(id)
            .ok_or_else(|| ValidationError::UnknownRelationship { id: id.to_string() })?;
        relationship.label = label.into().trim().to_string();
        Ok(())
    }

    fn validate_relationship(&self, relationship: Relationship) -> ValidationResult<Relationship> {
        if relationship.id.trim().is_empty() {
            return Err(ValidationError::field(
                "relationship.id",
                "must not be blank",
            ));
        }
        for endpoint in [&relationship.source, &relationship.target] {
            if !self.concepts.contains_key(endpoint) {
                return Err(ValidationError::DanglingEndpoint {
                    relationship: relationship.id.clone(),
                    concept: endpoint.clone(),
                });
            }
        }
        Ok(Relationship {
            label: relationship.label.trim().to_string(),
            ..relationship
        })
    }
}

fn validate_label(field: &str, label: String) -> ValidationResult<String> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::field(field, "must not be blank"));
    }
    Ok(trimmed.to_string())
}

fn validate_concept(concept: Concept) -> ValidationResult<Concept> {
    if concept.id.trim().is_empty() {
        return Err(ValidationError::field("concept.id", "must not be blank"));
    }
    Ok(Concept {
        label: validate_label("concept.label", concept.label)?,
        id: concept.id,
    })
}

impl TryFrom<ConceptMapInput> for ConceptMap {
    type Error = ValidationError;

    fn try_from(input: ConceptMapInput) -> Result<Self, Self::Error> {
        let mut map = ConceptMap::new(input.round);
        for concept in input.concepts {
            map.add_concept(concept.id, concept.label)?;
        }
        for relationship in input.relationships {
            map.add_relationship(relationship)?;
        }
        let latest_inserted = map.last_added.take();
        map.last_added = input
            .last_added
            .filter(|id| map.concepts.contains_key(id))
            .or(latest_inserted);
        Ok(map)
    }
}

impl From<ConceptMap> for ConceptMapInput {
    fn from(map: ConceptMap) -> Self {
        ConceptMapInput {
            round: map.round,
            concepts: map.concepts.into_values().collect(),
            relationships: map.relationships.into_values().collect(),
            last_added: map.last_added,
        }
    }
}

fn is_scrubbable(id: &str) -> bool {
    id.len() >= MIN_SCRUB_ID_LEN
        || id
            .chars()
            .any(|c| c.is_ascii_digit() || matches!(c, '-' | '_' | ':' | '.'))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Replace occurrences of `token` not embedded in a longer word.
fn replace_token(text: &str, token: &str, replacement: &str) -> String {
    if token.is_empty() || !text.contains(token) {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, _) in text.match_indices(token) {
        let end = start + token.len();
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        if before.is_some_and(is_word_char) || after.is_some_and(is_word_char) {
            continue;
        }
        out.push_str(&text[last..start]);
        out.push_str(replacement);
        last = end;
    }
    out.push_str(&text[last..]);
    out
}

/// Immutable reference graph used as the coverage target of a task domain.
///
/// Holds at least one concept, so node coverage is always defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConceptMap", into = "ConceptMap")]
pub struct ExpertConceptMap(ConceptMap);

impl ExpertConceptMap {
    pub fn new(map: ConceptMap) -> ValidationResult<Self> {
        coverage::validate_reference(&map)?;
        Ok(Self(map))
    }

    pub fn map(&self) -> &ConceptMap {
        &self.0
    }
}

impl TryFrom<ConceptMap> for ExpertConceptMap {
    type Error = ValidationError;

    fn try_from(map: ConceptMap) -> Result<Self, Self::Error> {
        Self::new(map)
    }
}

impl From<ExpertConceptMap> for ConceptMap {
    fn from(expert: ExpertConceptMap) -> Self {
        expert.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConceptMap {
        ConceptMap::from_parts(
            1,
            vec![
                Concept {
                    id: "c-0000001".to_string(),
                    label: "Market Entry".to_string(),
                },
                Concept {
                    id: "c-0000002".to_string(),
                    label: "Entry Barriers".to_string(),
                },
                Concept {
                    id: "c-0000003".to_string(),
                    label: "Pricing".to_string(),
                },
            ],
            vec![Relationship {
                id: "r-0000001".to_string(),
                source: "c-0000002".to_string(),
                target: "c-0000001".to_string(),
                label: "constrain".to_string(),
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Market ENTRY "), "market entry");
    }

    #[test]
    fn test_dangling_relationship_rejected() {
        let err = ConceptMap::from_parts(
            0,
            vec![Concept {
                id: "a".to_string(),
                label: "A".to_string(),
            }],
            vec![Relationship {
                id: "r".to_string(),
                source: "a".to_string(),
                target: "missing".to_string(),
                label: String::new(),
            }],
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::DanglingEndpoint {
                relationship: "r".to_string(),
                concept: "missing".to_string(),
            }
        );
    }

    #[test]
    fn test_blank_label_and_duplicate_id_rejected() {
        let mut map = ConceptMap::new(0);
        assert!(map.add_concept("a", "   ").is_err());
        map.add_concept("a", "A").unwrap();
        assert_eq!(
            map.add_concept("a", "Other").unwrap_err(),
            ValidationError::DuplicateConcept { id: "a".to_string() }
        );
    }

    #[test]
    fn test_remove_concept_cascades_relationships() {
        let mut map = sample();
        let removed = map.remove_concept("c-0000001").unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(map.relationship_count(), 0);
        assert_eq!(map.concept_count(), 2);
    }

    #[test]
    fn test_failed_edit_leaves_map_unchanged() {
        let mut map = sample();
        let before = map.clone();
        let result = map.apply(MapEdit::AddRelationship {
            id: "r-2".to_string(),
            source: "c-0000001".to_string(),
            target: "nope".to_string(),
            label: "x".to_string(),
        });
        assert!(result.is_err());
        assert_eq!(map, before);
    }

    #[test]
    fn test_last_added_tracks_latest_and_clears_on_removal() {
        let mut map = sample();
        assert_eq!(map.last_added_label(), Some("Pricing"));
        map.add_concept("c-4", "Joint Venture").unwrap();
        assert_eq!(map.last_added_label(), Some("Joint Venture"));
        map.remove_concept("c-4").unwrap();
        assert_eq!(map.last_added_label(), None);
    }

    #[test]
    fn test_describe_uses_labels_only() {
        let map = sample();
        let text = map.describe();
        assert!(text.contains("Entry Barriers --[constrain]--> Market Entry"));
        assert!(!text.contains("c-0000001"));
        assert!(!text.contains("r-0000001"));
    }

    #[test]
    fn test_scrub_identifiers() {
        let map = sample();
        let text = map.scrub_identifiers("How does c-0000003 relate to c-0000001?");
        assert_eq!(text, "How does Pricing relate to Market Entry?");
    }

    #[test]
    fn test_scrub_short_identifiers_as_whole_tokens() {
        let mut map = ConceptMap::new(1);
        map.add_concept("n1", "Sunlight").unwrap();
        map.add_concept("n10", "Glucose").unwrap();
        map.add_concept("a", "Water").unwrap();
        map.add_relationship(Relationship {
            id: "e1".to_string(),
            source: "n1".to_string(),
            target: "n10".to_string(),
            label: String::new(),
        })
        .unwrap();

        let text = map.scrub_identifiers("Does n1 feed n10 through e1? Take a look at n1x.");
        assert_eq!(
            text,
            "Does Sunlight feed Glucose through this relationship? Take a look at n1x."
        );
    }

    #[test]
    fn test_isolated_concepts() {
        let map = sample();
        let isolated: Vec<&str> = map
            .isolated_concepts()
            .iter()
            .map(|c| c.label.as_str())
            .collect();
        assert_eq!(isolated, vec!["Pricing"]);
    }

    #[test]
    fn test_ids_missing_from() {
        let base = sample();
        let mut edited = base.clone();
        edited.remove_relationship("r-0000001").unwrap();
        assert_eq!(base.ids_missing_from(&edited), vec!["r-0000001".to_string()]);
        assert!(edited.ids_missing_from(&base).is_empty());
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let json = serde_json::json!({
            "round": 2,
            "concepts": [{"id": "a", "label": "A"}],
            "relationships": [{"id": "r", "source": "a", "target": "b"}]
        });
        assert!(serde_json::from_value::<ConceptMap>(json).is_err());

        let map = sample();
        let value = serde_json::to_value(&map).unwrap();
        let back: ConceptMap = serde_json::from_value(value).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_expert_map_requires_concepts_only() {
        let only_nodes = ConceptMap::from_parts(
            0,
            vec![Concept {
                id: "a".to_string(),
                label: "A".to_string(),
            }],
            vec![],
        )
        .unwrap();
        assert!(ExpertConceptMap::new(only_nodes).is_ok());
        assert!(ExpertConceptMap::new(ConceptMap::new(0)).is_err());
        assert!(ExpertConceptMap::new(sample()).is_ok());
    }
}
