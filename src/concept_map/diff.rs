use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{normalize_label, ConceptMap};

/// Matching key of a relationship: normalized source, target and relation
/// labels. Direction matters, so `A -> B` and `B -> A` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipKey {
    pub source: String,
    pub target: String,
    pub label: String,
}

impl RelationshipKey {
    pub fn new(source: &str, target: &str, label: &str) -> Self {
        Self {
            source: normalize_label(source),
            target: normalize_label(target),
            label: normalize_label(label),
        }
    }
}

/// Structural difference between two snapshots, by normalized keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDiff {
    pub added_concepts: BTreeSet<String>,
    pub removed_concepts: BTreeSet<String>,
    pub added_relationships: BTreeSet<RelationshipKey>,
    pub removed_relationships: BTreeSet<RelationshipKey>,
}

/// Element counts of a [`MapDiff`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffCounts {
    pub added_nodes: usize,
    pub removed_nodes: usize,
    pub added_edges: usize,
    pub removed_edges: usize,
}

impl MapDiff {
    pub fn counts(&self) -> DiffCounts {
        DiffCounts {
            added_nodes: self.added_concepts.len(),
            removed_nodes: self.removed_concepts.len(),
            added_edges: self.added_relationships.len(),
            removed_edges: self.removed_relationships.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_concepts.is_empty()
            && self.removed_concepts.is_empty()
            && self.added_relationships.is_empty()
            && self.removed_relationships.is_empty()
    }
}

/// Added and removed concepts/relationships going from `previous` to `current`.
pub fn diff(previous: &ConceptMap, current: &ConceptMap) -> MapDiff {
    let before_labels = previous.label_keys();
    let after_labels = current.label_keys();
    let before_edges = previous.relationship_keys();
    let after_edges = current.relationship_keys();

    MapDiff {
        added_concepts: after_labels.difference(&before_labels).cloned().collect(),
        removed_concepts: before_labels.difference(&after_labels).cloned().collect(),
        added_relationships: after_edges.difference(&before_edges).cloned().collect(),
        removed_relationships: before_edges.difference(&after_edges).cloned().collect(),
    }
}
