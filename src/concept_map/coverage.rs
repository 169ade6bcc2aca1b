use serde::{Deserialize, Serialize};

use super::{diff, ConceptMap};
use crate::error::{ValidationError, ValidationResult};

/// Structural coverage of a map against a reference map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    /// Matched reference concepts, as a percentage in [0, 100].
    pub node_coverage_pct: f64,
    /// Matched reference relationships, as a percentage in [0, 100].
    pub edge_coverage_pct: f64,
    pub matched_nodes: usize,
    pub matched_edges: usize,
    pub reference_nodes: usize,
    pub reference_edges: usize,
}

/// Coverage plus growth relative to a prior snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    #[serde(flatten)]
    pub coverage: Coverage,
    pub added_nodes: usize,
    pub removed_nodes: usize,
    pub added_edges: usize,
    pub removed_edges: usize,
}

/// Reject references without concepts. A reference without relationships is
/// valid and yields 0% edge coverage.
pub(super) fn validate_reference(reference: &ConceptMap) -> ValidationResult<()> {
    if reference.concept_count() == 0 {
        return Err(ValidationError::EmptyReference {
            what: "concepts".to_string(),
        });
    }
    Ok(())
}

/// Node and edge coverage of `map` against `reference`.
///
/// An empty `map` yields 0% for both ratios. A reference without concepts is
/// rejected.
pub fn coverage(map: &ConceptMap, reference: &ConceptMap) -> ValidationResult<Coverage> {
    validate_reference(reference)?;

    let reference_labels = reference.label_keys();
    let reference_edges = reference.relationship_keys();

    let (matched_nodes, matched_edges) = if map.concept_count() == 0 {
        (0, 0)
    } else {
        (
            map.label_keys().intersection(&reference_labels).count(),
            map.relationship_keys()
                .intersection(&reference_edges)
                .count(),
        )
    };

    Ok(Coverage {
        node_coverage_pct: percentage(matched_nodes, reference_labels.len()),
        edge_coverage_pct: percentage(matched_edges, reference_edges.len()),
        matched_nodes,
        matched_edges,
        reference_nodes: reference_labels.len(),
        reference_edges: reference_edges.len(),
    })
}

/// Coverage of `current` plus its diff counts against `previous`.
pub fn coverage_report(
    current: &ConceptMap,
    previous: &ConceptMap,
    reference: &ConceptMap,
) -> ValidationResult<CoverageReport> {
    let coverage = coverage(current, reference)?;
    let counts = diff(previous, current).counts();
    Ok(CoverageReport {
        coverage,
        added_nodes: counts.added_nodes,
        removed_nodes: counts.removed_nodes,
        added_edges: counts.added_edges,
        removed_edges: counts.removed_edges,
    })
}

fn percentage(matched: usize, total: usize) -> f64 {
    // only an edge-free reference reaches here with total == 0
    if total == 0 {
        return 0.0;
    }
    matched as f64 * 100.0 / total as f64
}

/// One labelled snapshot in a longitudinal series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub label: String,
    pub map: ConceptMap,
}

/// Per-snapshot growth figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub label: String,
    pub node_count: usize,
    pub edge_count: usize,
    pub added_nodes: usize,
    pub removed_nodes: usize,
    pub added_edges: usize,
    pub removed_edges: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<Coverage>,
}

/// Growth across an ordered list of snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub entries: Vec<ProgressEntry>,
    /// Index of the entry with the most added concepts (earliest on ties).
    pub peak_node_growth: Option<usize>,
    /// Index of the entry with the most added relationships (earliest on ties).
    pub peak_edge_growth: Option<usize>,
}

/// Aggregate growth over `snapshots` in order. The first snapshot is compared
/// against an empty map.
pub fn longitudinal(
    snapshots: &[Snapshot],
    reference: Option<&ConceptMap>,
) -> ValidationResult<ProgressReport> {
    if let Some(reference) = reference {
        validate_reference(reference)?;
    }

    let empty = ConceptMap::default();
    let mut entries = Vec::with_capacity(snapshots.len());
    let mut previous = &empty;

    for snapshot in snapshots {
        let counts = diff(previous, &snapshot.map).counts();
        let coverage = match reference {
            Some(reference) => Some(coverage(&snapshot.map, reference)?),
            None => None,
        };
        entries.push(ProgressEntry {
            label: snapshot.label.clone(),
            node_count: snapshot.map.concept_count(),
            edge_count: snapshot.map.relationship_count(),
            added_nodes: counts.added_nodes,
            removed_nodes: counts.removed_nodes,
            added_edges: counts.added_edges,
            removed_edges: counts.removed_edges,
            coverage,
        });
        previous = &snapshot.map;
    }

    let peak_node_growth = peak_index(entries.iter().map(|e| e.added_nodes));
    let peak_edge_growth = peak_index(entries.iter().map(|e| e.added_edges));

    Ok(ProgressReport {
        entries,
        peak_node_growth,
        peak_edge_growth,
    })
}

fn peak_index(values: impl Iterator<Item = usize>) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (index, value) in values.enumerate() {
        match best {
            Some((_, top)) if value <= top => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}
