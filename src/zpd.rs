//! Competence (ZPD) estimation and support intensity.
//!
//! Intensity starts from a step function over the learner's background score.
//! From round 2 on, each completed round feeds a growth signal into an
//! exponentially smoothed per-type estimate, and the mean estimate picks the
//! next round's tier. Nothing here judges whether learner content is correct.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agents::ScaffoldingType;
use crate::concept_map::{normalize_label, Coverage, CoverageReport, ExpertConceptMap};
use crate::config::ZpdConfig;

/// First round whose signal updates the estimate.
pub const FIRST_SMOOTHED_ROUND: usize = 2;

/// Estimates at or above these bounds map to the lighter tiers.
const LOW_TIER_ESTIMATE: f64 = 0.66;
const MEDIUM_TIER_ESTIMATE: f64 = 0.33;

/// Signal weights: node growth, edge growth, coverage delta.
const NODE_WEIGHT: f64 = 0.35;
const EDGE_WEIGHT: f64 = 0.35;
const COVERAGE_WEIGHT: f64 = 0.30;

/// A coverage gain of this many percentage points saturates the coverage term.
const COVERAGE_SATURATION_PCT: f64 = 25.0;

/// How much support the agent gives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Low,
    Medium,
    High,
}

impl Intensity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intensity::Low => "low",
            Intensity::Medium => "medium",
            Intensity::High => "high",
        }
    }
}

impl std::fmt::Display for Intensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Intensity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Intensity::Low),
            "medium" => Ok(Intensity::Medium),
            "high" => Ok(Intensity::High),
            _ => Err(format!("Unknown intensity: {}", s)),
        }
    }
}

/// Per-type competence estimates in [0, 1].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZpdEstimates(BTreeMap<ScaffoldingType, f64>);

impl ZpdEstimates {
    /// Every type starts from the same value.
    pub fn uniform(value: f64) -> Self {
        Self(
            ScaffoldingType::ALL
                .iter()
                .map(|kind| (*kind, value.clamp(0.0, 1.0)))
                .collect(),
        )
    }

    pub fn get(&self, kind: ScaffoldingType) -> f64 {
        self.0.get(&kind).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, kind: ScaffoldingType, value: f64) {
        self.0.insert(kind, value.clamp(0.0, 1.0));
    }

    pub fn mean(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.0.values().sum::<f64>() / self.0.len() as f64
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ScaffoldingType, &f64)> {
        self.0.iter()
    }
}

/// One smoothing step, recorded for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZpdTracePoint {
    pub round: usize,
    pub scaffolding_type: ScaffoldingType,
    pub previous: f64,
    pub signal: f64,
    pub updated: f64,
    pub next_intensity: Intensity,
}

/// Count distinct domain phrases in free text.
///
/// Phrases come from the reference map labels plus any extra key phrases; the
/// result saturates at `u8::MAX`.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeScorer {
    phrases: Vec<String>,
}

impl KnowledgeScorer {
    pub fn new(phrases: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let mut normalized: Vec<String> = phrases
            .into_iter()
            .map(|p| normalize_label(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        normalized.sort();
        normalized.dedup();
        Self { phrases: normalized }
    }

    /// Scorer over the labels of a reference map.
    pub fn from_reference(reference: &ExpertConceptMap) -> Self {
        Self::new(reference.map().concepts().map(|c| c.label.clone()))
    }

    pub fn score(&self, text: &str) -> u8 {
        let haystack = text.to_lowercase();
        let hits = self
            .phrases
            .iter()
            .filter(|phrase| haystack.contains(phrase.as_str()))
            .count();
        hits.min(u8::MAX as usize) as u8
    }
}

/// Maps background scores and round progress to intensity tiers.
#[derive(Debug, Clone)]
pub struct ZpdEstimator {
    config: ZpdConfig,
}

impl ZpdEstimator {
    pub fn new(config: ZpdConfig) -> Self {
        Self { config }
    }

    /// Step function over the background score: more knowledge, less support.
    pub fn initial_intensity(&self, score: u8) -> Intensity {
        let tier = if score >= self.config.low_threshold {
            Intensity::Low
        } else if score >= self.config.medium_threshold {
            Intensity::Medium
        } else {
            Intensity::High
        };
        self.restrict(tier)
    }

    /// Starting estimate shared by every scaffolding type.
    pub fn initial_estimates(&self, score: u8) -> ZpdEstimates {
        let ceiling = self.config.score_ceiling.max(1);
        ZpdEstimates::uniform(score.min(ceiling) as f64 / ceiling as f64)
    }

    /// Normalized growth signal of a completed round.
    pub fn round_signal(&self, report: &CoverageReport, prior: Option<&Coverage>) -> f64 {
        let node_growth =
            (report.added_nodes as f64 / self.config.node_growth_target.max(1) as f64).min(1.0);
        let edge_growth =
            (report.added_edges as f64 / self.config.edge_growth_target.max(1) as f64).min(1.0);

        let coverage_gain = match prior {
            Some(prior) => {
                let node_delta = report.coverage.node_coverage_pct - prior.node_coverage_pct;
                let edge_delta = report.coverage.edge_coverage_pct - prior.edge_coverage_pct;
                ((node_delta + edge_delta) / 2.0).max(0.0)
            }
            None => 0.0,
        };
        let coverage_term = (coverage_gain / COVERAGE_SATURATION_PCT).min(1.0);

        (NODE_WEIGHT * node_growth + EDGE_WEIGHT * edge_growth + COVERAGE_WEIGHT * coverage_term)
            .clamp(0.0, 1.0)
    }

    /// `alpha * previous + (1 - alpha) * signal`
    pub fn smooth(&self, previous: f64, signal: f64) -> f64 {
        let alpha = self.config.alpha;
        (alpha * previous + (1.0 - alpha) * signal).clamp(0.0, 1.0)
    }

    /// Tier for a continuous estimate.
    pub fn tier_for(&self, estimate: f64) -> Intensity {
        let tier = if estimate >= LOW_TIER_ESTIMATE {
            Intensity::Low
        } else if estimate >= MEDIUM_TIER_ESTIMATE {
            Intensity::Medium
        } else {
            Intensity::High
        };
        self.restrict(tier)
    }

    /// Fold a completed round into the estimates.
    ///
    /// Returns `None` (and changes nothing) for rounds before
    /// [`FIRST_SMOOTHED_ROUND`].
    pub fn update(
        &self,
        estimates: &mut ZpdEstimates,
        round: usize,
        kind: ScaffoldingType,
        report: &CoverageReport,
        prior: Option<&Coverage>,
    ) -> Option<ZpdTracePoint> {
        if round < FIRST_SMOOTHED_ROUND {
            return None;
        }
        let previous = estimates.get(kind);
        let signal = self.round_signal(report, prior);
        let updated = self.smooth(previous, signal);
        estimates.set(kind, updated);

        Some(ZpdTracePoint {
            round,
            scaffolding_type: kind,
            previous,
            signal,
            updated,
            next_intensity: self.tier_for(estimates.mean()),
        })
    }

    fn restrict(&self, tier: Intensity) -> Intensity {
        if tier == Intensity::Low && !self.config.allow_low_intensity {
            Intensity::Medium
        } else {
            tier
        }
    }
}
