use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ScaffoldingType;
use crate::error::StateViolation;

/// Which ordering rule a deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencePolicyKind {
    /// Same order for every participant.
    Fixed,
    /// Fresh permutation per session, no repeats.
    Randomized,
    /// Order set by the session's experimental condition.
    Condition,
}

impl SequencePolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequencePolicyKind::Fixed => "fixed",
            SequencePolicyKind::Randomized => "randomized",
            SequencePolicyKind::Condition => "condition",
        }
    }
}

impl std::fmt::Display for SequencePolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SequencePolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(SequencePolicyKind::Fixed),
            "randomized" | "random" => Ok(SequencePolicyKind::Randomized),
            "condition" | "conditions" => Ok(SequencePolicyKind::Condition),
            _ => Err(format!("Unknown sequence policy: {}", s)),
        }
    }
}

/// Experimental arm of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentalCondition {
    /// Scaffolding agents in the base order.
    #[serde(alias = "eg_seq", alias = "EG_SEQ")]
    Sequenced,
    /// The base order reversed.
    #[serde(alias = "cg_wrong_seq", alias = "CG_WRONG_SEQ")]
    Reversed,
    /// The neutral control agent in every round.
    #[serde(alias = "cg_neutral", alias = "CG_NEUTRAL")]
    Neutral,
}

impl ExperimentalCondition {
    pub const ALL: [ExperimentalCondition; 3] = [
        ExperimentalCondition::Sequenced,
        ExperimentalCondition::Reversed,
        ExperimentalCondition::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentalCondition::Sequenced => "sequenced",
            ExperimentalCondition::Reversed => "reversed",
            ExperimentalCondition::Neutral => "neutral",
        }
    }

    /// Balanced arm for a new session, derived from its id so the same id
    /// always lands in the same arm.
    pub fn assign(session_id: &Uuid) -> Self {
        let arms = Self::ALL.len() as u128;
        Self::ALL[(session_id.as_u128() % arms) as usize]
    }

    /// Round order of this arm over `base`.
    pub fn order(&self, base: &[ScaffoldingType]) -> Vec<ScaffoldingType> {
        match self {
            ExperimentalCondition::Sequenced => base.to_vec(),
            ExperimentalCondition::Reversed => base.iter().rev().copied().collect(),
            ExperimentalCondition::Neutral => vec![ScaffoldingType::Neutral; base.len()],
        }
    }
}

impl std::fmt::Display for ExperimentalCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExperimentalCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequenced" | "eg_seq" => Ok(ExperimentalCondition::Sequenced),
            "reversed" | "cg_wrong_seq" => Ok(ExperimentalCondition::Reversed),
            "neutral" | "cg_neutral" => Ok(ExperimentalCondition::Neutral),
            _ => Err(format!("Unknown experimental condition: {}", s)),
        }
    }
}

/// A configured sequencing rule.
#[derive(Debug, Clone, PartialEq)]
pub enum SequencePolicy {
    Fixed(Vec<ScaffoldingType>),
    /// A seed makes every generated permutation identical.
    Randomized { seed: Option<u64> },
    /// Arms are assigned per session over this base order.
    Condition(Vec<ScaffoldingType>),
}

impl SequencePolicy {
    pub fn kind(&self) -> SequencePolicyKind {
        match self {
            SequencePolicy::Fixed(_) => SequencePolicyKind::Fixed,
            SequencePolicy::Randomized { .. } => SequencePolicyKind::Randomized,
            SequencePolicy::Condition(_) => SequencePolicyKind::Condition,
        }
    }

    /// Produce the ordering for one session. The condition policy yields the
    /// sequenced arm here; use [`SequencePolicy::generate_for`] to assign one.
    pub fn generate(&self) -> AgentSequence {
        let order = match self {
            SequencePolicy::Fixed(order) => order.clone(),
            SequencePolicy::Randomized { seed } => {
                let mut order = ScaffoldingType::ALL.to_vec();
                match seed {
                    Some(seed) => order.shuffle(&mut StdRng::seed_from_u64(*seed)),
                    None => order.shuffle(&mut rand::rng()),
                }
                order
            }
            SequencePolicy::Condition(_) => {
                return self.for_condition(ExperimentalCondition::Sequenced);
            }
        };
        AgentSequence {
            order,
            policy: self.kind(),
            condition: None,
        }
    }

    /// Ordering for a new session. Under the condition policy the arm is
    /// assigned from the session id.
    pub fn generate_for(&self, session_id: &Uuid) -> AgentSequence {
        match self {
            SequencePolicy::Condition(_) => {
                self.for_condition(ExperimentalCondition::assign(session_id))
            }
            _ => self.generate(),
        }
    }

    /// Ordering for an explicitly assigned arm, whatever the configured rule.
    /// Randomized deployments use the default order as the base.
    pub fn for_condition(&self, condition: ExperimentalCondition) -> AgentSequence {
        let base = match self {
            SequencePolicy::Fixed(order) | SequencePolicy::Condition(order) => order.as_slice(),
            SequencePolicy::Randomized { .. } => &ScaffoldingType::ALL[..],
        };
        AgentSequence {
            order: condition.order(base),
            policy: SequencePolicyKind::Condition,
            condition: Some(condition),
        }
    }
}

/// The per-session round to scaffolding-type mapping. Round `n >= 1` uses
/// entry `n - 1`; round 0 has no agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSequence {
    order: Vec<ScaffoldingType>,
    policy: SequencePolicyKind,
    #[serde(default)]
    condition: Option<ExperimentalCondition>,
}

impl AgentSequence {
    /// Scaffolding type for a scaffolded round.
    pub fn next_agent(&self, round_index: usize) -> Result<ScaffoldingType, StateViolation> {
        round_index
            .checked_sub(1)
            .and_then(|i| self.order.get(i).copied())
            .ok_or(StateViolation::SequenceOutOfRange {
                index: round_index,
                len: self.order.len(),
            })
    }

    /// Number of scaffolded rounds.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn as_slice(&self) -> &[ScaffoldingType] {
        &self.order
    }

    pub fn policy(&self) -> SequencePolicyKind {
        self.policy
    }

    pub fn condition(&self) -> Option<ExperimentalCondition> {
        self.condition
    }
}
