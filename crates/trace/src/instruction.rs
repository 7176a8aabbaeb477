//! Scheduling instructions and the decisions bound to them.

use crate::distribution::CandidateDistribution;
use crate::error::TraceError;
use crate::factor::checked_product;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Annotation keys understood by the decision store.
pub mod ann {
    pub const UNROLL_EXPLICIT: &str = "meta_schedule.unroll_explicit";
    pub const UNROLL_IMPLICIT: &str = "meta_schedule.unroll_implicit";
    pub const PARALLEL: &str = "meta_schedule.parallel";
    pub const VECTORIZE: &str = "meta_schedule.vectorize";
}

/// Scheduling primitive applied by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionKind {
    GetBlock,
    GetLoops,
    Split,
    Fuse,
    Reorder,
    Parallel,
    Vectorize,
    Unroll,
    ComputeAt,
    Annotate,
    SampleCategorical,
    SamplePerfectTile,
    SampleComputeLocation,
}

impl InstructionKind {
    pub fn name(&self) -> &'static str {
        match self {
            InstructionKind::GetBlock => "GetBlock",
            InstructionKind::GetLoops => "GetLoops",
            InstructionKind::Split => "Split",
            InstructionKind::Fuse => "Fuse",
            InstructionKind::Reorder => "Reorder",
            InstructionKind::Parallel => "Parallel",
            InstructionKind::Vectorize => "Vectorize",
            InstructionKind::Unroll => "Unroll",
            InstructionKind::ComputeAt => "ComputeAt",
            InstructionKind::Annotate => "Annotate",
            InstructionKind::SampleCategorical => "SampleCategorical",
            InstructionKind::SamplePerfectTile => "SamplePerfectTile",
            InstructionKind::SampleComputeLocation => "SampleComputeLocation",
        }
    }

    /// Whether instructions of this kind carry a sampled decision.
    pub fn is_sampling(&self) -> bool {
        matches!(
            self,
            InstructionKind::SampleCategorical
                | InstructionKind::SamplePerfectTile
                | InstructionKind::SampleComputeLocation
        )
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reference to the `index`-th output of the instruction at position `inst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub inst: usize,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    Output(OutputRef),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Ints(Vec<i64>),
    Str(String),
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(value: Vec<i64>) -> Self {
        AttrValue::Ints(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

/// Space of perfect tilings of one loop.
///
/// A tile is `n` positive factors whose product is `extent`, with the
/// innermost factor no larger than `max_innermost_factor`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileSpace {
    pub extent: i64,
    pub n: usize,
    pub max_innermost_factor: i64,
}

impl TileSpace {
    pub fn new(extent: i64, n: usize, max_innermost_factor: i64) -> Result<Self, TraceError> {
        if extent < 1 {
            return Err(TraceError::InvalidTileSpace {
                reason: format!("extent {extent} must be >= 1"),
            });
        }
        if n < 2 {
            return Err(TraceError::InvalidTileSpace {
                reason: format!("a tiling needs at least 2 factors, got {n}"),
            });
        }
        if max_innermost_factor < 1 {
            return Err(TraceError::InvalidTileSpace {
                reason: format!("max_innermost_factor {max_innermost_factor} must be >= 1"),
            });
        }
        Ok(Self {
            extent,
            n,
            max_innermost_factor,
        })
    }

    pub fn contains(&self, tile: &[i64]) -> bool {
        tile.len() == self.n
            && tile.iter().all(|f| *f >= 1)
            && checked_product(tile) == Some(self.extent)
            && tile.last().is_some_and(|f| *f <= self.max_innermost_factor)
    }
}

/// Support a sampled instruction draws its decision from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Support {
    Categorical(CandidateDistribution),
    PerfectTile(TileSpace),
}

/// Concrete value chosen for a sampled instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Decision {
    Value(i64),
    Tile(Vec<i64>),
}

impl Decision {
    pub fn as_value(&self) -> Option<i64> {
        match self {
            Decision::Value(v) => Some(*v),
            Decision::Tile(_) => None,
        }
    }

    pub fn as_tile(&self) -> Option<&[i64]> {
        match self {
            Decision::Tile(t) => Some(t),
            Decision::Value(_) => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Value(v) => write!(f, "{v}"),
            Decision::Tile(t) => write!(f, "{t:?}"),
        }
    }
}

/// One scheduling primitive application.
///
/// Instructions are never edited in place; [`Instruction::rebind`] returns a
/// copy carrying a different decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    kind: InstructionKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    inputs: Vec<Input>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attrs: BTreeMap<String, AttrValue>,
    num_outputs: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    support: Option<Support>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    decision: Option<Decision>,
}

impl Instruction {
    pub fn new(kind: InstructionKind, inputs: Vec<Input>, num_outputs: usize) -> Self {
        Self {
            kind,
            inputs,
            attrs: BTreeMap::new(),
            num_outputs,
            support: None,
            decision: None,
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    /// Attach the support and the decision drawn from it.
    pub fn sampled(mut self, support: Support, decision: Decision) -> Self {
        self.support = Some(support);
        self.decision = Some(decision);
        self
    }

    pub fn kind(&self) -> InstructionKind {
        self.kind
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn attrs(&self) -> &BTreeMap<String, AttrValue> {
        &self.attrs
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        match self.attrs.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn attr_ints(&self, key: &str) -> Option<&[i64]> {
        match self.attrs.get(key) {
            Some(AttrValue::Ints(v)) => Some(v),
            _ => None,
        }
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        match self.attrs.get(key) {
            Some(AttrValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    pub fn support(&self) -> Option<&Support> {
        self.support.as_ref()
    }

    pub fn decision(&self) -> Option<&Decision> {
        self.decision.as_ref()
    }

    pub fn is_sampled(&self) -> bool {
        self.support.is_some()
    }

    /// Copy of this instruction bound to `decision`.
    pub fn rebind(&self, decision: Decision) -> Self {
        Self {
            decision: Some(decision),
            ..self.clone()
        }
    }

    /// Check the sampled-decision invariant for the instruction at `index`.
    pub(crate) fn check_decision(&self, index: usize) -> Result<(), TraceError> {
        match (&self.support, &self.decision) {
            (None, None) => Ok(()),
            (None, Some(_)) => Err(TraceError::UnexpectedDecision {
                inst: index,
                kind: self.kind,
            }),
            (Some(_), None) => Err(TraceError::MissingDecision {
                inst: index,
                kind: self.kind,
            }),
            (Some(support), Some(decision)) => {
                let ok = match (support, decision) {
                    (Support::Categorical(dist), Decision::Value(v)) => dist.contains(*v),
                    (Support::PerfectTile(space), Decision::Tile(t)) => space.contains(t),
                    _ => false,
                };
                if ok {
                    Ok(())
                } else {
                    Err(TraceError::DecisionOutOfSupport {
                        inst: index,
                        kind: self.kind,
                        decision: decision.to_string(),
                    })
                }
            }
        }
    }
}
