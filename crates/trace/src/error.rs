//! Errors raised while building, editing or replaying a trace.

use crate::instruction::InstructionKind;
use thiserror::Error;

/// Structural or configuration problems in a trace.
///
/// Every variant indicates an invariant violation upstream of the mutators:
/// a trace that fails here must not be scored.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TraceError {
    #[error("invalid candidate distribution: {reason}")]
    InvalidDistribution { reason: String },

    #[error("invalid tile space: {reason}")]
    InvalidTileSpace { reason: String },

    #[error(
        "instruction {inst} ({kind}) references output {input_inst}.{input_index} \
         which is not defined before it"
    )]
    DanglingInput {
        inst: usize,
        kind: InstructionKind,
        input_inst: usize,
        input_index: usize,
    },

    #[error("instruction {inst} ({kind}) is sampled but carries no decision")]
    MissingDecision { inst: usize, kind: InstructionKind },

    #[error("instruction {inst} ({kind}) is not sampled but carries a decision")]
    UnexpectedDecision { inst: usize, kind: InstructionKind },

    #[error("instruction {inst} ({kind}): decision {decision} is outside its support")]
    DecisionOutOfSupport {
        inst: usize,
        kind: InstructionKind,
        decision: String,
    },

    #[error("instruction {inst} ({kind}) declares {declared} outputs, expected {expected}")]
    OutputCount {
        inst: usize,
        kind: InstructionKind,
        declared: usize,
        expected: usize,
    },

    #[error("instruction {inst} ({kind}) is missing attribute `{attr}`")]
    MissingAttr {
        inst: usize,
        kind: InstructionKind,
        attr: &'static str,
    },

    #[error("instruction {inst} ({kind}): {detail}")]
    IllTyped {
        inst: usize,
        kind: InstructionKind,
        detail: String,
    },

    #[error("instruction index {index} out of range for trace of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}
