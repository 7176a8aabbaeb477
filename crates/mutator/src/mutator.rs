//! The mutator contract.

use crate::error::MutateError;
use crate::random::RandomStream;
use metaforge_trace::{Decision, Trace};
use std::fmt;
use std::sync::Arc;

/// Why a mutator produced nothing. Expected and frequent; not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotApplicable {
    /// The trace has no decision site this mutator targets.
    NoSites,
    /// Excluding the current value left nothing to draw from.
    SupportExhausted { inst: usize },
    /// Rejection sampling kept drawing the current value.
    RejectionLimit { inst: usize, attempts: usize },
    /// No move keeps the decision inside its support.
    NoLegalMove { inst: usize },
}

impl fmt::Display for NotApplicable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotApplicable::NoSites => write!(f, "no decision sites"),
            NotApplicable::SupportExhausted { inst } => {
                write!(f, "support of instruction {inst} is empty after exclusion")
            }
            NotApplicable::RejectionLimit { inst, attempts } => write!(
                f,
                "instruction {inst}: no new value after {attempts} rejection draws"
            ),
            NotApplicable::NoLegalMove { inst } => {
                write!(f, "instruction {inst}: no legal move")
            }
        }
    }
}

/// Successful mutation: the child trace and the single decision that changed.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub trace: Trace,
    pub site: usize,
    pub from: Decision,
    pub to: Decision,
}

#[derive(Debug, Clone)]
pub enum MutateOutcome {
    Mutated(Mutation),
    NotApplicable(NotApplicable),
}

impl MutateOutcome {
    pub fn is_applicable(&self) -> bool {
        matches!(self, MutateOutcome::Mutated(_))
    }

    pub fn into_trace(self) -> Option<Trace> {
        match self {
            MutateOutcome::Mutated(m) => Some(m.trace),
            MutateOutcome::NotApplicable(_) => None,
        }
    }
}

/// Proposes a new trace from a parent trace.
///
/// Implementations hold only configuration. `apply` never modifies `trace`,
/// draws all randomness from `rng`, and either returns a complete child, a
/// [`NotApplicable`] outcome, or a fatal [`MutateError`].
pub trait Mutator: Send + Sync + fmt::Debug {
    /// Stable registry name, e.g. `meta_schedule.MutateUnroll`.
    fn name(&self) -> &'static str;

    fn apply(&self, trace: &Trace, rng: &mut dyn RandomStream)
        -> Result<MutateOutcome, MutateError>;
}

pub type DynMutator = Arc<dyn Mutator>;
