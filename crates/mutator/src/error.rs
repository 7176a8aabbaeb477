//! Fatal mutator errors.
//!
//! A mutation that simply has nowhere to go is not an error; see
//! [`crate::mutator::NotApplicable`].

use crate::random::RandomError;
use metaforge_trace::TraceError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MutateError {
    /// The trace violates an invariant that should have been enforced when it
    /// was built, e.g. a decision site with an empty support.
    #[error("{mutator}: configuration error at instruction {inst}: {source}")]
    Configuration {
        mutator: &'static str,
        inst: usize,
        #[source]
        source: TraceError,
    },

    /// The random stream was misused or ran dry.
    #[error("{mutator}: random source failure: {source}")]
    Random {
        mutator: &'static str,
        #[source]
        source: RandomError,
    },
}

impl MutateError {
    pub fn configuration(mutator: &'static str, inst: usize, source: TraceError) -> Self {
        MutateError::Configuration {
            mutator,
            inst,
            source,
        }
    }

    pub fn random(mutator: &'static str, source: RandomError) -> Self {
        MutateError::Random { mutator, source }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, MutateError::Configuration { .. })
    }

    pub fn mutator(&self) -> &'static str {
        match self {
            MutateError::Configuration { mutator, .. } | MutateError::Random { mutator, .. } => {
                mutator
            }
        }
    }
}

/// Problems building mutators from names and parameters.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown mutator `{name}` (registered: {known})")]
    UnknownMutator { name: String, known: String },

    #[error("mutator `{name}` is already registered")]
    Duplicate { name: String },

    #[error("invalid parameters for `{name}`: {reason}")]
    InvalidParams { name: String, reason: String },

    #[error(
        "mutator `{name}` has selection probability {probability}; it must be positive and finite"
    )]
    InvalidProbability { name: String, probability: f64 },

    #[error("mutator selection probabilities sum to {total}")]
    ProbabilityTotal { total: f64 },

    #[error("mutator pipeline is empty")]
    EmptyPipeline,
}
