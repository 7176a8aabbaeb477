//! Mutator that mutates the parallel extent.

use crate::error::MutateError;
use crate::mutator::{MutateOutcome, Mutator};
use crate::random::RandomStream;
use crate::resample::{mutate_categorical, ResamplePolicy};
use metaforge_trace::{SiteKind, Trace};

/// Redraws the extent sampled for one `meta_schedule.parallel` annotation.
#[derive(Debug, Clone, Default)]
pub struct MutateParallel {
    policy: ResamplePolicy,
}

impl MutateParallel {
    pub const NAME: &'static str = "meta_schedule.MutateParallel";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ResamplePolicy) -> Self {
        Self { policy }
    }
}

impl Mutator for MutateParallel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(
        &self,
        trace: &Trace,
        rng: &mut dyn RandomStream,
    ) -> Result<MutateOutcome, MutateError> {
        mutate_categorical(Self::NAME, SiteKind::Parallel, self.policy, trace, rng)
    }
}
