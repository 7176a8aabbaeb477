//! Mutator that moves a block to a different compute location.

use crate::error::MutateError;
use crate::mutator::{MutateOutcome, Mutator};
use crate::random::RandomStream;
use crate::resample::{mutate_categorical, ResamplePolicy};
use metaforge_trace::{SiteKind, Trace};

/// Redraws one `SampleComputeLocation` decision among its candidate loops.
#[derive(Debug, Clone, Default)]
pub struct MutateComputeLocation {
    policy: ResamplePolicy,
}

impl MutateComputeLocation {
    pub const NAME: &'static str = "meta_schedule.MutateComputeLocation";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ResamplePolicy) -> Self {
        Self { policy }
    }
}

impl Mutator for MutateComputeLocation {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(
        &self,
        trace: &Trace,
        rng: &mut dyn RandomStream,
    ) -> Result<MutateOutcome, MutateError> {
        mutate_categorical(Self::NAME, SiteKind::ComputeLocation, self.policy, trace, rng)
    }
}
