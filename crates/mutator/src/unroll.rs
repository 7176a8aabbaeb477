//! Mutator that mutates the auto-unroll step.

use crate::error::MutateError;
use crate::mutator::{MutateOutcome, Mutator};
use crate::random::RandomStream;
use crate::resample::{mutate_categorical, ResamplePolicy};
use metaforge_trace::{SiteKind, Trace};

/// Redraws the max auto-unroll step of one unroll annotation.
///
/// Sites are `SampleCategorical` instructions whose value feeds a
/// `meta_schedule.unroll_explicit` or `meta_schedule.unroll_implicit`
/// annotation. One site is chosen uniformly and its value is redrawn from the
/// original candidates with the current value excluded.
#[derive(Debug, Clone, Default)]
pub struct MutateUnroll {
    policy: ResamplePolicy,
}

impl MutateUnroll {
    pub const NAME: &'static str = "meta_schedule.MutateUnroll";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ResamplePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ResamplePolicy {
        self.policy
    }
}

impl Mutator for MutateUnroll {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(
        &self,
        trace: &Trace,
        rng: &mut dyn RandomStream,
    ) -> Result<MutateOutcome, MutateError> {
        mutate_categorical(Self::NAME, SiteKind::AutoUnroll, self.policy, trace, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutator::NotApplicable;
    use crate::random::{RecordedStream, SeededStream};
    use metaforge_trace::{ann, CandidateDistribution, Decision, Input, TraceBuilder};

    fn trace_with_steps(steps: &[i64]) -> Trace {
        let mut b = TraceBuilder::new();
        let block = b.get_block("C").unwrap();
        let loops = b.get_loops(block, &[64, 64]).unwrap();
        b.parallel(loops[0]).unwrap();
        for step in steps {
            let dist = CandidateDistribution::uniform(vec![0, 16, 64, 512]).unwrap();
            let value = b.sample_categorical(dist, *step).unwrap();
            b.annotate(block, ann::UNROLL_EXPLICIT, Input::Output(value))
                .unwrap();
        }
        b.build()
    }

    #[test]
    fn test_no_sites_is_not_applicable() {
        let trace = trace_with_steps(&[]);
        let before = trace.clone();
        // An empty recorded stream proves no entropy was consumed.
        let mut rng = RecordedStream::new(vec![]);
        let outcome = MutateUnroll::new().apply(&trace, &mut rng).unwrap();
        assert!(matches!(
            outcome,
            MutateOutcome::NotApplicable(NotApplicable::NoSites)
        ));
        assert!(trace.ptr_eq(&before));
        assert_eq!(trace, before);
    }

    #[test]
    fn test_changes_exactly_one_decision() {
        let parent = trace_with_steps(&[16, 64, 512]);
        let mut rng = SeededStream::new(11);
        let outcome = MutateUnroll::new().apply(&parent, &mut rng).unwrap();
        let MutateOutcome::Mutated(mutation) = outcome else {
            panic!("expected a mutation");
        };

        assert_ne!(mutation.from, mutation.to);
        assert_eq!(parent.decision(mutation.site), Some(&mutation.from));
        assert_eq!(mutation.trace.decision(mutation.site), Some(&mutation.to));
        for i in 0..parent.len() {
            if i != mutation.site {
                assert!(parent.shares_instruction(&mutation.trace, i));
            }
        }
    }

    #[test]
    fn test_site_picked_by_index() {
        let parent = trace_with_steps(&[16, 64, 512]);
        // Sites sit at 3, 5, 7; 0.5 selects the middle one, 0.0 the first
        // remaining candidate (value 0).
        let mut rng = RecordedStream::new(vec![0.5, 0.0]);
        let outcome = MutateUnroll::new().apply(&parent, &mut rng).unwrap();
        let MutateOutcome::Mutated(mutation) = outcome else {
            panic!("expected a mutation");
        };
        assert_eq!(mutation.site, 5);
        assert_eq!(mutation.from, Decision::Value(64));
        assert_eq!(mutation.to, Decision::Value(0));
    }

    #[test]
    fn test_exhausted_stream_is_fatal() {
        let parent = trace_with_steps(&[16]);
        let mut rng = RecordedStream::new(vec![0.0]);
        let err = MutateUnroll::new().apply(&parent, &mut rng).unwrap_err();
        assert!(matches!(err, MutateError::Random { .. }));
        assert!(!err.is_configuration());
    }
}
