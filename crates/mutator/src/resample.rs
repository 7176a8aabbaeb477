//! Redrawing a categorical decision with its current value excluded.

use crate::error::MutateError;
use crate::mutator::{MutateOutcome, Mutation, NotApplicable};
use crate::random::{pick, RandomError, RandomStream};
use metaforge_trace::{
    find_decision_sites, CandidateDistribution, Decision, SiteKind, Support, Trace, TraceError,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

const DEFAULT_MAX_ATTEMPTS: usize = 32;

/// How a replacement value is drawn once the current one is excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplePolicy {
    /// Zero the current value's weight, renormalize, draw once.
    #[default]
    Renormalized,
    /// Draw from the full distribution until the draw differs from the
    /// current value, giving up after `max_attempts` draws.
    Rejection { max_attempts: usize },
}

/// Result of one resampling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redraw {
    Value(i64),
    SupportExhausted,
    GaveUp { attempts: usize },
}

impl ResamplePolicy {
    pub fn redraw(
        &self,
        dist: &CandidateDistribution,
        current: i64,
        rng: &mut dyn RandomStream,
    ) -> Result<Redraw, RandomError> {
        if dist.values().iter().all(|v| *v == current) {
            return Ok(Redraw::SupportExhausted);
        }
        match *self {
            ResamplePolicy::Renormalized => {
                let weights: Vec<f64> = dist
                    .values()
                    .iter()
                    .zip(dist.weights())
                    .map(|(v, w)| if *v == current { 0.0 } else { *w })
                    .collect();
                let i = rng.weighted_choice(&weights)?;
                Ok(Redraw::Value(*pick(dist.values(), i)?))
            }
            ResamplePolicy::Rejection { max_attempts } => {
                for _ in 0..max_attempts {
                    let i = rng.weighted_choice(dist.weights())?;
                    let value = *pick(dist.values(), i)?;
                    if value != current {
                        return Ok(Redraw::Value(value));
                    }
                }
                Ok(Redraw::GaveUp {
                    attempts: max_attempts,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleKind {
    #[default]
    Renormalized,
    Rejection,
}

/// Registry parameters accepted by the categorical mutators.
///
/// `{"resample": "rejection", "max_attempts": 16}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResampleParams {
    pub resample: ResampleKind,
    pub max_attempts: usize,
}

impl Default for ResampleParams {
    fn default() -> Self {
        Self {
            resample: ResampleKind::Renormalized,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ResampleParams {
    pub fn policy(&self) -> Result<ResamplePolicy, String> {
        match self.resample {
            ResampleKind::Renormalized => Ok(ResamplePolicy::Renormalized),
            ResampleKind::Rejection if self.max_attempts == 0 => {
                Err("max_attempts must be >= 1 for rejection sampling".into())
            }
            ResampleKind::Rejection => Ok(ResamplePolicy::Rejection {
                max_attempts: self.max_attempts,
            }),
        }
    }
}

/// Shared body of the categorical mutators.
///
/// Picks one site of `kind` uniformly, redraws its value under `policy` and
/// rebinds it in a copy of `trace`.
pub(crate) fn mutate_categorical(
    mutator: &'static str,
    kind: SiteKind,
    policy: ResamplePolicy,
    trace: &Trace,
    rng: &mut dyn RandomStream,
) -> Result<MutateOutcome, MutateError> {
    let sites = find_decision_sites(trace, kind);
    if sites.is_empty() {
        return Ok(MutateOutcome::NotApplicable(NotApplicable::NoSites));
    }

    let site = rng
        .next_in_range(sites.len())
        .and_then(|i| pick(&sites, i))
        .map_err(|e| MutateError::random(mutator, e))?;
    let inst = site.index;
    let config = |source: TraceError| MutateError::configuration(mutator, inst, source);

    let dist = match site.instruction.support() {
        Some(Support::Categorical(dist)) => dist,
        _ => {
            return Err(config(TraceError::InvalidDistribution {
                reason: "decision site has no categorical support".into(),
            }))
        }
    };
    if dist.is_empty() {
        return Err(config(TraceError::InvalidDistribution {
            reason: "empty support".into(),
        }));
    }
    let current = match site.decision {
        Decision::Value(v) if dist.contains(*v) => *v,
        other => {
            return Err(config(TraceError::DecisionOutOfSupport {
                inst,
                kind: site.instruction.kind(),
                decision: other.to_string(),
            }))
        }
    };

    let value = match policy
        .redraw(dist, current, rng)
        .map_err(|e| MutateError::random(mutator, e))?
    {
        Redraw::Value(v) => v,
        Redraw::SupportExhausted => {
            return Ok(MutateOutcome::NotApplicable(
                NotApplicable::SupportExhausted { inst },
            ))
        }
        Redraw::GaveUp { attempts } => {
            return Ok(MutateOutcome::NotApplicable(
                NotApplicable::RejectionLimit { inst, attempts },
            ))
        }
    };

    let child = trace
        .with_decision(inst, Decision::Value(value))
        .map_err(config)?;
    trace!(mutator, inst, from = current, to = value, "resampled decision");
    Ok(MutateOutcome::Mutated(Mutation {
        trace: child,
        site: inst,
        from: Decision::Value(current),
        to: Decision::Value(value),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{RecordedStream, SeededStream};
    use approx::assert_relative_eq;
    use metaforge_trace::{ann, Input, TraceBuilder};

    #[test]
    fn test_renormalized_never_returns_current() {
        let dist = CandidateDistribution::uniform(vec![0, 16, 64, 512]).unwrap();
        let mut rng = SeededStream::new(3);
        for _ in 0..500 {
            match ResamplePolicy::Renormalized.redraw(&dist, 64, &mut rng).unwrap() {
                Redraw::Value(v) => assert_ne!(v, 64),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_policies_agree_on_distribution() {
        let dist = CandidateDistribution::new(vec![1, 2, 4, 8], vec![4.0, 3.0, 2.0, 1.0]).unwrap();
        let trials = 8_000;
        for policy in [
            ResamplePolicy::Renormalized,
            ResamplePolicy::Rejection { max_attempts: 64 },
        ] {
            let mut rng = SeededStream::new(31);
            let mut hits = 0usize;
            for _ in 0..trials {
                if policy.redraw(&dist, 1, &mut rng).unwrap() == Redraw::Value(2) {
                    hits += 1;
                }
            }
            let observed = hits as f64 / trials as f64;
            assert_relative_eq!(observed, 0.5, max_relative = 0.06);
        }
    }

    #[test]
    fn test_single_value_support_is_exhausted() {
        let dist = CandidateDistribution::uniform(vec![16]).unwrap();
        let mut rng = RecordedStream::new(vec![]);
        for policy in [
            ResamplePolicy::Renormalized,
            ResamplePolicy::Rejection { max_attempts: 4 },
        ] {
            assert_eq!(
                policy.redraw(&dist, 16, &mut rng).unwrap(),
                Redraw::SupportExhausted
            );
        }
    }

    #[test]
    fn test_rejection_gives_up() {
        let dist = CandidateDistribution::new(vec![0, 16], vec![1.0, 1.0]).unwrap();
        // Every draw lands on value 0, the current one.
        let mut rng = RecordedStream::new(vec![0.1, 0.2, 0.3]);
        let policy = ResamplePolicy::Rejection { max_attempts: 3 };
        assert_eq!(
            policy.redraw(&dist, 0, &mut rng).unwrap(),
            Redraw::GaveUp { attempts: 3 }
        );
    }

    /// Stream that answers every range query with one past its end.
    #[derive(Debug)]
    struct OverrunStream;

    impl RandomStream for OverrunStream {
        fn next_in_range(&mut self, n: usize) -> Result<usize, RandomError> {
            Ok(n)
        }

        fn next_f64(&mut self) -> Result<f64, RandomError> {
            Ok(0.0)
        }

        fn weighted_choice(&mut self, weights: &[f64]) -> Result<usize, RandomError> {
            Ok(weights.len())
        }
    }

    #[test]
    fn test_out_of_range_draw_is_an_error() {
        let dist = CandidateDistribution::uniform(vec![0, 16, 64]).unwrap();
        for policy in [
            ResamplePolicy::Renormalized,
            ResamplePolicy::Rejection { max_attempts: 4 },
        ] {
            assert_eq!(
                policy.redraw(&dist, 16, &mut OverrunStream),
                Err(RandomError::OutOfRange { index: 3, n: 3 })
            );
        }

        let mut b = TraceBuilder::new();
        let block = b.get_block("C").unwrap();
        let step = b.sample_categorical(dist, 16).unwrap();
        b.annotate(block, ann::UNROLL_EXPLICIT, Input::Output(step))
            .unwrap();
        let err = mutate_categorical(
            "test",
            SiteKind::AutoUnroll,
            ResamplePolicy::Renormalized,
            &b.build(),
            &mut OverrunStream,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MutateError::Random {
                source: RandomError::OutOfRange { index: 1, n: 1 },
                ..
            }
        ));
    }

    #[test]
    fn test_params_parse() {
        let params: ResampleParams =
            serde_json::from_value(serde_json::json!({"resample": "rejection", "max_attempts": 8}))
                .unwrap();
        assert_eq!(
            params.policy().unwrap(),
            ResamplePolicy::Rejection { max_attempts: 8 }
        );

        let defaults: ResampleParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(defaults.policy().unwrap(), ResamplePolicy::Renormalized);

        let zero = ResampleParams {
            resample: ResampleKind::Rejection,
            max_attempts: 0,
        };
        assert!(zero.policy().is_err());
    }
}
