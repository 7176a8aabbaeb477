//! Explicitly threaded random streams.
//!
//! Mutators never touch a process-wide generator. Each search worker owns a
//! stream derived from the run seed and its worker index, and passes it into
//! every `apply` call.

use thiserror::Error;

/// Misuse or exhaustion of a random stream. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RandomError {
    #[error("random source exhausted after {drawn} draws")]
    Exhausted { drawn: usize },

    #[error("cannot draw from an empty range")]
    EmptyRange,

    #[error("invalid weights: {reason}")]
    InvalidWeights { reason: String },

    #[error("stream returned index {index} for a range of {n}")]
    OutOfRange { index: usize, n: usize },
}

/// Element at an index drawn from a stream.
///
/// Streams are caller-supplied, so an index past the end is reported as
/// [`RandomError::OutOfRange`] rather than trusted.
pub fn pick<T>(items: &[T], index: usize) -> Result<&T, RandomError> {
    items.get(index).ok_or(RandomError::OutOfRange {
        index,
        n: items.len(),
    })
}

/// Source of randomness for mutators and the search driver.
pub trait RandomStream: Send {
    /// Uniform integer in `0..n`.
    fn next_in_range(&mut self, n: usize) -> Result<usize, RandomError>;

    /// Uniform float in `[0, 1)`.
    fn next_f64(&mut self) -> Result<f64, RandomError>;

    /// Index drawn with probability proportional to `weights[i]`.
    ///
    /// Zero weights are allowed and never chosen; at least one weight must be
    /// positive and all must be finite.
    fn weighted_choice(&mut self, weights: &[f64]) -> Result<usize, RandomError> {
        if weights.is_empty() {
            return Err(RandomError::EmptyRange);
        }
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(RandomError::InvalidWeights {
                reason: format!("weight {bad} is negative or not finite"),
            });
        }
        let total: f64 = weights.iter().sum();
        if !total.is_finite() {
            return Err(RandomError::InvalidWeights {
                reason: format!("weights sum to {total}"),
            });
        }
        if total <= 0.0 {
            return Err(RandomError::InvalidWeights {
                reason: "all weights are zero".into(),
            });
        }

        let target = self.next_f64()? * total;
        let mut acc = 0.0;
        let mut last_positive = 0;
        for (i, w) in weights.iter().enumerate() {
            if *w <= 0.0 {
                continue;
            }
            acc += w;
            last_positive = i;
            if target < acc {
                return Ok(i);
            }
        }
        // Rounding can leave `target` a hair above the accumulated total.
        Ok(last_positive)
    }
}

/// Deterministic stream backed by `fastrand`.
#[derive(Debug, Clone)]
pub struct SeededStream {
    seed: u64,
    rng: fastrand::Rng,
}

impl SeededStream {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// Stream for `worker` in a run seeded with `run_seed`.
    ///
    /// Streams for different workers are decorrelated and each depends only
    /// on the pair, so a run is reproducible regardless of thread timing.
    pub fn for_worker(run_seed: u64, worker: usize) -> Self {
        let seed = splitmix64(run_seed ^ splitmix64(worker as u64 + 1));
        Self::new(seed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RandomStream for SeededStream {
    fn next_in_range(&mut self, n: usize) -> Result<usize, RandomError> {
        if n == 0 {
            return Err(RandomError::EmptyRange);
        }
        Ok(self.rng.usize(..n))
    }

    fn next_f64(&mut self) -> Result<f64, RandomError> {
        Ok(self.rng.f64())
    }
}

/// Replays a fixed sequence of unit-interval draws.
///
/// Used to pin exact mutation paths; running past the end is
/// [`RandomError::Exhausted`].
#[derive(Debug, Clone)]
pub struct RecordedStream {
    draws: Vec<f64>,
    cursor: usize,
}

impl RecordedStream {
    /// Each draw must lie in `[0, 1)`; values outside are clamped.
    pub fn new(draws: Vec<f64>) -> Self {
        let draws = draws
            .into_iter()
            .map(|d| if d.is_finite() { d.clamp(0.0, 1.0 - f64::EPSILON) } else { 0.0 })
            .collect();
        Self { draws, cursor: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.draws.len() - self.cursor
    }

    fn take(&mut self) -> Result<f64, RandomError> {
        let draw = self
            .draws
            .get(self.cursor)
            .copied()
            .ok_or(RandomError::Exhausted { drawn: self.cursor })?;
        self.cursor += 1;
        Ok(draw)
    }
}

impl RandomStream for RecordedStream {
    fn next_in_range(&mut self, n: usize) -> Result<usize, RandomError> {
        if n == 0 {
            return Err(RandomError::EmptyRange);
        }
        let draw = self.take()?;
        Ok(((draw * n as f64) as usize).min(n - 1))
    }

    fn next_f64(&mut self) -> Result<f64, RandomError> {
        self.take()
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_draws() {
        let mut a = SeededStream::new(7);
        let mut b = SeededStream::new(7);
        for _ in 0..32 {
            assert_eq!(a.next_in_range(1000).unwrap(), b.next_in_range(1000).unwrap());
        }
    }

    #[test]
    fn test_worker_streams_differ() {
        let a = SeededStream::for_worker(42, 0);
        let b = SeededStream::for_worker(42, 1);
        assert_ne!(a.seed(), b.seed());
        assert_eq!(a.seed(), SeededStream::for_worker(42, 0).seed());
    }

    #[test]
    fn test_misuse_is_surfaced() {
        let mut rng = SeededStream::new(1);
        assert_eq!(rng.next_in_range(0), Err(RandomError::EmptyRange));
        assert!(matches!(
            rng.weighted_choice(&[0.0, 0.0]),
            Err(RandomError::InvalidWeights { .. })
        ));
        assert!(matches!(
            rng.weighted_choice(&[1.0, -1.0]),
            Err(RandomError::InvalidWeights { .. })
        ));
        assert!(matches!(
            rng.weighted_choice(&[f64::MAX, f64::MAX, 1.0]),
            Err(RandomError::InvalidWeights { .. })
        ));
    }

    #[test]
    fn test_pick_rejects_index_past_end() {
        let items = [10, 20];
        assert_eq!(pick(&items, 1), Ok(&20));
        assert_eq!(
            pick(&items, 2),
            Err(RandomError::OutOfRange { index: 2, n: 2 })
        );
    }

    #[test]
    fn test_weighted_choice_skips_zero_weights() {
        let mut rng = RecordedStream::new(vec![0.0, 0.5, 0.99]);
        let weights = [0.0, 1.0, 0.0, 1.0];
        assert_eq!(rng.weighted_choice(&weights).unwrap(), 1);
        assert_eq!(rng.weighted_choice(&weights).unwrap(), 3);
        assert_eq!(rng.weighted_choice(&weights).unwrap(), 3);
    }

    #[test]
    fn test_recorded_stream_exhausts() {
        let mut rng = RecordedStream::new(vec![0.25]);
        assert_eq!(rng.next_in_range(4).unwrap(), 1);
        assert_eq!(rng.remaining(), 0);
        assert_eq!(
            rng.next_in_range(4),
            Err(RandomError::Exhausted { drawn: 1 })
        );
    }
}
