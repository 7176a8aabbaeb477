//! Design space sampling: fresh traces for the initial population.

use anyhow::{Context, Result};
use metaforge_mutator::{pick, RandomError, RandomStream};
use metaforge_trace::{
    ann, prime_factorization, CandidateDistribution, Input, OutputRef, TileSpace, Trace,
    TraceBuilder,
};
use serde::{Deserialize, Serialize};

/// Schedule space of a dense `C[m, n] += A[m, k] * B[k, n]` kernel.
///
/// Sampling produces the usual multi-level tiling: `i` and `j` split into
/// four levels, `k` into two, the outer spatial loops fused and annotated
/// with a parallel extent, the innermost `j` vectorized, an unroll step
/// annotated on the block, and a write-cache block placed by a sampled
/// compute location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignSpace {
    pub m: i64,
    pub n: i64,
    pub k: i64,
    pub max_innermost_factor: i64,
    pub unroll_steps: CandidateDistribution,
    pub parallel_extents: CandidateDistribution,
    pub compute_locations: CandidateDistribution,
}

impl DesignSpace {
    pub fn matmul(m: i64, n: i64, k: i64) -> Result<Self> {
        Ok(Self {
            m,
            n,
            k,
            max_innermost_factor: 64,
            unroll_steps: CandidateDistribution::uniform(vec![0, 16, 64, 512])?,
            parallel_extents: CandidateDistribution::uniform(vec![1, 2, 4, 8, 16, 32])?,
            compute_locations: CandidateDistribution::uniform(vec![-1, 0, 1, 2, 3])?,
        })
    }

    pub fn sample(&self, rng: &mut dyn RandomStream) -> Result<Trace> {
        let mut b = TraceBuilder::new();
        let block = b.get_block("C")?;
        let loops = b.get_loops(block, &[self.m, self.n, self.k])?;

        let i = self.tile(&mut b, rng, loops[0], self.m, 4)?;
        let j = self.tile(&mut b, rng, loops[1], self.n, 4)?;
        let k = self.tile(&mut b, rng, loops[2], self.k, 2)?;
        b.reorder(&[i[0], j[0], i[1], j[1], k[0], i[2], j[2], k[1], i[3], j[3]])?;

        let outer = b.fuse(&[i[0], j[0]])?;
        let extent = self.categorical(&mut b, rng, &self.parallel_extents)?;
        b.annotate(outer, ann::PARALLEL, Input::Output(extent))?;
        b.vectorize(j[3])?;

        let step = self.categorical(&mut b, rng, &self.unroll_steps)?;
        b.annotate(block, ann::UNROLL_EXPLICIT, Input::Output(step))?;

        let cache = b.get_block("C_local")?;
        let location = draw(rng, &self.compute_locations).context("sampling compute location")?;
        let loc = b.sample_compute_location(cache, self.compute_locations.clone(), location)?;
        b.compute_at(cache, block, loc)?;

        Ok(b.build())
    }

    fn categorical(
        &self,
        b: &mut TraceBuilder,
        rng: &mut dyn RandomStream,
        dist: &CandidateDistribution,
    ) -> Result<OutputRef> {
        let value = draw(rng, dist).context("sampling categorical decision")?;
        Ok(b.sample_categorical(dist.clone(), value)?)
    }

    fn tile(
        &self,
        b: &mut TraceBuilder,
        rng: &mut dyn RandomStream,
        loop_ref: OutputRef,
        extent: i64,
        n: usize,
    ) -> Result<Vec<OutputRef>> {
        let space = TileSpace::new(extent, n, self.max_innermost_factor)?;
        let tile = sample_perfect_tile(&space, rng)?;
        let factors = b.sample_perfect_tile(loop_ref, space, tile)?;
        Ok(b.split(loop_ref, &factors)?)
    }
}

fn draw(rng: &mut dyn RandomStream, dist: &CandidateDistribution) -> Result<i64, RandomError> {
    let i = rng.weighted_choice(dist.weights())?;
    pick(dist.values(), i).copied()
}

/// Random perfect tiling of `space.extent` into `space.n` factors.
///
/// Each prime factor of the extent lands on a uniformly chosen position;
/// primes that would push the innermost factor past its cap go to the
/// outermost position instead.
pub fn sample_perfect_tile(space: &TileSpace, rng: &mut dyn RandomStream) -> Result<Vec<i64>> {
    let mut tile = vec![1i64; space.n];
    let innermost = space.n - 1;
    for prime in prime_factorization(space.extent) {
        let mut pos = rng
            .next_in_range(space.n)
            .and_then(|i| pick(&tile, i).map(|_| i))
            .context("sampling tile position")?;
        if pos == innermost && tile[innermost] * prime > space.max_innermost_factor {
            pos = 0;
        }
        tile[pos] *= prime;
    }
    Ok(tile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metaforge_mutator::SeededStream;
    use metaforge_trace::{find_decision_sites, replay, SiteKind};

    #[test]
    fn test_sampled_tiles_are_perfect() {
        let space = TileSpace::new(1024, 4, 16).unwrap();
        let mut rng = SeededStream::new(4);
        for _ in 0..100 {
            let tile = sample_perfect_tile(&space, &mut rng).unwrap();
            assert!(space.contains(&tile), "{tile:?}");
        }
    }

    #[test]
    fn test_sampling_handles_extents_near_i64_max() {
        let space = TileSpace::new((1 << 61) * 3, 3, 64).unwrap();
        let mut rng = SeededStream::new(12);
        let tile = sample_perfect_tile(&space, &mut rng).unwrap();
        assert!(space.contains(&tile), "{tile:?}");
    }

    #[test]
    fn test_sampled_trace_replays() {
        let space = DesignSpace::matmul(128, 256, 64).unwrap();
        let mut rng = SeededStream::new(8);
        let trace = space.sample(&mut rng).unwrap();
        let schedule = replay(&trace).unwrap();

        assert_eq!(schedule.split_factors().len(), 3);
        assert_eq!(schedule.annotations(ann::UNROLL_EXPLICIT).len(), 1);
        assert_eq!(schedule.annotations(ann::PARALLEL).len(), 1);
        assert_eq!(find_decision_sites(&trace, SiteKind::AutoUnroll).len(), 1);
        assert_eq!(find_decision_sites(&trace, SiteKind::TileSize).len(), 3);
        assert_eq!(find_decision_sites(&trace, SiteKind::ComputeLocation).len(), 1);
    }

    #[test]
    fn test_sampling_is_seed_deterministic() {
        let space = DesignSpace::matmul(64, 64, 64).unwrap();
        let a = space.sample(&mut SeededStream::new(1)).unwrap();
        let b = space.sample(&mut SeededStream::new(1)).unwrap();
        assert_eq!(a, b);
    }
}
