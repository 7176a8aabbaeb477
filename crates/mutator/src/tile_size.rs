//! Mutator that mutates a perfect-tile decision.

use crate::error::MutateError;
use crate::mutator::{MutateOutcome, Mutation, Mutator, NotApplicable};
use crate::random::{pick, RandomStream};
use metaforge_trace::{
    find_decision_sites, prime_factors, Decision, SiteKind, Support, Trace, TraceError,
};
use tracing::trace;

/// Moves one prime factor between two positions of a sampled tiling.
///
/// The product of the tile is preserved and the innermost factor stays
/// within `max_innermost_factor`, so the child decision remains inside the
/// tile space. Moves are enumerated in a fixed order and one is picked
/// uniformly.
#[derive(Debug, Clone, Default)]
pub struct MutateTileSize;

/// Divide `tile[from]` by `factor`, multiply `tile[to]` by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FactorMove {
    from: usize,
    to: usize,
    factor: i64,
}

impl MutateTileSize {
    pub const NAME: &'static str = "meta_schedule.MutateTileSize";

    pub fn new() -> Self {
        Self
    }
}

impl Mutator for MutateTileSize {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(
        &self,
        trace: &Trace,
        rng: &mut dyn RandomStream,
    ) -> Result<MutateOutcome, MutateError> {
        let sites = find_decision_sites(trace, SiteKind::TileSize);
        if sites.is_empty() {
            return Ok(MutateOutcome::NotApplicable(NotApplicable::NoSites));
        }

        let site = rng
            .next_in_range(sites.len())
            .and_then(|i| pick(&sites, i))
            .map_err(|e| MutateError::random(Self::NAME, e))?;
        let inst = site.index;

        let space = match site.instruction.support() {
            Some(Support::PerfectTile(space)) => space,
            _ => {
                return Err(MutateError::configuration(
                    Self::NAME,
                    inst,
                    TraceError::InvalidTileSpace {
                        reason: "decision site has no tile space".into(),
                    },
                ))
            }
        };
        let tile = match site.decision {
            Decision::Tile(t) if space.contains(t) => t,
            other => {
                return Err(MutateError::configuration(
                    Self::NAME,
                    inst,
                    TraceError::DecisionOutOfSupport {
                        inst,
                        kind: site.instruction.kind(),
                        decision: other.to_string(),
                    },
                ))
            }
        };

        let moves = legal_moves(tile, space.max_innermost_factor);
        if moves.is_empty() {
            return Ok(MutateOutcome::NotApplicable(NotApplicable::NoLegalMove {
                inst,
            }));
        }
        let chosen = *rng
            .next_in_range(moves.len())
            .and_then(|i| pick(&moves, i))
            .map_err(|e| MutateError::random(Self::NAME, e))?;

        let mut next = tile.to_vec();
        next[chosen.from] /= chosen.factor;
        next[chosen.to] *= chosen.factor;
        trace!(
            mutator = Self::NAME,
            inst,
            from = ?tile,
            to = ?next,
            "moved tile factor"
        );

        let child = trace
            .with_decision(inst, Decision::Tile(next.clone()))
            .map_err(|e| MutateError::configuration(Self::NAME, inst, e))?;
        Ok(MutateOutcome::Mutated(Mutation {
            trace: child,
            site: inst,
            from: Decision::Tile(tile.to_vec()),
            to: Decision::Tile(next),
        }))
    }
}

fn legal_moves(tile: &[i64], max_innermost_factor: i64) -> Vec<FactorMove> {
    let innermost = tile.len() - 1;
    let mut moves = Vec::new();
    for (from, value) in tile.iter().enumerate() {
        for factor in prime_factors(*value) {
            for to in 0..tile.len() {
                if to == from {
                    continue;
                }
                if to == innermost && tile[to] * factor > max_innermost_factor {
                    continue;
                }
                moves.push(FactorMove { from, to, factor });
            }
        }
    }
    moves
}
