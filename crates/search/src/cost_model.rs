//! Cost models score replayed schedules. Higher is better.

use metaforge_trace::{ann, Schedule};
use serde::{Deserialize, Serialize};

/// Predicts how good a schedule is without running it.
pub trait CostModel: Send + Sync {
    fn name(&self) -> &str;

    /// Score in `(0, 1]`; higher is better.
    fn score(&self, schedule: &Schedule) -> f64;
}

/// Closed-form model that rewards schedules close to a target shape.
///
/// Each feature (unroll step, parallel extent, innermost tile, cache tile,
/// compute location) contributes a closeness term in `(0, 1]` measured in
/// log2 distance from its target; the score is their geometric mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticCostModel {
    pub target_unroll: i64,
    pub cores: i64,
    pub vector_lanes: i64,
    pub cache_tile: i64,
}

impl Default for AnalyticCostModel {
    fn default() -> Self {
        Self {
            target_unroll: 64,
            cores: 8,
            vector_lanes: 8,
            cache_tile: 64,
        }
    }
}

impl CostModel for AnalyticCostModel {
    fn name(&self) -> &str {
        "analytic"
    }

    fn score(&self, schedule: &Schedule) -> f64 {
        let mut terms = Vec::new();

        for step in schedule
            .annotations(ann::UNROLL_EXPLICIT)
            .into_iter()
            .chain(schedule.annotations(ann::UNROLL_IMPLICIT))
        {
            terms.push(closeness(step + 1, self.target_unroll + 1));
        }
        for extent in schedule.annotations(ann::PARALLEL) {
            terms.push(closeness(extent, self.cores));
        }
        for factors in schedule.split_factors() {
            if let Some(inner) = factors.last() {
                terms.push(closeness(*inner, self.vector_lanes));
            }
            if factors.len() >= 3 {
                let cache: i64 = factors[factors.len() - 2..].iter().product();
                terms.push(closeness(cache, self.cache_tile));
            }
        }
        for location in schedule.compute_locations() {
            // Root placement keeps the cache block out of the hot loops.
            terms.push(if location < 0 { 0.5 } else { closeness(location + 1, 3) });
        }

        if terms.is_empty() {
            return 1.0;
        }
        let log_sum: f64 = terms.iter().map(|t| t.ln()).sum();
        (log_sum / terms.len() as f64).exp()
    }
}

fn closeness(value: i64, target: i64) -> f64 {
    let v = (value.max(1) as f64).log2();
    let t = (target.max(1) as f64).log2();
    1.0 / (1.0 + (v - t).abs())
}
