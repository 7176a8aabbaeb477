//! Evolutionary schedule search for MetaForge.
//!
//! A population of sampled traces is improved generation by generation:
//! workers pick parents, the mutator pipeline proposes children, the
//! validator replays them and the cost model scores the legal ones.
//!
//! # Key Components
//!
//! - [`config::SearchConfig`]: seeds, worker count, population sizing, mutator pipeline
//! - [`design_space::DesignSpace`]: fresh traces for the initial population
//! - [`validator::Validator`]: legality check by replay
//! - [`cost_model::CostModel`]: scores replayed schedules
//! - [`population::Population`]: bounded, deduplicated, best-first
//! - [`driver::SearchDriver`]: proposal loop and generation merge
//! - [`report::SearchReport`]: per-run and per-mutator statistics

pub mod config;
pub mod cost_model;
pub mod design_space;
pub mod driver;
pub mod population;
pub mod report;
pub mod validator;

pub use config::SearchConfig;
pub use cost_model::{AnalyticCostModel, CostModel};
pub use design_space::{sample_perfect_tile, DesignSpace};
pub use driver::{Evaluation, Proposal, SearchDriver};
pub use population::{Candidate, Insertion, Population};
pub use report::{GenerationSummary, MutatorStats, SearchReport};
pub use validator::{MaxParallelValidator, ReplayValidator, Validator};
