//! Trace mutators for MetaForge schedule search.
//!
//! Every mutator implements [`mutator::Mutator`]: given a parent trace and an
//! explicitly passed random stream it proposes a child trace, reports that it
//! does not apply, or fails with a fatal configuration/random error.
//!
//! # Key Components
//!
//! - [`random::RandomStream`]: per-worker randomness, never process-global
//! - [`resample::ResamplePolicy`]: how an excluded categorical value is redrawn
//! - [`unroll::MutateUnroll`], [`parallel::MutateParallel`],
//!   [`compute_location::MutateComputeLocation`], [`tile_size::MutateTileSize`]
//! - [`registry::MutatorRegistry`]: stable names to mutator factories

pub mod compute_location;
pub mod error;
pub mod mutator;
pub mod parallel;
pub mod random;
pub mod registry;
pub mod resample;
pub mod tile_size;
pub mod unroll;

pub use compute_location::MutateComputeLocation;
pub use error::{MutateError, RegistryError};
pub use mutator::{DynMutator, MutateOutcome, Mutation, Mutator, NotApplicable};
pub use parallel::MutateParallel;
pub use random::{pick, RandomError, RandomStream, RecordedStream, SeededStream};
pub use registry::{MutatorFactory, MutatorRegistry, MutatorSpec, WeightedMutator};
pub use resample::{ResampleKind, ResampleParams, ResamplePolicy};
pub use tile_size::MutateTileSize;
pub use unroll::MutateUnroll;
