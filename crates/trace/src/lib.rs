//! Schedule traces for MetaForge.
//!
//! A [`Trace`] records the scheduling primitives applied to a program, in
//! order, together with the decision each sampling primitive took. Traces are
//! immutable: editing a decision yields a new trace that shares every other
//! instruction with its parent.
//!
//! # Key Components
//!
//! - [`distribution::CandidateDistribution`]: weighted support a decision is drawn from
//! - [`instruction::Instruction`]: one primitive application, optionally sampled
//! - [`trace::Trace`] / [`trace::TraceBuilder`]: the copy-on-write record
//! - [`sites::find_decision_sites`]: the per-trace decision store
//! - [`replay::replay`]: deterministic interpretation into a [`replay::Schedule`]

pub mod distribution;
pub mod error;
pub mod factor;
pub mod instruction;
pub mod replay;
pub mod sites;
pub mod trace;

pub use distribution::CandidateDistribution;
pub use error::TraceError;
pub use factor::{checked_product, prime_factorization, prime_factors};
pub use instruction::{
    ann, AttrValue, Decision, Input, Instruction, InstructionKind, OutputRef, Support, TileSpace,
};
pub use replay::{replay, Schedule, Step, Value};
pub use sites::{find_decision_sites, DecisionSite, SiteKind};
pub use trace::{Trace, TraceBuilder};
