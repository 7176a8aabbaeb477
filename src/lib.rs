//! MetaForge: mutation-driven search over program-transformation schedules.
//!
//! Re-exports the workspace crates under one roof:
//!
//! - [`trace`]: immutable schedule traces, decision sites and replay
//! - [`mutator`]: the mutator contract, builtin mutators and their registry
//! - [`search`]: the evolutionary search driver
//! - [`tuner`]: tuning sessions and the command-line front end

pub use metaforge_mutator as mutator;
pub use metaforge_search as search;
pub use metaforge_trace as trace;
pub use metaforge_tuner as tuner;
