//! MetaForge tuning facade.

#[cfg(feature = "cli")]
pub mod cli;
pub mod session;

#[cfg(feature = "cli")]
pub use cli::*;
pub use session::*;
