//! Command-line entry point for MetaForge.

use anyhow::Result;
use clap::Parser;
use metaforge_tuner::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
