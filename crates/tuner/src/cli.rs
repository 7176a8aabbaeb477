//! CLI wiring for the metaforge tool.

use crate::session::{mutate_once, SessionOptions, TuneSession};
use anyhow::Result;
use clap::{Parser, Subcommand};
use metaforge_mutator::MutatorRegistry;
use metaforge_search::DesignSpace;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "metaforge", about = "Mutation-driven schedule search")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the registered mutator names.
    ListMutators,
    /// Sample one matmul trace and apply a single mutator to it.
    Mutate {
        #[arg(long, default_value = "meta_schedule.MutateUnroll")]
        mutator: String,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 128)]
        m: i64,
        #[arg(long, default_value_t = 128)]
        n: i64,
        #[arg(long, default_value_t = 128)]
        k: i64,
    },
    /// Run the evolutionary search on a matmul design space.
    Search {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        generations: Option<usize>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = 128)]
        m: i64,
        #[arg(long, default_value_t = 128)]
        n: i64,
        #[arg(long, default_value_t = 128)]
        k: i64,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    match cli.command {
        Command::ListMutators => {
            for name in MutatorRegistry::global().names() {
                println!("{name}");
            }
        }
        Command::Mutate {
            mutator,
            seed,
            m,
            n,
            k,
        } => {
            let space = DesignSpace::matmul(m, n, k)?;
            let summary = mutate_once(&mutator, seed, &space)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Search {
            config,
            seed,
            generations,
            workers,
            output,
            m,
            n,
            k,
        } => {
            let options = SessionOptions {
                config,
                seed,
                generations,
                workers,
                report: output,
                problem: (m, n, k),
            };
            let session = TuneSession::new(options)?;
            info!(
                seed = session.config().seed,
                workers = session.config().num_workers,
                generations = session.config().generations,
                "starting search"
            );
            let report = session.search()?;

            println!(
                "seed={}, generations={}, trials={}, accepted={}",
                report.seed,
                report.generations_run,
                report.total_trials(),
                report.total_accepted()
            );
            if let Some(best) = report.best_score {
                println!("best_score={best:.4}");
            }
            for stats in &report.mutators {
                println!(
                    "- {}: proposed={} applied={} not_applicable={} invalid={} accepted={}",
                    stats.name,
                    stats.proposed,
                    stats.applied,
                    stats.not_applicable,
                    stats.invalid,
                    stats.accepted
                );
            }
        }
    }
    Ok(())
}
