//! Search configuration.

use anyhow::{bail, Context, Result};
use metaforge_mutator::MutatorSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Knobs for one evolutionary search run.
///
/// Loaded from JSON; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Run-level seed; worker `i` draws from a stream derived from `(seed, i)`.
    pub seed: u64,
    pub num_workers: usize,
    /// Maximum number of traces retained between generations.
    pub population_size: usize,
    /// Fresh traces sampled from the design space before the first generation.
    pub init_population: usize,
    pub generations: usize,
    /// Proposals each worker makes per generation.
    pub trials_per_generation: usize,
    /// Re-proposals allowed after a mutator reports it does not apply.
    pub max_propose_attempts: usize,
    /// Abort the whole run on the first configuration error instead of
    /// skipping the offending trial.
    pub abort_on_config_error: bool,
    pub mutators: Vec<MutatorSpec>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_workers: 4,
            population_size: 32,
            init_population: 16,
            generations: 10,
            trials_per_generation: 8,
            max_propose_attempts: 8,
            abort_on_config_error: false,
            mutators: MutatorSpec::defaults(),
        }
    }
}

impl SearchConfig {
    /// Small, fast configuration for smoke runs.
    pub fn smoke() -> Self {
        Self {
            num_workers: 2,
            population_size: 8,
            init_population: 4,
            generations: 3,
            trials_per_generation: 4,
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading search config {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("parsing search config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            bail!("num_workers must be > 0");
        }
        if self.population_size == 0 {
            bail!("population_size must be > 0");
        }
        if self.init_population == 0 {
            bail!("init_population must be > 0");
        }
        if self.trials_per_generation == 0 {
            bail!("trials_per_generation must be > 0");
        }
        if self.max_propose_attempts == 0 {
            bail!("max_propose_attempts must be > 0");
        }
        if self.mutators.is_empty() {
            bail!("at least one mutator must be configured");
        }
        Ok(())
    }
}
