//! Search run reports.

use metaforge_trace::Trace;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-mutator counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutatorStats {
    pub name: String,
    /// Times the mutator was chosen and applied to a parent.
    pub proposed: usize,
    /// Applications that produced a child.
    pub applied: usize,
    pub not_applicable: usize,
    /// Children rejected by the validator.
    pub invalid: usize,
    /// Configuration or random-source failures.
    pub fatal: usize,
    /// Children that entered the population.
    pub accepted: usize,
}

impl MutatorStats {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn merge(&mut self, other: &MutatorStats) {
        self.proposed += other.proposed;
        self.applied += other.applied;
        self.not_applicable += other.not_applicable;
        self.invalid += other.invalid;
        self.fatal += other.fatal;
        self.accepted += other.accepted;
    }
}

/// What happened in one generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub generation: usize,
    pub trials: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub invalid: usize,
    /// Trials where every proposal attempt was not applicable.
    pub exhausted: usize,
    pub config_errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_score: Option<f64>,
    pub population: usize,
}

/// Complete report for a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub seed: u64,
    pub generations_run: usize,

    /// Best score in the final population.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_score: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_trace: Option<Trace>,

    /// Design-space samples that failed validation.
    pub initial_invalid: usize,

    pub mutators: Vec<MutatorStats>,

    /// Messages of skipped configuration errors, in occurrence order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_errors: Vec<String>,

    pub history: Vec<GenerationSummary>,
}

impl SearchReport {
    pub fn new(seed: u64, mutator_names: &[&str]) -> Self {
        Self {
            seed,
            generations_run: 0,
            best_score: None,
            best_trace: None,
            initial_invalid: 0,
            mutators: mutator_names.iter().map(|n| MutatorStats::new(n)).collect(),
            config_errors: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn total_trials(&self) -> usize {
        self.history.iter().map(|g| g.trials).sum()
    }

    pub fn total_accepted(&self) -> usize {
        self.history.iter().map(|g| g.accepted).sum()
    }

    /// Save report to JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load report from JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let report = serde_json::from_str(&json)?;
        Ok(report)
    }
}
