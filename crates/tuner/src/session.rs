//! Tuning session orchestration.

use anyhow::{Context, Result};
use metaforge_mutator::{MutateOutcome, Mutator, MutatorRegistry, SeededStream};
use metaforge_search::{DesignSpace, SearchConfig, SearchDriver, SearchReport};
use metaforge_trace::Decision;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub config: Option<PathBuf>,
    pub seed: Option<u64>,
    pub generations: Option<usize>,
    pub workers: Option<usize>,
    pub report: Option<PathBuf>,
    /// Matmul problem shape `(m, n, k)` defining the design space.
    pub problem: (i64, i64, i64),
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            config: None,
            seed: None,
            generations: None,
            workers: None,
            report: None,
            problem: (128, 128, 128),
        }
    }
}

impl SessionOptions {
    /// Load the configured file (or defaults) and apply command-line overrides.
    pub fn to_search_config(&self) -> Result<SearchConfig> {
        let mut config = match &self.config {
            Some(path) => SearchConfig::load(path)?,
            None => SearchConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(generations) = self.generations {
            config.generations = generations;
        }
        if let Some(workers) = self.workers {
            config.num_workers = workers;
        }
        config.validate()?;
        Ok(config)
    }
}

pub struct TuneSession {
    driver: SearchDriver,
    space: DesignSpace,
    report_path: Option<PathBuf>,
}

impl TuneSession {
    pub fn new(options: SessionOptions) -> Result<Self> {
        let config = options.to_search_config()?;
        let (m, n, k) = options.problem;
        let space = DesignSpace::matmul(m, n, k)
            .with_context(|| format!("building design space for m={m} n={n} k={k}"))?;
        let driver = SearchDriver::new(config, MutatorRegistry::global())?;
        Ok(Self {
            driver,
            space,
            report_path: options.report,
        })
    }

    pub fn config(&self) -> &SearchConfig {
        self.driver.config()
    }

    pub fn space(&self) -> &DesignSpace {
        &self.space
    }

    /// Run the search and write the report if a path was configured.
    pub fn search(&self) -> Result<SearchReport> {
        let report = self.driver.run(&self.space)?;
        info!(
            seed = report.seed,
            generations = report.generations_run,
            trials = report.total_trials(),
            best = report.best_score,
            "search finished"
        );
        if let Some(path) = &self.report_path {
            report
                .save(path)
                .with_context(|| format!("writing report {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        Ok(report)
    }
}

/// Sample one trace from `space` and apply the mutator named `name` to it.
///
/// Returns a JSON summary of the changed decision, or of why the mutator did
/// not apply.
pub fn mutate_once(name: &str, seed: u64, space: &DesignSpace) -> Result<serde_json::Value> {
    let mutator = MutatorRegistry::global().create(name, &serde_json::Value::Null)?;
    let mut rng = SeededStream::new(seed);
    let parent = space.sample(&mut rng)?;
    let outcome = mutator.apply(&parent, &mut rng)?;

    let summary = match outcome {
        MutateOutcome::Mutated(mutation) => json!({
            "mutator": name,
            "seed": seed,
            "site": mutation.site,
            "kind": parent.get(mutation.site).map(|inst| inst.kind().to_string()),
            "from": decision_json(&mutation.from),
            "to": decision_json(&mutation.to),
            "fingerprint": format!("{:016x}", mutation.trace.fingerprint()),
        }),
        MutateOutcome::NotApplicable(reason) => json!({
            "mutator": name,
            "seed": seed,
            "not_applicable": reason.to_string(),
        }),
    };
    Ok(summary)
}

fn decision_json(decision: &Decision) -> serde_json::Value {
    match decision {
        Decision::Value(v) => json!(v),
        Decision::Tile(t) => json!(t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metaforge_mutator::MutateUnroll;

    #[test]
    fn test_overrides_apply() {
        let options = SessionOptions {
            seed: Some(9),
            generations: Some(1),
            workers: Some(3),
            ..SessionOptions::default()
        };
        let config = options.to_search_config().unwrap();
        assert_eq!(config.seed, 9);
        assert_eq!(config.generations, 1);
        assert_eq!(config.num_workers, 3);
    }

    #[test]
    fn test_search_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("search.json");
        SearchConfig::smoke().save(&config_path).unwrap();
        let report_path = dir.path().join("report.json");

        let session = TuneSession::new(SessionOptions {
            config: Some(config_path),
            report: Some(report_path.clone()),
            problem: (64, 64, 32),
            ..SessionOptions::default()
        })
        .unwrap();
        let report = session.search().unwrap();
        assert_eq!(SearchReport::load(&report_path).unwrap(), report);
    }

    #[test]
    fn test_mutate_once_changes_unroll() {
        let space = DesignSpace::matmul(64, 64, 64).unwrap();
        let summary = mutate_once(MutateUnroll::NAME, 3, &space).unwrap();
        assert_eq!(summary["kind"], "SampleCategorical");
        assert_ne!(summary["from"], summary["to"]);
        assert!(mutate_once("meta_schedule.MutateNothing", 3, &space).is_err());
    }
}
