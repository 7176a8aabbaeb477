//! Evolutionary search driver.
//!
//! Each generation snapshots the population, lets every worker propose and
//! score children from that snapshot in parallel, then merges the workers'
//! results in worker order. Worker `w` owns the stream
//! `SeededStream::for_worker(seed, w)` for the whole run, so a run depends
//! only on its configuration and never on thread timing.

use crate::config::SearchConfig;
use crate::cost_model::{AnalyticCostModel, CostModel};
use crate::design_space::DesignSpace;
use crate::population::{Candidate, Insertion, Population};
use crate::report::{GenerationSummary, MutatorStats, SearchReport};
use crate::validator::{ReplayValidator, Validator};
use anyhow::{bail, Context, Result};
use metaforge_mutator::{
    pick, MutateError, MutateOutcome, Mutation, Mutator, MutatorRegistry, RandomStream,
    SeededStream, WeightedMutator,
};
use metaforge_trace::{Schedule, Trace, TraceError};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Name attached to random-source failures raised by the driver itself.
const DRIVER: &str = "search.driver";

/// A child produced by one of the pipeline's mutators.
#[derive(Debug, Clone)]
pub struct Proposal {
    /// Index of the mutator in the pipeline.
    pub mutator: usize,
    pub mutation: Mutation,
}

#[derive(Debug, Clone)]
pub enum Evaluation {
    Scored { score: f64, schedule: Schedule },
    Invalid(TraceError),
}

#[derive(Debug)]
struct Worker {
    index: usize,
    rng: SeededStream,
    stats: Vec<MutatorStats>,
}

#[derive(Debug, Default)]
struct WorkerOutput {
    children: Vec<(Candidate, usize)>,
    invalid: usize,
    exhausted: usize,
    config_errors: Vec<String>,
}

pub struct SearchDriver {
    config: SearchConfig,
    pipeline: Vec<WeightedMutator>,
    weights: Vec<f64>,
    validator: Arc<dyn Validator>,
    cost_model: Arc<dyn CostModel>,
}

impl SearchDriver {
    pub fn new(config: SearchConfig, registry: &MutatorRegistry) -> Result<Self> {
        config.validate()?;
        let pipeline = registry
            .build_pipeline(&config.mutators)
            .context("building mutator pipeline")?;
        let weights = pipeline.iter().map(|m| m.probability).collect();
        Ok(Self {
            config,
            pipeline,
            weights,
            validator: Arc::new(ReplayValidator),
            cost_model: Arc::new(AnalyticCostModel::default()),
        })
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_cost_model(mut self, cost_model: Arc<dyn CostModel>) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &[WeightedMutator] {
        &self.pipeline
    }

    /// Propose one child of `parent`.
    ///
    /// A mutator is chosen by its pipeline probability; when it does not
    /// apply, a fresh choice is made, up to `max_propose_attempts` times.
    /// `Ok(None)` means every attempt was not applicable. Errors from the
    /// chosen mutator are returned unchanged. `stats` holds one entry per
    /// pipeline mutator.
    pub fn propose(
        &self,
        parent: &Trace,
        rng: &mut dyn RandomStream,
        stats: &mut [MutatorStats],
    ) -> Result<Option<Proposal>, MutateError> {
        for attempt in 0..self.config.max_propose_attempts {
            let choice = rng
                .weighted_choice(&self.weights)
                .map_err(|e| MutateError::random(DRIVER, e))?;
            let mutator = &pick(&self.pipeline, choice)
                .map_err(|e| MutateError::random(DRIVER, e))?
                .mutator;
            stats[choice].proposed += 1;

            match mutator.apply(parent, rng) {
                Ok(MutateOutcome::Mutated(mutation)) => {
                    stats[choice].applied += 1;
                    return Ok(Some(Proposal {
                        mutator: choice,
                        mutation,
                    }));
                }
                Ok(MutateOutcome::NotApplicable(reason)) => {
                    stats[choice].not_applicable += 1;
                    debug!(mutator = mutator.name(), attempt, %reason, "mutator not applicable");
                }
                Err(e) => {
                    stats[choice].fatal += 1;
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    pub fn evaluate(&self, trace: &Trace) -> Evaluation {
        match self.validator.validate(trace) {
            Ok(schedule) => Evaluation::Scored {
                score: self.cost_model.score(&schedule),
                schedule,
            },
            Err(e) => Evaluation::Invalid(e),
        }
    }

    /// Sample and score the initial population from `space`.
    ///
    /// Uses the stream one past the last worker's, so seeding never perturbs
    /// the workers' streams.
    pub fn initial_population(
        &self,
        space: &DesignSpace,
        report: &mut SearchReport,
    ) -> Result<Population> {
        let mut rng = SeededStream::for_worker(self.config.seed, self.config.num_workers);
        let mut population = Population::new(self.config.population_size);
        for _ in 0..self.config.init_population {
            let trace = space.sample(&mut rng).context("sampling initial trace")?;
            match self.evaluate(&trace) {
                Evaluation::Scored { score, .. } => {
                    population.insert(Candidate::new(trace, score, 0));
                }
                Evaluation::Invalid(e) => {
                    report.initial_invalid += 1;
                    debug!(error = %e, "initial sample rejected");
                }
            }
        }
        if population.is_empty() {
            bail!(
                "none of the {} initial samples passed validation",
                self.config.init_population
            );
        }
        Ok(population)
    }

    pub fn run(&self, space: &DesignSpace) -> Result<SearchReport> {
        let names: Vec<&str> = self.pipeline.iter().map(|m| m.mutator.name()).collect();
        let mut report = SearchReport::new(self.config.seed, &names);
        let mut population = self.initial_population(space, &mut report)?;
        info!(
            seed = self.config.seed,
            workers = self.config.num_workers,
            population = population.len(),
            best = population.best().map(|c| c.score),
            "initial population ready"
        );

        let mut workers: Vec<Worker> = (0..self.config.num_workers)
            .map(|index| Worker {
                index,
                rng: SeededStream::for_worker(self.config.seed, index),
                stats: names.iter().map(|n| MutatorStats::new(n)).collect(),
            })
            .collect();

        let mut outcome: Result<()> = Ok(());
        for generation in 1..=self.config.generations {
            let parents = population.snapshot();
            let outputs: Vec<Result<WorkerOutput, MutateError>> = workers
                .par_iter_mut()
                .map(|worker| self.run_worker(worker, &parents, generation))
                .collect();

            let mut summary = GenerationSummary {
                generation,
                ..GenerationSummary::default()
            };
            for (index, output) in outputs.into_iter().enumerate() {
                let output = match output {
                    Ok(output) => output,
                    Err(e) => {
                        error!(worker = index, generation, error = %e, "aborting search");
                        outcome = Err(anyhow::Error::new(e).context(format!(
                            "worker {index} failed in generation {generation}"
                        )));
                        break;
                    }
                };
                summary.invalid += output.invalid;
                summary.exhausted += output.exhausted;
                summary.config_errors += output.config_errors.len();
                summary.trials += output.children.len()
                    + output.invalid
                    + output.exhausted
                    + output.config_errors.len();
                report.config_errors.extend(output.config_errors);

                for (candidate, mutator) in output.children {
                    match population.insert(candidate) {
                        Insertion::Added => {
                            summary.accepted += 1;
                            workers[index].stats[mutator].accepted += 1;
                        }
                        Insertion::Duplicate => summary.duplicates += 1,
                        Insertion::Rejected => {}
                    }
                }
            }
            if outcome.is_err() {
                break;
            }

            summary.best_score = population.best().map(|c| c.score);
            summary.population = population.len();
            info!(
                generation,
                trials = summary.trials,
                accepted = summary.accepted,
                invalid = summary.invalid,
                best = summary.best_score,
                "generation complete"
            );
            report.history.push(summary);
            report.generations_run = generation;
        }

        for worker in &workers {
            for (total, stats) in report.mutators.iter_mut().zip(&worker.stats) {
                total.merge(stats);
            }
        }
        outcome?;

        if let Some(best) = population.best() {
            report.best_score = Some(best.score);
            report.best_trace = Some(best.trace.clone());
        }
        Ok(report)
    }

    fn run_worker(
        &self,
        worker: &mut Worker,
        parents: &[Candidate],
        generation: usize,
    ) -> Result<WorkerOutput, MutateError> {
        let mut output = WorkerOutput::default();
        for _ in 0..self.config.trials_per_generation {
            let parent = &worker
                .rng
                .next_in_range(parents.len())
                .and_then(|i| pick(parents, i))
                .map_err(|e| MutateError::random(DRIVER, e))?
                .trace;

            let proposal = match self.propose(parent, &mut worker.rng, &mut worker.stats) {
                Ok(Some(proposal)) => proposal,
                Ok(None) => {
                    output.exhausted += 1;
                    continue;
                }
                Err(e) if e.is_configuration() && !self.config.abort_on_config_error => {
                    warn!(worker = worker.index, generation, error = %e, "skipping trial");
                    output.config_errors.push(e.to_string());
                    continue;
                }
                Err(e) => return Err(e),
            };

            let child = proposal.mutation.trace;
            match self.evaluate(&child) {
                Evaluation::Scored { score, .. } => {
                    output
                        .children
                        .push((Candidate::new(child, score, generation), proposal.mutator));
                }
                Evaluation::Invalid(e) => {
                    worker.stats[proposal.mutator].invalid += 1;
                    output.invalid += 1;
                    debug!(worker = worker.index, error = %e, "child failed validation");
                }
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::MaxParallelValidator;
    use metaforge_mutator::{
        DynMutator, MutateUnroll, MutatorSpec, RandomError, RecordedStream, RegistryError,
    };
    use metaforge_trace::{ann, CandidateDistribution, Input, TraceBuilder};

    /// Fails every application as if it found a corrupt support.
    #[derive(Debug)]
    struct CorruptSupport;

    impl Mutator for CorruptSupport {
        fn name(&self) -> &'static str {
            "test.CorruptSupport"
        }

        fn apply(
            &self,
            _trace: &Trace,
            _rng: &mut dyn RandomStream,
        ) -> Result<MutateOutcome, MutateError> {
            Err(MutateError::configuration(
                self.name(),
                0,
                TraceError::InvalidDistribution {
                    reason: "empty support".into(),
                },
            ))
        }
    }

    fn corrupt_registry() -> MutatorRegistry {
        fn build(_: &serde_json::Value) -> Result<DynMutator, RegistryError> {
            Ok(Arc::new(CorruptSupport))
        }
        let mut registry = MutatorRegistry::with_builtin_mutators();
        registry.register("test.CorruptSupport", build).unwrap();
        registry
    }

    fn unroll_only(config: SearchConfig) -> SearchConfig {
        SearchConfig {
            mutators: vec![MutatorSpec::new(MutateUnroll::NAME, 1.0)],
            ..config
        }
    }

    fn plain_trace() -> Trace {
        let mut b = TraceBuilder::new();
        let block = b.get_block("C").unwrap();
        b.get_loops(block, &[16]).unwrap();
        b.build()
    }

    #[test]
    fn test_propose_exhausts_on_inapplicable_parent() {
        let config = SearchConfig {
            max_propose_attempts: 3,
            ..unroll_only(SearchConfig::smoke())
        };
        let driver = SearchDriver::new(config, MutatorRegistry::global()).unwrap();
        let mut stats = vec![MutatorStats::new(MutateUnroll::NAME)];
        let mut rng = SeededStream::new(1);

        let proposal = driver.propose(&plain_trace(), &mut rng, &mut stats).unwrap();
        assert!(proposal.is_none());
        assert_eq!(stats[0].proposed, 3);
        assert_eq!(stats[0].not_applicable, 3);
    }

    #[test]
    fn test_propose_surfaces_random_errors() {
        let driver =
            SearchDriver::new(unroll_only(SearchConfig::smoke()), MutatorRegistry::global())
                .unwrap();
        let mut b = TraceBuilder::new();
        let block = b.get_block("C").unwrap();
        let dist = CandidateDistribution::uniform(vec![0, 16, 64]).unwrap();
        let v = b.sample_categorical(dist, 16).unwrap();
        b.annotate(block, ann::UNROLL_EXPLICIT, Input::Output(v))
            .unwrap();
        let parent = b.build();

        let mut stats = vec![MutatorStats::new(MutateUnroll::NAME)];
        // One draw picks the mutator; the mutator then runs dry.
        let mut rng = RecordedStream::new(vec![0.0]);
        let err = driver.propose(&parent, &mut rng, &mut stats).unwrap_err();
        assert!(!err.is_configuration());
        assert_eq!(stats[0].fatal, 1);
    }

    /// Stream whose weighted choices land one past the pipeline.
    #[derive(Debug)]
    struct OverrunChoice;

    impl RandomStream for OverrunChoice {
        fn next_in_range(&mut self, n: usize) -> Result<usize, RandomError> {
            Ok(n)
        }

        fn next_f64(&mut self) -> Result<f64, RandomError> {
            Ok(0.0)
        }

        fn weighted_choice(&mut self, weights: &[f64]) -> Result<usize, RandomError> {
            Ok(weights.len())
        }
    }

    #[test]
    fn test_propose_rejects_out_of_range_choice() {
        let driver =
            SearchDriver::new(unroll_only(SearchConfig::smoke()), MutatorRegistry::global())
                .unwrap();
        let mut stats = vec![MutatorStats::new(MutateUnroll::NAME)];
        let err = driver
            .propose(&plain_trace(), &mut OverrunChoice, &mut stats)
            .unwrap_err();
        assert_eq!(
            err,
            MutateError::random(DRIVER, RandomError::OutOfRange { index: 1, n: 1 })
        );
        assert_eq!(stats[0].proposed, 0);
    }

    #[test]
    fn test_run_improves_or_keeps_best() {
        let driver = SearchDriver::new(SearchConfig::smoke(), MutatorRegistry::global()).unwrap();
        let space = DesignSpace::matmul(64, 64, 64).unwrap();
        let report = driver.run(&space).unwrap();

        assert_eq!(report.generations_run, 3);
        assert_eq!(report.history.len(), 3);
        assert_eq!(report.total_trials(), 3 * 2 * 4);
        let first = report.history[0].best_score.unwrap();
        assert!(report.best_score.unwrap() >= first);
        assert!(report.best_trace.is_some());

        let proposed: usize = report.mutators.iter().map(|m| m.proposed).sum();
        assert!(proposed >= report.total_trials());
    }

    #[test]
    fn test_run_is_seed_deterministic() {
        let space = DesignSpace::matmul(32, 64, 16).unwrap();
        let run = |seed| {
            let config = SearchConfig {
                seed,
                ..SearchConfig::smoke()
            };
            SearchDriver::new(config, MutatorRegistry::global())
                .unwrap()
                .run(&space)
                .unwrap()
        };
        assert_eq!(run(5), run(5));
    }

    #[test]
    fn test_strict_validator_counts_invalid_children() {
        let config = SearchConfig {
            mutators: vec![MutatorSpec::new(
                metaforge_mutator::MutateParallel::NAME,
                1.0,
            )],
            ..SearchConfig::smoke()
        };
        let validator = Arc::new(MaxParallelValidator { max_jobs: 16 });
        let driver = SearchDriver::new(config, MutatorRegistry::global())
            .unwrap()
            .with_validator(validator.clone());
        let report = driver.run(&DesignSpace::matmul(64, 64, 64).unwrap()).unwrap();

        let invalid: usize = report.history.iter().map(|g| g.invalid).sum();
        assert_eq!(report.mutators[0].invalid, invalid);
        let best = report.best_trace.unwrap();
        assert!(validator.validate(&best).is_ok());
    }

    #[test]
    fn test_config_errors_skip_or_abort() {
        let mutators = vec![
            MutatorSpec::new(MutateUnroll::NAME, 1.0),
            MutatorSpec::new("test.CorruptSupport", 1.0),
        ];
        let space = DesignSpace::matmul(64, 64, 64).unwrap();
        let registry = corrupt_registry();

        let lenient = SearchConfig {
            mutators: mutators.clone(),
            ..SearchConfig::smoke()
        };
        let report = SearchDriver::new(lenient, &registry)
            .unwrap()
            .run(&space)
            .unwrap();
        assert!(!report.config_errors.is_empty());
        assert_eq!(report.mutators[1].fatal, report.config_errors.len());
        assert_eq!(report.generations_run, 3);

        let strict = SearchConfig {
            mutators,
            abort_on_config_error: true,
            ..SearchConfig::smoke()
        };
        let err = SearchDriver::new(strict, &registry)
            .unwrap()
            .run(&space)
            .unwrap_err();
        assert!(err
            .downcast_ref::<MutateError>()
            .is_some_and(MutateError::is_configuration));
    }
}
