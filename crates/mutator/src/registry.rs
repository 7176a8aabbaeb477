//! Name-based mutator registry.
//!
//! The search driver builds its mutator pipeline from a declarative list of
//! `(name, probability, params)` entries; this registry maps each stable name
//! to a factory that turns the JSON params into a configured mutator.

use crate::compute_location::MutateComputeLocation;
use crate::error::RegistryError;
use crate::mutator::DynMutator;
use crate::parallel::MutateParallel;
use crate::resample::ResampleParams;
use crate::tile_size::MutateTileSize;
use crate::unroll::MutateUnroll;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// Builds a mutator from its registry parameters.
pub type MutatorFactory = fn(&serde_json::Value) -> Result<DynMutator, RegistryError>;

/// One entry of a mutator pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutatorSpec {
    pub name: String,
    /// Relative selection weight in the driver's mutator choice.
    #[serde(default = "default_probability")]
    pub probability: f64,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

fn default_probability() -> f64 {
    1.0
}

impl MutatorSpec {
    pub fn new(name: &str, probability: f64) -> Self {
        Self {
            name: name.to_string(),
            probability,
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// The default pipeline used by evolutionary search.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(MutateTileSize::NAME, 0.9),
            Self::new(MutateComputeLocation::NAME, 0.05),
            Self::new(MutateUnroll::NAME, 0.03),
            Self::new(MutateParallel::NAME, 0.02),
        ]
    }
}

/// A configured mutator and its relative selection probability.
#[derive(Debug, Clone)]
pub struct WeightedMutator {
    pub probability: f64,
    pub mutator: DynMutator,
}

#[derive(Debug, Clone, Default)]
pub struct MutatorRegistry {
    factories: BTreeMap<String, MutatorFactory>,
}

impl MutatorRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn with_builtin_mutators() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, MutatorFactory); 4] = [
            (MutateUnroll::NAME, build_unroll),
            (MutateParallel::NAME, build_parallel),
            (MutateComputeLocation::NAME, build_compute_location),
            (MutateTileSize::NAME, build_tile_size),
        ];
        for (name, factory) in builtins {
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }

    /// Process-wide registry holding the builtin mutators.
    pub fn global() -> &'static MutatorRegistry {
        static GLOBAL: OnceLock<MutatorRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::with_builtin_mutators)
    }

    pub fn register(&mut self, name: &str, factory: MutatorFactory) -> Result<(), RegistryError> {
        if self.factories.contains_key(name) {
            return Err(RegistryError::Duplicate {
                name: name.to_string(),
            });
        }
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(
        &self,
        name: &str,
        params: &serde_json::Value,
    ) -> Result<DynMutator, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownMutator {
                name: name.to_string(),
                known: self.names().join(", "),
            })?;
        factory(params)
    }

    /// Instantiate every entry of `specs`, in order.
    pub fn build_pipeline(
        &self,
        specs: &[MutatorSpec],
    ) -> Result<Vec<WeightedMutator>, RegistryError> {
        if specs.is_empty() {
            return Err(RegistryError::EmptyPipeline);
        }
        let pipeline = specs
            .iter()
            .map(|spec| {
                if !spec.probability.is_finite() || spec.probability <= 0.0 {
                    return Err(RegistryError::InvalidProbability {
                        name: spec.name.clone(),
                        probability: spec.probability,
                    });
                }
                Ok(WeightedMutator {
                    probability: spec.probability,
                    mutator: self.create(&spec.name, &spec.params)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let total: f64 = pipeline.iter().map(|m| m.probability).sum();
        if !total.is_finite() {
            return Err(RegistryError::ProbabilityTotal { total });
        }
        Ok(pipeline)
    }
}

fn parse_params<T>(name: &str, params: &serde_json::Value) -> Result<T, RegistryError>
where
    T: DeserializeOwned + Default,
{
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).map_err(|e| RegistryError::InvalidParams {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn resample_policy(
    name: &str,
    params: &serde_json::Value,
) -> Result<crate::resample::ResamplePolicy, RegistryError> {
    let parsed: ResampleParams = parse_params(name, params)?;
    parsed.policy().map_err(|reason| RegistryError::InvalidParams {
        name: name.to_string(),
        reason,
    })
}

fn build_unroll(params: &serde_json::Value) -> Result<DynMutator, RegistryError> {
    let policy = resample_policy(MutateUnroll::NAME, params)?;
    Ok(Arc::new(MutateUnroll::with_policy(policy)))
}

fn build_parallel(params: &serde_json::Value) -> Result<DynMutator, RegistryError> {
    let policy = resample_policy(MutateParallel::NAME, params)?;
    Ok(Arc::new(MutateParallel::with_policy(policy)))
}

fn build_compute_location(params: &serde_json::Value) -> Result<DynMutator, RegistryError> {
    let policy = resample_policy(MutateComputeLocation::NAME, params)?;
    Ok(Arc::new(MutateComputeLocation::with_policy(policy)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoParams {}

fn build_tile_size(params: &serde_json::Value) -> Result<DynMutator, RegistryError> {
    let NoParams {} = parse_params(MutateTileSize::NAME, params)?;
    Ok(Arc::new(MutateTileSize::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutator::Mutator;
    use crate::resample::ResamplePolicy;
    use serde_json::json;

    #[test]
    fn test_builtin_names() {
        let registry = MutatorRegistry::with_builtin_mutators();
        assert_eq!(
            registry.names(),
            vec![
                "meta_schedule.MutateComputeLocation",
                "meta_schedule.MutateParallel",
                "meta_schedule.MutateTileSize",
                "meta_schedule.MutateUnroll",
            ]
        );
        let unroll = registry.create("meta_schedule.MutateUnroll", &json!(null)).unwrap();
        assert_eq!(unroll.name(), MutateUnroll::NAME);
    }

    #[test]
    fn test_unknown_and_duplicate() {
        let mut registry = MutatorRegistry::with_builtin_mutators();
        assert!(matches!(
            registry.create("meta_schedule.MutateNothing", &json!(null)),
            Err(RegistryError::UnknownMutator { .. })
        ));
        assert!(matches!(
            registry.register(MutateUnroll::NAME, build_unroll),
            Err(RegistryError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_params_reach_the_mutator() {
        let policy = resample_policy(
            MutateUnroll::NAME,
            &json!({"resample": "rejection", "max_attempts": 5}),
        )
        .unwrap();
        assert_eq!(policy, ResamplePolicy::Rejection { max_attempts: 5 });

        let registry = MutatorRegistry::global();
        assert!(matches!(
            registry.create(MutateUnroll::NAME, &json!({"resample": "sometimes"})),
            Err(RegistryError::InvalidParams { .. })
        ));
        assert!(matches!(
            registry.create(MutateTileSize::NAME, &json!({"anything": 1})),
            Err(RegistryError::InvalidParams { .. })
        ));
    }

    #[test]
    fn test_build_pipeline_from_json() {
        let specs: Vec<MutatorSpec> = serde_json::from_value(json!([
            {"name": "meta_schedule.MutateTileSize", "probability": 0.9},
            {"name": "meta_schedule.MutateUnroll", "params": {"resample": "renormalized"}},
        ]))
        .unwrap();
        let pipeline = MutatorRegistry::global().build_pipeline(&specs).unwrap();
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline[1].probability, 1.0);
        assert_eq!(pipeline[0].mutator.name(), MutateTileSize::NAME);

        assert!(matches!(
            MutatorRegistry::global().build_pipeline(&[]),
            Err(RegistryError::EmptyPipeline)
        ));
        assert!(matches!(
            MutatorRegistry::global()
                .build_pipeline(&[MutatorSpec::new(MutateUnroll::NAME, 0.0)]),
            Err(RegistryError::InvalidProbability { .. })
        ));
        assert!(matches!(
            MutatorRegistry::global().build_pipeline(&[
                MutatorSpec::new(MutateUnroll::NAME, f64::MAX),
                MutatorSpec::new(MutateTileSize::NAME, f64::MAX),
            ]),
            Err(RegistryError::ProbabilityTotal { .. })
        ));
    }
}
