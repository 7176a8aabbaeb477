//! Candidate distributions for categorical decisions.

use crate::error::TraceError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Immutable weighted support a categorical decision is drawn from.
///
/// Values are unique and every weight is positive and finite. The support is
/// fixed when the sampling instruction is created and shared (by `Arc`) with
/// every trace derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDistribution", into = "RawDistribution")]
pub struct CandidateDistribution {
    values: Arc<[i64]>,
    weights: Arc<[f64]>,
}

#[derive(Serialize, Deserialize)]
struct RawDistribution {
    values: Vec<i64>,
    weights: Vec<f64>,
}

impl TryFrom<RawDistribution> for CandidateDistribution {
    type Error = TraceError;

    fn try_from(raw: RawDistribution) -> Result<Self, Self::Error> {
        Self::new(raw.values, raw.weights)
    }
}

impl From<CandidateDistribution> for RawDistribution {
    fn from(dist: CandidateDistribution) -> Self {
        Self {
            values: dist.values.to_vec(),
            weights: dist.weights.to_vec(),
        }
    }
}

impl CandidateDistribution {
    pub fn new(values: Vec<i64>, weights: Vec<f64>) -> Result<Self, TraceError> {
        if values.is_empty() {
            return Err(invalid("empty support"));
        }
        if values.len() != weights.len() {
            return Err(invalid(format!(
                "{} values but {} weights",
                values.len(),
                weights.len()
            )));
        }
        for (i, value) in values.iter().enumerate() {
            if values[..i].contains(value) {
                return Err(invalid(format!("duplicate value {value}")));
            }
        }
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w <= 0.0) {
            return Err(invalid(format!("weight {bad} is not positive and finite")));
        }
        let total: f64 = weights.iter().sum();
        if !total.is_finite() {
            return Err(invalid(format!("weights sum to {total}")));
        }
        Ok(Self {
            values: values.into(),
            weights: weights.into(),
        })
    }

    /// Equal weight on every value.
    pub fn uniform(values: Vec<i64>) -> Result<Self, TraceError> {
        let weights = vec![1.0; values.len()];
        Self::new(values, weights)
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, value: i64) -> bool {
        self.values.contains(&value)
    }

    pub fn position(&self, value: i64) -> Option<usize> {
        self.values.iter().position(|v| *v == value)
    }

    /// Probability of `value` once `excluded` is removed from the support.
    pub fn probability_excluding(&self, value: i64, excluded: i64) -> f64 {
        if value == excluded {
            return 0.0;
        }
        let total: f64 = self
            .values
            .iter()
            .zip(self.weights.iter())
            .filter(|(v, _)| **v != excluded)
            .map(|(_, w)| *w)
            .sum();
        match self.position(value) {
            Some(i) if total > 0.0 => self.weights[i] / total,
            _ => 0.0,
        }
    }
}

fn invalid(reason: impl Into<String>) -> TraceError {
    TraceError::InvalidDistribution {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_support() {
        assert!(CandidateDistribution::new(vec![], vec![]).is_err());
        assert!(CandidateDistribution::new(vec![1, 2], vec![1.0]).is_err());
        assert!(CandidateDistribution::new(vec![4, 4], vec![1.0, 1.0]).is_err());
        assert!(CandidateDistribution::new(vec![1, 2], vec![1.0, 0.0]).is_err());
        assert!(CandidateDistribution::new(vec![1], vec![f64::NAN]).is_err());
        assert!(CandidateDistribution::new(vec![1, 2], vec![f64::MAX, f64::MAX]).is_err());
    }

    #[test]
    fn test_probability_excluding_renormalizes() {
        let dist =
            CandidateDistribution::new(vec![0, 16, 64, 512], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(dist.probability_excluding(64, 64), 0.0);
        let p16 = dist.probability_excluding(16, 64);
        assert!((p16 - 2.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_deserialization_validates() {
        let err = serde_json::from_str::<CandidateDistribution>(r#"{"values":[],"weights":[]}"#);
        assert!(err.is_err());

        let ok: CandidateDistribution =
            serde_json::from_str(r#"{"values":[0,16],"weights":[0.5,0.5]}"#).unwrap();
        assert_eq!(ok.values(), &[0, 16]);
    }
}
