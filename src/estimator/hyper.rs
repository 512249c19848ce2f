use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CogniError, Result};

/// A single hyperparameter value as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HyperValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for HyperValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HyperValue::Bool(v) => write!(f, "{v}"),
            HyperValue::Int(v) => write!(f, "{v}"),
            HyperValue::Float(v) => write!(f, "{v}"),
            HyperValue::Text(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for HyperValue {
    fn from(value: bool) -> Self {
        HyperValue::Bool(value)
    }
}

impl From<i64> for HyperValue {
    fn from(value: i64) -> Self {
        HyperValue::Int(value)
    }
}

impl From<f64> for HyperValue {
    fn from(value: f64) -> Self {
        HyperValue::Float(value)
    }
}

impl From<&str> for HyperValue {
    fn from(value: &str) -> Self {
        HyperValue::Text(value.to_string())
    }
}

/// Hyperparameters keyed by name. Ordered so the resolved record serializes stably.
pub type Hyperparameters = BTreeMap<String, HyperValue>;

/// Reads an estimator's enumerated hyperparameters, filling defaults and recording what was used.
pub(crate) struct HyperReader<'a> {
    estimator: &'static str,
    given: &'a Hyperparameters,
    resolved: Hyperparameters,
}

impl<'a> HyperReader<'a> {
    /// Fails with `UnknownHyperparameter` on the first key outside `known`.
    pub(crate) fn new(
        estimator: &'static str,
        given: &'a Hyperparameters,
        known: &[&str],
    ) -> Result<Self> {
        if let Some(key) = given.keys().find(|k| !known.contains(&k.as_str())) {
            return Err(CogniError::UnknownHyperparameter {
                estimator: estimator.to_string(),
                key: key.clone(),
            });
        }
        Ok(Self {
            estimator,
            given,
            resolved: Hyperparameters::new(),
        })
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> CogniError {
        CogniError::InvalidHyperparameter {
            estimator: self.estimator.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Integer at least `min`.
    pub(crate) fn usize(&mut self, key: &str, default: usize, min: usize) -> Result<usize> {
        let value = match self.given.get(key) {
            None => default,
            Some(HyperValue::Int(v)) if *v >= 0 => *v as usize,
            Some(HyperValue::Float(v)) if v.fract() == 0.0 && *v >= 0.0 && *v < 1e15 => *v as usize,
            Some(other) => {
                return Err(self.invalid(key, format!("expected a non-negative integer, got {other}")));
            }
        };
        if value < min {
            return Err(self.invalid(key, format!("must be at least {min}, got {value}")));
        }
        self.resolved
            .insert(key.to_string(), HyperValue::Int(value as i64));
        Ok(value)
    }

    /// Optional integer at least `min`; absent means unbounded.
    pub(crate) fn optional_usize(&mut self, key: &str, min: usize) -> Result<Option<usize>> {
        if self.given.contains_key(key) {
            self.usize(key, min, min).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Finite float inside `[min, max]`; integers are accepted.
    pub(crate) fn f64(&mut self, key: &str, default: f64, min: f64, max: f64) -> Result<f64> {
        let value = match self.given.get(key) {
            None => default,
            Some(HyperValue::Float(v)) => *v,
            Some(HyperValue::Int(v)) => *v as f64,
            Some(other) => return Err(self.invalid(key, format!("expected a number, got {other}"))),
        };
        if !value.is_finite() || value < min || value > max {
            return Err(self.invalid(key, format!("{value} is outside [{min}, {max}]")));
        }
        self.resolved.insert(key.to_string(), HyperValue::Float(value));
        Ok(value)
    }

    pub(crate) fn bool(&mut self, key: &str, default: bool) -> Result<bool> {
        let value = match self.given.get(key) {
            None => default,
            Some(HyperValue::Bool(v)) => *v,
            Some(other) => return Err(self.invalid(key, format!("expected a boolean, got {other}"))),
        };
        self.resolved.insert(key.to_string(), HyperValue::Bool(value));
        Ok(value)
    }

    /// One of `allowed`, returned as its index.
    pub(crate) fn choice(&mut self, key: &str, default: &str, allowed: &[&str]) -> Result<usize> {
        let given = self.given;
        let value = match given.get(key) {
            None => default,
            Some(HyperValue::Text(v)) => v.as_str(),
            Some(other) => return Err(self.invalid(key, format!("expected a string, got {other}"))),
        };
        let position = allowed.iter().position(|a| *a == value).ok_or_else(|| {
            self.invalid(
                key,
                format!("`{value}` is not one of {}", allowed.join(", ")),
            )
        })?;
        self.resolved
            .insert(key.to_string(), HyperValue::Text(value.to_string()));
        Ok(position)
    }

    /// The resolved record: every enumerated key with the value actually used.
    pub(crate) fn finish(self) -> Hyperparameters {
        self.resolved
    }
}
