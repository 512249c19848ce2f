//! Run configuration.
//!
//! Config keys (TOML or JSON): `process_id`, `estimator`, `hyperparameters`, `transforms`,
//! `metrics`, `score_metric`, `evaluation`, `seed`, `memory_budget_bytes`, `collect_deadline_ms`.
//! Everything except `estimator` has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::{DEFAULT_MEMORY_BUDGET_BYTES, MaterializeOptions};
use crate::estimator::{EstimatorKind, Hyperparameters, Task};
use crate::transform::TransformPipeline;

/// Seed used when the configuration does not name one.
pub const DEFAULT_SEED: u64 = 592;
/// Process id used when the configuration does not name one.
pub const DEFAULT_PROCESS_ID: &str = "xxxxxxxx";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid JSON parameter file at {path}: {source}")]
    ParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid config value `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

/// How trained models are scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationPlan {
    /// Single seeded train/eval split.
    Holdout {
        #[serde(default = "default_train_fraction")]
        train_fraction: f64,
    },
    /// Repeated k-fold; the final model is refit on every row.
    CrossValidation {
        #[serde(default = "default_folds")]
        folds: usize,
        #[serde(default = "default_repeats")]
        repeats: usize,
    },
    /// Cross-validation for small tables, holdout otherwise.
    Auto {
        #[serde(default = "default_cross_validation_below_rows")]
        cross_validation_below_rows: usize,
        #[serde(default = "default_train_fraction")]
        train_fraction: f64,
        #[serde(default = "default_folds")]
        folds: usize,
        #[serde(default = "default_repeats")]
        repeats: usize,
    },
}

impl Default for EvaluationPlan {
    fn default() -> Self {
        EvaluationPlan::Holdout {
            train_fraction: default_train_fraction(),
        }
    }
}

impl EvaluationPlan {
    /// Concrete plan for a table of `n_rows`; never returns `Auto`.
    pub fn resolve(&self, n_rows: usize) -> EvaluationPlan {
        match self {
            EvaluationPlan::Auto {
                cross_validation_below_rows,
                train_fraction,
                folds,
                repeats,
            } => {
                if n_rows < *cross_validation_below_rows {
                    EvaluationPlan::CrossValidation {
                        folds: *folds,
                        repeats: *repeats,
                    }
                } else {
                    EvaluationPlan::Holdout {
                        train_fraction: *train_fraction,
                    }
                }
            }
            other => other.clone(),
        }
    }
}

fn default_train_fraction() -> f64 {
    0.8
}

fn default_folds() -> usize {
    5
}

fn default_repeats() -> usize {
    1
}

fn default_cross_validation_below_rows() -> usize {
    1_000
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_process_id() -> String {
    DEFAULT_PROCESS_ID.to_string()
}

fn default_memory_budget_bytes() -> u64 {
    DEFAULT_MEMORY_BUDGET_BYTES
}

/// Immutable settings for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Tag attached to every log line of the run.
    #[serde(default = "default_process_id")]
    pub process_id: String,
    pub estimator: EstimatorKind,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    #[serde(default)]
    pub transforms: TransformPipeline,
    /// Empty means the task's default metric.
    #[serde(default)]
    pub metrics: Vec<String>,
    /// Metric logged as the run score; defaults to the first metric.
    #[serde(default)]
    pub score_metric: Option<String>,
    #[serde(default)]
    pub evaluation: EvaluationPlan,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_memory_budget_bytes")]
    pub memory_budget_bytes: u64,
    /// Deadline for partition collection; absent means none.
    #[serde(default)]
    pub collect_deadline_ms: Option<u64>,
}

impl RunConfig {
    /// Configuration with every default and the given estimator.
    pub fn new(estimator: EstimatorKind) -> Self {
        Self {
            process_id: default_process_id(),
            estimator,
            hyperparameters: Hyperparameters::new(),
            transforms: TransformPipeline::default(),
            metrics: Vec::new(),
            score_metric: None,
            evaluation: EvaluationPlan::default(),
            seed: DEFAULT_SEED,
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            collect_deadline_ms: None,
        }
    }

    pub fn materialize_options(&self) -> MaterializeOptions {
        MaterializeOptions {
            memory_budget_bytes: self.memory_budget_bytes,
            deadline: self.collect_deadline_ms.map(Duration::from_millis),
        }
    }

    /// Requested metric names, falling back to the task's default.
    pub fn metric_names(&self, task: Task) -> Vec<String> {
        if self.metrics.is_empty() {
            let default = match task {
                Task::Classification => "accuracy",
                Task::Regression => "rmse",
            };
            vec![default.to_string()]
        } else {
            self.metrics.clone()
        }
    }

    /// Metric reported as the run score.
    pub fn score_metric_name(&self, task: Task) -> String {
        self.score_metric
            .clone()
            .or_else(|| self.metric_names(task).into_iter().next())
            .unwrap_or_default()
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.process_id.trim().is_empty() {
            return Err(invalid("process_id", "must not be empty"));
        }
        let known = self.estimator.hyperparameter_keys();
        if let Some(key) = self.hyperparameters.keys().find(|k| !known.contains(&k.as_str())) {
            return Err(invalid(
                &format!("hyperparameters.{key}"),
                format!("estimator `{}` has no such hyperparameter", self.estimator),
            ));
        }
        if self.memory_budget_bytes == 0 {
            return Err(invalid("memory_budget_bytes", "must be positive"));
        }
        if let Some(score) = &self.score_metric
            && !self.metrics.is_empty()
            && !self.metrics.contains(score)
        {
            return Err(invalid(
                "score_metric",
                format!("`{score}` is not listed in `metrics`"),
            ));
        }
        let fraction = match &self.evaluation {
            EvaluationPlan::Holdout { train_fraction }
            | EvaluationPlan::Auto { train_fraction, .. } => Some(*train_fraction),
            EvaluationPlan::CrossValidation { .. } => None,
        };
        if let Some(fraction) = fraction
            && !(fraction > 0.0 && fraction < 1.0)
        {
            return Err(invalid(
                "evaluation.train_fraction",
                format!("{fraction} is outside the open interval (0, 1)"),
            ));
        }
        if let EvaluationPlan::CrossValidation { folds, repeats }
        | EvaluationPlan::Auto { folds, repeats, .. } = &self.evaluation
        {
            if *folds < 2 {
                return Err(invalid("evaluation.folds", "must be at least 2"));
            }
            if *repeats == 0 {
                return Err(invalid("evaluation.repeats", "must be at least 1"));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Load and validate a run configuration. `.json` files are read as JSON, anything else as TOML.
pub fn load_run_config(path: &Path) -> Result<RunConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let config: RunConfig = if is_json {
        serde_json::from_str(&text).map_err(|source| ConfigError::ParseJson {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })?
    };
    config.validate()?;
    Ok(config)
}
