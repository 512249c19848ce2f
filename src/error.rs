//! Error taxonomy shared by every stage of a training run.
//!
//! Each variant carries the offending column, key or value so callers can act on it without
//! parsing the message. Nothing here is retried by the crate.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::schema::SchemaMismatch;

/// Errors raised while materializing, training, evaluating or packaging a model.
#[derive(Debug, Error)]
pub enum CogniError {
    /// The run configuration could not be read or is inconsistent.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Data and schema disagree.
    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatch),
    /// The estimated or measured materialized size exceeds the memory budget.
    #[error(
        "materialized dataset would need {estimated_bytes} bytes but the budget is {budget_bytes} bytes"
    )]
    ResourceExhausted {
        estimated_bytes: u64,
        budget_bytes: u64,
    },
    /// Partition collection did not finish before its deadline.
    #[error("partition collection exceeded its deadline of {deadline_ms} ms")]
    DeadlineExceeded { deadline_ms: u128 },
    /// A partition source failed while being collected.
    #[error("partition {index} failed: {reason}")]
    Partition { index: usize, reason: String },
    /// A caller-supplied argument is out of range.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },
    /// A transform declaration cannot be satisfied by the data it will see.
    #[error("transform `{transform}` on column `{column}`: {reason}")]
    PipelineConfig {
        transform: String,
        column: String,
        reason: String,
    },
    /// A hyperparameter key the estimator does not understand.
    #[error("estimator `{estimator}` has no hyperparameter `{key}`")]
    UnknownHyperparameter { estimator: String, key: String },
    /// A known hyperparameter with an unusable value.
    #[error("hyperparameter `{key}` for estimator `{estimator}`: {reason}")]
    InvalidHyperparameter {
        estimator: String,
        key: String,
        reason: String,
    },
    /// A metric name outside the supported set.
    #[error("unknown metric `{0}`")]
    UnknownMetric(String),
    /// The estimator cannot fit the target's task.
    #[error("estimator `{estimator}` does not support {task} targets")]
    UnsupportedTask { estimator: String, task: String },
    /// A feature value is missing where the estimator needs a number.
    #[error("column `{column}` has a missing value at row {row}")]
    MissingValue { column: String, row: usize },
    /// Fitting produced an unusable model.
    #[error("training failed: {0}")]
    Training(String),
    /// The artifact was written by an unsupported format version.
    #[error("artifact format version {found} is not supported (supported: {supported})")]
    IncompatibleArtifactVersion { found: u32, supported: u32 },
    /// The artifact body does not hash to its recorded identifier.
    #[error("artifact {path} is corrupt: {reason}")]
    ArtifactCorrupt { path: PathBuf, reason: String },
    /// Filesystem failure with the path involved.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CogniError {
    pub(crate) fn invalid_argument(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn pipeline(transform: &str, column: &str, reason: impl Into<String>) -> Self {
        Self::PipelineConfig {
            transform: transform.to_string(),
            column: column.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = CogniError> = std::result::Result<T, E>;
