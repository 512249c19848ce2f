//! Ordered feature transforms fit once on the training split and replayed unchanged afterwards.
//!
//! A [`TransformSpec`] is the declaration (what the configuration names); fitting it yields a
//! [`FittedTransform`] holding the learned state. [`FittedTransforms`] is the frozen sequence plus
//! the ordered feature columns the estimator was trained on, and is what the artifact stores.

mod encode;
mod impute;
mod scale;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::dataset::{Table, Value};
use crate::error::{CogniError, Result};
use crate::schema::SchemaMismatch;

pub use encode::UNKNOWN_CATEGORY;
pub use impute::ImputeStrategy;

/// Declared transform stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    /// Fill missing values.
    Impute {
        column: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strategy: Option<ImputeStrategy>,
        /// Fill value for the `constant` strategy.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fill: Option<Value>,
    },
    /// `(v - mean) / std`.
    StandardScale { column: String },
    /// `(v - min) / (max - min)`.
    MinMaxScale { column: String },
    /// Indicator columns per category plus an unknown bucket.
    OneHot { column: String },
    /// Integer codes per category; `0` is the unknown code.
    Ordinal { column: String },
    /// Remove the column.
    Drop { column: String },
}

impl TransformSpec {
    pub fn impute(column: impl Into<String>) -> Self {
        TransformSpec::Impute {
            column: column.into(),
            strategy: None,
            fill: None,
        }
    }

    pub fn one_hot(column: impl Into<String>) -> Self {
        TransformSpec::OneHot {
            column: column.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransformSpec::Impute { .. } => "impute",
            TransformSpec::StandardScale { .. } => "standard_scale",
            TransformSpec::MinMaxScale { .. } => "min_max_scale",
            TransformSpec::OneHot { .. } => "one_hot",
            TransformSpec::Ordinal { .. } => "ordinal",
            TransformSpec::Drop { .. } => "drop",
        }
    }

    pub fn column(&self) -> &str {
        match self {
            TransformSpec::Impute { column, .. }
            | TransformSpec::StandardScale { column }
            | TransformSpec::MinMaxScale { column }
            | TransformSpec::OneHot { column }
            | TransformSpec::Ordinal { column }
            | TransformSpec::Drop { column } => column,
        }
    }

    /// Learn this stage's state from `data`.
    pub fn fit(&self, data: &Table) -> Result<FittedTransform> {
        let column = self.column().to_string();
        Ok(match self {
            TransformSpec::Impute { strategy, fill, .. } => FittedTransform::Impute {
                fill: impute::fit(data, &column, *strategy, fill.as_ref())?,
                column,
            },
            TransformSpec::StandardScale { .. } => {
                let (mean, std) = scale::fit_standard(data, &column)?;
                FittedTransform::StandardScale { column, mean, std }
            }
            TransformSpec::MinMaxScale { .. } => {
                let (min, max) = scale::fit_min_max(data, &column)?;
                FittedTransform::MinMaxScale { column, min, max }
            }
            TransformSpec::OneHot { .. } => {
                let categories = encode::fit_categories(data, "one_hot", &column)?;
                for name in encode::one_hot_columns(&column, &categories) {
                    if data.has_column(&name) {
                        return Err(CogniError::pipeline(
                            "one_hot",
                            &column,
                            format!("output column `{name}` already exists"),
                        ));
                    }
                }
                FittedTransform::OneHot { column, categories }
            }
            TransformSpec::Ordinal { .. } => FittedTransform::Ordinal {
                categories: encode::fit_categories(data, "ordinal", &column)?,
                column,
            },
            TransformSpec::Drop { .. } => {
                require_column(data, "drop", &column)?;
                FittedTransform::Drop { column }
            }
        })
    }
}

/// A stage with its learned state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedTransform {
    Impute { column: String, fill: Value },
    StandardScale { column: String, mean: f64, std: f64 },
    MinMaxScale { column: String, min: f64, max: f64 },
    OneHot { column: String, categories: Vec<String> },
    Ordinal { column: String, categories: Vec<String> },
    Drop { column: String },
}

impl FittedTransform {
    pub fn column(&self) -> &str {
        match self {
            FittedTransform::Impute { column, .. }
            | FittedTransform::StandardScale { column, .. }
            | FittedTransform::MinMaxScale { column, .. }
            | FittedTransform::OneHot { column, .. }
            | FittedTransform::Ordinal { column, .. }
            | FittedTransform::Drop { column } => column,
        }
    }

    /// Replay the stage with its frozen state. Never refits.
    pub fn apply(&self, mut data: Table) -> Result<Table> {
        let unknown = match self {
            FittedTransform::Impute { column, fill } => {
                impute::apply(&mut data, column, fill)?;
                0
            }
            FittedTransform::StandardScale { column, mean, std } => {
                scale::apply_affine(&mut data, "standard_scale", column, *mean, *std)?;
                0
            }
            FittedTransform::MinMaxScale { column, min, max } => {
                scale::apply_affine(&mut data, "min_max_scale", column, *min, max - min)?;
                0
            }
            FittedTransform::OneHot { column, categories } => {
                encode::apply_one_hot(&mut data, column, categories)?
            }
            FittedTransform::Ordinal { column, categories } => {
                encode::apply_ordinal(&mut data, column, categories)?
            }
            FittedTransform::Drop { column } => {
                let idx = require_column(&data, "drop", column)?;
                data.remove_column(idx);
                0
            }
        };
        if unknown > 0 {
            tracing::warn!(
                column = self.column(),
                rows = unknown,
                "Unseen categories routed to the unknown bucket"
            );
        }
        Ok(data)
    }
}

pub(crate) fn require_column(table: &Table, transform: &str, column: &str) -> Result<usize> {
    table.column_index(column).ok_or_else(|| {
        CogniError::pipeline(
            transform,
            column,
            "column does not exist at this point of the pipeline",
        )
    })
}

/// Declared, not yet fitted, transform sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformPipeline {
    stages: Vec<TransformSpec>,
}

impl TransformPipeline {
    pub fn new(stages: Vec<TransformSpec>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[TransformSpec] {
        &self.stages
    }

    /// Fit every stage in order, each on the output of the previous one.
    ///
    /// Fails with `PipelineConfig` before any estimator work when a stage names a missing column
    /// or the target, or when a feature column is still unusable by an estimator afterwards.
    pub fn fit(&self, train: &Table, target: &str) -> Result<FittedTransforms> {
        let mut current = train.clone();
        let mut fitted = Vec::with_capacity(self.stages.len());
        for spec in &self.stages {
            if spec.column() == target {
                return Err(CogniError::pipeline(
                    spec.name(),
                    target,
                    "the target column cannot be transformed",
                ));
            }
            require_column(&current, spec.name(), spec.column())?;
            let stage = spec.fit(&current)?;
            tracing::debug!(transform = spec.name(), column = spec.column(), "Transform fitted");
            current = stage.apply(current)?;
            fitted.push(stage);
        }

        let feature_columns: Vec<String> = current
            .columns()
            .iter()
            .filter(|c| c.as_str() != target)
            .cloned()
            .collect();
        if feature_columns.is_empty() {
            return Err(CogniError::pipeline(
                "pipeline",
                target,
                "no feature columns remain after the transforms",
            ));
        }
        for name in &feature_columns {
            let idx = require_column(&current, "pipeline", name)?;
            if let Some((row, value)) = current
                .column_values(idx)
                .enumerate()
                .find(|(_, v)| v.as_f64().is_none())
            {
                let fix = if value.is_null() {
                    "add an `impute` stage"
                } else {
                    "add a `one_hot`, `ordinal` or `drop` stage"
                };
                return Err(CogniError::pipeline(
                    "pipeline",
                    name,
                    format!("row {row} holds {value}, which no estimator can use; {fix}"),
                ));
            }
        }
        Ok(FittedTransforms {
            stages: fitted,
            feature_columns,
        })
    }
}

/// Frozen transform states plus the estimator's feature layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedTransforms {
    stages: Vec<FittedTransform>,
    feature_columns: Vec<String>,
}

impl FittedTransforms {
    pub fn stages(&self) -> &[FittedTransform] {
        &self.stages
    }

    /// Feature columns in the order the estimator expects them.
    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    /// Replay every stage on `data`. Columns untouched by the stages pass through.
    pub fn apply(&self, data: &Table) -> Result<Table> {
        let mut current = data.clone();
        for stage in &self.stages {
            current = stage.apply(current)?;
        }
        Ok(current)
    }

    /// Apply the stages and lay the result out as the estimator's feature matrix.
    pub fn features(&self, data: &Table) -> Result<Array2<f64>> {
        let transformed = self.apply(data)?;
        feature_matrix(&transformed, &self.feature_columns)
    }
}

/// Project `table` onto `columns` and convert every cell to `f64`.
pub fn feature_matrix(table: &Table, columns: &[String]) -> Result<Array2<f64>> {
    let projected = table.project(columns).map_err(|missing| SchemaMismatch {
        missing,
        ..SchemaMismatch::default()
    })?;
    let mut matrix = Array2::<f64>::zeros((projected.len(), columns.len()));
    for (r, row) in projected.rows().iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            matrix[[r, c]] = match value.as_f64() {
                Some(v) => v,
                None if value.is_null() => {
                    return Err(CogniError::MissingValue {
                        column: columns[c].clone(),
                        row: r,
                    });
                }
                None => {
                    return Err(CogniError::invalid_argument(
                        &columns[c],
                        format!("row {r} holds non-numeric value {value}"),
                    ));
                }
            };
        }
    }
    Ok(matrix)
}
