use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataset::{Table, Value};
use crate::error::{CogniError, Result};
use crate::schema::{Schema, SemanticType};

/// Learning task implied by the target column's semantic type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Classification,
    Regression,
}

impl Task {
    pub fn as_str(self) -> &'static str {
        match self {
            Task::Classification => "classification",
            Task::Regression => "regression",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded target values handed to an estimator.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Class indices into [`TargetEncoding::Classes`].
    Classes { labels: Vec<usize>, n_classes: usize },
    Continuous(Vec<f64>),
}

impl Target {
    pub fn len(&self) -> usize {
        match self {
            Target::Classes { labels, .. } => labels.len(),
            Target::Continuous(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn task(&self) -> Task {
        match self {
            Target::Classes { .. } => Task::Classification,
            Target::Continuous(_) => Task::Regression,
        }
    }

    /// Row subset in the given order.
    pub fn select(&self, rows: &[usize]) -> Target {
        match self {
            Target::Classes { labels, n_classes } => Target::Classes {
                labels: rows.iter().map(|&r| labels[r]).collect(),
                n_classes: *n_classes,
            },
            Target::Continuous(values) => {
                Target::Continuous(rows.iter().map(|&r| values[r]).collect())
            }
        }
    }

    /// Targets as floats: class index or raw value.
    pub fn as_f64(&self) -> Vec<f64> {
        match self {
            Target::Classes { labels, .. } => labels.iter().map(|&l| l as f64).collect(),
            Target::Continuous(values) => values.clone(),
        }
    }
}

/// How target cells map to and from estimator outputs. Stored in the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetEncoding {
    /// Ordered class values; an estimator predicts an index into this list.
    Classes { column: String, classes: Vec<Value> },
    Continuous { column: String },
}

impl TargetEncoding {
    /// Derive the encoding from the schema and the full materialized table.
    ///
    /// Boolean targets always get `[false, true]` so the class order does not depend on which
    /// values the data happens to contain.
    pub fn infer(schema: &Schema, table: &Table) -> Result<Self> {
        let column = schema.target().to_string();
        match schema.target_type() {
            SemanticType::Numeric => Ok(TargetEncoding::Continuous { column }),
            SemanticType::Boolean => Ok(TargetEncoding::Classes {
                column,
                classes: vec![Value::Bool(false), Value::Bool(true)],
            }),
            SemanticType::Categorical => {
                let idx = table.column_index(&column).ok_or_else(|| {
                    CogniError::invalid_argument(&column, "target column is not in the table")
                })?;
                let mut seen: BTreeMap<String, Value> = BTreeMap::new();
                for value in table.column_values(idx) {
                    if let Some(key) = value.category_key() {
                        seen.entry(key).or_insert_with(|| value.clone().portable());
                    }
                }
                if seen.is_empty() {
                    return Err(CogniError::invalid_argument(
                        &column,
                        "target column has no observed classes",
                    ));
                }
                Ok(TargetEncoding::Classes {
                    column,
                    classes: seen.into_values().collect(),
                })
            }
            SemanticType::Timestamp => Err(CogniError::invalid_argument(
                &column,
                "timestamp targets are not supported",
            )),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            TargetEncoding::Classes { column, .. } | TargetEncoding::Continuous { column } => {
                column
            }
        }
    }

    pub fn task(&self) -> Task {
        match self {
            TargetEncoding::Classes { .. } => Task::Classification,
            TargetEncoding::Continuous { .. } => Task::Regression,
        }
    }

    /// Class values, empty for regression.
    pub fn classes(&self) -> &[Value] {
        match self {
            TargetEncoding::Classes { classes, .. } => classes,
            TargetEncoding::Continuous { .. } => &[],
        }
    }

    /// Encode the target column of `table`. Missing targets are an error.
    pub fn encode(&self, table: &Table) -> Result<Target> {
        let column = self.column();
        let idx = table
            .column_index(column)
            .ok_or_else(|| CogniError::invalid_argument(column, "target column is not in the table"))?;
        match self {
            TargetEncoding::Classes { classes, .. } => {
                let keys: Vec<Option<String>> = classes.iter().map(Value::category_key).collect();
                let mut labels = Vec::with_capacity(table.len());
                for (row, value) in table.column_values(idx).enumerate() {
                    let key = value.category_key().ok_or_else(|| CogniError::MissingValue {
                        column: column.to_string(),
                        row,
                    })?;
                    let label = keys
                        .iter()
                        .position(|k| k.as_deref() == Some(key.as_str()))
                        .ok_or_else(|| {
                            CogniError::invalid_argument(
                                column,
                                format!("row {row} holds class {value} not seen when encoding"),
                            )
                        })?;
                    labels.push(label);
                }
                Ok(Target::Classes {
                    labels,
                    n_classes: classes.len(),
                })
            }
            TargetEncoding::Continuous { .. } => {
                let mut values = Vec::with_capacity(table.len());
                for (row, value) in table.column_values(idx).enumerate() {
                    match value.as_f64() {
                        Some(v) if v.is_finite() => values.push(v),
                        _ if value.is_null() || matches!(value, Value::Number(v) if v.is_nan()) => {
                            return Err(CogniError::MissingValue {
                                column: column.to_string(),
                                row,
                            });
                        }
                        _ => {
                            return Err(CogniError::invalid_argument(
                                column,
                                format!("row {row} holds non-numeric target {value}"),
                            ));
                        }
                    }
                }
                Ok(Target::Continuous(values))
            }
        }
    }

    /// Map one estimator output back to a target cell.
    pub fn decode(&self, prediction: f64) -> Value {
        match self {
            TargetEncoding::Classes { classes, .. } => {
                let idx = prediction.max(0.0) as usize;
                classes.get(idx).cloned().unwrap_or(Value::Null)
            }
            TargetEncoding::Continuous { .. } => Value::Number(prediction),
        }
    }
}
