use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataset::{Table, Value};
use crate::error::{CogniError, Result};

/// How a missing value is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputeStrategy {
    Mean,
    Median,
    MostFrequent,
    Constant,
}

/// Learn the fill value for `column`.
///
/// Without an explicit strategy, numeric columns use the mean and everything else the most
/// frequent value.
pub(super) fn fit(
    table: &Table,
    column: &str,
    strategy: Option<ImputeStrategy>,
    fill: Option<&Value>,
) -> Result<Value> {
    let idx = super::require_column(table, "impute", column)?;
    let observed: Vec<&Value> = table
        .column_values(idx)
        .filter(|v| !is_missing(v))
        .collect();
    let all_numeric = observed.iter().all(|v| v.as_f64().is_some());
    let strategy = strategy.unwrap_or(if all_numeric {
        ImputeStrategy::Mean
    } else {
        ImputeStrategy::MostFrequent
    });

    match strategy {
        ImputeStrategy::Constant => match fill {
            Some(value) if !value.is_null() => Ok(value.clone().portable()),
            _ => Err(CogniError::pipeline(
                "impute",
                column,
                "strategy `constant` needs a non-null `fill` value",
            )),
        },
        _ if observed.is_empty() => Err(CogniError::pipeline(
            "impute",
            column,
            "no observed values to learn a fill value from",
        )),
        ImputeStrategy::Mean | ImputeStrategy::Median if !all_numeric => Err(CogniError::pipeline(
            "impute",
            column,
            "mean and median imputation need a numeric column",
        )),
        ImputeStrategy::Mean => {
            let sum: f64 = observed.iter().filter_map(|v| v.as_f64()).sum();
            Ok(Value::Number(sum / observed.len() as f64))
        }
        ImputeStrategy::Median => {
            let mut values: Vec<f64> = observed.iter().filter_map(|v| v.as_f64()).collect();
            values.sort_by(f64::total_cmp);
            let mid = values.len() / 2;
            let median = if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            };
            Ok(Value::Number(median))
        }
        ImputeStrategy::MostFrequent => Ok(most_frequent(&observed).portable()),
    }
}

/// Most frequent value; ties go to the smallest category key.
fn most_frequent(observed: &[&Value]) -> Value {
    let mut counts: BTreeMap<String, (usize, &Value)> = BTreeMap::new();
    for &value in observed {
        if let Some(key) = value.category_key() {
            counts.entry(key).or_insert((0, value)).0 += 1;
        }
    }
    let mut best: Option<(usize, &Value)> = None;
    for (count, value) in counts.values() {
        if best.is_none_or(|(c, _)| *count > c) {
            best = Some((*count, *value));
        }
    }
    best.map(|(_, v)| v.clone()).unwrap_or(Value::Null)
}

pub(super) fn apply(table: &mut Table, column: &str, fill: &Value) -> Result<()> {
    let idx = super::require_column(table, "impute", column)?;
    table.map_column(idx, |v| {
        if is_missing(v) {
            fill.clone()
        } else {
            v.clone()
        }
    });
    Ok(())
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Number(v) => v.is_nan(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(values: Vec<Value>) -> Table {
        Table::new(
            vec!["c".into()],
            values.into_iter().map(|v| vec![v]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn numeric_columns_default_to_mean() {
        let t = column(vec![1.0.into(), Value::Null, 5.0.into()]);
        assert_eq!(fit(&t, "c", None, None).unwrap(), Value::Number(3.0));
    }

    #[test]
    fn median_handles_even_counts() {
        let t = column(vec![4.0.into(), 1.0.into(), 3.0.into(), 2.0.into()]);
        assert_eq!(
            fit(&t, "c", Some(ImputeStrategy::Median), None).unwrap(),
            Value::Number(2.5)
        );
    }

    #[test]
    fn text_columns_default_to_most_frequent_with_stable_ties() {
        let t = column(vec!["b".into(), "a".into(), "b".into(), "a".into(), Value::Null]);
        assert_eq!(fit(&t, "c", None, None).unwrap(), Value::from("a"));
    }

    #[test]
    fn mean_on_text_is_a_config_error() {
        let t = column(vec!["x".into()]);
        assert!(matches!(
            fit(&t, "c", Some(ImputeStrategy::Mean), None),
            Err(CogniError::PipelineConfig { .. })
        ));
    }

    #[test]
    fn constant_requires_fill() {
        let t = column(vec![Value::Null]);
        assert!(fit(&t, "c", Some(ImputeStrategy::Constant), None).is_err());
        assert_eq!(
            fit(&t, "c", Some(ImputeStrategy::Constant), Some(&Value::Number(0.0))).unwrap(),
            Value::Number(0.0)
        );
    }

    #[test]
    fn apply_fills_nulls_and_nans() {
        let mut t = column(vec![Value::Null, f64::NAN.into(), 2.0.into()]);
        apply(&mut t, "c", &Value::Number(9.0)).unwrap();
        let values: Vec<_> = t.column_values(0).cloned().collect();
        assert_eq!(values, vec![9.0.into(), 9.0.into(), 2.0.into()]);
    }
}
