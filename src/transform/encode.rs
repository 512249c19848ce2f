use std::collections::BTreeSet;

use crate::dataset::{Table, Value};
use crate::error::{CogniError, Result};

/// Reserved category for values not seen during fit (and for missing values).
pub const UNKNOWN_CATEGORY: &str = "__unknown__";

/// Sorted distinct category keys of a column.
pub(super) fn fit_categories(table: &Table, transform: &str, column: &str) -> Result<Vec<String>> {
    let idx = super::require_column(table, transform, column)?;
    let categories: BTreeSet<String> = table
        .column_values(idx)
        .filter_map(Value::category_key)
        .collect();
    if categories.is_empty() {
        return Err(CogniError::pipeline(
            transform,
            column,
            "no observed categories to encode",
        ));
    }
    if categories.contains(UNKNOWN_CATEGORY) {
        return Err(CogniError::pipeline(
            transform,
            column,
            format!("`{UNKNOWN_CATEGORY}` is reserved for unseen categories"),
        ));
    }
    Ok(categories.into_iter().collect())
}

/// Output column names for a one-hot encoding, unknown bucket last.
pub(super) fn one_hot_columns(column: &str, categories: &[String]) -> Vec<String> {
    categories
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(UNKNOWN_CATEGORY))
        .map(|category| format!("{column}={category}"))
        .collect()
}

/// Replace `column` with one indicator column per category plus the unknown bucket.
///
/// Returns how many rows fell into the unknown bucket.
pub(super) fn apply_one_hot(table: &mut Table, column: &str, categories: &[String]) -> Result<usize> {
    let idx = super::require_column(table, "one_hot", column)?;
    let (_, values) = table.remove_column(idx);
    let width = categories.len() + 1;
    let mut unknown = 0usize;
    let cells: Vec<Vec<Value>> = values
        .iter()
        .map(|value| {
            let slot = value
                .category_key()
                .and_then(|key| categories.binary_search(&key).ok())
                .unwrap_or_else(|| {
                    unknown += 1;
                    categories.len()
                });
            (0..width)
                .map(|i| Value::Number(if i == slot { 1.0 } else { 0.0 }))
                .collect()
        })
        .collect();
    table
        .insert_columns(idx, one_hot_columns(column, categories), cells)
        .map_err(|err| CogniError::pipeline("one_hot", column, err.to_string()))?;
    Ok(unknown)
}

/// Replace categories with codes `1..=n` in sorted order; unseen and missing values map to `0`.
///
/// Returns how many rows took the unknown code.
pub(super) fn apply_ordinal(table: &mut Table, column: &str, categories: &[String]) -> Result<usize> {
    let idx = super::require_column(table, "ordinal", column)?;
    let mut unknown = 0usize;
    table.map_column(idx, |value| {
        let code = value
            .category_key()
            .and_then(|key| categories.binary_search(&key).ok())
            .map(|pos| pos + 1)
            .unwrap_or_else(|| {
                unknown += 1;
                0
            });
        Value::Number(code as f64)
    });
    Ok(unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cities(values: &[Option<&str>]) -> Table {
        Table::new(
            vec!["id".into(), "city".into()],
            values
                .iter()
                .enumerate()
                .map(|(i, v)| vec![Value::Number(i as f64), Value::from(*v)])
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn one_hot_routes_unseen_values_to_unknown_bucket() {
        let train = cities(&[Some("NYC"), Some("LA"), Some("NYC")]);
        let categories = fit_categories(&train, "one_hot", "city").unwrap();
        assert_eq!(categories, vec!["LA".to_string(), "NYC".to_string()]);

        let mut inference = cities(&[Some("SF"), None, Some("LA")]);
        let unknown = apply_one_hot(&mut inference, "city", &categories).unwrap();
        assert_eq!(unknown, 2);
        assert_eq!(
            inference.columns(),
            &["id", "city=LA", "city=NYC", "city=__unknown__"]
        );
        assert_eq!(
            inference.rows()[0][1..],
            [Value::Number(0.0), Value::Number(0.0), Value::Number(1.0)]
        );
        assert_eq!(
            inference.rows()[2][1..],
            [Value::Number(1.0), Value::Number(0.0), Value::Number(0.0)]
        );
    }

    #[test]
    fn ordinal_reserves_zero_for_unknown() {
        let train = cities(&[Some("b"), Some("a")]);
        let categories = fit_categories(&train, "ordinal", "city").unwrap();
        let mut data = cities(&[Some("a"), Some("b"), Some("zzz")]);
        assert_eq!(apply_ordinal(&mut data, "city", &categories).unwrap(), 1);
        let codes: Vec<f64> = data.column_values(1).filter_map(Value::as_f64).collect();
        assert_eq!(codes, vec![1.0, 2.0, 0.0]);
    }

    #[test]
    fn reserved_category_name_is_rejected() {
        let train = cities(&[Some(UNKNOWN_CATEGORY)]);
        assert!(fit_categories(&train, "one_hot", "city").is_err());
    }
}
