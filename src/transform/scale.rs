use crate::dataset::{Table, Value};
use crate::error::{CogniError, Result};

fn numeric_column(table: &Table, transform: &str, column: &str) -> Result<Vec<f64>> {
    let idx = super::require_column(table, transform, column)?;
    let mut out = Vec::with_capacity(table.len());
    for (row, value) in table.column_values(idx).enumerate() {
        match value.as_f64() {
            Some(v) => out.push(v),
            None if value.is_null() => {
                return Err(CogniError::pipeline(
                    transform,
                    column,
                    format!("missing value at row {row}; add an `impute` stage before scaling"),
                ));
            }
            None => {
                return Err(CogniError::pipeline(
                    transform,
                    column,
                    format!("non-numeric value {value} at row {row}"),
                ));
            }
        }
    }
    if out.is_empty() {
        return Err(CogniError::pipeline(transform, column, "no rows to fit on"));
    }
    Ok(out)
}

/// Learn `(mean, std)`; a constant column gets `std = 1`.
pub(super) fn fit_standard(table: &Table, column: &str) -> Result<(f64, f64)> {
    let values = numeric_column(table, "standard_scale", column)?;
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    Ok((mean, if std > f64::EPSILON { std } else { 1.0 }))
}

/// Learn `(min, max)`.
pub(super) fn fit_min_max(table: &Table, column: &str) -> Result<(f64, f64)> {
    let values = numeric_column(table, "min_max_scale", column)?;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok((min, max))
}

/// Rewrite numeric cells as `(v - offset) / scale`; other cells pass through untouched.
pub(super) fn apply_affine(
    table: &mut Table,
    transform: &str,
    column: &str,
    offset: f64,
    scale: f64,
) -> Result<()> {
    let idx = super::require_column(table, transform, column)?;
    let scale = if scale.abs() > f64::EPSILON { scale } else { 1.0 };
    table.map_column(idx, |value| match value.as_f64() {
        Some(v) => Value::Number((v - offset) / scale),
        None => value.clone(),
    });
    Ok(())
}
