use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::Value;
use crate::error::{CogniError, Result};

/// Materialized, ordered, single-node table.
///
/// Rows are stored row-major and every row has exactly one value per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table, rejecting duplicate column names and ragged rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(CogniError::invalid_argument(
                    "columns",
                    format!("duplicate column `{name}`"),
                ));
            }
        }
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(CogniError::invalid_argument(
                    "rows",
                    format!(
                        "row {idx} has {} values but the table has {} columns",
                        row.len(),
                        columns.len()
                    ),
                ));
            }
        }
        Ok(Self { columns, rows })
    }

    pub fn empty(columns: Vec<String>) -> Result<Self> {
        Self::new(columns, Vec::new())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Iterate one column top to bottom.
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |row| &row[index])
    }

    /// New table holding the given rows in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// New table with only `names`, in that order. Fails with the list of absent columns.
    pub fn project(&self, names: &[String]) -> std::result::Result<Table, Vec<String>> {
        let mut indices = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.column_index(name) {
                Some(idx) => indices.push(idx),
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(missing);
        }
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(Table {
            columns: names.to_vec(),
            rows,
        })
    }

    /// Replace every value of a column in place.
    pub fn map_column(&mut self, index: usize, mut f: impl FnMut(&Value) -> Value) {
        for row in &mut self.rows {
            row[index] = f(&row[index]);
        }
    }

    /// Remove a column, returning its values.
    pub fn remove_column(&mut self, index: usize) -> (String, Vec<Value>) {
        let name = self.columns.remove(index);
        let values = self.rows.iter_mut().map(|row| row.remove(index)).collect();
        (name, values)
    }

    /// Insert columns at `index`, shifting later columns right.
    ///
    /// `values[r]` holds the new cells of row `r`, one per name.
    pub fn insert_columns(
        &mut self,
        index: usize,
        names: Vec<String>,
        values: Vec<Vec<Value>>,
    ) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(CogniError::invalid_argument(
                "values",
                format!(
                    "{} rows of new cells for a table of {} rows",
                    values.len(),
                    self.rows.len()
                ),
            ));
        }
        for name in &names {
            if self.has_column(name) {
                return Err(CogniError::invalid_argument(
                    "columns",
                    format!("column `{name}` already exists"),
                ));
            }
        }
        for (row, cells) in self.rows.iter_mut().zip(values) {
            if cells.len() != names.len() {
                return Err(CogniError::invalid_argument(
                    "values",
                    "new cells do not match the new column count",
                ));
            }
            row.splice(index..index, cells);
        }
        self.columns.splice(index..index, names);
        Ok(())
    }

    /// Append rows from another table with identical columns.
    pub fn extend(&mut self, other: Table) -> Result<()> {
        if other.columns != self.columns {
            return Err(CogniError::invalid_argument(
                "table",
                "cannot append a table with different columns",
            ));
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Approximate in-memory footprint of all cells.
    pub fn estimated_bytes(&self) -> u64 {
        self.rows
            .iter()
            .flat_map(|row| row.iter())
            .map(Value::estimated_bytes)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(
            vec!["a".into(), "b".into()],
            vec![
                vec![Value::Number(1.0), Value::from("x")],
                vec![Value::Number(2.0), Value::from("y")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn rejects_ragged_rows_and_duplicate_columns() {
        assert!(Table::new(vec!["a".into()], vec![vec![]]).is_err());
        assert!(Table::new(vec!["a".into(), "a".into()], vec![]).is_err());
    }

    #[test]
    fn project_reports_missing_columns() {
        let table = sample();
        let projected = table.project(&["b".to_string()]).unwrap();
        assert_eq!(projected.columns(), &["b".to_string()]);
        let missing = table.project(&["c".to_string(), "a".to_string()]).unwrap_err();
        assert_eq!(missing, vec!["c".to_string()]);
    }

    #[test]
    fn insert_and_remove_columns_keep_rows_aligned() {
        let mut table = sample();
        table
            .insert_columns(
                1,
                vec!["c".into()],
                vec![vec![Value::Bool(true)], vec![Value::Bool(false)]],
            )
            .unwrap();
        assert_eq!(table.columns(), &["a", "c", "b"]);
        assert_eq!(table.rows()[1][1], Value::Bool(false));
        let (name, values) = table.remove_column(0);
        assert_eq!(name, "a");
        assert_eq!(values, vec![Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(table.columns(), &["c", "b"]);
    }
}
