//! Column declarations and dataset validation.
//!
//! A [`Schema`] is fixed at configuration time. [`Schema::validate`] is a pure check that names
//! every offending column; [`Schema::conform`] is the explicit cast step that rewrites castable
//! values (numeric text, `0`/`1` booleans, RFC 3339 timestamps) into canonical [`Value`]s.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::dataset::{Table, Value};
use crate::error::{CogniError, Result};

/// Closed set of column semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Numeric,
    Categorical,
    Boolean,
    Timestamp,
}

impl SemanticType {
    /// Canonical form of `value` for this type, or `None` if it cannot be cast.
    ///
    /// Missing values stay `Null` for every type.
    pub fn cast(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (SemanticType::Numeric, Value::Number(v)) => Some(Value::Number(*v)),
            (SemanticType::Numeric, Value::Bool(b)) => Some(Value::Number(f64::from(u8::from(*b)))),
            (SemanticType::Numeric, Value::Text(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Some(Value::Null);
                }
                trimmed.parse::<f64>().ok().map(Value::Number)
            }
            (SemanticType::Numeric, Value::Timestamp(_)) => None,
            (SemanticType::Categorical, Value::Text(s)) if s.is_empty() => Some(Value::Null),
            (SemanticType::Categorical, other) => Some(other.clone()),
            (SemanticType::Boolean, Value::Bool(b)) => Some(Value::Bool(*b)),
            (SemanticType::Boolean, Value::Number(v)) if *v == 0.0 => Some(Value::Bool(false)),
            (SemanticType::Boolean, Value::Number(v)) if *v == 1.0 => Some(Value::Bool(true)),
            (SemanticType::Boolean, Value::Text(s)) => parse_bool(s),
            (SemanticType::Boolean, _) => None,
            (SemanticType::Timestamp, Value::Timestamp(secs)) => Some(Value::Timestamp(*secs)),
            (SemanticType::Timestamp, Value::Number(v)) if v.is_finite() => {
                Some(Value::Timestamp(v.trunc() as i64))
            }
            (SemanticType::Timestamp, Value::Text(s)) => parse_timestamp(s),
            (SemanticType::Timestamp, _) => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SemanticType::Numeric => "numeric",
            SemanticType::Categorical => "categorical",
            SemanticType::Boolean => "boolean",
            SemanticType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_bool(text: &str) -> Option<Value> {
    match text.trim().to_ascii_lowercase().as_str() {
        "" => Some(Value::Null),
        "true" | "1" | "yes" | "y" | "t" => Some(Value::Bool(true)),
        "false" | "0" | "no" | "n" | "f" => Some(Value::Bool(false)),
        _ => None,
    }
}

fn parse_timestamp(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(Value::Null);
    }
    if let Ok(secs) = trimmed.parse::<i64>() {
        return Some(Value::Timestamp(secs));
    }
    OffsetDateTime::parse(trimmed, &Rfc3339)
        .ok()
        .map(|dt| Value::Timestamp(dt.unix_timestamp()))
}

/// One declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
        }
    }
}

/// Whether the target column must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Training,
    Inference,
}

/// Ordered column declarations plus the target column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaDef")]
pub struct Schema {
    columns: Vec<ColumnSpec>,
    target: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dropped: Vec<String>,
}

#[derive(Deserialize)]
struct SchemaDef {
    columns: Vec<ColumnSpec>,
    target: String,
    #[serde(default)]
    dropped: Vec<String>,
}

impl TryFrom<SchemaDef> for Schema {
    type Error = CogniError;

    fn try_from(def: SchemaDef) -> Result<Self> {
        Schema::new(def.columns, def.target)?.with_dropped(def.dropped)
    }
}

impl Schema {
    /// Declare a schema. The target must be one of the columns and names must be unique.
    pub fn new(columns: Vec<ColumnSpec>, target: impl Into<String>) -> Result<Self> {
        let target = target.into();
        let mut seen = BTreeSet::new();
        for column in &columns {
            if column.name.is_empty() {
                return Err(CogniError::invalid_argument("schema", "empty column name"));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(CogniError::invalid_argument(
                    "schema",
                    format!("duplicate column `{}`", column.name),
                ));
            }
        }
        if !seen.contains(target.as_str()) {
            return Err(CogniError::invalid_argument(
                "target",
                format!("target `{target}` is not a declared column"),
            ));
        }
        Ok(Self {
            columns,
            target,
            dropped: Vec::new(),
        })
    }

    /// Columns present in source data that the bridge removes explicitly (e.g. row ids).
    pub fn with_dropped(mut self, dropped: Vec<String>) -> Result<Self> {
        for name in &dropped {
            if self.column(name).is_some() {
                return Err(CogniError::invalid_argument(
                    "dropped",
                    format!("`{name}` is declared as a column and cannot also be dropped"),
                ));
            }
        }
        self.dropped = dropped;
        Ok(self)
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn target_type(&self) -> SemanticType {
        self.column(&self.target)
            .map(|c| c.semantic_type)
            .unwrap_or(SemanticType::Numeric)
    }

    /// Declared names, in order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Declared names except the target, in order.
    pub fn feature_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.name != self.target)
            .map(|c| c.name.clone())
            .collect()
    }

    fn is_dropped(&self, name: &str) -> bool {
        self.dropped.iter().any(|d| d == name)
    }

    /// Check a column list without looking at any values.
    pub fn validate_columns(
        &self,
        columns: &[String],
        mode: ValidationMode,
    ) -> std::result::Result<(), SchemaMismatch> {
        let mut mismatch = SchemaMismatch::default();
        self.collect_column_issues(columns, mode, &mut mismatch);
        mismatch.into_result()
    }

    fn collect_column_issues(
        &self,
        columns: &[String],
        mode: ValidationMode,
        mismatch: &mut SchemaMismatch,
    ) {
        for spec in &self.columns {
            let required = mode == ValidationMode::Training || spec.name != self.target;
            if required && !columns.contains(&spec.name) {
                mismatch.missing.push(spec.name.clone());
            }
        }
        for name in columns {
            if self.column(name).is_none() && !self.is_dropped(name) {
                mismatch.unexpected.push(name.clone());
            }
        }
    }

    /// Check column presence, value castability and (in training mode) target completeness.
    ///
    /// Reports the first offending row per column. Never modifies the table.
    pub fn validate(
        &self,
        table: &Table,
        mode: ValidationMode,
    ) -> std::result::Result<(), SchemaMismatch> {
        let mut mismatch = SchemaMismatch::default();
        self.collect_column_issues(table.columns(), mode, &mut mismatch);
        for spec in &self.columns {
            let Some(idx) = table.column_index(&spec.name) else {
                continue;
            };
            let is_target = spec.name == self.target;
            for (row, value) in table.column_values(idx).enumerate() {
                if is_target && mode == ValidationMode::Training && value.is_null() {
                    mismatch.mismatched.push(TypeMismatch {
                        column: spec.name.clone(),
                        expected: spec.semantic_type,
                        row,
                        found: "missing target value".to_string(),
                    });
                    break;
                }
                if spec.semantic_type.cast(value).is_none() {
                    mismatch.mismatched.push(TypeMismatch {
                        column: spec.name.clone(),
                        expected: spec.semantic_type,
                        row,
                        found: value.to_string(),
                    });
                    break;
                }
            }
        }
        mismatch.into_result()
    }

    /// Validate, then return a copy in schema column order with every value cast.
    ///
    /// Dropped columns are removed. In inference mode an absent target is simply omitted.
    pub fn conform(&self, table: &Table, mode: ValidationMode) -> Result<Table> {
        self.validate(table, mode)?;
        let mut names = Vec::with_capacity(self.columns.len());
        let mut sources = Vec::with_capacity(self.columns.len());
        for spec in &self.columns {
            if let Some(idx) = table.column_index(&spec.name) {
                names.push(spec.name.clone());
                sources.push((idx, spec.semantic_type));
            }
        }
        let rows = table
            .rows()
            .iter()
            .map(|row| {
                sources
                    .iter()
                    .map(|&(idx, ty)| ty.cast(&row[idx]).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Table::new(names, rows)
    }
}

/// A column whose values cannot be cast to the declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMismatch {
    pub column: String,
    pub expected: SemanticType,
    /// First offending row.
    pub row: usize,
    pub found: String,
}

/// Every disagreement between a dataset and its schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaMismatch {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
    pub mismatched: Vec<TypeMismatch>,
}

impl SchemaMismatch {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }

    /// Names of every column involved, in report order.
    pub fn columns(&self) -> Vec<&str> {
        self.missing
            .iter()
            .chain(self.unexpected.iter())
            .map(String::as_str)
            .chain(self.mismatched.iter().map(|m| m.column.as_str()))
            .collect()
    }

    fn into_result(self) -> std::result::Result<(), SchemaMismatch> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for SchemaMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("schema mismatch:")?;
        if !self.missing.is_empty() {
            write!(f, " missing columns [{}];", self.missing.join(", "))?;
        }
        if !self.unexpected.is_empty() {
            write!(f, " undeclared columns [{}];", self.unexpected.join(", "))?;
        }
        for m in &self.mismatched {
            write!(
                f,
                " column `{}` expects {} but row {} has {};",
                m.column, m.expected, m.row, m.found
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for SchemaMismatch {}
