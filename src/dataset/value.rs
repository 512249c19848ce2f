use std::fmt;

use serde::{Deserialize, Serialize};

/// A single table cell.
///
/// Deserializes untagged, so a JSON row such as `{"age": 30, "city": "NYC"}` maps directly onto
/// `Number` and `Text`. Timestamps arrive as numbers or RFC 3339 text and are canonicalized by
/// [`Schema::conform`](crate::schema::Schema::conform).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    /// Seconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view used when building feature matrices.
    ///
    /// Text never converts here; categorical columns must be encoded by a transform first.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) if !v.is_nan() => Some(*v),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Timestamp(secs) => Some(*secs as f64),
            _ => None,
        }
    }

    /// Stable string key for categorical encoding; `None` for missing values.
    pub fn category_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(v) if v.is_nan() => None,
            Value::Number(v) => Some(format_number(*v)),
            Value::Text(s) => Some(s.clone()),
            Value::Timestamp(secs) => Some(secs.to_string()),
        }
    }

    /// Form that survives a JSON round trip unchanged. Untagged timestamps would come back as
    /// numbers, so they are stored as numbers up front.
    pub fn portable(self) -> Value {
        match self {
            Value::Timestamp(secs) => Value::Number(secs as f64),
            other => other,
        }
    }

    /// Approximate in-memory footprint, used by the materialization budget.
    pub fn estimated_bytes(&self) -> u64 {
        let base = std::mem::size_of::<Value>() as u64;
        match self {
            Value::Text(s) => base + s.capacity() as u64,
            _ => base,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(v) => f.write_str(&format_number(*v)),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Timestamp(secs) => write!(f, "@{secs}"),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Integral floats print without a fractional part so `3.0` and `3` share a category.
fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_keys_unify_integral_numbers() {
        assert_eq!(Value::Number(3.0).category_key().as_deref(), Some("3"));
        assert_eq!(Value::Number(2.5).category_key().as_deref(), Some("2.5"));
        assert_eq!(Value::Null.category_key(), None);
        assert_eq!(Value::Number(f64::NAN).category_key(), None);
    }

    #[test]
    fn json_rows_deserialize_untagged() {
        let row: Vec<Value> = serde_json::from_str(r#"[30, "NYC", true, null]"#).unwrap();
        assert_eq!(
            row,
            vec![
                Value::Number(30.0),
                Value::Text("NYC".into()),
                Value::Bool(true),
                Value::Null
            ]
        );
    }
}
