use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;

use super::{Table, Value};
use crate::error::{CogniError, Result};

/// Rough ratio between CSV bytes on disk and collected cells in memory.
///
/// Short numeric fields expand the most (a two-byte field becomes a full `Value`).
const CSV_EXPANSION_FACTOR: u64 = 16;

/// One partition of a distributed dataset.
///
/// Implementations are evaluated lazily: nothing is read until [`collect`](Self::collect) runs,
/// and the bridge calls [`estimated_bytes`](Self::estimated_bytes) first to enforce its budget.
pub trait PartitionSource: Send + Sync {
    /// Upper-bound estimate of the collected size, computed without reading the rows.
    fn estimated_bytes(&self) -> Result<u64>;

    /// Evaluate the partition. Row order within the partition must be stable.
    fn collect(&self) -> Result<Table>;

    /// Human-readable label for logs.
    fn describe(&self) -> String;
}

/// Partition backed by an already-built table.
#[derive(Debug, Clone)]
pub struct InMemoryPartition {
    table: Table,
}

impl InMemoryPartition {
    pub fn new(table: Table) -> Self {
        Self { table }
    }
}

impl PartitionSource for InMemoryPartition {
    fn estimated_bytes(&self) -> Result<u64> {
        Ok(self.table.estimated_bytes())
    }

    fn collect(&self) -> Result<Table> {
        Ok(self.table.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory ({} rows)", self.table.len())
    }
}

/// Partition backed by one headered CSV file.
///
/// Every field is read as text (empty fields as `Null`); typing happens when the bridge conforms
/// the collected rows to the schema.
#[derive(Debug, Clone)]
pub struct CsvPartition {
    path: PathBuf,
    delimiter: u8,
}

impl CsvPartition {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn csv_error(&self, err: csv::Error) -> CogniError {
        CogniError::Partition {
            index: 0,
            reason: format!("{}: {err}", self.path.display()),
        }
    }
}

impl PartitionSource for CsvPartition {
    fn estimated_bytes(&self) -> Result<u64> {
        let meta = std::fs::metadata(&self.path).map_err(|err| CogniError::io(&self.path, err))?;
        Ok(meta.len().saturating_mul(CSV_EXPANSION_FACTOR))
    }

    fn collect(&self) -> Result<Table> {
        let file = File::open(&self.path).map_err(|err| CogniError::io(&self.path, err))?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .trim(csv::Trim::All)
            .from_reader(BufReader::new(file));
        let columns: Vec<String> = reader
            .headers()
            .map_err(|err| self.csv_error(err))?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| self.csv_error(err))?;
            rows.push(
                record
                    .iter()
                    .map(|field| {
                        if field.is_empty() {
                            Value::Null
                        } else {
                            Value::Text(field.to_string())
                        }
                    })
                    .collect(),
            );
        }
        Table::new(columns, rows)
    }

    fn describe(&self) -> String {
        format!("csv {}", self.path.display())
    }
}
