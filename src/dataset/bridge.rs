use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use super::{CsvPartition, InMemoryPartition, PartitionSource, Table};
use crate::error::{CogniError, Result};
use crate::schema::{Schema, ValidationMode};

/// Default materialization budget: 512 MiB.
pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 512 * 1024 * 1024;

/// Partitioned, lazily-evaluated dataset with no global row order.
#[derive(Clone)]
pub struct DistributedDataset {
    partitions: Vec<Arc<dyn PartitionSource>>,
}

impl std::fmt::Debug for DistributedDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedDataset")
            .field(
                "partitions",
                &self.partitions.iter().map(|p| p.describe()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl DistributedDataset {
    pub fn new(partitions: Vec<Arc<dyn PartitionSource>>) -> Self {
        Self { partitions }
    }

    /// Wrap already-built tables, one partition each.
    pub fn from_tables(tables: Vec<Table>) -> Self {
        Self::new(
            tables
                .into_iter()
                .map(|t| Arc::new(InMemoryPartition::new(t)) as Arc<dyn PartitionSource>)
                .collect(),
        )
    }

    /// Treat every non-hidden file of `dir` as one CSV partition, in file-name order.
    pub fn from_csv_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|err| CogniError::io(dir, err))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| CogniError::io(dir, err))?;
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with('.'));
            if path.is_file() && !hidden {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(CogniError::invalid_argument(
                "input_dir",
                format!(
                    "no input files in {}; check the data location and access permissions",
                    dir.display()
                ),
            ));
        }
        files.sort();
        Ok(Self::new(
            files
                .into_iter()
                .map(|path| Arc::new(CsvPartition::new(path)) as Arc<dyn PartitionSource>)
                .collect(),
        ))
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partitions(&self) -> &[Arc<dyn PartitionSource>] {
        &self.partitions
    }
}

/// Admission and deadline settings for [`materialize`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterializeOptions {
    pub memory_budget_bytes: u64,
    /// Deadline on the collection call only; `None` waits indefinitely.
    pub deadline: Option<Duration>,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            deadline: None,
        }
    }
}

/// Collect every partition into one ordered table conforming to `schema`.
///
/// Size is estimated from the partition sources before any row is read. Rows are ordered by
/// partition index, then by their order inside the partition; columns follow the schema.
pub fn materialize(
    dataset: &DistributedDataset,
    schema: &Schema,
    options: &MaterializeOptions,
) -> Result<Table> {
    let started = Instant::now();
    let mut estimated: u64 = 0;
    for partition in &dataset.partitions {
        estimated = estimated.saturating_add(partition.estimated_bytes()?);
    }
    if estimated > options.memory_budget_bytes {
        tracing::warn!(
            estimated,
            budget = options.memory_budget_bytes,
            "Refusing to materialize dataset over budget"
        );
        return Err(CogniError::ResourceExhausted {
            estimated_bytes: estimated,
            budget_bytes: options.memory_budget_bytes,
        });
    }
    tracing::info!(
        partitions = dataset.partition_count(),
        estimated_bytes = estimated,
        "Materializing dataset"
    );

    let collected = collect_partitions(&dataset.partitions, options.deadline)?;
    let mut table = Table::empty(
        schema
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .collect(),
    )?;
    for (index, partition) in collected.into_iter().enumerate() {
        let rows = partition.len();
        let conformed = schema
            .conform(&partition, ValidationMode::Training)
            .inspect_err(|err| tracing::warn!(partition = index, "Partition rejected: {err}"))?;
        tracing::debug!(partition = index, rows, "Partition collected");
        table.extend(conformed)?;
    }

    let measured = table.estimated_bytes();
    if measured > options.memory_budget_bytes {
        return Err(CogniError::ResourceExhausted {
            estimated_bytes: measured,
            budget_bytes: options.memory_budget_bytes,
        });
    }
    tracing::info!(
        rows = table.len(),
        bytes = measured,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Dataset materialized"
    );
    Ok(table)
}

fn collect_partitions(
    partitions: &[Arc<dyn PartitionSource>],
    deadline: Option<Duration>,
) -> Result<Vec<Table>> {
    let partitions = partitions.to_vec();
    let collect = move || {
        partitions
            .par_iter()
            .enumerate()
            .map(|(index, partition)| {
                partition.collect().map_err(|err| match err {
                    CogniError::SchemaMismatch(_) => err,
                    other => CogniError::Partition {
                        index,
                        reason: other.to_string(),
                    },
                })
            })
            .collect::<Result<Vec<_>>>()
    };
    let Some(limit) = deadline else {
        return collect();
    };

    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("cognimaker-collect".to_string())
        .spawn(move || {
            let _ = tx.send(collect());
        })
        .map_err(|err| CogniError::io("cognimaker-collect", err))?;
    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(CogniError::DeadlineExceeded {
            deadline_ms: limit.as_millis(),
        }),
        Err(RecvTimeoutError::Disconnected) => Err(CogniError::Partition {
            index: 0,
            reason: "collection thread exited without a result".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;
    use crate::schema::{ColumnSpec, SemanticType};

    fn schema() -> Schema {
        Schema::new(
            vec![
                ColumnSpec::new("x", SemanticType::Numeric),
                ColumnSpec::new("y", SemanticType::Boolean),
            ],
            "y",
        )
        .unwrap()
    }

    fn part(start: usize, n: usize) -> Table {
        Table::new(
            vec!["y".into(), "x".into()],
            (start..start + n)
                .map(|i| vec![Value::Bool(i % 2 == 0), Value::Number(i as f64)])
                .collect(),
        )
        .unwrap()
    }

    struct SlowPartition;

    impl PartitionSource for SlowPartition {
        fn estimated_bytes(&self) -> Result<u64> {
            Ok(1)
        }

        fn collect(&self) -> Result<Table> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(part(0, 1))
        }

        fn describe(&self) -> String {
            "slow".into()
        }
    }

    struct OversizedPartition;

    impl PartitionSource for OversizedPartition {
        fn estimated_bytes(&self) -> Result<u64> {
            Ok(u64::MAX)
        }

        fn collect(&self) -> Result<Table> {
            panic!("must not be collected when over budget");
        }

        fn describe(&self) -> String {
            "oversized".into()
        }
    }

    #[test]
    fn preserves_rows_and_orders_by_partition() {
        let dataset = DistributedDataset::from_tables(vec![part(0, 3), part(3, 4)]);
        let table = materialize(&dataset, &schema(), &MaterializeOptions::default()).unwrap();
        assert_eq!(table.columns(), &["x", "y"]);
        assert_eq!(table.len(), 7);
        let xs: Vec<f64> = table.column_values(0).filter_map(Value::as_f64).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn over_budget_fails_before_collecting() {
        let dataset = DistributedDataset::new(vec![Arc::new(OversizedPartition)]);
        let err = materialize(&dataset, &schema(), &MaterializeOptions::default()).unwrap_err();
        assert!(matches!(err, CogniError::ResourceExhausted { .. }));
    }

    #[test]
    fn tight_budget_rejects_small_dataset() {
        let dataset = DistributedDataset::from_tables(vec![part(0, 10)]);
        let options = MaterializeOptions {
            memory_budget_bytes: 16,
            deadline: None,
        };
        assert!(matches!(
            materialize(&dataset, &schema(), &options),
            Err(CogniError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn deadline_applies_to_collection() {
        let dataset = DistributedDataset::new(vec![Arc::new(SlowPartition)]);
        let options = MaterializeOptions {
            deadline: Some(Duration::from_millis(20)),
            ..MaterializeOptions::default()
        };
        let err = materialize(&dataset, &schema(), &options).unwrap_err();
        assert!(matches!(err, CogniError::DeadlineExceeded { .. }));
    }

    #[test]
    fn partition_with_missing_column_is_a_schema_mismatch() {
        let bad = Table::new(vec!["x".into()], vec![vec![Value::Number(1.0)]]).unwrap();
        let dataset = DistributedDataset::from_tables(vec![part(0, 2), bad]);
        let err = materialize(&dataset, &schema(), &MaterializeOptions::default()).unwrap_err();
        match err {
            CogniError::SchemaMismatch(mismatch) => assert_eq!(mismatch.missing, vec!["y"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn csv_directory_becomes_partitions_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.csv"), "x,y\n3,1\n").unwrap();
        std::fs::write(dir.path().join("a.csv"), "x,y\n1,0\n2,1\n").unwrap();
        std::fs::write(dir.path().join(".hidden"), "ignored").unwrap();
        let dataset = DistributedDataset::from_csv_dir(dir.path()).unwrap();
        assert_eq!(dataset.partition_count(), 2);
        let table = materialize(&dataset, &schema(), &MaterializeOptions::default()).unwrap();
        let xs: Vec<f64> = table.column_values(0).filter_map(Value::as_f64).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
        assert_eq!(table.rows()[0][1], Value::Bool(false));
    }

    #[test]
    fn empty_csv_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DistributedDataset::from_csv_dir(dir.path()),
            Err(CogniError::InvalidArgument { .. })
        ));
    }
}
