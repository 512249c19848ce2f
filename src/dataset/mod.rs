//! Distributed and materialized datasets, the bridge between them, and splitting.
//!
//! [`DistributedDataset`] and [`Table`] are deliberately separate types: the only way from one
//! to the other is [`materialize`], so the expensive collection step is visible at every call
//! site.

mod bridge;
mod partition;
mod split;
mod table;
mod value;

pub use bridge::{DEFAULT_MEMORY_BUDGET_BYTES, DistributedDataset, MaterializeOptions, materialize};
pub use partition::{CsvPartition, InMemoryPartition, PartitionSource};
pub use split::{Fold, Split, SplitId, holdout_indices, k_fold, split};
pub use table::Table;
pub use value::Value;
