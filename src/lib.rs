//! Library exports for reuse in benchmarks and tests.
/// Application directory resolution.
pub mod app_dirs;
/// Versioned, content-addressed model bundles.
pub mod artifact;
/// Run configuration loading and defaults.
pub mod config;
/// Partitioned datasets, materialization and splitting.
pub mod dataset;
/// Crate-wide error taxonomy.
pub mod error;
/// Estimator families behind one fit/predict capability.
pub mod estimator;
/// Named metrics and evaluation reports.
pub mod evaluation;
/// Hand-off of artifacts to a hosting environment.
pub mod gateway;
/// Process-tagged tracing setup for runs.
pub mod logging;
/// Training run orchestration.
pub mod run;
/// Column declarations and validation.
pub mod schema;
/// Feature transforms fit at training time and replayed at inference.
pub mod transform;

pub use artifact::Artifact;
pub use config::RunConfig;
pub use dataset::{DistributedDataset, Table, Value};
pub use error::{CogniError, Result};
pub use estimator::EstimatorKind;
pub use gateway::{DeploymentGateway, LocalDirectoryGateway};
pub use run::TrainingRun;
pub use schema::{ColumnSpec, Schema, SemanticType};
