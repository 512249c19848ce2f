//! Self-contained model bundles.
//!
//! An [`Artifact`] carries everything needed to serve predictions: the schema, the frozen
//! transform states, the target encoding and the fitted estimator. It is written as
//! `model.json` next to an `indicator.json` summary of its metrics.
//!
//! The identifier is a BLAKE3 digest of the canonical JSON body, excluding the identifier and
//! the creation time, so two runs that produce the same model produce the same id. Loading checks
//! the format version before decoding the body and re-derives the id afterwards.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::dataset::{Table, Value};
use crate::error::{CogniError, Result};
use crate::estimator::{EstimatorKind, FittedEstimator, Hyperparameters, Predictor, TargetEncoding};
use crate::evaluation::{MetricOutcome, MetricsReport};
use crate::schema::{Schema, ValidationMode};
use crate::transform::FittedTransforms;

/// Bundle layout version this build reads and writes.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;
pub const MODEL_FILE_NAME: &str = "model.json";
pub const INDICATOR_FILE_NAME: &str = "indicator.json";

/// Transforms, target encoding and estimator: the whole inference path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPipeline {
    pub transforms: FittedTransforms,
    pub target: TargetEncoding,
    pub estimator: FittedEstimator,
}

impl FittedPipeline {
    /// Predict target values for already conformed rows.
    pub fn predict(&self, rows: &Table) -> Result<Vec<Value>> {
        let x = self.transforms.features(rows)?;
        Ok(self
            .estimator
            .predict(x.view())
            .into_iter()
            .map(|p| self.target.decode(p))
            .collect())
    }
}

/// How the packaged model was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub process_id: String,
    pub estimator: EstimatorKind,
    pub seed: u64,
    pub deterministic: bool,
    /// Rows the packaged estimator was fit on.
    pub training_rows: usize,
    pub score_metric: String,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub format_version: u32,
    pub artifact_id: String,
    /// RFC 3339, UTC.
    pub created_at: String,
    pub schema: Schema,
    pub pipeline: FittedPipeline,
    pub metrics: MetricsReport,
    /// Resolved hyperparameters, defaults included.
    pub hyperparameters: Hyperparameters,
    pub training: TrainingRecord,
}

/// Hashed portion of an artifact, borrowed so hashing never clones the model.
#[derive(Serialize)]
struct Body<'a> {
    format_version: u32,
    schema: &'a Schema,
    pipeline: &'a FittedPipeline,
    metrics: &'a MetricsReport,
    hyperparameters: &'a Hyperparameters,
    training: &'a TrainingRecord,
}

/// Summary written next to the model for the hosting platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicators {
    pub artifact_id: String,
    pub score_metric: String,
    pub score: Option<f64>,
    pub metrics: BTreeMap<String, MetricOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folds: Option<usize>,
}

/// Bundle a trained pipeline with its provenance.
pub fn package(
    pipeline: FittedPipeline,
    schema: Schema,
    metrics: MetricsReport,
    hyperparameters: Hyperparameters,
    training: TrainingRecord,
) -> Result<Artifact> {
    let created_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|err| CogniError::Training(format!("failed to format creation time: {err}")))?;
    let mut artifact = Artifact {
        format_version: ARTIFACT_FORMAT_VERSION,
        artifact_id: String::new(),
        created_at,
        schema,
        pipeline,
        metrics,
        hyperparameters,
        training,
    };
    artifact.artifact_id = artifact.content_id()?;
    tracing::info!(artifact_id = %artifact.artifact_id, "Artifact packaged");
    Ok(artifact)
}

impl Artifact {
    /// BLAKE3 hex digest of the canonical body.
    pub fn content_id(&self) -> Result<String> {
        let body = Body {
            format_version: self.format_version,
            schema: &self.schema,
            pipeline: &self.pipeline,
            metrics: &self.metrics,
            hyperparameters: &self.hyperparameters,
            training: &self.training,
        };
        let bytes = serde_json::to_vec(&body)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    /// Validate `rows` against the schema, replay the transforms and predict.
    ///
    /// Columns the schema lists as dropped are removed; a target column, if present, is unused.
    pub fn predict(&self, rows: &Table) -> Result<Vec<Value>> {
        let conformed = self.schema.conform(rows, ValidationMode::Inference)?;
        self.pipeline.predict(&conformed)
    }

    pub fn indicators(&self) -> Indicators {
        Indicators {
            artifact_id: self.artifact_id.clone(),
            score_metric: self.training.score_metric.clone(),
            score: self.training.score,
            metrics: self.metrics.metrics.clone(),
            folds: self.metrics.folds,
        }
    }

    /// Write `model.json` and `indicator.json` into `dir`, each atomically.
    ///
    /// Returns the path of `model.json`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|err| CogniError::io(dir, err))?;
        let model_path = dir.join(MODEL_FILE_NAME);
        write_atomic(&model_path, &serde_json::to_vec_pretty(self)?)?;
        write_atomic(
            &dir.join(INDICATOR_FILE_NAME),
            &serde_json::to_vec_pretty(&self.indicators())?,
        )?;
        tracing::info!(path = %model_path.display(), "Artifact saved");
        Ok(model_path)
    }

    /// Read an artifact from a `model.json` path or from the directory holding one.
    pub fn load(path: &Path) -> Result<Self> {
        let path = if path.is_dir() {
            path.join(MODEL_FILE_NAME)
        } else {
            path.to_path_buf()
        };
        let bytes = std::fs::read(&path).map_err(|err| CogniError::io(&path, err))?;
        let corrupt = |reason: String| CogniError::ArtifactCorrupt {
            path: path.clone(),
            reason,
        };

        let raw: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|err| corrupt(err.to_string()))?;
        let found = raw
            .get("format_version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| corrupt("missing `format_version`".to_string()))?;
        if found != u64::from(ARTIFACT_FORMAT_VERSION) {
            return Err(CogniError::IncompatibleArtifactVersion {
                found: u32::try_from(found).unwrap_or(u32::MAX),
                supported: ARTIFACT_FORMAT_VERSION,
            });
        }

        let artifact: Artifact =
            serde_json::from_value(raw).map_err(|err| corrupt(err.to_string()))?;
        let expected = artifact.content_id()?;
        if expected != artifact.artifact_id {
            return Err(corrupt(format!(
                "content hashes to {expected} but the recorded id is {}",
                artifact.artifact_id
            )));
        }
        tracing::debug!(artifact_id = %artifact.artifact_id, "Artifact loaded");
        Ok(artifact)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".cognimaker")
        .tempfile_in(dir)
        .map_err(|err| CogniError::io(dir, err))?;
    temp.write_all(bytes)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|err| CogniError::io(temp.path(), err))?;
    temp.persist(path)
        .map_err(|err| CogniError::io(path, err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SplitId;
    use crate::estimator::{LinearModel, Task};
    use crate::schema::{ColumnSpec, SemanticType};
    use crate::transform::TransformPipeline;
    use tempfile::tempdir;

    fn artifact() -> Artifact {
        let schema = Schema::new(
            vec![
                ColumnSpec::new("x", SemanticType::Numeric),
                ColumnSpec::new("y", SemanticType::Numeric),
            ],
            "y",
        )
        .unwrap();
        let train = Table::new(
            vec!["x".into(), "y".into()],
            vec![vec![1.0.into(), 3.0.into()], vec![2.0.into(), 5.0.into()]],
        )
        .unwrap();
        let transforms = TransformPipeline::default().fit(&train, "y").unwrap();
        let pipeline = FittedPipeline {
            transforms,
            target: TargetEncoding::Continuous { column: "y".into() },
            estimator: FittedEstimator::Linear(LinearModel {
                coefficients: vec![0.1 + 0.2],
                intercept: 1.0 / 3.0,
            }),
        };
        let metrics = MetricsReport {
            split: SplitId::Holdout {
                train_fraction: 0.5,
                seed: 1,
                train_rows: 1,
                eval_rows: 1,
            },
            metrics: BTreeMap::from([("rmse".to_string(), MetricOutcome::Value(0.25))]),
            folds: None,
        };
        let training = TrainingRecord {
            process_id: "test".into(),
            estimator: EstimatorKind::Linear,
            seed: 1,
            deterministic: true,
            training_rows: 2,
            score_metric: "rmse".into(),
            score: Some(0.25),
        };
        assert_eq!(pipeline.target.task(), Task::Regression);
        package(pipeline, schema, metrics, Hyperparameters::new(), training).unwrap()
    }

    fn inference_rows() -> Table {
        Table::new(
            vec!["x".into()],
            vec![vec![Value::from(0.7)], vec![Value::from("12.5")]],
        )
        .unwrap()
    }

    #[test]
    fn save_load_reproduces_predictions_bit_for_bit() {
        let dir = tempdir().unwrap();
        let original = artifact();
        let path = original.save(dir.path()).unwrap();
        assert!(dir.path().join(INDICATOR_FILE_NAME).is_file());
        let loaded = Artifact::load(&path).unwrap();
        assert_eq!(loaded, original);
        let a = original.predict(&inference_rows()).unwrap();
        let b = loaded.predict(&inference_rows()).unwrap();
        for (x, y) in a.iter().zip(&b) {
            match (x, y) {
                (Value::Number(x), Value::Number(y)) => assert_eq!(x.to_bits(), y.to_bits()),
                other => panic!("unexpected predictions {other:?}"),
            }
        }
    }

    #[test]
    fn id_ignores_creation_time() {
        let mut a = artifact();
        let b = artifact();
        a.created_at = "1970-01-01T00:00:00Z".into();
        assert_eq!(a.content_id().unwrap(), b.artifact_id);
    }

    #[test]
    fn newer_format_is_rejected_before_decoding() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MODEL_FILE_NAME);
        std::fs::write(&path, r#"{"format_version": 99, "anything": "else"}"#).unwrap();
        assert!(matches!(
            Artifact::load(&path),
            Err(CogniError::IncompatibleArtifactVersion {
                found: 99,
                supported: ARTIFACT_FORMAT_VERSION
            })
        ));
    }

    #[test]
    fn tampered_body_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = artifact().save(dir.path()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("\"intercept\"", "\"intercept\": 9.0, \"_\"")).unwrap();
        let err = Artifact::load(dir.path()).unwrap_err();
        assert!(matches!(err, CogniError::ArtifactCorrupt { .. }), "{err}");
    }

    #[test]
    fn inference_rows_must_match_schema() {
        let rows = Table::new(vec!["z".into()], vec![vec![1.0.into()]]).unwrap();
        assert!(matches!(
            artifact().predict(&rows),
            Err(CogniError::SchemaMismatch(_))
        ));
    }
}
