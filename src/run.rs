//! End-to-end training run: materialize, split, fit, evaluate, package.

use ndarray::Array2;

use crate::artifact::{self, Artifact, FittedPipeline, TrainingRecord};
use crate::config::{EvaluationPlan, RunConfig};
use crate::dataset::{self, DistributedDataset, SplitId, Table};
use crate::error::{CogniError, Result};
use crate::estimator::{self, Hyperparameters, Predictor, Target, TargetEncoding};
use crate::evaluation::{self, MetricsReport};
use crate::schema::Schema;

/// Score line scraped by the hosting platform.
pub fn score_line(score: f64) -> String {
    format!("MODEL_SCORE={score};")
}

/// One configured training job over a fixed schema.
#[derive(Debug, Clone)]
pub struct TrainingRun {
    schema: Schema,
    config: RunConfig,
}

struct Fitted {
    pipeline: FittedPipeline,
    resolved: Hyperparameters,
    rows: usize,
}

impl TrainingRun {
    /// Check the configuration up front; nothing is read until [`execute`](Self::execute).
    pub fn new(schema: Schema, config: RunConfig) -> Result<Self> {
        config
            .estimator
            .check_hyperparameters(&config.hyperparameters)?;
        config.validate()?;
        Ok(Self { schema, config })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Run every stage and return the packaged artifact.
    pub fn execute(&self, data: &DistributedDataset) -> Result<Artifact> {
        let span = tracing::info_span!("training_run", process_id = %self.config.process_id);
        let _enter = span.enter();
        tracing::info!(estimator = %self.config.estimator, "Starting training");
        self.execute_inner(data)
            .inspect(|artifact| {
                tracing::info!(artifact_id = %artifact.artifact_id, "Training complete");
            })
            .inspect_err(|err| tracing::error!(error = %err, "Training failed"))
    }

    fn execute_inner(&self, data: &DistributedDataset) -> Result<Artifact> {
        let table = dataset::materialize(data, &self.schema, &self.config.materialize_options())?;
        tracing::info!(rows = table.len(), "Data materialized");

        let encoding = TargetEncoding::infer(&self.schema, &table)?;
        let task = encoding.task();
        if !self.config.estimator.supports(task) {
            return Err(CogniError::UnsupportedTask {
                estimator: self.config.estimator.as_str().to_string(),
                task: task.as_str().to_string(),
            });
        }
        let score_metric = self.config.score_metric_name(task);
        let mut metric_names = self.config.metric_names(task);
        if !metric_names.contains(&score_metric) {
            metric_names.push(score_metric.clone());
        }

        let (fitted, report) = match self.config.evaluation.resolve(table.len()) {
            EvaluationPlan::CrossValidation { folds, repeats } => {
                self.cross_validate(&table, &encoding, &metric_names, folds, repeats)?
            }
            EvaluationPlan::Holdout { train_fraction } | EvaluationPlan::Auto { train_fraction, .. } => {
                let split = dataset::split(&table, train_fraction, self.config.seed)?;
                tracing::info!(split = %split.id, "Holdout split");
                let fitted = self.fit(&split.train, &encoding)?;
                let report = self.evaluate(&fitted, &split.eval, &metric_names, split.id)?;
                (fitted, report)
            }
        };

        let score = report.value(&score_metric);
        match score {
            Some(score) => tracing::info!("{}", score_line(score)),
            None => tracing::warn!(metric = %score_metric, "Score metric could not be computed"),
        }

        let training = TrainingRecord {
            process_id: self.config.process_id.clone(),
            estimator: self.config.estimator,
            seed: self.config.seed,
            deterministic: fitted.pipeline.estimator.is_deterministic(),
            training_rows: fitted.rows,
            score_metric,
            score,
        };
        artifact::package(
            fitted.pipeline,
            self.schema.clone(),
            report,
            fitted.resolved,
            training,
        )
    }

    fn fit(&self, train: &Table, encoding: &TargetEncoding) -> Result<Fitted> {
        let transforms = self.config.transforms.fit(train, self.schema.target())?;
        let x = transforms.features(train)?;
        let y = encoding.encode(train)?;
        let trained = estimator::train(
            self.config.estimator,
            x.view(),
            &y,
            &self.config.hyperparameters,
            self.config.seed,
        )?;
        Ok(Fitted {
            pipeline: FittedPipeline {
                transforms,
                target: encoding.clone(),
                estimator: trained.estimator,
            },
            resolved: trained.resolved,
            rows: train.len(),
        })
    }

    fn evaluate(
        &self,
        fitted: &Fitted,
        eval: &Table,
        metric_names: &[String],
        split: SplitId,
    ) -> Result<MetricsReport> {
        let (x, y) = eval_inputs(&fitted.pipeline, eval)?;
        Ok(evaluation::evaluate(
            &fitted.pipeline.estimator,
            x.view(),
            &y,
            metric_names,
            split,
        ))
    }

    /// Fold-averaged metrics, then a final fit on every row.
    fn cross_validate(
        &self,
        table: &Table,
        encoding: &TargetEncoding,
        metric_names: &[String],
        folds: usize,
        repeats: usize,
    ) -> Result<(Fitted, MetricsReport)> {
        let target = encoding.encode(table)?;
        let labels = match &target {
            Target::Classes { labels, .. } => Some(labels.as_slice()),
            Target::Continuous(_) => None,
        };
        let id = SplitId::CrossValidation {
            folds,
            repeats,
            seed: self.config.seed,
            stratified: labels.is_some(),
        };
        tracing::info!(split = %id, "Cross-validating");
        let assignments = dataset::k_fold(table.len(), labels, folds, repeats, self.config.seed)?;
        let mut reports = Vec::with_capacity(assignments.len());
        for (index, fold) in assignments.iter().enumerate() {
            let train = table.select_rows(&fold.train);
            let eval = table.select_rows(&fold.eval);
            let fitted = self.fit(&train, encoding)?;
            let report = self.evaluate(&fitted, &eval, metric_names, id.clone())?;
            tracing::debug!(fold = index, "Fold evaluated");
            reports.push(report);
        }
        let report = evaluation::average(&reports, id);
        let fitted = self.fit(table, encoding)?;
        Ok((fitted, report))
    }
}

fn eval_inputs(pipeline: &FittedPipeline, eval: &Table) -> Result<(Array2<f64>, Target)> {
    let x = pipeline.transforms.features(eval)?;
    let y = pipeline.target.encode(eval)?;
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;
    use crate::estimator::EstimatorKind;
    use crate::schema::{ColumnSpec, SemanticType};

    fn regression_data() -> (Schema, DistributedDataset) {
        let schema = Schema::new(
            vec![
                ColumnSpec::new("x", SemanticType::Numeric),
                ColumnSpec::new("y", SemanticType::Numeric),
            ],
            "y",
        )
        .unwrap();
        let rows = (0..40)
            .map(|i| {
                let x = i as f64;
                vec![Value::Number(x), Value::Number(2.0 * x + 1.0)]
            })
            .collect();
        let table = Table::new(vec!["x".into(), "y".into()], rows).unwrap();
        (schema, DistributedDataset::from_tables(vec![table]))
    }

    #[test]
    fn score_line_matches_scraper_format() {
        assert_eq!(score_line(0.5), "MODEL_SCORE=0.5;");
    }

    #[test]
    fn cross_validation_refits_on_every_row() {
        let (schema, data) = regression_data();
        let mut config = RunConfig::new(EstimatorKind::Linear);
        config.evaluation = EvaluationPlan::CrossValidation {
            folds: 4,
            repeats: 2,
        };
        config.metrics = vec!["r2".into(), "mae".into()];
        let artifact = TrainingRun::new(schema, config).unwrap().execute(&data).unwrap();
        assert_eq!(artifact.metrics.folds, Some(8));
        assert_eq!(artifact.training.training_rows, 40);
        assert_eq!(artifact.training.score_metric, "r2");
        assert!(artifact.metrics.value("r2").unwrap() > 0.99);
    }

    #[test]
    fn incompatible_estimator_fails_before_fitting() {
        let (schema, data) = regression_data();
        let run = TrainingRun::new(schema, RunConfig::new(EstimatorKind::Logistic)).unwrap();
        assert!(matches!(
            run.execute(&data),
            Err(CogniError::UnsupportedTask { .. })
        ));
    }

    #[test]
    fn misspelled_hyperparameter_is_rejected_before_any_data_is_read() {
        let (schema, _) = regression_data();
        let mut config = RunConfig::new(EstimatorKind::Linear);
        config
            .hyperparameters
            .insert("alpah".into(), crate::estimator::HyperValue::Float(0.5));
        match TrainingRun::new(schema, config) {
            Err(CogniError::UnknownHyperparameter { estimator, key }) => {
                assert_eq!(estimator, "linear");
                assert_eq!(key, "alpah");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let (schema, _) = regression_data();
        let mut config = RunConfig::new(EstimatorKind::Linear);
        config.evaluation = EvaluationPlan::Holdout {
            train_fraction: 1.5,
        };
        assert!(matches!(
            TrainingRun::new(schema, config),
            Err(CogniError::Config(_))
        ));
    }
}
