//! Metrics reports for a fitted estimator on held-out rows.
//!
//! A metric that cannot be computed (unknown name, wrong task, missing probabilities) becomes an
//! error marker in the report instead of failing the whole evaluation.

pub mod metrics;

use std::collections::BTreeMap;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::dataset::SplitId;
use crate::estimator::{Predictor, Target};
use metrics::Observations;

pub use metrics::Metric;

/// Result of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricOutcome {
    Value(f64),
    Error(String),
}

impl MetricOutcome {
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricOutcome::Value(v) => Some(*v),
            MetricOutcome::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, MetricOutcome::Error(_))
    }
}

/// Metric outcomes tagged with the split they were computed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub split: SplitId,
    pub metrics: BTreeMap<String, MetricOutcome>,
    /// Number of folds averaged, for cross-validation reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folds: Option<usize>,
}

impl MetricsReport {
    pub fn get(&self, name: &str) -> Option<&MetricOutcome> {
        self.metrics.get(name)
    }

    /// Value of `name`, `None` when absent or marked as an error.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(MetricOutcome::value)
    }
}

/// Score `estimator` on `x_eval`/`y_eval` with every metric in `metric_names`.
pub fn evaluate(
    estimator: &dyn Predictor,
    x_eval: ArrayView2<'_, f64>,
    y_eval: &Target,
    metric_names: &[String],
    split: SplitId,
) -> MetricsReport {
    let y_pred = estimator.predict(x_eval);
    let proba = estimator.predict_proba(x_eval);
    let y_true = y_eval.as_f64();
    let n_classes = match y_eval {
        Target::Classes { n_classes, .. } => *n_classes,
        Target::Continuous(_) => 0,
    };
    let observations = Observations {
        task: y_eval.task(),
        y_true: &y_true,
        y_pred: &y_pred,
        proba: proba.as_ref().map(|p| p.view()),
        n_classes,
    };

    let metrics = metric_names
        .iter()
        .map(|name| {
            let outcome = match name.parse::<Metric>() {
                Ok(metric) => match metrics::compute(metric, &observations) {
                    Ok(value) => MetricOutcome::Value(value),
                    Err(reason) => MetricOutcome::Error(reason),
                },
                Err(err) => MetricOutcome::Error(err.to_string()),
            };
            if let MetricOutcome::Error(reason) = &outcome {
                tracing::warn!(metric = %name, %reason, "Metric not computed");
            }
            (name.clone(), outcome)
        })
        .collect();
    MetricsReport {
        split,
        metrics,
        folds: None,
    }
}

/// Average fold reports. A metric that failed on any fold is marked with that fold's error.
pub fn average(reports: &[MetricsReport], split: SplitId) -> MetricsReport {
    let mut metrics = BTreeMap::new();
    let names = reports.iter().flat_map(|r| r.metrics.keys()).cloned();
    for name in names {
        if metrics.contains_key(&name) {
            continue;
        }
        let mut sum = 0.0;
        let mut outcome = None;
        for (fold, report) in reports.iter().enumerate() {
            match report.get(&name) {
                Some(MetricOutcome::Value(v)) => sum += v,
                Some(MetricOutcome::Error(reason)) => {
                    outcome = Some(MetricOutcome::Error(format!("fold {fold}: {reason}")));
                    break;
                }
                None => {
                    outcome = Some(MetricOutcome::Error(format!("fold {fold}: not computed")));
                    break;
                }
            }
        }
        let outcome =
            outcome.unwrap_or_else(|| MetricOutcome::Value(sum / reports.len() as f64));
        metrics.insert(name, outcome);
    }
    MetricsReport {
        split,
        metrics,
        folds: Some(reports.len()),
    }
}
