//! Estimator families behind one prediction capability.
//!
//! Each family lives in its own module with a `fit` function and a serializable model. The
//! [`FittedEstimator`] enum is the closed set stored in artifacts; [`train`] validates inputs,
//! checks the task and dispatches to the family.

mod gbdt;
mod hyper;
mod linear;
mod logistic;
mod target;
mod tree;

use std::fmt;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{CogniError, Result};

pub use gbdt::GbdtModel;
pub use hyper::{HyperValue, Hyperparameters};
pub use linear::LinearModel;
pub use logistic::LogisticModel;
pub use target::{Target, TargetEncoding, Task};
pub use tree::TreeModel;

pub(crate) use hyper::HyperReader;

/// Prediction capability shared by every fitted model.
pub trait Predictor {
    /// One output per row: a class index for classifiers, the value for regressors.
    fn predict(&self, x: ArrayView2<'_, f64>) -> Vec<f64>;

    /// Class probabilities, `rows x classes`. `None` when the model has no calibrated scores.
    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Option<Array2<f64>>;

    /// Whether refitting with the same seed reproduces this model exactly.
    fn is_deterministic(&self) -> bool {
        true
    }
}

/// Estimator family named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    Linear,
    Logistic,
    DecisionTree,
    Gbdt,
}

impl EstimatorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EstimatorKind::Linear => "linear",
            EstimatorKind::Logistic => "logistic",
            EstimatorKind::DecisionTree => "decision_tree",
            EstimatorKind::Gbdt => "gbdt",
        }
    }

    /// Hyperparameter keys the family understands.
    pub fn hyperparameter_keys(self) -> &'static [&'static str] {
        match self {
            EstimatorKind::Linear => linear::KEYS,
            EstimatorKind::Logistic => logistic::KEYS,
            EstimatorKind::DecisionTree => tree::KEYS,
            EstimatorKind::Gbdt => gbdt::KEYS,
        }
    }

    /// Reject keys the family does not understand, without looking at any data.
    pub fn check_hyperparameters(self, given: &Hyperparameters) -> Result<()> {
        HyperReader::new(self.as_str(), given, self.hyperparameter_keys()).map(|_| ())
    }

    pub fn supports(self, task: Task) -> bool {
        match self {
            EstimatorKind::Linear => task == Task::Regression,
            EstimatorKind::Logistic => task == Task::Classification,
            EstimatorKind::DecisionTree | EstimatorKind::Gbdt => true,
        }
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trained model of any family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedEstimator {
    Linear(LinearModel),
    Logistic(LogisticModel),
    DecisionTree(TreeModel),
    Gbdt(GbdtModel),
}

impl FittedEstimator {
    pub fn kind(&self) -> EstimatorKind {
        match self {
            FittedEstimator::Linear(_) => EstimatorKind::Linear,
            FittedEstimator::Logistic(_) => EstimatorKind::Logistic,
            FittedEstimator::DecisionTree(_) => EstimatorKind::DecisionTree,
            FittedEstimator::Gbdt(_) => EstimatorKind::Gbdt,
        }
    }

    fn as_predictor(&self) -> &dyn Predictor {
        match self {
            FittedEstimator::Linear(m) => m,
            FittedEstimator::Logistic(m) => m,
            FittedEstimator::DecisionTree(m) => m,
            FittedEstimator::Gbdt(m) => m,
        }
    }
}

impl Predictor for FittedEstimator {
    fn predict(&self, x: ArrayView2<'_, f64>) -> Vec<f64> {
        self.as_predictor().predict(x)
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Option<Array2<f64>> {
        self.as_predictor().predict_proba(x)
    }

    fn is_deterministic(&self) -> bool {
        self.as_predictor().is_deterministic()
    }
}

/// Output of [`train`].
#[derive(Debug, Clone)]
pub struct Trained {
    pub estimator: FittedEstimator,
    /// Every enumerated hyperparameter with the value actually used.
    pub resolved: Hyperparameters,
}

/// Fit `kind` on `x`/`y`.
///
/// Rejects unknown or invalid hyperparameters and unsupported tasks before any fitting work.
pub fn train(
    kind: EstimatorKind,
    x: ArrayView2<'_, f64>,
    y: &Target,
    hyperparameters: &Hyperparameters,
    seed: u64,
) -> Result<Trained> {
    if x.nrows() != y.len() {
        return Err(CogniError::invalid_argument(
            "y",
            format!("{} targets for {} feature rows", y.len(), x.nrows()),
        ));
    }
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(CogniError::invalid_argument(
            "x",
            format!("cannot train on a {}x{} matrix", x.nrows(), x.ncols()),
        ));
    }
    if let Some(((row, col), _)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(CogniError::invalid_argument(
            "x",
            format!("non-finite feature at row {row}, column {col}"),
        ));
    }
    if !kind.supports(y.task()) {
        return Err(CogniError::UnsupportedTask {
            estimator: kind.as_str().to_string(),
            task: y.task().as_str().to_string(),
        });
    }

    let (estimator, resolved) = match kind {
        EstimatorKind::Linear => {
            let (model, resolved) = linear::fit(x, y, hyperparameters)?;
            (FittedEstimator::Linear(model), resolved)
        }
        EstimatorKind::Logistic => {
            let (model, resolved) = logistic::fit(x, y, hyperparameters, seed)?;
            (FittedEstimator::Logistic(model), resolved)
        }
        EstimatorKind::DecisionTree => {
            let (model, resolved) = tree::fit(x, y, hyperparameters)?;
            (FittedEstimator::DecisionTree(model), resolved)
        }
        EstimatorKind::Gbdt => {
            let (model, resolved) = gbdt::fit(x, y, hyperparameters)?;
            (FittedEstimator::Gbdt(model), resolved)
        }
    };
    tracing::debug!(estimator = kind.as_str(), rows = x.nrows(), features = x.ncols(), "Estimator fitted");
    Ok(Trained {
        estimator,
        resolved,
    })
}

/// Numerically stable softmax.
pub(crate) fn softmax(raw: &[f64]) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut exps: Vec<f64> = raw.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![1.0 / raw.len() as f64; raw.len()];
    }
    for v in &mut exps {
        *v /= sum;
    }
    exps
}

/// Index of the largest value; the first one wins ties.
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best_idx = 0usize;
    let mut best_val = f64::NEG_INFINITY;
    for (idx, &v) in values.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = idx;
        }
    }
    best_idx
}

pub(crate) fn ensure_finite(estimator: &str, values: impl IntoIterator<Item = f64>) -> Result<()> {
    if values.into_iter().all(f64::is_finite) {
        Ok(())
    } else {
        Err(CogniError::Training(format!(
            "{estimator} produced non-finite parameters; try a smaller learning rate or scaling features"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn softmax_is_a_distribution() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(argmax(&p), 2);
        assert_eq!(softmax(&[1000.0, 1000.0]), vec![0.5, 0.5]);
    }

    #[test]
    fn unsupported_task_is_rejected_before_fitting() {
        let x = array![[0.0], [1.0]];
        let y = Target::Continuous(vec![0.0, 1.0]);
        let err = train(EstimatorKind::Logistic, x.view(), &y, &Hyperparameters::new(), 1)
            .unwrap_err();
        assert!(matches!(err, CogniError::UnsupportedTask { .. }));
        let y = Target::Classes {
            labels: vec![0, 1],
            n_classes: 2,
        };
        let err =
            train(EstimatorKind::Linear, x.view(), &y, &Hyperparameters::new(), 1).unwrap_err();
        assert!(matches!(err, CogniError::UnsupportedTask { .. }));
    }

    #[test]
    fn shape_mismatch_is_invalid() {
        let x = array![[0.0], [1.0]];
        let y = Target::Continuous(vec![0.0]);
        assert!(matches!(
            train(EstimatorKind::Linear, x.view(), &y, &Hyperparameters::new(), 1),
            Err(CogniError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn every_family_learns_a_separable_problem_and_roundtrips() {
        let x = array![[0.0, 1.0], [0.1, 0.9], [0.2, 1.1], [1.0, 0.0], [0.9, 0.1], [1.1, 0.2]];
        let y = Target::Classes {
            labels: vec![0, 0, 0, 1, 1, 1],
            n_classes: 2,
        };
        for kind in [
            EstimatorKind::Logistic,
            EstimatorKind::DecisionTree,
            EstimatorKind::Gbdt,
        ] {
            let mut params = Hyperparameters::new();
            if kind == EstimatorKind::Logistic {
                params.insert("epochs".into(), HyperValue::Int(200));
                params.insert("learning_rate".into(), HyperValue::Float(0.5));
            }
            let trained = train(kind, x.view(), &y, &params, 592).unwrap();
            assert_eq!(trained.estimator.predict(x.view()), vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
            let json = serde_json::to_string(&trained.estimator).unwrap();
            let back: FittedEstimator = serde_json::from_str(&json).unwrap();
            assert_eq!(back, trained.estimator, "{kind} did not roundtrip");
        }
    }

    #[test]
    fn same_seed_gives_same_model() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = Target::Classes {
            labels: vec![0, 0, 1, 1],
            n_classes: 2,
        };
        let a = train(EstimatorKind::Logistic, x.view(), &y, &Hyperparameters::new(), 7).unwrap();
        let b = train(EstimatorKind::Logistic, x.view(), &y, &Hyperparameters::new(), 7).unwrap();
        assert_eq!(a.estimator, b.estimator);
        assert!(a.estimator.is_deterministic());
    }
}
