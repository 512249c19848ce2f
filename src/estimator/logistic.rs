//! Multinomial logistic regression trained with seeded mini-batch gradient descent.

use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use super::{HyperReader, Hyperparameters, Predictor, Target, argmax, ensure_finite, softmax};
use crate::error::{CogniError, Result};

const NAME: &str = "logistic";
pub(super) const KEYS: &[&str] = &["epochs", "learning_rate", "l2", "batch_size", "balance_classes"];

/// Training options resolved from hyperparameters.
#[derive(Debug, Clone)]
struct TrainOptions {
    epochs: usize,
    learning_rate: f64,
    l2: f64,
    batch_size: usize,
    balance_classes: bool,
}

impl TrainOptions {
    fn read(params: &Hyperparameters) -> Result<(Self, Hyperparameters)> {
        let mut reader = HyperReader::new(NAME, params, KEYS)?;
        let options = Self {
            epochs: reader.usize("epochs", 50, 1)?,
            learning_rate: reader.f64("learning_rate", 0.1, 1e-9, 100.0)?,
            l2: reader.f64("l2", 1e-4, 0.0, 1e6)?,
            batch_size: reader.usize("batch_size", 32, 1)?,
            balance_classes: reader.bool("balance_classes", false)?,
        };
        Ok((options, reader.finish()))
    }
}

/// Row-major weights, `n_classes x n_features`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub n_features: usize,
    pub n_classes: usize,
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
}

impl LogisticModel {
    fn logits(&self, row: &[f64]) -> Vec<f64> {
        logits(&self.weights, &self.bias, self.n_features, row)
    }
}

fn logits(weights: &[f64], bias: &[f64], dim: usize, row: &[f64]) -> Vec<f64> {
    bias.iter()
        .enumerate()
        .map(|(c, &b)| {
            let base = c * dim;
            b + row
                .iter()
                .take(dim)
                .enumerate()
                .map(|(i, &x)| weights[base + i] * x)
                .sum::<f64>()
        })
        .collect()
}

impl Predictor for LogisticModel {
    fn predict(&self, x: ArrayView2<'_, f64>) -> Vec<f64> {
        x.rows()
            .into_iter()
            .map(|row| argmax(&self.logits(&row.to_vec())) as f64)
            .collect()
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Option<Array2<f64>> {
        let mut out = Array2::zeros((x.nrows(), self.n_classes));
        for (r, row) in x.rows().into_iter().enumerate() {
            for (c, p) in softmax(&self.logits(&row.to_vec())).into_iter().enumerate() {
                out[[r, c]] = p;
            }
        }
        Some(out)
    }
}

pub(super) fn fit(
    x: ArrayView2<'_, f64>,
    y: &Target,
    params: &Hyperparameters,
    seed: u64,
) -> Result<(LogisticModel, Hyperparameters)> {
    let (options, resolved) = TrainOptions::read(params)?;
    let Target::Classes { labels, n_classes } = y else {
        return Err(CogniError::UnsupportedTask {
            estimator: NAME.to_string(),
            task: y.task().as_str().to_string(),
        });
    };
    let classes = *n_classes;
    if classes < 2 {
        return Err(CogniError::Training(format!(
            "{NAME} needs at least 2 classes, got {classes}"
        )));
    }
    let dim = x.ncols();
    let rows: Vec<Vec<f64>> = x.rows().into_iter().map(|r| r.to_vec()).collect();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut weights = vec![0.0f64; classes * dim];
    let mut bias = vec![0.0f64; classes];
    for w in &mut weights {
        *w = (rng.random::<f64>() - 0.5) * 0.01;
    }

    let class_weights: Vec<f64> = if options.balance_classes {
        let mut counts = vec![0f64; classes];
        for &label in labels {
            counts[label] += 1.0;
        }
        let total: f64 = counts.iter().sum();
        counts
            .into_iter()
            .map(|count| {
                if count == 0.0 {
                    0.0
                } else {
                    total / (classes as f64 * count)
                }
            })
            .collect()
    } else {
        vec![1.0; classes]
    };

    let mut indices: Vec<usize> = (0..rows.len()).collect();
    let lr = options.learning_rate;
    let l2 = options.l2;
    for _epoch in 0..options.epochs {
        indices.shuffle(&mut rng);
        for chunk in indices.chunks(options.batch_size) {
            let mut grad_w = vec![0.0f64; weights.len()];
            let mut grad_b = vec![0.0f64; classes];
            let mut batch_weight = 0.0f64;
            for &idx in chunk {
                let row = &rows[idx];
                let label = labels[idx];
                let weight = class_weights[label];
                if weight == 0.0 {
                    continue;
                }
                let probs = softmax(&logits(&weights, &bias, dim, row));
                for c in 0..classes {
                    let diff = probs[c] - if c == label { 1.0 } else { 0.0 };
                    let base = c * dim;
                    for i in 0..dim {
                        grad_w[base + i] += diff * row[i] * weight;
                    }
                    grad_b[c] += diff * weight;
                }
                batch_weight += weight;
            }
            if batch_weight == 0.0 {
                continue;
            }
            let inv = 1.0 / batch_weight;
            for c in 0..classes {
                let base = c * dim;
                for i in 0..dim {
                    let idx = base + i;
                    weights[idx] -= lr * (grad_w[idx] * inv + l2 * weights[idx]);
                }
                bias[c] -= lr * grad_b[c] * inv;
            }
        }
    }

    ensure_finite(NAME, weights.iter().chain(bias.iter()).copied())?;
    let model = LogisticModel {
        n_features: dim,
        n_classes: classes,
        weights,
        bias,
    };
    Ok((model, resolved))
}
