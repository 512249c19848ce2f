//! Deterministic gradient-boosted decision stumps.
//!
//! Classification boosts one stump per class per round on softmax residuals; regression boosts a
//! single stump per round on squared-loss residuals. Split search runs on binned features, so no
//! randomness is involved and the seed is not used.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::{HyperReader, Hyperparameters, Predictor, Target, argmax, ensure_finite, softmax};
use crate::error::{CogniError, Result};

const NAME: &str = "gbdt";
pub(super) const KEYS: &[&str] = &["rounds", "learning_rate", "bins"];

/// Single-split tree used as the weak learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stump {
    pub feature_index: usize,
    pub threshold: f64,
    /// Prediction for `feature <= threshold`.
    pub left_value: f64,
    /// Prediction for `feature > threshold`.
    pub right_value: f64,
}

impl Stump {
    pub fn predict(&self, features: &[f64]) -> f64 {
        let value = features.get(self.feature_index).copied().unwrap_or(0.0);
        if value <= self.threshold {
            self.left_value
        } else {
            self.right_value
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtModel {
    /// `0` for regression, where a single raw output is the prediction.
    pub n_classes: usize,
    pub learning_rate: f64,
    /// Raw scores before the first round.
    pub init_raw: Vec<f64>,
    /// Shape: `[rounds][outputs]`.
    pub stumps: Vec<Vec<Stump>>,
}

impl GbdtModel {
    pub fn predict_raw(&self, features: &[f64]) -> Vec<f64> {
        let mut raw = self.init_raw.clone();
        for round in &self.stumps {
            for (k, stump) in round.iter().enumerate() {
                raw[k] += self.learning_rate * stump.predict(features);
            }
        }
        raw
    }
}

impl Predictor for GbdtModel {
    fn predict(&self, x: ArrayView2<'_, f64>) -> Vec<f64> {
        x.rows()
            .into_iter()
            .map(|row| {
                let raw = self.predict_raw(&row.to_vec());
                if self.n_classes == 0 {
                    raw.first().copied().unwrap_or(0.0)
                } else {
                    argmax(&raw) as f64
                }
            })
            .collect()
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Option<Array2<f64>> {
        if self.n_classes == 0 {
            return None;
        }
        let mut out = Array2::zeros((x.nrows(), self.n_classes));
        for (r, row) in x.rows().into_iter().enumerate() {
            for (c, p) in softmax(&self.predict_raw(&row.to_vec())).into_iter().enumerate() {
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
) -> Result<(GbdtModel, Hyperparameters)> {
    let mut reader = HyperReader::new(NAME, params, KEYS)?;
    let rounds = reader.usize("rounds", 100, 1)?;
    let learning_rate = reader.f64("learning_rate", 0.1, 1e-9, 10.0)?;
    let bins = reader.usize("bins", 32, 2)?.min(256);
    let resolved = reader.finish();

    let rows: Vec<Vec<f64>> = x.rows().into_iter().map(|r| r.to_vec()).collect();
    let n = rows.len();
    let (mins, maxs) = feature_min_max(&rows, x.ncols());
    let binned = bin_features(&rows, &mins, &maxs, bins);
    let grid = SplitGrid {
        binned: &binned,
        rows: &rows,
        mins: &mins,
        maxs: &maxs,
        bins,
    };

    let (n_classes, init_raw) = match y {
        Target::Classes { labels, n_classes } => {
            if *n_classes < 2 {
                return Err(CogniError::Training(format!(
                    "{NAME} needs at least 2 classes, got {n_classes}"
                )));
            }
            let priors = class_priors(labels, *n_classes);
            let init: Vec<f64> = priors.iter().map(|&p| p.max(1e-6).ln()).collect();
            (*n_classes, init)
        }
        Target::Continuous(values) => (0, vec![values.iter().sum::<f64>() / n as f64]),
    };

    let mut raw = vec![init_raw.clone(); n];
    let mut stumps: Vec<Vec<Stump>> = Vec::with_capacity(rounds);
    for _round in 0..rounds {
        let residuals = match y {
            Target::Classes { labels, .. } => softmax_residuals(labels, &raw, n_classes),
            Target::Continuous(values) => {
                vec![values.iter().zip(&raw).map(|(v, r)| v - r[0]).collect()]
            }
        };
        let mut round = Vec::with_capacity(residuals.len());
        for (k, residual) in residuals.iter().enumerate() {
            let stump = grid.best_stump(residual);
            for (i, row) in rows.iter().enumerate() {
                raw[i][k] += learning_rate * stump.predict(row);
            }
            round.push(stump);
        }
        stumps.push(round);
    }

    ensure_finite(
        NAME,
        stumps
            .iter()
            .flatten()
            .flat_map(|s| [s.threshold, s.left_value, s.right_value])
            .chain(init_raw.iter().copied()),
    )?;
    Ok((
        GbdtModel {
            n_classes,
            learning_rate,
            init_raw,
            stumps,
        },
        resolved,
    ))
}

fn class_priors(labels: &[usize], n_classes: usize) -> Vec<f64> {
    let mut counts = vec![0usize; n_classes];
    for &label in labels {
        counts[label] += 1;
    }
    let total = labels.len().max(1) as f64;
    counts.into_iter().map(|c| c as f64 / total).collect()
}

/// `residuals[k][i] = 1{y_i = k} - p_ik`.
fn softmax_residuals(labels: &[usize], raw: &[Vec<f64>], n_classes: usize) -> Vec<Vec<f64>> {
    let mut residuals = vec![vec![0.0f64; labels.len()]; n_classes];
    for (i, (&label, scores)) in labels.iter().zip(raw).enumerate() {
        for (k, p) in softmax(scores).into_iter().enumerate() {
            let target = if label == k { 1.0 } else { 0.0 };
            residuals[k][i] = target - p;
        }
    }
    residuals
}

fn feature_min_max(rows: &[Vec<f64>], n_features: usize) -> (Vec<f64>, Vec<f64>) {
    let mut mins = vec![f64::INFINITY; n_features];
    let mut maxs = vec![f64::NEG_INFINITY; n_features];
    for row in rows {
        for (j, &v) in row.iter().enumerate() {
            mins[j] = mins[j].min(v);
            maxs[j] = maxs[j].max(v);
        }
    }
    for j in 0..n_features {
        if !mins[j].is_finite() || !maxs[j].is_finite() {
            mins[j] = 0.0;
            maxs[j] = 0.0;
        }
        if mins[j] == maxs[j] {
            maxs[j] = mins[j] + 1.0;
        }
    }
    (mins, maxs)
}

fn bin_features(rows: &[Vec<f64>], mins: &[f64], maxs: &[f64], bins: usize) -> Vec<Vec<u8>> {
    let top = (bins - 1) as f64;
    rows.iter()
        .map(|row| {
            mins.iter()
                .zip(maxs)
                .zip(row)
                .map(|((&min, &max), &v)| {
                    let t = ((v - min) / (max - min)).clamp(0.0, 1.0);
                    (t * top).round() as u8
                })
                .collect()
        })
        .collect()
}

struct SplitGrid<'a> {
    binned: &'a [Vec<u8>],
    rows: &'a [Vec<f64>],
    mins: &'a [f64],
    maxs: &'a [f64],
    bins: usize,
}

impl SplitGrid<'_> {
    /// Stump minimizing the squared error of `residuals`; the first feature wins ties.
    fn best_stump(&self, residuals: &[f64]) -> Stump {
        let mut best = (f64::INFINITY, 0usize, 0usize);
        for feature in 0..self.mins.len() {
            let (score, split_bin) = self.best_bin(residuals, feature);
            if score < best.0 {
                best = (score, feature, split_bin);
            }
        }
        let (_, feature, split_bin) = best;
        let threshold = self.threshold(feature, split_bin);
        let (left_value, right_value) = self.leaf_means(residuals, feature, threshold);
        Stump {
            feature_index: feature,
            threshold,
            left_value,
            right_value,
        }
    }

    fn best_bin(&self, residuals: &[f64], feature: usize) -> (f64, usize) {
        let mut counts = vec![0u32; self.bins];
        let mut sums = vec![0f64; self.bins];
        let mut sums_sq = vec![0f64; self.bins];
        for (row, &r) in self.binned.iter().zip(residuals) {
            let b = row[feature] as usize;
            counts[b] += 1;
            sums[b] += r;
            sums_sq[b] += r * r;
        }
        let total_count: u32 = counts.iter().sum();
        let total_sum: f64 = sums.iter().sum();
        let total_sum_sq: f64 = sums_sq.iter().sum();

        let mut best = (f64::INFINITY, 0usize);
        let (mut left_count, mut left_sum, mut left_sum_sq) = (0u32, 0f64, 0f64);
        for split_bin in 0..(self.bins - 1) {
            left_count += counts[split_bin];
            left_sum += sums[split_bin];
            left_sum_sq += sums_sq[split_bin];
            let right_count = total_count - left_count;
            if left_count == 0 || right_count == 0 {
                continue;
            }
            let right_sum = total_sum - left_sum;
            let right_sum_sq = total_sum_sq - left_sum_sq;
            let left_sse = left_sum_sq - (left_sum * left_sum) / f64::from(left_count);
            let right_sse = right_sum_sq - (right_sum * right_sum) / f64::from(right_count);
            let score = left_sse + right_sse;
            if score < best.0 {
                best = (score, split_bin);
            }
        }
        best
    }

    /// Raw-value threshold that sends exactly the rows binned at or below `split_bin` left:
    /// the midpoint between the largest value on the left and the smallest on the right.
    fn threshold(&self, feature: usize, split_bin: usize) -> f64 {
        let mut left_max = f64::NEG_INFINITY;
        let mut right_min = f64::INFINITY;
        for (bins, row) in self.binned.iter().zip(self.rows) {
            let v = row[feature];
            if usize::from(bins[feature]) <= split_bin {
                left_max = left_max.max(v);
            } else {
                right_min = right_min.min(v);
            }
        }
        if !left_max.is_finite() {
            return self.mins[feature];
        }
        if !right_min.is_finite() {
            return left_max;
        }
        left_max + (right_min - left_max) / 2.0
    }

    fn leaf_means(&self, residuals: &[f64], feature: usize, threshold: f64) -> (f64, f64) {
        let (mut left_sum, mut left_n, mut right_sum, mut right_n) = (0.0, 0u32, 0.0, 0u32);
        for (row, &r) in self.rows.iter().zip(residuals) {
            if row[feature] <= threshold {
                left_sum += r;
                left_n += 1;
            } else {
                right_sum += r;
                right_n += 1;
            }
        }
        let mean = |sum: f64, n: u32| if n == 0 { 0.0 } else { sum / f64::from(n) };
        (mean(left_sum, left_n), mean(right_sum, right_n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn stump_predict_branches() {
        let stump = Stump {
            feature_index: 0,
            threshold: 0.5,
            left_value: -1.0,
            right_value: 2.0,
        };
        assert_eq!(stump.predict(&[0.0]), -1.0);
        assert_eq!(stump.predict(&[0.5]), -1.0);
        assert_eq!(stump.predict(&[0.6]), 2.0);
    }

    #[test]
    fn regression_converges_towards_targets() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = Target::Continuous(vec![0.0, 0.0, 10.0, 10.0]);
        let (model, _) = fit(x.view(), &y, &Hyperparameters::new()).unwrap();
        let pred = model.predict(x.view());
        assert!(pred[0] < 1.0 && pred[3] > 9.0, "{pred:?}");
        assert!(model.predict_proba(x.view()).is_none());
    }

    #[test]
    fn applied_split_matches_the_scored_bin() {
        // 0.02 lands in its own bin; the applied threshold must keep it on the right.
        let x = array![[0.0], [0.02], [1.0]];
        let y = Target::Continuous(vec![0.0, 10.0, 10.0]);
        let (model, _) = fit(x.view(), &y, &Hyperparameters::new()).unwrap();
        let first = &model.stumps[0][0];
        assert!(first.threshold > 0.0 && first.threshold < 0.02, "{first:?}");
        let pred = model.predict(x.view());
        assert!(pred[0] < 0.5, "{pred:?}");
        assert!(pred[1] > 9.5 && pred[2] > 9.5, "{pred:?}");
    }

    #[test]
    fn classification_is_reproducible() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [0.2, 0.8], [0.9, 0.3]];
        let y = Target::Classes {
            labels: vec![0, 1, 0, 1],
            n_classes: 2,
        };
        let (a, _) = fit(x.view(), &y, &Hyperparameters::new()).unwrap();
        let (b, _) = fit(x.view(), &y, &Hyperparameters::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.stumps.len(), 100);
        assert_eq!(a.stumps[0].len(), 2);
    }
}
