//! Metric functions over true labels, predictions and optional class probabilities.

use std::fmt;
use std::str::FromStr;

use ndarray::ArrayView2;

use crate::error::CogniError;
use crate::estimator::Task;

/// Supported metric names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Accuracy,
    BalancedAccuracy,
    Precision,
    Recall,
    F1,
    LogLoss,
    RocAuc,
    Rmse,
    Mse,
    Mae,
    R2,
}

impl Metric {
    pub const ALL: [Metric; 11] = [
        Metric::Accuracy,
        Metric::BalancedAccuracy,
        Metric::Precision,
        Metric::Recall,
        Metric::F1,
        Metric::LogLoss,
        Metric::RocAuc,
        Metric::Rmse,
        Metric::Mse,
        Metric::Mae,
        Metric::R2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::BalancedAccuracy => "balanced_accuracy",
            Metric::Precision => "precision",
            Metric::Recall => "recall",
            Metric::F1 => "f1",
            Metric::LogLoss => "log_loss",
            Metric::RocAuc => "roc_auc",
            Metric::Rmse => "rmse",
            Metric::Mse => "mse",
            Metric::Mae => "mae",
            Metric::R2 => "r2",
        }
    }

    pub fn task(self) -> Task {
        match self {
            Metric::Rmse | Metric::Mse | Metric::Mae | Metric::R2 => Task::Regression,
            _ => Task::Classification,
        }
    }

    /// Whether larger values are better.
    pub fn higher_is_better(self) -> bool {
        !matches!(
            self,
            Metric::LogLoss | Metric::Rmse | Metric::Mse | Metric::Mae
        )
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = CogniError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == name)
            .ok_or_else(|| CogniError::UnknownMetric(name.to_string()))
    }
}

/// Inputs shared by every metric of one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Observations<'a> {
    pub task: Task,
    /// Class index or target value per row.
    pub y_true: &'a [f64],
    pub y_pred: &'a [f64],
    /// `rows x classes`, classifiers only.
    pub proba: Option<ArrayView2<'a, f64>>,
    /// `0` for regression.
    pub n_classes: usize,
}

/// Compute one metric. The error string becomes the metric's marker in the report.
pub fn compute(metric: Metric, obs: &Observations<'_>) -> Result<f64, String> {
    if metric.task() != obs.task {
        return Err(format!(
            "{metric} is a {} metric but the task is {}",
            metric.task(),
            obs.task
        ));
    }
    if obs.y_true.is_empty() {
        return Err("no evaluation rows".to_string());
    }
    let value = match metric {
        Metric::Accuracy => accuracy(&confusion(obs)),
        Metric::BalancedAccuracy => {
            let stats = precision_recall_by_class(&confusion(obs));
            let present: Vec<f64> = stats
                .iter()
                .filter(|s| s.support > 0)
                .map(|s| s.recall)
                .collect();
            present.iter().sum::<f64>() / present.len().max(1) as f64
        }
        Metric::Precision | Metric::Recall | Metric::F1 => {
            let stats = precision_recall_by_class(&confusion(obs));
            let pick = |s: &PerClassStats| match metric {
                Metric::Precision => s.precision,
                Metric::Recall => s.recall,
                _ => s.f1(),
            };
            if obs.n_classes == 2 {
                pick(&stats[1])
            } else {
                let present: Vec<f64> = stats
                    .iter()
                    .filter(|s| s.support > 0 || s.predicted > 0)
                    .map(pick)
                    .collect();
                present.iter().sum::<f64>() / present.len().max(1) as f64
            }
        }
        Metric::LogLoss => log_loss(obs)?,
        Metric::RocAuc => roc_auc(obs)?,
        Metric::Mse => mse(obs),
        Metric::Rmse => mse(obs).sqrt(),
        Metric::Mae => {
            let n = obs.y_true.len() as f64;
            obs.y_true
                .iter()
                .zip(obs.y_pred)
                .map(|(t, p)| (t - p).abs())
                .sum::<f64>()
                / n
        }
        Metric::R2 => {
            let n = obs.y_true.len() as f64;
            let mean = obs.y_true.iter().sum::<f64>() / n;
            let total: f64 = obs.y_true.iter().map(|t| (t - mean).powi(2)).sum();
            if total == 0.0 {
                return Err("r2 is undefined for a constant target".to_string());
            }
            1.0 - mse(obs) * n / total
        }
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("{metric} evaluated to {value}"))
    }
}

fn confusion(obs: &Observations<'_>) -> ConfusionMatrix {
    let mut cm = ConfusionMatrix::new(obs.n_classes);
    for (&t, &p) in obs.y_true.iter().zip(obs.y_pred) {
        cm.add(t as usize, p as usize);
    }
    cm
}

fn mse(obs: &Observations<'_>) -> f64 {
    let n = obs.y_true.len() as f64;
    obs.y_true
        .iter()
        .zip(obs.y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / n
}

fn log_loss(obs: &Observations<'_>) -> Result<f64, String> {
    let proba = obs
        .proba
        .ok_or_else(|| "log_loss needs class probabilities".to_string())?;
    let eps = 1e-15;
    let total: f64 = obs
        .y_true
        .iter()
        .enumerate()
        .map(|(row, &t)| -proba[[row, t as usize]].clamp(eps, 1.0 - eps).ln())
        .sum();
    Ok(total / obs.y_true.len() as f64)
}

/// Rank-based AUC of the positive class; tied scores share their average rank.
fn roc_auc(obs: &Observations<'_>) -> Result<f64, String> {
    if obs.n_classes != 2 {
        return Err(format!(
            "roc_auc needs a binary target, got {} classes",
            obs.n_classes
        ));
    }
    let proba = obs
        .proba
        .ok_or_else(|| "roc_auc needs class probabilities".to_string())?;
    let mut scored: Vec<(f64, bool)> = obs
        .y_true
        .iter()
        .enumerate()
        .map(|(row, &t)| (proba[[row, 1]], t as usize == 1))
        .collect();
    let positives = scored.iter().filter(|(_, p)| *p).count();
    let negatives = scored.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err("roc_auc needs both classes in the evaluation rows".to_string());
    }
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut rank_sum = 0.0f64;
    let mut start = 0usize;
    while start < scored.len() {
        let mut end = start;
        while end + 1 < scored.len() && scored[end + 1].0 == scored[start].0 {
            end += 1;
        }
        let average_rank = (start + end) as f64 / 2.0 + 1.0;
        rank_sum += scored[start..=end].iter().filter(|(_, p)| *p).count() as f64 * average_rank;
        start = end + 1;
    }
    let p = positives as f64;
    Ok((rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

/// Confusion matrix for a `K`-class classifier.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    /// Out-of-range indices are ignored.
    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }
}

/// Precision/recall statistics for a single class.
#[derive(Debug, Clone)]
pub struct PerClassStats {
    /// `TP / (TP + FP)`.
    pub precision: f64,
    /// `TP / (TP + FN)`.
    pub recall: f64,
    /// Total number of true examples for the class.
    pub support: u32,
    /// Rows predicted as the class.
    pub predicted: u32,
}

impl PerClassStats {
    pub fn f1(&self) -> f64 {
        let denom = self.precision + self.recall;
        if denom == 0.0 {
            0.0
        } else {
            2.0 * self.precision * self.recall / denom
        }
    }
}

/// Per-class precision and recall; classes with no predictions or no support score `0`.
pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    (0..k)
        .map(|class_idx| {
            let tp = f64::from(cm.get(class_idx, class_idx));
            let mut fp = 0f64;
            let mut fn_ = 0f64;
            let mut support = 0u32;
            let mut predicted = 0u32;
            for j in 0..k {
                let v = cm.get(class_idx, j);
                support = support.saturating_add(v);
                predicted = predicted.saturating_add(cm.get(j, class_idx));
                if j != class_idx {
                    fn_ += f64::from(v);
                    fp += f64::from(cm.get(j, class_idx));
                }
            }
            PerClassStats {
                precision: if tp + fp == 0.0 { 0.0 } else { tp / (tp + fp) },
                recall: if tp + fn_ == 0.0 { 0.0 } else { tp / (tp + fn_) },
                support,
                predicted,
            }
        })
        .collect()
}

pub fn accuracy(cm: &ConfusionMatrix) -> f64 {
    let total: u64 = cm.counts.iter().map(|&v| u64::from(v)).sum();
    let correct: u64 = (0..cm.n_classes).map(|i| u64::from(cm.get(i, i))).sum();
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}
