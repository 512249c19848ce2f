//! CART decision tree for classification (gini or entropy) and regression (variance).

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::{HyperReader, Hyperparameters, Predictor, Target, argmax};
use crate::error::{CogniError, Result};

const NAME: &str = "decision_tree";
pub(super) const KEYS: &[&str] = &["max_depth", "min_samples_split", "min_samples_leaf", "criterion"];
const CRITERIA: &[&str] = &["gini", "entropy", "variance"];

/// Tree node stored in a flat arena; children are indices into [`TreeModel::nodes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    /// Class probabilities for classifiers, a single mean for regressors.
    Leaf { value: Vec<f64> },
    Split {
        feature: usize,
        /// Rows with `feature <= threshold` go left.
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeModel {
    /// `0` for regression.
    pub n_classes: usize,
    /// Root is node `0`.
    pub nodes: Vec<Node>,
}

impl TreeModel {
    fn leaf_for(&self, row: &[f64]) -> &[f64] {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

impl Predictor for TreeModel {
    fn predict(&self, x: ArrayView2<'_, f64>) -> Vec<f64> {
        x.rows()
            .into_iter()
            .map(|row| {
                let leaf = self.leaf_for(&row.to_vec());
                if self.n_classes == 0 {
                    leaf.first().copied().unwrap_or(0.0)
                } else {
                    argmax(leaf) as f64
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
            for (c, &p) in self.leaf_for(&row.to_vec()).iter().enumerate() {
                out[[r, c]] = p;
            }
        }
        Some(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Criterion {
    Gini,
    Entropy,
    Variance,
}

struct Builder<'a> {
    rows: Vec<Vec<f64>>,
    y: &'a Target,
    criterion: Criterion,
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    nodes: Vec<Node>,
}

/// Sufficient statistics of a set of rows.
#[derive(Debug, Clone)]
enum Stats {
    Counts(Vec<f64>),
    Moments { n: f64, sum: f64, sum_sq: f64 },
}

impl Stats {
    fn empty(y: &Target) -> Self {
        match y {
            Target::Classes { n_classes, .. } => Stats::Counts(vec![0.0; *n_classes]),
            Target::Continuous(_) => Stats::Moments {
                n: 0.0,
                sum: 0.0,
                sum_sq: 0.0,
            },
        }
    }

    fn add(&mut self, y: &Target, row: usize, sign: f64) {
        match (self, y) {
            (Stats::Counts(counts), Target::Classes { labels, .. }) => counts[labels[row]] += sign,
            (Stats::Moments { n, sum, sum_sq }, Target::Continuous(values)) => {
                let v = values[row];
                *n += sign;
                *sum += sign * v;
                *sum_sq += sign * v * v;
            }
            _ => {}
        }
    }

    fn count(&self) -> f64 {
        match self {
            Stats::Counts(counts) => counts.iter().sum(),
            Stats::Moments { n, .. } => *n,
        }
    }

    /// Impurity weighted by row count, so children can simply be summed.
    fn weighted_impurity(&self, criterion: Criterion) -> f64 {
        match self {
            Stats::Counts(counts) => {
                let n: f64 = counts.iter().sum();
                if n == 0.0 {
                    return 0.0;
                }
                match criterion {
                    Criterion::Entropy => -counts
                        .iter()
                        .filter(|&&c| c > 0.0)
                        .map(|&c| c * (c / n).ln())
                        .sum::<f64>(),
                    _ => n - counts.iter().map(|c| c * c).sum::<f64>() / n,
                }
            }
            Stats::Moments { n, sum, sum_sq } => {
                if *n == 0.0 {
                    0.0
                } else {
                    (sum_sq - sum * sum / n).max(0.0)
                }
            }
        }
    }

    fn leaf_value(&self) -> Vec<f64> {
        match self {
            Stats::Counts(counts) => {
                let n: f64 = counts.iter().sum::<f64>().max(1.0);
                counts.iter().map(|c| c / n).collect()
            }
            Stats::Moments { n, sum, .. } => vec![if *n == 0.0 { 0.0 } else { sum / n }],
        }
    }
}

struct BestSplit {
    score: f64,
    feature: usize,
    threshold: f64,
}

impl Builder<'_> {
    fn stats(&self, rows: &[usize]) -> Stats {
        let mut stats = Stats::empty(self.y);
        for &r in rows {
            stats.add(self.y, r, 1.0);
        }
        stats
    }

    /// Grow the tree from `rows` with an explicit work list, so depth is bounded by memory
    /// rather than by the call stack.
    fn build(&mut self, rows: Vec<usize>) {
        self.nodes.push(Node::Leaf { value: Vec::new() });
        let mut pending = vec![(rows, 0usize, 0usize)];
        while let Some((rows, depth, idx)) = pending.pop() {
            let stats = self.stats(&rows);
            self.nodes[idx] = Node::Leaf {
                value: stats.leaf_value(),
            };
            let Some(best) = self.split_for(&rows, &stats, depth) else {
                continue;
            };
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .iter()
                .copied()
                .partition(|&r| self.rows[r][best.feature] <= best.threshold);
            let left = self.nodes.len();
            let right = left + 1;
            self.nodes.push(Node::Leaf { value: Vec::new() });
            self.nodes.push(Node::Leaf { value: Vec::new() });
            self.nodes[idx] = Node::Split {
                feature: best.feature,
                threshold: best.threshold,
                left,
                right,
            };
            pending.push((right_rows, depth + 1, right));
            pending.push((left_rows, depth + 1, left));
        }
    }

    /// Split worth making for a node, if any.
    fn split_for(&self, rows: &[usize], stats: &Stats, depth: usize) -> Option<BestSplit> {
        let parent = stats.weighted_impurity(self.criterion);
        let depth_ok = self.max_depth.is_none_or(|max| depth < max);
        if !depth_ok || rows.len() < self.min_samples_split || parent <= 1e-12 {
            return None;
        }
        self.best_split(rows, stats)
            .filter(|best| parent - best.score > 1e-12)
    }

    fn best_split(&self, rows: &[usize], total: &Stats) -> Option<BestSplit> {
        let n_features = self.rows.first().map_or(0, Vec::len);
        let mut best: Option<BestSplit> = None;
        let mut order = rows.to_vec();
        for feature in 0..n_features {
            order.sort_by(|&a, &b| self.rows[a][feature].total_cmp(&self.rows[b][feature]));
            let mut left = Stats::empty(self.y);
            let mut right = total.clone();
            for pos in 0..order.len() - 1 {
                let row = order[pos];
                left.add(self.y, row, 1.0);
                right.add(self.y, row, -1.0);
                let here = self.rows[row][feature];
                let next = self.rows[order[pos + 1]][feature];
                if here == next {
                    continue;
                }
                if left.count() < self.min_samples_leaf as f64
                    || right.count() < self.min_samples_leaf as f64
                {
                    continue;
                }
                let score =
                    left.weighted_impurity(self.criterion) + right.weighted_impurity(self.criterion);
                if best.as_ref().is_none_or(|b| score < b.score) {
                    best = Some(BestSplit {
                        score,
                        feature,
                        threshold: here + (next - here) / 2.0,
                    });
                }
            }
        }
        best
    }
}

pub(super) fn fit(
    x: ArrayView2<'_, f64>,
    y: &Target,
    params: &Hyperparameters,
) -> Result<(TreeModel, Hyperparameters)> {
    let mut reader = HyperReader::new(NAME, params, KEYS)?;
    let max_depth = reader.optional_usize("max_depth", 1)?;
    let min_samples_split = reader.usize("min_samples_split", 2, 2)?;
    let min_samples_leaf = reader.usize("min_samples_leaf", 1, 1)?;
    let default_criterion = match y {
        Target::Classes { .. } => "gini",
        Target::Continuous(_) => "variance",
    };
    let criterion = match reader.choice("criterion", default_criterion, CRITERIA)? {
        0 => Criterion::Gini,
        1 => Criterion::Entropy,
        _ => Criterion::Variance,
    };
    let resolved = reader.finish();
    let classifying = matches!(y, Target::Classes { .. });
    if classifying == (criterion == Criterion::Variance) {
        return Err(CogniError::InvalidHyperparameter {
            estimator: NAME.to_string(),
            key: "criterion".to_string(),
            reason: format!("does not match a {} target", y.task()),
        });
    }

    let mut builder = Builder {
        rows: x.rows().into_iter().map(|r| r.to_vec()).collect(),
        y,
        criterion,
        max_depth,
        min_samples_split,
        min_samples_leaf,
        nodes: Vec::new(),
    };
    builder.build((0..x.nrows()).collect());
    let n_classes = match y {
        Target::Classes { n_classes, .. } => *n_classes,
        Target::Continuous(_) => 0,
    };
    Ok((
        TreeModel {
            n_classes,
            nodes: builder.nodes,
        },
        resolved,
    ))
}
