use std::fmt;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::Table;
use crate::error::{CogniError, Result};

/// Identifies the partition of rows a metrics report was computed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitId {
    Holdout {
        train_fraction: f64,
        seed: u64,
        train_rows: usize,
        eval_rows: usize,
    },
    CrossValidation {
        folds: usize,
        repeats: usize,
        seed: u64,
        stratified: bool,
    },
}

impl fmt::Display for SplitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitId::Holdout {
                train_fraction,
                seed,
                train_rows,
                eval_rows,
            } => write!(
                f,
                "holdout(train_fraction={train_fraction}, seed={seed}, train={train_rows}, eval={eval_rows})"
            ),
            SplitId::CrossValidation {
                folds,
                repeats,
                seed,
                stratified,
            } => write!(
                f,
                "cv(folds={folds}, repeats={repeats}, seed={seed}, stratified={stratified})"
            ),
        }
    }
}

/// Train/eval partition of a materialized table.
#[derive(Debug, Clone)]
pub struct Split {
    pub train: Table,
    pub eval: Table,
    pub id: SplitId,
}

/// Seeded holdout split. Both sides keep the table's row order.
pub fn split(table: &Table, train_fraction: f64, seed: u64) -> Result<Split> {
    let (train_idx, eval_idx) = holdout_indices(table.len(), train_fraction, seed)?;
    Ok(Split {
        id: SplitId::Holdout {
            train_fraction,
            seed,
            train_rows: train_idx.len(),
            eval_rows: eval_idx.len(),
        },
        train: table.select_rows(&train_idx),
        eval: table.select_rows(&eval_idx),
    })
}

/// Row indices for a holdout split: a seeded permutation, never positional.
///
/// Both sides are non-empty; the train side holds `round(n * train_fraction)` rows clamped to
/// `1..n`.
pub fn holdout_indices(
    n_rows: usize,
    train_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(CogniError::invalid_argument(
            "train_fraction",
            format!("{train_fraction} is outside the open interval (0, 1)"),
        ));
    }
    if n_rows < 2 {
        return Err(CogniError::invalid_argument(
            "dataset",
            format!("splitting needs at least 2 rows, got {n_rows}"),
        ));
    }
    let mut order: Vec<usize> = (0..n_rows).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let n_train = ((n_rows as f64) * train_fraction).round() as usize;
    let n_train = n_train.clamp(1, n_rows - 1);
    let mut train = order[..n_train].to_vec();
    let mut eval = order[n_train..].to_vec();
    train.sort_unstable();
    eval.sort_unstable();
    Ok((train, eval))
}

/// One cross-validation fold as row indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub eval: Vec<usize>,
}

/// Repeated k-fold assignment.
///
/// Returns row indices into a table of `n_rows` rows. With `stratify_by` (one class label per
/// row), rows are stratified: each class is shuffled separately and dealt round-robin
/// so every fold sees roughly the class balance of the whole table. Each repeat reshuffles.
pub fn k_fold(
    n_rows: usize,
    stratify_by: Option<&[usize]>,
    folds: usize,
    repeats: usize,
    seed: u64,
) -> Result<Vec<Fold>> {
    if folds < 2 {
        return Err(CogniError::invalid_argument(
            "folds",
            format!("cross-validation needs at least 2 folds, got {folds}"),
        ));
    }
    if repeats == 0 {
        return Err(CogniError::invalid_argument("repeats", "must be at least 1"));
    }
    if folds > n_rows {
        return Err(CogniError::invalid_argument(
            "folds",
            format!("{folds} folds for only {n_rows} rows"),
        ));
    }
    if let Some(labels) = stratify_by
        && labels.len() != n_rows
    {
        return Err(CogniError::invalid_argument(
            "stratify_by",
            "label count does not match row count",
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(folds * repeats);
    for _repeat in 0..repeats {
        let dealt = match stratify_by {
            Some(labels) => {
                let n_classes = labels.iter().copied().max().map_or(0, |m| m + 1);
                let mut by_class = vec![Vec::new(); n_classes];
                for (row, &label) in labels.iter().enumerate() {
                    by_class[label].push(row);
                }
                let mut dealt = Vec::with_capacity(n_rows);
                for mut rows in by_class {
                    rows.shuffle(&mut rng);
                    dealt.extend(rows);
                }
                dealt
            }
            None => {
                let mut rows: Vec<usize> = (0..n_rows).collect();
                rows.shuffle(&mut rng);
                rows
            }
        };
        let mut assignment = vec![0usize; n_rows];
        for (position, &row) in dealt.iter().enumerate() {
            assignment[row] = position % folds;
        }
        for fold in 0..folds {
            let (eval, train): (Vec<usize>, Vec<usize>) =
                (0..n_rows).partition(|&row| assignment[row] == fold);
            out.push(Fold { train, eval });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;

    fn table(n: usize) -> Table {
        Table::new(
            vec!["i".into()],
            (0..n).map(|i| vec![Value::Number(i as f64)]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn split_is_disjoint_and_covering() {
        for &fraction in &[0.01, 0.3, 0.5, 0.8, 0.99] {
            for seed in [0u64, 1, 42, 592, u64::MAX] {
                let (train, eval) = holdout_indices(37, fraction, seed).unwrap();
                assert!(!train.is_empty() && !eval.is_empty());
                let mut all: Vec<usize> = train.iter().chain(eval.iter()).copied().collect();
                all.sort_unstable();
                assert_eq!(all, (0..37).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn split_is_deterministic_per_seed() {
        let t = table(50);
        let a = split(&t, 0.8, 42).unwrap();
        let b = split(&t, 0.8, 42).unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.eval, b.eval);
        assert_eq!(a.train.len(), 40);
        let c = split(&t, 0.8, 43).unwrap();
        assert_ne!(a.eval, c.eval);
    }

    #[test]
    fn split_is_not_positional() {
        let (train, _) = holdout_indices(100, 0.5, 7).unwrap();
        assert_ne!(train, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn fraction_outside_open_interval_is_rejected() {
        for fraction in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            assert!(matches!(
                holdout_indices(10, fraction, 1),
                Err(CogniError::InvalidArgument { .. })
            ));
        }
    }

    #[test]
    fn stratified_folds_cover_each_row_once_per_repeat() {
        let labels: Vec<usize> = (0..30).map(|i| usize::from(i % 3 == 0)).collect();
        let folds = k_fold(30, Some(&labels), 5, 2, 592).unwrap();
        assert_eq!(folds.len(), 10);
        for repeat in folds.chunks(5) {
            let mut seen = vec![0; 30];
            for fold in repeat {
                assert_eq!(fold.train.len() + fold.eval.len(), 30);
                let positives = fold.eval.iter().filter(|&&r| labels[r] == 1).count();
                assert_eq!(positives, 2);
                for &row in &fold.eval {
                    seen[row] += 1;
                }
            }
            assert!(seen.iter().all(|&count| count == 1));
        }
    }

    #[test]
    fn k_fold_rejects_bad_shapes() {
        assert!(k_fold(10, None, 1, 1, 0).is_err());
        assert!(k_fold(3, None, 5, 1, 0).is_err());
        assert!(k_fold(10, None, 2, 0, 0).is_err());
        let labels = [0, 1, 0];
        assert!(matches!(
            k_fold(4, Some(&labels), 2, 1, 0),
            Err(CogniError::InvalidArgument { ref name, .. }) if name == "stratify_by"
        ));
    }
}
