//! Ridge regression solved in closed form.

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::{HyperReader, Hyperparameters, Predictor, Target, ensure_finite};
use crate::error::{CogniError, Result};

const NAME: &str = "linear";
pub(super) const KEYS: &[&str] = &["alpha", "fit_intercept"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl Predictor for LinearModel {
    fn predict(&self, x: ArrayView2<'_, f64>) -> Vec<f64> {
        let w = Array1::from(self.coefficients.clone());
        x.dot(&w).iter().map(|v| v + self.intercept).collect()
    }

    fn predict_proba(&self, _x: ArrayView2<'_, f64>) -> Option<Array2<f64>> {
        None
    }
}

/// Solve `(XᵀX + αI) w = Xᵀy`; the intercept column is not penalized.
pub(super) fn fit(
    x: ArrayView2<'_, f64>,
    y: &Target,
    params: &Hyperparameters,
) -> Result<(LinearModel, Hyperparameters)> {
    let mut reader = HyperReader::new(NAME, params, KEYS)?;
    let alpha = reader.f64("alpha", 1.0, 0.0, 1e12)?;
    let fit_intercept = reader.bool("fit_intercept", true)?;
    let resolved = reader.finish();

    let Target::Continuous(targets) = y else {
        return Err(CogniError::UnsupportedTask {
            estimator: NAME.to_string(),
            task: y.task().as_str().to_string(),
        });
    };

    let d = x.ncols();
    let width = d + usize::from(fit_intercept);
    let mut gram = vec![vec![0.0f64; width]; width];
    let mut rhs = vec![0.0f64; width];
    for (row, &target) in x.rows().into_iter().zip(targets) {
        let mut features: Vec<f64> = row.to_vec();
        if fit_intercept {
            features.push(1.0);
        }
        for i in 0..width {
            rhs[i] += features[i] * target;
            for j in i..width {
                gram[i][j] += features[i] * features[j];
            }
        }
    }
    for i in 0..width {
        for j in 0..i {
            gram[i][j] = gram[j][i];
        }
        if i < d {
            gram[i][i] += alpha;
        }
    }

    let solution = solve(gram, rhs).ok_or_else(|| {
        CogniError::Training(format!(
            "{NAME}: normal equations are singular; raise `alpha` or remove collinear features"
        ))
    })?;
    ensure_finite(NAME, solution.iter().copied())?;
    let intercept = if fit_intercept { solution[d] } else { 0.0 };
    let model = LinearModel {
        coefficients: solution[..d].to_vec(),
        intercept,
    };
    Ok((model, resolved))
}

/// Gaussian elimination with partial pivoting. `None` for a singular system.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |m, v| m.max(v.abs()))
        .max(1.0);
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() <= scale * 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut out = vec![0.0f64; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * out[k]).sum();
        out[row] = (b[row] - tail) / a[row][row];
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::HyperValue;
    use ndarray::array;

    #[test]
    fn recovers_exact_line_without_penalty() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = Target::Continuous(vec![1.0, 3.0, 5.0, 7.0]);
        let mut params = Hyperparameters::new();
        params.insert("alpha".into(), HyperValue::Float(0.0));
        let (model, _) = fit(x.view(), &y, &params).unwrap();
        assert!((model.coefficients[0] - 2.0).abs() < 1e-9);
        assert!((model.intercept - 1.0).abs() < 1e-9);
        let pred = model.predict(array![[10.0]].view());
        assert!((pred[0] - 21.0).abs() < 1e-9);
    }

    #[test]
    fn penalty_shrinks_coefficients() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = Target::Continuous(vec![0.0, 1.0, 2.0, 3.0]);
        let mut params = Hyperparameters::new();
        params.insert("alpha".into(), HyperValue::Float(10.0));
        let (model, resolved) = fit(x.view(), &y, &params).unwrap();
        assert!(model.coefficients[0] < 1.0 && model.coefficients[0] > 0.0);
        assert_eq!(resolved["fit_intercept"], HyperValue::Bool(true));
    }

    #[test]
    fn collinear_features_without_penalty_are_singular() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let y = Target::Continuous(vec![1.0, 2.0, 3.0]);
        let mut params = Hyperparameters::new();
        params.insert("alpha".into(), HyperValue::Int(0));
        assert!(matches!(
            fit(x.view(), &y, &params),
            Err(CogniError::Training(_))
        ));
    }
}
