//! Linear Fisher discriminant
//!
//! Classic two-class linear discriminant analysis (Fisher 1936): the
//! coefficient vector is `W^-1 (mu_s - mu_b)`, where `W` is the pooled
//! weighted within-class scatter matrix and `mu_s`, `mu_b` the weighted
//! class means. The offset centers the weighted mean score of the combined
//! sample at zero, so signal-like events score positive.
//!
//! The solve is plain Gauss-Jordan with partial pivoting; the scatter matrix
//! is a handful of features square, so there is nothing to be gained from a
//! factorization library. A singular scatter matrix (linearly dependent or
//! constant features) fails the fit rather than producing garbage
//! coefficients.

use ndarray::{Array1, Array2};

use super::{ClassSample, Method, MethodOptions, ModelParameters, NormTransform, VarTransform};
use crate::config::MethodKind;
use crate::{Error, Result};

/// Pivot threshold, relative to the largest matrix entry.
const SINGULARITY_EPS: f64 = 1e-12;

/// Linear Fisher discriminant method.
pub struct FisherDiscriminant {
    name: String,
    var_transform: VarTransform,
    state: Option<FisherState>,
}

struct FisherState {
    coefficients: Array1<f64>,
    offset: f64,
    transform: Option<NormTransform>,
}

impl FisherDiscriminant {
    /// Create an unfitted Fisher method from its option string.
    ///
    /// Recognized options: `VarTransform=None|Norm`.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] on unknown options.
    pub fn new(name: &str, options: &MethodOptions) -> Result<Self> {
        options.reject_unknown(&["VarTransform"])?;
        Ok(Self {
            name: name.to_string(),
            var_transform: options.var_transform()?,
            state: None,
        })
    }

    fn untrained(&self) -> Error {
        Error::Training {
            method: self.name.clone(),
            reason: "method has not been trained".to_string(),
        }
    }

    fn fit_error(&self, reason: impl Into<String>) -> Error {
        Error::Training {
            method: self.name.clone(),
            reason: reason.into(),
        }
    }
}

impl Method for FisherDiscriminant {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MethodKind {
        MethodKind::Fisher
    }

    fn train(&mut self, signal: &ClassSample, background: &ClassSample) -> Result<()> {
        let n_features = signal.x.ncols();
        if n_features == 0 || n_features != background.x.ncols() {
            return Err(self.fit_error(format!(
                "feature dimension mismatch: signal has {n_features}, background has {}",
                background.x.ncols()
            )));
        }
        if signal.is_empty() || background.is_empty() {
            return Err(self.fit_error("empty training sample"));
        }

        let transform = match self.var_transform {
            VarTransform::None => None,
            VarTransform::Norm => Some(NormTransform::fit(&[&signal.x, &background.x])),
        };
        let (sig_x, bkg_x) = match &transform {
            None => (signal.x.clone(), background.x.clone()),
            Some(t) => (t.apply(&signal.x), t.apply(&background.x)),
        };

        let sum_w_sig = signal.sum_weights();
        let sum_w_bkg = background.sum_weights();
        if sum_w_sig <= 0.0 || sum_w_bkg <= 0.0 {
            return Err(self.fit_error("non-positive total event weight in a class"));
        }

        let mu_sig = weighted_mean(&sig_x, &signal.w, sum_w_sig);
        let mu_bkg = weighted_mean(&bkg_x, &background.w, sum_w_bkg);

        let mut scatter = Array2::<f64>::zeros((n_features, n_features));
        accumulate_scatter(&mut scatter, &sig_x, &signal.w, &mu_sig);
        accumulate_scatter(&mut scatter, &bkg_x, &background.w, &mu_bkg);
        scatter /= sum_w_sig + sum_w_bkg;

        let diff = &mu_sig - &mu_bkg;
        let coefficients = solve(scatter, diff).ok_or_else(|| {
            self.fit_error(
                "within-class scatter matrix is singular; \
                 features may be constant or linearly dependent",
            )
        })?;

        // center the weighted mean score of the combined sample at zero
        let mu_all = (&mu_sig * sum_w_sig + &mu_bkg * sum_w_bkg) / (sum_w_sig + sum_w_bkg);
        let offset = -coefficients.dot(&mu_all);

        self.state = Some(FisherState {
            coefficients,
            offset,
            transform,
        });
        Ok(())
    }

    fn score(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        let state = self.state.as_ref().ok_or_else(|| self.untrained())?;
        let x = match &state.transform {
            None => x.clone(),
            Some(t) => t.apply(x),
        };
        Ok(x
            .rows()
            .into_iter()
            .map(|row| row.dot(&state.coefficients) + state.offset)
            .collect())
    }

    fn parameters(&self) -> Result<ModelParameters> {
        let state = self.state.as_ref().ok_or_else(|| self.untrained())?;
        Ok(ModelParameters::Fisher {
            coefficients: state.coefficients.to_vec(),
            offset: state.offset,
            transform: state.transform.clone(),
        })
    }
}

fn weighted_mean(x: &Array2<f64>, w: &[f64], sum_w: f64) -> Array1<f64> {
    let mut mean = Array1::<f64>::zeros(x.ncols());
    for (row, weight) in x.rows().into_iter().zip(w) {
        mean.scaled_add(*weight, &row);
    }
    mean / sum_w
}

fn accumulate_scatter(scatter: &mut Array2<f64>, x: &Array2<f64>, w: &[f64], mu: &Array1<f64>) {
    for (row, weight) in x.rows().into_iter().zip(w) {
        let centered = &row - mu;
        for i in 0..centered.len() {
            for j in 0..centered.len() {
                scatter[[i, j]] += weight * centered[i] * centered[j];
            }
        }
    }
}

/// Solve `m * x = b` by Gauss-Jordan elimination with partial pivoting.
/// Returns `None` if the matrix is (numerically) singular.
fn solve(mut m: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    let scale = m.iter().fold(0.0f64, |acc, v| acc.max(v.abs())).max(1.0);
    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&a, &r| {
                m[[a, col]]
                    .abs()
                    .partial_cmp(&m[[r, col]].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if m[[pivot_row, col]].abs() < SINGULARITY_EPS * scale {
            return None;
        }
        if pivot_row != col {
            for j in 0..n {
                m.swap([pivot_row, j], [col, j]);
            }
            b.swap(pivot_row, col);
        }
        let pivot = m[[col, col]];
        for j in 0..n {
            m[[col, j]] /= pivot;
        }
        b[col] /= pivot;
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = m[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                m[[row, j]] -= factor * m[[col, j]];
            }
            b[row] -= factor * b[col];
        }
    }
    Some(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn sample(rows: &[[f64; 2]]) -> ClassSample {
        let x = Array2::from_shape_vec(
            (rows.len(), 2),
            rows.iter().flatten().copied().collect(),
        )
        .unwrap();
        let w = vec![1.0; rows.len()];
        ClassSample { x, w }
    }

    fn fisher(options: &str) -> FisherDiscriminant {
        FisherDiscriminant::new("Fisher", &MethodOptions::parse(options).unwrap()).unwrap()
    }

    #[test]
    fn test_separable_classes_score_signal_positive() {
        let signal = sample(&[[2.0, 2.1], [2.2, 1.9], [1.9, 2.0], [2.1, 2.2]]);
        let background = sample(&[[-2.0, -1.9], [-2.1, -2.2], [-1.8, -2.0], [-2.2, -2.1]]);
        let mut method = fisher("");
        method.train(&signal, &background).unwrap();

        let sig_scores = method.score(&signal.x).unwrap();
        let bkg_scores = method.score(&background.x).unwrap();
        for s in &sig_scores {
            assert!(*s > 0.0, "signal score {s} not positive");
        }
        for b in &bkg_scores {
            assert!(*b < 0.0, "background score {b} not negative");
        }
    }

    #[test]
    fn test_combined_mean_score_is_centered() {
        let signal = sample(&[[1.0, 0.5], [1.5, 1.0], [0.8, 0.9]]);
        let background = sample(&[[-0.5, -1.0], [-1.2, -0.3], [-0.9, -0.8]]);
        let mut method = fisher("");
        method.train(&signal, &background).unwrap();

        let all: f64 = method
            .score(&signal.x)
            .unwrap()
            .iter()
            .chain(method.score(&background.x).unwrap().iter())
            .sum();
        assert!(all.abs() < 1e-9, "combined mean score {all} not centered");
    }

    #[test]
    fn test_constant_feature_is_singular() {
        let signal = sample(&[[1.0, 5.0], [2.0, 5.0], [3.0, 5.0]]);
        let background = sample(&[[-1.0, 5.0], [-2.0, 5.0], [-3.0, 5.0]]);
        let mut method = fisher("");
        let err = method.train(&signal, &background).unwrap_err();
        assert!(err.to_string().contains("singular"));
    }

    #[test]
    fn test_weights_shift_the_discriminant() {
        let signal = sample(&[[1.0, 0.0], [3.0, 0.0]]);
        let background = sample(&[[-1.0, 0.1], [-3.0, -0.1]]);
        let mut unweighted = fisher("");
        unweighted.train(&signal, &background).unwrap();

        let mut weighted_sig = signal.clone();
        weighted_sig.w = vec![10.0, 0.1];
        let mut weighted = fisher("");
        weighted.train(&weighted_sig, &background).unwrap();

        let a = unweighted.parameters().unwrap();
        let b = weighted.parameters().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_norm_transform_is_stored_and_replayed() {
        let signal = sample(&[[100.0, 2.0], [110.0, 2.2], [105.0, 1.8]]);
        let background = sample(&[[-100.0, -2.0], [-90.0, -2.2], [-95.0, -1.8]]);
        let mut method = fisher("VarTransform=Norm");
        method.train(&signal, &background).unwrap();

        let ModelParameters::Fisher { transform, .. } = method.parameters().unwrap() else {
            panic!("expected Fisher parameters");
        };
        assert!(transform.is_some());
        // scoring still separates after the rescale
        let sig = method.score(&signal.x).unwrap();
        let bkg = method.score(&background.x).unwrap();
        assert!(sig.iter().all(|s| *s > 0.0));
        assert!(bkg.iter().all(|b| *b < 0.0));
    }

    #[test]
    fn test_score_before_train_fails() {
        let method = fisher("");
        let err = method.score(&arr2(&[[1.0, 2.0]])).unwrap_err();
        assert!(matches!(err, Error::Training { .. }));
    }

    #[test]
    fn test_solve_known_system() {
        let m = arr2(&[[2.0, 1.0], [1.0, 3.0]]);
        let b = Array1::from(vec![5.0, 10.0]);
        let x = solve(m, b).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
    }
}
