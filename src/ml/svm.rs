//! Binary C-support vector classifier trained with SMO.
//!
//! Working-set selection uses second-order information (maximal violating
//! pair with the largest objective decrease); the bias comes from the free
//! support vectors, or the midpoint of the feasible interval when none are
//! free.

use std::fmt;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::{check_training_set, Classifier, ModelError};
use crate::types::Movement;

const TOLERANCE: f64 = 1e-3;
const TAU: f64 = 1e-12;
const MAX_ITER: usize = 100_000;
const POLY_DEGREE: i32 = 3;
const POLY_COEF0: f64 = 0.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    Linear,
    Rbf,
    /// `(gamma * <x, z> + 0)^3`
    Poly,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gamma {
    /// `1 / (n_features * var(X))`
    Scale,
    /// `1 / n_features`
    Auto,
    Value(f64),
}

impl Gamma {
    fn resolve(self, x: ArrayView2<f64>) -> f64 {
        let n_features = x.ncols().max(1) as f64;
        match self {
            Gamma::Scale => {
                let var = x.var(0.0);
                if var > 0.0 {
                    1.0 / (n_features * var)
                } else {
                    1.0
                }
            }
            Gamma::Auto => 1.0 / n_features,
            Gamma::Value(g) => g,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SvmParams {
    pub c: f64,
    pub kernel: Kernel,
    pub gamma: Gamma,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            kernel: Kernel::Rbf,
            gamma: Gamma::Scale,
        }
    }
}

impl fmt::Display for SvmParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gamma = match self.gamma {
            Gamma::Scale => "scale".to_string(),
            Gamma::Auto => "auto".to_string(),
            Gamma::Value(g) => g.to_string(),
        };
        write!(f, "C={}, kernel={:?}, gamma={gamma}", self.c, self.kernel)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct KernelFn {
    kind: Kernel,
    gamma: f64,
}

impl KernelFn {
    fn eval(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.kind {
            Kernel::Linear => a.dot(&b),
            Kernel::Rbf => {
                let dist: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
                (-self.gamma * dist).exp()
            }
            Kernel::Poly => (self.gamma * a.dot(&b) + POLY_COEF0).powi(POLY_DEGREE),
        }
    }
}

/// Flexion is the positive class of the decision function.
#[derive(Clone, Debug, PartialEq)]
pub struct SvmClassifier {
    kernel: KernelFn,
    support_vectors: Array2<f64>,
    /// `alpha_i * y_i` for each support vector.
    dual_coef: Array1<f64>,
    rho: f64,
    n_features: usize,
}

fn sign(m: Movement) -> f64 {
    if m == Movement::ORDER[0] {
        1.0
    } else {
        -1.0
    }
}

impl SvmClassifier {
    pub fn fit(x: ArrayView2<f64>, y: &[Movement], params: &SvmParams) -> Result<Self, ModelError> {
        check_training_set(x, y)?;
        if !(params.c > 0.0) {
            return Err(ModelError::InvalidParams(format!("C = {} must be positive", params.c)));
        }
        let kernel = KernelFn {
            kind: params.kernel,
            gamma: params.gamma.resolve(x),
        };
        if !(kernel.gamma.is_finite() && kernel.gamma > 0.0) {
            return Err(ModelError::InvalidParams(format!("gamma = {}", kernel.gamma)));
        }
        let n = y.len();
        let c = params.c;
        let signs: Vec<f64> = y.iter().map(|&m| sign(m)).collect();
        let gram = Array2::from_shape_fn((n, n), |(i, j)| kernel.eval(x.row(i), x.row(j)));
        if gram.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::Diverged("kernel matrix is not finite".into()));
        }

        let mut alpha = vec![0.0; n];
        let mut grad = vec![-1.0; n];
        let upper = |a: f64| a >= c;
        let lower = |a: f64| a <= 0.0;

        let mut iterations = 0;
        while iterations < MAX_ITER {
            // i: maximal violator in I_up.
            let mut g_max = f64::NEG_INFINITY;
            let mut i_sel = None;
            for t in 0..n {
                let in_up = if signs[t] > 0.0 { !upper(alpha[t]) } else { !lower(alpha[t]) };
                if in_up && -signs[t] * grad[t] >= g_max {
                    g_max = -signs[t] * grad[t];
                    i_sel = Some(t);
                }
            }
            let Some(i) = i_sel else { break };

            // j: largest second-order decrease in I_low.
            let mut g_max2 = f64::NEG_INFINITY;
            let mut best_obj = f64::INFINITY;
            let mut j_sel = None;
            for t in 0..n {
                let in_low = if signs[t] > 0.0 { !lower(alpha[t]) } else { !upper(alpha[t]) };
                if !in_low {
                    continue;
                }
                let y_grad = signs[t] * grad[t];
                g_max2 = g_max2.max(y_grad);
                let grad_diff = g_max + y_grad;
                if grad_diff > 0.0 {
                    let quad = gram[[i, i]] + gram[[t, t]] - 2.0 * gram[[i, t]];
                    let obj = -(grad_diff * grad_diff) / if quad > 0.0 { quad } else { TAU };
                    if obj <= best_obj {
                        best_obj = obj;
                        j_sel = Some(t);
                    }
                }
            }
            if g_max + g_max2 < TOLERANCE {
                break;
            }
            let Some(j) = j_sel else { break };
            iterations += 1;

            let (old_i, old_j) = (alpha[i], alpha[j]);
            let quad = {
                let q = gram[[i, i]] + gram[[j, j]] - 2.0 * gram[[i, j]];
                if q > 0.0 {
                    q
                } else {
                    TAU
                }
            };
            if signs[i] != signs[j] {
                let delta = (-grad[i] - grad[j]) / quad;
                let diff = alpha[i] - alpha[j];
                alpha[i] += delta;
                alpha[j] += delta;
                if diff > 0.0 {
                    if alpha[j] < 0.0 {
                        alpha[j] = 0.0;
                        alpha[i] = diff;
                    }
                } else if alpha[i] < 0.0 {
                    alpha[i] = 0.0;
                    alpha[j] = -diff;
                }
                if diff > 0.0 {
                    if alpha[i] > c {
                        alpha[i] = c;
                        alpha[j] = c - diff;
                    }
                } else if alpha[j] > c {
                    alpha[j] = c;
                    alpha[i] = c + diff;
                }
            } else {
                let delta = (grad[i] - grad[j]) / quad;
                let sum = alpha[i] + alpha[j];
                alpha[i] -= delta;
                alpha[j] += delta;
                if sum > c {
                    if alpha[i] > c {
                        alpha[i] = c;
                        alpha[j] = sum - c;
                    }
                } else if alpha[j] < 0.0 {
                    alpha[j] = 0.0;
                    alpha[i] = sum;
                }
                if sum > c {
                    if alpha[j] > c {
                        alpha[j] = c;
                        alpha[i] = sum - c;
                    }
                } else if alpha[i] < 0.0 {
                    alpha[i] = 0.0;
                    alpha[j] = sum;
                }
            }

            let (d_i, d_j) = (alpha[i] - old_i, alpha[j] - old_j);
            for k in 0..n {
                let q_ki = signs[k] * signs[i] * gram[[k, i]];
                let q_kj = signs[k] * signs[j] * gram[[k, j]];
                grad[k] += q_ki * d_i + q_kj * d_j;
            }
        }
        if iterations >= MAX_ITER {
            log::warn!("SMO stopped after {MAX_ITER} iterations without converging");
        }

        let rho = bias(&alpha, &grad, &signs, c);
        if !rho.is_finite() {
            return Err(ModelError::Diverged(format!("bias {rho}")));
        }
        let support: Vec<usize> = (0..n).filter(|&i| alpha[i] > 0.0).collect();
        let support_vectors = x.select(ndarray::Axis(0), &support);
        let dual_coef = support.iter().map(|&i| alpha[i] * signs[i]).collect();
        log::trace!("SMO: {iterations} iterations, {} support vectors", support.len());
        Ok(Self {
            kernel,
            support_vectors,
            dual_coef,
            rho,
            n_features: x.ncols(),
        })
    }

    pub fn support_vector_count(&self) -> usize {
        self.dual_coef.len()
    }

    /// Positive values favour flexion.
    pub fn decision_value(&self, row: ArrayView1<f64>) -> f64 {
        self.support_vectors
            .rows()
            .into_iter()
            .zip(self.dual_coef.iter())
            .map(|(sv, coef)| coef * self.kernel.eval(sv, row))
            .sum::<f64>()
            - self.rho
    }
}

fn bias(alpha: &[f64], grad: &[f64], signs: &[f64], c: f64) -> f64 {
    let mut ub = f64::INFINITY;
    let mut lb = f64::NEG_INFINITY;
    let mut free = 0usize;
    let mut free_sum = 0.0;
    for t in 0..alpha.len() {
        let y_grad = signs[t] * grad[t];
        if alpha[t] >= c {
            if signs[t] < 0.0 {
                ub = ub.min(y_grad);
            } else {
                lb = lb.max(y_grad);
            }
        } else if alpha[t] <= 0.0 {
            if signs[t] > 0.0 {
                ub = ub.min(y_grad);
            } else {
                lb = lb.max(y_grad);
            }
        } else {
            free += 1;
            free_sum += y_grad;
        }
    }
    if free > 0 {
        free_sum / free as f64
    } else {
        (ub + lb) / 2.0
    }
}

impl Classifier for SvmClassifier {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_one(&self, row: ArrayView1<f64>) -> Movement {
        if self.decision_value(row) > 0.0 {
            Movement::ORDER[0]
        } else {
            Movement::ORDER[1]
        }
    }
}
