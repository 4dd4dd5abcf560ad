//! Feed-forward classifier with a single logistic output unit.
//!
//! Minimizes mean binary cross-entropy plus an L2 penalty
//! `alpha / (2 * batch) * sum(W^2)` with mini-batches of `min(200, n)` rows.
//! Training stops after `max_iter` epochs, or once the epoch loss has failed
//! to improve by `1e-4` for more than ten consecutive epochs.

use std::fmt;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{check_training_set, Classifier, ModelError};
use crate::types::Movement;

const LEARNING_RATE: f64 = 1e-3;
const MAX_BATCH: usize = 200;
const TOL: f64 = 1e-4;
const N_ITER_NO_CHANGE: usize = 10;
const MOMENTUM: f64 = 0.9;
const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;
const PROB_CLIP: f64 = 1e-15;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Tanh,
    Logistic,
}

impl Activation {
    fn apply(self, z: &mut Array2<f64>) {
        match self {
            Activation::Relu => z.mapv_inplace(|v| v.max(0.0)),
            Activation::Tanh => z.mapv_inplace(f64::tanh),
            Activation::Logistic => z.mapv_inplace(logistic),
        }
    }

    /// Derivative expressed through the activation output.
    fn derivative(self, a: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => a.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Tanh => a.mapv(|v| 1.0 - v * v),
            Activation::Logistic => a.mapv(|v| v * (1.0 - v)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Solver {
    Adam,
    /// Constant learning rate with Nesterov momentum.
    Sgd,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MlpParams {
    pub hidden_layers: Vec<usize>,
    pub activation: Activation,
    pub solver: Solver,
    pub alpha: f64,
    pub max_iter: usize,
}

impl Default for MlpParams {
    fn default() -> Self {
        Self {
            hidden_layers: vec![100],
            activation: Activation::Relu,
            solver: Solver::Adam,
            alpha: 1e-4,
            max_iter: 200,
        }
    }
}

impl fmt::Display for MlpParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layers: Vec<String> = self.hidden_layers.iter().map(|n| n.to_string()).collect();
        write!(
            f,
            "hidden_layer_sizes=({}), activation={:?}, solver={:?}, alpha={}, max_iter={}",
            layers.join(", "),
            self.activation,
            self.solver,
            self.alpha,
            self.max_iter
        )
    }
}

fn logistic(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

/// Parameter tensors ordered `[W0, b0, W1, b1, ...]`; biases are `1 x out`.
#[derive(Clone, Debug, PartialEq)]
pub struct MlpClassifier {
    params: Vec<Array2<f64>>,
    activation: Activation,
    n_features: usize,
    loss_curve: Vec<f64>,
}

enum Optimizer {
    Adam {
        step: i32,
        m: Vec<Array2<f64>>,
        v: Vec<Array2<f64>>,
    },
    Sgd {
        velocity: Vec<Array2<f64>>,
    },
}

impl Optimizer {
    fn new(solver: Solver, params: &[Array2<f64>]) -> Self {
        let zeros = || params.iter().map(|p| Array2::zeros(p.dim())).collect::<Vec<_>>();
        match solver {
            Solver::Adam => Optimizer::Adam {
                step: 0,
                m: zeros(),
                v: zeros(),
            },
            Solver::Sgd => Optimizer::Sgd { velocity: zeros() },
        }
    }

    fn update(&mut self, params: &mut [Array2<f64>], grads: &[Array2<f64>]) {
        match self {
            Optimizer::Adam { step, m, v } => {
                *step += 1;
                let lr = LEARNING_RATE * (1.0 - BETA2.powi(*step)).sqrt() / (1.0 - BETA1.powi(*step));
                for (((p, g), m), v) in params.iter_mut().zip(grads).zip(m.iter_mut()).zip(v.iter_mut()) {
                    m.zip_mut_with(g, |m, &g| *m = BETA1 * *m + (1.0 - BETA1) * g);
                    v.zip_mut_with(g, |v, &g| *v = BETA2 * *v + (1.0 - BETA2) * g * g);
                    ndarray::Zip::from(p)
                        .and(&*m)
                        .and(&*v)
                        .for_each(|p, &m, &v| *p -= lr * m / (v.sqrt() + ADAM_EPS));
                }
            }
            Optimizer::Sgd { velocity } => {
                for ((p, g), vel) in params.iter_mut().zip(grads).zip(velocity.iter_mut()) {
                    vel.zip_mut_with(g, |vel, &g| *vel = MOMENTUM * *vel - LEARNING_RATE * g);
                    ndarray::Zip::from(p)
                        .and(&*vel)
                        .and(g)
                        .for_each(|p, &vel, &g| *p += MOMENTUM * vel - LEARNING_RATE * g);
                }
            }
        }
    }
}

impl MlpClassifier {
    pub fn fit(
        x: ArrayView2<f64>,
        y: &[Movement],
        params: &MlpParams,
        seed: u64,
    ) -> Result<Self, ModelError> {
        check_training_set(x, y)?;
        if params.hidden_layers.iter().any(|&n| n == 0) || params.max_iter == 0 {
            return Err(ModelError::InvalidParams(params.to_string()));
        }
        if !(params.alpha >= 0.0) {
            return Err(ModelError::InvalidParams(format!("alpha = {}", params.alpha)));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut sizes = vec![x.ncols()];
        sizes.extend(&params.hidden_layers);
        sizes.push(1);

        let factor = if params.activation == Activation::Logistic { 2.0 } else { 6.0 };
        let mut weights = Vec::with_capacity(2 * (sizes.len() - 1));
        for pair in sizes.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let bound = (factor / (fan_in + fan_out) as f64).sqrt();
            weights.push(Array2::from_shape_fn((fan_in, fan_out), |_| {
                rng.gen_range(-bound..bound)
            }));
            weights.push(Array2::from_shape_fn((1, fan_out), |_| rng.gen_range(-bound..bound)));
        }

        let mut model = Self {
            params: weights,
            activation: params.activation,
            n_features: x.ncols(),
            loss_curve: Vec::new(),
        };
        let targets: Vec<f64> = y.iter().map(|m| m.index() as f64).collect();
        let n = y.len();
        let batch_size = n.min(MAX_BATCH);
        let mut optimizer = Optimizer::new(params.solver, &model.params);
        let mut order: Vec<usize> = (0..n).collect();
        let mut best_loss = f64::INFINITY;
        let mut no_improvement = 0;

        for epoch in 0..params.max_iter {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;
            for chunk in order.chunks(batch_size) {
                let xb = x.select(Axis(0), chunk);
                let tb = Array2::from_shape_fn((chunk.len(), 1), |(i, _)| targets[chunk[i]]);
                let (loss, grads) = model.loss_and_gradients(&xb, &tb, params.alpha);
                optimizer.update(&mut model.params, &grads);
                epoch_loss += loss * chunk.len() as f64;
            }
            let epoch_loss = epoch_loss / n as f64;
            if !epoch_loss.is_finite() {
                return Err(ModelError::Diverged(format!("loss {epoch_loss} at epoch {epoch}")));
            }
            model.loss_curve.push(epoch_loss);

            if epoch_loss > best_loss - TOL {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            best_loss = best_loss.min(epoch_loss);
            if no_improvement > N_ITER_NO_CHANGE {
                break;
            }
        }
        log::trace!(
            "MLP {}: {} epochs, final loss {:.5}",
            params,
            model.loss_curve.len(),
            best_loss
        );
        Ok(model)
    }

    pub fn epochs(&self) -> usize {
        self.loss_curve.len()
    }

    pub fn loss_curve(&self) -> &[f64] {
        &self.loss_curve
    }

    /// Activations of every layer, input first; the last is P(extension).
    fn forward(&self, x: Array2<f64>) -> Vec<Array2<f64>> {
        let layer_count = self.params.len() / 2;
        let mut activations = Vec::with_capacity(layer_count + 1);
        activations.push(x);
        for layer in 0..layer_count {
            let w = &self.params[2 * layer];
            let b = &self.params[2 * layer + 1];
            let mut z = activations[layer].dot(w) + b;
            if layer + 1 == layer_count {
                z.mapv_inplace(logistic);
            } else {
                self.activation.apply(&mut z);
            }
            activations.push(z);
        }
        activations
    }

    fn loss_and_gradients(
        &self,
        xb: &Array2<f64>,
        tb: &Array2<f64>,
        alpha: f64,
    ) -> (f64, Vec<Array2<f64>>) {
        let nb = xb.nrows() as f64;
        let activations = self.forward(xb.clone());
        let layer_count = self.params.len() / 2;
        let output = &activations[layer_count];

        let data_loss = output
            .iter()
            .zip(tb.iter())
            .map(|(&p, &t)| {
                let p = p.clamp(PROB_CLIP, 1.0 - PROB_CLIP);
                -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
            })
            .sum::<f64>()
            / nb;
        let penalty: f64 = (0..layer_count)
            .map(|l| self.params[2 * l].iter().map(|w| w * w).sum::<f64>())
            .sum();
        let loss = data_loss + 0.5 * alpha * penalty / nb;

        let mut grads = vec![Array2::zeros((0, 0)); self.params.len()];
        let mut delta = output - tb;
        for layer in (0..layer_count).rev() {
            let w = &self.params[2 * layer];
            let a_prev = &activations[layer];
            grads[2 * layer] = (a_prev.t().dot(&delta) + alpha * w) / nb;
            grads[2 * layer + 1] = delta.sum_axis(Axis(0)).insert_axis(Axis(0)) / nb;
            if layer > 0 {
                delta = delta.dot(&w.t()) * self.activation.derivative(a_prev);
            }
        }
        (loss, grads)
    }

    /// Probability that `row` is an extension.
    pub fn extension_probability(&self, row: ArrayView1<f64>) -> f64 {
        let x = row.to_owned().insert_axis(Axis(0));
        let activations = self.forward(x);
        activations
            .last()
            .and_then(|out| out.iter().next().copied())
            .unwrap_or(0.5)
    }
}

impl Classifier for MlpClassifier {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_one(&self, row: ArrayView1<f64>) -> Movement {
        if self.extension_probability(row) > 0.5 {
            Movement::Extension
        } else {
            Movement::Flexion
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs(n_per_class: usize, seed: u64) -> (Array2<f64>, Vec<Movement>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = 2 * n_per_class;
        let y: Vec<Movement> = (0..n).map(|i| Movement::ORDER[i % 2]).collect();
        let x = Array2::from_shape_fn((n, 3), |(i, _)| {
            let centre = if i % 2 == 0 { -2.0 } else { 2.0 };
            centre + rng.gen_range(-0.5..0.5)
        });
        (x, y)
    }

    fn params(solver: Solver, activation: Activation) -> MlpParams {
        MlpParams {
            hidden_layers: vec![10],
            activation,
            solver,
            alpha: 1e-4,
            max_iter: 1000,
        }
    }

    #[test]
    fn adam_separates_blobs() {
        let (x, y) = blobs(20, 1);
        let model = MlpClassifier::fit(x.view(), &y, &params(Solver::Adam, Activation::Relu), 42).unwrap();
        assert_eq!(model.predict(x.view()), y);
        let curve = model.loss_curve();
        assert!(curve[curve.len() - 1] < curve[0]);
    }

    #[test]
    fn sgd_with_two_tanh_layers_reduces_loss() {
        let (x, y) = blobs(20, 2);
        let mut p = params(Solver::Sgd, Activation::Tanh);
        p.hidden_layers = vec![8, 4];
        p.max_iter = 50;
        let model = MlpClassifier::fit(x.view(), &y, &p, 7).unwrap();
        let curve = model.loss_curve();
        assert!(model.epochs() <= 50);
        assert!(curve[curve.len() - 1] < curve[0]);
    }

    #[test]
    fn same_seed_same_network() {
        let (x, y) = blobs(10, 3);
        let p = params(Solver::Adam, Activation::Tanh);
        let a = MlpClassifier::fit(x.view(), &y, &p, 5).unwrap();
        let b = MlpClassifier::fit(x.view(), &y, &p, 5).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_width_layer_is_rejected() {
        let (x, y) = blobs(5, 4);
        let mut p = params(Solver::Adam, Activation::Relu);
        p.hidden_layers = vec![0];
        assert!(matches!(
            MlpClassifier::fit(x.view(), &y, &p, 0),
            Err(ModelError::InvalidParams(_))
        ));
    }

    #[test]
    fn gradients_match_finite_differences() {
        let (x, y) = blobs(3, 5);
        let p = MlpParams {
            max_iter: 1,
            ..params(Solver::Adam, Activation::Tanh)
        };
        let model = MlpClassifier::fit(x.view(), &y, &p, 9).unwrap();
        let targets = Array2::from_shape_fn((y.len(), 1), |(i, _)| y[i].index() as f64);
        let xb = x.to_owned();
        let (_, grads) = model.loss_and_gradients(&xb, &targets, 1e-2);
        let h = 1e-6;
        for (k, idx) in [(0, [1, 2]), (1, [0, 3]), (2, [4, 0])] {
            let mut plus = model.clone();
            plus.params[k][idx] += h;
            let mut minus = model.clone();
            minus.params[k][idx] -= h;
            let numeric = (plus.loss_and_gradients(&xb, &targets, 1e-2).0
                - minus.loss_and_gradients(&xb, &targets, 1e-2).0)
                / (2.0 * h);
            assert!((numeric - grads[k][idx]).abs() < 1e-6, "param {k} {idx:?}");
        }
    }
}
