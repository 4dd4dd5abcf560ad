//! CART decision tree over the two movement classes.

use std::fmt;

use ndarray::{ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{class_counts, Classifier, ModelError};
use crate::types::Movement;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    Gini,
    Entropy,
}

/// Features drawn (without replacement) at every node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
}

impl MaxFeatures {
    fn resolve(self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().floor() as usize,
            MaxFeatures::All => n_features,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassWeight {
    None,
    /// `n_samples / (n_classes * n_class_samples)`
    Balanced,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub class_weight: ClassWeight,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            criterion: Criterion::Gini,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            class_weight: ClassWeight::None,
        }
    }
}

impl fmt::Display for TreeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let depth = self
            .max_depth
            .map_or_else(|| "none".to_string(), |d| d.to_string());
        write!(
            f,
            "criterion={:?}, max_depth={depth}, min_samples_split={}, min_samples_leaf={}, max_features={:?}, class_weight={:?}",
            self.criterion, self.min_samples_split, self.min_samples_leaf, self.max_features, self.class_weight
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Leaf {
        class: Movement,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn depth(&self) -> usize {
        match self {
            Node::Leaf { .. } => 0,
            Node::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    fn leaves(&self) -> usize {
        match self {
            Node::Leaf { .. } => 1,
            Node::Split { left, right, .. } => left.leaves() + right.leaves(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecisionTree {
    root: Node,
    n_features: usize,
}

struct Builder<'a> {
    x: ArrayView2<'a, f64>,
    y: Vec<usize>,
    weights: [f64; 2],
    params: TreeParams,
    k_features: usize,
    rng: ChaCha8Rng,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl DecisionTree {
    pub fn fit(
        x: ArrayView2<f64>,
        y: &[Movement],
        params: &TreeParams,
        seed: u64,
    ) -> Result<Self, ModelError> {
        super::check_training_set(x, y)?;
        if params.min_samples_split < 2 || params.min_samples_leaf < 1 {
            return Err(ModelError::InvalidParams(format!(
                "min_samples_split {} / min_samples_leaf {}",
                params.min_samples_split, params.min_samples_leaf
            )));
        }
        let counts = class_counts(y);
        let weights = match params.class_weight {
            ClassWeight::None => [1.0, 1.0],
            ClassWeight::Balanced => {
                let n = y.len() as f64;
                counts.map(|c| if c > 0 { n / (2.0 * c as f64) } else { 0.0 })
            }
        };
        let n_features = x.ncols();
        let mut builder = Builder {
            x,
            y: y.iter().map(|m| m.index()).collect(),
            weights,
            params: params.clone(),
            k_features: params.max_features.resolve(n_features),
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        let indices: Vec<usize> = (0..y.len()).collect();
        let root = builder.grow(&indices, 0);
        Ok(Self { root, n_features })
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    pub fn leaf_count(&self) -> usize {
        self.root.leaves()
    }
}

impl Classifier for DecisionTree {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_one(&self, row: ArrayView1<f64>) -> Movement {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { class } => return *class,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

impl Builder<'_> {
    fn weighted_counts(&self, indices: &[usize]) -> [f64; 2] {
        let mut counts = [0.0; 2];
        for &i in indices {
            counts[self.y[i]] += self.weights[self.y[i]];
        }
        counts
    }

    fn impurity(&self, counts: [f64; 2]) -> f64 {
        let total = counts[0] + counts[1];
        if total <= 0.0 {
            return 0.0;
        }
        match self.params.criterion {
            Criterion::Gini => 1.0 - counts.iter().map(|c| (c / total).powi(2)).sum::<f64>(),
            Criterion::Entropy => counts
                .iter()
                .filter(|&&c| c > 0.0)
                .map(|c| {
                    let p = c / total;
                    -p * p.log2()
                })
                .sum(),
        }
    }

    fn leaf(counts: [f64; 2]) -> Node {
        // Ties go to the first class in order.
        let class = if counts[1] > counts[0] {
            Movement::ORDER[1]
        } else {
            Movement::ORDER[0]
        };
        Node::Leaf { class }
    }

    fn grow(&mut self, indices: &[usize], depth: usize) -> Node {
        let counts = self.weighted_counts(indices);
        let impurity = self.impurity(counts);
        let depth_reached = self.params.max_depth.is_some_and(|d| depth >= d);
        if depth_reached
            || indices.len() < self.params.min_samples_split
            || indices.len() < 2 * self.params.min_samples_leaf
            || impurity <= 1e-12
        {
            return Self::leaf(counts);
        }
        let Some(best) = self.best_split(indices, counts, impurity) else {
            return Self::leaf(counts);
        };
        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| self.x[[i, best.feature]] <= best.threshold);
        log::trace!(
            "depth {depth}: feature {} <= {:.4} (gain {:.4})",
            best.feature,
            best.threshold,
            best.gain
        );
        let left = self.grow(&left_idx, depth + 1);
        let right = self.grow(&right_idx, depth + 1);
        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn best_split(&mut self, indices: &[usize], parent: [f64; 2], impurity: f64) -> Option<BestSplit> {
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(&mut self.rng);
        features.truncate(self.k_features);

        let parent_weight = parent[0] + parent[1];
        let min_leaf = self.params.min_samples_leaf;
        let mut best: Option<BestSplit> = None;
        for feature in features {
            let mut order = indices.to_vec();
            order.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));
            let mut left = [0.0; 2];
            for pos in 0..order.len() - 1 {
                let i = order[pos];
                left[self.y[i]] += self.weights[self.y[i]];
                let here = self.x[[i, feature]];
                let next = self.x[[order[pos + 1], feature]];
                let n_left = pos + 1;
                if next <= here || n_left < min_leaf || order.len() - n_left < min_leaf {
                    continue;
                }
                let right = [parent[0] - left[0], parent[1] - left[1]];
                let w_left = left[0] + left[1];
                let w_right = right[0] + right[1];
                let child = (w_left * self.impurity(left) + w_right * self.impurity(right))
                    / parent_weight;
                let gain = impurity - child;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    let mut threshold = (here + next) / 2.0;
                    if threshold >= next {
                        threshold = here;
                    }
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn labels(codes: &[usize]) -> Vec<Movement> {
        codes.iter().map(|&c| Movement::ORDER[c]).collect()
    }

    #[test]
    fn separable_feature_gives_a_stump() {
        let x = array![[0.0, 5.0], [1.0, 5.0], [2.0, 5.0], [10.0, 5.0], [11.0, 5.0], [12.0, 5.0]];
        let y = labels(&[0, 0, 0, 1, 1, 1]);
        let tree = DecisionTree::fit(x.view(), &y, &TreeParams::default(), 0).unwrap();
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.leaf_count(), 2);
        assert_eq!(tree.predict(x.view()), y);
        assert_eq!(tree.predict_one(array![6.5, 0.0].view()), Movement::Extension);
        assert_eq!(tree.predict_one(array![5.0, 0.0].view()), Movement::Flexion);
    }

    #[test]
    fn depth_limit_is_respected() {
        let x = Array2::from_shape_fn((40, 1), |(i, _)| i as f64);
        let y: Vec<Movement> = (0..40).map(|i| Movement::ORDER[(i / 3) % 2]).collect();
        let params = TreeParams {
            max_depth: Some(2),
            ..TreeParams::default()
        };
        let tree = DecisionTree::fit(x.view(), &y, &params, 0).unwrap();
        assert!(tree.depth() <= 2);
        let full = DecisionTree::fit(x.view(), &y, &TreeParams::default(), 0).unwrap();
        assert_eq!(full.predict(x.view()), y);
    }

    #[test]
    fn balanced_weights_flip_a_mixed_leaf() {
        // x = 0 holds 2 flexion and the only extension sample.
        let x = array![[0.0], [0.0], [0.0], [1.0], [1.0], [1.0], [1.0]];
        let y = labels(&[0, 0, 1, 0, 0, 0, 0]);
        let plain = DecisionTree::fit(x.view(), &y, &TreeParams::default(), 0).unwrap();
        assert_eq!(plain.predict_one(array![0.0].view()), Movement::Flexion);
        let weighted = TreeParams {
            class_weight: ClassWeight::Balanced,
            ..TreeParams::default()
        };
        let tree = DecisionTree::fit(x.view(), &y, &weighted, 0).unwrap();
        // 2 * 7/12 for flexion against 1 * 7/2 for extension.
        assert_eq!(tree.predict_one(array![0.0].view()), Movement::Extension);
        assert_eq!(tree.predict_one(array![1.0].view()), Movement::Flexion);
    }

    #[test]
    fn min_samples_leaf_blocks_tiny_leaves() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0]];
        let y = labels(&[1, 0, 0, 0, 0]);
        let free = DecisionTree::fit(x.view(), &y, &TreeParams::default(), 0).unwrap();
        assert_eq!(free.predict_one(array![0.0].view()), Movement::Extension);
        let params = TreeParams {
            min_samples_leaf: 2,
            ..TreeParams::default()
        };
        let tree = DecisionTree::fit(x.view(), &y, &params, 0).unwrap();
        // The lone extension sample can only sit in a two-sample tied leaf.
        assert_eq!(tree.leaf_count(), 2);
        assert_eq!(tree.predict_one(array![0.0].view()), Movement::Flexion);
    }

    #[test]
    fn max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(18), 4);
        assert_eq!(MaxFeatures::Log2.resolve(18), 4);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::All.resolve(18), 18);
    }

    #[test]
    fn same_seed_same_tree() {
        let x = Array2::from_shape_fn((30, 6), |(i, j)| ((i * 7 + j * 13) % 11) as f64);
        let y: Vec<Movement> = (0..30).map(|i| Movement::ORDER[i % 2]).collect();
        let params = TreeParams {
            max_features: MaxFeatures::Sqrt,
            ..TreeParams::default()
        };
        let a = DecisionTree::fit(x.view(), &y, &params, 42).unwrap();
        let b = DecisionTree::fit(x.view(), &y, &params, 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn params_need_not_outlive_the_fitted_tree() {
        let x = Array2::from_shape_fn((12, 2), |(i, j)| (i * (j + 1)) as f64);
        let y: Vec<Movement> = (0..12)
            .map(|i| if i < 6 { Movement::Flexion } else { Movement::Extension })
            .collect();
        let tree = {
            let params = TreeParams {
                max_depth: Some(2),
                ..TreeParams::default()
            };
            DecisionTree::fit(x.view(), &y, &params, 0).unwrap()
        };
        assert!(tree.depth() <= 2);
        assert_eq!(tree.predict(x.view()), y);
    }
}
