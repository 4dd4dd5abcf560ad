use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::ml::mlp::{Activation, MlpParams, Solver};
use crate::ml::svm::{Gamma, Kernel, SvmParams};
use crate::ml::tree::{ClassWeight, Criterion, MaxFeatures, TreeParams};
use crate::ml::{Hyperparams, ModelFamily};
use crate::signal::wavelet::Wavelet;
use crate::split::SplitPolicy;
use crate::types::SubjectKey;

/// Bumped whenever a default below changes, so stored results can be matched
/// to the numeric setup that produced them.
pub const CONFIG_VERSION: u32 = 1;

/// Every numeric constant the pipeline depends on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub version: u32,
    pub filter: FilterConfig,
    pub features: FeatureConfig,
    pub split: SplitConfig,
    pub trainer: TrainerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            filter: FilterConfig::default(),
            features: FeatureConfig::default(),
            split: SplitConfig::default(),
            trainer: TrainerConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.filter.validate()?;
        self.features.validate()?;
        self.split.validate()?;
        self.trainer.validate()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub sample_rate_hz: f64,
    pub min_trial_len: usize,
    pub bandpass_low_hz: f64,
    pub bandpass_high_hz: f64,
    pub bandpass_order: usize,
    pub notch_count: usize,
    pub notch_q: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 500.0,
            // Shortest signal the order-5 forward-backward pass can pad.
            min_trial_len: 34,
            bandpass_low_hz: 20.0,
            bandpass_high_hz: 200.0,
            bandpass_order: 5,
            notch_count: 4,
            notch_q: 20.0,
        }
    }
}

impl FilterConfig {
    /// Edge padding used by the zero-phase pass: three times the length of the
    /// equivalent transfer-function coefficient vectors.
    pub fn padding_len(&self) -> usize {
        3 * (2 * self.bandpass_order + 1)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let nyquist = self.sample_rate_hz / 2.0;
        if !(self.sample_rate_hz > 0.0) {
            return invalid("filter.sample_rate_hz", "must be greater than zero");
        }
        if !(self.bandpass_low_hz > 0.0
            && self.bandpass_low_hz < self.bandpass_high_hz
            && self.bandpass_high_hz < nyquist)
        {
            return invalid(
                "filter.bandpass_low_hz",
                format!(
                    "cutoffs must satisfy 0 < {} < {} < {nyquist}",
                    self.bandpass_low_hz, self.bandpass_high_hz
                ),
            );
        }
        if !(1..=10).contains(&self.bandpass_order) {
            return invalid("filter.bandpass_order", "must be between 1 and 10");
        }
        if self.min_trial_len <= self.padding_len() {
            return invalid(
                "filter.min_trial_len",
                format!("must exceed the filter padding of {}", self.padding_len()),
            );
        }
        if !(self.notch_q > 0.0) {
            return invalid("filter.notch_q", "must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub wavelet: Wavelet,
    pub wavelet_levels: usize,
    pub histogram_bins: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            wavelet: Wavelet::Db4,
            wavelet_levels: 4,
            histogram_bins: 50,
        }
    }
}

impl FeatureConfig {
    fn validate(&self) -> Result<(), PipelineError> {
        if self.wavelet_levels == 0 {
            return invalid("features.wavelet_levels", "must be at least 1");
        }
        if self.histogram_bins < 2 {
            return invalid("features.histogram_bins", "must be at least 2");
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitPolicyKind {
    Automatic,
    Manual,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub policy: SplitPolicyKind,
    pub test_fraction: f64,
    pub random_seed: u64,
    /// Raw subject identifiers; normalized the same way dataset subjects are.
    pub manual_test_subjects: Vec<String>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            policy: SplitPolicyKind::Automatic,
            test_fraction: 0.3,
            random_seed: 42,
            manual_test_subjects: Vec::new(),
        }
    }
}

impl SplitConfig {
    pub fn policy(&self) -> SplitPolicy {
        match self.policy {
            SplitPolicyKind::Automatic => SplitPolicy::Automatic {
                test_fraction: self.test_fraction,
                seed: self.random_seed,
            },
            SplitPolicyKind::Manual => SplitPolicy::Manual {
                test_subjects: self
                    .manual_test_subjects
                    .iter()
                    .map(|raw| SubjectKey::normalize(raw))
                    .collect(),
            },
        }
    }

    fn validate(&self) -> Result<(), PipelineError> {
        match self.policy {
            SplitPolicyKind::Automatic => {
                if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
                    return invalid(
                        "split.test_fraction",
                        format!("{} is outside (0, 1)", self.test_fraction),
                    );
                }
            }
            SplitPolicyKind::Manual => {
                if self.manual_test_subjects.is_empty() {
                    return invalid(
                        "split.manual_test_subjects",
                        "manual policy needs at least one subject",
                    );
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub cv_folds: usize,
    pub random_seed: u64,
    pub decision_tree: Option<TreeGrid>,
    pub svm: Option<SvmGrid>,
    pub neural_network: Option<MlpGrid>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            cv_folds: 5,
            random_seed: 42,
            decision_tree: Some(TreeGrid::default()),
            svm: Some(SvmGrid::default()),
            neural_network: Some(MlpGrid::default()),
        }
    }
}

impl TrainerConfig {
    /// Configured families with their expanded candidate lists, in
    /// enumeration order (tree, SVM, neural network).
    pub fn families(&self) -> Vec<(ModelFamily, Vec<Hyperparams>)> {
        let mut families = Vec::new();
        if let Some(grid) = &self.decision_tree {
            families.push((ModelFamily::DecisionTree, grid.candidates()));
        }
        if let Some(grid) = &self.svm {
            families.push((ModelFamily::Svm, grid.candidates()));
        }
        if let Some(grid) = &self.neural_network {
            families.push((ModelFamily::NeuralNetwork, grid.candidates()));
        }
        families
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.cv_folds < 2 {
            return invalid("trainer.cv_folds", "must be at least 2");
        }
        let families = self.families();
        if families.is_empty() {
            return invalid("trainer", "no model family configured");
        }
        for (family, candidates) in &families {
            if candidates.is_empty() {
                return invalid("trainer", format!("{family} grid has an empty axis"));
            }
        }
        if let Some(grid) = &self.svm {
            if grid.c.iter().any(|c| !(*c > 0.0)) {
                return invalid("trainer.svm.c", "every C must be greater than zero");
            }
        }
        if let Some(grid) = &self.neural_network {
            if grid.hidden_layer_sizes.iter().flatten().any(|&n| n == 0) {
                return invalid(
                    "trainer.neural_network.hidden_layer_sizes",
                    "layers need at least one unit",
                );
            }
            if grid.alpha.iter().any(|a| !(*a >= 0.0)) {
                return invalid("trainer.neural_network.alpha", "must be non-negative");
            }
            if grid.max_iter == 0 {
                return invalid("trainer.neural_network.max_iter", "must be at least 1");
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeGrid {
    pub criterion: Vec<Criterion>,
    pub max_depth: Vec<Option<usize>>,
    pub min_samples_split: Vec<usize>,
    pub min_samples_leaf: Vec<usize>,
    pub max_features: Vec<MaxFeatures>,
    pub class_weight: Vec<ClassWeight>,
}

impl Default for TreeGrid {
    fn default() -> Self {
        Self {
            criterion: vec![Criterion::Gini],
            max_depth: [3, 5, 7, 10, 12, 15, 20].into_iter().map(Some).collect(),
            min_samples_split: vec![2, 5, 10],
            min_samples_leaf: vec![1, 2, 4],
            max_features: vec![MaxFeatures::Sqrt, MaxFeatures::Log2],
            class_weight: vec![ClassWeight::None, ClassWeight::Balanced],
        }
    }
}

impl TreeGrid {
    pub fn candidates(&self) -> Vec<Hyperparams> {
        let mut out = Vec::new();
        for &criterion in &self.criterion {
            for &max_depth in &self.max_depth {
                for &min_samples_split in &self.min_samples_split {
                    for &min_samples_leaf in &self.min_samples_leaf {
                        for &max_features in &self.max_features {
                            for &class_weight in &self.class_weight {
                                out.push(Hyperparams::Tree(TreeParams {
                                    criterion,
                                    max_depth,
                                    min_samples_split,
                                    min_samples_leaf,
                                    max_features,
                                    class_weight,
                                }));
                            }
                        }
                    }
                }
            }
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmGrid {
    pub c: Vec<f64>,
    pub kernel: Vec<Kernel>,
    pub gamma: Vec<Gamma>,
}

impl Default for SvmGrid {
    fn default() -> Self {
        Self {
            c: vec![0.1, 1.0, 10.0],
            kernel: vec![Kernel::Linear, Kernel::Rbf, Kernel::Poly],
            gamma: vec![Gamma::Scale, Gamma::Auto],
        }
    }
}

impl SvmGrid {
    pub fn candidates(&self) -> Vec<Hyperparams> {
        let mut out = Vec::new();
        for &c in &self.c {
            for &kernel in &self.kernel {
                for &gamma in &self.gamma {
                    out.push(Hyperparams::Svm(SvmParams { c, kernel, gamma }));
                }
            }
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpGrid {
    pub hidden_layer_sizes: Vec<Vec<usize>>,
    pub activation: Vec<Activation>,
    pub solver: Vec<Solver>,
    pub alpha: Vec<f64>,
    pub max_iter: usize,
}

impl Default for MlpGrid {
    fn default() -> Self {
        Self {
            hidden_layer_sizes: vec![vec![50], vec![100], vec![100, 50]],
            activation: vec![Activation::Relu, Activation::Tanh],
            solver: vec![Solver::Adam, Solver::Sgd],
            alpha: vec![0.0001, 0.001, 0.01],
            max_iter: 1000,
        }
    }
}

impl MlpGrid {
    pub fn candidates(&self) -> Vec<Hyperparams> {
        let mut out = Vec::new();
        for hidden in &self.hidden_layer_sizes {
            for &activation in &self.activation {
                for &solver in &self.solver {
                    for &alpha in &self.alpha {
                        out.push(Hyperparams::Mlp(MlpParams {
                            hidden_layers: hidden.clone(),
                            activation,
                            solver,
                            alpha,
                            max_iter: self.max_iter,
                        }));
                    }
                }
            }
        }
        out
    }
}

fn invalid<T>(field: &'static str, reason: impl Into<String>) -> Result<T, PipelineError> {
    Err(PipelineError::InvalidConfig {
        field,
        reason: reason.into(),
    })
}
