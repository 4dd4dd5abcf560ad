// src/features.rs
use ndarray::ArrayView1;
use serde::Serialize;
use thiserror::Error;

use crate::config::FeatureConfig;
use crate::signal::wavelet::{self, Wavelet};
use crate::types::{Movement, SubjectKey};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeatureError {
    #[error("signal is empty")]
    Empty,
    #[error("signal has zero variance")]
    ZeroVariance,
    #[error("feature {name} is not finite ({value})")]
    NonFinite { name: String, value: f64 },
}

/// Ordered feature names shared by every vector of a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    /// Statistical and entropy features, then three scalars for each of the
    /// `levels + 1` wavelet bands (approximation first).
    pub fn new(wavelet_levels: usize) -> Self {
        let mut names: Vec<String> = ["skewness", "kurtosis", "entropy"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for band in 0..=wavelet_levels {
            names.push(format!("wavelet_band{band}_energy"));
            names.push(format!("wavelet_band{band}_std"));
            names.push(format!("wavelet_band{band}_mean_abs"));
        }
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Feature values of one (subject, movement) group, co-indexed with the
/// dataset's [`FeatureSchema`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeatureVector {
    pub subject: SubjectKey,
    pub movement: Movement,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn get(&self, schema: &FeatureSchema, name: &str) -> Option<f64> {
        schema.index_of(name).and_then(|i| self.values.get(i).copied())
    }

    pub fn named<'a>(&'a self, schema: &'a FeatureSchema) -> impl Iterator<Item = (&'a str, f64)> {
        schema
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

pub struct FeatureExtractor {
    wavelet: Wavelet,
    levels: usize,
    histogram_bins: usize,
    schema: FeatureSchema,
}

impl FeatureExtractor {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            wavelet: config.wavelet,
            levels: config.wavelet_levels,
            histogram_bins: config.histogram_bins,
            schema: FeatureSchema::new(config.wavelet_levels),
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Compute every feature of `signal`, in schema order.
    ///
    /// Moments and entropy come from the wavelet-smoothed signal; band
    /// statistics come from a decomposition of `signal` itself.
    pub fn extract(&self, signal: &[f64]) -> Result<Vec<f64>, FeatureError> {
        if signal.is_empty() {
            return Err(FeatureError::Empty);
        }
        let smoothed = wavelet::smooth(signal, self.wavelet, self.levels);
        let (mean, std) = mean_std(&smoothed);
        if !(std > 1e-12 * (1.0 + mean.abs())) {
            return Err(FeatureError::ZeroVariance);
        }

        let mut values = Vec::with_capacity(self.schema.len());
        let (skewness, kurtosis) = standardized_moments(&smoothed, mean, std);
        values.push(skewness);
        values.push(kurtosis);
        values.push(histogram_entropy(&smoothed, self.histogram_bins));

        let bands = wavelet::wavedec(signal, self.wavelet, self.levels);
        let energies: Vec<f64> = bands
            .bands()
            .map(|b| b.iter().map(|c| c * c).sum::<f64>())
            .collect();
        let total: f64 = energies.iter().sum();
        for (band, energy) in bands.bands().zip(energies) {
            values.push(if total > 0.0 { energy / total } else { 0.0 });
            values.push(mean_std(band).1);
            values.push(mean_abs(band));
        }

        for (name, &value) in self.schema.names().iter().zip(&values) {
            if !value.is_finite() {
                return Err(FeatureError::NonFinite {
                    name: name.clone(),
                    value,
                });
            }
        }
        Ok(values)
    }
}

/// Population mean and standard deviation; zero for an empty slice.
fn mean_std(values: &[f64]) -> (f64, f64) {
    let view = ArrayView1::from(values);
    match view.mean() {
        Some(mean) => (mean, view.std(0.0)),
        None => (0.0, 0.0),
    }
}

fn mean_abs(values: &[f64]) -> f64 {
    ArrayView1::from(values).mapv(f64::abs).mean().unwrap_or(0.0)
}

/// Third and fourth moments of the z-scored signal (kurtosis is not excess).
fn standardized_moments(values: &[f64], mean: f64, std: f64) -> (f64, f64) {
    let z = ArrayView1::from(values).mapv(|v| (v - mean) / std);
    let skewness = z.mapv(|v| v.powi(3)).mean().unwrap_or(0.0);
    let kurtosis = z.mapv(|v| v.powi(4)).mean().unwrap_or(0.0);
    (skewness, kurtosis)
}

/// Shannon entropy (nats) of an equal-width histogram spanning min..max.
fn histogram_entropy(values: &[f64], bins: usize) -> f64 {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = hi - lo;
    if bins == 0 || !(span > 0.0) {
        return 0.0;
    }
    let mut counts = vec![0usize; bins];
    for v in values {
        let idx = (((v - lo) / span) * bins as f64) as usize;
        counts[idx.min(bins - 1)] += 1;
    }
    let total = values.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.ln()
        })
        .sum()
}
