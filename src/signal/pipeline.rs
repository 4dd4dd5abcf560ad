use rayon::prelude::*;

use crate::config::FilterConfig;
use crate::error::{PipelineError, TrialError};
use crate::signal::fft::SpectrumBuilder;
use crate::signal::filter::{FilterChain, FilterDesignError};
use crate::signal::Trial;
use crate::types::TrialKey;

/// A trial's samples after band-pass and adaptive notch filtering.
#[derive(Clone, Debug, PartialEq)]
pub struct FilteredSignal {
    pub key: TrialKey,
    pub samples: Vec<f64>,
    pub sample_rate_hz: f64,
    /// Notch centre frequencies in the order they were applied.
    pub notched_hz: Vec<f64>,
}

/// Result of filtering a batch: survivors in input order plus the rejects.
#[derive(Clone, Debug, Default)]
pub struct FilterBatch {
    pub signals: Vec<FilteredSignal>,
    pub failures: Vec<TrialError>,
}

/// Zero-phase band-pass followed by notches on the strongest spectral bins.
pub struct FilterStage {
    config: FilterConfig,
    bandpass: FilterChain,
}

impl FilterStage {
    pub fn new(config: &FilterConfig) -> Result<Self, PipelineError> {
        let bandpass = FilterChain::butterworth_bandpass(
            config.bandpass_order,
            config.bandpass_low_hz,
            config.bandpass_high_hz,
            config.sample_rate_hz,
        )
        .map_err(|e| PipelineError::InvalidConfig {
            field: "filter",
            reason: e.to_string(),
        })?;
        Ok(Self {
            config: config.clone(),
            bandpass,
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn apply(&self, trial: &Trial) -> Result<FilteredSignal, TrialError> {
        let key = trial.key();
        let fs = self.config.sample_rate_hz;
        if (trial.sample_rate_hz - fs).abs() > 1e-9 {
            return Err(TrialError::SampleRateMismatch {
                key,
                expected: fs,
                actual: trial.sample_rate_hz,
            });
        }
        if trial.len() < self.config.min_trial_len {
            return Err(TrialError::TrialTooShort {
                key,
                len: trial.len(),
                min: self.config.min_trial_len,
            });
        }
        let numerical = |key: &TrialKey, e: FilterDesignError| TrialError::FilterNumericalFailure {
            key: key.clone(),
            reason: e.to_string(),
        };

        let mut samples = self
            .bandpass
            .filtfilt(&trial.samples)
            .map_err(|e| numerical(&key, e))?;

        let spectrum = SpectrumBuilder::new().single_sided(&samples, fs);
        // Weakest of the selected bins first.
        let mut notched_hz = Vec::with_capacity(self.config.notch_count);
        for bin in spectrum.dominant_bins(self.config.notch_count).into_iter().rev() {
            let freq_hz = spectrum.frequencies_hz[bin];
            let notch = FilterChain::notch(freq_hz, self.config.notch_q, fs)
                .map_err(|e| numerical(&key, e))?;
            samples = notch.filter(&samples).map_err(|e| numerical(&key, e))?;
            notched_hz.push(freq_hz);
        }

        Ok(FilteredSignal {
            key,
            samples,
            sample_rate_hz: fs,
            notched_hz,
        })
    }

    /// Filter every trial independently; a failing trial never stops the rest.
    pub fn filter_all(&self, trials: &[Trial]) -> FilterBatch {
        let results: Vec<Result<FilteredSignal, TrialError>> =
            trials.par_iter().map(|trial| self.apply(trial)).collect();
        let mut batch = FilterBatch::default();
        for result in results {
            match result {
                Ok(signal) => batch.signals.push(signal),
                Err(err) => {
                    log::warn!("trial excluded: {err}");
                    batch.failures.push(err);
                }
            }
        }
        log::info!(
            "filtered {} trials ({} excluded)",
            batch.signals.len(),
            batch.failures.len()
        );
        batch
    }
}
