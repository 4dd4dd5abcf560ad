use rustfft::{num_complex::Complex64, FftPlanner};

/// Single-sided magnitude spectrum of one signal.
#[derive(Clone, Debug, PartialEq)]
pub struct FrequencySpectrum {
    pub sample_rate_hz: f64,
    pub frequencies_hz: Vec<f64>,
    pub magnitudes: Vec<f64>,
}

impl FrequencySpectrum {
    pub fn resolution_hz(&self) -> f64 {
        self.frequencies_hz.get(1).copied().unwrap_or(0.0)
    }

    /// Indices of the `count` strongest bins above DC, strongest first.
    /// Equal magnitudes keep the lower-frequency bin first.
    pub fn dominant_bins(&self, count: usize) -> Vec<usize> {
        let mut bins: Vec<usize> = (1..self.magnitudes.len()).collect();
        bins.sort_by(|&a, &b| {
            self.magnitudes[b]
                .total_cmp(&self.magnitudes[a])
                .then(a.cmp(&b))
        });
        bins.truncate(count);
        bins
    }
}

/// Helper that computes FFT magnitude spectra.
pub struct SpectrumBuilder {
    planner: FftPlanner<f64>,
}

impl Default for SpectrumBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumBuilder {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Bins `k = 0..N/2` at `k * fs / N`, magnitudes scaled by `2 / N`.
    pub fn single_sided(&mut self, signal: &[f64], sample_rate_hz: f64) -> FrequencySpectrum {
        let n = signal.len();
        if n == 0 {
            return FrequencySpectrum {
                sample_rate_hz,
                frequencies_hz: Vec::new(),
                magnitudes: Vec::new(),
            };
        }
        let fft = self.planner.plan_fft_forward(n);
        let mut buffer: Vec<Complex64> = signal.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        fft.process(&mut buffer);
        let half = n / 2;
        let frequencies_hz = (0..half)
            .map(|k| k as f64 * sample_rate_hz / n as f64)
            .collect();
        let magnitudes = buffer
            .iter()
            .take(half)
            .map(|c| 2.0 / n as f64 * c.norm())
            .collect();
        FrequencySpectrum {
            sample_rate_hz,
            frequencies_hz,
            magnitudes,
        }
    }
}
