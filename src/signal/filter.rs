use std::f64::consts::PI;

use rustfft::num_complex::Complex64;
use thiserror::Error;

/// Poles closer than this to the real axis are treated as real.
const IMAG_EPS: f64 = 1e-9;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterDesignError {
    #[error("frequency {freq_hz} Hz outside (0, {nyquist_hz}) Hz")]
    FrequencyOutOfRange { freq_hz: f64, nyquist_hz: f64 },
    #[error("quality factor {0} must be greater than zero")]
    InvalidQ(f64),
    #[error("section {index} is unstable")]
    Unstable { index: usize },
    #[error("degenerate coefficients: {0}")]
    Degenerate(String),
    #[error("{len} samples cannot be padded by {padding} for zero-phase filtering")]
    TooShort { len: usize, padding: usize },
    #[error("non-finite value at sample {index}")]
    NonFinite { index: usize },
}

/// Second-order section, normalized so that `a0 == 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    fn is_finite(&self) -> bool {
        [self.b0, self.b1, self.b2, self.a1, self.a2]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Both poles strictly inside the unit circle (stability triangle).
    fn is_stable(&self) -> bool {
        self.a2.abs() < 1.0 && self.a1.abs() < 1.0 + self.a2
    }

    fn response(&self, z: Complex64) -> Complex64 {
        let z_inv = z.inv();
        let z_inv2 = z_inv * z_inv;
        (self.b0 + z_inv * self.b1 + z_inv2 * self.b2) / (1.0 + z_inv * self.a1 + z_inv2 * self.a2)
    }

    fn dc_gain(&self) -> Option<f64> {
        let den = 1.0 + self.a1 + self.a2;
        if den.abs() < 1e-12 {
            None
        } else {
            Some((self.b0 + self.b1 + self.b2) / den)
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

#[derive(Clone, Copy, Debug)]
struct BiquadFilter {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}

impl BiquadFilter {
    fn process(&mut self, input: f64) -> f64 {
        // Transposed direct form II
        let y = self.coeffs.b0 * input + self.state.z1;
        self.state.z1 = self.coeffs.b1 * input - self.coeffs.a1 * y + self.state.z2;
        self.state.z2 = self.coeffs.b2 * input - self.coeffs.a2 * y;
        y
    }
}

/// Cascade of second-order sections applied to whole signals.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterChain {
    sections: Vec<BiquadCoeffs>,
}

impl FilterChain {
    pub fn from_sections(sections: Vec<BiquadCoeffs>) -> Result<Self, FilterDesignError> {
        for (index, section) in sections.iter().enumerate() {
            if !section.is_finite() {
                return Err(FilterDesignError::Degenerate(format!(
                    "section {index} has non-finite coefficients"
                )));
            }
            if !section.is_stable() {
                return Err(FilterDesignError::Unstable { index });
            }
        }
        Ok(Self { sections })
    }

    /// Digital Butterworth band-pass of the given prototype order (the result
    /// has `2 * order` poles), designed through the bilinear transform with
    /// pre-warped edges and unity gain at the geometric centre frequency.
    pub fn butterworth_bandpass(
        order: usize,
        low_hz: f64,
        high_hz: f64,
        sample_rate_hz: f64,
    ) -> Result<Self, FilterDesignError> {
        let nyquist_hz = sample_rate_hz / 2.0;
        for freq_hz in [low_hz, high_hz] {
            if !(freq_hz > 0.0 && freq_hz < nyquist_hz) {
                return Err(FilterDesignError::FrequencyOutOfRange { freq_hz, nyquist_hz });
            }
        }
        if order == 0 || low_hz >= high_hz {
            return Err(FilterDesignError::Degenerate(format!(
                "order {order} with band {low_hz}..{high_hz} Hz"
            )));
        }
        let k = 2.0 * sample_rate_hz;
        let w_low = prewarp(low_hz, sample_rate_hz);
        let w_high = prewarp(high_hz, sample_rate_hz);
        let bandwidth = w_high - w_low;
        let center_sq = w_low * w_high;

        let mut complex_poles = Vec::with_capacity(order);
        let mut real_poles = Vec::new();
        for p in butterworth_prototype(order) {
            // Low-pass to band-pass: every prototype pole splits in two.
            let half = p * (bandwidth / 2.0);
            let root = (half * half - center_sq).sqrt();
            for s in [half + root, half - root] {
                let z = (k + s) / (k - s);
                if z.im > IMAG_EPS {
                    complex_poles.push(z);
                } else if z.im.abs() <= IMAG_EPS {
                    real_poles.push(z.re);
                }
            }
        }
        if complex_poles.len() * 2 + real_poles.len() != 2 * order || real_poles.len() % 2 != 0 {
            return Err(FilterDesignError::Degenerate(format!(
                "unpaired poles ({} complex, {} real)",
                complex_poles.len(),
                real_poles.len()
            )));
        }
        real_poles.sort_by(f64::total_cmp);

        // One zero at z = 1 and one at z = -1 per section.
        let mut sections: Vec<BiquadCoeffs> = complex_poles
            .iter()
            .map(|z| BiquadCoeffs {
                b0: 1.0,
                b1: 0.0,
                b2: -1.0,
                a1: -2.0 * z.re,
                a2: z.norm_sqr(),
            })
            .collect();
        sections.extend(real_poles.chunks(2).map(|pair| BiquadCoeffs {
            b0: 1.0,
            b1: 0.0,
            b2: -1.0,
            a1: -(pair[0] + pair[1]),
            a2: pair[0] * pair[1],
        }));

        let mut chain = Self::from_sections(sections)?;
        let center_rad = 2.0 * (center_sq.sqrt() / k).atan();
        let gain = chain.response(Complex64::from_polar(1.0, center_rad)).norm();
        if !(gain.is_finite() && gain > 0.0) {
            return Err(FilterDesignError::Degenerate(format!(
                "centre gain {gain} cannot be normalized"
            )));
        }
        if let Some(first) = chain.sections.first_mut() {
            first.b0 /= gain;
            first.b1 /= gain;
            first.b2 /= gain;
        }
        Ok(chain)
    }

    /// Second-order IIR notch with -3 dB bandwidth `freq_hz / q`.
    pub fn notch(freq_hz: f64, q: f64, sample_rate_hz: f64) -> Result<Self, FilterDesignError> {
        let nyquist_hz = sample_rate_hz / 2.0;
        if !(freq_hz > 0.0 && freq_hz < nyquist_hz) {
            return Err(FilterDesignError::FrequencyOutOfRange { freq_hz, nyquist_hz });
        }
        if !(q > 0.0) {
            return Err(FilterDesignError::InvalidQ(q));
        }
        let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
        let beta = (w0 / q / 2.0).tan();
        let gain = 1.0 / (1.0 + beta);
        let cos_w0 = w0.cos();
        Self::from_sections(vec![BiquadCoeffs {
            b0: gain,
            b1: -2.0 * gain * cos_w0,
            b2: gain,
            a1: -2.0 * gain * cos_w0,
            a2: 2.0 * gain - 1.0,
        }])
    }

    pub fn sections(&self) -> &[BiquadCoeffs] {
        &self.sections
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Samples reflected onto each edge by [`FilterChain::filtfilt`].
    pub fn padding_len(&self) -> usize {
        3 * (2 * self.sections.len() + 1)
    }

    pub fn magnitude_at(&self, freq_hz: f64, sample_rate_hz: f64) -> f64 {
        let z = Complex64::from_polar(1.0, 2.0 * PI * freq_hz / sample_rate_hz);
        self.response(z).norm()
    }

    fn response(&self, z: Complex64) -> Complex64 {
        self.sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, s| acc * s.response(z))
    }

    /// Causal filtering from rest.
    pub fn filter(&self, input: &[f64]) -> Result<Vec<f64>, FilterDesignError> {
        check_finite(input)?;
        let output = self.run(input, vec![BiquadState::default(); self.sections.len()]);
        check_finite(&output)?;
        Ok(output)
    }

    /// Zero-phase forward-backward filtering.
    ///
    /// Both edges are extended by odd reflection and each pass starts from the
    /// steady state of a step at its first sample, so a constant input maps to
    /// the constant times the DC gain.
    pub fn filtfilt(&self, input: &[f64]) -> Result<Vec<f64>, FilterDesignError> {
        let padding = self.padding_len();
        let n = input.len();
        if n <= padding {
            return Err(FilterDesignError::TooShort { len: n, padding });
        }
        check_finite(input)?;

        let first = input[0];
        let last = input[n - 1];
        let mut extended = Vec::with_capacity(n + 2 * padding);
        extended.extend((1..=padding).rev().map(|i| 2.0 * first - input[i]));
        extended.extend_from_slice(input);
        extended.extend((1..=padding).map(|i| 2.0 * last - input[n - 1 - i]));

        let step_state = self.step_steady_state()?;
        let forward = self.run(&extended, scale_states(&step_state, extended[0]));
        let reversed: Vec<f64> = forward.into_iter().rev().collect();
        let mut backward = self.run(&reversed, scale_states(&step_state, reversed[0]));
        backward.reverse();

        let output = backward[padding..padding + n].to_vec();
        check_finite(&output)?;
        Ok(output)
    }

    fn run(&self, input: &[f64], states: Vec<BiquadState>) -> Vec<f64> {
        let mut filters: Vec<BiquadFilter> = self
            .sections
            .iter()
            .zip(states)
            .map(|(&coeffs, state)| BiquadFilter { coeffs, state })
            .collect();
        input
            .iter()
            .map(|&sample| {
                filters
                    .iter_mut()
                    .fold(sample, |value, section| section.process(value))
            })
            .collect()
    }

    /// Per-section state after an infinitely long unit step.
    fn step_steady_state(&self) -> Result<Vec<BiquadState>, FilterDesignError> {
        let mut input = 1.0;
        let mut states = Vec::with_capacity(self.sections.len());
        for (index, s) in self.sections.iter().enumerate() {
            let gain = s.dc_gain().ok_or_else(|| {
                FilterDesignError::Degenerate(format!("section {index} has a pole at z = 1"))
            })?;
            let output = gain * input;
            states.push(BiquadState {
                z1: output - s.b0 * input,
                z2: s.b2 * input - s.a2 * output,
            });
            input = output;
        }
        Ok(states)
    }
}

fn scale_states(states: &[BiquadState], by: f64) -> Vec<BiquadState> {
    states
        .iter()
        .map(|s| BiquadState {
            z1: s.z1 * by,
            z2: s.z2 * by,
        })
        .collect()
}

fn check_finite(values: &[f64]) -> Result<(), FilterDesignError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(FilterDesignError::NonFinite { index }),
        None => Ok(()),
    }
}

fn prewarp(freq_hz: f64, sample_rate_hz: f64) -> f64 {
    2.0 * sample_rate_hz * (PI * freq_hz / sample_rate_hz).tan()
}

/// Analog Butterworth poles on the left half of the unit circle.
fn butterworth_prototype(order: usize) -> Vec<Complex64> {
    (0..order)
        .map(|k| {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            Complex64::from_polar(1.0, theta)
        })
        .collect()
}
