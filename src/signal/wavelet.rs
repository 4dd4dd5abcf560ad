//! Multilevel discrete wavelet transform with symmetric boundary extension.
//!
//! Band lengths follow the usual `(n + L - 1) / 2` rule per level, so the
//! reconstruction can overshoot the input by one sample; callers pass the
//! original length to [`waverec`] to clip it.

use serde::{Deserialize, Serialize};

/// Orthogonal wavelet basis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Wavelet {
    Haar,
    Db2,
    Db4,
}

impl Wavelet {
    /// Low-pass decomposition filter.
    fn dec_lo(self) -> &'static [f64] {
        match self {
            Wavelet::Haar => &[std::f64::consts::FRAC_1_SQRT_2, std::f64::consts::FRAC_1_SQRT_2],
            Wavelet::Db2 => &[
                -0.12940952255092145,
                0.22414386804185735,
                0.836516303737469,
                0.48296291314469025,
            ],
            Wavelet::Db4 => &[
                -0.010597401784997278,
                0.032883011666982945,
                0.030841381835986965,
                -0.18703481171888114,
                -0.02798376941698385,
                0.6308807679295904,
                0.7148465705525415,
                0.23037781330885523,
            ],
        }
    }

    pub fn filter_len(self) -> usize {
        self.dec_lo().len()
    }

    fn filter_bank(self) -> FilterBank {
        let dec_lo = self.dec_lo().to_vec();
        let n = dec_lo.len();
        let dec_hi: Vec<f64> = (0..n)
            .map(|k| {
                let sign = if k % 2 == 0 { -1.0 } else { 1.0 };
                sign * dec_lo[n - 1 - k]
            })
            .collect();
        let rec_lo = dec_lo.iter().rev().copied().collect();
        let rec_hi = dec_hi.iter().rev().copied().collect();
        FilterBank {
            dec_lo,
            dec_hi,
            rec_lo,
            rec_hi,
        }
    }
}

struct FilterBank {
    dec_lo: Vec<f64>,
    dec_hi: Vec<f64>,
    rec_lo: Vec<f64>,
    rec_hi: Vec<f64>,
}

/// Coefficients of a multilevel decomposition.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveletBands {
    pub approximation: Vec<f64>,
    /// Detail bands, coarsest level first.
    pub details: Vec<Vec<f64>>,
}

impl WaveletBands {
    /// Approximation followed by the details, coarsest to finest.
    pub fn bands(&self) -> impl Iterator<Item = &[f64]> {
        std::iter::once(self.approximation.as_slice()).chain(self.details.iter().map(Vec::as_slice))
    }

    pub fn band_count(&self) -> usize {
        1 + self.details.len()
    }

    pub fn band_lengths(&self) -> Vec<usize> {
        self.bands().map(<[f64]>::len).collect()
    }
}

/// Mirror an out-of-range index back into `0..n` (half-sample symmetric).
fn symmetric_index(mut i: isize, n: usize) -> usize {
    let n = n as isize;
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i as usize;
        }
    }
}

fn dwt(signal: &[f64], bank: &FilterBank) -> (Vec<f64>, Vec<f64>) {
    let n = signal.len();
    let taps = bank.dec_lo.len();
    let out_len = (n + taps - 1) / 2;
    let mut approx = vec![0.0; out_len];
    let mut detail = vec![0.0; out_len];
    for i in 0..out_len {
        let centre = 2 * i as isize + 1;
        for j in 0..taps {
            let x = signal[symmetric_index(centre - j as isize, n)];
            approx[i] += bank.dec_lo[j] * x;
            detail[i] += bank.dec_hi[j] * x;
        }
    }
    (approx, detail)
}

fn idwt(approx: &[f64], detail: &[f64], bank: &FilterBank) -> Vec<f64> {
    let n = approx.len().min(detail.len());
    let taps = bank.rec_lo.len();
    let out_len = (2 * n + 2).saturating_sub(taps);
    let mut out = vec![0.0; out_len];
    for i in 0..n {
        for j in 0..taps {
            let t = (2 * i + j) as isize - (taps as isize - 2);
            if t >= 0 && (t as usize) < out_len {
                out[t as usize] += approx[i] * bank.rec_lo[j] + detail[i] * bank.rec_hi[j];
            }
        }
    }
    out
}

/// Decompose `signal` into `levels` detail bands plus one approximation.
///
/// Always yields `levels + 1` bands; every band is empty for an empty signal.
pub fn wavedec(signal: &[f64], wavelet: Wavelet, levels: usize) -> WaveletBands {
    if signal.is_empty() {
        return WaveletBands {
            approximation: Vec::new(),
            details: vec![Vec::new(); levels],
        };
    }
    let bank = wavelet.filter_bank();
    let mut approximation = signal.to_vec();
    let mut details = Vec::with_capacity(levels);
    for _ in 0..levels {
        let (a, d) = dwt(&approximation, &bank);
        details.push(d);
        approximation = a;
    }
    details.reverse();
    WaveletBands {
        approximation,
        details,
    }
}

/// Inverse of [`wavedec`], clipped to `original_len` samples.
pub fn waverec(bands: &WaveletBands, wavelet: Wavelet, original_len: usize) -> Vec<f64> {
    let bank = wavelet.filter_bank();
    let mut approx = bands.approximation.clone();
    for detail in &bands.details {
        if approx.len() == detail.len() + 1 {
            approx.pop();
        }
        approx = idwt(&approx, detail, &bank);
    }
    approx.truncate(original_len);
    approx
}

/// Keep only the coarsest approximation band and reconstruct.
pub fn smooth(signal: &[f64], wavelet: Wavelet, levels: usize) -> Vec<f64> {
    let mut bands = wavedec(signal, wavelet, levels);
    for detail in &mut bands.details {
        detail.iter_mut().for_each(|c| *c = 0.0);
    }
    waverec(&bands, wavelet, signal.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn noisy(n: usize) -> Vec<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        (0..n)
            .map(|i| (i as f64 * 0.3).sin() + rng.gen_range(-0.5..0.5))
            .collect()
    }

    #[test]
    fn full_reconstruction_reproduces_input() {
        for wavelet in [Wavelet::Haar, Wavelet::Db2, Wavelet::Db4] {
            for n in [34, 100, 257] {
                let signal = noisy(n);
                let bands = wavedec(&signal, wavelet, 4);
                let rebuilt = waverec(&bands, wavelet, n);
                assert_eq!(rebuilt.len(), n);
                for (a, b) in signal.iter().zip(&rebuilt) {
                    assert!((a - b).abs() < 1e-9, "{wavelet:?} n={n}");
                }
            }
        }
    }

    #[test]
    fn db4_band_lengths_for_a_short_trial() {
        let bands = wavedec(&noisy(34), Wavelet::Db4, 4);
        assert_eq!(bands.band_count(), 5);
        assert_eq!(bands.band_lengths(), vec![8, 8, 10, 13, 20]);
    }

    #[test]
    fn constant_signal_has_no_haar_detail() {
        let bands = wavedec(&[2.0; 64], Wavelet::Haar, 3);
        assert!(bands.details.iter().flatten().all(|d| d.abs() < 1e-12));
        let smoothed = smooth(&[2.0; 64], Wavelet::Haar, 3);
        assert!(smoothed.iter().all(|v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn smoothing_keeps_length_and_reduces_roughness() {
        let signal = noisy(301);
        let smoothed = smooth(&signal, Wavelet::Db4, 4);
        assert_eq!(smoothed.len(), signal.len());
        let roughness = |s: &[f64]| s.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>();
        assert!(roughness(&smoothed) < 0.5 * roughness(&signal));
    }

    #[test]
    fn symmetric_extension_mirrors_edges() {
        assert_eq!(symmetric_index(-1, 5), 0);
        assert_eq!(symmetric_index(-3, 5), 2);
        assert_eq!(symmetric_index(5, 5), 4);
        assert_eq!(symmetric_index(7, 5), 2);
    }

    #[test]
    fn band_count_is_fixed_by_the_level_count() {
        for n in [0, 1, 5, 34] {
            let bands = wavedec(&noisy(n), Wavelet::Db4, 4);
            assert_eq!(bands.band_count(), 5, "n = {n}");
            if n > 0 {
                assert!(bands.bands().all(|b| !b.is_empty()), "n = {n}");
            }
        }
        assert!(smooth(&[], Wavelet::Db4, 4).is_empty());
    }
}
