// src/signal/mod.rs
// 采集侧：试次来源、重组、频谱、滤波器设计与小波
pub mod buffer;
pub mod fft;
pub mod filter;
pub mod pipeline;
pub mod source;
pub mod wavelet;

pub use buffer::{SampleRow, TrialAssembler};
pub use fft::{FrequencySpectrum, SpectrumBuilder};
pub use filter::{BiquadCoeffs, FilterChain, FilterDesignError};
pub use pipeline::{FilterBatch, FilterStage, FilteredSignal};
pub use source::{drain, ManualSource, SyntheticSource, Trial, TrialSource};
pub use wavelet::{Wavelet, WaveletBands};
