use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::PipelineError;
use crate::types::{Movement, TrialKey};

/// One capture of samples for a given subject and movement.
#[derive(Clone, Debug, PartialEq)]
pub struct Trial {
    /// Raw subject identifier as delivered by the acquisition side.
    pub subject: String,
    pub movement_code: i64,
    pub samples: Vec<f64>, // acquisition order
    pub sample_rate_hz: f64,
}

impl Trial {
    pub fn new(
        subject: impl Into<String>,
        movement_code: i64,
        samples: Vec<f64>,
        sample_rate_hz: f64,
    ) -> Self {
        Self {
            subject: subject.into(),
            movement_code,
            samples,
            sample_rate_hz,
        }
    }

    pub fn key(&self) -> TrialKey {
        TrialKey::new(self.subject.clone(), self.movement_code)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Option<Duration> {
        if self.sample_rate_hz > 0.0 {
            Some(Duration::from_secs_f64(
                self.samples.len() as f64 / self.sample_rate_hz,
            ))
        } else {
            None
        }
    }
}

/// Trait representing something that can yield trials on demand.
pub trait TrialSource {
    fn next_trial(&mut self) -> Result<Option<Trial>, PipelineError>;
}

/// Pull every remaining trial out of a source.
pub fn drain<S: TrialSource>(source: &mut S) -> Result<Vec<Trial>, PipelineError> {
    let mut trials = Vec::new();
    while let Some(trial) = source.next_trial()? {
        trials.push(trial);
    }
    Ok(trials)
}

/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<Trial>,
}

impl ManualSource {
    pub fn new(trials: impl IntoIterator<Item = Trial>) -> Self {
        Self {
            queue: trials.into_iter().collect(),
        }
    }
}

impl TrialSource for ManualSource {
    fn next_trial(&mut self) -> Result<Option<Trial>, PipelineError> {
        Ok(self.queue.pop_front())
    }
}

/// Seeded generator of flexion/extension-like EMG bursts.
///
/// Each trial is band-limited noise under a smooth activation envelope plus
/// 60 Hz powerline hum and a slow baseline drift. Flexion bursts are longer
/// and carry more low-frequency content than extension bursts, which is what
/// the feature extractor picks up.
pub struct SyntheticSource {
    rng: ChaCha8Rng,
    subjects: Vec<String>,
    samples_per_trial: usize,
    sample_rate_hz: f64,
    pending: VecDeque<(String, Movement)>,
}

impl SyntheticSource {
    pub fn new(subject_count: usize, samples_per_trial: usize, seed: u64) -> Self {
        let subjects: Vec<String> = (1..=subject_count).map(|i| format!("S{i:02}")).collect();
        let pending = subjects
            .iter()
            .flat_map(|s| Movement::ORDER.into_iter().map(move |m| (s.clone(), m)))
            .collect();
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            subjects,
            samples_per_trial,
            sample_rate_hz: 500.0,
            pending,
        }
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    fn synthesize(&mut self, movement: Movement) -> Vec<f64> {
        let n = self.samples_per_trial;
        let fs = self.sample_rate_hz;
        let (carrier_hz, burst_fraction, gain) = match movement {
            Movement::Flexion => (45.0, 0.7, 1.0),
            Movement::Extension => (120.0, 0.35, 0.6),
        };
        let carrier_hz = carrier_hz * self.rng.gen_range(0.9..1.1);
        let hum_phase = self.rng.gen_range(0.0..2.0 * PI);
        let burst_len = (n as f64 * burst_fraction).max(1.0);
        let burst_start = (n as f64 - burst_len) / 2.0;
        (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                let pos = (i as f64 - burst_start) / burst_len;
                let envelope = if (0.0..=1.0).contains(&pos) {
                    (PI * pos).sin().powi(2)
                } else {
                    0.0
                };
                let noise: f64 = self.rng.gen_range(-1.0..1.0);
                let emg = gain * envelope * ((2.0 * PI * carrier_hz * t).sin() + 0.5 * noise);
                let hum = 0.3 * (2.0 * PI * 60.0 * t + hum_phase).sin();
                let drift = 0.2 * (2.0 * PI * 0.5 * t).sin();
                emg + hum + drift + 0.05 * noise
            })
            .collect()
    }
}

impl TrialSource for SyntheticSource {
    fn next_trial(&mut self) -> Result<Option<Trial>, PipelineError> {
        let Some((subject, movement)) = self.pending.pop_front() else {
            return Ok(None);
        };
        let samples = self.synthesize(movement);
        Ok(Some(Trial::new(
            subject,
            movement.code(),
            samples,
            self.sample_rate_hz,
        )))
    }
}
