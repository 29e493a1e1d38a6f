use serde::{Deserialize, Serialize};

use crate::error::{Result, SpkDataError};

/// Default window length in frames.
pub const DEFAULT_WINDOW_FRAMES: usize = 300;
/// Default validation utterances carved out per speaker.
pub const DEFAULT_NUM_VALID: usize = 5;
/// Default number of windows per speaker per epoch.
pub const DEFAULT_SAMPLES_PER_SPEAKER: usize = 150;
/// Fraction of target pairs kept by trial partitioning.
pub const DEFAULT_TARGET_FRACTION: f64 = 0.3;

/// Controls corpus construction, sampling and trial handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpkDataConfig {
    /// Frames per training window.
    pub window_frames: usize,

    /// Utterances moved per speaker into the validation split.
    /// Zero disables the split.
    pub num_valid: usize,

    /// Windows per speaker per epoch.
    pub samples_per_speaker: usize,

    /// Fixed seed for the validation split and samplers. Unset means a fresh
    /// seed per run.
    pub seed: Option<u64>,

    /// Size of the bounded worker pool for bulk reads. Zero means the
    /// available parallelism.
    pub workers: usize,

    /// Load every matrix at build time instead of on demand.
    pub eager: bool,

    /// Target-pair fraction kept by trial partitioning.
    pub target_fraction: f64,

    pub trials: TrialsConfig,
}

/// Training trial generation knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialsConfig {
    /// Evaluation draws per speaker.
    pub per_speaker: usize,
    /// Non-target pairs generated per draw.
    pub negatives_per_target: usize,
    /// Enrollment utterances per trial. Zero generates plain pairs.
    pub num_enroll: usize,
}

impl Default for TrialsConfig {
    fn default() -> Self {
        Self {
            per_speaker: 10,
            negatives_per_target: 1,
            num_enroll: 0,
        }
    }
}

impl Default for SpkDataConfig {
    fn default() -> Self {
        Self {
            window_frames: DEFAULT_WINDOW_FRAMES,
            num_valid: DEFAULT_NUM_VALID,
            samples_per_speaker: DEFAULT_SAMPLES_PER_SPEAKER,
            seed: None,
            workers: 0,
            eager: false,
            target_fraction: DEFAULT_TARGET_FRACTION,
            trials: TrialsConfig::default(),
        }
    }
}

/// Maps a requested pool size to a thread count; zero means the available
/// parallelism.
pub(crate) fn resolve_workers(workers: usize) -> usize {
    if workers > 0 {
        return workers;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl SpkDataConfig {
    /// Replaces zero values that have a meaningful default.
    pub fn with_defaults(mut self) -> Self {
        if self.window_frames == 0 {
            self.window_frames = DEFAULT_WINDOW_FRAMES;
        }
        if self.samples_per_speaker == 0 {
            self.samples_per_speaker = DEFAULT_SAMPLES_PER_SPEAKER;
        }
        self.workers = resolve_workers(self.workers);
        if self.target_fraction == 0.0 {
            self.target_fraction = DEFAULT_TARGET_FRACTION;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_frames == 0 {
            return Err(SpkDataError::Config("window_frames must be positive".into()));
        }
        if !(self.target_fraction > 0.0 && self.target_fraction <= 1.0) {
            return Err(SpkDataError::Config(format!(
                "target_fraction must be in (0, 1], got {}",
                self.target_fraction
            )));
        }
        Ok(())
    }

    /// The seed to use for this run: the configured one, or a fresh one.
    pub fn run_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }
}
