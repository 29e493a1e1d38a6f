//! Training windows, whole-utterance items and verification pairs.
//!
//! Every method is a pure function of the corpus plus the caller's RNG.
//! Concurrent training workers each hold their own generator, see
//! [`worker_rng`].

use std::collections::HashSet;
use std::sync::Arc;

use ndarray::{s, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SpkDataConfig;
use crate::corpus::{SpeakerCorpus, ValidationSplit};
use crate::error::{Result, SpkDataError};
use crate::trials::TrialPair;
use crate::types::{
    FeatureMatrix, SpeakerLabel, TrainingWindow, UtteranceId, UtteranceItem, VerificationPair,
};

/// Derives an independent generator for one sampling worker.
pub fn worker_rng(seed: u64, worker: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (worker as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

pub struct Sampler<'a> {
    corpus: &'a SpeakerCorpus,
    split: &'a ValidationSplit,
    window_frames: usize,
    samples_per_speaker: usize,
}

impl<'a> Sampler<'a> {
    pub fn new(
        corpus: &'a SpeakerCorpus,
        split: &'a ValidationSplit,
        window_frames: usize,
        samples_per_speaker: usize,
    ) -> Result<Self> {
        if window_frames == 0 {
            return Err(SpkDataError::Config("window_frames must be positive".into()));
        }
        Ok(Self {
            corpus,
            split,
            window_frames,
            samples_per_speaker,
        })
    }

    pub fn from_config(
        corpus: &'a SpeakerCorpus,
        split: &'a ValidationSplit,
        cfg: &SpkDataConfig,
    ) -> Result<Self> {
        Self::new(corpus, split, cfg.window_frames, cfg.samples_per_speaker)
    }

    pub fn window_frames(&self) -> usize {
        self.window_frames
    }

    /// Windows per epoch: `samples_per_speaker * num_speakers`.
    pub fn epoch_len(&self) -> usize {
        self.samples_per_speaker * self.corpus.num_speakers()
    }

    /// Samples the window for epoch slot `index`; slots cycle over speakers.
    pub fn window_at<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Result<TrainingWindow> {
        self.window(index % self.corpus.num_speakers(), rng)
    }

    /// Assembles a window of exactly `window_frames` frames from random
    /// training utterances of one speaker.
    ///
    /// The first pick starts at a random frame, later picks start at frame 0.
    /// The last frame of an utterance is never used.
    pub fn window<R: Rng + ?Sized>(&self, label: SpeakerLabel, rng: &mut R) -> Result<TrainingWindow> {
        let utts = self.corpus.train_utterances(label);
        if utts.is_empty() {
            return Err(SpkDataError::UnknownSpeakerLabel {
                label,
                num_speakers: self.corpus.num_speakers(),
            });
        }

        let dim = self.corpus.feat_dim();
        let target = self.window_frames;
        let mut data: Vec<f32> = Vec::with_capacity(target * dim);
        let mut filled = 0usize;
        let mut sources = Vec::new();
        let mut too_short: HashSet<usize> = HashSet::new();

        while filled < target {
            let pick = rng.gen_range(0..utts.len());
            let feats = self.corpus.load(&utts[pick])?;
            let len = feats.nrows();
            if len < 2 {
                too_short.insert(pick);
                if too_short.len() == utts.len() {
                    return Err(SpkDataError::WindowUnfillable {
                        speaker: self
                            .corpus
                            .speaker_of_label(label)
                            .unwrap_or_default()
                            .to_string(),
                    });
                }
                continue;
            }

            let start = if filled == 0 { rng.gen_range(0..len) } else { 0 };
            let stop = (len - 1).min((start + target - filled).max(1));
            if stop <= start {
                continue;
            }
            data.extend(feats.slice(s![start..stop, ..]).iter().copied());
            filled += stop - start;
            sources.push(utts[pick].clone());
        }

        let features = Array2::from_shape_vec((target, dim), data)
            .map_err(|e| SpkDataError::Config(format!("window shape: {e}")))?;
        Ok(TrainingWindow {
            features,
            label,
            sources,
        })
    }

    /// Precomputes one `(utterance, label)` per epoch slot, cycling over
    /// speakers, for per-utterance extraction passes.
    pub fn draw_utterances<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<(UtteranceId, SpeakerLabel)> {
        let n = self.corpus.num_speakers();
        (0..self.epoch_len())
            .map(|i| {
                let label = i % n;
                let utts = self.corpus.train_utterances(label);
                (utts[rng.gen_range(0..utts.len())].clone(), label)
            })
            .collect()
    }

    /// The whole training utterance with its label.
    pub fn utterance(&self, uid: &str) -> Result<UtteranceItem> {
        let features = self.corpus.load(uid)?;
        let label = self
            .corpus
            .utt2spk()
            .get(uid)
            .and_then(|s| self.corpus.label_of(s))
            .ok_or_else(|| SpkDataError::MissingLocator {
                uid: uid.to_string(),
            })?;
        Ok(UtteranceItem {
            features: unwrap_arc(features),
            label,
            uid: uid.to_string(),
        })
    }

    pub fn valid_len(&self) -> usize {
        self.split.len()
    }

    /// Validation item `index`, over validation utterances in lexicographic
    /// order.
    pub fn valid_item(&self, index: usize) -> Result<UtteranceItem> {
        let uid = self
            .split
            .utterances()
            .get(index)
            .ok_or(SpkDataError::ItemOutOfRange {
                index,
                len: self.split.len(),
            })?;
        let (locator, speaker) = match (self.split.locator(uid), self.split.speaker_of(uid)) {
            (Some(l), Some(s)) => (l, s),
            _ => return Err(SpkDataError::MissingLocator { uid: uid.clone() }),
        };
        let label = self.corpus.label_of(speaker).ok_or_else(|| SpkDataError::GroupingMismatch {
            uid: uid.clone(),
            reason: format!("speaker {speaker:?} has no label"),
        })?;
        let features = self.corpus.load_at(uid, locator)?;
        Ok(UtteranceItem {
            features: unwrap_arc(features),
            label,
            uid: uid.clone(),
        })
    }

    /// Loads both sides of a trial; the label passes through unchanged.
    pub fn pair(&self, trial: &TrialPair) -> Result<VerificationPair> {
        Ok(VerificationPair {
            a: unwrap_arc(self.load_any(&trial.uid_a)?),
            b: unwrap_arc(self.load_any(&trial.uid_b)?),
            is_target: trial.is_target,
        })
    }

    fn load_any(&self, uid: &str) -> Result<Arc<FeatureMatrix>> {
        match self.split.locator(uid) {
            Some(locator) => self.corpus.load_at(uid, locator),
            None => self.corpus.load(uid),
        }
    }
}

fn unwrap_arc(m: Arc<FeatureMatrix>) -> FeatureMatrix {
    Arc::try_unwrap(m).unwrap_or_else(|shared| (*shared).clone())
}
