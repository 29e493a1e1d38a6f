//! Speaker corpus: the join of the locator index and the speaker grouping,
//! with a held-out validation split carved out at construction time.
//!
//! # Invariants
//!
//! - Speaker labels are dense indices into the lexicographically sorted
//!   speaker ids and never change after construction.
//! - Every training locator belongs to exactly one speaker's training pool,
//!   and every speaker keeps at least one training utterance.
//! - Training and validation utterances are disjoint and together cover every
//!   grouped utterance.
//! - `feat_dim` is fixed once; any matrix with another width is rejected.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::resolve_workers;
use crate::error::{Result, SpkDataError};
use crate::index::{cross_check, Grouping, LocatorIndex, Utt2Spk};
use crate::loader::{FeatureLoader, StoreLoader};
use crate::locator::Locator;
use crate::types::{FeatureMatrix, SpeakerId, SpeakerLabel, UtteranceId};

/// Splits each speaker's utterances into a training pool and up to
/// `num_valid` validation utterances.
///
/// Utterances are drawn uniformly without replacement. A speaker is never
/// reduced below one training utterance. The input is left untouched; two
/// new disjoint groupings are returned.
pub fn split_validation<R: Rng + ?Sized>(
    grouping: &Grouping,
    num_valid: usize,
    rng: &mut R,
) -> (Grouping, Grouping) {
    let mut train = Grouping::new();
    let mut valid = Grouping::new();
    for (speaker, utts) in grouping {
        let mut pool = utts.clone();
        let mut held = Vec::new();
        while held.len() < num_valid && pool.len() > 1 {
            let j = rng.gen_range(0..pool.len());
            held.push(pool.remove(j));
        }
        train.insert(speaker.clone(), pool);
        valid.insert(speaker.clone(), held);
    }
    (train, valid)
}

/// Utterances held out for validation. Immutable after construction.
#[derive(Debug, Clone, Default)]
pub struct ValidationSplit {
    groups: Grouping,
    utt2spk: Utt2Spk,
    locators: BTreeMap<UtteranceId, Locator>,
    uids: Vec<UtteranceId>,
}

impl ValidationSplit {
    /// Validation utterances in lexicographic order.
    pub fn utterances(&self) -> &[UtteranceId] {
        &self.uids
    }

    /// Validation utterances of one speaker, in draw order.
    pub fn utterances_of(&self, speaker: &str) -> &[UtteranceId] {
        self.groups.get(speaker).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn speaker_of(&self, uid: &str) -> Option<&str> {
        self.utt2spk.get(uid).map(String::as_str)
    }

    pub fn locator(&self, uid: &str) -> Option<&Locator> {
        self.locators.get(uid)
    }

    pub fn utt2spk(&self) -> &Utt2Spk {
        &self.utt2spk
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }
}

/// Builds a [`SpeakerCorpus`] and its [`ValidationSplit`].
pub struct CorpusBuilder<'a> {
    index: &'a LocatorIndex,
    grouping: &'a Grouping,
    utt2spk: &'a Utt2Spk,
    num_valid: usize,
    loader: Arc<dyn FeatureLoader>,
    eager: bool,
    workers: usize,
    cancel: Option<CancellationToken>,
    progress: Option<Arc<AtomicUsize>>,
}

impl<'a> CorpusBuilder<'a> {
    pub fn new(index: &'a LocatorIndex, grouping: &'a Grouping, utt2spk: &'a Utt2Spk) -> Self {
        Self {
            index,
            grouping,
            utt2spk,
            num_valid: 0,
            loader: Arc::new(StoreLoader),
            eager: false,
            workers: 1,
            cancel: None,
            progress: None,
        }
    }

    pub fn num_valid(mut self, num_valid: usize) -> Self {
        self.num_valid = num_valid;
        self
    }

    pub fn loader(mut self, loader: Arc<dyn FeatureLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Reads every matrix during the build on a pool of `workers` threads.
    /// Zero means the available parallelism.
    pub fn eager(mut self, workers: usize) -> Self {
        self.eager = true;
        self.workers = resolve_workers(workers);
        self
    }

    /// Checked between utterance reads of an eager build.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Incremented once per matrix read during an eager build.
    pub fn progress(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.progress = Some(counter);
        self
    }

    pub fn build<R: Rng + ?Sized>(self, rng: &mut R) -> Result<(SpeakerCorpus, ValidationSplit)> {
        if self.grouping.is_empty() {
            return Err(SpkDataError::EmptyCorpus);
        }
        cross_check(self.grouping, self.utt2spk)?;

        let mut grouped = 0usize;
        for (speaker, utts) in self.grouping {
            if utts.is_empty() {
                return Err(SpkDataError::EmptySpeaker {
                    speaker: speaker.clone(),
                });
            }
            for uid in utts {
                if !self.index.contains_key(uid) {
                    return Err(SpkDataError::MissingLocator { uid: uid.clone() });
                }
            }
            grouped += utts.len();
        }
        if self.index.len() > grouped {
            warn!(
                ungrouped = self.index.len() - grouped,
                "ignoring locators without a speaker"
            );
        }
        info!(
            speakers = self.grouping.len(),
            utterances = grouped,
            "building speaker corpus"
        );

        let (train, valid) = split_validation(self.grouping, self.num_valid, rng);

        let speakers: Vec<SpeakerId> = train.keys().cloned().collect();
        let labels: HashMap<SpeakerId, SpeakerLabel> = speakers
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();

        let mut locators = HashMap::with_capacity(grouped);
        let mut train_utt2spk = Utt2Spk::new();
        for (speaker, utts) in &train {
            for uid in utts {
                locators.insert(uid.clone(), self.index[uid].clone());
                train_utt2spk.insert(uid.clone(), speaker.clone());
            }
        }

        let mut split = ValidationSplit::default();
        for (speaker, utts) in &valid {
            for uid in utts {
                split.locators.insert(uid.clone(), self.index[uid].clone());
                split.utt2spk.insert(uid.clone(), speaker.clone());
            }
        }
        split.uids = split.utt2spk.keys().cloned().collect();
        split.groups = valid;
        info!(valid = split.len(), "split validation utterances");

        // The first training utterance of the first speaker fixes feat_dim.
        let reference = train[&speakers[0]][0].clone();

        let (feat_dim, cache) = if self.eager {
            let mut all: Vec<(&UtteranceId, &Locator)> = locators.iter().collect();
            all.extend(split.locators.iter());
            all.sort_by(|a, b| a.0.cmp(b.0));
            let loaded = load_all(
                &all,
                self.loader.as_ref(),
                self.workers,
                self.cancel.as_ref(),
                self.progress.as_deref(),
            )?;
            let feat_dim = loaded[&reference].ncols();
            for (uid, m) in &loaded {
                check_dim(uid, m, feat_dim)?;
            }
            (feat_dim, Some(loaded))
        } else {
            let m = self.loader.load(&locators[&reference])?;
            (m.ncols(), None)
        };
        debug!(feat_dim, eager = self.eager, "fixed feature dimension");

        let train: Vec<Vec<UtteranceId>> = speakers
            .iter()
            .map(|s| train.get(s).cloned().unwrap_or_default())
            .collect();

        let corpus = SpeakerCorpus {
            speakers,
            labels,
            train,
            locators,
            utt2spk: train_utt2spk,
            feat_dim,
            loader: self.loader,
            cache,
        };
        Ok((corpus, split))
    }
}

fn check_dim(uid: &str, m: &FeatureMatrix, feat_dim: usize) -> Result<()> {
    if m.ncols() != feat_dim {
        return Err(SpkDataError::InconsistentFeatureDimension {
            uid: uid.to_string(),
            expected: feat_dim,
            got: m.ncols(),
        });
    }
    Ok(())
}

fn load_all(
    items: &[(&UtteranceId, &Locator)],
    loader: &dyn FeatureLoader,
    workers: usize,
    cancel: Option<&CancellationToken>,
    progress: Option<&AtomicUsize>,
) -> Result<HashMap<UtteranceId, Arc<FeatureMatrix>>> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| SpkDataError::Config(format!("worker pool: {e}")))?;

    let loaded: Result<Vec<(UtteranceId, Arc<FeatureMatrix>)>> = pool.install(|| {
        items
            .par_iter()
            .map(|(uid, locator)| {
                if cancel.is_some_and(CancellationToken::is_cancelled) {
                    return Err(SpkDataError::Cancelled);
                }
                let m = loader.load(locator)?;
                if let Some(p) = progress {
                    p.fetch_add(1, Ordering::Relaxed);
                }
                Ok(((*uid).clone(), Arc::new(m)))
            })
            .collect()
    });
    Ok(loaded?.into_iter().collect())
}

/// Training-side view of the corpus.
///
/// Safe to share between sampling workers; nothing is mutated after
/// construction.
pub struct SpeakerCorpus {
    speakers: Vec<SpeakerId>,
    labels: HashMap<SpeakerId, SpeakerLabel>,
    /// Training pools indexed by label.
    train: Vec<Vec<UtteranceId>>,
    locators: HashMap<UtteranceId, Locator>,
    utt2spk: Utt2Spk,
    feat_dim: usize,
    loader: Arc<dyn FeatureLoader>,
    cache: Option<HashMap<UtteranceId, Arc<FeatureMatrix>>>,
}

impl SpeakerCorpus {
    /// Speaker ids in label order.
    pub fn speakers(&self) -> &[SpeakerId] {
        &self.speakers
    }

    pub fn num_speakers(&self) -> usize {
        self.speakers.len()
    }

    pub fn label_of(&self, speaker: &str) -> Option<SpeakerLabel> {
        self.labels.get(speaker).copied()
    }

    pub fn speaker_of_label(&self, label: SpeakerLabel) -> Option<&str> {
        self.speakers.get(label).map(String::as_str)
    }

    /// Training utterances of a speaker. Empty for an unknown label.
    pub fn train_utterances(&self, label: SpeakerLabel) -> &[UtteranceId] {
        self.train.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn num_train_utterances(&self) -> usize {
        self.locators.len()
    }

    /// Training utterance to speaker.
    pub fn utt2spk(&self) -> &Utt2Spk {
        &self.utt2spk
    }

    /// The training pools as a grouping, for writing back out.
    pub fn train_grouping(&self) -> Grouping {
        self.speakers
            .iter()
            .cloned()
            .zip(self.train.iter().cloned())
            .collect()
    }

    pub fn feat_dim(&self) -> usize {
        self.feat_dim
    }

    pub fn is_eager(&self) -> bool {
        self.cache.is_some()
    }

    pub fn locator(&self, uid: &str) -> Option<&Locator> {
        self.locators.get(uid)
    }

    /// Features of a training utterance.
    pub fn load(&self, uid: &str) -> Result<Arc<FeatureMatrix>> {
        let locator = self
            .locators
            .get(uid)
            .ok_or_else(|| SpkDataError::MissingLocator {
                uid: uid.to_string(),
            })?;
        self.load_at(uid, locator)
    }

    /// Features of any utterance known to this corpus or its split, read
    /// from `locator` unless cached.
    pub fn load_at(&self, uid: &str, locator: &Locator) -> Result<Arc<FeatureMatrix>> {
        if let Some(m) = self.cache.as_ref().and_then(|c| c.get(uid)) {
            return Ok(Arc::clone(m));
        }
        let m = self.loader.load(locator)?;
        check_dim(uid, &m, self.feat_dim)?;
        Ok(Arc::new(m))
    }
}

impl std::fmt::Debug for SpeakerCorpus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeakerCorpus")
            .field("speakers", &self.speakers.len())
            .field("train_utterances", &self.locators.len())
            .field("feat_dim", &self.feat_dim)
            .field("eager", &self.cache.is_some())
            .finish()
    }
}
