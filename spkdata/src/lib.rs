//! Speaker-verification training data: feature indexing, validation splits,
//! balanced window sampling and trial partitioning.
//!
//! # Architecture
//!
//! Data flows through four stages:
//!
//! 1. [`parse`] / [`parse_grouping`]: text indexes -> [`LocatorIndex`] and [`Grouping`]
//! 2. [`StoreReader`]: locator -> `[frames, feat_dim]` float32 matrix
//! 3. [`CorpusBuilder::build`]: index + grouping -> [`SpeakerCorpus`] and [`ValidationSplit`]
//! 4. [`Sampler`]: corpus -> fixed-length [`TrainingWindow`]s, whole utterances
//!    and [`VerificationPair`]s
//!
//! [`TrialList::partition`] reduces a verification trial list to a fixed size
//! while keeping a target fraction.
//!
//! # Matrix Store
//!
//! Features live in append-only store files. A locator `path:offset` points
//! directly at a record's payload; the 12-byte shape block sits right before
//! it:
//!
//! ```text
//! "SPKM" keyLen key | "FM32" frames featDim | payload (f32 LE, row-major)
//!                                           ^ locator offset
//! ```

mod config;
mod corpus;
mod datadir;
mod eer;
mod error;
mod extract;
pub mod index;
mod loader;
mod locator;
mod sampler;
pub mod store;
mod trials;
mod types;

pub use config::{
    SpkDataConfig, TrialsConfig, DEFAULT_NUM_VALID, DEFAULT_SAMPLES_PER_SPEAKER,
    DEFAULT_TARGET_FRACTION, DEFAULT_WINDOW_FRAMES,
};
pub use corpus::{split_validation, CorpusBuilder, SpeakerCorpus, ValidationSplit};
pub use datadir::{DataDir, FEATS_FILE, SPK2UTT_FILE, TRIALS_FILE, UTT2SPK_FILE};
pub use eer::{parse_scores, EerEstimator, EerResult, Scored, SweepEer};
pub use error::{Result, SpkDataError};
pub use extract::{check_store, extract_sharded, CheckReport, ExtractJob, ExtractReport, UttFailure};
pub use index::{
    cross_check, grouping_from_utt2spk, merge_indexes, parse, parse_grouping, parse_utt2spk,
    utt2spk_from_naming, Grouping, LocatorIndex, Utt2Spk,
};
pub use loader::{Extracted, FeatureExtractor, FeatureLoader, FnLoader, StoreLoader};
pub use locator::Locator;
pub use sampler::{worker_rng, Sampler};
pub use store::{read_matrix, write_matrices, StoreReader, StoreWriter};
pub use trials::{
    generate_trials, generate_tuples, load_trials, parse_trials, save_trials, write_trials,
    write_tuples, TrialList, TrialPair, TrialTuple,
};
pub use types::{
    FeatureMatrix, SpeakerId, SpeakerLabel, TrainingWindow, UtteranceId, UtteranceItem,
    VerificationPair,
};
