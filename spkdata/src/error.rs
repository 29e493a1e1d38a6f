use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by spkdata operations.
///
/// Every parsing and corpus-construction error is fatal to startup: callers
/// should not try to continue with a partially built corpus.
#[derive(Debug, Error)]
pub enum SpkDataError {
    #[error("malformed entry at line {line}: {reason}")]
    MalformedIndexEntry { line: usize, reason: String },

    #[error("duplicate key {key:?} with diverging values")]
    DuplicateKey { key: String },

    #[error("utterance {uid:?} has no locator")]
    MissingLocator { uid: String },

    #[error("grouping lists no speakers")]
    EmptyCorpus,

    #[error("speaker {speaker:?} has no utterances")]
    EmptySpeaker { speaker: String },

    #[error("inconsistent feature dimension for {uid:?}: expected {expected}, got {got}")]
    InconsistentFeatureDimension {
        uid: String,
        expected: usize,
        got: usize,
    },

    #[error("store corrupt at {path}:{offset}: {reason}")]
    StoreCorrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("locator {path}:{offset} out of range (file length {len})")]
    LocatorOutOfRange {
        path: PathBuf,
        offset: u64,
        len: u64,
    },

    #[error("insufficient trials: requested {requested}, available {available}")]
    InsufficientTrials { requested: usize, available: usize },

    #[error("grouping and utt2spk disagree on {uid:?}: {reason}")]
    GroupingMismatch { uid: String, reason: String },

    #[error("matrix {key:?} contains a non-finite value")]
    NonFiniteValue { key: String },

    #[error("cannot fill a window for speaker {speaker:?}: no utterance has two or more frames")]
    WindowUnfillable { speaker: String },

    #[error("speaker label {label} out of range ({num_speakers} speakers)")]
    UnknownSpeakerLabel { label: usize, num_speakers: usize },

    #[error("item {index} out of range ({len} items)")]
    ItemOutOfRange { index: usize, len: usize },

    #[error("invalid trial label {label:?} at line {line}")]
    InvalidTrialLabel { line: usize, label: String },

    #[error("cannot estimate EER: {0}")]
    InvalidScores(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SpkDataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SpkDataError>;
