use ndarray::Array2;

/// Opaque utterance key, unique across a corpus.
pub type UtteranceId = String;

/// Opaque speaker key.
pub type SpeakerId = String;

/// Dense speaker index in `0..num_speakers`, assigned from the lexicographic
/// order of speaker ids. This is the classifier's output space.
pub type SpeakerLabel = usize;

/// Per-utterance features, shape `[frames, feat_dim]`.
pub type FeatureMatrix = Array2<f32>;

/// A fixed-length training window labelled with its speaker.
#[derive(Debug, Clone)]
pub struct TrainingWindow {
    /// Exactly `window_frames` rows.
    pub features: FeatureMatrix,
    pub label: SpeakerLabel,
    /// Utterances that contributed frames, in concatenation order.
    pub sources: Vec<UtteranceId>,
}

/// One whole, unwindowed utterance with its identity.
#[derive(Debug, Clone)]
pub struct UtteranceItem {
    pub features: FeatureMatrix,
    pub label: SpeakerLabel,
    pub uid: UtteranceId,
}

/// Two whole utterances and the ground-truth same-speaker flag.
#[derive(Debug, Clone)]
pub struct VerificationPair {
    pub a: FeatureMatrix,
    pub b: FeatureMatrix,
    pub is_target: bool,
}
