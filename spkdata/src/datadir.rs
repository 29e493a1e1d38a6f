//! Kaldi-style data directories.
//!
//! ```text
//! <dir>/feats.scp   utterance -> locator      (required)
//! <dir>/spk2utt     speaker -> utterances     (required)
//! <dir>/utt2spk     utterance -> speaker      (required)
//! <dir>/trials      <a> <b> <target|nontarget> (optional)
//! ```

use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::info;

use crate::config::SpkDataConfig;
use crate::corpus::{CorpusBuilder, SpeakerCorpus, ValidationSplit};
use crate::error::{Result, SpkDataError};
use crate::index::{load_grouping, load_index, load_utt2spk, Grouping, LocatorIndex, Utt2Spk};
use crate::trials::{load_trials, TrialList};

pub const FEATS_FILE: &str = "feats.scp";
pub const SPK2UTT_FILE: &str = "spk2utt";
pub const UTT2SPK_FILE: &str = "utt2spk";
pub const TRIALS_FILE: &str = "trials";

#[derive(Debug, Clone)]
pub struct DataDir {
    pub path: PathBuf,
    pub index: LocatorIndex,
    pub grouping: Grouping,
    pub utt2spk: Utt2Spk,
    pub trials: Option<TrialList>,
}

impl DataDir {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().to_path_buf();
        for name in [FEATS_FILE, SPK2UTT_FILE, UTT2SPK_FILE] {
            let file = path.join(name);
            if !file.is_file() {
                return Err(SpkDataError::io(
                    file,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "required file is missing"),
                ));
            }
        }

        let index = load_index(&path.join(FEATS_FILE))?;
        let grouping = load_grouping(&path.join(SPK2UTT_FILE))?;
        let utt2spk = load_utt2spk(&path.join(UTT2SPK_FILE))?;
        let trials_path = path.join(TRIALS_FILE);
        let trials = if trials_path.is_file() {
            Some(load_trials(&trials_path)?)
        } else {
            None
        };

        info!(
            dir = %path.display(),
            utterances = index.len(),
            speakers = grouping.len(),
            trials = trials.as_ref().map(TrialList::len),
            "opened data directory"
        );
        Ok(Self {
            path,
            index,
            grouping,
            utt2spk,
            trials,
        })
    }

    /// A corpus builder preconfigured from `config`; callers may still attach
    /// a loader, cancellation token or progress counter.
    pub fn builder(&self, config: &SpkDataConfig) -> CorpusBuilder<'_> {
        let builder = CorpusBuilder::new(&self.index, &self.grouping, &self.utt2spk).num_valid(config.num_valid);
        if config.eager {
            builder.eager(config.workers)
        } else {
            builder
        }
    }

    pub fn build_corpus<R: Rng + ?Sized>(
        &self,
        config: &SpkDataConfig,
        rng: &mut R,
    ) -> Result<(SpeakerCorpus, ValidationSplit)> {
        config.validate()?;
        self.builder(config).build(rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::write_matrices;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;

    fn write_dir(dir: &Path, with_trials: bool) {
        let a = Array2::from_elem((20, 3), 1.0f32);
        let b = Array2::from_elem((30, 3), 2.0f32);
        write_matrices(
            &dir.join("feat.0.ark"),
            &dir.join(FEATS_FILE),
            [("spk1-a", &a), ("spk1-b", &b), ("spk2-a", &b)],
        )
        .unwrap();
        fs::write(dir.join(SPK2UTT_FILE), "spk1 spk1-a spk1-b\nspk2 spk2-a\n").unwrap();
        fs::write(dir.join(UTT2SPK_FILE), "spk1-a spk1\nspk1-b spk1\nspk2-a spk2\n").unwrap();
        if with_trials {
            fs::write(dir.join(TRIALS_FILE), "spk1-a spk2-a nontarget\nspk1-a spk1-b target\n").unwrap();
        }
    }

    #[test]
    fn open_and_build() {
        let dir = tempfile::tempdir().unwrap();
        write_dir(dir.path(), true);
        let data = DataDir::open(dir.path()).unwrap();
        assert_eq!(data.index.len(), 3);
        assert_eq!(data.trials.as_ref().unwrap().num_positive(), 1);

        let cfg = SpkDataConfig {
            num_valid: 1,
            eager: true,
            workers: 2,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let (corpus, split) = data.build_corpus(&cfg, &mut rng).unwrap();
        assert_eq!(corpus.num_speakers(), 2);
        assert_eq!(corpus.feat_dim(), 3);
        assert_eq!(split.len(), 1);
        assert_eq!(split.speaker_of(&split.utterances()[0]), Some("spk1"));
    }

    #[test]
    fn eager_build_without_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_dir(dir.path(), false);
        let data = DataDir::open(dir.path()).unwrap();
        let cfg = SpkDataConfig {
            num_valid: 1,
            eager: true,
            workers: 0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let (corpus, split) = data.build_corpus(&cfg, &mut rng).unwrap();
        assert!(corpus.is_eager());
        assert_eq!(corpus.num_train_utterances() + split.len(), 3);
    }

    #[test]
    fn trials_file_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        write_dir(dir.path(), false);
        assert!(DataDir::open(dir.path()).unwrap().trials.is_none());
    }

    #[test]
    fn missing_required_file() {
        let dir = tempfile::tempdir().unwrap();
        write_dir(dir.path(), false);
        fs::remove_file(dir.path().join(SPK2UTT_FILE)).unwrap();
        let err = DataDir::open(dir.path()).unwrap_err();
        assert!(matches!(err, SpkDataError::Io { ref path, .. } if path.ends_with(SPK2UTT_FILE)));
    }

    #[test]
    fn invalid_config_is_rejected_before_building() {
        let dir = tempfile::tempdir().unwrap();
        write_dir(dir.path(), false);
        let data = DataDir::open(dir.path()).unwrap();
        let cfg = SpkDataConfig {
            target_fraction: 2.0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            data.build_corpus(&cfg, &mut rng),
            Err(SpkDataError::Config(_))
        ));
    }
}
