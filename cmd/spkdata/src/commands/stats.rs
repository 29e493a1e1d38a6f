use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use giztoy_spkdata::DataDir;
use serde::Serialize;

use super::{load_config, output_result, run_rng};
use crate::Cli;

/// Builds the corpus and prints its statistics.
#[derive(Args)]
pub struct StatsCommand {
    /// Data directory
    dir: PathBuf,

    /// Validation utterances per speaker (overrides config file)
    #[arg(long)]
    num_valid: Option<usize>,

    /// Read every matrix up front and check dimensions
    #[arg(long)]
    eager: bool,
}

#[derive(Serialize)]
struct Stats {
    speakers: usize,
    train_utterances: usize,
    valid_utterances: usize,
    feat_dim: usize,
    min_train_per_speaker: usize,
    max_train_per_speaker: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    trials: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_trials: Option<usize>,
}

impl StatsCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let mut cfg = load_config(cli)?;
        if let Some(n) = self.num_valid {
            cfg.num_valid = n;
        }
        cfg.eager |= self.eager;

        let data = DataDir::open(&self.dir)
            .with_context(|| format!("failed to open {}", self.dir.display()))?;
        let mut rng = run_rng(&cfg);
        let (corpus, split) = data.build_corpus(&cfg, &mut rng)?;

        let sizes: Vec<usize> = (0..corpus.num_speakers())
            .map(|label| corpus.train_utterances(label).len())
            .collect();
        let stats = Stats {
            speakers: corpus.num_speakers(),
            train_utterances: corpus.num_train_utterances(),
            valid_utterances: split.len(),
            feat_dim: corpus.feat_dim(),
            min_train_per_speaker: sizes.iter().copied().min().unwrap_or(0),
            max_train_per_speaker: sizes.iter().copied().max().unwrap_or(0),
            trials: data.trials.as_ref().map(|t| t.len()),
            target_trials: data.trials.as_ref().map(|t| t.num_positive()),
        };
        output_result(&stats, cli)
    }
}
