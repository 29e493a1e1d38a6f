use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use giztoy_spkdata::{index, worker_rng, write_matrices, DataDir, Sampler, Utt2Spk};

use super::{load_config, print_success};
use crate::Cli;

/// Draws one epoch of training windows and writes them to a matrix store.
#[derive(Args)]
pub struct SampleCommand {
    /// Data directory
    dir: PathBuf,

    /// Output directory for windows.ark, windows.scp and utt2spk
    #[arg(long)]
    out_dir: PathBuf,

    /// Frames per window (overrides config file)
    #[arg(long)]
    window_frames: Option<usize>,

    /// Windows per speaker (overrides config file)
    #[arg(long)]
    per_speaker: Option<usize>,
}

impl SampleCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let mut cfg = load_config(cli)?;
        if let Some(n) = self.window_frames {
            cfg.window_frames = n;
        }
        if let Some(n) = self.per_speaker {
            cfg.samples_per_speaker = n;
        }
        cfg.validate()?;

        let data = DataDir::open(&self.dir)
            .with_context(|| format!("failed to open {}", self.dir.display()))?;
        let seed = cfg.run_seed();
        tracing::info!(seed, "random seed");
        let mut split_rng = worker_rng(seed, 0);
        let (corpus, split) = data.build_corpus(&cfg, &mut split_rng)?;

        let sampler = Sampler::from_config(&corpus, &split, &cfg)?;
        let mut rng = worker_rng(seed, 1);
        let mut windows = Vec::with_capacity(sampler.epoch_len());
        let mut utt2spk = Utt2Spk::new();
        for i in 0..sampler.epoch_len() {
            let w = sampler.window_at(i, &mut rng)?;
            let speaker = corpus.speaker_of_label(w.label).unwrap_or_default().to_string();
            let key = format!("{speaker}-win{i:07}");
            utt2spk.insert(key.clone(), speaker);
            windows.push((key, w.features));
        }

        std::fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("failed to create {}", self.out_dir.display()))?;
        let written = write_matrices(
            &self.out_dir.join("windows.ark"),
            &self.out_dir.join("windows.scp"),
            windows.iter().map(|(k, m)| (k.as_str(), m)),
        )?;
        index::save_utt2spk(&self.out_dir.join("utt2spk"), &utt2spk)?;

        print_success(&format!(
            "wrote {} windows of {} frames to {}",
            written.len(),
            sampler.window_frames(),
            self.out_dir.display()
        ));
        Ok(())
    }
}
