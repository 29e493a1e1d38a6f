use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use giztoy_spkdata::{load_trials, write_trials};

use super::{load_config, output_text, print_success, run_rng};
use crate::Cli;

/// Reduces a trials file to `--num` pairs keeping a target fraction.
#[derive(Args)]
pub struct PartitionCommand {
    /// Trials file (`<a> <b> <target|nontarget>`)
    trials: PathBuf,

    /// Number of pairs to keep
    #[arg(short = 'n', long)]
    num: usize,

    /// Fraction of target pairs (overrides config file)
    #[arg(long)]
    fraction: Option<f64>,
}

impl PartitionCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let mut cfg = load_config(cli)?;
        if let Some(f) = self.fraction {
            cfg.target_fraction = f;
        }
        cfg.validate()?;

        let trials = load_trials(&self.trials)
            .with_context(|| format!("failed to load {}", self.trials.display()))?;
        let mut rng = run_rng(&cfg);
        let out = trials.partition(self.num, cfg.target_fraction, &mut rng)?;

        output_text(&write_trials(&out), cli)?;
        print_success(&format!(
            "kept {} of {} pairs ({} targets)",
            out.len(),
            trials.len(),
            out.num_positive()
        ));
        Ok(())
    }
}
