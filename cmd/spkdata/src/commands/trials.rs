use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use giztoy_spkdata::{generate_trials, generate_tuples, write_trials, write_tuples, DataDir};

use super::{load_config, output_text, print_success, run_rng};
use crate::Cli;

/// Generates target and non-target pairs (or enrollment tuples) from the
/// training pools.
#[derive(Args)]
pub struct GenTrialsCommand {
    /// Data directory
    dir: PathBuf,

    /// Evaluation draws per speaker (overrides config file)
    #[arg(long)]
    per_speaker: Option<usize>,

    /// Non-target pairs per draw (overrides config file)
    #[arg(long)]
    negatives: Option<usize>,

    /// Enrollment utterances per trial; writes tuples instead of pairs
    #[arg(long)]
    num_enroll: Option<usize>,
}

impl GenTrialsCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let mut cfg = load_config(cli)?;
        if let Some(n) = self.per_speaker {
            cfg.trials.per_speaker = n;
        }
        if let Some(n) = self.negatives {
            cfg.trials.negatives_per_target = n;
        }
        if let Some(n) = self.num_enroll {
            cfg.trials.num_enroll = n;
        }

        let data = DataDir::open(&self.dir)
            .with_context(|| format!("failed to open {}", self.dir.display()))?;
        let mut rng = run_rng(&cfg);
        let (corpus, _) = data.build_corpus(&cfg, &mut rng)?;

        if cfg.trials.num_enroll > 0 {
            let tuples = generate_tuples(
                &corpus,
                cfg.trials.per_speaker,
                cfg.trials.num_enroll,
                cfg.trials.negatives_per_target,
                &mut rng,
            )?;
            output_text(&write_tuples(&tuples), cli)?;
            print_success(&format!(
                "generated {} tuples ({} targets)",
                tuples.len(),
                tuples.iter().filter(|t| t.is_target).count()
            ));
            return Ok(());
        }

        let trials = generate_trials(
            &corpus,
            cfg.trials.per_speaker,
            cfg.trials.negatives_per_target,
            &mut rng,
        );

        output_text(&write_trials(&trials), cli)?;
        print_success(&format!(
            "generated {} pairs ({} targets)",
            trials.len(),
            trials.num_positive()
        ));
        Ok(())
    }
}
