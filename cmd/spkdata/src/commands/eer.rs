use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use giztoy_spkdata::{parse_scores, EerEstimator, SweepEer};
use serde::Serialize;

use super::output_result;
use crate::Cli;

/// Estimates the equal error rate from `<score> <target|nontarget>` lines.
#[derive(Args)]
pub struct EerCommand {
    /// Score file
    scores: PathBuf,
}

#[derive(Serialize)]
struct EerSummary {
    trials: usize,
    eer: f64,
    threshold: f64,
}

impl EerCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let text = std::fs::read_to_string(&self.scores)
            .with_context(|| format!("failed to read {}", self.scores.display()))?;
        let scores = parse_scores(&text)?;
        let r = SweepEer.estimate(&scores)?;
        output_result(
            &EerSummary {
                trials: scores.len(),
                eer: r.eer,
                threshold: r.threshold,
            },
            cli,
        )
    }
}
