use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use giztoy_spkdata::{check_store, index, StoreLoader};
use serde::Serialize;

use super::{load_config, output_result, print_warning};
use crate::Cli;

/// Reads back every entry of a feature index.
#[derive(Args)]
pub struct CheckCommand {
    /// Feature index (feats.scp)
    index: PathBuf,

    /// Reader threads (overrides config file)
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Serialize)]
struct CheckSummary {
    ok: usize,
    failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    feat_dim: Option<usize>,
}

impl CheckCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let cfg = load_config(cli)?;
        let workers = self.workers.unwrap_or(cfg.workers);

        let index = index::load_index(&self.index)
            .with_context(|| format!("failed to load {}", self.index.display()))?;
        let report = check_store(&index, &StoreLoader, workers)?;

        for failure in &report.failures {
            print_warning(&format!("{}: {}", failure.uid, failure.reason));
        }
        output_result(
            &CheckSummary {
                ok: report.ok,
                failed: report.failures.len(),
                feat_dim: report.feat_dim,
            },
            cli,
        )?;
        if !report.failures.is_empty() {
            anyhow::bail!("{} of {} entries failed", report.failures.len(), index.len());
        }
        Ok(())
    }
}
