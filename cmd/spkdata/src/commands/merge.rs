use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use giztoy_spkdata::{index, merge_indexes};

use super::{output_text, print_success};
use crate::Cli;

/// Merges shard indexes; identical duplicates collapse, diverging ones fail.
#[derive(Args)]
pub struct MergeCommand {
    /// Shard indexes (feat.<i>.scp)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

impl MergeCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let mut parts = Vec::with_capacity(self.inputs.len());
        for path in &self.inputs {
            parts.push(
                index::load_index(path).with_context(|| format!("failed to load {}", path.display()))?,
            );
        }
        let merged = merge_indexes(parts)?;
        output_text(&index::write_index(&merged), cli)?;
        print_success(&format!(
            "merged {} shards into {} entries",
            self.inputs.len(),
            merged.len()
        ));
        Ok(())
    }
}
