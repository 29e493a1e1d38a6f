//! spkdata CLI - prepares and inspects speaker-verification training data.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    CheckCommand, EerCommand, GenTrialsCommand, MergeCommand, PartitionCommand, SampleCommand,
    StatsCommand,
};

/// spkdata CLI - speaker-verification data preparation.
///
/// Works on Kaldi-style data directories (feats.scp, spk2utt, utt2spk and an
/// optional trials file) backed by binary matrix stores.
#[derive(Parser)]
#[command(name = "spkdata")]
#[command(about = "Speaker verification data preparation tool")]
#[command(version)]
pub struct Cli {
    /// Config file (YAML)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Fixed random seed (overrides config file)
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Output file (default: stdout)
    #[arg(short = 'o', long, global = true)]
    pub output: Option<String>,

    /// Output reports as JSON instead of YAML
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the corpus and print its statistics
    Stats(StatsCommand),
    /// Draw training windows into a matrix store
    Sample(SampleCommand),
    /// Reduce a trials file to a fixed size
    Partition(PartitionCommand),
    /// Generate training trials from a data directory
    GenTrials(GenTrialsCommand),
    /// Read back every entry of a feature index
    Check(CheckCommand),
    /// Merge shard indexes into one
    Merge(MergeCommand),
    /// Estimate the equal error rate of a score file
    Eer(EerCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Stats(cmd) => cmd.run(&cli),
        Commands::Sample(cmd) => cmd.run(&cli),
        Commands::Partition(cmd) => cmd.run(&cli),
        Commands::GenTrials(cmd) => cmd.run(&cli),
        Commands::Check(cmd) => cmd.run(&cli),
        Commands::Merge(cmd) => cmd.run(&cli),
        Commands::Eer(cmd) => cmd.run(&cli),
    }
}
