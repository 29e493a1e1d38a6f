//! Utility functions for CLI commands.

use anyhow::Context as _;
use giztoy_spkdata::SpkDataConfig;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::Cli;

/// Loads the YAML config (or defaults) and applies global flag overrides.
pub fn load_config(cli: &Cli) -> anyhow::Result<SpkDataConfig> {
    let mut cfg = match cli.config.as_deref() {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {path}"))?;
            serde_yaml::from_str(&content).with_context(|| format!("failed to parse config {path}"))?
        }
        None => SpkDataConfig::default(),
    };
    if cli.seed.is_some() {
        cfg.seed = cli.seed;
    }
    let cfg = cfg.with_defaults();
    cfg.validate()?;
    Ok(cfg)
}

/// Seeds the run's generator, logging the seed so a run can be repeated.
pub fn run_rng(cfg: &SpkDataConfig) -> StdRng {
    let seed = cfg.run_seed();
    tracing::info!(seed, "random seed");
    StdRng::seed_from_u64(seed)
}

/// Outputs a report as JSON or YAML.
pub fn output_result<T: serde::Serialize>(result: &T, cli: &Cli) -> anyhow::Result<()> {
    let output = if cli.json {
        serde_json::to_string_pretty(result)? + "\n"
    } else {
        serde_yaml::to_string(result)?
    };
    output_text(&output, cli)
}

/// Writes text to the `-o` file or stdout.
pub fn output_text(text: &str, cli: &Cli) -> anyhow::Result<()> {
    match cli.output.as_deref() {
        Some(path) => std::fs::write(path, text).with_context(|| format!("failed to write {path}"))?,
        None => print!("{}", text),
    }
    Ok(())
}

/// Prints success message.
pub fn print_success(msg: &str) {
    eprintln!("\x1b[32m✓\x1b[0m {}", msg);
}

/// Prints warning message.
pub fn print_warning(msg: &str) {
    eprintln!("\x1b[33m⚠\x1b[0m {}", msg);
}
