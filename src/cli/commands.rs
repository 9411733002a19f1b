//! CLI Command Implementations
//!
//! Stdout carries only what the host parses: the progress line and the
//! sample line (or the JSON model report for `--info`). Diagnostics go to
//! stderr through the logger.

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use super::Cli;
use crate::engine::{export_wav, write_samples, InferenceRunner, WavFormat, DEFAULT_SAMPLE_RATE};

/// Dispatch to the requested command.
pub fn run(cli: &Cli) -> Result<()> {
    if cli.info {
        show_info(&cli.model)
    } else {
        infer(cli)
    }
}

/// Load the model, run one forward pass and print the output samples.
pub fn infer(cli: &Cli) -> Result<()> {
    let input = cli
        .sample_source()?
        .read()
        .context("failed to read input samples")?;

    println!("Loading model from: {}", cli.model.display());

    let mut runner = InferenceRunner::load(&cli.model)?;
    let output = runner.infer(&input.samples)?;

    if let Some(path) = &cli.output_wav {
        let sample_rate = cli
            .sample_rate
            .or(runner.info().sample_rate)
            .or(input.sample_rate)
            .unwrap_or(DEFAULT_SAMPLE_RATE);
        export_wav(&output, path, &WavFormat::pcm16(sample_rate))
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote {} samples to {}", output.len(), path.display());
    }

    write_samples(io::stdout().lock(), &output).context("failed to write output samples")?;
    Ok(())
}

/// Load the model and print its description as pretty JSON.
pub fn show_info(model: &Path) -> Result<()> {
    let runner = InferenceRunner::load(model)?;
    let json = serde_json::to_string_pretty(runner.info())?;
    println!("{}", json);
    Ok(())
}
