//! CLI Module
//!
//! Command-line interface for rvc-infer. The positional form
//! `rvc-infer <MODEL> <SAMPLE>...` is the contract host applications rely on;
//! every flag is optional. Flags go before the first sample: from there on
//! every token, hyphen or not, is read as a sample literal.

pub mod commands;

use clap::Parser;
use std::path::PathBuf;

use crate::engine::{parse_samples, SampleSource};
use crate::error::Result;

/// Run a voice-conversion model once over a list of audio samples
#[derive(Parser, Debug)]
#[command(name = "rvc-infer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the model artifact (.safetensors sequential model or .onnx graph)
    pub model: PathBuf,

    /// Input samples, one decimal value per argument
    #[arg(
        value_name = "SAMPLE",
        allow_hyphen_values = true,
        conflicts_with_all = ["stdin", "input_wav"]
    )]
    pub samples: Vec<String>,

    /// Read whitespace-separated samples from standard input
    #[arg(long, conflicts_with = "input_wav")]
    pub stdin: bool,

    /// Read samples from a WAV file (downmixed to mono)
    #[arg(long, value_name = "FILE")]
    pub input_wav: Option<PathBuf>,

    /// Also write the output samples to a 16-bit mono WAV file
    #[arg(long, value_name = "FILE")]
    pub output_wav: Option<PathBuf>,

    /// Sample rate for --output-wav
    #[arg(long, value_name = "HZ", requires = "output_wav")]
    pub sample_rate: Option<u32>,

    /// Print model information as JSON instead of running inference
    #[arg(long)]
    pub info: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Resolve which transport supplies the input samples.
    pub fn sample_source(&self) -> Result<SampleSource> {
        if let Some(path) = &self.input_wav {
            return Ok(SampleSource::Wav(path.clone()));
        }
        if self.stdin {
            return Ok(SampleSource::Stdin);
        }
        Ok(SampleSource::Args(parse_samples(&self.samples)?))
    }

    /// Default log filter; `RUST_LOG` still takes precedence.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "warn"
        }
    }
}
