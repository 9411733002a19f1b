//! Inference engine for rvc-infer
//!
//! Sample transports in and out, and the runner that owns the model for one
//! forward pass.

pub mod io;
pub mod runner;

pub use io::{
    export_wav, format_samples, import_wav, parse_samples, read_samples_from, write_samples,
    InputAudio, SampleSource, WavFormat, DEFAULT_SAMPLE_RATE,
};
pub use runner::{run_inference, InferenceRunner};
