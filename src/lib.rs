//! rvc-infer - single-shot voice-conversion inference
//!
//! A host application that cannot call a model runtime directly runs this
//! crate's binary as a subprocess: the first argument is a model artifact,
//! the rest are audio samples, and one line of output samples comes back on
//! stdout.
//!
//! # Architecture
//!
//! - `neural`: the `VoiceModel` trait, artifact format detection and the
//!   backends (a burn-backed sequential network for safetensors artifacts,
//!   ONNX Runtime behind the `onnx` feature)
//! - `engine`: sample transports (arguments, stdin, WAV) and the
//!   `InferenceRunner` that owns a model for one forward pass
//! - `cli`: the clap command surface

pub mod cli;
pub mod engine;
pub mod error;
pub mod neural;

pub use engine::{run_inference, InferenceRunner};
pub use error::{Result, RvcError};
pub use neural::{load_model, ModelFormat, ModelInfo, VoiceModel};
