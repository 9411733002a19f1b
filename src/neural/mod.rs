//! Voice model interfaces and backends
//!
//! This module provides:
//! - `VoiceModel` trait for all inference backends
//! - Artifact format detection and loading
//! - A burn-backed sequential network for safetensors artifacts
//! - An ONNX Runtime backend (feature `onnx`)

mod loader;
mod model;
#[cfg(feature = "onnx")]
mod onnx;
mod sequential;
pub mod weights;

pub use loader::load_model;
pub use model::{ModelFormat, ModelInfo, VoiceModel};
#[cfg(feature = "onnx")]
pub use onnx::OnnxModel;
pub use sequential::{CpuBackend, SequentialModel, INPUT_LENGTH_KEY};
pub use weights::{Activation, LayerKind, LayerSpec, StateDict, LAYERS_KEY};
