//! Voice model trait and core types
//!
//! Defines the interface every inference backend implements.

use crate::error::{Result, RvcError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serialization format of a model artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    /// safetensors file holding a sequential layer stack
    Sequential,
    /// ONNX graph executed by ONNX Runtime
    Onnx,
}

impl ModelFormat {
    /// Detect the format of an artifact from its leading bytes, falling back
    /// to the file extension.
    ///
    /// Content wins over the extension so that a safetensors file saved under a
    /// `.pth` name still loads. PyTorch pickle checkpoints are recognised and
    /// rejected.
    pub fn detect(path: &Path, header: &[u8]) -> Result<ModelFormat> {
        if is_safetensors_header(header) {
            return Ok(ModelFormat::Sequential);
        }

        if header.starts_with(b"PK\x03\x04") || is_pickle_header(header) {
            return Err(RvcError::UnsupportedFormat {
                format: format!(
                    "PyTorch pickle checkpoint '{}' (export it to safetensors or ONNX)",
                    path.display()
                ),
            });
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("onnx") => Ok(ModelFormat::Onnx),
            // Header check failed, so the loader reports a corrupt file
            Some("safetensors") => Ok(ModelFormat::Sequential),
            Some(other) => Err(RvcError::UnsupportedFormat {
                format: format!("unrecognised '.{}' artifact", other),
            }),
            None => Err(RvcError::UnsupportedFormat {
                format: "artifact without extension or recognisable header".to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFormat::Sequential => "sequential",
            ModelFormat::Onnx => "onnx",
        }
    }
}

/// safetensors files start with a little-endian u64 header length followed by
/// a JSON object.
fn is_safetensors_header(header: &[u8]) -> bool {
    if header.len() < 9 {
        return false;
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&header[..8]);
    let header_len = u64::from_le_bytes(len_bytes);
    header_len > 1 && header[8] == b'{'
}

/// Legacy (non-zip) `torch.save` output starts with a pickle PROTO opcode.
fn is_pickle_header(header: &[u8]) -> bool {
    header.len() >= 2 && header[0] == 0x80 && (2..=5).contains(&header[1])
}

/// Information about a loaded model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model name (metadata `name`, else the file stem)
    pub name: String,

    /// Model version, when the artifact records one
    pub version: Option<String>,

    /// Artifact format
    pub format: ModelFormat,

    /// Path the model was loaded from
    pub path: String,

    /// SHA-256 of the artifact bytes, lowercase hex
    pub sha256: String,

    /// Input length the model requires, when it is fixed
    pub expected_input_len: Option<usize>,

    /// Sample rate the model was trained at, when recorded
    pub sample_rate: Option<u32>,

    /// One-line summary per layer
    pub layers: Vec<String>,
}

/// Trait that all inference backends implement
///
/// A model is owned by a single invocation and used read-only: `forward` never
/// updates parameters. It takes `&mut self` because some runtimes need exclusive
/// access to their session while running.
pub trait VoiceModel {
    /// Get model information
    fn info(&self) -> &ModelInfo;

    /// Run one forward pass over a single-channel sample sequence
    ///
    /// The input is treated as one batch element; the output tensor is
    /// flattened back into an ordered sequence.
    fn forward(&mut self, samples: &[f32]) -> Result<Vec<f32>>;

    /// Get model name (convenience method)
    fn name(&self) -> &str {
        &self.info().name
    }

    /// Input length the model requires, if fixed
    fn expected_input_len(&self) -> Option<usize> {
        self.info().expected_input_len
    }

    /// Validate the input before running the forward pass
    fn validate_input(&self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Err(RvcError::EmptyInput);
        }
        if let Some(expected) = self.expected_input_len() {
            if samples.len() != expected {
                return Err(RvcError::ShapeMismatch {
                    layer: "input".to_string(),
                    expected: format!("{} samples", expected),
                    actual: vec![1, samples.len()],
                });
            }
        }
        Ok(())
    }
}
