//! Model artifact loading
//!
//! Reads the artifact once, checksums it, detects its format and hands it to
//! the matching backend.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use log::{debug, info};
use sha2::{Digest, Sha256};

use super::model::{ModelFormat, VoiceModel};
use super::sequential::SequentialModel;
use crate::error::{Result, RvcError};

/// Load a model artifact into memory, ready for inference.
///
/// # Errors
/// * `ModelNotFound` - the path does not exist
/// * `ModelLoad` - the file is unreadable or not a valid artifact
/// * `UnsupportedFormat` - the format is recognised but cannot be executed
pub fn load_model(path: &Path) -> Result<Box<dyn VoiceModel>> {
    let bytes = read_artifact(path)?;
    let format = ModelFormat::detect(path, &bytes[..bytes.len().min(16)])?;
    let sha256 = calculate_checksum(&bytes);

    info!("Loading {} model from {}", format.as_str(), path.display());
    debug!("Artifact size {} bytes, sha256 {}", bytes.len(), sha256);

    match format {
        ModelFormat::Sequential => Ok(Box::new(SequentialModel::load_cpu(path, &bytes, sha256)?)),
        ModelFormat::Onnx => load_onnx(path, sha256),
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &Path, sha256: String) -> Result<Box<dyn VoiceModel>> {
    Ok(Box::new(super::onnx::OnnxModel::load(path, sha256)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(path: &Path, _sha256: String) -> Result<Box<dyn VoiceModel>> {
    Err(RvcError::UnsupportedFormat {
        format: format!(
            "ONNX graph '{}' (rebuild with --features onnx)",
            path.display()
        ),
    })
}

fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(RvcError::ModelNotFound {
            path: path.display().to_string(),
            source: Some(e),
        }),
        Err(e) => Err(RvcError::ModelLoad {
            path: path.display().to_string(),
            reason: format!("cannot read file: {}", e),
            source: Some(Box::new(e)),
        }),
    }
}

/// SHA-256 of the artifact bytes, lowercase hex
fn calculate_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
