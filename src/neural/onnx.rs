//! ONNX Runtime backend
//!
//! Runs `.onnx` voice-conversion graphs. The input is fed positionally as a
//! `[1, len]` float tensor and the first output is flattened.

use std::path::Path;

use log::{debug, warn};
use ndarray::Array2;
use ort::session::Session;
use ort::value::Tensor;

use super::model::{ModelFormat, ModelInfo, VoiceModel};
use crate::error::{Result, RvcError};

/// Voice model backed by an ONNX Runtime session
pub struct OnnxModel {
    info: ModelInfo,
    session: Session,
}

impl OnnxModel {
    /// Create a single-threaded session for the graph at `path`.
    pub fn load(path: &Path, sha256: String) -> Result<Self> {
        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| {
                RvcError::load(
                    path.display().to_string(),
                    format!("failed to create ONNX session: {}", e),
                )
            })?;

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "model".to_string());

        let info = ModelInfo {
            name,
            version: None,
            format: ModelFormat::Onnx,
            path: path.display().to_string(),
            sha256,
            // Dynamic axes are common in exported graphs; the runtime checks shapes
            expected_input_len: None,
            sample_rate: None,
            layers: Vec::new(),
        };

        Ok(Self { info, session })
    }
}

impl VoiceModel for OnnxModel {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn forward(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.validate_input(samples)?;

        let input = Array2::from_shape_vec((1, samples.len()), samples.to_vec()).map_err(|e| {
            RvcError::InferenceFailed {
                reason: format!("failed to shape input as [1, {}]: {}", samples.len(), e),
            }
        })?;
        let input_tensor = Tensor::from_array(input).map_err(|e| RvcError::InferenceFailed {
            reason: format!("failed to create input tensor: {}", e),
        })?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| RvcError::InferenceFailed {
                reason: format!("onnx inference failed: {}", e),
            })?;

        if outputs.len() == 0 {
            return Err(RvcError::InferenceFailed {
                reason: "onnx model returned no outputs".to_string(),
            });
        }

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RvcError::InferenceFailed {
                reason: format!("failed to extract output tensor<f32>: {}", e),
            })?;
        debug!("onnx output shape {:?}", shape);

        let values = data.to_vec();
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            warn!("Output contains a non-finite value at position {}", pos);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn varint(mut value: u64, out: &mut Vec<u8>) {
        while value >= 0x80 {
            out.push((value as u8) | 0x80);
            value >>= 7;
        }
        out.push(value as u8);
    }

    fn int_field(field: u64, value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        varint(field << 3, &mut out);
        varint(value, &mut out);
        out
    }

    fn bytes_field(field: u64, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        varint((field << 3) | 2, &mut out);
        varint(payload.len() as u64, &mut out);
        out.extend_from_slice(payload);
        out
    }

    /// `ValueInfoProto` for a float tensor shaped `[1, len]`.
    fn float_row(name: &str) -> Vec<u8> {
        let batch = bytes_field(1, &int_field(1, 1));
        let len = bytes_field(1, &bytes_field(2, b"len"));
        let shape = [batch, len].concat();
        let tensor = [int_field(1, 1), bytes_field(2, &shape)].concat();
        let value_type = bytes_field(1, &tensor);
        [bytes_field(1, name.as_bytes()), bytes_field(2, &value_type)].concat()
    }

    /// Minimal ModelProto: a single Identity node from `x` to `y`.
    fn identity_graph() -> Vec<u8> {
        let node = [
            bytes_field(1, b"x"),
            bytes_field(2, b"y"),
            bytes_field(4, b"Identity"),
        ]
        .concat();
        let graph = [
            bytes_field(1, &node),
            bytes_field(2, b"identity"),
            bytes_field(11, &float_row("x")),
            bytes_field(12, &float_row("y")),
        ]
        .concat();
        let opset = [bytes_field(1, b""), int_field(2, 13)].concat();
        [
            int_field(1, 8),
            bytes_field(7, &graph),
            bytes_field(8, &opset),
        ]
        .concat()
    }

    #[test]
    fn test_identity_graph_round_trips_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.onnx");
        fs::write(&path, identity_graph()).unwrap();

        let mut model = OnnxModel::load(&path, String::new()).unwrap();
        assert_eq!(model.info().format, ModelFormat::Onnx);
        assert_eq!(model.info().name, "identity");
        assert_eq!(model.expected_input_len(), None);

        let output = model.forward(&[0.5, -1.0, 2.25, 0.0]).unwrap();
        assert_eq!(output, vec![0.5, -1.0, 2.25, 0.0]);

        let output = model.forward(&[-0.125]).unwrap();
        assert_eq!(output, vec![-0.125]);
    }

    #[test]
    fn test_empty_input_never_reaches_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.onnx");
        fs::write(&path, identity_graph()).unwrap();

        let mut model = OnnxModel::load(&path, String::new()).unwrap();
        assert!(matches!(model.forward(&[]), Err(RvcError::EmptyInput)));
    }

    #[test]
    fn test_missing_graph_is_load_failure() {
        let err = OnnxModel::load(Path::new("/nonexistent/voice.onnx"), String::new())
            .err()
            .expect("load should fail");
        assert!(err.is_load_failure());
    }
}
