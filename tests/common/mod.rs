//! Shared fixtures: small sequential models written to temp directories.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use safetensors::tensor::TensorView;
use safetensors::Dtype;
use tempfile::TempDir;

/// One tensor to place in a fixture artifact
pub struct Param {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

pub fn param(name: &str, shape: &[usize], values: &[f32]) -> Param {
    Param {
        name: name.to_string(),
        shape: shape.to_vec(),
        values: values.to_vec(),
    }
}

/// Builder for safetensors fixtures
pub struct ModelFixture {
    params: Vec<Param>,
    metadata: HashMap<String, String>,
    dtype: Dtype,
}

impl ModelFixture {
    pub fn new() -> Self {
        Self {
            params: Vec::new(),
            metadata: HashMap::new(),
            dtype: Dtype::F32,
        }
    }

    pub fn param(mut self, name: &str, shape: &[usize], values: &[f32]) -> Self {
        self.params.push(param(name, shape, values));
        self
    }

    pub fn meta(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Store weights as half precision. Only exact f16 values survive.
    pub fn half(mut self) -> Self {
        self.dtype = Dtype::F16;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = self
            .params
            .iter()
            .map(|p| (p.name.clone(), p.shape.clone(), encode(&p.values, self.dtype)))
            .collect();
        let views: HashMap<String, TensorView<'_>> = buffers
            .iter()
            .map(|(name, shape, data)| {
                (
                    name.clone(),
                    TensorView::new(self.dtype, shape.clone(), data).expect("tensor view"),
                )
            })
            .collect();
        let metadata = if self.metadata.is_empty() {
            None
        } else {
            Some(self.metadata.clone())
        };
        safetensors::serialize(&views, &metadata).expect("serialize fixture")
    }

    /// Write into `dir` under `file_name` and return the full path.
    pub fn write(&self, dir: &TempDir, file_name: &str) -> PathBuf {
        let path = dir.path().join(file_name);
        fs::write(&path, self.to_bytes()).expect("write fixture");
        path
    }
}

fn encode(values: &[f32], dtype: Dtype) -> Vec<u8> {
    match dtype {
        Dtype::F16 => values
            .iter()
            .flat_map(|v| f32_to_f16(*v).to_le_bytes())
            .collect(),
        _ => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
    }
}

/// Exact for normal values with at most 10 mantissa bits.
fn f32_to_f16(value: f32) -> u16 {
    if value == 0.0 {
        return if value.is_sign_negative() { 0x8000 } else { 0 };
    }
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xff) as i32 - 127 + 15;
    let mantissa = ((bits >> 13) & 0x3ff) as u16;
    assert!((1..31).contains(&exponent), "value {} not representable", value);
    sign | ((exponent as u16) << 10) | mantissa
}

/// Single 1x1 convolution with weight 1.0: output equals input, any length.
pub fn identity_model() -> ModelFixture {
    ModelFixture::new()
        .param("0.weight", &[1, 1, 1], &[1.0])
        .param("0.bias", &[1], &[0.0])
        .meta("name", "identity")
}

/// Linear 3 -> 3 that doubles each sample; fixed input length of 3.
pub fn doubling_model() -> ModelFixture {
    ModelFixture::new()
        .param(
            "proj.weight",
            &[3, 3],
            &[2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0],
        )
        .param("proj.bias", &[3], &[0.0, 0.0, 0.0])
        .meta("layers", r#"[{"name":"proj","kind":"linear"}]"#)
        .meta("name", "doubler")
        .meta("version", "1.2.0")
        .meta("sample_rate", "40000")
}
