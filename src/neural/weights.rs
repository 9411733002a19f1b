//! safetensors artifact reading and layer metadata.
//!
//! A sequential artifact is a plain safetensors file. The optional
//! `__metadata__` table carries the model name, version, sample rate and the
//! ordered layer list as JSON; without a layer list the stack is derived from
//! the `<prefix>.weight` tensor names.

use crate::error::{Result, RvcError};
use safetensors::{Dtype, SafeTensors};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Metadata key holding the JSON layer list.
pub const LAYERS_KEY: &str = "layers";

/// Raw tensor payload extracted from a safetensors file.
#[derive(Debug, Clone)]
pub struct WeightTensor {
    /// Scalar dtype in the file.
    pub dtype: Dtype,
    /// Shape as a list of dimensions.
    pub shape: Vec<usize>,
    /// Raw byte buffer in row-major order.
    pub data: Vec<u8>,
}

impl WeightTensor {
    /// Create a WeightTensor from a safetensors TensorView.
    pub fn from_safetensor(tensor: safetensors::tensor::TensorView<'_>) -> Self {
        Self {
            dtype: tensor.dtype(),
            shape: tensor.shape().to_vec(),
            data: tensor.data().to_vec(),
        }
    }

    /// Decode the payload into `f32` values.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        let values = match self.dtype {
            Dtype::F32 => self
                .data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            Dtype::F64 => self
                .data
                .chunks_exact(8)
                .map(|c| {
                    f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
                })
                .collect(),
            Dtype::BF16 => self
                .data
                .chunks_exact(2)
                .map(|c| f32::from_bits((u16::from_le_bytes([c[0], c[1]]) as u32) << 16))
                .collect(),
            Dtype::F16 => self
                .data
                .chunks_exact(2)
                .map(|c| f16_to_f32(u16::from_le_bytes([c[0], c[1]])))
                .collect(),
            other => {
                return Err(RvcError::UnsupportedFormat {
                    format: format!("{:?} weights", other),
                })
            }
        };
        Ok(values)
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

/// IEEE 754 half precision to single precision.
fn f16_to_f32(bits: u16) -> f32 {
    let sign = ((bits >> 15) as u32) << 31;
    let exponent = ((bits >> 10) & 0x1f) as u32;
    let mantissa = (bits & 0x3ff) as u32;

    let out = match (exponent, mantissa) {
        (0, 0) => sign,
        (0, _) => {
            // Subnormal: renormalise into an f32 normal
            let mut e = 127 - 15 + 1;
            let mut m = mantissa;
            while m & 0x400 == 0 {
                m <<= 1;
                e -= 1;
            }
            sign | ((e as u32) << 23) | ((m & 0x3ff) << 13)
        }
        (0x1f, _) => sign | 0x7f80_0000 | (mantissa << 13),
        _ => sign | ((exponent + 127 - 15) << 23) | (mantissa << 13),
    };
    f32::from_bits(out)
}

/// Layer type in a sequential stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Weight `[out, in]`, applied on the last axis
    Linear,
    /// Weight `[out_channels, in_channels, kernel]`
    Conv1d,
}

/// Elementwise activation applied after a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    None,
    Relu,
    LeakyRelu,
    Tanh,
    Sigmoid,
    Gelu,
    Silu,
}

/// Description of one layer in a sequential artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Tensor prefix (`<name>.weight`, `<name>.bias`)
    pub name: String,
    pub kind: LayerKind,
    #[serde(default)]
    pub activation: Activation,
    /// Slope for `leaky_relu` (PyTorch default 0.01)
    #[serde(default = "default_negative_slope")]
    pub negative_slope: f64,
    #[serde(default = "default_one")]
    pub stride: usize,
    #[serde(default)]
    pub padding: usize,
    #[serde(default = "default_one")]
    pub dilation: usize,
}

fn default_negative_slope() -> f64 {
    0.01
}

fn default_one() -> usize {
    1
}

impl LayerSpec {
    pub fn linear(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: LayerKind::Linear,
            activation: Activation::None,
            negative_slope: default_negative_slope(),
            stride: 1,
            padding: 0,
            dilation: 1,
        }
    }

    pub fn conv1d(name: &str, padding: usize) -> Self {
        Self {
            kind: LayerKind::Conv1d,
            padding,
            ..Self::linear(name)
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn weight_key(&self) -> String {
        format!("{}.weight", self.name)
    }

    pub fn bias_key(&self) -> String {
        format!("{}.bias", self.name)
    }
}

impl fmt::Display for LayerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LayerKind::Linear => write!(f, "{}: linear", self.name)?,
            LayerKind::Conv1d => write!(
                f,
                "{}: conv1d stride={} padding={} dilation={}",
                self.name, self.stride, self.padding, self.dilation
            )?,
        }
        if self.activation != Activation::None {
            write!(f, " ({:?})", self.activation)?;
        }
        Ok(())
    }
}

/// Tensors and metadata read from a sequential artifact.
#[derive(Debug)]
pub struct StateDict {
    /// Tensors keyed by name.
    pub tensors: HashMap<String, WeightTensor>,
    /// The `__metadata__` string table (empty when absent).
    pub metadata: HashMap<String, String>,
}

impl StateDict {
    /// Deserialize a safetensors buffer.
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self> {
        let load_err = |e: safetensors::SafeTensorError| RvcError::ModelLoad {
            path: path.display().to_string(),
            reason: format!("invalid safetensors data: {}", e),
            source: Some(Box::new(e)),
        };

        let (_, header) = SafeTensors::read_metadata(bytes).map_err(load_err)?;
        let metadata = header.metadata().clone().unwrap_or_default();

        let tensors = SafeTensors::deserialize(bytes).map_err(load_err)?;
        let mut state = HashMap::new();
        for name in tensors.names() {
            let tensor = tensors.tensor(name).map_err(load_err)?;
            state.insert(name.to_string(), WeightTensor::from_safetensor(tensor));
        }

        Ok(Self {
            tensors: state,
            metadata,
        })
    }

    pub fn get(&self, key: &str) -> Option<&WeightTensor> {
        self.tensors.get(key)
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Resolve the ordered layer list.
    pub fn layer_specs(&self, path: &Path) -> Result<Vec<LayerSpec>> {
        let specs = match self.meta(LAYERS_KEY) {
            Some(json) => serde_json::from_str::<Vec<LayerSpec>>(json).map_err(|e| {
                RvcError::ModelLoad {
                    path: path.display().to_string(),
                    reason: format!("invalid '{}' metadata: {}", LAYERS_KEY, e),
                    source: Some(Box::new(e)),
                }
            })?,
            None => self.derive_layer_specs(),
        };

        if specs.is_empty() {
            return Err(RvcError::load(
                path.display().to_string(),
                "artifact contains no layers",
            ));
        }
        Ok(specs)
    }

    /// Derive a layer list from `<prefix>.weight` tensors, as written by
    /// `safetensors.torch.save_file(nn.Sequential(...).state_dict())`.
    fn derive_layer_specs(&self) -> Vec<LayerSpec> {
        let mut prefixes: Vec<(&str, &WeightTensor)> = self
            .tensors
            .iter()
            .filter_map(|(name, tensor)| name.strip_suffix(".weight").map(|p| (p, tensor)))
            .filter(|(_, tensor)| matches!(tensor.shape.len(), 2 | 3))
            .collect();
        prefixes.sort_by_key(|(prefix, _)| sort_key(prefix));

        prefixes
            .into_iter()
            .map(|(prefix, tensor)| {
                if tensor.shape.len() == 2 {
                    LayerSpec::linear(prefix)
                } else {
                    // "same" padding for odd kernels
                    let kernel = tensor.shape[2];
                    LayerSpec::conv1d(prefix, kernel.saturating_sub(1) / 2)
                }
            })
            .collect()
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Segment {
    Num(usize),
    Text(String),
}

/// Order `layers.10` after `layers.2`.
fn sort_key(prefix: &str) -> Vec<Segment> {
    prefix
        .split('.')
        .map(|part| match part.parse::<usize>() {
            Ok(n) => Segment::Num(n),
            Err(_) => Segment::Text(part.to_string()),
        })
        .collect()
}
