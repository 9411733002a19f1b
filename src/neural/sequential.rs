//! Sequential voice model executed with burn.
//!
//! Activations flow as `[batch, channels, time]` tensors. The input sequence
//! enters as `[1, 1, len]`; linear layers act on the time axis (like a PyTorch
//! `nn.Linear` applied to the last dimension) and conv1d layers mix channels.
//! The backend has no autodiff wrapper, so the forward pass never records
//! gradients.

use burn::tensor::{
    activation, backend::Backend, module::conv1d, ops::ConvOptions, Tensor, TensorData,
};
use burn_ndarray::{NdArray, NdArrayDevice};
use log::{debug, warn};
use std::path::Path;

use super::model::{ModelFormat, ModelInfo, VoiceModel};
use super::weights::{Activation, LayerKind, LayerSpec, StateDict, WeightTensor};
use crate::error::{Result, RvcError};

/// CPU backend used for sequential artifacts.
pub type CpuBackend = NdArray<f32>;

/// Metadata key fixing the input length.
pub const INPUT_LENGTH_KEY: &str = "input_length";

enum LayerOp<B: Backend> {
    Linear {
        /// `[out, in]`
        weight: Tensor<B, 2>,
        bias: Option<Tensor<B, 1>>,
    },
    Conv1d {
        /// `[out_channels, in_channels, kernel]`
        weight: Tensor<B, 3>,
        bias: Option<Tensor<B, 1>>,
    },
}

/// One layer of the stack plus its activation.
struct SequentialLayer<B: Backend> {
    spec: LayerSpec,
    op: LayerOp<B>,
    /// Weight dims, kept for shape checks without touching the tensor.
    weight_dims: Vec<usize>,
}

impl<B: Backend> SequentialLayer<B> {
    fn build(path: &Path, spec: &LayerSpec, state: &StateDict, device: &B::Device) -> Result<Self> {
        let path_str = path.display().to_string();
        let weight = state.get(&spec.weight_key()).ok_or_else(|| {
            RvcError::load(&path_str, format!("missing tensor '{}'", spec.weight_key()))
        })?;

        let expected_rank = match spec.kind {
            LayerKind::Linear => 2,
            LayerKind::Conv1d => 3,
        };
        if weight.shape.len() != expected_rank {
            return Err(RvcError::load(
                &path_str,
                format!(
                    "'{}' must have rank {} for a {:?} layer, found shape {:?}",
                    spec.weight_key(),
                    expected_rank,
                    spec.kind,
                    weight.shape
                ),
            ));
        }
        if spec.kind == LayerKind::Conv1d {
            if spec.stride == 0 || spec.dilation == 0 {
                return Err(RvcError::load(
                    &path_str,
                    format!("layer '{}' has zero stride or dilation", spec.name),
                ));
            }
            if weight.shape[2] == 0 {
                return Err(RvcError::load(
                    &path_str,
                    format!("'{}' has an empty kernel", spec.weight_key()),
                ));
            }
        }

        let out_features = weight.shape[0];
        let weight_values = decode(&path_str, &spec.weight_key(), weight)?;
        let bias = match state.get(&spec.bias_key()) {
            Some(bias) => {
                if bias.shape != [out_features] {
                    return Err(RvcError::load(
                        &path_str,
                        format!(
                            "'{}' has shape {:?}, expected [{}]",
                            spec.bias_key(),
                            bias.shape,
                            out_features
                        ),
                    ));
                }
                let values = decode(&path_str, &spec.bias_key(), bias)?;
                Some(Tensor::<B, 1>::from_data(
                    TensorData::new(values, [out_features]),
                    device,
                ))
            }
            None => None,
        };

        let op = match spec.kind {
            LayerKind::Linear => LayerOp::Linear {
                weight: Tensor::from_data(
                    TensorData::new(weight_values, [weight.shape[0], weight.shape[1]]),
                    device,
                ),
                bias,
            },
            LayerKind::Conv1d => LayerOp::Conv1d {
                weight: Tensor::from_data(
                    TensorData::new(
                        weight_values,
                        [weight.shape[0], weight.shape[1], weight.shape[2]],
                    ),
                    device,
                ),
                bias,
            },
        };

        Ok(Self {
            spec: spec.clone(),
            op,
            weight_dims: weight.shape.clone(),
        })
    }

    /// Reject inputs the backend would otherwise panic on.
    fn check_input(&self, dims: [usize; 3]) -> Result<()> {
        let mismatch = |expected: String| RvcError::ShapeMismatch {
            layer: self.spec.name.clone(),
            expected,
            actual: dims.to_vec(),
        };

        match self.spec.kind {
            LayerKind::Linear => {
                let in_features = self.weight_dims[1];
                if dims[2] != in_features {
                    return Err(mismatch(format!("last axis {}", in_features)));
                }
            }
            LayerKind::Conv1d => {
                let in_channels = self.weight_dims[1];
                if dims[1] != in_channels {
                    return Err(mismatch(format!("{} channels", in_channels)));
                }
                // Kernel is non-zero, checked at build
                let span = self
                    .spec
                    .dilation
                    .checked_mul(self.weight_dims[2] - 1)
                    .and_then(|s| s.checked_add(1))
                    .ok_or_else(|| mismatch("a kernel span that fits in memory".to_string()))?;
                let padded = self
                    .spec
                    .padding
                    .checked_mul(2)
                    .and_then(|p| p.checked_add(dims[2]))
                    .ok_or_else(|| mismatch("padding that fits in memory".to_string()))?;
                if padded < span {
                    return Err(mismatch(format!(
                        "at least {} samples on the time axis",
                        span.saturating_sub(padded - dims[2])
                    )));
                }
            }
        }
        Ok(())
    }

    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let output = match &self.op {
            LayerOp::Linear { weight, bias } => {
                let [batch, channels, time] = input.dims();
                let out_features = weight.dims()[0];
                let projected = input
                    .reshape([batch * channels, time])
                    .matmul(weight.clone().transpose());
                let projected = match bias {
                    Some(bias) => projected + bias.clone().unsqueeze::<2>(),
                    None => projected,
                };
                projected.reshape([batch, channels, out_features])
            }
            LayerOp::Conv1d { weight, bias } => conv1d(
                input,
                weight.clone(),
                bias.clone(),
                ConvOptions::new(
                    [self.spec.stride],
                    [self.spec.padding],
                    [self.spec.dilation],
                    1,
                ),
            ),
        };
        apply_activation(output, self.spec.activation, self.spec.negative_slope)
    }

    fn summary(&self) -> String {
        format!("{} {:?}", self.spec, self.weight_dims)
    }
}

fn apply_activation<B: Backend>(x: Tensor<B, 3>, act: Activation, slope: f64) -> Tensor<B, 3> {
    match act {
        Activation::None => x,
        Activation::Relu => activation::relu(x),
        Activation::LeakyRelu => activation::leaky_relu(x, slope),
        Activation::Tanh => activation::tanh(x),
        Activation::Sigmoid => activation::sigmoid(x),
        Activation::Gelu => activation::gelu(x),
        Activation::Silu => activation::silu(x),
    }
}

fn decode(path: &str, key: &str, tensor: &WeightTensor) -> Result<Vec<f32>> {
    let values = tensor.to_f32_vec()?;
    if values.len() != tensor.num_elements() {
        return Err(RvcError::load(
            path,
            format!(
                "'{}' holds {} values for shape {:?}",
                key,
                values.len(),
                tensor.shape
            ),
        ));
    }
    Ok(values)
}

fn parse_meta<T: std::str::FromStr>(path: &Path, state: &StateDict, key: &str) -> Result<Option<T>> {
    match state.meta(key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            RvcError::load(
                path.display().to_string(),
                format!("metadata '{}' is not a valid number: '{}'", key, raw),
            )
        }),
        None => Ok(None),
    }
}

/// Sequential network loaded from a safetensors artifact
pub struct SequentialModel<B: Backend> {
    info: ModelInfo,
    layers: Vec<SequentialLayer<B>>,
    device: B::Device,
}

impl SequentialModel<CpuBackend> {
    /// Load onto the default CPU device.
    pub fn load_cpu(path: &Path, bytes: &[u8], sha256: String) -> Result<Self> {
        let state = StateDict::from_bytes(path, bytes)?;
        Self::from_state_dict(path, &state, sha256, NdArrayDevice::default())
    }
}

impl<B: Backend> SequentialModel<B> {
    /// Build the layer stack from a parsed artifact.
    ///
    /// Channel counts are checked across the whole stack here; time-axis
    /// lengths depend on the input and are checked per forward pass.
    pub fn from_state_dict(
        path: &Path,
        state: &StateDict,
        sha256: String,
        device: B::Device,
    ) -> Result<Self> {
        let specs = state.layer_specs(path)?;
        let mut layers = Vec::with_capacity(specs.len());
        let mut channels = 1usize;

        for spec in &specs {
            let layer = SequentialLayer::build(path, spec, state, &device)?;
            if spec.kind == LayerKind::Conv1d {
                if layer.weight_dims[1] != channels {
                    return Err(RvcError::load(
                        path.display().to_string(),
                        format!(
                            "layer '{}' expects {} input channels but receives {}",
                            spec.name, layer.weight_dims[1], channels
                        ),
                    ));
                }
                channels = layer.weight_dims[0];
            }
            layers.push(layer);
        }

        let expected_input_len = match parse_meta::<usize>(path, state, INPUT_LENGTH_KEY)? {
            Some(len) => Some(len),
            None => layers
                .first()
                .filter(|layer| layer.spec.kind == LayerKind::Linear)
                .map(|layer| layer.weight_dims[1]),
        };

        let name = state
            .meta("name")
            .map(str::to_string)
            .or_else(|| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| "model".to_string());

        let info = ModelInfo {
            name,
            version: state.meta("version").map(str::to_string),
            format: ModelFormat::Sequential,
            path: path.display().to_string(),
            sha256,
            expected_input_len,
            sample_rate: parse_meta::<u32>(path, state, "sample_rate")?,
            layers: layers.iter().map(SequentialLayer::summary).collect(),
        };

        debug!(
            "Built sequential model '{}' with {} layers (output channels {})",
            info.name,
            layers.len(),
            channels
        );

        Ok(Self {
            info,
            layers,
            device,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

impl<B: Backend> VoiceModel for SequentialModel<B> {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn forward(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.validate_input(samples)?;

        let mut x = Tensor::<B, 3>::from_data(
            TensorData::new(samples.to_vec(), [1, 1, samples.len()]),
            &self.device,
        );

        for layer in &self.layers {
            layer.check_input(x.dims())?;
            x = layer.forward(x);
            debug!("{} -> {:?}", layer.spec.name, x.dims());
        }

        let values = x
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| RvcError::InferenceFailed {
                reason: format!("could not read output tensor: {:?}", e),
            })?;

        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            warn!("Output contains a non-finite value at position {}", pos);
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use safetensors::Dtype;
    use std::collections::HashMap;

    fn tensor(shape: &[usize], values: &[f32]) -> WeightTensor {
        WeightTensor {
            dtype: Dtype::F32,
            shape: shape.to_vec(),
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn state(tensors: Vec<(&str, WeightTensor)>, layers: &[LayerSpec]) -> StateDict {
        let mut metadata = HashMap::new();
        metadata.insert(
            "layers".to_string(),
            serde_json::to_string(layers).expect("layers json"),
        );
        StateDict {
            tensors: tensors
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            metadata,
        }
    }

    fn build(state: &StateDict) -> Result<SequentialModel<CpuBackend>> {
        SequentialModel::from_state_dict(
            Path::new("test.safetensors"),
            state,
            String::new(),
            NdArrayDevice::default(),
        )
    }

    #[test]
    fn identity_conv_passes_samples_through() {
        let state = state(
            vec![("id.weight", tensor(&[1, 1, 3], &[0.0, 1.0, 0.0]))],
            &[LayerSpec::conv1d("id", 1)],
        );
        let mut model = build(&state).unwrap();

        let output = model.forward(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(output, vec![1.0, 2.0, 3.0]);
        assert_eq!(model.expected_input_len(), None);
    }

    #[test]
    fn linear_layer_applies_weight_and_bias() {
        // y = W x + b with W = [[1, 1], [2, -1]], b = [0.5, 0]
        let state = state(
            vec![
                ("fc.weight", tensor(&[2, 2], &[1.0, 1.0, 2.0, -1.0])),
                ("fc.bias", tensor(&[2], &[0.5, 0.0])),
            ],
            &[LayerSpec::linear("fc")],
        );
        let mut model = build(&state).unwrap();
        assert_eq!(model.expected_input_len(), Some(2));

        let output = model.forward(&[3.0, 1.0]).unwrap();
        assert_relative_eq!(output[0], 4.5);
        assert_relative_eq!(output[1], 5.0);
    }

    #[test]
    fn activations_follow_layers() {
        let state = state(
            vec![("fc.weight", tensor(&[3, 3], &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]))],
            &[LayerSpec::linear("fc").with_activation(Activation::Relu)],
        );
        let mut model = build(&state).unwrap();
        let output = model.forward(&[-1.0, 0.5, 2.0]).unwrap();
        assert_eq!(output, vec![0.0, 0.5, 2.0]);
    }

    #[test]
    fn conv_then_linear_flattens_channels() {
        // Two output channels (copy, negate), then a sum over the time axis
        let state = state(
            vec![
                ("0.weight", tensor(&[2, 1, 1], &[1.0, -1.0])),
                ("1.weight", tensor(&[1, 2], &[1.0, 1.0])),
            ],
            &[LayerSpec::conv1d("0", 0), LayerSpec::linear("1")],
        );
        let mut model = build(&state).unwrap();
        let output = model.forward(&[1.5, 2.0]).unwrap();
        assert_eq!(output, vec![3.5, -3.5]);
    }

    #[test]
    fn wrong_length_is_shape_mismatch() {
        let state = state(
            vec![("fc.weight", tensor(&[1, 4], &[0.25; 4]))],
            &[LayerSpec::linear("fc")],
        );
        let mut model = build(&state).unwrap();
        let err = model.forward(&[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(err.error_code(), "SHAPE_MISMATCH");
    }

    #[test]
    fn short_input_for_kernel_is_shape_mismatch() {
        let state = state(
            vec![("c.weight", tensor(&[1, 1, 5], &[0.2; 5]))],
            &[LayerSpec::conv1d("c", 0)],
        );
        let mut model = build(&state).unwrap();
        let err = model.forward(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, RvcError::ShapeMismatch { .. }));
        assert!(model.forward(&[1.0; 5]).is_ok());
    }

    #[test]
    fn empty_input_is_rejected() {
        let state = state(
            vec![("c.weight", tensor(&[1, 1, 1], &[1.0]))],
            &[LayerSpec::conv1d("c", 0)],
        );
        let mut model = build(&state).unwrap();
        assert!(matches!(model.forward(&[]), Err(RvcError::EmptyInput)));
    }

    #[test]
    fn channel_mismatch_fails_at_load() {
        let state = state(
            vec![
                ("a.weight", tensor(&[4, 1, 1], &[1.0; 4])),
                ("b.weight", tensor(&[1, 2, 1], &[1.0; 2])),
            ],
            &[LayerSpec::conv1d("a", 0), LayerSpec::conv1d("b", 0)],
        );
        let err = build(&state).err().expect("load should fail");
        assert!(err.is_load_failure());
    }

    #[test]
    fn missing_weight_fails_at_load() {
        let state = state(vec![], &[LayerSpec::linear("ghost")]);
        let err = build(&state).err().expect("load should fail");
        assert!(err.to_string().contains("ghost.weight"));
    }

    #[test]
    fn empty_kernel_fails_at_load() {
        let state = state(
            vec![("c.weight", tensor(&[1, 1, 0], &[]))],
            &[LayerSpec::conv1d("c", 0)],
        );
        let err = build(&state).err().expect("load should fail");
        assert!(err.is_load_failure());
        assert!(err.to_string().contains("empty kernel"));
    }

    #[test]
    fn oversized_dilation_is_shape_mismatch() {
        let mut spec = LayerSpec::conv1d("c", 0);
        spec.dilation = usize::MAX;
        let state = state(vec![("c.weight", tensor(&[1, 1, 3], &[1.0; 3]))], &[spec]);
        let mut model = build(&state).unwrap();
        let err = model.forward(&[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, RvcError::ShapeMismatch { .. }));
    }

    #[test]
    fn oversized_padding_is_shape_mismatch() {
        let state = state(
            vec![("c.weight", tensor(&[1, 1, 1], &[1.0]))],
            &[LayerSpec::conv1d("c", usize::MAX / 2 + 1)],
        );
        let mut model = build(&state).unwrap();
        let err = model.forward(&[1.0]).unwrap_err();
        assert!(matches!(err, RvcError::ShapeMismatch { .. }));
    }

    #[test]
    fn non_finite_values_pass_through() {
        let state = state(
            vec![("c.weight", tensor(&[1, 1, 1], &[1.0]))],
            &[LayerSpec::conv1d("c", 0)],
        );
        let mut model = build(&state).unwrap();
        let output = model.forward(&[1.0, f32::NAN, f32::NEG_INFINITY]).unwrap();
        assert_eq!(output[0], 1.0);
        assert!(output[1].is_nan());
        assert_eq!(output[2], f32::NEG_INFINITY);
    }

    #[test]
    fn metadata_fills_model_info() {
        let mut state = state(
            vec![("c.weight", tensor(&[1, 1, 1], &[1.0]))],
            &[LayerSpec::conv1d("c", 0)],
        );
        state.metadata.insert("name".to_string(), "alto".to_string());
        state.metadata.insert("sample_rate".to_string(), "40000".to_string());
        state.metadata.insert(INPUT_LENGTH_KEY.to_string(), "16".to_string());

        let model = build(&state).unwrap();
        let info = model.info();
        assert_eq!(info.name, "alto");
        assert_eq!(info.sample_rate, Some(40000));
        assert_eq!(info.expected_input_len, Some(16));
        assert_eq!(info.layers.len(), 1);
        assert_eq!(model.num_layers(), 1);
    }
}
