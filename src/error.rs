//! Error handling for rvc-infer
//!
//! Every failure is either a load failure (the artifact could not be turned into
//! a runnable model) or an inference failure (the model could not produce output
//! for the given samples). Both are fatal for the invocation.

use thiserror::Error;

/// Result type alias for rvc-infer operations
pub type Result<T> = std::result::Result<T, RvcError>;

/// Main error type for rvc-infer operations
#[derive(Error, Debug)]
pub enum RvcError {
    // Load Failures
    #[error("Model not found: {path}")]
    ModelNotFound {
        path: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to load model '{path}': {reason}")]
    ModelLoad {
        path: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported model format: {format}")]
    UnsupportedFormat { format: String },

    // Inference Failures
    #[error("Shape mismatch at {layer}: expected {expected}, got {actual:?}")]
    ShapeMismatch {
        layer: String,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("Input contains no samples")]
    EmptyInput,

    #[error("Invalid sample at position {index}: '{value}'")]
    InvalidSample { index: usize, value: String },

    #[error("Inference failed: {reason}")]
    InferenceFailed { reason: String },

    // Audio Transport Errors
    #[error("Invalid audio file: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RvcError {
    /// Build a `ModelLoad` error without an underlying source.
    pub fn load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        RvcError::ModelLoad {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            RvcError::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            RvcError::ModelLoad { .. } => "MODEL_LOAD",
            RvcError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            RvcError::ShapeMismatch { .. } => "SHAPE_MISMATCH",
            RvcError::EmptyInput => "EMPTY_INPUT",
            RvcError::InvalidSample { .. } => "INVALID_SAMPLE",
            RvcError::InferenceFailed { .. } => "INFERENCE_FAILED",
            RvcError::InvalidAudio { .. } => "INVALID_AUDIO",
            RvcError::Io(_) => "IO_ERROR",
            RvcError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether the failure happened while turning the artifact into a model.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            RvcError::ModelNotFound { .. }
                | RvcError::ModelLoad { .. }
                | RvcError::UnsupportedFormat { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RvcError::ModelNotFound { .. } => vec![
                "Check the model path is correct",
                "Verify the model file hasn't been moved or deleted",
            ],
            RvcError::ModelLoad { .. } => vec![
                "The model file may be truncated or corrupted - try exporting it again",
                "Run with --info to inspect the artifact",
            ],
            RvcError::UnsupportedFormat { .. } => vec![
                "Export PyTorch checkpoints with safetensors.torch.save_file",
                "Export the graph to ONNX and build with --features onnx",
            ],
            RvcError::ShapeMismatch { .. } => vec![
                "Run with --info to see the input length the model expects",
                "Pad or trim the input samples to the expected length",
            ],
            RvcError::EmptyInput => vec!["Pass at least one sample after the model path"],
            RvcError::InvalidSample { .. } => vec![
                "Samples must be decimal floating-point literals such as 0.25 or -1e-3",
            ],
            RvcError::InvalidAudio { .. } => vec![
                "Convert the file to a PCM or 32-bit float WAV first",
            ],
            _ => vec![],
        }
    }
}
