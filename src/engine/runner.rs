//! Inference runner
//!
//! Owns one loaded model for the duration of a call: load, reshape, forward,
//! flatten. The model is released when the runner is dropped, on success and
//! on every error path alike.

use std::path::Path;
use std::time::Instant;

use log::{debug, info};

use crate::error::Result;
use crate::neural::{load_model, ModelInfo, VoiceModel};

/// A loaded model ready to run forward passes
pub struct InferenceRunner {
    model: Box<dyn VoiceModel>,
}

impl InferenceRunner {
    /// Load the artifact at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let start = Instant::now();
        let model = load_model(path)?;
        debug!(
            "Loaded '{}' in {} ms",
            model.name(),
            start.elapsed().as_millis()
        );
        Ok(Self { model })
    }

    /// Wrap an already constructed model.
    pub fn from_model(model: Box<dyn VoiceModel>) -> Self {
        Self { model }
    }

    pub fn info(&self) -> &ModelInfo {
        self.model.info()
    }

    /// Run one forward pass and return the flattened output.
    pub fn infer(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let start = Instant::now();
        let output = self.model.forward(samples)?;
        info!(
            "Inference on {} samples produced {} samples in {} ms",
            samples.len(),
            output.len(),
            start.elapsed().as_millis()
        );
        Ok(output)
    }
}

/// Load a model, run it once over `samples`, and release it.
pub fn run_inference(model_path: &Path, samples: &[f32]) -> Result<Vec<f32>> {
    let mut runner = InferenceRunner::load(model_path)?;
    runner.infer(samples)
}
