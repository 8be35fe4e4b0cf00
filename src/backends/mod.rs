//! Inference engine implementations
//!
//! `OnnxInpaintBackend` runs a real inpainting model through ONNX Runtime
//! and is feature-gated; `DiffusionInpaintBackend` is the model-free fallback
//! that works everywhere. Test doubles live in `test_utils`.

#[cfg(feature = "onnx")]
pub mod onnx;

pub mod diffusion;

pub mod test_utils;

#[cfg(feature = "onnx")]
pub use onnx::OnnxInpaintBackend;

pub use diffusion::DiffusionInpaintBackend;

use crate::{
    config::{EngineType, RemovalConfig},
    error::Result,
    inference::InferenceEngine,
};

/// Construct and initialize the engine selected by the configuration
///
/// # Errors
///
/// Fails when the ONNX engine is selected without a model path, or when
/// model loading fails.
pub async fn create_engine(config: &RemovalConfig) -> Result<Box<dyn InferenceEngine>> {
    let mut engine: Box<dyn InferenceEngine> = match config.engine_type {
        #[cfg(feature = "onnx")]
        EngineType::Onnx => {
            let model_path = config.model_path.clone().ok_or_else(|| {
                crate::error::WmRemovalError::invalid_config(
                    "ONNX engine selected but no model path configured",
                )
            })?;
            Box::new(OnnxInpaintBackend::new(model_path, config.model_input_size))
        },
        EngineType::Diffusion => Box::new(DiffusionInpaintBackend::new()),
    };
    engine.initialize().await?;
    log::info!("Inference engine '{}' initialized", engine.name());
    Ok(engine)
}
