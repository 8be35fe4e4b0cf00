//! ONNX Runtime inpainting backend
//!
//! Loads a LaMa-style image+mask inpainting model once and serves every
//! pipeline run from the same session. Execution provider selection is
//! automatic: CUDA, then CoreML, then CPU.

use crate::{
    error::{Result, WmRemovalError},
    inference::{blend_masked, frame_to_tensor, mask_to_tensor, tensor_to_image, InferenceEngine},
    region::RegionMask,
    video::VideoFrame,
};

use async_trait::async_trait;
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// ONNX Runtime backend for watermark inpainting
pub struct OnnxInpaintBackend {
    session: Option<Arc<Mutex<Session>>>,
    model_path: PathBuf,
    input_size: u32,
}

impl OnnxInpaintBackend {
    /// Create a backend for the model at `model_path`
    ///
    /// The model must take an image tensor `[1, 3, H, W]` and a mask tensor
    /// `[1, 1, H, W]` and produce a repainted image tensor `[1, 3, H, W]`.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(model_path: P, input_size: u32) -> Self {
        Self {
            session: None,
            model_path: model_path.into(),
            input_size,
        }
    }

    /// Build the session with hardware acceleration when available
    fn build_session(&self) -> Result<Session> {
        let load_start = instant::Instant::now();

        let mut session_builder = Session::builder()
            .map_err(|e| {
                WmRemovalError::model(format!("failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                WmRemovalError::model(format!("failed to set optimization level: {e}"))
            })?;

        // Provider auto-detect: CUDA > CoreML > CPU
        let mut providers = Vec::new();
        let cuda_provider = CUDAExecutionProvider::default();
        if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
            log::info!("CUDA execution provider is available and will be used");
            providers.push(cuda_provider.build());
        } else {
            log::debug!("CUDA execution provider is not available");
        }
        let coreml_provider = CoreMLExecutionProvider::default();
        if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
            log::info!("CoreML execution provider is available and will be used");
            providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
        } else {
            log::debug!("CoreML execution provider is not available");
        }

        if !providers.is_empty() {
            session_builder = session_builder
                .with_execution_providers(providers)
                .map_err(|e| {
                    WmRemovalError::model(format!("failed to set execution providers: {e}"))
                })?;
        } else {
            log::warn!("No hardware acceleration available, using CPU");
        }

        let session = session_builder
            .commit_from_file(&self.model_path)
            .map_err(|e| {
                WmRemovalError::model(format!(
                    "failed to load model '{}': {e}",
                    self.model_path.display()
                ))
            })?;

        log::info!(
            "Inpainting model loaded from '{}' in {:.0}ms",
            self.model_path.display(),
            load_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(session)
    }

    fn run_model(
        session: &Arc<Mutex<Session>>,
        image_tensor: Array4<f32>,
        mask_tensor: Array4<f32>,
    ) -> Result<Array4<f32>> {
        let mut session = session
            .lock()
            .map_err(|_| WmRemovalError::inference("model session lock poisoned"))?;

        let image_value = Value::from_array(image_tensor)
            .map_err(|e| WmRemovalError::inference(format!("failed to build image tensor: {e}")))?;
        let mask_value = Value::from_array(mask_tensor)
            .map_err(|e| WmRemovalError::inference(format!("failed to build mask tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![image_value, mask_value])
            .map_err(|e| WmRemovalError::inference(format!("model inference failed: {e}")))?;

        // Positional output access: the repainted image is the first output
        let keys: Vec<_> = outputs.keys().collect();
        let first_key = keys
            .first()
            .ok_or_else(|| WmRemovalError::inference("model produced no outputs"))?;
        let output_tensor = outputs
            .get(first_key)
            .ok_or_else(|| WmRemovalError::inference("first output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| {
                WmRemovalError::inference(format!("failed to extract output tensor: {e}"))
            })?;

        let shape = output_tensor.shape().to_vec();
        if shape.len() != 4 {
            return Err(WmRemovalError::inference(format!(
                "expected 4D output tensor, got {}D",
                shape.len()
            )));
        }
        Array4::from_shape_vec(
            (shape[0], shape[1], shape[2], shape[3]),
            output_tensor.view().to_owned().into_raw_vec_and_offset().0,
        )
        .map_err(|e| WmRemovalError::inference(format!("failed to reshape output tensor: {e}")))
    }
}

#[async_trait]
impl InferenceEngine for OnnxInpaintBackend {
    async fn initialize(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = self.build_session()?;
        self.session = Some(Arc::new(Mutex::new(session)));
        Ok(())
    }

    async fn repair(&self, frame: &VideoFrame, mask: &RegionMask) -> Result<VideoFrame> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| WmRemovalError::model("ONNX backend not initialized"))?
            .clone();

        let image_tensor = frame_to_tensor(&frame.image, self.input_size);
        let mask_tensor = mask_to_tensor(mask, self.input_size);

        let output = tokio::task::spawn_blocking(move || {
            Self::run_model(&session, image_tensor, mask_tensor)
        })
        .await
        .map_err(|e| WmRemovalError::inference(format!("inference task panicked: {e}")))??;

        let repainted = tensor_to_image(&output)?;
        let image = blend_masked(&frame.image, &repainted, mask);
        Ok(VideoFrame::new(image, frame.index, frame.timestamp))
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    fn name(&self) -> &'static str {
        "onnx-inpaint"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_repair_requires_initialization() {
        let backend = OnnxInpaintBackend::new("/nonexistent/model.onnx", 512);
        assert!(!backend.is_initialized());

        let frame = VideoFrame::new(image::RgbImage::new(8, 8), 0, std::time::Duration::ZERO);
        let mask = crate::region::Region::new(0, 0, 4, 4)
            .validate(8, 8)
            .unwrap()
            .to_mask();
        let err = backend.repair(&frame, &mask).await.unwrap_err();
        assert!(matches!(err, WmRemovalError::Model(_)));
    }
}
