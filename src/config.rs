//! Configuration types for the watermark removal service

use crate::error::{Result, WmRemovalError};
use std::path::PathBuf;
use std::time::Duration;

/// Inference engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineType {
    /// ONNX Runtime inpainting model (GPU acceleration when available)
    #[cfg(feature = "onnx")]
    Onnx,
    /// Pure-Rust diffusion fill, no model weights required
    Diffusion,
}

/// Unified configuration for uploads, processing, and storage layout
#[derive(Debug, Clone)]
pub struct RemovalConfig {
    /// Directory holding uploaded source files, keyed by session id
    pub upload_dir: PathBuf,
    /// Directory holding produced output files, keyed by session id
    pub output_dir: PathBuf,
    /// Accepted upload extensions (lowercase, without the dot)
    pub allowed_extensions: Vec<String>,
    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: u64,
    /// Maximum number of pipelines running concurrently against the engine
    pub max_concurrent_pipelines: usize,
    /// Inference engine to construct when none is injected
    pub engine_type: EngineType,
    /// Path to the ONNX inpainting model, required for the ONNX engine
    pub model_path: Option<PathBuf>,
    /// Square edge length frames are scaled to for model input
    pub model_input_size: u32,
    /// H.264 constant rate factor for the output encoder (0-51)
    pub encoder_crf: u8,
    /// x264 preset name for the output encoder
    pub encoder_preset: String,
    /// Merge the source audio track into the output when present
    pub preserve_audio: bool,
    /// Inactivity window after which unprocessed sessions may be reaped
    pub stale_session_ttl: Duration,
}

impl RemovalConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::new()
    }

    /// Whether a filename carries an accepted upload extension
    #[must_use]
    pub fn is_extension_allowed(&self, filename: &str) -> bool {
        std::path::Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.allowed_extensions.iter().any(|a| a == &ext)
            })
            .unwrap_or(false)
    }
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("temp_uploads"),
            output_dir: PathBuf::from("temp_processed"),
            allowed_extensions: ["mp4", "mov", "avi", "mkv", "webm", "gif"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            max_upload_bytes: 500 * 1024 * 1024,
            max_concurrent_pipelines: 1,
            #[cfg(feature = "onnx")]
            engine_type: EngineType::Onnx,
            #[cfg(not(feature = "onnx"))]
            engine_type: EngineType::Diffusion,
            model_path: None,
            model_input_size: 512,
            encoder_crf: 23,
            encoder_preset: "medium".to_string(),
            preserve_audio: true,
            stale_session_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Builder for `RemovalConfig`
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RemovalConfig::default(),
        }
    }

    #[must_use]
    pub fn upload_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    #[must_use]
    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    #[must_use]
    pub fn allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_extensions = extensions
            .into_iter()
            .map(|e| e.into().to_lowercase())
            .collect();
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    #[must_use]
    pub fn max_concurrent_pipelines(mut self, limit: usize) -> Self {
        self.config.max_concurrent_pipelines = limit;
        self
    }

    #[must_use]
    pub fn engine_type(mut self, engine_type: EngineType) -> Self {
        self.config.engine_type = engine_type;
        self
    }

    #[must_use]
    pub fn model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.model_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn model_input_size(mut self, size: u32) -> Self {
        self.config.model_input_size = size;
        self
    }

    #[must_use]
    pub fn encoder_crf(mut self, crf: u8) -> Self {
        self.config.encoder_crf = crf;
        self
    }

    #[must_use]
    pub fn encoder_preset<S: Into<String>>(mut self, preset: S) -> Self {
        self.config.encoder_preset = preset.into();
        self
    }

    #[must_use]
    pub fn preserve_audio(mut self, preserve: bool) -> Self {
        self.config.preserve_audio = preserve;
        self
    }

    #[must_use]
    pub fn stale_session_ttl(mut self, ttl: Duration) -> Self {
        self.config.stale_session_ttl = ttl;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns `WmRemovalError::InvalidConfig` for:
    /// - An empty extension allow-list
    /// - A zero upload size limit or concurrency limit
    /// - CRF values outside 0-51
    /// - A model input size below 64
    pub fn build(self) -> Result<RemovalConfig> {
        if self.config.allowed_extensions.is_empty() {
            return Err(WmRemovalError::invalid_config(
                "extension allow-list must not be empty",
            ));
        }
        if self.config.max_upload_bytes == 0 {
            return Err(WmRemovalError::invalid_config(
                "max upload size must be positive",
            ));
        }
        if self.config.max_concurrent_pipelines == 0 {
            return Err(WmRemovalError::invalid_config(
                "at least one concurrent pipeline is required",
            ));
        }
        if self.config.encoder_crf > 51 {
            return Err(WmRemovalError::invalid_config("encoder CRF must be 0-51"));
        }
        if self.config.model_input_size < 64 {
            return Err(WmRemovalError::invalid_config(
                "model input size must be at least 64",
            ));
        }
        Ok(self.config)
    }
}

impl Default for RemovalConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RemovalConfig::default();
        assert_eq!(config.encoder_crf, 23);
        assert_eq!(config.encoder_preset, "medium");
        assert_eq!(config.max_concurrent_pipelines, 1);
        assert!(config.preserve_audio);
        assert!(config.allowed_extensions.contains(&"mp4".to_string()));
    }

    #[test]
    fn test_extension_allow_list() {
        let config = RemovalConfig::default();
        assert!(config.is_extension_allowed("clip.mp4"));
        assert!(config.is_extension_allowed("CLIP.MOV"));
        assert!(config.is_extension_allowed("animated.gif"));
        assert!(!config.is_extension_allowed("audio.wav"));
        assert!(!config.is_extension_allowed("no_extension"));
    }

    #[test]
    fn test_builder_validation() {
        let err = RemovalConfig::builder()
            .allowed_extensions(Vec::<String>::new())
            .build();
        assert!(err.is_err());

        let err = RemovalConfig::builder().encoder_crf(52).build();
        assert!(err.is_err());

        let err = RemovalConfig::builder().max_concurrent_pipelines(0).build();
        assert!(err.is_err());

        let config = RemovalConfig::builder()
            .encoder_crf(18)
            .max_concurrent_pipelines(2)
            .build()
            .unwrap();
        assert_eq!(config.encoder_crf, 18);
        assert_eq!(config.max_concurrent_pipelines, 2);
    }

    #[test]
    fn test_builder_extension_normalization() {
        let config = RemovalConfig::builder()
            .allowed_extensions(["MP4", "WebM"])
            .build()
            .unwrap();
        assert!(config.is_extension_allowed("a.mp4"));
        assert!(config.is_extension_allowed("b.webm"));
        assert!(!config.is_extension_allowed("c.avi"));
    }
}
