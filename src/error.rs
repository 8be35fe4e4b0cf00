//! Error types for watermark removal operations

use thiserror::Error;

/// Result type alias for watermark removal operations
pub type Result<T> = std::result::Result<T, WmRemovalError>;

/// Pipeline stage in which a processing failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    /// Container decoding / frame extraction
    Decode,
    /// Per-frame model inference
    Inference,
    /// Output stream encoding
    Encode,
    /// Audio merge into the final container
    Mux,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode => write!(f, "decode"),
            Self::Inference => write!(f, "inference"),
            Self::Encode => write!(f, "encode"),
            Self::Mux => write!(f, "mux"),
        }
    }
}

/// Comprehensive error types for watermark removal operations
#[derive(Error, Debug)]
pub enum WmRemovalError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image format or raster processing errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// The uploaded container could not be opened or parsed
    #[error("Unreadable media: {0}")]
    UnreadableMedia(String),

    /// The uploaded container has no decodable frames
    #[error("Empty media: {0}")]
    EmptyMedia(String),

    /// The selected region violates the frame-bounds invariants
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// Unknown or already-destroyed session identifier
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Unrecoverable failure inside a processing run
    #[error("Pipeline error at stage '{stage}'{}: {detail}", .frame_index.map(|i| format!(" (frame {i})")).unwrap_or_default())]
    Pipeline {
        /// Stage that failed
        stage: PipelineStage,
        /// Frame index at the point of failure, when known
        frame_index: Option<u64>,
        /// Human-readable failure detail
        detail: String,
    },

    /// Opaque failure surfaced from the inference engine
    #[error("Inference error: {0}")]
    Inference(String),

    /// Device memory or disk space exhaustion
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unsupported upload format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WmRemovalError {
    /// Create a new unreadable-media error
    pub fn unreadable_media<S: Into<String>>(msg: S) -> Self {
        Self::UnreadableMedia(msg.into())
    }

    /// Create a new empty-media error
    pub fn empty_media<S: Into<String>>(msg: S) -> Self {
        Self::EmptyMedia(msg.into())
    }

    /// Create a new invalid-region error
    pub fn invalid_region<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRegion(msg.into())
    }

    /// Create a new session-not-found error
    pub fn session_not_found<S: Into<String>>(id: S) -> Self {
        Self::SessionNotFound(id.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new unsupported format error
    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new resource-exhaustion error
    pub fn resource_exhausted<S: Into<String>>(msg: S) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a pipeline error with stage context
    pub fn pipeline<S: Into<String>>(stage: PipelineStage, detail: S) -> Self {
        Self::Pipeline {
            stage,
            frame_index: None,
            detail: detail.into(),
        }
    }

    /// Create a pipeline error pinned to a specific frame
    pub fn pipeline_at_frame<S: Into<String>>(
        stage: PipelineStage,
        frame_index: u64,
        detail: S,
    ) -> Self {
        Self::Pipeline {
            stage,
            frame_index: Some(frame_index),
            detail: detail.into(),
        }
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Stage that failed, when this is a pipeline error
    #[must_use]
    pub fn pipeline_stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Pipeline { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
