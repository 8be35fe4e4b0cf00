//! Media probing and preview extraction
//!
//! Validates an uploaded file before a session is created: readable
//! container, at least one decodable frame, sane metadata. Decoder handles
//! are opened per call and released before returning.

use crate::{
    error::{Result, WmRemovalError},
    video::{VideoBackend, VideoFrame, VideoMetadata},
};

use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;

/// Probes uploaded media through a [`VideoBackend`]
#[derive(Clone)]
pub struct MediaProbe {
    backend: Arc<dyn VideoBackend>,
}

impl MediaProbe {
    /// Create a new probe over the given backend
    #[must_use]
    pub fn new(backend: Arc<dyn VideoBackend>) -> Self {
        Self { backend }
    }

    /// Read and validate container metadata
    ///
    /// # Errors
    ///
    /// - `EmptyMedia` for zero-byte files and containers without a video
    ///   stream
    /// - `UnreadableMedia` when the container cannot be opened or parsed
    pub async fn probe(&self, path: &Path) -> Result<VideoMetadata> {
        let file_len = tokio::fs::metadata(path)
            .await
            .map_err(|e| WmRemovalError::file_io_error("stat upload", path, e))?
            .len();
        // A zero-byte upload is not worth handing to the demuxer
        if file_len == 0 {
            return Err(WmRemovalError::empty_media(format!(
                "'{}' is empty",
                path.display()
            )));
        }

        let metadata = self.backend.probe(path).await?;
        log::info!(
            "Upload '{}' probed: {}x{} @ {:.2} fps, {:.2}s, ~{} frames",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.fps,
            metadata.duration,
            metadata.total_frames
        );
        Ok(metadata)
    }

    /// Decode the first frame for region-selection preview
    ///
    /// # Errors
    ///
    /// Returns `EmptyMedia` when the container decodes to no frames.
    pub async fn extract_first_frame(&self, path: &Path) -> Result<VideoFrame> {
        let mut frames = self.backend.decode_frames(path).await?;
        match frames.next().await {
            Some(frame) => frame,
            None => Err(WmRemovalError::empty_media(format!(
                "'{}' contains no decodable frames",
                path.display()
            ))),
        }
        // Dropping the stream here tears down the decode task
    }

    /// Decode the first frame and save it as a preview JPEG
    pub async fn save_preview(&self, input: &Path, preview_path: &Path) -> Result<VideoFrame> {
        let frame = self.extract_first_frame(input).await?;
        frame
            .image
            .save_with_format(preview_path, image::ImageFormat::Jpeg)?;
        log::debug!("Preview frame written to '{}'", preview_path.display());
        Ok(frame)
    }
}
