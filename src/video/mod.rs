//! Video decode and encode seams
//!
//! The pipeline talks to video containers through the [`VideoBackend`] trait:
//! one side streams decoded frames, the other consumes repaired frames into a
//! new container. The production implementation wraps FFmpeg; tests substitute
//! an in-memory backend.

pub mod ffmpeg;
pub mod frame;

pub use ffmpeg::FfmpegVideoBackend;
pub use frame::VideoFrame;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Video container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    /// MP4 container (H.264/H.265)
    Mp4,
    /// AVI container
    Avi,
    /// QuickTime MOV container
    Mov,
    /// Matroska container
    Mkv,
    /// WebM container
    WebM,
    /// Animated GIF
    Gif,
}

impl VideoFormat {
    /// File extension for this format
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
            Self::Mov => "mov",
            Self::Mkv => "mkv",
            Self::WebM => "webm",
            Self::Gif => "gif",
        }
    }

    /// MIME type for this format
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Avi => "video/x-msvideo",
            Self::Mov => "video/quicktime",
            Self::Mkv => "video/x-matroska",
            Self::WebM => "video/webm",
            Self::Gif => "image/gif",
        }
    }

    /// Detect format from a file extension
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "avi" => Some(Self::Avi),
            "mov" => Some(Self::Mov),
            "mkv" => Some(Self::Mkv),
            "webm" => Some(Self::WebM),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }
}

/// Container metadata read without decoding the full stream
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    /// Duration in seconds
    pub duration: f64,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frames per second
    pub fps: f64,
    /// Estimated total frame count
    ///
    /// Derived from duration and frame rate; the decoded count is
    /// authoritative and may differ for variable-frame-rate sources.
    pub total_frames: u64,
    /// Container format
    pub format: VideoFormat,
    /// Video codec name
    pub codec: String,
    /// Whether the container carries an audio stream
    pub has_audio: bool,
}

/// Encoding parameters for the output container
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    /// Frames per second of the output stream
    pub fps: f64,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Constant rate factor (0-51)
    pub crf: u8,
    /// x264 preset name
    pub preset: String,
    /// Output container format; the video codec is chosen to match
    pub format: VideoFormat,
    /// Source container to copy the audio stream from, when set
    pub audio_source: Option<std::path::PathBuf>,
}

/// Trait for video backend implementations
#[async_trait]
pub trait VideoBackend: Send + Sync {
    /// Read container metadata without decoding frames
    async fn probe(&self, input_path: &Path) -> Result<VideoMetadata>;

    /// Decode the video stream into a stream of RGB frames
    async fn decode_frames(&self, input_path: &Path) -> Result<FrameStream>;

    /// Open a frame sink encoding to `output_path`
    ///
    /// Frames written to the sink must share the dimensions in `settings`.
    /// When `settings.audio_source` is set and that container has an audio
    /// stream, it is copied losslessly into the output in the same pass.
    async fn open_encoder(
        &self,
        output_path: &Path,
        settings: &EncodeSettings,
    ) -> Result<Box<dyn FrameSink>>;

    /// Container formats this backend accepts
    fn supported_formats(&self) -> &[VideoFormat];
}

/// Consumer side of the encode seam
#[async_trait]
pub trait FrameSink: Send {
    /// Append one frame to the output stream
    async fn write_frame(&mut self, frame: &VideoFrame) -> Result<()>;

    /// Flush buffered frames and finalize the container
    ///
    /// The output file is not valid until this returns.
    async fn finish(self: Box<Self>) -> Result<()>;
}

/// Stream of decoded frames in presentation order
pub type FrameStream = std::pin::Pin<Box<dyn futures::Stream<Item = Result<VideoFrame>> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip() {
        for format in [
            VideoFormat::Mp4,
            VideoFormat::Avi,
            VideoFormat::Mov,
            VideoFormat::Mkv,
            VideoFormat::WebM,
            VideoFormat::Gif,
        ] {
            assert_eq!(VideoFormat::from_extension(format.extension()), Some(format));
        }
    }

    #[test]
    fn test_format_detection_case_insensitive() {
        assert_eq!(VideoFormat::from_extension("MP4"), Some(VideoFormat::Mp4));
        assert_eq!(VideoFormat::from_extension("MoV"), Some(VideoFormat::Mov));
        assert_eq!(VideoFormat::from_extension("wav"), None);
    }
}
