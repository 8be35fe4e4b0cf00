//! Test doubles for pipeline and probe tests
//!
//! `MockInferenceEngine` and `MockVideoBackend` let the pipeline run end to
//! end without FFmpeg or model weights: synthetic frames in, an in-memory
//! sink out, with configurable failure injection and per-frame latency.

use crate::{
    error::{PipelineStage, Result, WmRemovalError},
    inference::InferenceEngine,
    region::RegionMask,
    video::{
        EncodeSettings, FrameSink, FrameStream, VideoBackend, VideoFormat, VideoFrame,
        VideoMetadata,
    },
};

use async_trait::async_trait;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Inference engine double that paints the masked region a solid color
pub struct MockInferenceEngine {
    /// Frame index at which `repair` fails, when set
    fail_at: Option<u64>,
    /// Artificial latency per repaired frame
    latency: Option<Duration>,
    /// Number of `repair` calls served
    calls: AtomicU64,
}

impl MockInferenceEngine {
    /// Engine that repairs every frame
    #[must_use]
    pub fn new() -> Self {
        Self {
            fail_at: None,
            latency: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Engine that fails at the given frame index
    #[must_use]
    pub fn failing_at(index: u64) -> Self {
        Self {
            fail_at: Some(index),
            latency: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Add per-frame latency, useful for cancellation tests
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of frames repaired so far
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockInferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceEngine for MockInferenceEngine {
    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn repair(&self, frame: &VideoFrame, mask: &RegionMask) -> Result<VideoFrame> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_at == Some(frame.index) {
            return Err(WmRemovalError::inference(format!(
                "injected failure at frame {}",
                frame.index
            )));
        }

        let mut image = frame.image.clone();
        for y in 0..image.height() {
            for x in 0..image.width() {
                if mask.is_masked(x, y) {
                    image.put_pixel(x, y, image::Rgb([127, 127, 127]));
                }
            }
        }
        Ok(VideoFrame::new(image, frame.index, frame.timestamp))
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Video backend double producing synthetic frames
pub struct MockVideoBackend {
    frame_count: u64,
    width: u32,
    height: u32,
    fps: f64,
    has_audio: bool,
    format: VideoFormat,
    /// When set, decode yields a single empty-media error
    empty_source: bool,
    /// Frame index at which decode yields an error, when set
    decode_fail_at: Option<u64>,
    /// Frame index at which the sink rejects a write, when set
    encode_fail_at: Option<u64>,
    /// Probe estimate reported for `total_frames`; defaults to `frame_count`
    declared_total: Option<u64>,
    /// Indices of frames accepted by sinks opened from this backend
    written: Arc<Mutex<Vec<u64>>>,
    /// Whether a sink's `finish` completed
    finished: Arc<Mutex<bool>>,
    /// Settings passed to the most recent `open_encoder` call
    last_settings: Arc<Mutex<Option<EncodeSettings>>>,
}

impl MockVideoBackend {
    /// Backend decoding `frame_count` synthetic frames of the given size
    #[must_use]
    pub fn with_frames(frame_count: u64, width: u32, height: u32) -> Self {
        Self {
            frame_count,
            width,
            height,
            fps: 30.0,
            has_audio: false,
            format: VideoFormat::Mp4,
            empty_source: false,
            decode_fail_at: None,
            encode_fail_at: None,
            declared_total: None,
            written: Arc::new(Mutex::new(Vec::new())),
            finished: Arc::new(Mutex::new(false)),
            last_settings: Arc::new(Mutex::new(None)),
        }
    }

    /// Inject a decode error at the given frame index
    #[must_use]
    pub fn decode_failing_at(mut self, index: u64) -> Self {
        self.decode_fail_at = Some(index);
        self
    }

    /// Inject an encode error at the given frame index
    #[must_use]
    pub fn encode_failing_at(mut self, index: u64) -> Self {
        self.encode_fail_at = Some(index);
        self
    }

    /// Report a probe frame-count estimate different from the decoded count
    #[must_use]
    pub fn declaring_total(mut self, total: u64) -> Self {
        self.declared_total = Some(total);
        self
    }

    /// Mark the synthetic source as carrying an audio stream
    #[must_use]
    pub fn with_audio(mut self) -> Self {
        self.has_audio = true;
        self
    }

    /// Report the given container format from `probe`
    #[must_use]
    pub fn with_format(mut self, format: VideoFormat) -> Self {
        self.format = format;
        self
    }

    /// Make decode report a container with no decodable frames
    #[must_use]
    pub fn with_empty_source(mut self) -> Self {
        self.empty_source = true;
        self
    }

    /// Frame indices accepted by the sink
    pub fn written_frames(&self) -> Vec<u64> {
        self.written.lock().expect("written lock").clone()
    }

    /// Whether the sink was finalized
    pub fn encoder_finished(&self) -> bool {
        *self.finished.lock().expect("finished lock")
    }

    /// Settings of the most recent encoder, when one was opened
    pub fn encoder_settings(&self) -> Option<EncodeSettings> {
        self.last_settings.lock().expect("settings lock").clone()
    }

    fn synthetic_frame(&self, index: u64) -> VideoFrame {
        // Per-frame gradient so tests can tell frames apart
        let shade = (index % 256) as u8;
        let image = RgbImage::from_pixel(self.width, self.height, image::Rgb([shade, shade, shade]));
        VideoFrame::new(
            image,
            index,
            Duration::from_secs_f64(index as f64 / self.fps),
        )
    }
}

#[async_trait]
impl VideoBackend for MockVideoBackend {
    async fn probe(&self, _input_path: &Path) -> Result<VideoMetadata> {
        let total_frames = self.declared_total.unwrap_or(self.frame_count);
        Ok(VideoMetadata {
            duration: total_frames as f64 / self.fps,
            width: self.width,
            height: self.height,
            fps: self.fps,
            total_frames,
            format: self.format,
            codec: "h264".to_string(),
            has_audio: self.has_audio,
        })
    }

    async fn decode_frames(&self, _input_path: &Path) -> Result<FrameStream> {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let frame_count = self.frame_count;
        let fail_at = self.decode_fail_at;
        let empty_source = self.empty_source;
        let frames: Vec<VideoFrame> = (0..frame_count).map(|i| self.synthetic_frame(i)).collect();

        tokio::spawn(async move {
            if empty_source {
                let _ = tx
                    .send(Err(WmRemovalError::empty_media(
                        "container produced no decodable frames",
                    )))
                    .await;
                return;
            }
            for frame in frames {
                if fail_at == Some(frame.index) {
                    let _ = tx
                        .send(Err(WmRemovalError::pipeline_at_frame(
                            PipelineStage::Decode,
                            frame.index,
                            "injected decode failure",
                        )))
                        .await;
                    return;
                }
                if tx.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    async fn open_encoder(
        &self,
        output_path: &Path,
        settings: &EncodeSettings,
    ) -> Result<Box<dyn FrameSink>> {
        *self.last_settings.lock().expect("settings lock") = Some(settings.clone());
        // Real encoders create the output file up front; mirror that so
        // cleanup-on-failure is observable
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output_path, b"").await?;

        Ok(Box::new(MemoryFrameSink {
            output_path: output_path.to_path_buf(),
            fail_at: self.encode_fail_at,
            written: Arc::clone(&self.written),
            finished: Arc::clone(&self.finished),
        }))
    }

    fn supported_formats(&self) -> &[VideoFormat] {
        &[VideoFormat::Mp4]
    }
}

/// Sink recording accepted frame indices in memory
struct MemoryFrameSink {
    output_path: PathBuf,
    fail_at: Option<u64>,
    written: Arc<Mutex<Vec<u64>>>,
    finished: Arc<Mutex<bool>>,
}

#[async_trait]
impl FrameSink for MemoryFrameSink {
    async fn write_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        if self.fail_at == Some(frame.index) {
            return Err(WmRemovalError::pipeline_at_frame(
                PipelineStage::Encode,
                frame.index,
                "injected encode failure",
            ));
        }
        self.written.lock().expect("written lock").push(frame.index);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        let count = self.written.lock().expect("written lock").len();
        tokio::fs::write(&self.output_path, format!("{count} frames")).await?;
        *self.finished.lock().expect("finished lock") = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use crate::region::Region;

    #[tokio::test]
    async fn test_mock_decode_stream() {
        let backend = MockVideoBackend::with_frames(5, 16, 16);
        let mut stream = backend.decode_frames(Path::new("x.mp4")).await.unwrap();
        let mut count = 0;
        while let Some(frame) = stream.next().await {
            let frame = frame.unwrap();
            assert_eq!(frame.index, count);
            count += 1;
        }
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_mock_decode_failure_injection() {
        let backend = MockVideoBackend::with_frames(5, 16, 16).decode_failing_at(2);
        let mut stream = backend.decode_frames(Path::new("x.mp4")).await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_mock_engine_failure_injection() {
        let engine = MockInferenceEngine::failing_at(1);
        let mask = Region::new(0, 0, 4, 4).validate(16, 16).unwrap().to_mask();
        let frame0 = VideoFrame::new(RgbImage::new(16, 16), 0, Duration::ZERO);
        let frame1 = VideoFrame::new(RgbImage::new(16, 16), 1, Duration::ZERO);

        assert!(engine.repair(&frame0, &mask).await.is_ok());
        assert!(engine.repair(&frame1, &mask).await.is_err());
        assert_eq!(engine.call_count(), 2);
    }
}
