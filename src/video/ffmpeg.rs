//! FFmpeg-backed video decode and encode
//!
//! Decoding runs in-process through `ffmpeg-next`: packets are decoded on a
//! blocking task and RGB frames cross an mpsc channel to the async side.
//! Encoding shells out to the system `ffmpeg` binary, feeding raw RGB frames
//! over stdin and copying the source audio stream in the same pass.

use crate::{
    error::{PipelineStage, Result, WmRemovalError},
    video::{EncodeSettings, FrameSink, FrameStream, VideoBackend, VideoFormat, VideoFrame, VideoMetadata},
};

use async_trait::async_trait;
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::Path;
use std::process::Stdio;
use std::sync::Once;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio_stream::wrappers::ReceiverStream;

static FFMPEG_INIT: Once = Once::new();

fn ensure_ffmpeg_initialized() {
    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            log::error!("Failed to initialize FFmpeg libraries: {}", e);
        }
    });
}

/// FFmpeg video backend
pub struct FfmpegVideoBackend {
    /// Path to the system `ffmpeg` binary used for encoding
    encoder_binary: std::path::PathBuf,
}

impl FfmpegVideoBackend {
    /// Create a new backend, locating the `ffmpeg` binary on PATH
    ///
    /// # Errors
    ///
    /// Returns an internal error when no `ffmpeg` binary can be found.
    pub fn new() -> Result<Self> {
        ensure_ffmpeg_initialized();
        let encoder_binary = which::which("ffmpeg").map_err(|e| {
            WmRemovalError::internal(format!("ffmpeg binary not found on PATH: {}", e))
        })?;
        log::debug!("Using ffmpeg encoder at {}", encoder_binary.display());
        Ok(Self { encoder_binary })
    }

    /// Create a backend with an explicit encoder binary path
    #[must_use]
    pub fn with_encoder_binary<P: Into<std::path::PathBuf>>(binary: P) -> Self {
        ensure_ffmpeg_initialized();
        Self {
            encoder_binary: binary.into(),
        }
    }

    /// Convert a decoded frame to an RGB `VideoFrame`
    fn convert_frame(
        frame: &ffmpeg::util::frame::video::Video,
        index: u64,
        time_base: ffmpeg::Rational,
        fallback_fps: f64,
    ) -> Result<VideoFrame> {
        let width = frame.width();
        let height = frame.height();

        let mut scaler = ffmpeg::software::scaling::Context::get(
            frame.format(),
            width,
            height,
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| {
            WmRemovalError::pipeline_at_frame(
                PipelineStage::Decode,
                index,
                format!("failed to create frame scaler: {}", e),
            )
        })?;

        let mut rgb_frame = ffmpeg::util::frame::video::Video::empty();
        scaler.run(frame, &mut rgb_frame).map_err(|e| {
            WmRemovalError::pipeline_at_frame(
                PipelineStage::Decode,
                index,
                format!("failed to convert frame to RGB: {}", e),
            )
        })?;

        // Copy row by row, dropping the stride padding
        let data = rgb_frame.data(0);
        let stride = rgb_frame.stride(0);
        let row_bytes = (width * 3) as usize;
        let mut raw = Vec::with_capacity(row_bytes * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            raw.extend_from_slice(&data[start..start + row_bytes]);
        }

        let image = RgbImage::from_raw(width, height, raw).ok_or_else(|| {
            WmRemovalError::pipeline_at_frame(
                PipelineStage::Decode,
                index,
                "frame buffer size mismatch",
            )
        })?;

        let timestamp_seconds = if let Some(pts) = frame.pts() {
            pts as f64 * f64::from(time_base.numerator()) / f64::from(time_base.denominator())
        } else {
            index as f64 / fallback_fps.max(1.0)
        };

        Ok(VideoFrame::new(
            image,
            index,
            Duration::from_secs_f64(timestamp_seconds.max(0.0)),
        ))
    }

    /// Build the full `ffmpeg` argument list for one encode pass
    ///
    /// The output codec follows the container: x264 for MP4/MOV/AVI/MKV,
    /// VP9 for WebM, and a palette filter chain for GIF, since the gif and
    /// webm muxers reject h264 streams. The output format always matches
    /// the source container, so a copied audio stream is always legal in
    /// the target; GIF carries no audio and skips the mux entirely.
    fn encoder_args(output_path: &Path, settings: &EncodeSettings) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = [
            "-y",
            "-loglevel",
            "error",
            // Raw RGB frames on stdin
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
        ]
        .map(Into::into)
        .to_vec();
        args.push("-s".into());
        args.push(format!("{}x{}", settings.width, settings.height).into());
        args.push("-r".into());
        args.push(format!("{}", settings.fps).into());
        args.push("-i".into());
        args.push("-".into());

        let audio_source = settings
            .audio_source
            .as_ref()
            .filter(|_| settings.format != VideoFormat::Gif);
        if let Some(audio_source) = audio_source {
            args.push("-i".into());
            args.push(audio_source.into());
            for flag in ["-map", "0:v:0", "-map", "1:a:0", "-c:a", "copy", "-shortest"] {
                args.push(flag.into());
            }
        }

        match settings.format {
            VideoFormat::Mp4 | VideoFormat::Mov | VideoFormat::Avi | VideoFormat::Mkv => {
                args.push("-c:v".into());
                args.push("libx264".into());
                args.push("-preset".into());
                args.push(settings.preset.as_str().into());
                args.push("-crf".into());
                args.push(settings.crf.to_string().into());
                args.push("-pix_fmt".into());
                args.push("yuv420p".into());
            },
            VideoFormat::WebM => {
                args.push("-c:v".into());
                args.push("libvpx-vp9".into());
                // Constant-quality mode
                args.push("-b:v".into());
                args.push("0".into());
                args.push("-crf".into());
                args.push(settings.crf.to_string().into());
                args.push("-pix_fmt".into());
                args.push("yuv420p".into());
            },
            VideoFormat::Gif => {
                // One-pass palette pipeline; the gif muxer only takes gif
                args.push("-vf".into());
                args.push("split[a][b];[a]palettegen[p];[b][p]paletteuse".into());
                args.push("-loop".into());
                args.push("0".into());
            },
        }

        args.push(output_path.into());
        args
    }

    fn detect_format(path: &Path) -> Result<VideoFormat> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| {
                WmRemovalError::unsupported_format(format!(
                    "cannot determine container format of '{}'",
                    path.display()
                ))
            })?;
        VideoFormat::from_extension(extension)
            .ok_or_else(|| WmRemovalError::unsupported_format(extension.to_string()))
    }
}

#[async_trait]
impl VideoBackend for FfmpegVideoBackend {
    async fn probe(&self, input_path: &Path) -> Result<VideoMetadata> {
        let input = ffmpeg::format::input(input_path).map_err(|e| {
            WmRemovalError::unreadable_media(format!(
                "failed to open '{}': {}",
                input_path.display(),
                e
            ))
        })?;

        let video_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| {
                WmRemovalError::empty_media(format!(
                    "no video stream in '{}'",
                    input_path.display()
                ))
            })?;
        let stream_index = video_stream.index();
        let time_base = video_stream.time_base();

        let codec_context =
            ffmpeg::codec::context::Context::from_parameters(video_stream.parameters()).map_err(
                |e| {
                    WmRemovalError::unreadable_media(format!(
                        "failed to create codec context: {}",
                        e
                    ))
                },
            )?;
        let decoder = codec_context.decoder().video().map_err(|e| {
            WmRemovalError::unreadable_media(format!("failed to open video decoder: {}", e))
        })?;

        let width = decoder.width();
        let height = decoder.height();
        if width == 0 || height == 0 {
            return Err(WmRemovalError::unreadable_media(format!(
                "video stream in '{}' reports zero dimensions",
                input_path.display()
            )));
        }

        let fps = f64::from(video_stream.avg_frame_rate());
        let stream_duration = video_stream.duration();
        let duration = if stream_duration > 0 {
            stream_duration as f64 * f64::from(time_base)
        } else if input.duration() > 0 {
            input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
        } else {
            0.0
        };

        let declared_frames = input
            .stream(stream_index)
            .map(|s| s.frames())
            .unwrap_or(0);
        let total_frames = if declared_frames > 0 {
            declared_frames as u64
        } else {
            (duration * fps).round().max(0.0) as u64
        };

        let has_audio = input.streams().best(ffmpeg::media::Type::Audio).is_some();
        let codec = decoder.id().name().to_string();
        let format = Self::detect_format(input_path)?;

        log::debug!(
            "Probed '{}': {}x{} @ {:.2} fps, {:.2}s, ~{} frames, audio={}",
            input_path.display(),
            width,
            height,
            fps,
            duration,
            total_frames,
            has_audio
        );

        Ok(VideoMetadata {
            duration,
            width,
            height,
            fps,
            total_frames,
            format,
            codec,
            has_audio,
        })
    }

    async fn decode_frames(&self, input_path: &Path) -> Result<FrameStream> {
        let mut input = ffmpeg::format::input(input_path).map_err(|e| {
            WmRemovalError::unreadable_media(format!(
                "failed to open '{}': {}",
                input_path.display(),
                e
            ))
        })?;

        let video_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| {
                WmRemovalError::empty_media(format!(
                    "no video stream in '{}'",
                    input_path.display()
                ))
            })?;
        let stream_index = video_stream.index();
        let time_base = video_stream.time_base();
        let fallback_fps = f64::from(video_stream.avg_frame_rate());

        let codec_context =
            ffmpeg::codec::context::Context::from_parameters(video_stream.parameters()).map_err(
                |e| {
                    WmRemovalError::unreadable_media(format!(
                        "failed to create codec context: {}",
                        e
                    ))
                },
            )?;
        let mut decoder = codec_context.decoder().video().map_err(|e| {
            WmRemovalError::unreadable_media(format!("failed to open video decoder: {}", e))
        })?;

        let (tx, rx) = tokio::sync::mpsc::channel(32);

        tokio::task::spawn_blocking(move || {
            let mut index = 0u64;

            let drain =
                |decoder: &mut ffmpeg::decoder::Video, index: &mut u64| -> std::ops::ControlFlow<()> {
                    let mut decoded = ffmpeg::util::frame::video::Video::empty();
                    while decoder.receive_frame(&mut decoded).is_ok() {
                        match Self::convert_frame(&decoded, *index, time_base, fallback_fps) {
                            Ok(frame) => {
                                if tx.blocking_send(Ok(frame)).is_err() {
                                    // Receiver dropped, stop decoding
                                    return std::ops::ControlFlow::Break(());
                                }
                                *index += 1;
                            },
                            Err(e) => {
                                log::error!("Failed to convert frame {}: {}", index, e);
                                let _ = tx.blocking_send(Err(e));
                                return std::ops::ControlFlow::Break(());
                            },
                        }
                    }
                    std::ops::ControlFlow::Continue(())
                };

            for (stream, packet) in input.packets() {
                if stream.index() != stream_index {
                    continue;
                }
                if let Err(e) = decoder.send_packet(&packet) {
                    log::warn!("Decoder rejected packet at frame {}: {}", index, e);
                    continue;
                }
                if drain(&mut decoder, &mut index).is_break() {
                    return;
                }
            }

            decoder.send_eof().ok();
            if drain(&mut decoder, &mut index).is_break() {
                return;
            }

            if index == 0 {
                let _ = tx.blocking_send(Err(WmRemovalError::empty_media(
                    "container produced no decodable frames",
                )));
            }
            log::debug!("Decoded {} frames", index);
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn open_encoder(
        &self,
        output_path: &Path,
        settings: &EncodeSettings,
    ) -> Result<Box<dyn FrameSink>> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WmRemovalError::file_io_error("create output directory", parent, e))?;
        }

        let mux_audio = settings.audio_source.is_some() && settings.format != VideoFormat::Gif;
        let mut cmd = Command::new(&self.encoder_binary);
        cmd.args(Self::encoder_args(output_path, settings))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // A sink dropped on cancellation must not leave the encoder running
            .kill_on_drop(true);

        log::info!(
            "Starting {} encoder: {}x{} @ {:.2} fps, crf {}, audio mux: {}",
            settings.format.extension(),
            settings.width,
            settings.height,
            settings.fps,
            settings.crf,
            mux_audio
        );

        let mut child = cmd.spawn().map_err(|e| {
            WmRemovalError::pipeline(
                PipelineStage::Encode,
                format!("failed to spawn ffmpeg encoder: {}", e),
            )
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            WmRemovalError::pipeline(PipelineStage::Encode, "encoder stdin not captured")
        })?;

        Ok(Box::new(FfmpegFrameSink {
            child,
            stdin: Some(stdin),
            frame_bytes: (settings.width * settings.height * 3) as usize,
            frames_written: 0,
            mux_audio,
        }))
    }

    fn supported_formats(&self) -> &[VideoFormat] {
        &[
            VideoFormat::Mp4,
            VideoFormat::Avi,
            VideoFormat::Mov,
            VideoFormat::Mkv,
            VideoFormat::WebM,
            VideoFormat::Gif,
        ]
    }
}

/// Frame sink feeding raw RGB into a running `ffmpeg` process
struct FfmpegFrameSink {
    child: Child,
    stdin: Option<ChildStdin>,
    frame_bytes: usize,
    frames_written: u64,
    /// Whether the encode pass also copies an audio stream
    mux_audio: bool,
}

/// Stage to report for an encoder exit failure
///
/// Encode and audio mux share one ffmpeg pass; when the pass copies audio
/// and the stderr points at the audio input, the failure belongs to the
/// mux stage rather than the video encode.
fn encoder_failure_stage(mux_audio: bool, stderr: &str) -> PipelineStage {
    if mux_audio {
        let lowered = stderr.to_lowercase();
        if lowered.contains("audio") || stderr.contains("#1") {
            return PipelineStage::Mux;
        }
    }
    PipelineStage::Encode
}

#[async_trait]
impl FrameSink for FfmpegFrameSink {
    async fn write_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        if frame.byte_len() != self.frame_bytes {
            return Err(WmRemovalError::pipeline_at_frame(
                PipelineStage::Encode,
                frame.index,
                format!(
                    "frame size {} does not match encoder frame size {}",
                    frame.byte_len(),
                    self.frame_bytes
                ),
            ));
        }

        let stdin = self.stdin.as_mut().ok_or_else(|| {
            WmRemovalError::pipeline(PipelineStage::Encode, "encoder already finalized")
        })?;

        stdin.write_all(frame.as_raw()).await.map_err(|e| {
            WmRemovalError::pipeline_at_frame(
                PipelineStage::Encode,
                frame.index,
                format!("failed to write frame to encoder: {}", e),
            )
        })?;
        self.frames_written += 1;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        // Closing stdin signals EOF to the encoder
        drop(self.stdin.take());

        let output = self.child.wait_with_output().await.map_err(|e| {
            WmRemovalError::pipeline(
                PipelineStage::Encode,
                format!("failed to wait for encoder: {}", e),
            )
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WmRemovalError::pipeline(
                encoder_failure_stage(self.mux_audio, &stderr),
                format!(
                    "encoder exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
            ));
        }

        log::info!("Encoder finished after {} frames", self.frames_written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(
            FfmpegVideoBackend::detect_format(Path::new("clip.mp4")).unwrap(),
            VideoFormat::Mp4
        );
        assert_eq!(
            FfmpegVideoBackend::detect_format(Path::new("a/b/clip.WEBM")).unwrap(),
            VideoFormat::WebM
        );
        assert!(FfmpegVideoBackend::detect_format(Path::new("track.wav")).is_err());
        assert!(FfmpegVideoBackend::detect_format(Path::new("noext")).is_err());
    }

    #[tokio::test]
    async fn test_sink_rejects_mismatched_frame() {
        let backend = FfmpegVideoBackend::with_encoder_binary("ffmpeg");
        // The sink validates size before touching the process pipe, so a
        // wrong-size frame errors even if the binary is unavailable.
        let mut sink = FfmpegFrameSink {
            child: Command::new("true")
                .stdin(Stdio::null())
                .spawn()
                .expect("spawn"),
            stdin: None,
            frame_bytes: 64 * 48 * 3,
            frames_written: 0,
            mux_audio: false,
        };
        let frame = VideoFrame::new(image::RgbImage::new(10, 10), 0, Duration::ZERO);
        let err = sink.write_frame(&frame).await.unwrap_err();
        assert_eq!(err.pipeline_stage(), Some(PipelineStage::Encode));
        drop(backend);
    }

    fn settings(format: VideoFormat, audio: bool) -> EncodeSettings {
        EncodeSettings {
            fps: 30.0,
            width: 320,
            height: 240,
            crf: 23,
            preset: "medium".to_string(),
            format,
            audio_source: audio.then(|| std::path::PathBuf::from("/tmp/src.mp4")),
        }
    }

    fn args_for(format: VideoFormat, audio: bool) -> Vec<String> {
        FfmpegVideoBackend::encoder_args(Path::new("/tmp/out"), &settings(format, audio))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_encoder_args_use_x264_for_mp4() {
        let args = args_for(VideoFormat::Mp4, false);
        let codec = args.iter().position(|a| a == "-c:v").unwrap();
        assert_eq!(args[codec + 1], "libx264");
        assert!(args.contains(&"yuv420p".to_string()));
        assert!(!args.contains(&"-map".to_string()));
    }

    #[test]
    fn test_encoder_args_use_vp9_for_webm() {
        // The webm muxer rejects h264 streams
        let args = args_for(VideoFormat::WebM, false);
        let codec = args.iter().position(|a| a == "-c:v").unwrap();
        assert_eq!(args[codec + 1], "libvpx-vp9");
        assert!(!args.contains(&"libx264".to_string()));
        assert!(!args.contains(&"-preset".to_string()));
    }

    #[test]
    fn test_encoder_args_use_palette_chain_for_gif() {
        // The gif muxer only takes the gif codec, via palettegen/paletteuse
        let args = args_for(VideoFormat::Gif, false);
        assert!(!args.contains(&"-c:v".to_string()));
        assert!(args.iter().any(|a| a.contains("paletteuse")));
    }

    #[test]
    fn test_encoder_args_mux_audio_from_second_input() {
        let args = args_for(VideoFormat::Mp4, true);
        assert!(args.contains(&"/tmp/src.mp4".to_string()));
        let map = args.iter().position(|a| a == "-map").unwrap();
        assert_eq!(args[map + 1], "0:v:0");
        assert!(args.contains(&"copy".to_string()));
    }

    #[test]
    fn test_encoder_args_skip_audio_for_gif() {
        // GIF has no audio stream; a stray audio source must not map one
        let args = args_for(VideoFormat::Gif, true);
        assert!(!args.contains(&"-map".to_string()));
        assert!(!args.contains(&"/tmp/src.mp4".to_string()));
    }

    #[test]
    fn test_encoder_failure_stage_classification() {
        let audio_stderr = "Error: could not copy Stream #1:0 (aac) into the output";
        assert_eq!(
            encoder_failure_stage(true, audio_stderr),
            PipelineStage::Mux
        );
        // The same stderr without an audio pass is an encode failure
        assert_eq!(
            encoder_failure_stage(false, audio_stderr),
            PipelineStage::Encode
        );
        assert_eq!(
            encoder_failure_stage(true, "Invalid frame dimensions 0x0"),
            PipelineStage::Encode
        );
    }
}
