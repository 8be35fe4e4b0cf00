//! Session-based video watermark removal
//!
//! `wmremove` removes a user-selected rectangular watermark region from
//! every frame of an uploaded video by running each frame through an
//! inpainting model, then reassembles the repaired frames into a new
//! container with the original audio track.
//!
//! The crate is organized around a small set of components:
//!
//! - [`MediaProbe`] validates an upload and extracts metadata plus a preview
//!   frame for region selection
//! - [`Region`] validation produces the binary mask the inference engine
//!   repaints
//! - [`InferenceEngine`] is the seam in front of the model: ONNX Runtime in
//!   production, a pure-Rust diffusion fill as the model-free fallback
//! - [`VideoPipeline`] orchestrates decode, per-frame repair, encode, and
//!   audio mux with per-frame progress and between-frame cancellation
//! - [`SessionStore`] tracks each upload from ingestion to download and
//!   tears down every file a session owns
//!
//! [`WatermarkRemover`] ties these together behind the operations an HTTP
//! layer would call.
//!
//! ```no_run
//! use wmremove::{Region, RemovalConfig, WatermarkRemover};
//!
//! # async fn example() -> wmremove::Result<()> {
//! let config = RemovalConfig::builder()
//!     .model_path("models/lama.onnx")
//!     .build()?;
//! let remover = WatermarkRemover::new(config).await?;
//!
//! let receipt = remover.upload("clip.mp4", &std::fs::read("clip.mp4")?).await?;
//! remover.select_region(receipt.session_id, Region::new(10, 10, 50, 50))?;
//! remover.start_processing(receipt.session_id)?;
//!
//! let status = remover.session_status(receipt.session_id)?;
//! println!("progress: {:.0}%", status.progress * 100.0);
//! # Ok(())
//! # }
//! ```

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod probe;
pub mod region;
pub mod services;
pub mod session;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod video;

pub use config::{EngineType, RemovalConfig, RemovalConfigBuilder};
pub use error::{PipelineStage, Result, WmRemovalError};
pub use inference::InferenceEngine;
pub use pipeline::{RunOutcome, VideoPipeline};
pub use probe::MediaProbe;
pub use region::{Region, RegionMask, ValidatedRegion};
pub use services::{ConsoleProgressReporter, NoOpProgressReporter, ProgressReporter, SessionStorage};
pub use session::{Session, SessionId, SessionState, SessionStatus, SessionStore};
pub use video::{FfmpegVideoBackend, VideoBackend, VideoFormat, VideoFrame, VideoMetadata};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Result of a successful upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Identifier of the created session
    pub session_id: SessionId,
    /// Filename as uploaded
    pub filename: String,
    /// Duration in seconds
    pub duration: f64,
    /// Frame rate
    pub fps: f64,
    /// Source resolution
    pub width: u32,
    /// Source resolution
    pub height: u32,
    /// Estimated frame count
    pub total_frames: u64,
    /// Whether the source carries audio
    pub has_audio: bool,
    /// Preview frame image on disk
    pub preview_path: PathBuf,
}

/// High-level watermark removal service
///
/// Holds the session registry, the storage layout, and one shared inference
/// engine; the engine's model weights load once at construction and are
/// reused by every pipeline run.
pub struct WatermarkRemover {
    config: RemovalConfig,
    store: SessionStore,
    storage: SessionStorage,
    probe: MediaProbe,
    pipeline: Arc<VideoPipeline>,
}

impl WatermarkRemover {
    /// Create the service with the FFmpeg backend and the configured engine
    ///
    /// # Errors
    ///
    /// Fails when the storage directories cannot be created, the `ffmpeg`
    /// binary is missing, or the inference engine cannot initialize.
    pub async fn new(config: RemovalConfig) -> Result<Self> {
        let backend: Arc<dyn VideoBackend> = Arc::new(FfmpegVideoBackend::new()?);
        let engine: Arc<dyn InferenceEngine> = backends::create_engine(&config).await?.into();
        let reporter: Arc<dyn ProgressReporter> = Arc::new(ConsoleProgressReporter::new());
        Self::with_components(config, backend, engine, reporter).await
    }

    /// Create the service from explicit components
    ///
    /// This is the seam tests use to substitute mock backends and engines.
    pub async fn with_components(
        config: RemovalConfig,
        backend: Arc<dyn VideoBackend>,
        engine: Arc<dyn InferenceEngine>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Self> {
        let storage = SessionStorage::new(&config).await?;
        let store = SessionStore::new();
        let pipeline = Arc::new(VideoPipeline::new(
            Arc::clone(&backend),
            engine,
            store.clone(),
            reporter,
            config.clone(),
        ));

        Ok(Self {
            config,
            store,
            storage,
            probe: MediaProbe::new(backend),
            pipeline,
        })
    }

    /// Ingest an upload, probe it, and create its session
    ///
    /// # Errors
    ///
    /// - `UnsupportedFormat` / `ResourceExhausted` from ingestion
    /// - `UnreadableMedia` / `EmptyMedia` from probing; the saved file is
    ///   removed before the error surfaces
    #[tracing::instrument(skip(self, bytes), fields(filename = %filename, size = bytes.len()))]
    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<UploadReceipt> {
        let id = SessionId::new();
        let source_path = self.storage.ingest_upload(id, filename, bytes).await?;

        let preview_path = self.storage.preview_path(id);
        let probed = async {
            let metadata = self.probe.probe(&source_path).await?;
            self.probe.save_preview(&source_path, &preview_path).await?;
            Ok::<_, WmRemovalError>(metadata)
        }
        .await;

        let metadata = match probed {
            Ok(metadata) => metadata,
            Err(e) => {
                // A rejected upload must not leave files behind
                let _ = tokio::fs::remove_file(&source_path).await;
                let _ = tokio::fs::remove_file(&preview_path).await;
                return Err(e);
            },
        };

        let session = Session::new(
            id,
            filename.to_string(),
            source_path,
            preview_path.clone(),
            metadata.clone(),
        );
        self.store.insert(session);

        Ok(UploadReceipt {
            session_id: id,
            filename: filename.to_string(),
            duration: metadata.duration,
            fps: metadata.fps,
            width: metadata.width,
            height: metadata.height,
            total_frames: metadata.total_frames,
            has_audio: metadata.has_audio,
            preview_path,
        })
    }

    /// Validate and attach the watermark region to a session
    ///
    /// # Errors
    ///
    /// - `InvalidRegion` when the rectangle violates the frame bounds or the
    ///   session already has a region attached
    /// - `SessionNotFound` for unknown sessions
    pub fn select_region(&self, id: SessionId, region: Region) -> Result<SessionStatus> {
        let session = self.store.get(id)?;
        if session.state != SessionState::Uploaded {
            return Err(WmRemovalError::invalid_region(format!(
                "session {} is not awaiting region selection",
                id
            )));
        }

        let validated = region.validate(session.metadata.width, session.metadata.height)?;
        let updated = self.store.update(id, |s| {
            s.region = Some(validated);
            s.state = SessionState::RegionSelected;
        })?;
        log::info!(
            "Session {}: region ({}, {}) {}x{} selected",
            id,
            validated.x,
            validated.y,
            validated.width,
            validated.height
        );
        Ok(updated.status())
    }

    /// Spawn the processing task for a session
    ///
    /// Returns as soon as the task is scheduled; callers poll
    /// [`session_status`](Self::session_status) for progress. The task waits
    /// on the concurrency gate when other sessions are processing.
    ///
    /// # Errors
    ///
    /// - `InvalidRegion` when no region has been selected
    /// - an internal error when the session is already processing or done;
    ///   the claim is atomic, so concurrent calls spawn at most one run
    pub fn start_processing(&self, id: SessionId) -> Result<()> {
        let session = self.store.begin_processing(id)?;

        let extension = session.metadata.format.extension();
        let output_path = self.storage.output_path(id, extension);
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            // Failures are recorded on the session; nothing to do here
            let _ = pipeline.process(id, output_path).await;
        });
        Ok(())
    }

    /// Poll-visible snapshot of a session
    pub fn session_status(&self, id: SessionId) -> Result<SessionStatus> {
        Ok(self.store.get(id)?.status())
    }

    /// Full session record
    pub fn session(&self, id: SessionId) -> Result<Session> {
        self.store.get(id)
    }

    /// Snapshots of every live session
    #[must_use]
    pub fn list_sessions(&self) -> Vec<SessionStatus> {
        self.store.list()
    }

    /// Output file path and suggested download name for a completed session
    ///
    /// # Errors
    ///
    /// Returns an internal error while the session has not completed.
    pub fn download_path(&self, id: SessionId) -> Result<(PathBuf, String)> {
        let session = self.store.get(id)?;
        match (session.state, session.output_path) {
            (SessionState::Completed, Some(path)) => {
                Ok((path, format!("processed_{}", session.original_filename)))
            },
            _ => Err(WmRemovalError::internal(format!(
                "session {} has no output ready for download",
                id
            ))),
        }
    }

    /// Destroy a session, cancelling its pipeline and deleting its files
    pub async fn destroy_session(&self, id: SessionId) {
        self.store.destroy(id).await;
    }

    /// Reap sessions idle longer than the configured window
    pub async fn reap_stale_sessions(&self) -> Vec<SessionId> {
        self.store.reap_stale(self.config.stale_session_ttl).await
    }

    /// The underlying session store
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }
}
