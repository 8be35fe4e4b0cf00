//! Video processing pipeline
//!
//! Drives one session from decoded source frames to the finished output
//! container: decode, per-frame repair, encode, audio mux. Progress lands on
//! the session after every frame; cancellation is observed between frames;
//! every failure path deletes the partial output before surfacing the error.

use crate::{
    config::RemovalConfig,
    error::{PipelineStage, Result, WmRemovalError},
    inference::InferenceEngine,
    services::progress::{ProgressReporter, ProgressUpdate},
    session::{SessionId, SessionState, SessionStore},
    video::{EncodeSettings, VideoBackend},
};

use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Outcome of a pipeline run that did not error
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Output written and session marked `completed`
    Completed,
    /// Session destroyed mid-run; partial output deleted
    Cancelled,
}

/// Orchestrator for per-session processing runs
pub struct VideoPipeline {
    backend: Arc<dyn VideoBackend>,
    engine: Arc<dyn InferenceEngine>,
    store: SessionStore,
    reporter: Arc<dyn ProgressReporter>,
    /// Bounds concurrent runs against the shared inference engine
    gate: Arc<Semaphore>,
    config: RemovalConfig,
}

impl VideoPipeline {
    /// Create a pipeline over the given backend and engine
    #[must_use]
    pub fn new(
        backend: Arc<dyn VideoBackend>,
        engine: Arc<dyn InferenceEngine>,
        store: SessionStore,
        reporter: Arc<dyn ProgressReporter>,
        config: RemovalConfig,
    ) -> Self {
        let gate = Arc::new(Semaphore::new(config.max_concurrent_pipelines));
        Self {
            backend,
            engine,
            store,
            reporter,
            gate,
            config,
        }
    }

    /// Process a session's source video into `output_path`
    ///
    /// Blocks on the concurrency gate until a slot for the inference engine
    /// is free. On success the session is `completed` with progress 1.0; on
    /// error it is `failed` with the stage and frame recorded, and no output
    /// file remains on disk.
    #[tracing::instrument(skip(self, output_path), fields(session = %id))]
    pub async fn process(&self, id: SessionId, output_path: PathBuf) -> Result<RunOutcome> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| WmRemovalError::internal("pipeline gate closed"))?;

        let token = self.store.cancellation_token(id)?;
        match self.run(id, &output_path, &token).await {
            Ok(RunOutcome::Completed) => {
                if self.store.mark_completed(id, output_path.clone()).is_err() {
                    // Session destroyed while the encoder was finishing
                    remove_if_present(&output_path).await;
                    return Ok(RunOutcome::Cancelled);
                }
                tracing::info!("Session {} completed", id);
                Ok(RunOutcome::Completed)
            },
            Ok(RunOutcome::Cancelled) => {
                remove_if_present(&output_path).await;
                tracing::info!("Session {} cancelled during processing", id);
                Ok(RunOutcome::Cancelled)
            },
            Err(error) => {
                remove_if_present(&output_path).await;
                // The session may already be gone if destroy raced the failure
                let _ = self.store.mark_failed(id, &error);
                tracing::warn!("Session {} failed: {}", id, error);
                Err(error)
            },
        }
    }

    async fn run(
        &self,
        id: SessionId,
        output_path: &Path,
        token: &CancellationToken,
    ) -> Result<RunOutcome> {
        let session = self.store.get(id)?;
        let region = session
            .region
            .ok_or_else(|| WmRemovalError::invalid_region("no region selected for session"))?;

        // `start_processing` claims the session before spawning; a direct
        // caller still holding `region_selected` claims it here
        self.store.try_update(id, |s| match s.state {
            SessionState::RegionSelected | SessionState::Processing => {
                s.state = SessionState::Processing;
                Ok(())
            },
            other => Err(WmRemovalError::internal(format!(
                "session {id} cannot be processed in state {other:?}"
            ))),
        })?;

        // The region is fixed and every frame shares the source dimensions,
        // so one mask serves the whole run
        let mask = region.to_mask();
        let metadata = &session.metadata;

        let mut frames = self.backend.decode_frames(&session.source_path).await?;

        let settings = EncodeSettings {
            fps: metadata.fps,
            width: metadata.width,
            height: metadata.height,
            crf: self.config.encoder_crf,
            preset: self.config.encoder_preset.clone(),
            format: metadata.format,
            audio_source: (self.config.preserve_audio && metadata.has_audio)
                .then(|| session.source_path.clone()),
        };
        let mut sink = self.backend.open_encoder(output_path, &settings).await?;

        let estimated_total = metadata.total_frames.max(1);
        let mut processed = 0u64;

        while let Some(frame_result) = frames.next().await {
            // Cancellation checkpoint: between frames, never mid-frame
            if token.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }

            let frame = frame_result.map_err(|e| match e {
                e @ WmRemovalError::Pipeline { .. } => e,
                other => {
                    WmRemovalError::pipeline_at_frame(
                        PipelineStage::Decode,
                        processed,
                        other.to_string(),
                    )
                },
            })?;
            let frame_index = frame.index;

            let repaired = self.engine.repair(&frame, &mask).await.map_err(|e| {
                WmRemovalError::pipeline_at_frame(
                    PipelineStage::Inference,
                    frame_index,
                    e.to_string(),
                )
            })?;

            sink.write_frame(&repaired).await?;
            processed += 1;

            // The probe count is an estimate; never report a fraction past
            // what an over-long stream would make true
            let total = estimated_total.max(processed);
            let fraction = processed as f64 / total as f64;
            if self.store.set_progress(id, fraction).is_err() {
                // Session destroyed while this frame was in flight
                return Ok(RunOutcome::Cancelled);
            }
            self.reporter.report(&ProgressUpdate {
                session_id: id,
                frame_index,
                total_frames: total,
                fraction,
            });
        }

        if processed == 0 {
            return Err(WmRemovalError::pipeline(
                PipelineStage::Decode,
                "source produced no frames",
            ));
        }

        if token.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        // Decoding finished cleanly: the decoded count is now authoritative
        if self.store.set_progress(id, 1.0).is_err() {
            return Ok(RunOutcome::Cancelled);
        }
        tracing::debug!(
            "Session {}: {} frames repaired (probe estimated {})",
            id,
            processed,
            estimated_total
        );

        // Finalize the container; audio mux happens in the same pass
        sink.finish().await?;

        Ok(RunOutcome::Completed)
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("Removed partial output '{}'", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => log::warn!("Failed to remove '{}': {}", path.display(), e),
    }
}
