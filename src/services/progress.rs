//! Progress reporting for pipeline runs
//!
//! The pipeline records progress on the session itself for pollers; a
//! [`ProgressReporter`] additionally receives push updates, which is what a
//! CLI progress bar or a server-sent-events layer hooks into.

use crate::session::SessionId;
use serde::{Deserialize, Serialize};

/// One per-frame progress update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Session the update belongs to
    pub session_id: SessionId,
    /// Index of the frame just processed
    pub frame_index: u64,
    /// Best-known total frame count
    pub total_frames: u64,
    /// Fraction of frames processed, in [0, 1]
    pub fraction: f64,
}

impl ProgressUpdate {
    /// Percentage form of the fraction
    #[must_use]
    pub fn percent(&self) -> f64 {
        self.fraction * 100.0
    }
}

/// Receiver of push progress updates
pub trait ProgressReporter: Send + Sync {
    /// Called after each processed frame and once on completion
    fn report(&self, update: &ProgressUpdate);
}

/// Reporter that logs progress at a coarse interval
pub struct ConsoleProgressReporter {
    /// Log every n-th frame to keep output readable
    log_every: u64,
}

impl ConsoleProgressReporter {
    #[must_use]
    pub fn new() -> Self {
        Self { log_every: 30 }
    }

    #[must_use]
    pub fn with_interval(log_every: u64) -> Self {
        Self {
            log_every: log_every.max(1),
        }
    }
}

impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report(&self, update: &ProgressUpdate) {
        let is_last = update.frame_index + 1 >= update.total_frames;
        if update.frame_index % self.log_every == 0 || is_last {
            log::info!(
                "Session {}: frame {}/{} ({:.1}%)",
                update.session_id,
                update.frame_index + 1,
                update.total_frames,
                update.percent()
            );
        }
    }
}

/// Reporter that discards updates
#[derive(Debug, Default)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report(&self, _update: &ProgressUpdate) {}
}
