//! Session registry and lifecycle
//!
//! One session tracks one uploaded video from ingestion to download. The
//! store is process-wide shared state: the processing task mutates a session
//! while pollers read it, so every access goes through one lock and a reader
//! can never observe a torn combination such as `completed` with progress
//! below 1.0. Sessions are in-memory only; in-flight work does not survive a
//! process restart.

use crate::{
    error::{Result, WmRemovalError},
    region::ValidatedRegion,
    video::VideoMetadata,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identifier from its string form
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for strings that are not valid identifiers,
    /// so callers surface the same error for malformed and unknown ids.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| WmRemovalError::session_not_found(s))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Upload ingested and probed
    Uploaded,
    /// Watermark region validated and attached
    RegionSelected,
    /// Pipeline running
    Processing,
    /// Output ready for download
    Completed,
    /// Pipeline failed; `error` carries the detail
    Failed,
}

/// One uploaded video tracked through to its processed output
#[derive(Debug, Clone)]
pub struct Session {
    /// Session identifier
    pub id: SessionId,
    /// Filename the client uploaded, used for the download name
    pub original_filename: String,
    /// Uploaded source file, owned by this session
    pub source_path: PathBuf,
    /// Preview frame image, owned by this session
    pub preview_path: PathBuf,
    /// Produced output file, set on completion
    pub output_path: Option<PathBuf>,
    /// Metadata probed from the source
    pub metadata: VideoMetadata,
    /// Selected watermark region, immutable once set
    pub region: Option<ValidatedRegion>,
    /// Lifecycle state
    pub state: SessionState,
    /// Fraction of frames processed, monotonically non-decreasing in [0, 1]
    pub progress: f64,
    /// Failure detail when `state` is `Failed`
    pub error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last state change or client interaction
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// Create a freshly uploaded session
    ///
    /// The id is allocated by the caller before ingestion so the stored
    /// files can be keyed by it.
    #[must_use]
    pub fn new(
        id: SessionId,
        original_filename: String,
        source_path: PathBuf,
        preview_path: PathBuf,
        metadata: VideoMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            original_filename,
            source_path,
            preview_path,
            output_path: None,
            metadata,
            region: None,
            state: SessionState::Uploaded,
            progress: 0.0,
            error: None,
            created_at: now,
            last_activity: now,
        }
    }

    /// Suggested filename for the downloaded output
    #[must_use]
    pub fn download_name(&self) -> String {
        format!("processed_{}", self.original_filename)
    }

    /// Files currently owned by this session
    fn owned_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.source_path.clone(), self.preview_path.clone()];
        if let Some(output) = &self.output_path {
            files.push(output.clone());
        }
        files
    }

    /// Serializable snapshot for a polling caller
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id,
            state: self.state,
            progress: self.progress,
            error: self.error.clone(),
            download_ready: self.state == SessionState::Completed,
        }
    }
}

/// Snapshot of the poll-visible session fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub state: SessionState,
    pub progress: f64,
    pub error: Option<String>,
    pub download_ready: bool,
}

struct SessionEntry {
    session: Session,
    cancel: CancellationToken,
}

/// Process-wide session registry
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
}

impl SessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a session and return its identifier
    pub fn insert(&self, session: Session) -> SessionId {
        let id = session.id;
        let entry = SessionEntry {
            session,
            cancel: CancellationToken::new(),
        };
        self.inner.write().expect("session lock").insert(id, entry);
        log::debug!("Session {} registered", id);
        id
    }

    /// Snapshot a session by id
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for unknown or destroyed sessions.
    pub fn get(&self, id: SessionId) -> Result<Session> {
        self.inner
            .read()
            .expect("session lock")
            .get(&id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| WmRemovalError::session_not_found(id.to_string()))
    }

    /// Apply a mutation to a session atomically
    ///
    /// The mutator runs under the store lock, so every field it touches
    /// becomes visible to readers in one step. Progress is re-clamped after
    /// the mutator returns: it never decreases and never exceeds 1.0.
    pub fn update<F>(&self, id: SessionId, mutator: F) -> Result<Session>
    where
        F: FnOnce(&mut Session),
    {
        self.try_update(id, |session| {
            mutator(session);
            Ok(())
        })
    }

    /// Apply a fallible mutation atomically
    ///
    /// The mutator works on a copy under the store lock; when it returns an
    /// error nothing is published, so a state check and the transition it
    /// guards cannot be separated by a concurrent writer.
    pub fn try_update<F>(&self, id: SessionId, mutator: F) -> Result<Session>
    where
        F: FnOnce(&mut Session) -> Result<()>,
    {
        let mut sessions = self.inner.write().expect("session lock");
        let entry = sessions
            .get_mut(&id)
            .ok_or_else(|| WmRemovalError::session_not_found(id.to_string()))?;

        let mut candidate = entry.session.clone();
        mutator(&mut candidate)?;
        candidate.progress = candidate.progress.max(entry.session.progress).min(1.0);
        candidate.last_activity = Utc::now();
        entry.session = candidate.clone();
        Ok(candidate)
    }

    /// Claim a session for processing
    ///
    /// The `region_selected` to `processing` transition is a compare-and-set:
    /// exactly one caller wins it, a concurrent second claim fails without
    /// spawning anything.
    pub fn begin_processing(&self, id: SessionId) -> Result<Session> {
        self.try_update(id, |session| match session.state {
            SessionState::RegionSelected => {
                session.state = SessionState::Processing;
                Ok(())
            },
            SessionState::Uploaded => Err(WmRemovalError::invalid_region(format!(
                "session {id} has no region selected"
            ))),
            other => Err(WmRemovalError::internal(format!(
                "session {id} cannot start processing in state {other:?}"
            ))),
        })
    }

    /// Record frame progress for a running session
    pub fn set_progress(&self, id: SessionId, fraction: f64) -> Result<()> {
        self.update(id, |session| {
            session.progress = fraction;
        })?;
        Ok(())
    }

    /// Transition a session to `completed` with its output path
    ///
    /// Progress is forced to exactly 1.0 in the same step.
    pub fn mark_completed(&self, id: SessionId, output_path: PathBuf) -> Result<()> {
        self.update(id, |session| {
            session.state = SessionState::Completed;
            session.progress = 1.0;
            session.output_path = Some(output_path);
            session.error = None;
        })?;
        Ok(())
    }

    /// Transition a session to `failed` with error detail
    pub fn mark_failed(&self, id: SessionId, error: &WmRemovalError) -> Result<()> {
        self.update(id, |session| {
            session.state = SessionState::Failed;
            session.error = Some(error.to_string());
        })?;
        Ok(())
    }

    /// Cancellation token observed by the session's pipeline run
    pub fn cancellation_token(&self, id: SessionId) -> Result<CancellationToken> {
        self.inner
            .read()
            .expect("session lock")
            .get(&id)
            .map(|entry| entry.cancel.clone())
            .ok_or_else(|| WmRemovalError::session_not_found(id.to_string()))
    }

    /// Destroy a session: cancel its pipeline and delete its files
    ///
    /// Idempotent: destroying an unknown or already-destroyed session is a
    /// no-op. File deletion happens after the registry entry is removed, so
    /// a concurrent lookup cannot observe a half-destroyed session.
    pub async fn destroy(&self, id: SessionId) {
        let entry = self.inner.write().expect("session lock").remove(&id);
        let Some(entry) = entry else {
            log::debug!("Destroy of unknown session {} ignored", id);
            return;
        };

        entry.cancel.cancel();
        for path in entry.session.owned_files() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => log::debug!("Removed '{}'", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => log::warn!("Failed to remove '{}': {}", path.display(), e),
            }
        }
        log::info!("Session {} destroyed", id);
    }

    /// Status snapshots of all live sessions
    #[must_use]
    pub fn list(&self) -> Vec<SessionStatus> {
        self.inner
            .read()
            .expect("session lock")
            .values()
            .map(|entry| entry.session.status())
            .collect()
    }

    /// Destroy sessions idle longer than `ttl`
    ///
    /// Running sessions are never reaped; a stuck pipeline is the caller's
    /// to cancel explicitly. Returns the ids that were destroyed.
    pub async fn reap_stale(&self, ttl: Duration) -> Vec<SessionId> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        let stale: Vec<SessionId> = {
            let sessions = self.inner.read().expect("session lock");
            sessions
                .values()
                .filter(|entry| {
                    entry.session.state != SessionState::Processing
                        && entry.session.last_activity < cutoff
                })
                .map(|entry| entry.session.id)
                .collect()
        };

        for id in &stale {
            log::info!("Reaping stale session {}", id);
            self.destroy(*id).await;
        }
        stale
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("session lock").len()
    }

    /// Whether the store holds no sessions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
