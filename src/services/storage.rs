//! Session file storage
//!
//! Two directories back the service: one for uploaded sources, one for
//! produced outputs, both keyed by session id. Ingestion enforces the
//! extension allow-list and the size cap before any probing happens.

use crate::{
    config::RemovalConfig,
    error::{Result, WmRemovalError},
    session::SessionId,
};

use std::path::{Path, PathBuf};

/// Filesystem layout for session-owned files
#[derive(Debug, Clone)]
pub struct SessionStorage {
    upload_dir: PathBuf,
    output_dir: PathBuf,
    allowed_extensions: Vec<String>,
    max_upload_bytes: u64,
}

impl SessionStorage {
    /// Create the storage layout, ensuring both directories exist
    pub async fn new(config: &RemovalConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.upload_dir)
            .await
            .map_err(|e| {
                WmRemovalError::file_io_error("create upload directory", &config.upload_dir, e)
            })?;
        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .map_err(|e| {
                WmRemovalError::file_io_error("create output directory", &config.output_dir, e)
            })?;

        Ok(Self {
            upload_dir: config.upload_dir.clone(),
            output_dir: config.output_dir.clone(),
            allowed_extensions: config.allowed_extensions.clone(),
            max_upload_bytes: config.max_upload_bytes,
        })
    }

    /// Lowercased extension of an accepted filename
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFormat` when the extension is missing or not on
    /// the allow-list.
    pub fn accepted_extension(&self, filename: &str) -> Result<String> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| {
                WmRemovalError::unsupported_format(format!("'{filename}' has no extension"))
            })?;
        if !self.allowed_extensions.contains(&ext) {
            return Err(WmRemovalError::unsupported_format(format!(
                "'.{ext}' is not an accepted video format"
            )));
        }
        Ok(ext)
    }

    /// Ingest an upload: validate the name and size, write the bytes
    ///
    /// The file lands at `{upload_dir}/{session_id}.{ext}`.
    ///
    /// # Errors
    ///
    /// - `UnsupportedFormat` for a disallowed extension
    /// - `ResourceExhausted` when the payload exceeds the size cap
    pub async fn ingest_upload(
        &self,
        id: SessionId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let ext = self.accepted_extension(filename)?;
        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(WmRemovalError::resource_exhausted(format!(
                "upload of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.max_upload_bytes
            )));
        }

        let path = self.upload_dir.join(format!("{id}.{ext}"));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| WmRemovalError::file_io_error("save upload", &path, e))?;
        log::info!("Upload '{}' saved to '{}'", filename, path.display());
        Ok(path)
    }

    /// Path of the preview frame for a session
    #[must_use]
    pub fn preview_path(&self, id: SessionId) -> PathBuf {
        self.upload_dir.join(format!("{id}_preview.jpg"))
    }

    /// Path the processed output is written to
    #[must_use]
    pub fn output_path(&self, id: SessionId, extension: &str) -> PathBuf {
        self.output_dir.join(format!("{id}_processed.{extension}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_storage(dir: &Path) -> SessionStorage {
        let config = RemovalConfig::builder()
            .upload_dir(dir.join("uploads"))
            .output_dir(dir.join("outputs"))
            .max_upload_bytes(1024)
            .build()
            .unwrap();
        SessionStorage::new(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let _storage = test_storage(dir.path()).await;
        assert!(dir.path().join("uploads").is_dir());
        assert!(dir.path().join("outputs").is_dir());
    }

    #[tokio::test]
    async fn test_ingest_valid_upload() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path()).await;
        let id = SessionId::new();

        let path = storage.ingest_upload(id, "Clip.MP4", b"data").await.unwrap();
        assert_eq!(path, dir.path().join("uploads").join(format!("{id}.mp4")));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_ingest_rejects_disallowed_extension() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        let err = storage
            .ingest_upload(SessionId::new(), "audio.wav", b"data")
            .await
            .unwrap_err();
        assert!(matches!(err, WmRemovalError::UnsupportedFormat(_)));

        let err = storage
            .ingest_upload(SessionId::new(), "noext", b"data")
            .await
            .unwrap_err();
        assert!(matches!(err, WmRemovalError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_ingest_rejects_oversize_upload() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path()).await;

        let payload = vec![0u8; 2048];
        let err = storage
            .ingest_upload(SessionId::new(), "big.mp4", &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, WmRemovalError::ResourceExhausted(_)));
    }

    #[tokio::test]
    async fn test_session_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path()).await;
        let id = SessionId::new();

        assert!(storage
            .preview_path(id)
            .ends_with(format!("{id}_preview.jpg")));
        assert!(storage
            .output_path(id, "mp4")
            .ends_with(format!("{id}_processed.mp4")));
    }
}
