//! Service-level tests: the upload/select/process/download lifecycle

use wmremove::backends::test_utils::{MockInferenceEngine, MockVideoBackend};
use wmremove::{
    NoOpProgressReporter, Region, RemovalConfig, SessionId, SessionState, WatermarkRemover,
    WmRemovalError,
};

use std::sync::Arc;
use std::time::Duration;

async fn service(dir: &std::path::Path, backend: MockVideoBackend) -> WatermarkRemover {
    let config = RemovalConfig::builder()
        .upload_dir(dir.join("uploads"))
        .output_dir(dir.join("outputs"))
        .max_upload_bytes(1024 * 1024)
        .build()
        .unwrap();
    WatermarkRemover::with_components(
        config,
        Arc::new(backend),
        Arc::new(MockInferenceEngine::new()),
        Arc::new(NoOpProgressReporter),
    )
    .await
    .unwrap()
}

/// Poll until the session leaves `processing` or the deadline passes
async fn wait_for_terminal_state(
    remover: &WatermarkRemover,
    id: SessionId,
) -> wmremove::SessionStatus {
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let status = remover.session_status(id).unwrap();
        if matches!(status.state, SessionState::Completed | SessionState::Failed) {
            return status;
        }
    }
    panic!("session did not reach a terminal state");
}

#[tokio::test]
async fn full_lifecycle_reaches_download() {
    let dir = tempfile::tempdir().unwrap();
    let remover = service(dir.path(), MockVideoBackend::with_frames(10, 320, 240)).await;

    let receipt = remover.upload("clip.mp4", b"fake video bytes").await.unwrap();
    assert_eq!(receipt.width, 320);
    assert_eq!(receipt.height, 240);
    assert_eq!(receipt.total_frames, 10);

    let status = remover
        .select_region(receipt.session_id, Region::new(10, 10, 50, 50))
        .unwrap();
    assert_eq!(status.state, SessionState::RegionSelected);

    remover.start_processing(receipt.session_id).unwrap();
    let status = wait_for_terminal_state(&remover, receipt.session_id).await;
    assert_eq!(status.state, SessionState::Completed);
    assert_eq!(status.progress, 1.0);
    assert!(status.download_ready);

    let (path, name) = remover.download_path(receipt.session_id).unwrap();
    assert!(path.exists());
    assert!(path
        .to_string_lossy()
        .contains(&format!("{}_processed", receipt.session_id)));
    assert_eq!(name, "processed_clip.mp4");

    // Teardown removes everything the session owned
    remover.destroy_session(receipt.session_id).await;
    assert!(!path.exists());
    assert!(matches!(
        remover.session_status(receipt.session_id),
        Err(WmRemovalError::SessionNotFound(_))
    ));

    // Destroying again is a no-op
    remover.destroy_session(receipt.session_id).await;
}

#[tokio::test]
async fn upload_rejects_disallowed_extension() {
    let dir = tempfile::tempdir().unwrap();
    let remover = service(dir.path(), MockVideoBackend::with_frames(10, 320, 240)).await;

    let err = remover.upload("song.wav", b"audio").await.unwrap_err();
    assert!(matches!(err, WmRemovalError::UnsupportedFormat(_)));
    assert!(remover.list_sessions().is_empty());
}

#[tokio::test]
async fn upload_rejects_zero_byte_file() {
    let dir = tempfile::tempdir().unwrap();
    let remover = service(dir.path(), MockVideoBackend::with_frames(10, 320, 240)).await;

    let err = remover.upload("empty.mp4", b"").await.unwrap_err();
    assert!(matches!(err, WmRemovalError::EmptyMedia(_)));
    assert!(remover.list_sessions().is_empty());

    // The rejected upload left nothing behind
    let mut entries = tokio::fs::read_dir(dir.path().join("uploads")).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn upload_rejects_oversize_payload() {
    let dir = tempfile::tempdir().unwrap();
    let config = RemovalConfig::builder()
        .upload_dir(dir.path().join("uploads"))
        .output_dir(dir.path().join("outputs"))
        .max_upload_bytes(16)
        .build()
        .unwrap();
    let remover = WatermarkRemover::with_components(
        config,
        Arc::new(MockVideoBackend::with_frames(10, 320, 240)),
        Arc::new(MockInferenceEngine::new()),
        Arc::new(NoOpProgressReporter),
    )
    .await
    .unwrap();

    let err = remover
        .upload("big.mp4", &vec![0u8; 64])
        .await
        .unwrap_err();
    assert!(matches!(err, WmRemovalError::ResourceExhausted(_)));
}

#[tokio::test]
async fn out_of_bounds_region_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let remover = service(dir.path(), MockVideoBackend::with_frames(10, 320, 240)).await;
    let receipt = remover.upload("clip.mp4", b"fake video bytes").await.unwrap();

    // x + width = 350 > 320
    let err = remover
        .select_region(receipt.session_id, Region::new(300, 10, 50, 50))
        .unwrap_err();
    assert!(matches!(err, WmRemovalError::InvalidRegion(_)));

    // The session is still usable with a valid region
    let status = remover
        .select_region(receipt.session_id, Region::new(10, 10, 50, 50))
        .unwrap();
    assert_eq!(status.state, SessionState::RegionSelected);
}

#[tokio::test]
async fn region_is_immutable_once_attached() {
    let dir = tempfile::tempdir().unwrap();
    let remover = service(dir.path(), MockVideoBackend::with_frames(10, 320, 240)).await;
    let receipt = remover.upload("clip.mp4", b"fake video bytes").await.unwrap();

    remover
        .select_region(receipt.session_id, Region::new(10, 10, 50, 50))
        .unwrap();
    let err = remover
        .select_region(receipt.session_id, Region::new(20, 20, 30, 30))
        .unwrap_err();
    assert!(matches!(err, WmRemovalError::InvalidRegion(_)));
}

#[tokio::test]
async fn processing_requires_region_selection() {
    let dir = tempfile::tempdir().unwrap();
    let remover = service(dir.path(), MockVideoBackend::with_frames(10, 320, 240)).await;
    let receipt = remover.upload("clip.mp4", b"fake video bytes").await.unwrap();

    let err = remover.start_processing(receipt.session_id).unwrap_err();
    assert!(matches!(err, WmRemovalError::InvalidRegion(_)));
}

#[tokio::test]
async fn second_start_processing_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = RemovalConfig::builder()
        .upload_dir(dir.path().join("uploads"))
        .output_dir(dir.path().join("outputs"))
        .build()
        .unwrap();
    let remover = WatermarkRemover::with_components(
        config,
        Arc::new(MockVideoBackend::with_frames(30, 320, 240)),
        Arc::new(MockInferenceEngine::new().with_latency(Duration::from_millis(10))),
        Arc::new(NoOpProgressReporter),
    )
    .await
    .unwrap();

    let receipt = remover.upload("clip.mp4", b"fake video bytes").await.unwrap();
    remover
        .select_region(receipt.session_id, Region::new(10, 10, 50, 50))
        .unwrap();

    // The first call claims the session before its task is spawned, so the
    // second cannot start a duplicate run over the same output path
    remover.start_processing(receipt.session_id).unwrap();
    let err = remover.start_processing(receipt.session_id).unwrap_err();
    assert!(matches!(err, WmRemovalError::Internal(_)));

    let status = wait_for_terminal_state(&remover, receipt.session_id).await;
    assert_eq!(status.state, SessionState::Completed);
}

#[tokio::test]
async fn failed_run_is_reported_with_stage_detail() {
    let dir = tempfile::tempdir().unwrap();
    let config = RemovalConfig::builder()
        .upload_dir(dir.path().join("uploads"))
        .output_dir(dir.path().join("outputs"))
        .build()
        .unwrap();
    let remover = WatermarkRemover::with_components(
        config,
        Arc::new(MockVideoBackend::with_frames(10, 320, 240)),
        Arc::new(MockInferenceEngine::failing_at(4)),
        Arc::new(NoOpProgressReporter),
    )
    .await
    .unwrap();

    let receipt = remover.upload("clip.mp4", b"fake video bytes").await.unwrap();
    remover
        .select_region(receipt.session_id, Region::new(10, 10, 50, 50))
        .unwrap();
    remover.start_processing(receipt.session_id).unwrap();

    let status = wait_for_terminal_state(&remover, receipt.session_id).await;
    assert_eq!(status.state, SessionState::Failed);
    let detail = status.error.unwrap();
    assert!(detail.contains("inference"));
    assert!(detail.contains("frame 4"));

    // No download and no orphaned output
    assert!(remover.download_path(receipt.session_id).is_err());
    let mut entries = tokio::fs::read_dir(dir.path().join("outputs")).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn download_is_unavailable_before_completion() {
    let dir = tempfile::tempdir().unwrap();
    let remover = service(dir.path(), MockVideoBackend::with_frames(10, 320, 240)).await;
    let receipt = remover.upload("clip.mp4", b"fake video bytes").await.unwrap();

    assert!(remover.download_path(receipt.session_id).is_err());
}

#[tokio::test]
async fn unknown_session_operations_fail_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let remover = service(dir.path(), MockVideoBackend::with_frames(10, 320, 240)).await;
    let id = SessionId::new();

    assert!(matches!(
        remover.session_status(id),
        Err(WmRemovalError::SessionNotFound(_))
    ));
    assert!(matches!(
        remover.select_region(id, Region::new(0, 0, 10, 10)),
        Err(WmRemovalError::SessionNotFound(_))
    ));
    assert!(matches!(
        remover.start_processing(id),
        Err(WmRemovalError::SessionNotFound(_))
    ));
    // Destroying an unknown session is a no-op
    remover.destroy_session(id).await;
}
