//! Pipeline behavior tests over mock backends
//!
//! These run the full decode-repair-encode orchestration without FFmpeg or
//! model weights: a synthetic frame source in, an in-memory sink out.

use wmremove::backends::test_utils::{MockInferenceEngine, MockVideoBackend};
use wmremove::services::progress::{ProgressReporter, ProgressUpdate};
use wmremove::{
    NoOpProgressReporter, PipelineStage, Region, RemovalConfig, RunOutcome, Session, SessionId,
    SessionState, SessionStore, VideoBackend, VideoFormat, VideoPipeline, WmRemovalError,
};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Reporter capturing every fraction pushed by the pipeline
#[derive(Default)]
struct RecordingReporter {
    fractions: Mutex<Vec<f64>>,
}

impl RecordingReporter {
    fn fractions(&self) -> Vec<f64> {
        self.fractions.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, update: &ProgressUpdate) {
        self.fractions.lock().unwrap().push(update.fraction);
    }
}

struct Fixture {
    backend: Arc<MockVideoBackend>,
    store: SessionStore,
    pipeline: VideoPipeline,
    session_id: SessionId,
    output_path: PathBuf,
    _dir: tempfile::TempDir,
}

/// Build a pipeline over mocks with a region-selected session
async fn fixture(
    backend: MockVideoBackend,
    engine: MockInferenceEngine,
    reporter: Arc<dyn ProgressReporter>,
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(backend);
    let store = SessionStore::new();

    let source_path = dir.path().join("source.mp4");
    let preview_path = dir.path().join("preview.jpg");
    tokio::fs::write(&source_path, b"source").await.unwrap();
    tokio::fs::write(&preview_path, b"preview").await.unwrap();

    let metadata = backend.probe(Path::new("source.mp4")).await.unwrap();
    let mut session = Session::new(
        SessionId::new(),
        "clip.mp4".to_string(),
        source_path,
        preview_path,
        metadata.clone(),
    );
    session.region = Some(
        Region::new(10, 10, 50, 50)
            .validate(metadata.width, metadata.height)
            .unwrap(),
    );
    session.state = SessionState::RegionSelected;
    let session_id = store.insert(session);

    let config = RemovalConfig::builder()
        .upload_dir(dir.path().join("uploads"))
        .output_dir(dir.path().join("outputs"))
        .build()
        .unwrap();
    let pipeline = VideoPipeline::new(
        Arc::clone(&backend) as Arc<dyn VideoBackend>,
        Arc::new(engine),
        store.clone(),
        reporter,
        config,
    );

    Fixture {
        backend,
        store,
        pipeline,
        session_id,
        output_path: dir.path().join("outputs").join("out.mp4"),
        _dir: dir,
    }
}

#[tokio::test]
async fn completes_ten_frame_video() {
    let reporter = Arc::new(RecordingReporter::default());
    let f = fixture(
        MockVideoBackend::with_frames(10, 320, 240),
        MockInferenceEngine::new(),
        Arc::clone(&reporter) as Arc<dyn ProgressReporter>,
    )
    .await;

    let outcome = f
        .pipeline
        .process(f.session_id, f.output_path.clone())
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let session = f.store.get(f.session_id).unwrap();
    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.progress, 1.0);
    assert_eq!(session.output_path.as_deref(), Some(f.output_path.as_path()));
    assert!(f.output_path.exists());

    // Every frame reached the encoder in order
    assert_eq!(f.backend.written_frames(), (0..10).collect::<Vec<_>>());
    assert!(f.backend.encoder_finished());

    // Push updates are monotone and end at exactly 1.0
    let fractions = reporter.fractions();
    assert_eq!(fractions.len(), 10);
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*fractions.last().unwrap(), 1.0);
}

#[tokio::test]
async fn inference_failure_at_frame_four_fails_session() {
    let f = fixture(
        MockVideoBackend::with_frames(10, 320, 240),
        MockInferenceEngine::failing_at(4),
        Arc::new(NoOpProgressReporter),
    )
    .await;

    let err = f
        .pipeline
        .process(f.session_id, f.output_path.clone())
        .await
        .unwrap_err();
    assert_eq!(err.pipeline_stage(), Some(PipelineStage::Inference));
    match err {
        WmRemovalError::Pipeline { frame_index, .. } => assert_eq!(frame_index, Some(4)),
        other => panic!("unexpected error: {other}"),
    }

    let session = f.store.get(f.session_id).unwrap();
    assert_eq!(session.state, SessionState::Failed);
    let detail = session.error.unwrap();
    assert!(detail.contains("inference"));
    assert!(detail.contains("frame 4"));

    // No partial output is retained
    assert!(!f.output_path.exists());
    assert_eq!(f.backend.written_frames(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn decode_failure_mid_stream_fails_session() {
    let f = fixture(
        MockVideoBackend::with_frames(10, 320, 240).decode_failing_at(6),
        MockInferenceEngine::new(),
        Arc::new(NoOpProgressReporter),
    )
    .await;

    let err = f
        .pipeline
        .process(f.session_id, f.output_path.clone())
        .await
        .unwrap_err();
    assert_eq!(err.pipeline_stage(), Some(PipelineStage::Decode));

    assert_eq!(f.store.get(f.session_id).unwrap().state, SessionState::Failed);
    assert!(!f.output_path.exists());
}

#[tokio::test]
async fn encode_failure_fails_session() {
    let f = fixture(
        MockVideoBackend::with_frames(10, 320, 240).encode_failing_at(7),
        MockInferenceEngine::new(),
        Arc::new(NoOpProgressReporter),
    )
    .await;

    let err = f
        .pipeline
        .process(f.session_id, f.output_path.clone())
        .await
        .unwrap_err();
    assert_eq!(err.pipeline_stage(), Some(PipelineStage::Encode));
    assert!(!f.output_path.exists());
}

#[tokio::test]
async fn destroy_cancels_running_pipeline() {
    let f = fixture(
        MockVideoBackend::with_frames(50, 320, 240),
        MockInferenceEngine::new().with_latency(Duration::from_millis(20)),
        Arc::new(NoOpProgressReporter),
    )
    .await;

    let pipeline_store = f.store.clone();
    let id = f.session_id;
    let output_path = f.output_path.clone();
    let pipeline = f.pipeline;
    let task = tokio::spawn(async move { pipeline.process(id, output_path).await });

    // Let a few frames through, then tear the session down
    tokio::time::sleep(Duration::from_millis(100)).await;
    pipeline_store.destroy(id).await;

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);

    // The run stopped well short of the full stream and left no output
    assert!((f.backend.written_frames().len() as u64) < 50);
    assert!(!f.output_path.exists());
    assert!(matches!(
        f.store.get(id),
        Err(WmRemovalError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn progress_tolerates_underestimated_frame_count() {
    // Probe claims 8 frames; the stream actually has 10
    let reporter = Arc::new(RecordingReporter::default());
    let f = fixture(
        MockVideoBackend::with_frames(10, 320, 240).declaring_total(8),
        MockInferenceEngine::new(),
        Arc::clone(&reporter) as Arc<dyn ProgressReporter>,
    )
    .await;

    f.pipeline
        .process(f.session_id, f.output_path.clone())
        .await
        .unwrap();

    let fractions = reporter.fractions();
    assert!(fractions.iter().all(|&f| (0.0..=1.0).contains(&f)));
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(f.store.get(f.session_id).unwrap().progress, 1.0);
}

#[tokio::test]
async fn overestimated_frame_count_still_reaches_full_progress() {
    // Probe claims 12 frames; the stream actually has 10
    let f = fixture(
        MockVideoBackend::with_frames(10, 320, 240).declaring_total(12),
        MockInferenceEngine::new(),
        Arc::new(NoOpProgressReporter),
    )
    .await;

    f.pipeline
        .process(f.session_id, f.output_path.clone())
        .await
        .unwrap();

    let session = f.store.get(f.session_id).unwrap();
    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.progress, 1.0);
}

#[tokio::test]
async fn audio_source_is_muxed_only_when_present() {
    // Source without audio: the encoder gets no audio source
    let f = fixture(
        MockVideoBackend::with_frames(5, 320, 240),
        MockInferenceEngine::new(),
        Arc::new(NoOpProgressReporter),
    )
    .await;
    f.pipeline
        .process(f.session_id, f.output_path.clone())
        .await
        .unwrap();
    let settings = f.backend.encoder_settings().unwrap();
    assert!(settings.audio_source.is_none());
    assert_eq!((settings.width, settings.height), (320, 240));

    // Source with audio: the encoder muxes from the session's source file
    let f = fixture(
        MockVideoBackend::with_frames(5, 320, 240).with_audio(),
        MockInferenceEngine::new(),
        Arc::new(NoOpProgressReporter),
    )
    .await;
    f.pipeline
        .process(f.session_id, f.output_path.clone())
        .await
        .unwrap();
    let settings = f.backend.encoder_settings().unwrap();
    let audio_source = settings.audio_source.expect("audio source");
    assert_eq!(
        audio_source,
        f.store.get(f.session_id).unwrap().source_path
    );
}

#[tokio::test]
async fn encoder_settings_follow_source_format() {
    let f = fixture(
        MockVideoBackend::with_frames(5, 320, 240).with_format(VideoFormat::Gif),
        MockInferenceEngine::new(),
        Arc::new(NoOpProgressReporter),
    )
    .await;
    f.pipeline
        .process(f.session_id, f.output_path.clone())
        .await
        .unwrap();

    let settings = f.backend.encoder_settings().unwrap();
    assert_eq!(settings.format, VideoFormat::Gif);
}

#[tokio::test]
async fn process_requires_a_selected_region() {
    let f = fixture(
        MockVideoBackend::with_frames(10, 320, 240),
        MockInferenceEngine::new(),
        Arc::new(NoOpProgressReporter),
    )
    .await;
    f.store
        .update(f.session_id, |s| {
            s.region = None;
            s.state = SessionState::Uploaded;
        })
        .unwrap();

    let err = f
        .pipeline
        .process(f.session_id, f.output_path.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, WmRemovalError::InvalidRegion(_)));
}

#[tokio::test]
async fn empty_stream_fails_with_decode_error() {
    let f = fixture(
        MockVideoBackend::with_frames(0, 320, 240).declaring_total(10),
        MockInferenceEngine::new(),
        Arc::new(NoOpProgressReporter),
    )
    .await;

    let err = f
        .pipeline
        .process(f.session_id, f.output_path.clone())
        .await
        .unwrap_err();
    assert_eq!(err.pipeline_stage(), Some(PipelineStage::Decode));
    assert!(!f.output_path.exists());
}

#[tokio::test]
async fn empty_media_mid_stream_is_reported_as_decode_failure() {
    // A container that probed fine but yields no decodable frames surfaces
    // as a decode-stage pipeline failure, not a bare empty-media error
    let f = fixture(
        MockVideoBackend::with_frames(0, 320, 240)
            .declaring_total(10)
            .with_empty_source(),
        MockInferenceEngine::new(),
        Arc::new(NoOpProgressReporter),
    )
    .await;

    let err = f
        .pipeline
        .process(f.session_id, f.output_path.clone())
        .await
        .unwrap_err();
    assert_eq!(err.pipeline_stage(), Some(PipelineStage::Decode));
    match err {
        WmRemovalError::Pipeline { detail, .. } => {
            assert!(detail.contains("no decodable frames"));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(f.store.get(f.session_id).unwrap().state, SessionState::Failed);
    assert!(!f.output_path.exists());
}
