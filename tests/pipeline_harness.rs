//! End-to-end session harness
//!
//! Validates the full loop:
//! source → features → window → decision → dispatch (by mode) → session records

mod mock_backend;

use mock_backend::{EndlessSource, FixedOcr, MockBackend, ScriptedSource};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vision_agent::{
    config::{AgentConfig, AgentMode, DirectionPolicy},
    dispatch::SignalSink,
    error::SourceError,
    features::FeatureExtractor,
    observability::{metrics, MetricsCollector},
    pipeline::Pipeline,
    runner::AgentRunner,
    session::{SessionKind, SessionStatus},
    signal::{Action, Direction},
    state::FileSessionRegistry,
};

/// Test config: short window, OCR on every processed frame
fn create_test_config(mode: AgentMode) -> AgentConfig {
    AgentConfig {
        mode,
        user_id: "user-42".to_string(),
        sequence_length: 3,
        frame_step: 5,
        ocr_interval: 1,
        ..AgentConfig::default()
    }
}

fn create_runner(
    config: AgentConfig,
    ocr: &'static str,
    backend: &Arc<MockBackend>,
) -> AgentRunner {
    let extractor = FeatureExtractor::new(&config).with_text_recognizer(Arc::new(FixedOcr(ocr)));
    let sink: Arc<dyn SignalSink> = backend.clone();
    let pipeline = Pipeline::new(
        Arc::new(config),
        extractor,
        None,
        Some(sink),
        MetricsCollector::new(),
    )
    .unwrap();
    AgentRunner::new(pipeline, backend.clone())
}

#[tokio::test]
async fn test_shadow_mode_never_calls_backend() {
    let backend = MockBackend::new("executed");
    let runner = create_runner(create_test_config(AgentMode::Shadow), "buy 50000", &backend);

    let mut source = ScriptedSource::frames("clip.mp4", 10, 5);
    let state = runner.process_video(&mut source, "clip").await;

    assert_eq!(state.status, SessionStatus::Completed);
    // Window is full from the third frame on
    assert_eq!(state.signals_generated, 8);
    assert!(backend.get_signals().is_empty());
    assert_eq!(runner.metrics().get_counter(metrics::SIGNALS_SENT).await, 0);
}

#[tokio::test]
async fn test_paper_mode_sends_every_gated_signal() {
    let backend = MockBackend::new("signal_created");
    let runner = create_runner(create_test_config(AgentMode::Paper), "VENDA 50000", &backend);

    let mut source = ScriptedSource::frames("lesson.mp4", 4, 5);
    let state = runner.process_video(&mut source, "lesson").await;

    let signals = backend.get_signals();
    assert_eq!(signals.len(), 2);
    assert_eq!(state.signals_generated, 2);

    let first = &signals[0];
    assert_eq!(first.user_id, "user-42");
    assert_eq!(first.video_id, "lesson");
    assert_eq!(first.asset, "BTCUSDT");
    assert_eq!(first.action, Action::Enter);
    assert_eq!(first.direction, Direction::Short);
    assert_eq!(first.frame_index, 10);
    assert_eq!(first.entry_price, Some(Decimal::from(50000)));
    assert_eq!(first.stop_loss, Some(Decimal::from(50500)));
    assert_eq!(first.take_profit, Some(Decimal::from(49000)));
    assert!(first.features_summary.text_detected);
    assert_eq!(first.features_summary.text_words, 2);
}

#[tokio::test]
async fn test_daily_cap_suppresses_extra_signals() {
    let backend = MockBackend::new("executed");
    let config = AgentConfig {
        max_signals_per_day: 2,
        ..create_test_config(AgentMode::Live)
    };
    let runner = create_runner(config, "exit", &backend);

    let mut source = ScriptedSource::frames("scalp.mp4", 7, 5);
    runner.process_video(&mut source, "scalp").await;

    assert_eq!(backend.get_signals().len(), 2);
    assert_eq!(runner.metrics().get_counter(metrics::SIGNALS_EXECUTED).await, 2);
    assert_eq!(runner.metrics().get_counter(metrics::SIGNALS_SUPPRESSED).await, 3);
}

#[tokio::test]
async fn test_completion_reports_total_frames() {
    let backend = MockBackend::new("executed");
    let runner = create_runner(create_test_config(AgentMode::Shadow), "", &backend);

    let mut source = ScriptedSource::frames("quiet.mp4", 12, 5);
    let state = runner.process_video(&mut source, "quiet").await;

    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(state.processed_frames, 60);
    assert_eq!(state.total_frames, Some(60));
    assert_eq!(state.signals_generated, 0);
    assert!(state.completed_at.is_some());

    let statuses: Vec<SessionStatus> = backend
        .get_session_writes()
        .iter()
        .map(|s| s.status)
        .collect();
    assert_eq!(statuses.first(), Some(&SessionStatus::Pending));
    assert_eq!(statuses.last(), Some(&SessionStatus::Completed));
    assert_eq!(runner.metrics().get_counter(metrics::SESSIONS_COMPLETED).await, 1);
}

#[tokio::test]
async fn test_source_failure_freezes_counters() {
    let backend = MockBackend::new("executed");
    let runner = create_runner(create_test_config(AgentMode::Shadow), "buy", &backend);

    // Frames 0..=60, then the decoder dies
    let mut source = ScriptedSource::frames("broken.mp4", 13, 5).then_fail(SourceError::Truncated {
        expected: 3072,
        got: 100,
    });
    let state = runner.process_video(&mut source, "broken").await;

    assert_eq!(state.status, SessionStatus::Failed);
    assert!(state.error_message.as_deref().unwrap_or_default().contains("truncated"));
    // Last cadence update was at frame 50, published before that frame's decision
    assert_eq!(state.processed_frames, 50);
    assert_eq!(state.signals_generated, 8);

    let last = backend.last_session().unwrap();
    assert_eq!(last.status, SessionStatus::Failed);
    assert_eq!(runner.metrics().get_counter(metrics::SESSIONS_FAILED).await, 1);
}

#[tokio::test]
async fn test_missing_file_still_records_failed_session() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(FileSessionRegistry::new(dir.path()));
    let config = AgentConfig {
        state_dir: dir.path().to_path_buf(),
        ..create_test_config(AgentMode::Shadow)
    };
    let extractor = FeatureExtractor::new(&config);
    let pipeline =
        Pipeline::new(Arc::new(config), extractor, None, None, MetricsCollector::new()).unwrap();
    let runner = AgentRunner::new(pipeline, registry.clone());

    let state = runner.process_input("/definitely/not/here/lesson-7.mp4").await;

    assert_eq!(state.session_id, "lesson-7");
    assert_eq!(state.status, SessionStatus::Failed);
    assert!(state.error_message.unwrap().contains("not found"));

    let stored = registry.load("lesson-7").await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Failed);
    assert!(dir.path().join("now.json").exists());
}

#[tokio::test]
async fn test_sessions_do_not_share_windows() {
    let backend = MockBackend::new("executed");
    let runner = create_runner(create_test_config(AgentMode::Shadow), "long", &backend);

    let mut first = ScriptedSource::frames("a.mp4", 5, 5);
    let a = runner.process_video(&mut first, "a").await;
    assert_eq!(a.signals_generated, 3);

    // Two frames never fill a fresh three-frame window
    let mut second = ScriptedSource::frames("b.mp4", 2, 5);
    let b = runner.process_video(&mut second, "b").await;
    assert_eq!(b.status, SessionStatus::Completed);
    assert_eq!(b.signals_generated, 0);
}

#[tokio::test]
async fn test_live_session_stops_as_completed() {
    let backend = MockBackend::new("executed");
    let config = AgentConfig {
        live_direction_policy: DirectionPolicy::AssumeLong,
        ..create_test_config(AgentMode::Paper)
    };
    let runner = create_runner(config, "buy", &backend);

    let source = EndlessSource::new("ETHUSDT", 5, Duration::from_millis(5));
    let stop = Arc::new(AtomicBool::new(false));
    let handle = runner.spawn_live(Box::new(source), "live-eth".to_string(), stop.clone());

    tokio::time::sleep(Duration::from_millis(150)).await;
    stop.store(true, Ordering::SeqCst);
    let state = handle.await.unwrap();

    assert_eq!(state.kind, SessionKind::Live);
    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(state.total_frames, None);

    let signals = backend.get_signals();
    assert!(!signals.is_empty());
    assert_eq!(signals[0].asset, "ETHUSDT");
    // Live sources quote their own price
    assert_eq!(signals[0].entry_price, Some(Decimal::from(60000)));
}

#[tokio::test]
async fn test_live_feed_error_fails_session() {
    let backend = MockBackend::new("executed");
    let runner = create_runner(create_test_config(AgentMode::Shadow), "", &backend);

    let source = EndlessSource::new("BTCUSDT", 5, Duration::from_millis(1)).failing_after(4);
    let stop = Arc::new(AtomicBool::new(false));
    let state = runner
        .spawn_live(Box::new(source), "live-btc".to_string(), stop)
        .await
        .unwrap();

    assert_eq!(state.status, SessionStatus::Failed);
    assert!(state.error_message.unwrap().contains("exchange unreachable"));
}

#[tokio::test]
async fn test_unlistable_playlist_creates_no_sessions() {
    let backend = MockBackend::new("executed");
    let config = AgentConfig {
        ytdlp_path: "/nonexistent/yt-dlp".to_string(),
        ..create_test_config(AgentMode::Shadow)
    };
    let runner = create_runner(config, "", &backend);

    let states = runner
        .process_source("https://www.youtube.com/playlist?list=PLsmc101")
        .await;
    assert!(states.is_empty());
    assert!(backend.get_session_writes().is_empty());

    // A plain input still gets its own (failed) session
    let states = runner.process_source("/definitely/not/here/solo.mp4").await;
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].session_id, "solo");
    assert_eq!(states[0].status, SessionStatus::Failed);
}
