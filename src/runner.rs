//! Agent Runner - session orchestration
//!
//! Drives a [`FrameSource`] through the [`Pipeline`] and keeps the session
//! registry in step with the tracker. Video sessions run to exhaustion;
//! live sessions run until their stop flag is raised.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::DirectionPolicy;
use crate::error::SourceError;
use crate::observability::{metrics, MetricsCollector};
use crate::pipeline::{Pipeline, SessionContext};
use crate::session::{SessionKind, SessionRegistry, SessionState, SessionStatus, SessionTracker};
use crate::source::video::{expand_playlist, is_playlist, resolve_input};
use crate::source::{session_id_for, FrameSource, VideoFileSource};

/// Runs sessions against one shared pipeline
#[derive(Clone)]
pub struct AgentRunner {
    pipeline: Pipeline,
    registry: Arc<dyn SessionRegistry>,
}

impl AgentRunner {
    pub fn new(pipeline: Pipeline, registry: Arc<dyn SessionRegistry>) -> Self {
        Self { pipeline, registry }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.pipeline.metrics
    }

    /// Download/open the input, then run it as a video session.
    /// Failures before the first frame still leave a failed session record.
    pub async fn process_input(&self, input: &str) -> SessionState {
        let session_id = session_id_for(input);
        let config = &self.pipeline.config;

        let resolved =
            resolve_input(input, &config.state_dir, &session_id, &config.ytdlp_path).await;
        let opened = match resolved {
            Ok(path) => VideoFileSource::open(Path::new(&path), config).await,
            Err(e) => Err(e),
        };

        match opened {
            Ok(mut source) => self.process_video(&mut source, &session_id).await,
            Err(e) => {
                error!("Cannot open {}: {}", input, e);
                let mut tracker = self.tracker(&session_id, SessionKind::Video, input, None);
                self.begin(&mut tracker).await;
                self.finish_failed(&mut tracker, e.to_string()).await;
                tracker.state().clone()
            }
        }
    }

    /// Playlist inputs are expanded into their videos; anything else is
    /// one video session
    pub async fn process_source(&self, input: &str) -> Vec<SessionState> {
        if !is_playlist(input) {
            return vec![self.process_input(input).await];
        }
        match self.process_playlist(input).await {
            Ok(states) => states,
            Err(e) => {
                error!("Playlist {} skipped: {}", input, e);
                Vec::new()
            }
        }
    }

    /// Run every video of a playlist in order. A failed listing creates no sessions.
    pub async fn process_playlist(&self, url: &str) -> Result<Vec<SessionState>, SourceError> {
        let videos = expand_playlist(url, &self.pipeline.config.ytdlp_path).await?;
        info!("Found {} videos in playlist", videos.len());

        let states = self.process_many(&videos).await;
        let completed = states
            .iter()
            .filter(|s| s.status == SessionStatus::Completed)
            .count();
        info!("Playlist finished: {}/{} completed", completed, states.len());
        Ok(states)
    }

    /// Inputs run one after another; each gets its own session
    pub async fn process_many(&self, inputs: &[String]) -> Vec<SessionState> {
        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            results.push(self.process_input(input).await);
        }
        results
    }

    /// Run a bounded source until it is exhausted or fails
    pub async fn process_video(
        &self,
        source: &mut dyn FrameSource,
        session_id: &str,
    ) -> SessionState {
        let info = source.info().clone();
        let config = &self.pipeline.config;

        let mut tracker =
            self.tracker(session_id, SessionKind::Video, &info.label, info.total_frames);
        self.begin(&mut tracker).await;

        let asset = info.asset.as_deref().unwrap_or(&config.default_asset);
        let mut ctx = SessionContext::new(
            config,
            tracker,
            config.video_direction_policy,
            asset,
            info.fps,
        );
        ctx.reset();

        loop {
            let frame = match source.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    self.finish_failed(&mut ctx.tracker, e.to_string()).await;
                    return ctx.tracker.state().clone();
                }
            };

            match self
                .pipeline
                .process_frame(&mut ctx, &frame, source.reference_price())
                .await
            {
                Ok(outcome) => {
                    if let Some(progress) = outcome.progress {
                        self.publish(&progress).await;
                    }
                }
                Err(e) => {
                    self.finish_failed(&mut ctx.tracker, e.to_string()).await;
                    return ctx.tracker.state().clone();
                }
            }
        }

        match ctx.tracker.complete() {
            Ok(state) => {
                let state = state.clone();
                self.publish(&state).await;
                self.metrics().increment(metrics::SESSIONS_COMPLETED, 1).await;
            }
            Err(e) => {
                let message = e.to_string();
                self.finish_failed(&mut ctx.tracker, message).await;
            }
        }
        ctx.tracker.state().clone()
    }

    /// Run a live source until `stop` is raised
    pub async fn run_live(
        &self,
        mut source: Box<dyn FrameSource>,
        session_id: &str,
        stop: Arc<AtomicBool>,
    ) -> SessionState {
        let info = source.info().clone();
        let config = &self.pipeline.config;

        let mut tracker = self.tracker(session_id, SessionKind::Live, &info.label, None);
        self.begin(&mut tracker).await;

        let asset = info.asset.as_deref().unwrap_or(&config.live.symbol);
        let mut ctx = SessionContext::new(
            config,
            tracker,
            config.live_direction_policy,
            asset,
            info.fps,
        );
        ctx.reset();

        if config.live_direction_policy == DirectionPolicy::Suppress {
            info!("Live session {}: unresolved directions are suppressed", session_id);
        }

        while !stop.load(Ordering::SeqCst) {
            let frame = match source.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    let message = format!("live source {} ended unexpectedly", info.label);
                    self.finish_failed(&mut ctx.tracker, message).await;
                    return ctx.tracker.state().clone();
                }
                Err(e) => {
                    self.finish_failed(&mut ctx.tracker, e.to_string()).await;
                    return ctx.tracker.state().clone();
                }
            };

            match self
                .pipeline
                .process_frame(&mut ctx, &frame, source.reference_price())
                .await
            {
                Ok(outcome) => {
                    if let Some(progress) = outcome.progress {
                        self.publish(&progress).await;
                    }
                }
                Err(e) => {
                    self.finish_failed(&mut ctx.tracker, e.to_string()).await;
                    return ctx.tracker.state().clone();
                }
            }
        }

        match ctx.tracker.stop() {
            Ok(state) => {
                let state = state.clone();
                self.publish(&state).await;
                self.metrics().increment(metrics::SESSIONS_COMPLETED, 1).await;
            }
            Err(e) => warn!("Stop ignored: {}", e),
        }
        ctx.tracker.state().clone()
    }

    /// Run a live session on its own task
    pub fn spawn_live(
        &self,
        source: Box<dyn FrameSource>,
        session_id: String,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<SessionState> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run_live(source, &session_id, stop).await })
    }

    fn tracker(
        &self,
        session_id: &str,
        kind: SessionKind,
        source: &str,
        total_frames: Option<u64>,
    ) -> SessionTracker {
        SessionTracker::new(
            session_id,
            kind,
            source,
            total_frames,
            self.pipeline.model_version(),
            self.pipeline.config.progress_every(),
        )
    }

    /// Register the pending session, then mark it processing
    async fn begin(&self, tracker: &mut SessionTracker) {
        if let Err(e) = self.registry.create(tracker.state()).await {
            warn!("Failed to create session {}: {}", tracker.session_id(), e);
        }
        match tracker.start() {
            Ok(state) => {
                let state = state.clone();
                self.publish(&state).await;
            }
            Err(e) => warn!("{}", e),
        }
    }

    async fn finish_failed(&self, tracker: &mut SessionTracker, message: String) {
        error!("Session {} error: {}", tracker.session_id(), message);
        match tracker.fail(message) {
            Ok(state) => {
                let state = state.clone();
                self.publish(&state).await;
                self.metrics().increment(metrics::SESSIONS_FAILED, 1).await;
            }
            Err(e) => warn!("{}", e),
        }
    }

    /// Registry errors are logged; they never stop a session
    async fn publish(&self, state: &SessionState) {
        if let Err(e) = self.registry.update(state).await {
            warn!("Failed to update session {}: {}", state.session_id, e);
        }
    }
}
