//! Session state tracking
//!
//! A session is one video run or one live-market run. The tracker keeps
//! live counters internally and only publishes them to the [`SessionState`]
//! at the periodic cadence and on terminal transitions, so a failed session
//! keeps the counters of its last published update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Bounded recording
    Video,
    /// Unbounded live-market chart
    Live,
}

/// Published session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub kind: SessionKind,
    /// URL, file path or market symbol the session reads from
    pub source: String,
    pub status: SessionStatus,
    /// `None` for live sessions (indeterminate)
    pub total_frames: Option<u64>,
    pub processed_frames: u64,
    pub signals_generated: u64,
    pub error_message: Option<String>,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Create/update store for session records
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn create(&self, state: &SessionState) -> anyhow::Result<()>;

    async fn update(&self, state: &SessionState) -> anyhow::Result<()>;
}

/// Owns one session's state machine and counters
#[derive(Debug)]
pub struct SessionTracker {
    state: SessionState,
    progress_every: u64,
    last_frame: u64,
    signals: u64,
}

impl SessionTracker {
    pub fn new(
        session_id: &str,
        kind: SessionKind,
        source: &str,
        total_frames: Option<u64>,
        model_version: &str,
        progress_every: u64,
    ) -> Self {
        let total_frames = match kind {
            SessionKind::Video => total_frames,
            SessionKind::Live => None,
        };
        Self {
            state: SessionState {
                session_id: session_id.to_string(),
                kind,
                source: source.to_string(),
                status: SessionStatus::Pending,
                total_frames,
                processed_frames: 0,
                signals_generated: 0,
                error_message: None,
                model_version: model_version.to_string(),
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
            },
            progress_every: progress_every.max(1),
            last_frame: 0,
            signals: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    /// Unpublished signal count
    pub fn signals(&self) -> u64 {
        self.signals
    }

    /// pending -> processing
    pub fn start(&mut self) -> Result<&SessionState, SessionError> {
        self.transition(SessionStatus::Pending, SessionStatus::Processing)?;
        self.state.started_at = Some(Utc::now());
        info!("Session {} processing", self.state.session_id);
        Ok(&self.state)
    }

    /// Note a processed frame. Returns the freshly published state when
    /// the frame falls on the progress cadence.
    pub fn record_frame(&mut self, frame_index: u64) -> Option<SessionState> {
        if self.state.status != SessionStatus::Processing {
            return None;
        }
        self.last_frame = self.last_frame.max(frame_index);
        if frame_index % self.progress_every != 0 {
            return None;
        }
        self.publish_counters(self.last_frame);
        Some(self.state.clone())
    }

    pub fn record_signal(&mut self) {
        if self.state.status == SessionStatus::Processing {
            self.signals += 1;
        }
    }

    /// processing -> completed because the source ran out. Not valid for live sessions.
    pub fn complete(&mut self) -> Result<&SessionState, SessionError> {
        if self.state.kind == SessionKind::Live {
            return Err(SessionError::LiveExhaustion(self.state.session_id.clone()));
        }
        self.transition(SessionStatus::Processing, SessionStatus::Completed)?;
        let processed = self.state.total_frames.unwrap_or(self.last_frame);
        self.publish_counters(processed);
        self.state.completed_at = Some(Utc::now());
        info!(
            "Session {} completed: {} frames, {} signals",
            self.state.session_id, self.state.processed_frames, self.state.signals_generated
        );
        Ok(&self.state)
    }

    /// processing -> completed on external cancellation
    pub fn stop(&mut self) -> Result<&SessionState, SessionError> {
        self.transition(SessionStatus::Processing, SessionStatus::Completed)?;
        self.publish_counters(self.last_frame);
        self.state.completed_at = Some(Utc::now());
        info!("Session {} stopped", self.state.session_id);
        Ok(&self.state)
    }

    /// pending/processing -> failed. Counters stay at their last published values.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<&SessionState, SessionError> {
        if self.state.status.is_terminal() {
            return Err(self.invalid(SessionStatus::Failed));
        }
        self.state.status = SessionStatus::Failed;
        self.state.error_message = Some(message.into());
        self.state.completed_at = Some(Utc::now());
        info!(
            "Session {} failed: {}",
            self.state.session_id,
            self.state.error_message.as_deref().unwrap_or_default()
        );
        Ok(&self.state)
    }

    fn publish_counters(&mut self, processed_frames: u64) {
        self.state.processed_frames = self.state.processed_frames.max(processed_frames);
        self.state.signals_generated = self.signals;
    }

    fn transition(&mut self, from: SessionStatus, to: SessionStatus) -> Result<(), SessionError> {
        if self.state.status != from {
            return Err(self.invalid(to));
        }
        self.state.status = to;
        Ok(())
    }

    fn invalid(&self, to: SessionStatus) -> SessionError {
        SessionError::InvalidTransition {
            session_id: self.state.session_id.clone(),
            from: self.state.status.to_string(),
            to: to.to_string(),
        }
    }
}
