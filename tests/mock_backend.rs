//! In-memory backend and frame sources for testing without external services

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vision_agent::{
    dispatch::{SignalPayload, SignalSink, SinkResponse},
    error::SourceError,
    features::producers::TextRecognizer,
    frame::{Frame, GrayFrame},
    session::{SessionRegistry, SessionState},
    source::{FrameSource, SourceFrame, SourceInfo},
};

/// Backend double: captures every signal and session write
pub struct MockBackend {
    signals: Arc<Mutex<Vec<SignalPayload>>>,
    sessions: Arc<Mutex<Vec<SessionState>>>,
    status: &'static str,
}

impl MockBackend {
    pub fn new(status: &'static str) -> Arc<Self> {
        Arc::new(Self {
            signals: Arc::new(Mutex::new(Vec::new())),
            sessions: Arc::new(Mutex::new(Vec::new())),
            status,
        })
    }

    pub fn get_signals(&self) -> Vec<SignalPayload> {
        self.signals.lock().unwrap().clone()
    }

    /// Every create/update in write order
    pub fn get_session_writes(&self) -> Vec<SessionState> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn last_session(&self) -> Option<SessionState> {
        self.sessions.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SignalSink for MockBackend {
    async fn send_signal(&self, payload: &SignalPayload) -> anyhow::Result<SinkResponse> {
        self.signals.lock().unwrap().push(payload.clone());
        Ok(SinkResponse {
            status: self.status.to_string(),
            message: None,
        })
    }
}

#[async_trait]
impl SessionRegistry for MockBackend {
    async fn create(&self, state: &SessionState) -> anyhow::Result<()> {
        self.sessions.lock().unwrap().push(state.clone());
        Ok(())
    }

    async fn update(&self, state: &SessionState) -> anyhow::Result<()> {
        self.sessions.lock().unwrap().push(state.clone());
        Ok(())
    }
}

/// OCR stub that always reads the same text
pub struct FixedOcr(pub &'static str);

impl TextRecognizer for FixedOcr {
    fn recognize(&self, _gray: &GrayFrame) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

pub fn blank_frame(index: u64) -> SourceFrame {
    SourceFrame {
        index,
        frame: Frame::filled(32, 32, [16, 16, 16]),
    }
}

/// Bounded source replaying a script of frames and errors
pub struct ScriptedSource {
    script: VecDeque<Result<SourceFrame, SourceError>>,
    info: SourceInfo,
}

impl ScriptedSource {
    /// `count` blank frames at `step` spacing
    pub fn frames(label: &str, count: u64, step: u64) -> Self {
        let script = (0..count).map(|i| Ok(blank_frame(i * step))).collect();
        Self {
            script,
            info: SourceInfo {
                label: label.to_string(),
                width: 32,
                height: 32,
                fps: 30.0,
                total_frames: Some(count * step),
                duration_secs: Some((count * step) as f64 / 30.0),
                asset: None,
            },
        }
    }

    /// Append an error after the scripted frames
    pub fn then_fail(mut self, error: SourceError) -> Self {
        self.script.push_back(Err(error));
        self
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        self.script.pop_front().transpose()
    }

    fn info(&self) -> &SourceInfo {
        &self.info
    }
}

/// Unbounded source producing a blank frame every `every`
pub struct EndlessSource {
    next_index: u64,
    step: u64,
    every: Duration,
    fail_after: Option<u64>,
    info: SourceInfo,
}

impl EndlessSource {
    pub fn new(symbol: &str, step: u64, every: Duration) -> Self {
        Self {
            next_index: 0,
            step,
            every,
            fail_after: None,
            info: SourceInfo {
                label: symbol.to_string(),
                width: 32,
                height: 32,
                fps: 1.0,
                total_frames: None,
                duration_secs: None,
                asset: Some(symbol.to_string()),
            },
        }
    }

    /// Feed error once `frames` frames have been produced
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

#[async_trait]
impl FrameSource for EndlessSource {
    async fn next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        tokio::time::sleep(self.every).await;
        let produced = self.next_index / self.step;
        if self.fail_after.is_some_and(|limit| produced >= limit) {
            return Err(SourceError::Feed("exchange unreachable".to_string()));
        }
        let frame = blank_frame(self.next_index);
        self.next_index += self.step;
        Ok(Some(frame))
    }

    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn reference_price(&self) -> Option<Decimal> {
        Some(Decimal::from(60000))
    }

    fn is_live(&self) -> bool {
        true
    }
}
