//! Backend API Client
//!
//! Signal sink (edge function) and session registry (REST table) on the
//! same backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::dispatch::{SignalPayload, SignalSink, SinkResponse};
use crate::session::{SessionRegistry, SessionState, SessionStatus};

const SIGNAL_FUNCTION: &str = "functions/v1/vision-agent-signal";
const SESSIONS_TABLE: &str = "rest/v1/vision_agent_videos";

/// Client for the signal backend
pub struct BackendClient {
    client: Client,
    base_url: String,
    service_key: String,
    user_id: String,
}

impl BackendClient {
    /// Create new backend client
    pub fn new(base_url: &str, service_key: &str, user_id: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            user_id: user_id.to_string(),
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
    }

    /// Post a signal to the edge function
    pub async fn post_signal(&self, payload: &SignalPayload) -> anyhow::Result<SinkResponse> {
        let url = format!("{}/{}", self.base_url, SIGNAL_FUNCTION);

        let response = self
            .authed(self.client.post(&url))
            .json(payload)
            .send()
            .await?;

        if response.status().is_success() {
            let resp: SinkResponse = response.json().await?;
            Ok(resp)
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("Signal send failed: {} - {}", status, text))
        }
    }

    /// Insert the session row
    pub async fn create_session(&self, state: &SessionState) -> anyhow::Result<()> {
        let url = format!("{}/{}", self.base_url, SESSIONS_TABLE);

        let req = CreateSessionRequest {
            user_id: &self.user_id,
            video_id: &state.session_id,
            youtube_url: &state.source,
            status: state.status,
            total_frames: state.total_frames,
            model_version: &state.model_version,
        };

        let response = self
            .authed(self.client.post(&url))
            .header("Prefer", "return=minimal")
            .json(&req)
            .send()
            .await?;

        if response.status().is_success() {
            debug!("Session record created: {}", state.session_id);
            Ok(())
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("Session create failed: {} - {}", status, text))
        }
    }

    /// Patch status and counters on the session row
    pub async fn update_session(&self, state: &SessionState) -> anyhow::Result<()> {
        let url = format!("{}/{}", self.base_url, SESSIONS_TABLE);

        let req = UpdateSessionRequest {
            status: state.status,
            processed_frames: state.processed_frames,
            signals_generated: state.signals_generated,
            error_message: state.error_message.as_deref(),
            processing_started_at: state.started_at,
            processing_completed_at: state
                .completed_at
                .filter(|_| state.status.is_terminal()),
            updated_at: Utc::now(),
        };

        let response = self
            .authed(self.client.patch(&url))
            .query(&[
                ("video_id", format!("eq.{}", state.session_id)),
                ("user_id", format!("eq.{}", self.user_id)),
            ])
            .json(&req)
            .send()
            .await?;

        if response.status().is_success() {
            debug!("Session status updated: {} -> {}", state.session_id, state.status);
            Ok(())
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("Session update failed: {} - {}", status, text))
        }
    }
}

#[async_trait]
impl SignalSink for BackendClient {
    async fn send_signal(&self, payload: &SignalPayload) -> anyhow::Result<SinkResponse> {
        self.post_signal(payload).await
    }
}

#[async_trait]
impl SessionRegistry for BackendClient {
    async fn create(&self, state: &SessionState) -> anyhow::Result<()> {
        self.create_session(state).await
    }

    async fn update(&self, state: &SessionState) -> anyhow::Result<()> {
        self.update_session(state).await
    }
}

// Request types

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    user_id: &'a str,
    video_id: &'a str,
    youtube_url: &'a str,
    status: SessionStatus,
    total_frames: Option<u64>,
    model_version: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateSessionRequest<'a> {
    status: SessionStatus,
    processed_frames: u64,
    signals_generated: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    processing_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    processing_completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}
