//! Mode-gated signal dispatch
//!
//! SHADOW records locally. PAPER and LIVE send gated signals to the
//! backend sink, subject to a per-UTC-day cap. Send failures become a
//! [`DispatchOutcome::Failed`] and never propagate.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{AgentConfig, AgentMode};
use crate::features::FeaturesSummary;
use crate::observability::{metrics, MetricsCollector};
use crate::signal::{Action, Direction, Signal};

/// Body posted to the backend signal endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub user_id: String,
    pub action: Action,
    pub confidence: f64,
    pub asset: String,
    pub video_id: String,
    pub frame_index: u64,
    /// Seconds into the source
    pub timestamp_in_video: u64,
    pub features_summary: FeaturesSummary,
    pub model_version: String,
    pub direction: Direction,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub entry_price: Option<Decimal>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub stop_loss: Option<Decimal>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub take_profit: Option<Decimal>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub risk_reward: Option<Decimal>,
}

/// Backend reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Anything that accepts outgoing signals
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn send_signal(&self, payload: &SignalPayload) -> anyhow::Result<SinkResponse>;
}

/// What happened to a gated signal
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// SHADOW mode: logged only
    Recorded,
    /// Backend stored the signal
    Accepted(String),
    /// Backend executed the signal
    Executed,
    /// Backend answered but refused the signal
    Rejected(String),
    /// Daily cap reached, not sent
    Suppressed,
    /// Transport or backend error
    Failed(String),
}

impl DispatchOutcome {
    pub fn reached_backend(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Accepted(_) | DispatchOutcome::Executed | DispatchOutcome::Rejected(_)
        )
    }
}

/// Per-signal context the payload needs beyond the signal itself
#[derive(Debug, Clone)]
pub struct DispatchContext<'a> {
    pub session_id: &'a str,
    pub asset: &'a str,
    pub fps: f64,
    pub features: FeaturesSummary,
}

pub struct Dispatcher {
    mode: AgentMode,
    sink: Option<Arc<dyn SignalSink>>,
    metrics: MetricsCollector,
    user_id: String,
    model_version: String,
    max_per_day: u32,
    fallback_fps: f64,
    daily: Mutex<(NaiveDate, u32)>,
}

impl Dispatcher {
    pub fn new(
        config: &AgentConfig,
        sink: Option<Arc<dyn SignalSink>>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            mode: config.mode,
            sink,
            metrics,
            user_id: config.user_id.clone(),
            model_version: config.model_version.clone(),
            max_per_day: config.max_signals_per_day,
            fallback_fps: config.fallback_fps,
            daily: Mutex::new((Utc::now().date_naive(), 0)),
        }
    }

    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    pub fn with_model_version(mut self, model_version: &str) -> Self {
        self.model_version = model_version.to_string();
        self
    }

    pub fn payload(&self, signal: &Signal, ctx: &DispatchContext<'_>) -> SignalPayload {
        let fps = if ctx.fps.is_finite() && ctx.fps > 0.0 {
            ctx.fps
        } else {
            self.fallback_fps
        };
        let has_levels = signal.action == Action::Enter;
        SignalPayload {
            user_id: self.user_id.clone(),
            action: signal.action,
            confidence: signal.confidence,
            asset: ctx.asset.to_string(),
            video_id: ctx.session_id.to_string(),
            frame_index: signal.frame_index,
            timestamp_in_video: (signal.frame_index as f64 / fps) as u64,
            features_summary: ctx.features.clone(),
            model_version: self.model_version.clone(),
            direction: signal.direction,
            entry_price: signal.entry_price.filter(|_| has_levels),
            stop_loss: signal.stop_loss.filter(|_| has_levels),
            take_profit: signal.take_profit.filter(|_| has_levels),
            risk_reward: signal.risk_reward.filter(|_| has_levels),
        }
    }

    /// Dispatch one gated signal
    pub async fn dispatch(&self, signal: &Signal, ctx: &DispatchContext<'_>) -> DispatchOutcome {
        self.dispatch_at(signal, ctx, Utc::now()).await
    }

    pub async fn dispatch_at(
        &self,
        signal: &Signal,
        ctx: &DispatchContext<'_>,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        if !self.mode.dispatches() {
            info!(
                "[{}] {} {} | {} | confidence {:.2} | frame {}",
                self.mode,
                signal.action,
                signal.direction,
                ctx.asset,
                signal.confidence,
                signal.frame_index
            );
            return DispatchOutcome::Recorded;
        }

        let Some(sink) = &self.sink else {
            warn!("{} mode without a signal sink, signal not sent", self.mode);
            self.metrics.increment(metrics::DISPATCH_FAILURES, 1).await;
            return DispatchOutcome::Failed("no signal sink configured".to_string());
        };

        if !self.take_daily_slot(now).await {
            warn!(
                "Daily signal limit reached ({}), suppressing {} at frame {}",
                self.max_per_day, signal.action, signal.frame_index
            );
            self.metrics.increment(metrics::SIGNALS_SUPPRESSED, 1).await;
            return DispatchOutcome::Suppressed;
        }

        let payload = self.payload(signal, ctx);
        info!(
            "Sending signal: {} | {} | Confidence: {:.2}",
            payload.action, payload.asset, payload.confidence
        );

        match sink.send_signal(&payload).await {
            Ok(resp) => {
                self.metrics.increment(metrics::SIGNALS_SENT, 1).await;
                info!("Signal sent: {}", resp.status);
                match resp.status.as_str() {
                    "executed" => {
                        self.metrics.increment(metrics::SIGNALS_EXECUTED, 1).await;
                        DispatchOutcome::Executed
                    }
                    "rejected" | "disabled" | "ignored" => {
                        warn!(
                            "Backend refused signal ({}): {}",
                            resp.status,
                            resp.message.as_deref().unwrap_or("")
                        );
                        DispatchOutcome::Rejected(resp.status)
                    }
                    _ => DispatchOutcome::Accepted(resp.status),
                }
            }
            Err(e) => {
                error!("Error sending signal: {}", e);
                self.metrics.increment(metrics::DISPATCH_FAILURES, 1).await;
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    /// Sends used so far on `now`'s UTC day
    pub async fn sent_today(&self, now: DateTime<Utc>) -> u32 {
        let daily = self.daily.lock().await;
        if daily.0 == now.date_naive() {
            daily.1
        } else {
            0
        }
    }

    async fn take_daily_slot(&self, now: DateTime<Utc>) -> bool {
        let mut daily = self.daily.lock().await;
        let today = now.date_naive();
        if daily.0 != today {
            *daily = (today, 0);
        }
        if daily.1 >= self.max_per_day {
            return false;
        }
        daily.1 += 1;
        true
    }
}
