//! Per-frame processing: extract, buffer, classify, decide, dispatch

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::buffer::SequenceBuffer;
use crate::classifier::SequenceClassifier;
use crate::config::{AgentConfig, DirectionPolicy};
use crate::decision::DecisionEngine;
use crate::dispatch::{DispatchContext, DispatchOutcome, Dispatcher, SignalSink};
use crate::error::{ConfigError, ExtractionError};
use crate::features::{ExtractionContext, FeatureExtractor, FrameFeatures};
use crate::observability::{metrics, MetricsCollector};
use crate::session::{SessionState, SessionTracker};
use crate::signal::Signal;
use crate::source::SourceFrame;

/// Components shared by every session in the process
#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<AgentConfig>,
    pub extractor: Arc<FeatureExtractor>,
    pub classifier: Option<Arc<dyn SequenceClassifier>>,
    pub engine: Arc<DecisionEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: MetricsCollector,
}

/// State owned by exactly one running session
pub struct SessionContext {
    pub extraction: ExtractionContext,
    pub buffer: SequenceBuffer,
    pub tracker: SessionTracker,
    pub policy: DirectionPolicy,
    pub asset: String,
    pub fps: f64,
}

impl SessionContext {
    pub fn new(
        config: &AgentConfig,
        tracker: SessionTracker,
        policy: DirectionPolicy,
        asset: &str,
        fps: f64,
    ) -> Self {
        Self {
            extraction: ExtractionContext::new(),
            buffer: SequenceBuffer::new(config.sequence_length),
            tracker,
            policy,
            asset: asset.to_string(),
            fps,
        }
    }

    /// Clear the window and the extraction history together
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.extraction.reset();
    }
}

/// Result of one processed frame
#[derive(Debug, Default)]
pub struct FrameOutcome {
    /// Set when the frame fell on the progress cadence
    pub progress: Option<SessionState>,
    /// Gated signal and what dispatch did with it
    pub signal: Option<(Signal, DispatchOutcome)>,
}

impl Pipeline {
    pub fn new(
        config: Arc<AgentConfig>,
        extractor: FeatureExtractor,
        classifier: Option<Arc<dyn SequenceClassifier>>,
        sink: Option<Arc<dyn SignalSink>>,
        metrics: MetricsCollector,
    ) -> Result<Self, ConfigError> {
        let engine = DecisionEngine::new(&config)?;
        let mut dispatcher = Dispatcher::new(&config, sink, metrics.clone());
        if let Some(classifier) = &classifier {
            dispatcher = dispatcher.with_model_version(classifier.model_version());
        }
        Ok(Self {
            engine: Arc::new(engine),
            extractor: Arc::new(extractor),
            dispatcher: Arc::new(dispatcher),
            classifier,
            config,
            metrics,
        })
    }

    pub fn model_version(&self) -> &str {
        self.classifier
            .as_ref()
            .map(|c| c.model_version())
            .unwrap_or(self.config.model_version.as_str())
    }

    pub async fn process_frame(
        &self,
        ctx: &mut SessionContext,
        source_frame: &SourceFrame,
        market_price: Option<Decimal>,
    ) -> Result<FrameOutcome, ExtractionError> {
        let index = source_frame.index;
        let features = self.extract(ctx, source_frame).await?;

        ctx.buffer.add(self.extractor.vectorize(&features), index);
        self.metrics.increment(metrics::FRAMES_PROCESSED, 1).await;

        let mut outcome = FrameOutcome {
            progress: ctx.tracker.record_frame(index),
            signal: None,
        };

        let Some(window) = ctx.buffer.snapshot() else {
            return Ok(outcome);
        };

        let probabilities = match &self.classifier {
            Some(classifier) => match classifier.classify(&window).await {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Classifier unavailable at frame {}: {}", index, e);
                    self.metrics.increment(metrics::CLASSIFIER_FAILURES, 1).await;
                    None
                }
            },
            None => None,
        };

        let reference = market_price.or_else(|| self.reference_from_text(&features));
        let signal = self
            .engine
            .decide(probabilities.as_ref(), &features, reference, ctx.policy);

        if !self.engine.passes_gate(&signal) {
            debug!(
                "Frame {}: {} ({:.2}) below gate",
                index, signal.action, signal.confidence
            );
            return Ok(outcome);
        }

        info!(
            "Signal: {} ({}) | Confidence: {:.2} | Frame: {} | {}",
            signal.action, signal.direction, signal.confidence, index, signal.reason
        );
        ctx.tracker.record_signal();
        self.metrics.increment(metrics::SIGNALS_GENERATED, 1).await;

        let dispatch_ctx = DispatchContext {
            session_id: ctx.tracker.session_id(),
            asset: &ctx.asset,
            fps: ctx.fps,
            features: features.summary(),
        };
        let result = self.dispatcher.dispatch(&signal, &dispatch_ctx).await;
        outcome.signal = Some((signal, result));
        Ok(outcome)
    }

    /// Producers are synchronous and may shell out, so they run on the
    /// blocking pool. A worker panic loses the session's extraction history.
    async fn extract(
        &self,
        ctx: &mut SessionContext,
        source_frame: &SourceFrame,
    ) -> Result<FrameFeatures, ExtractionError> {
        let extractor = Arc::clone(&self.extractor);
        let mut extraction = std::mem::take(&mut ctx.extraction);
        let frame = source_frame.frame.clone();
        let index = source_frame.index;

        let (extraction, result) = tokio::task::spawn_blocking(move || {
            let result = extractor.extract(&mut extraction, &frame, index);
            (extraction, result)
        })
        .await
        .map_err(|e| ExtractionError::Worker(e.to_string()))?;

        ctx.extraction = extraction;
        result
    }

    /// Last number read off the screen, else the configured default
    fn reference_from_text(&self, features: &FrameFeatures) -> Option<Decimal> {
        features
            .text
            .last_number()
            .filter(|n| *n > 0.0)
            .and_then(|n| Decimal::try_from(n).ok())
            .or_else(|| Decimal::try_from(self.config.default_entry_price).ok())
    }
}
