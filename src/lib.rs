//! Vision Agent Library
//!
//! Turns chart and trading-tutorial frames into ENTER/EXIT signals:
//! features, sequence buffering, classification, gating and dispatch.

pub mod buffer;
pub mod classifier;
pub mod client;
pub mod config;
pub mod decision;
pub mod dispatch;
pub mod error;
pub mod features;
pub mod frame;
pub mod keywords;
pub mod observability;
pub mod pipeline;
pub mod runner;
pub mod session;
pub mod signal;
pub mod source;
pub mod state;


// Re-export main types for convenience
pub use buffer::SequenceBuffer;
pub use classifier::{ActionProbabilities, HttpClassifier, SequenceClassifier};
pub use client::BackendClient;
pub use config::{AgentConfig, AgentMode, DirectionPolicy, FeedKind, FEATURE_DIM};
pub use decision::DecisionEngine;
pub use dispatch::{DispatchOutcome, Dispatcher, SignalPayload, SignalSink, SinkResponse};
pub use error::{ClassifierError, ConfigError, ExtractionError, SessionError, SourceError};
pub use features::{FeatureExtractor, FeatureVector, FrameFeatures};
pub use frame::{Frame, GrayFrame};
pub use observability::{metrics, MetricsCollector};
pub use pipeline::{FrameOutcome, Pipeline, SessionContext};
pub use runner::AgentRunner;
pub use session::{SessionKind, SessionRegistry, SessionState, SessionStatus, SessionTracker};
pub use signal::{Action, Direction, Signal};
pub use source::{FrameSource, SourceFrame, SourceInfo};
pub use state::FileSessionRegistry;
