//! Error types for the vision agent core

use std::path::PathBuf;

/// Configuration errors, raised once at start-up
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid mode: {0}. Must be SHADOW, PAPER, or LIVE")]
    InvalidMode(String),

    #[error("confidence_threshold must be between 0.5 and 1.0 (got {0})")]
    ConfidenceOutOfRange(f64),

    #[error("{field} must be at least 1")]
    ZeroInterval { field: &'static str },

    #[error("risk_reward must be positive (got {0})")]
    InvalidRiskReward(f64),

    #[error("override_confidence must be in [{threshold}, 1.0] (got {value})")]
    OverrideConfidenceOutOfRange { value: f64, threshold: f64 },

    #[error("stop_distance_pct must be strictly between 0 and 1 (got {0})")]
    InvalidStopDistance(f64),

    #[error("min_video_duration_secs ({min}) exceeds max_video_duration_secs ({max})")]
    DurationBounds { min: u64, max: u64 },

    #[error("backend_url and backend_key are required in {0} mode")]
    MissingBackend(String),
}

/// Frame acquisition errors. Fatal to the current session only.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Video file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to download video: {0}")]
    Download(String),

    #[error("Failed to probe video: {0}")]
    Probe(String),

    #[error("Video too short: {duration}s < {min}s")]
    TooShort { duration: u64, min: u64 },

    #[error("Video too long: {duration}s > {max}s")]
    TooLong { duration: u64, max: u64 },

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Stream truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("Price feed error: {0}")]
    Feed(String),

    #[error("Failed to list playlist: {0}")]
    Playlist(String),

    #[error("Frame source ended unexpectedly")]
    UnexpectedEnd,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame-level extraction errors (not sub-extractor failures, which degrade silently)
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Malformed frame: {width}x{height} needs {expected} bytes, got {got}")]
    MalformedFrame {
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },

    #[error("Frame index went backwards: {previous} -> {current}")]
    NonMonotonicIndex { previous: u64, current: u64 },

    #[error("Extraction worker failed: {0}")]
    Worker(String),
}

/// Sequence classifier errors
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Classifier returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid classifier response: {0}")]
    InvalidResponse(String),

    #[error("Sequence shape mismatch: expected {expected} vectors, got {got}")]
    Shape { expected: usize, got: usize },
}

/// Session lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid session transition for {session_id}: {from} -> {to}")]
    InvalidTransition {
        session_id: String,
        from: String,
        to: String,
    },

    #[error("Live session {0} cannot complete through source exhaustion")]
    LiveExhaustion(String),
}
