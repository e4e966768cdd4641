//! Agent Configuration
//!
//! Built once at process start from an optional config file and `AGENT_*`
//! environment variables, validated, then shared read-only.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::source::feed::TimeFrame;

/// Fixed feature vector dimension
pub const FEATURE_DIM: usize = 128;

/// Default config file stem, resolved by the `config` crate (`.toml`, `.yaml`, `.json`)
const DEFAULT_CONFIG_FILE: &str = "vision-agent";

/// Operating mode: gates whether decisions leave the process
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(try_from = "String", into = "String")]
pub enum AgentMode {
    /// Signals are logged only
    #[default]
    Shadow,
    /// Signals go to the backend for simulated execution
    Paper,
    /// Signals go to the backend for real execution
    Live,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Shadow => "SHADOW",
            AgentMode::Paper => "PAPER",
            AgentMode::Live => "LIVE",
        }
    }

    /// Whether gated signals are sent to the backend
    pub fn dispatches(&self) -> bool {
        !matches!(self, AgentMode::Shadow)
    }
}

impl std::str::FromStr for AgentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SHADOW" => Ok(AgentMode::Shadow),
            "PAPER" => Ok(AgentMode::Paper),
            "LIVE" => Ok(AgentMode::Live),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for AgentMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AgentMode> for String {
    fn from(mode: AgentMode) -> Self {
        mode.as_str().to_string()
    }
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when the classifier alone says ENTER and no keyword fixed a direction
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DirectionPolicy {
    AssumeLong,
    AssumeShort,
    /// Degrade the signal to IGNORE
    Suppress,
}

/// Keyword sets for the heuristic override, matched case-insensitively
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct KeywordSets {
    #[serde(default = "default_buy_keywords")]
    pub buy: Vec<String>,
    #[serde(default = "default_sell_keywords")]
    pub sell: Vec<String>,
    #[serde(default = "default_exit_keywords")]
    pub exit: Vec<String>,
}

impl Default for KeywordSets {
    fn default() -> Self {
        Self {
            buy: default_buy_keywords(),
            sell: default_sell_keywords(),
            exit: default_exit_keywords(),
        }
    }
}

/// Which price feed drives the live chart
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    #[default]
    Binance,
    Synthetic,
}

/// Live-market loop configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LiveConfig {
    #[serde(default = "default_live_symbol")]
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: TimeFrame,
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
    #[serde(default)]
    pub feed: FeedKind,
    #[serde(default = "default_binance_url")]
    pub binance_url: String,
    #[serde(default = "default_chart_width")]
    pub chart_width: u32,
    #[serde(default = "default_chart_height")]
    pub chart_height: u32,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            symbol: default_live_symbol(),
            timeframe: default_timeframe(),
            candle_limit: default_candle_limit(),
            feed: FeedKind::default(),
            binance_url: default_binance_url(),
            chart_width: default_chart_width(),
            chart_height: default_chart_height(),
        }
    }
}

/// Complete agent configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub mode: AgentMode,

    // Backend (signal sink + session registry)
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub backend_key: Option<String>,
    #[serde(default)]
    pub user_id: String,

    // Sequence classifier
    #[serde(default)]
    pub classifier_url: Option<String>,
    #[serde(default = "default_model_version")]
    pub model_version: String,

    // Frame processing
    /// Process every N source frames
    #[serde(default = "default_frame_step")]
    pub frame_step: u64,
    /// Re-run OCR every N processed frames
    #[serde(default = "default_ocr_interval")]
    pub ocr_interval: u64,
    #[serde(default = "default_sequence_length")]
    pub sequence_length: usize,
    #[serde(default = "default_min_video_duration_secs")]
    pub min_video_duration_secs: u64,
    #[serde(default = "default_max_video_duration_secs")]
    pub max_video_duration_secs: u64,
    /// Assumed frame rate when the source does not report one
    #[serde(default = "default_fallback_fps")]
    pub fallback_fps: f64,

    // Feature producers
    #[serde(default = "default_ocr_lang")]
    pub ocr_lang: String,
    #[serde(default)]
    pub tesseract_path: Option<String>,
    /// Downloader used for remote videos and playlists
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,
    /// OCR runs longer than this are killed and read as no text
    #[serde(default = "default_ocr_timeout_secs")]
    pub ocr_timeout_secs: u64,
    #[serde(default = "default_object_confidence")]
    pub object_confidence: f32,

    // Decision
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_override_confidence")]
    pub override_confidence: f64,
    #[serde(default = "default_risk_reward")]
    pub risk_reward: f64,
    /// Placeholder risk unit as a fraction of entry price
    #[serde(default = "default_stop_distance_pct")]
    pub stop_distance_pct: f64,
    #[serde(default = "default_asset")]
    pub default_asset: String,
    #[serde(default = "default_entry_price")]
    pub default_entry_price: f64,
    #[serde(default = "default_max_signals_per_day")]
    pub max_signals_per_day: u32,
    #[serde(default = "default_video_direction_policy")]
    pub video_direction_policy: DirectionPolicy,
    #[serde(default = "default_live_direction_policy")]
    pub live_direction_policy: DirectionPolicy,
    #[serde(default)]
    pub keywords: KeywordSets,

    #[serde(default)]
    pub live: LiveConfig,

    // Process
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: AgentMode::default(),
            backend_url: None,
            backend_key: None,
            user_id: String::new(),
            classifier_url: None,
            model_version: default_model_version(),
            frame_step: default_frame_step(),
            ocr_interval: default_ocr_interval(),
            sequence_length: default_sequence_length(),
            min_video_duration_secs: default_min_video_duration_secs(),
            max_video_duration_secs: default_max_video_duration_secs(),
            fallback_fps: default_fallback_fps(),
            ocr_lang: default_ocr_lang(),
            tesseract_path: None,
            ytdlp_path: default_ytdlp_path(),
            ocr_timeout_secs: default_ocr_timeout_secs(),
            object_confidence: default_object_confidence(),
            confidence_threshold: default_confidence_threshold(),
            override_confidence: default_override_confidence(),
            risk_reward: default_risk_reward(),
            stop_distance_pct: default_stop_distance_pct(),
            default_asset: default_asset(),
            default_entry_price: default_entry_price(),
            max_signals_per_day: default_max_signals_per_day(),
            video_direction_policy: default_video_direction_policy(),
            live_direction_policy: default_live_direction_policy(),
            keywords: KeywordSets::default(),
            live: LiveConfig::default(),
            state_dir: default_state_dir(),
            log_level: default_log_level(),
        }
    }
}

impl AgentConfig {
    /// Load from `vision-agent.*` (or `VISION_AGENT_CONFIG`) and `AGENT_*` env vars.
    ///
    /// Nested keys use a double underscore, e.g. `AGENT_LIVE__SYMBOL`.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let file = std::env::var("VISION_AGENT_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(&file).required(false))
            .add_source(
                ::config::Environment::with_prefix("AGENT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AgentConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_decision()?;
        if self.frame_step == 0 {
            return Err(ConfigError::ZeroInterval { field: "frame_step" });
        }
        if self.ocr_interval == 0 {
            return Err(ConfigError::ZeroInterval { field: "ocr_interval" });
        }
        if self.sequence_length == 0 {
            return Err(ConfigError::ZeroInterval { field: "sequence_length" });
        }
        if self.ocr_timeout_secs == 0 {
            return Err(ConfigError::ZeroInterval { field: "ocr_timeout_secs" });
        }
        if self.min_video_duration_secs > self.max_video_duration_secs {
            return Err(ConfigError::DurationBounds {
                min: self.min_video_duration_secs,
                max: self.max_video_duration_secs,
            });
        }
        if self.mode.dispatches() && !self.has_backend() {
            return Err(ConfigError::MissingBackend(self.mode.to_string()));
        }
        Ok(())
    }

    /// Threshold and price parameters used by the decision engine
    pub fn validate_decision(&self) -> Result<(), ConfigError> {
        if !(0.5..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::ConfidenceOutOfRange(self.confidence_threshold));
        }
        if !(self.confidence_threshold..=1.0).contains(&self.override_confidence) {
            return Err(ConfigError::OverrideConfidenceOutOfRange {
                value: self.override_confidence,
                threshold: self.confidence_threshold,
            });
        }
        if self.risk_reward <= 0.0 || !self.risk_reward.is_finite() {
            return Err(ConfigError::InvalidRiskReward(self.risk_reward));
        }
        if !(self.stop_distance_pct > 0.0 && self.stop_distance_pct < 1.0) {
            return Err(ConfigError::InvalidStopDistance(self.stop_distance_pct));
        }
        Ok(())
    }

    pub fn has_backend(&self) -> bool {
        matches!(
            (&self.backend_url, &self.backend_key),
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty()
        )
    }

    /// Periodic session update cadence, in source frames
    pub fn progress_every(&self) -> u64 {
        self.frame_step * 10
    }

    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

fn default_model_version() -> String { "model_seq_v20251125".to_string() }
fn default_frame_step() -> u64 { 5 }
fn default_ocr_interval() -> u64 { 10 }
fn default_sequence_length() -> usize { 30 }
fn default_min_video_duration_secs() -> u64 { 60 }
fn default_max_video_duration_secs() -> u64 { 3600 }
fn default_fallback_fps() -> f64 { 30.0 }
fn default_ocr_lang() -> String { "eng+por".to_string() }
fn default_ocr_timeout_secs() -> u64 { 10 }
fn default_ytdlp_path() -> String { "yt-dlp".to_string() }
fn default_object_confidence() -> f32 { 0.5 }
fn default_confidence_threshold() -> f64 { 0.70 }
fn default_override_confidence() -> f64 { 0.95 }
fn default_risk_reward() -> f64 { 2.0 }
fn default_stop_distance_pct() -> f64 { 0.01 }
fn default_asset() -> String { "BTCUSDT".to_string() }
fn default_entry_price() -> f64 { 50_000.0 }
fn default_max_signals_per_day() -> u32 { 50 }
fn default_video_direction_policy() -> DirectionPolicy { DirectionPolicy::AssumeLong }
fn default_live_direction_policy() -> DirectionPolicy { DirectionPolicy::Suppress }
fn default_log_level() -> String { "INFO".to_string() }
fn default_live_symbol() -> String { "BTCUSDT".to_string() }
fn default_timeframe() -> TimeFrame { TimeFrame::Minute1 }
fn default_candle_limit() -> usize { 100 }
fn default_binance_url() -> String { "https://api.binance.com".to_string() }
fn default_chart_width() -> u32 { 640 }
fn default_chart_height() -> u32 { 360 }

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vision-agent")
}

fn default_buy_keywords() -> Vec<String> {
    ["buy", "enter", "long", "compra", "comprar", "entrar"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_sell_keywords() -> Vec<String> {
    ["sell", "short", "venda", "vender"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_exit_keywords() -> Vec<String> {
    ["exit", "close", "fechar", "sair"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
