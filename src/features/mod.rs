//! Per-frame feature records and the fixed-length feature vector

pub mod extractor;
pub mod producers;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

use crate::config::FEATURE_DIM;
use crate::keywords::KeywordMatcher;

pub use extractor::{ExtractionContext, FeatureExtractor};

/// Landmarks per hand as produced by the hand detector
pub const HAND_LANDMARKS: usize = 21;
/// Hands kept per frame
pub const MAX_HANDS: usize = 2;

// Vector layout
pub const HANDS_OFFSET: usize = 0;
pub const HANDS_LEN: usize = HAND_LANDMARKS * 3;
pub const DRAWINGS_OFFSET: usize = HANDS_OFFSET + HANDS_LEN;
pub const DRAWINGS_LEN: usize = 5;
pub const TEXT_OFFSET: usize = DRAWINGS_OFFSET + DRAWINGS_LEN;
pub const TEXT_LEN: usize = 5;
pub const ARROWS_OFFSET: usize = TEXT_OFFSET + TEXT_LEN;
pub const ARROWS_LEN: usize = 3;
pub const MOTION_OFFSET: usize = ARROWS_OFFSET + ARROWS_LEN;
pub const MOTION_LEN: usize = 2;
/// Meaningful prefix; the rest of the vector is zero padding
pub const USED_DIM: usize = MOTION_OFFSET + MOTION_LEN;

// Normalisation ceilings
const MAX_LINES: f32 = 100.0;
const MAX_CHANGES: f32 = 50.0;
const MAX_MEAN_AREA: f32 = 1000.0;
const MAX_AREAS: f32 = 10.0;
const MAX_WORDS: f32 = 10.0;
const MAX_NUMBERS: f32 = 5.0;
const MAX_ARROWS: f32 = 10.0;
const MAX_MAGNITUDE: f32 = 10.0;

/// One hand: 21 (x, y, z) landmarks in normalised image coordinates
pub type HandLandmarks = Vec<[f32; 3]>;

/// Coarse hand gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gesture {
    Pointing,
    Open,
    Closed,
    Unknown,
}

impl std::fmt::Display for Gesture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gesture::Pointing => write!(f, "pointing"),
            Gesture::Open => write!(f, "open"),
            Gesture::Closed => write!(f, "closed"),
            Gesture::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandFeatures {
    pub detected: bool,
    pub count: usize,
    pub landmarks: Vec<HandLandmarks>,
    pub gestures: Vec<Gesture>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawingFeatures {
    pub lines_detected: bool,
    pub line_count: usize,
    /// Number of changed regions against the previous frame
    pub changes: usize,
    /// Areas (px) of changed regions above the noise floor
    pub areas: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextFeatures {
    pub detected: bool,
    pub text: String,
    pub words: Vec<String>,
    /// Numeric tokens, candidate price levels
    pub numbers: Vec<f64>,
}

impl TextFeatures {
    /// Tokenise raw OCR output
    pub fn from_text(raw: &str) -> Self {
        let text = raw.trim();
        if text.is_empty() {
            return Self::default();
        }
        Self {
            detected: true,
            text: text.to_string(),
            words: text.split_whitespace().map(str::to_string).collect(),
            numbers: parse_numbers(text),
        }
    }

    /// Most recent numeric token, used as a reference price
    pub fn last_number(&self) -> Option<f64> {
        self.numbers.last().copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrowFeatures {
    pub detected: bool,
    pub count: usize,
    /// Confidences of detections at or above the configured floor
    pub confidences: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionFeatures {
    pub detected: bool,
    pub magnitude: f32,
}

/// Everything detected in one frame. Every block is always present.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFeatures {
    pub frame_index: u64,
    pub hands: HandFeatures,
    pub drawings: DrawingFeatures,
    /// Shared with the OCR cache, so skipped frames hold the same allocation
    pub text: Arc<TextFeatures>,
    pub arrows: ArrowFeatures,
    pub motion: MotionFeatures,
}

impl FrameFeatures {
    /// All blocks empty
    pub fn empty(frame_index: u64) -> Self {
        Self {
            frame_index,
            hands: HandFeatures::default(),
            drawings: DrawingFeatures::default(),
            text: Arc::new(TextFeatures::default()),
            arrows: ArrowFeatures::default(),
            motion: MotionFeatures::default(),
        }
    }

    pub fn summary(&self) -> FeaturesSummary {
        FeaturesSummary {
            hands_detected: self.hands.detected,
            hand_count: self.hands.count,
            lines_detected: self.drawings.lines_detected,
            line_count: self.drawings.line_count,
            text_detected: self.text.detected,
            text_words: self.text.words.len(),
            arrows_detected: self.arrows.detected,
            motion_detected: self.motion.detected,
        }
    }
}

/// Compact view of a frame's features sent along with signals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturesSummary {
    pub hands_detected: bool,
    pub hand_count: usize,
    pub lines_detected: bool,
    pub line_count: usize,
    pub text_detected: bool,
    pub text_words: usize,
    pub arrows_detected: bool,
    pub motion_detected: bool,
}

/// Fixed-length numeric encoding of one frame. Always `FEATURE_DIM` long.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Box<[f32]>,
}

impl FeatureVector {
    /// Pad with zeros or truncate to `FEATURE_DIM`
    pub fn from_values(mut values: Vec<f32>) -> Self {
        values.resize(FEATURE_DIM, 0.0);
        Self {
            values: values.into_boxed_slice(),
        }
    }

    pub fn zeros() -> Self {
        Self::from_values(Vec::new())
    }

    /// Deterministic assembly from structured features
    pub fn from_features(features: &FrameFeatures, keywords: &KeywordMatcher) -> Self {
        let mut v = Vec::with_capacity(FEATURE_DIM);

        // Hands: first hand's landmarks, zero-padded
        let mut hands = [0.0f32; HANDS_LEN];
        if features.hands.detected {
            if let Some(first) = features.hands.landmarks.first() {
                for (slot, value) in hands
                    .iter_mut()
                    .zip(first.iter().flat_map(|p| p.iter().copied()))
                {
                    *slot = finite_or_zero(value);
                }
            }
        }
        v.extend_from_slice(&hands);

        // Drawings
        let d = &features.drawings;
        v.push(flag(d.lines_detected));
        v.push(capped(d.line_count as f32, MAX_LINES));
        v.push(capped(d.changes as f32, MAX_CHANGES));
        v.push(capped(mean_f64(&d.areas) as f32, MAX_MEAN_AREA));
        v.push(capped(d.areas.len() as f32, MAX_AREAS));

        // Text
        let t = &features.text;
        v.push(flag(t.detected));
        v.push(capped(t.words.len() as f32, MAX_WORDS));
        v.push(capped(t.numbers.len() as f32, MAX_NUMBERS));
        v.push(flag(keywords.has_buy(&t.words)));
        v.push(flag(keywords.has_sell_or_exit(&t.words)));

        // Arrows
        let a = &features.arrows;
        v.push(flag(a.detected));
        v.push(capped(a.count as f32, MAX_ARROWS));
        v.push(mean_f32(&a.confidences).clamp(0.0, 1.0));

        // Motion
        let m = &features.motion;
        v.push(flag(m.detected));
        v.push(capped(m.magnitude, MAX_MAGNITUDE));

        debug_assert_eq!(v.len(), USED_DIM);
        Self::from_values(v)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn block(&self, offset: usize, len: usize) -> &[f32] {
        &self.values[offset..offset + len]
    }
}

fn flag(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Cap at `ceiling`, then divide by it; negatives and NaN become 0
fn capped(value: f32, ceiling: f32) -> f32 {
    finite_or_zero(value).clamp(0.0, ceiling) / ceiling
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn mean_f32(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    finite_or_zero(values.iter().sum::<f32>() / values.len() as f32)
}

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.?\d*").expect("valid regex"));

/// Every `\d+\.?\d*` token, in reading order
pub fn parse_numbers(text: &str) -> Vec<f64> {
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().trim_end_matches('.').parse::<f64>().ok())
        .collect()
}
