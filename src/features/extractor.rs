//! Frame feature extraction
//!
//! The extractor itself is stateless and shared across sessions. Everything
//! that depends on history (previous grey frame, cached OCR output, last
//! frame index) lives in an [`ExtractionContext`] owned by one session.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::producers::{
    changed_regions, classify_gesture, BlockMatchingFlow, EdgeRunLineDetector, HandDetector,
    LineDetector, MotionEstimator, ObjectDetector, TesseractCli, TextRecognizer,
};
use super::{
    ArrowFeatures, DrawingFeatures, FeatureVector, FrameFeatures, HandFeatures, MotionFeatures,
    TextFeatures, MAX_HANDS,
};
use crate::config::AgentConfig;
use crate::error::ExtractionError;
use crate::frame::{Frame, GrayFrame};
use crate::keywords::KeywordMatcher;

const DIFF_THRESHOLD: u8 = 30;
const MIN_REGION_AREA: usize = 100;
const MOTION_THRESHOLD: f32 = 1.0;

/// Per-session extraction state
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    previous: Option<GrayFrame>,
    text_cache: Arc<TextFeatures>,
    last_index: Option<u64>,
    ocr_runs: u64,
}

impl ExtractionContext {
    pub fn new() -> Self {
        Self {
            previous: None,
            text_cache: Arc::new(TextFeatures::default()),
            last_index: None,
            ocr_runs: 0,
        }
    }

    /// Drop all history. Must be called whenever the sequence buffer is cleared.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn has_previous_frame(&self) -> bool {
        self.previous.is_some()
    }

    /// OCR invocations since the last reset
    pub fn ocr_runs(&self) -> u64 {
        self.ocr_runs
    }

    pub fn cached_text(&self) -> &Arc<TextFeatures> {
        &self.text_cache
    }
}

impl Default for ExtractionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns raw frames into [`FrameFeatures`] and [`FeatureVector`]s
pub struct FeatureExtractor {
    hands: Option<Arc<dyn HandDetector>>,
    lines: Option<Arc<dyn LineDetector>>,
    text: Option<Arc<dyn TextRecognizer>>,
    objects: Option<Arc<dyn ObjectDetector>>,
    motion: Option<Arc<dyn MotionEstimator>>,
    keywords: KeywordMatcher,
    frame_step: u64,
    ocr_interval: u64,
    object_confidence: f32,
}

impl FeatureExtractor {
    /// Extractor with no producers: every block stays empty until one is attached
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            hands: None,
            lines: None,
            text: None,
            objects: None,
            motion: None,
            keywords: KeywordMatcher::new(&config.keywords),
            frame_step: config.frame_step.max(1),
            ocr_interval: config.ocr_interval.max(1),
            object_confidence: config.object_confidence,
        }
    }

    /// Extractor with the built-in line, OCR and motion producers
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config)
            .with_line_detector(Arc::new(EdgeRunLineDetector::default()))
            .with_text_recognizer(Arc::new(TesseractCli::new(
                config.tesseract_path.as_deref(),
                &config.ocr_lang,
                Duration::from_secs(config.ocr_timeout_secs),
            )))
            .with_motion_estimator(Arc::new(BlockMatchingFlow::default()))
    }

    pub fn with_hand_detector(mut self, detector: Arc<dyn HandDetector>) -> Self {
        self.hands = Some(detector);
        self
    }

    pub fn with_line_detector(mut self, detector: Arc<dyn LineDetector>) -> Self {
        self.lines = Some(detector);
        self
    }

    pub fn with_text_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.text = Some(recognizer);
        self
    }

    pub fn with_object_detector(mut self, detector: Arc<dyn ObjectDetector>) -> Self {
        self.objects = Some(detector);
        self
    }

    pub fn with_motion_estimator(mut self, estimator: Arc<dyn MotionEstimator>) -> Self {
        self.motion = Some(estimator);
        self
    }

    pub fn keywords(&self) -> &KeywordMatcher {
        &self.keywords
    }

    /// OCR runs on every `ocr_interval`-th processed frame
    pub fn should_run_ocr(&self, frame_index: u64) -> bool {
        (frame_index / self.frame_step) % self.ocr_interval == 0
    }

    /// Extract all feature blocks from one frame.
    ///
    /// Only a malformed frame or an index that does not advance is an error;
    /// a failing producer degrades its own block to the empty default.
    pub fn extract(
        &self,
        ctx: &mut ExtractionContext,
        frame: &Frame,
        frame_index: u64,
    ) -> Result<FrameFeatures, ExtractionError> {
        frame.validate()?;
        if let Some(previous) = ctx.last_index {
            if frame_index <= previous {
                return Err(ExtractionError::NonMonotonicIndex {
                    previous,
                    current: frame_index,
                });
            }
        }

        let gray = frame.to_gray();

        let hands = self.extract_hands(frame, frame_index);
        let drawings = self.extract_drawings(ctx.previous.as_ref(), &gray, frame_index);
        let text = self.extract_text(ctx, &gray, frame_index);
        let arrows = self.extract_arrows(frame, frame_index);
        let motion = self.extract_motion(ctx.previous.as_ref(), &gray, frame_index);

        ctx.previous = Some(gray);
        ctx.last_index = Some(frame_index);

        Ok(FrameFeatures {
            frame_index,
            hands,
            drawings,
            text,
            arrows,
            motion,
        })
    }

    /// Encode features with this extractor's keyword sets
    pub fn vectorize(&self, features: &FrameFeatures) -> FeatureVector {
        FeatureVector::from_features(features, &self.keywords)
    }

    fn extract_hands(&self, frame: &Frame, frame_index: u64) -> HandFeatures {
        let Some(detector) = &self.hands else {
            return HandFeatures::default();
        };
        match detector.detect(frame) {
            Ok(mut landmarks) => {
                landmarks.truncate(MAX_HANDS);
                let gestures = landmarks.iter().map(classify_gesture).collect();
                HandFeatures {
                    detected: !landmarks.is_empty(),
                    count: landmarks.len(),
                    landmarks,
                    gestures,
                }
            }
            Err(e) => {
                debug!("Hand detection failed on frame {}: {}", frame_index, e);
                HandFeatures::default()
            }
        }
    }

    fn extract_drawings(
        &self,
        previous: Option<&GrayFrame>,
        gray: &GrayFrame,
        frame_index: u64,
    ) -> DrawingFeatures {
        let line_count = match &self.lines {
            Some(detector) => detector.count_lines(gray).unwrap_or_else(|e| {
                debug!("Line detection failed on frame {}: {}", frame_index, e);
                0
            }),
            None => 0,
        };

        let (changes, areas) = match previous {
            Some(prev) => changed_regions(prev, gray, DIFF_THRESHOLD, MIN_REGION_AREA),
            None => (0, Vec::new()),
        };

        DrawingFeatures {
            lines_detected: line_count > 0,
            line_count,
            changes,
            areas,
        }
    }

    fn extract_text(
        &self,
        ctx: &mut ExtractionContext,
        gray: &GrayFrame,
        frame_index: u64,
    ) -> Arc<TextFeatures> {
        let Some(recognizer) = &self.text else {
            return Arc::clone(&ctx.text_cache);
        };
        if !self.should_run_ocr(frame_index) {
            return Arc::clone(&ctx.text_cache);
        }

        ctx.ocr_runs += 1;
        let text = match recognizer.recognize(gray) {
            Ok(raw) => TextFeatures::from_text(&raw),
            Err(e) => {
                debug!("OCR failed on frame {}: {}", frame_index, e);
                TextFeatures::default()
            }
        };
        ctx.text_cache = Arc::new(text);
        Arc::clone(&ctx.text_cache)
    }

    fn extract_arrows(&self, frame: &Frame, frame_index: u64) -> ArrowFeatures {
        let Some(detector) = &self.objects else {
            return ArrowFeatures::default();
        };
        match detector.detect(frame) {
            Ok(detections) => {
                let confidences: Vec<f32> = detections
                    .iter()
                    .map(|d| d.confidence)
                    .filter(|&c| c >= self.object_confidence)
                    .collect();
                ArrowFeatures {
                    detected: !detections.is_empty(),
                    count: detections.len(),
                    confidences,
                }
            }
            Err(e) => {
                debug!("Object detection failed on frame {}: {}", frame_index, e);
                ArrowFeatures::default()
            }
        }
    }

    fn extract_motion(
        &self,
        previous: Option<&GrayFrame>,
        gray: &GrayFrame,
        frame_index: u64,
    ) -> MotionFeatures {
        let (Some(estimator), Some(prev)) = (&self.motion, previous) else {
            return MotionFeatures::default();
        };
        match estimator.magnitude(prev, gray) {
            Ok(magnitude) if magnitude.is_finite() => MotionFeatures {
                detected: magnitude > MOTION_THRESHOLD,
                magnitude,
            },
            Ok(_) => MotionFeatures::default(),
            Err(e) => {
                debug!("Motion estimation failed on frame {}: {}", frame_index, e);
                MotionFeatures::default()
            }
        }
    }
}
