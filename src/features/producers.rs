//! Pluggable feature producers
//!
//! Each producer is a black box behind a small trait. A producer error only
//! empties its own feature block; the extractor keeps going.

use anyhow::Context;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Gesture, HandLandmarks};
use crate::frame::{Frame, GrayFrame};

/// Hand landmark detector (21 points per hand)
pub trait HandDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<HandLandmarks>>;
}

/// Straight line detector over a grey frame
pub trait LineDetector: Send + Sync {
    fn count_lines(&self, gray: &GrayFrame) -> anyhow::Result<usize>;
}

/// OCR engine
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, gray: &GrayFrame) -> anyhow::Result<String>;
}

/// One object detection (arrows and other chart annotations)
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
}

pub trait ObjectDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<Detection>>;
}

/// Dense motion estimate between two consecutive grey frames
pub trait MotionEstimator: Send + Sync {
    fn magnitude(&self, previous: &GrayFrame, current: &GrayFrame) -> anyhow::Result<f32>;
}

// Landmark indices (tip, middle joint) for index, middle, ring, pinky
const FINGERS: [(usize, usize); 4] = [(8, 6), (12, 10), (16, 14), (20, 18)];

/// Label a hand from its landmarks. Image y grows downwards, so an
/// extended finger has its tip above its middle joint.
pub fn classify_gesture(landmarks: &HandLandmarks) -> Gesture {
    if landmarks.len() < 21 {
        return Gesture::Unknown;
    }
    let extended: Vec<bool> = FINGERS
        .iter()
        .map(|&(tip, pip)| landmarks[tip][1] < landmarks[pip][1])
        .collect();

    match extended.as_slice() {
        [true, false, false, false] => Gesture::Pointing,
        [true, true, true, true] => Gesture::Open,
        [false, false, false, false] => Gesture::Closed,
        _ => Gesture::Unknown,
    }
}

/// Counts long horizontal and vertical runs of strong intensity steps.
///
/// A cheap stand-in for Canny + probabilistic Hough on chart screenshots,
/// where drawn lines are mostly axis-aligned.
#[derive(Debug, Clone)]
pub struct EdgeRunLineDetector {
    pub gradient_threshold: u8,
    pub min_length: u32,
}

impl Default for EdgeRunLineDetector {
    fn default() -> Self {
        Self {
            gradient_threshold: 50,
            min_length: 30,
        }
    }
}

impl EdgeRunLineDetector {
    fn is_edge(&self, a: u8, b: u8) -> bool {
        a.abs_diff(b) >= self.gradient_threshold
    }

    fn count_runs(&self, edges: impl Iterator<Item = bool>) -> usize {
        let mut count = 0;
        let mut run = 0u32;
        for edge in edges.chain(std::iter::once(false)) {
            if edge {
                run += 1;
            } else {
                if run >= self.min_length {
                    count += 1;
                }
                run = 0;
            }
        }
        count
    }
}

impl LineDetector for EdgeRunLineDetector {
    fn count_lines(&self, gray: &GrayFrame) -> anyhow::Result<usize> {
        let (w, h) = (gray.width, gray.height);
        if w < 2 || h < 2 {
            return Ok(0);
        }
        let mut lines = 0;

        // Horizontal lines: step between row y and y + 1
        for y in 0..h - 1 {
            let edges = (0..w).map(|x| self.is_edge(gray.get(x, y), gray.get(x, y + 1)));
            lines += self.count_runs(edges);
        }
        // Vertical lines: step between column x and x + 1
        for x in 0..w - 1 {
            let edges = (0..h).map(|y| self.is_edge(gray.get(x, y), gray.get(x + 1, y)));
            lines += self.count_runs(edges);
        }
        Ok(lines)
    }
}

/// Changed regions between two grey frames: `(component count, areas above min_area)`
pub fn changed_regions(
    previous: &GrayFrame,
    current: &GrayFrame,
    threshold: u8,
    min_area: usize,
) -> (usize, Vec<f64>) {
    if !previous.same_shape(current) {
        return (0, Vec::new());
    }
    let (w, h) = (current.width as usize, current.height as usize);
    let mut mask: Vec<bool> = previous
        .data
        .iter()
        .zip(&current.data)
        .map(|(&a, &b)| a.abs_diff(b) > threshold)
        .collect();

    let mut components = 0;
    let mut areas = Vec::new();
    let mut stack = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] {
            continue;
        }
        components += 1;
        mask[start] = false;
        stack.push(start);
        let mut area = 0usize;

        while let Some(idx) = stack.pop() {
            area += 1;
            let (x, y) = (idx % w, idx / w);
            let mut visit = |n: usize| {
                if mask[n] {
                    mask[n] = false;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < w {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - w);
            }
            if y + 1 < h {
                visit(idx + w);
            }
        }

        if area > min_area {
            areas.push(area as f64);
        }
    }
    (components, areas)
}

/// Shells out to the `tesseract` binary, feeding a binarised PGM on stdin.
///
/// Must be called off the async workers (the extractor runs under
/// `spawn_blocking`). A run longer than `timeout` is killed.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: String,
    lang: String,
    timeout: Duration,
}

impl TesseractCli {
    pub fn new(binary: Option<&str>, lang: &str, timeout: Duration) -> Self {
        Self {
            binary: binary.unwrap_or("tesseract").to_string(),
            lang: lang.to_string(),
            timeout,
        }
    }

    async fn run(&self, image: Vec<u8>) -> anyhow::Result<String> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.lang, "--psm", "6"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.binary))?;

        let mut stdin = child.stdin.take().context("tesseract stdin not piped")?;
        let feed = async move {
            stdin.write_all(&image).await?;
            stdin.shutdown().await
        };

        let (_, output) = tokio::time::timeout(self.timeout, async {
            tokio::try_join!(feed, child.wait_with_output())
        })
        .await
        .map_err(|_| anyhow::anyhow!("tesseract timed out after {:?}", self.timeout))??;

        if !output.status.success() {
            anyhow::bail!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TextRecognizer for TesseractCli {
    fn recognize(&self, gray: &GrayFrame) -> anyhow::Result<String> {
        let image = gray.binarize_otsu().to_pgm();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.block_on(self.run(image)),
            Err(_) => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(self.run(image)),
        }
    }
}

/// Block-matching flow: mean best-match displacement over a grid of blocks
#[derive(Debug, Clone)]
pub struct BlockMatchingFlow {
    pub block_size: u32,
    pub search_radius: i32,
}

impl Default for BlockMatchingFlow {
    fn default() -> Self {
        Self {
            block_size: 16,
            search_radius: 4,
        }
    }
}

impl BlockMatchingFlow {
    /// Sum of absolute differences for one `size` block displaced by `(dx, dy)`
    fn sad(
        prev: &GrayFrame,
        cur: &GrayFrame,
        size: u32,
        bx: u32,
        by: u32,
        dx: i32,
        dy: i32,
    ) -> u64 {
        let mut total = 0u64;
        for y in 0..size {
            for x in 0..size {
                let px = prev.get(bx + x, by + y);
                let cx = (bx + x) as i32 + dx;
                let cy = (by + y) as i32 + dy;
                total += px.abs_diff(cur.get(cx as u32, cy as u32)) as u64;
            }
        }
        total
    }
}

impl MotionEstimator for BlockMatchingFlow {
    fn magnitude(&self, previous: &GrayFrame, current: &GrayFrame) -> anyhow::Result<f32> {
        if !previous.same_shape(current) {
            anyhow::bail!(
                "frame size changed: {}x{} -> {}x{}",
                previous.width,
                previous.height,
                current.width,
                current.height
            );
        }
        let r = self.search_radius.max(0);
        let bs = self.block_size.max(1);
        let (w, h) = (current.width as i32, current.height as i32);

        let mut sum = 0.0f32;
        let mut blocks = 0u32;

        let mut by = r as u32;
        while (by + bs) as i32 + r <= h {
            let mut bx = r as u32;
            while (bx + bs) as i32 + r <= w {
                // Ties keep the zero displacement
                let mut best = (Self::sad(previous, current, bs, bx, by, 0, 0), 0i32, 0i32);
                for dy in -r..=r {
                    for dx in -r..=r {
                        if best.0 == 0 {
                            break;
                        }
                        let cost = Self::sad(previous, current, bs, bx, by, dx, dy);
                        if cost < best.0 {
                            best = (cost, dx, dy);
                        }
                    }
                }
                sum += ((best.1 * best.1 + best.2 * best.2) as f32).sqrt();
                blocks += 1;
                bx += bs;
            }
            by += bs;
        }

        if blocks == 0 {
            return Ok(0.0);
        }
        Ok(sum / blocks as f32)
    }
}
