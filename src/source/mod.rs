//! Frame sources: recorded video and live-rendered charts

pub mod chart;
pub mod feed;
pub mod video;

use async_trait::async_trait;
use regex::Regex;
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::SourceError;
use crate::frame::Frame;

pub use chart::{ChartRenderer, LiveChartSource};
pub use feed::{BinanceKlinesFeed, Candle, PriceFeed, SyntheticFeed, TimeFrame};
pub use video::{RawFrameReader, VideoFileSource};

/// One frame with its absolute index in the source
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub index: u64,
    pub frame: Frame,
}

/// Static description of a source, known once it is opened
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    /// Path, URL or symbol
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// `None` for unbounded sources
    pub total_frames: Option<u64>,
    pub duration_secs: Option<f64>,
    /// Asset traded from this source, when the source knows it
    pub asset: Option<String>,
}

/// Pull-based frame producer. Indices are strictly increasing; `Ok(None)` is end of stream.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError>;

    fn info(&self) -> &SourceInfo;

    /// Latest market price known to the source
    fn reference_price(&self) -> Option<Decimal> {
        None
    }

    fn is_live(&self) -> bool {
        false
    }
}

/// Session id for an input: the 11-character id of a YouTube-style URL,
/// the file stem of a local path, otherwise a sanitised copy of the input.
pub fn session_id_for(input: &str) -> String {
    let input = input.trim();

    if input.contains("://") {
        if let Some(id) = youtube_id(input) {
            return id.to_string();
        }
        let last = input
            .split(['?', '#'])
            .next()
            .unwrap_or(input)
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(input);
        return sanitize(last);
    }

    let stem = Path::new(input)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(input);
    sanitize(stem)
}

static YOUTUBE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:v=|/)([0-9A-Za-z_-]{11})").expect("valid regex"));

/// First 11 id characters following `v=` or a `/`
fn youtube_id(url: &str) -> Option<&str> {
    YOUTUBE_ID_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if is_id_char(c) { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_from_youtube_urls() {
        assert_eq!(session_id_for("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), "dQw4w9WgXcQ");
        assert_eq!(session_id_for("https://youtu.be/dQw4w9WgXcQ?t=42"), "dQw4w9WgXcQ");
        assert_eq!(
            session_id_for("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ"),
            "dQw4w9WgXcQ"
        );
    }

    #[test]
    fn test_session_id_from_paths() {
        assert_eq!(session_id_for("/data/videos/btc scalping.mp4"), "btc_scalping");
        assert_eq!(session_id_for("clip.mkv"), "clip");
        assert_eq!(session_id_for("https://cdn.example.com/videos/lesson-3/"), "lesson-3");
    }

    #[test]
    fn test_session_id_takes_first_eleven_id_chars() {
        assert_eq!(session_id_for("https://host.tld/v/abcdefghijk12"), "abcdefghijk");
        assert_eq!(session_id_for("https://youtu.be/dQw4w9WgXcQXYZ"), "dQw4w9WgXcQ");
    }
}
