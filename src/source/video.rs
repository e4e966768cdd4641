//! Recorded video source
//!
//! `ffprobe` for metadata, `ffmpeg` decoding to raw BGR24 on stdout, and
//! `yt-dlp` for remote inputs (single downloads and playlist listings).

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{info, warn};

use super::{FrameSource, SourceFrame, SourceInfo};
use crate::config::AgentConfig;
use crate::error::SourceError;
use crate::frame::Frame;

/// Reads consecutive BGR24 frames and yields every `frame_step`-th one
pub struct RawFrameReader<R> {
    reader: R,
    width: u32,
    height: u32,
    frame_step: u64,
    next_index: u64,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> RawFrameReader<R> {
    pub fn new(reader: R, width: u32, height: u32, frame_step: u64) -> Self {
        Self {
            reader,
            width,
            height,
            frame_step: frame_step.max(1),
            next_index: 0,
            buf: vec![0; Frame::byte_len(width, height)],
        }
    }

    /// Frames read so far, skipped ones included
    pub fn frames_read(&self) -> u64 {
        self.next_index
    }

    pub async fn next(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        loop {
            let got = self.fill().await?;
            if got == 0 {
                return Ok(None);
            }
            if got < self.buf.len() {
                return Err(SourceError::Truncated {
                    expected: self.buf.len(),
                    got,
                });
            }

            let index = self.next_index;
            self.next_index += 1;
            if index % self.frame_step == 0 {
                return Ok(Some(SourceFrame {
                    index,
                    frame: Frame::new(self.width, self.height, self.buf.clone()),
                }));
            }
        }
    }

    /// Read one frame's worth of bytes; short only at end of stream
    async fn fill(&mut self) -> Result<usize, SourceError> {
        let mut filled = 0;
        while filled < self.buf.len() {
            let n = self.reader.read(&mut self.buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// Metadata reported by `ffprobe`
#[derive(Debug, Clone, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: Option<u64>,
    pub duration_secs: f64,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// "30000/1001" or "25"
fn parse_rate(raw: &str) -> Option<f64> {
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => raw.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Parse `ffprobe -of json` output
pub fn parse_probe(json: &str, fallback_fps: f64) -> Result<VideoProbe, SourceError> {
    let out: ProbeOutput =
        serde_json::from_str(json).map_err(|e| SourceError::Probe(e.to_string()))?;
    let stream = out
        .streams
        .first()
        .ok_or_else(|| SourceError::Probe("no video stream".to_string()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(SourceError::Probe("missing frame size".to_string())),
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(fallback_fps);

    let duration_secs = out
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(stream.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok())
        .ok_or_else(|| SourceError::Probe("missing duration".to_string()))?;

    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.trim().parse::<u64>().ok())
        .filter(|&n| n > 0)
        .or_else(|| Some((duration_secs * fps).round() as u64));

    Ok(VideoProbe {
        width,
        height,
        fps,
        total_frames,
        duration_secs,
    })
}

/// Reject videos outside the configured duration window
pub fn validate_duration(duration_secs: f64, min: u64, max: u64) -> Result<(), SourceError> {
    let duration = duration_secs.round() as u64;
    if duration < min {
        return Err(SourceError::TooShort { duration, min });
    }
    if duration > max {
        return Err(SourceError::TooLong { duration, max });
    }
    Ok(())
}

/// Local video file decoded through `ffmpeg`
pub struct VideoFileSource {
    reader: RawFrameReader<ChildStdout>,
    child: Child,
    info: SourceInfo,
    finished: bool,
}

impl VideoFileSource {
    pub async fn open(path: &Path, config: &AgentConfig) -> Result<Self, SourceError> {
        if !path.exists() {
            return Err(SourceError::NotFound(path.to_path_buf()));
        }

        let probe = probe(path, config.fallback_fps).await?;
        validate_duration(
            probe.duration_secs,
            config.min_video_duration_secs,
            config.max_video_duration_secs,
        )?;

        info!(
            "Processing video: {} frames @ {:.2} FPS ({}x{}, {:.0}s)",
            probe.total_frames.unwrap_or(0),
            probe.fps,
            probe.width,
            probe.height,
            probe.duration_secs
        );

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "bgr24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::Decoder(format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Decoder("ffmpeg stdout unavailable".to_string()))?;

        Ok(Self {
            reader: RawFrameReader::new(stdout, probe.width, probe.height, config.frame_step),
            child,
            info: SourceInfo {
                label: path.display().to_string(),
                width: probe.width,
                height: probe.height,
                fps: probe.fps,
                total_frames: probe.total_frames,
                duration_secs: Some(probe.duration_secs),
                asset: None,
            },
            finished: false,
        })
    }
}

#[async_trait]
impl FrameSource for VideoFileSource {
    async fn next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        if self.finished {
            return Ok(None);
        }
        match self.reader.next().await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => {
                self.finished = true;
                let status = self.child.wait().await?;
                if !status.success() {
                    return Err(SourceError::Decoder(format!("ffmpeg exited with {}", status)));
                }
                info!("Decoded {} frames from {}", self.reader.frames_read(), self.info.label);
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }

    fn info(&self) -> &SourceInfo {
        &self.info
    }
}

async fn probe(path: &Path, fallback_fps: f64) -> Result<VideoProbe, SourceError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames,duration:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| SourceError::Probe(format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(SourceError::Probe(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    parse_probe(&String::from_utf8_lossy(&output.stdout), fallback_fps)
}

/// Local path for an input: remote URLs are downloaded once into
/// `{state_dir}/videos/{session_id}/video.mp4`
pub async fn resolve_input(
    input: &str,
    state_dir: &Path,
    session_id: &str,
    ytdlp: &str,
) -> Result<PathBuf, SourceError> {
    if !(input.starts_with("http://") || input.starts_with("https://")) {
        return Ok(PathBuf::from(input));
    }

    let dir = state_dir.join("videos").join(session_id);
    let target = dir.join("video.mp4");
    if target.exists() {
        info!("Video already downloaded: {}", session_id);
        return Ok(target);
    }
    tokio::fs::create_dir_all(&dir).await?;

    info!("Downloading video: {}", input);
    let output = Command::new(ytdlp)
        .args(["-f", "best[ext=mp4]/best", "--no-playlist", "-o"])
        .arg(&target)
        .arg(input)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| SourceError::Download(format!("failed to run yt-dlp: {}", e)))?;

    if !output.status.success() || !target.exists() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!("Download failed for {}: {}", input, stderr);
        return Err(SourceError::Download(stderr));
    }
    Ok(target)
}

/// Playlist, channel or `@handle` page rather than a single video
pub fn is_playlist(input: &str) -> bool {
    input.contains("list=") || input.contains("channel/") || input.contains('@')
}

#[derive(Debug, Deserialize)]
struct FlatPlaylist {
    entries: Option<Vec<Option<FlatEntry>>>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
}

/// Watch URLs from `yt-dlp --flat-playlist -J` output, in playlist order.
/// Unavailable entries (null or without an id) are skipped.
pub fn parse_flat_playlist(json: &str) -> Result<Vec<String>, SourceError> {
    let playlist: FlatPlaylist =
        serde_json::from_str(json).map_err(|e| SourceError::Playlist(e.to_string()))?;
    let entries = playlist
        .entries
        .ok_or_else(|| SourceError::Playlist("no videos found".to_string()))?;

    Ok(entries
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.id)
        .map(|id| format!("https://www.youtube.com/watch?v={}", id))
        .collect())
}

/// List a playlist's videos without downloading them
pub async fn expand_playlist(url: &str, ytdlp: &str) -> Result<Vec<String>, SourceError> {
    info!("Listing playlist: {}", url);
    let output = Command::new(ytdlp)
        .args(["--flat-playlist", "-J"])
        .arg(url)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| SourceError::Playlist(format!("failed to run yt-dlp: {}", e)))?;

    if !output.status.success() {
        return Err(SourceError::Playlist(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    parse_flat_playlist(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_frames(count: usize, width: u32, height: u32) -> Vec<u8> {
        (0..count)
            .flat_map(|i| vec![i as u8; Frame::byte_len(width, height)])
            .collect()
    }

    #[tokio::test]
    async fn test_reader_yields_every_step() {
        let data = raw_frames(12, 4, 2);
        let mut reader = RawFrameReader::new(data.as_slice(), 4, 2, 5);

        let mut seen = Vec::new();
        while let Some(f) = reader.next().await.unwrap() {
            assert!(f.frame.validate().is_ok());
            assert_eq!(f.frame.data[0], f.index as u8);
            seen.push(f.index);
        }
        assert_eq!(seen, vec![0, 5, 10]);
        assert_eq!(reader.frames_read(), 12);
    }

    #[tokio::test]
    async fn test_reader_truncated_tail() {
        let mut data = raw_frames(2, 4, 2);
        data.extend_from_slice(&[1, 2, 3]);
        let mut reader = RawFrameReader::new(data.as_slice(), 4, 2, 1);

        assert!(reader.next().await.unwrap().is_some());
        assert!(reader.next().await.unwrap().is_some());
        assert!(matches!(
            reader.next().await,
            Err(SourceError::Truncated { expected: 24, got: 3 })
        ));
    }

    #[test]
    fn test_parse_probe() {
        let json = r#"{
            "streams": [{"width": 1280, "height": 720, "r_frame_rate": "30/1",
                         "avg_frame_rate": "30000/1001", "nb_frames": "5394"}],
            "format": {"duration": "180.0"}
        }"#;
        let probe = parse_probe(json, 30.0).unwrap();
        assert_eq!((probe.width, probe.height), (1280, 720));
        assert!((probe.fps - 29.97).abs() < 0.01);
        assert_eq!(probe.total_frames, Some(5394));
        assert_eq!(probe.duration_secs, 180.0);
    }

    #[test]
    fn test_parse_probe_fallbacks() {
        let json = r#"{"streams": [{"width": 640, "height": 360, "avg_frame_rate": "0/0"}],
                       "format": {"duration": "100"}}"#;
        let probe = parse_probe(json, 30.0).unwrap();
        assert_eq!(probe.fps, 30.0);
        assert_eq!(probe.total_frames, Some(3000));

        assert!(parse_probe(r#"{"streams": []}"#, 30.0).is_err());
        assert!(parse_probe("not json", 30.0).is_err());
    }

    #[test]
    fn test_duration_limits() {
        assert!(matches!(
            validate_duration(30.0, 60, 3600),
            Err(SourceError::TooShort { duration: 30, min: 60 })
        ));
        assert!(matches!(
            validate_duration(4000.0, 60, 3600),
            Err(SourceError::TooLong { duration: 4000, max: 3600 })
        ));
        assert!(validate_duration(600.0, 60, 3600).is_ok());
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let config = AgentConfig::default();
        let result = VideoFileSource::open(Path::new("/nonexistent/video.mp4"), &config).await;
        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_resolve_local_input_is_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_input("clips/a.mp4", dir.path(), "a", "yt-dlp").await.unwrap();
        assert_eq!(path, PathBuf::from("clips/a.mp4"));
    }

    #[test]
    fn test_playlist_detection() {
        assert!(is_playlist("https://www.youtube.com/playlist?list=PL123"));
        assert!(is_playlist("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123"));
        assert!(is_playlist("https://www.youtube.com/@SomeTrader"));
        assert!(is_playlist("https://www.youtube.com/channel/UC123"));
        assert!(!is_playlist("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(!is_playlist("/data/videos/lesson.mp4"));
    }

    #[test]
    fn test_parse_flat_playlist() {
        let json = r#"{
            "_type": "playlist",
            "title": "SMC course",
            "entries": [
                {"id": "dQw4w9WgXcQ", "title": "Lesson 1"},
                null,
                {"title": "Private video"},
                {"id": "abcdefghijk", "title": "Lesson 2"}
            ]
        }"#;
        let urls = parse_flat_playlist(json).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                "https://www.youtube.com/watch?v=abcdefghijk",
            ]
        );
    }

    #[test]
    fn test_parse_flat_playlist_without_entries() {
        assert!(matches!(
            parse_flat_playlist(r#"{"_type": "video", "id": "dQw4w9WgXcQ"}"#),
            Err(SourceError::Playlist(_))
        ));
        assert!(parse_flat_playlist("<html>").is_err());
    }

    #[tokio::test]
    async fn test_expand_playlist_missing_binary() {
        let url = "https://example.com/playlist?list=PL1";
        let result = expand_playlist(url, "/nonexistent/yt-dlp").await;
        assert!(matches!(result, Err(SourceError::Playlist(_))));
    }
}
