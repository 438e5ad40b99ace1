use crate::error::{Result, TransmuteError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Measured properties of a source file needed to plan a conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_secs: f64,
    pub size_bytes: u64,
    /// Bitrate of the primary audio stream, if the source has one.
    pub audio_bitrate_bps: Option<u64>,
    pub has_video: bool,
}

#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<Stream>,
    format: Option<Format>,
}

#[derive(Debug, Deserialize)]
struct Stream {
    codec_type: Option<String>,
    bit_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Format {
    duration: Option<String>,
    size: Option<String>,
}

/// Probes files with `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe: String,
}

impl FfprobeProber {
    pub fn new(ffprobe: impl Into<String>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        if !path.is_file() {
            return Err(TransmuteError::InvalidInput(format!(
                "source file {} does not exist",
                path.display()
            )));
        }

        let output = tokio::process::Command::new(&self.ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_entries",
                "format=duration,size:stream=codec_type,bit_rate,duration",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TransmuteError::Spawn {
                executable: self.ffprobe.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TransmuteError::InvalidInput(format!(
                "{} could not read {}",
                self.ffprobe,
                path.display()
            )));
        }

        let info = parse_ffprobe_json(&output.stdout)?;
        debug!(
            "Probed {:?}: {:.2}s, audio {:?} bps",
            path, info.duration_secs, info.audio_bitrate_bps
        );
        Ok(info)
    }
}

fn parse_number<T: std::str::FromStr>(value: &Option<String>) -> Option<T> {
    value.as_deref().and_then(|v| v.trim().parse().ok())
}

fn parse_ffprobe_json(raw: &[u8]) -> Result<MediaInfo> {
    let parsed: FfprobeOutput = serde_json::from_slice(raw)
        .map_err(|e| TransmuteError::InvalidInput(format!("unreadable ffprobe output: {}", e)))?;

    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));
    let has_video = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("video"));

    // container duration first, longest stream as a fallback
    let duration_secs = parsed
        .format
        .as_ref()
        .and_then(|f| parse_number::<f64>(&f.duration))
        .or_else(|| {
            parsed
                .streams
                .iter()
                .filter_map(|s| parse_number::<f64>(&s.duration))
                .reduce(f64::max)
        })
        .unwrap_or(0.0);

    let size_bytes = parsed
        .format
        .as_ref()
        .and_then(|f| parse_number(&f.size))
        .unwrap_or(0);

    Ok(MediaInfo {
        duration_secs,
        size_bytes,
        audio_bitrate_bps: audio.and_then(|s| parse_number(&s.bit_rate)),
        has_video,
    })
}
