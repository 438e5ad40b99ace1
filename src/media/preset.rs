//! Conversion presets.
//!
//! A `Preset` never changes once built; jobs share it through an `Arc`.
//! Changing a setting means building a new preset.

use crate::media::encoder::{CodecFamily, HardwareAccel, VideoEncoder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RateControl {
    Bitrate { bps: u64 },
    Crf { value: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum QualityStrategy {
    /// Target the bitrate the source was encoded with.
    MatchSource,
    Fixed { rate: RateControl },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Copy,
    Aac,
    Mp3,
    Opus,
    Vorbis,
    Flac,
    Wav,
}

impl AudioFormat {
    pub fn codec_name(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Aac => "aac",
            Self::Mp3 => "libmp3lame",
            Self::Opus => "libopus",
            Self::Vorbis => "libvorbis",
            Self::Flac => "flac",
            Self::Wav => "pcm_s16le",
        }
    }

    pub fn is_lossless(&self) -> bool {
        matches!(self, Self::Flac | Self::Wav)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSettings {
    pub codec: CodecFamily,
    #[serde(default)]
    pub hardware: HardwareAccel,
    pub quality: QualityStrategy,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<f64>,
}

impl VideoSettings {
    pub fn requested_encoder(&self) -> VideoEncoder {
        VideoEncoder::new(self.codec, self.hardware)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioSettings {
    #[serde(default)]
    pub format: AudioFormat,
    /// Target bitrate in bits per second; encoder default when unset.
    #[serde(default)]
    pub bitrate_bps: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    /// Output container, used as the file extension.
    pub container: String,
    #[serde(default = "default_transcode")]
    pub transcode: bool,
    /// `None` with `transcode` set produces an audio-only file.
    #[serde(default)]
    pub video: Option<VideoSettings>,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_name_template")]
    pub name_template: String,
}

fn default_transcode() -> bool {
    true
}

pub fn default_name_template() -> String {
    "{name}".to_string()
}

impl Preset {
    pub fn is_audio_only(&self) -> bool {
        self.transcode && self.video.is_none()
    }

    /// Renders the output file stem from the template.
    pub fn render_name(&self, source_name: &str) -> String {
        self.name_template
            .replace("{name}", source_name)
            .replace("{preset}", &self.name)
    }

    pub fn into_shared(self) -> Arc<Preset> {
        Arc::new(self)
    }

    pub fn builtin() -> Vec<Preset> {
        vec![
            Preset {
                name: "mp4-match".to_string(),
                container: "mp4".to_string(),
                transcode: true,
                video: Some(VideoSettings {
                    codec: CodecFamily::H264,
                    hardware: HardwareAccel::None,
                    quality: QualityStrategy::MatchSource,
                    width: None,
                    height: None,
                    fps: None,
                }),
                audio: AudioSettings {
                    format: AudioFormat::Aac,
                    bitrate_bps: Some(192_000),
                },
                output_dir: None,
                name_template: default_name_template(),
            },
            Preset {
                name: "mp4-h265".to_string(),
                container: "mp4".to_string(),
                transcode: true,
                video: Some(VideoSettings {
                    codec: CodecFamily::Hevc,
                    hardware: HardwareAccel::None,
                    quality: QualityStrategy::Fixed {
                        rate: RateControl::Crf { value: 26 },
                    },
                    width: None,
                    height: None,
                    fps: None,
                }),
                audio: AudioSettings {
                    format: AudioFormat::Aac,
                    bitrate_bps: Some(160_000),
                },
                output_dir: None,
                name_template: "{name}-h265".to_string(),
            },
            Preset {
                name: "mp3".to_string(),
                container: "mp3".to_string(),
                transcode: true,
                video: None,
                audio: AudioSettings {
                    format: AudioFormat::Mp3,
                    bitrate_bps: Some(320_000),
                },
                output_dir: None,
                name_template: default_name_template(),
            },
            Preset {
                name: "download".to_string(),
                container: "mp4".to_string(),
                transcode: false,
                video: None,
                audio: AudioSettings::default(),
                output_dir: None,
                name_template: default_name_template(),
            },
        ]
    }
}
