//! FFmpeg integration: encoder detection and typed command construction.

use crate::error::{Result, TransmuteError};
use crate::media::encoder::{EncoderResolution, HardwareAccel};
use crate::media::preset::{AudioFormat, AudioSettings, RateControl, VideoSettings};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

mod amf;
mod cpu;
mod nvenc;
mod qsv;
mod vaapi;
mod videotoolbox;

/// Available encoders detected from FFmpeg
#[derive(Debug, Clone, Default)]
pub struct EncoderCapabilities {
    pub video_encoders: HashSet<String>,
    pub audio_encoders: HashSet<String>,
}

impl EncoderCapabilities {
    /// Detect available encoders via `ffmpeg -encoders`
    pub async fn detect(ffmpeg: &str) -> Result<Self> {
        let output = tokio::process::Command::new(ffmpeg)
            .args(["-hide_banner", "-encoders"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TransmuteError::Spawn {
                executable: ffmpeg.to_string(),
                source,
            })?;

        let caps = Self::parse(&String::from_utf8_lossy(&output.stdout));
        info!(
            "Detected {} video encoders, {} audio encoders",
            caps.video_encoders.len(),
            caps.audio_encoders.len()
        );
        Ok(caps)
    }

    /// Parses the encoder table; rows look like ` V....D libx264   H.264 ...`.
    pub fn parse(listing: &str) -> Self {
        let mut video_encoders = HashSet::new();
        let mut audio_encoders = HashSet::new();

        for line in listing.lines() {
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('-') || trimmed.starts_with("Encoders:") {
                continue;
            }

            let mut parts = trimmed.split_whitespace();
            let flags = match parts.next() {
                Some(flags) if flags.len() == 6 => flags,
                _ => continue,
            };
            let encoder_name = match parts.next() {
                Some(name) if name != "=" => name,
                _ => continue,
            };

            if flags.starts_with('V') {
                video_encoders.insert(encoder_name.to_string());
            } else if flags.starts_with('A') {
                audio_encoders.insert(encoder_name.to_string());
            }
        }

        Self {
            video_encoders,
            audio_encoders,
        }
    }

    pub fn has_video_encoder(&self, name: &str) -> bool {
        self.video_encoders.contains(name)
    }
}

/// Everything the transcoder needs to know about one conversion.
pub struct FFmpegCommandBuilder<'a> {
    input: &'a Path,
    output: &'a Path,
    video: Option<&'a VideoSettings>,
    encoder: Option<EncoderResolution>,
    rate_control: Option<RateControl>,
    audio: AudioSettings,
    vaapi_device: Option<&'a str>,
    threads: usize,
}

impl<'a> FFmpegCommandBuilder<'a> {
    pub fn new(input: &'a Path, output: &'a Path) -> Self {
        Self {
            input,
            output,
            video: None,
            encoder: None,
            rate_control: None,
            audio: AudioSettings::default(),
            vaapi_device: None,
            threads: 0,
        }
    }

    /// Sets the video conversion. Without it the output is audio-only.
    pub fn with_video(
        mut self,
        video: &'a VideoSettings,
        encoder: EncoderResolution,
        rate_control: RateControl,
    ) -> Self {
        self.video = Some(video);
        self.encoder = Some(encoder);
        self.rate_control = Some(rate_control);
        self
    }

    pub fn with_audio(mut self, audio: AudioSettings) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_vaapi_device(mut self, device: Option<&'a str>) -> Self {
        self.vaapi_device = device;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn build(self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];

        let accel = self.encoder.map(|e| e.encoder.accel);
        if accel == Some(HardwareAccel::Vaapi) {
            vaapi::input_args(&mut args, self.vaapi_device);
        }

        args.push("-i".into());
        args.push(self.input.to_string_lossy().into_owned());

        match (self.video, self.encoder, self.rate_control) {
            (Some(video), Some(encoder), Some(rate_control)) => {
                self.apply_encoder(&mut args, encoder, rate_control);
                self.apply_geometry(&mut args, video, encoder);
            }
            _ => args.push("-vn".into()),
        }

        if self.threads > 0 {
            args.push("-threads".into());
            args.push(self.threads.to_string());
        }

        self.apply_audio(&mut args);
        args.push(self.output.to_string_lossy().into_owned());

        debug!("ffmpeg {}", args.join(" "));
        args
    }

    fn apply_encoder(&self, args: &mut Vec<String>, encoder: EncoderResolution, rate_control: RateControl) {
        let codec = encoder.codec_name();
        match encoder.encoder.accel {
            HardwareAccel::None => cpu::apply(args, encoder.encoder.family, rate_control),
            HardwareAccel::Nvenc => nvenc::apply(args, codec, rate_control),
            HardwareAccel::Qsv => qsv::apply(args, codec, rate_control),
            HardwareAccel::Amf => amf::apply(args, codec, rate_control),
            HardwareAccel::Vaapi => vaapi::apply(args, codec, rate_control),
            HardwareAccel::VideoToolbox => videotoolbox::apply(args, codec, rate_control),
        }
    }

    fn apply_geometry(&self, args: &mut Vec<String>, video: &VideoSettings, encoder: EncoderResolution) {
        let scale = match (video.width, video.height) {
            (None, None) => None,
            // -2 keeps the aspect ratio with an even dimension
            (w, h) => Some((w.map(i64::from).unwrap_or(-2), h.map(i64::from).unwrap_or(-2))),
        };

        if encoder.encoder.accel == HardwareAccel::Vaapi {
            let vaapi_scale = match (video.width, video.height) {
                (Some(w), Some(h)) => Some((w, h)),
                _ => None,
            };
            args.push("-vf".into());
            args.push(vaapi::upload_filter(vaapi_scale));
        } else if let Some((w, h)) = scale {
            args.push("-vf".into());
            args.push(format!("scale={w}:{h}"));
        }

        if let Some(fps) = video.fps.filter(|fps| *fps > 0.0) {
            args.push("-r".into());
            args.push(fps.to_string());
        }
    }

    fn apply_audio(&self, args: &mut Vec<String>) {
        args.push("-c:a".into());
        args.push(self.audio.format.codec_name().into());
        if self.audio.format == AudioFormat::Copy || self.audio.format.is_lossless() {
            return;
        }
        if let Some(bps) = self.audio.bitrate_bps {
            args.push("-b:a".into());
            args.push(format!("{}k", bps / 1000));
        }
    }
}

fn push_bitrate(args: &mut Vec<String>, bps: u64) {
    args.push("-b:v".into());
    args.push(format!("{}k", (bps / 1000).max(1)));
}
