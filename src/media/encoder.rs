//! Video encoder selection.
//!
//! A preset asks for a codec family on some hardware accelerator. Whether that
//! encoder actually exists depends on how the installed transcoder was built,
//! so the request is resolved against the encoder set reported at startup and
//! falls back to the software encoder of the same family when missing.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecFamily {
    H264,
    Hevc,
    Av1,
    Vp9,
}

impl CodecFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::Av1 => "av1",
            Self::Vp9 => "vp9",
        }
    }

    pub fn software_encoder(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::Hevc => "libx265",
            Self::Av1 => "libsvtav1",
            Self::Vp9 => "libvpx-vp9",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareAccel {
    #[default]
    None,
    Nvenc,
    Qsv,
    Amf,
    Vaapi,
    VideoToolbox,
}

impl std::fmt::Display for HardwareAccel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HardwareAccel::None => write!(f, "Software"),
            HardwareAccel::Nvenc => write!(f, "NVIDIA (NVENC)"),
            HardwareAccel::Qsv => write!(f, "Intel (QSV)"),
            HardwareAccel::Amf => write!(f, "AMD (AMF)"),
            HardwareAccel::Vaapi => write!(f, "VAAPI"),
            HardwareAccel::VideoToolbox => write!(f, "Apple (VideoToolbox)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoEncoder {
    pub family: CodecFamily,
    pub accel: HardwareAccel,
}

impl VideoEncoder {
    pub fn new(family: CodecFamily, accel: HardwareAccel) -> Self {
        Self { family, accel }
    }

    pub fn software(family: CodecFamily) -> Self {
        Self::new(family, HardwareAccel::None)
    }

    pub fn is_hardware(&self) -> bool {
        self.accel != HardwareAccel::None
    }

    /// Encoder name as listed by `ffmpeg -encoders`. `None` when the
    /// accelerator has no encoder for this family at all.
    pub fn codec_name(&self) -> Option<&'static str> {
        use CodecFamily::*;
        use HardwareAccel::*;
        let name = match (self.family, self.accel) {
            (family, None) => family.software_encoder(),
            (H264, Nvenc) => "h264_nvenc",
            (H264, Qsv) => "h264_qsv",
            (H264, Amf) => "h264_amf",
            (H264, Vaapi) => "h264_vaapi",
            (H264, VideoToolbox) => "h264_videotoolbox",
            (Hevc, Nvenc) => "hevc_nvenc",
            (Hevc, Qsv) => "hevc_qsv",
            (Hevc, Amf) => "hevc_amf",
            (Hevc, Vaapi) => "hevc_vaapi",
            (Hevc, VideoToolbox) => "hevc_videotoolbox",
            (Av1, Nvenc) => "av1_nvenc",
            (Av1, Qsv) => "av1_qsv",
            (Av1, Amf) => "av1_amf",
            (Av1, Vaapi) => "av1_vaapi",
            (Av1, VideoToolbox) => "av1_videotoolbox",
            (Vp9, Qsv) => "vp9_qsv",
            (Vp9, Vaapi) => "vp9_vaapi",
            (Vp9, Nvenc | Amf | VideoToolbox) => return Option::None,
        };
        Some(name)
    }

    pub fn label(&self) -> String {
        self.codec_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/{:?}", self.family.as_str(), self.accel))
    }
}

/// Outcome of resolving a requested encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderResolution {
    pub encoder: VideoEncoder,
    /// Set when the requested hardware encoder was unavailable.
    pub fallback_from: Option<VideoEncoder>,
}

impl EncoderResolution {
    pub fn codec_name(&self) -> &'static str {
        self.encoder
            .codec_name()
            .unwrap_or_else(|| self.encoder.family.software_encoder())
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback_from.is_some()
    }
}

/// Resolves `requested` against the set of encoder names the transcoder
/// reported. Never fails: a missing encoder degrades to software.
pub fn resolve(requested: VideoEncoder, available: &HashSet<String>) -> EncoderResolution {
    let present = requested
        .codec_name()
        .map(|name| available.contains(name))
        .unwrap_or(false);

    if present || !requested.is_hardware() {
        return EncoderResolution {
            encoder: requested,
            fallback_from: None,
        };
    }

    EncoderResolution {
        encoder: VideoEncoder::software(requested.family),
        fallback_from: Some(requested),
    }
}

/// Holds the encoder set detected once at startup and answers resolution
/// queries for every job. Read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct EncoderResolver {
    available: HashSet<String>,
}

impl EncoderResolver {
    pub fn new(available: HashSet<String>) -> Self {
        info!("Encoder resolver ready with {} video encoders", available.len());
        Self { available }
    }

    pub fn available(&self) -> &HashSet<String> {
        &self.available
    }

    pub fn resolve(&self, requested: VideoEncoder) -> EncoderResolution {
        let resolution = resolve(requested, &self.available);
        if let Some(from) = resolution.fallback_from {
            warn!(
                "Encoder {} unavailable, falling back to {}",
                from.label(),
                resolution.codec_name()
            );
        }
        resolution
    }
}
