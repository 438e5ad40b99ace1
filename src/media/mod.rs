pub mod bitrate;
pub mod encoder;
pub mod ffmpeg;
pub mod preset;
pub mod probe;
pub mod progress;
pub mod ytdlp;

pub use encoder::{EncoderResolution, EncoderResolver, VideoEncoder};
pub use ffmpeg::EncoderCapabilities;
pub use preset::Preset;
pub use probe::{MediaInfo, MediaProber};
