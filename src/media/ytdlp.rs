//! Argument construction for the external downloader (yt-dlp).

use crate::media::preset::Preset;
use std::path::Path;

/// Output template: the media title, truncated to keep paths short, with the
/// extension chosen by the downloader.
pub const OUTPUT_TEMPLATE: &str = "%(title).150B.%(ext)s";

/// Builds the downloader invocation for fetching `url` into `dir`.
///
/// Audio-only presets fetch the best audio stream so the conversion does not
/// pull video it will discard. Acquisition-only presets let the downloader
/// merge into the preset's container.
///
/// `ffmpeg` is forwarded as `--ffmpeg-location` only when it names a path.
/// yt-dlp checks that location on disk, so a bare command name would make it
/// drop ffmpeg instead of finding it on `PATH` itself.
pub fn download_args(url: &str, dir: &Path, preset: &Preset, ffmpeg: &str) -> Vec<String> {
    let template = dir.join(OUTPUT_TEMPLATE);
    let mut args: Vec<String> = vec![
        "--newline".into(),
        "--no-playlist".into(),
        "--no-mtime".into(),
    ];
    if is_path_like(ffmpeg) {
        args.push("--ffmpeg-location".into());
        args.push(ffmpeg.into());
    }
    args.push("-o".into());
    args.push(template.to_string_lossy().into_owned());

    if preset.is_audio_only() {
        args.push("-f".into());
        args.push("bestaudio/best".into());
    } else {
        args.push("-f".into());
        args.push("bestvideo*+bestaudio/best".into());
        if !preset.transcode {
            args.push("--merge-output-format".into());
            args.push(preset.container.clone());
        }
    }

    args.push("--".into());
    args.push(url.into());
    args
}

fn is_path_like(tool: &str) -> bool {
    let path = Path::new(tool);
    path.components().count() > 1 || path.exists()
}
