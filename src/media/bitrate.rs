use crate::error::{Result, TransmuteError};
use crate::media::probe::MediaInfo;
use std::path::Path;

/// Estimates the video bitrate a source was encoded with, so a re-encode can
/// target roughly the same quality.
///
/// `audio_bytes = audio_bps * duration / 8`, the remaining bytes are treated
/// as video and spread over the duration. Pass `0` for sources without audio.
///
/// Fails with `InvalidInput` when the duration is not a positive finite
/// number, and when the audio stream alone accounts for the whole file
/// (`video_bytes <= 0`), where the formula would yield a zero or negative rate.
pub fn compute_video_bitrate(file_size_bytes: u64, duration_secs: f64, audio_bitrate_bps: u64) -> Result<u64> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Err(TransmuteError::InvalidInput(format!(
            "media duration must be positive, got {duration_secs}"
        )));
    }

    let audio_bytes = audio_bitrate_bps as f64 * duration_secs / 8.0;
    let video_bytes = file_size_bytes as f64 - audio_bytes;
    if video_bytes <= 0.0 {
        return Err(TransmuteError::InvalidInput(format!(
            "audio stream ({audio_bytes:.0} bytes) accounts for the whole file ({file_size_bytes} bytes)"
        )));
    }

    Ok((video_bytes * 8.0 / duration_secs) as u64)
}

/// Same as [`compute_video_bitrate`] for a file on disk. The size is read from
/// the filesystem; duration and audio bitrate come from the probe.
pub fn video_bitrate_for_file(path: &Path, info: &MediaInfo) -> Result<u64> {
    let meta = std::fs::metadata(path).map_err(|e| {
        TransmuteError::InvalidInput(format!("cannot read source {}: {}", path.display(), e))
    })?;
    if !meta.is_file() {
        return Err(TransmuteError::InvalidInput(format!(
            "source {} is not a file",
            path.display()
        )));
    }
    compute_video_bitrate(
        meta.len(),
        info.duration_secs,
        info.audio_bitrate_bps.unwrap_or(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn expected(s: u64, d: f64, a: u64) -> u64 {
        ((s as f64 - a as f64 * d / 8.0) * 8.0 / d) as u64
    }

    #[test]
    fn test_bitrate_without_audio() {
        // 10 MB over 80 s -> 1 Mbit/s
        assert_eq!(compute_video_bitrate(10_000_000, 80.0, 0).ok(), Some(1_000_000));
    }

    #[test]
    fn test_bitrate_subtracts_audio() {
        // 10 MB, 80 s, 128 kbit/s audio -> 1_000_000 - 128_000
        assert_eq!(compute_video_bitrate(10_000_000, 80.0, 128_000).ok(), Some(872_000));
    }

    #[test]
    fn test_bitrate_matches_formula() {
        for &(s, d, a) in &[
            (1_234_567u64, 3.5f64, 96_000u64),
            (700_000_000, 5400.25, 384_000),
            (52_428_800, 12.0, 0),
        ] {
            assert_eq!(compute_video_bitrate(s, d, a).ok(), Some(expected(s, d, a)));
        }
    }

    #[test]
    fn test_bitrate_rejects_non_positive_duration() {
        for d in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                compute_video_bitrate(1_000, d, 0),
                Err(TransmuteError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_bitrate_rejects_audio_larger_than_file() {
        assert!(matches!(
            compute_video_bitrate(1_000, 10.0, 1_000_000),
            Err(TransmuteError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_bitrate_for_file_reads_size() {
        let mut file = match tempfile::NamedTempFile::new() {
            Ok(file) => file,
            Err(e) => panic!("tempfile: {}", e),
        };
        if let Err(e) = file.write_all(&[0u8; 8_000]) {
            panic!("write: {}", e);
        }
        let info = MediaInfo {
            duration_secs: 8.0,
            size_bytes: 0,
            audio_bitrate_bps: None,
            has_video: true,
        };
        assert_eq!(video_bitrate_for_file(file.path(), &info).ok(), Some(8_000));
    }

    #[test]
    fn test_bitrate_for_missing_file() {
        let info = MediaInfo {
            duration_secs: 8.0,
            size_bytes: 0,
            audio_bitrate_bps: None,
            has_video: true,
        };
        assert!(matches!(
            video_bitrate_for_file(Path::new("/no/such/source.mkv"), &info),
            Err(TransmuteError::InvalidInput(_))
        ));
    }
}
