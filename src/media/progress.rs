//! Progress extraction from tool console output.
//!
//! Output formats of the external tools are not a stable contract, so any
//! line that does not match is treated as "no update" rather than an error.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Processing speed as the tool reports it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value")]
pub enum Speed {
    /// Media seconds per wall-clock second (`speed=1.5x`).
    Realtime(f64),
    BytesPerSec(f64),
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speed::Realtime(ratio) => write!(f, "{:.2}x", ratio),
            Speed::BytesPerSec(bps) => write!(f, "{:.2} MiB/s", bps / (1024.0 * 1024.0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    /// Media time reached, when the line carried one.
    pub elapsed_secs: Option<f64>,
    /// Fraction complete in [0, 1].
    pub fraction: f64,
    pub speed: Option<Speed>,
}

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"time=([0-9]{2}):([0-9]{2}):([0-9]{2}\.[0-9]{2})")
            .unwrap_or_else(|e| panic!("invalid time pattern: {e}"))
    })
}

fn speed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"speed=\s*([0-9]+(?:\.[0-9]+)?)x")
            .unwrap_or_else(|e| panic!("invalid speed pattern: {e}"))
    })
}

fn rate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bat\s+([0-9]+(?:\.[0-9]+)?)(B|KiB|MiB|GiB)/s")
            .unwrap_or_else(|e| panic!("invalid rate pattern: {e}"))
    })
}

fn download_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[download\]\s+([0-9]{1,3}(?:\.[0-9]+)?)%")
            .unwrap_or_else(|e| panic!("invalid download pattern: {e}"))
    })
}

/// Parses a transcoder status line such as
/// `frame=  100 fps=25.0 size=1024kB time=00:00:04.00 bitrate=...`.
/// `total_secs` is the source duration; without a positive total the line
/// still yields the elapsed time but the fraction stays at zero.
pub fn parse(line: &str, total_secs: f64) -> Option<ProgressUpdate> {
    let caps = time_regex().captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    let elapsed = hours * 3600.0 + minutes * 60.0 + seconds;

    let fraction = if total_secs > 0.0 && total_secs.is_finite() {
        (elapsed / total_secs).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let speed = speed_regex()
        .captures(line)
        .and_then(|c| c[1].parse().ok())
        .map(Speed::Realtime);

    Some(ProgressUpdate {
        elapsed_secs: Some(elapsed),
        fraction,
        speed,
    })
}

/// Parses a downloader line such as `[download]  42.3% of 10.00MiB at 1.20MiB/s`.
///
/// When video and audio are fetched as separate streams the downloader prints
/// one 0-100% run per stream. Progress is non-decreasing, so the later run
/// produces no updates and acquisition reports 100% until the merge ends.
pub fn parse_download(line: &str) -> Option<ProgressUpdate> {
    let line = line.trim_start();
    let caps = download_regex().captures(line)?;
    let percent: f64 = caps[1].parse().ok()?;

    let speed = rate_regex().captures(line).and_then(|c| {
        let value: f64 = c[1].parse().ok()?;
        let scale = match &c[2] {
            "B" => 1.0,
            "KiB" => 1024.0,
            "MiB" => 1024.0 * 1024.0,
            "GiB" => 1024.0 * 1024.0 * 1024.0,
            _ => return None,
        };
        Some(Speed::BytesPerSec(value * scale))
    });

    Some(ProgressUpdate {
        elapsed_secs: None,
        fraction: (percent / 100.0).clamp(0.0, 1.0),
        speed,
    })
}

/// Progress snapshot exposed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub fraction: f64,
    pub eta_secs: Option<f64>,
    pub speed: Option<Speed>,
}

/// Keeps one phase's progress non-decreasing and estimates time remaining.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    current: Progress,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            current: Progress::default(),
        }
    }

    pub fn current(&self) -> Progress {
        self.current
    }

    /// Applies an update; returns the new snapshot only if it advanced.
    pub fn advance(&mut self, update: ProgressUpdate) -> Option<Progress> {
        self.advance_at(update, self.started.elapsed())
    }

    fn advance_at(&mut self, update: ProgressUpdate, wall: Duration) -> Option<Progress> {
        if update.fraction <= self.current.fraction {
            return None;
        }
        let fraction = update.fraction.min(1.0);
        let wall = wall.as_secs_f64();
        let eta_secs = if fraction > 0.0 && wall > 0.0 {
            Some(wall * (1.0 - fraction) / fraction)
        } else {
            None
        };
        self.current = Progress {
            fraction,
            eta_secs,
            speed: update.speed,
        };
        Some(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_parsing() {
        let line =
            "frame=  100 fps=25.0 q=28.0 size=    1024kB time=00:00:04.00 bitrate=1500kbps speed=1.5x";
        let update = match parse(line, 8.0) {
            Some(update) => update,
            None => panic!("Expected progress parse to succeed"),
        };
        assert_eq!(update.elapsed_secs, Some(4.0));
        assert!((update.fraction - 0.5).abs() < 1e-9);
        assert_eq!(update.speed, Some(Speed::Realtime(1.5)));
    }

    #[test]
    fn test_speed_is_optional() {
        let update = parse("time=00:00:04.00 bitrate=N/A speed=N/A", 8.0);
        assert_eq!(update.map(|u| u.speed), Some(None));
    }

    #[test]
    fn test_progress_hours_and_minutes() {
        let update = match parse("time=01:02:03.50", 7323.5) {
            Some(update) => update,
            None => panic!("Expected progress parse to succeed"),
        };
        assert_eq!(update.elapsed_secs, Some(3723.5));
    }

    #[test]
    fn test_unrecognized_lines_are_ignored() {
        assert!(parse("Input #0, matroska,webm, from 'in.mkv':", 10.0).is_none());
        assert!(parse("time=N/A bitrate=N/A", 10.0).is_none());
        assert!(parse("", 10.0).is_none());
    }

    #[test]
    fn test_fraction_clamped_and_zero_without_total() {
        let over = parse("time=00:00:20.00", 10.0).map(|u| u.fraction);
        assert_eq!(over, Some(1.0));
        let unknown = parse("time=00:00:20.00", 0.0).map(|u| u.fraction);
        assert_eq!(unknown, Some(0.0));
    }

    #[test]
    fn test_download_parsing() {
        let update = parse_download("[download]  42.5% of   10.00MiB at  1.00MiB/s ETA 00:05");
        assert_eq!(update.map(|u| u.fraction), Some(0.425));
        assert_eq!(
            update.and_then(|u| u.speed),
            Some(Speed::BytesPerSec(1024.0 * 1024.0))
        );
        assert!(parse_download("[youtube] abc: Downloading webpage").is_none());
        let unknown = parse_download("[download]  10.0% of ~5.00MiB at Unknown speed ETA Unknown");
        assert_eq!(unknown.map(|u| u.speed), Some(None));
    }

    #[test]
    fn test_second_download_run_keeps_progress() {
        let mut tracker = ProgressTracker::new();
        let lines = [
            "[download]  50.0% of 8.00MiB at 1.00MiB/s ETA 00:04",
            "[download] 100% of 8.00MiB in 00:00:08",
            "[download]   5.0% of 1.00MiB at 1.00MiB/s ETA 00:01",
        ];
        let advanced: Vec<bool> = lines
            .iter()
            .filter_map(|l| parse_download(l))
            .map(|u| tracker.advance_at(u, Duration::from_secs(4)).is_some())
            .collect();
        assert_eq!(advanced, vec![true, true, false]);
        assert_eq!(tracker.current().fraction, 1.0);
    }

    #[test]
    fn test_tracker_carries_speed() {
        let mut tracker = ProgressTracker::new();
        let update = match parse("time=00:00:02.00 speed=2.0x", 10.0) {
            Some(update) => update,
            None => panic!("Expected progress parse to succeed"),
        };
        let progress = tracker.advance_at(update, Duration::from_secs(1));
        assert_eq!(progress.and_then(|p| p.speed), Some(Speed::Realtime(2.0)));
    }

    #[test]
    fn test_tracker_ignores_out_of_order_updates() {
        let mut tracker = ProgressTracker::new();
        let first = parse("time=00:00:10.00", 20.0);
        let second = parse("time=00:00:05.00", 20.0);
        let (first, second) = match (first, second) {
            (Some(a), Some(b)) => (a, b),
            _ => panic!("Expected both lines to parse"),
        };

        assert!(tracker.advance_at(first, Duration::from_secs(5)).is_some());
        assert!(tracker.advance_at(second, Duration::from_secs(6)).is_none());
        assert!((tracker.current().fraction - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_tracker_eta() {
        let mut tracker = ProgressTracker::new();
        let update = ProgressUpdate {
            elapsed_secs: None,
            fraction: 0.25,
            speed: None,
        };
        let progress = match tracker.advance_at(update, Duration::from_secs(10)) {
            Some(progress) => progress,
            None => panic!("Expected progress to advance"),
        };
        assert_eq!(progress.eta_secs, Some(30.0));
    }
}
