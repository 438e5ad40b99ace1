//! Working directories and output placement.
//!
//! Intermediate artifacts live under a process-wide temp root with one
//! subdirectory per operation kind; each job gets its own folder inside it.
//! Finished artifacts are moved into the destination directory, which is
//! where the write failures reported to the user originate.

use crate::error::{Result, TransmuteError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Download,
    Convert,
}

impl Operation {
    fn dir_name(&self) -> &'static str {
        match self {
            Operation::Download => "downloader",
            Operation::Convert => "converter",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkDirs {
    root: PathBuf,
}

impl WorkDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn operation_dir(&self, op: Operation) -> PathBuf {
        self.root.join(op.dir_name())
    }

    /// Creates a fresh, empty directory for one job's `op` phase.
    pub async fn create_job_dir(&self, op: Operation, job_id: u64) -> Result<PathBuf> {
        let dir = self.operation_dir(op).join(job_id.to_string());
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| TransmuteError::from_io(e, &dir))?;
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TransmuteError::from_io(e, &dir))?;
        Ok(dir)
    }

    /// Removes every job directory of `job_id`. Failures are only logged.
    pub async fn cleanup_job(&self, job_id: u64) {
        for op in [Operation::Download, Operation::Convert] {
            let dir = self.operation_dir(op).join(job_id.to_string());
            if !dir.exists() {
                continue;
            }
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!("[Job {}] Failed to remove work dir {:?}: {}", job_id, dir, e);
            } else {
                debug!("[Job {}] Removed work dir {:?}", job_id, dir);
            }
        }
    }
}

fn invalid_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"[<|>:"/\\?*\x00-\x1f]"#)
            .unwrap_or_else(|e| panic!("invalid file name pattern: {e}"))
    })
}

/// Replaces characters that are not allowed in file names on any of the
/// supported platforms.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned = invalid_chars().replace_all(name, "_");
    let trimmed = cleaned.trim().trim_end_matches('.').trim_end();
    if trimmed.is_empty() {
        "output".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Moves `artifact` into `dest_dir` as `<stem>.<ext>`, appending ` (n)` when
/// the name is taken. The destination directory must already exist.
pub async fn place_output(artifact: &Path, dest_dir: &Path, stem: &str, ext: &str) -> Result<PathBuf> {
    match tokio::fs::metadata(dest_dir).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Err(TransmuteError::PathNotFound(dest_dir.to_path_buf())),
        Err(e) => return Err(TransmuteError::from_io(e, dest_dir)),
    }

    let stem = sanitize_file_name(stem);
    let dest = reserve_destination(dest_dir, &stem, ext).await?;

    if let Err(rename_err) = tokio::fs::rename(artifact, &dest).await {
        // different filesystems; fall back to copying
        debug!("rename {:?} -> {:?} failed ({}), copying", artifact, dest, rename_err);
        if let Err(e) = tokio::fs::copy(artifact, &dest).await {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(TransmuteError::from_io(e, &dest));
        }
        if let Err(e) = tokio::fs::remove_file(artifact).await {
            warn!("Failed to remove intermediate {:?}: {}", artifact, e);
        }
    }

    Ok(dest)
}

/// Atomically claims a free file name so concurrent jobs with the same
/// title never overwrite each other.
async fn reserve_destination(dir: &Path, stem: &str, ext: &str) -> Result<PathBuf> {
    for n in 0u32.. {
        let name = match (n, ext.is_empty()) {
            (0, true) => stem.to_string(),
            (0, false) => format!("{stem}.{ext}"),
            (n, true) => format!("{stem} ({n})"),
            (n, false) => format!("{stem} ({n}).{ext}"),
        };
        let candidate = dir.join(name);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(TransmuteError::from_io(e, &candidate)),
        }
    }
    Err(TransmuteError::InvalidInput(format!(
        "no free file name for {} in {}",
        stem,
        dir.display()
    )))
}

/// Finds the artifact a tool left in `dir`, ignoring partial downloads.
pub async fn find_artifact(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| TransmuteError::from_io(e, dir))?;
    let mut best: Option<(u64, PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let partial = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e, "part" | "ytdl" | "temp"))
            .unwrap_or(false);
        if partial {
            continue;
        }
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        // largest file wins when the tool left sidecars behind
        if best.as_ref().map(|(size, _)| meta.len() > *size).unwrap_or(true) {
            best = Some((meta.len(), path));
        }
    }

    Ok(best.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> tempfile::TempDir {
        match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => panic!("tempdir: {}", e),
        }
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a/b:c*d?"), "a_b_c_d_");
        assert_eq!(sanitize_file_name("  title.  "), "title");
        assert_eq!(sanitize_file_name("???"), "___");
        assert_eq!(sanitize_file_name(""), "output");
        assert_eq!(sanitize_file_name("line\nbreak"), "line_break");
    }

    #[tokio::test]
    async fn test_place_output_avoids_collisions() {
        let work = tempdir();
        let dest = tempdir();

        let mut placed = Vec::new();
        for i in 0..3 {
            let artifact = work.path().join(format!("tmp{i}.mp4"));
            if let Err(e) = tokio::fs::write(&artifact, b"data").await {
                panic!("write: {}", e);
            }
            match place_output(&artifact, dest.path(), "clip", "mp4").await {
                Ok(path) => placed.push(path),
                Err(e) => panic!("placement failed: {}", e),
            }
            assert!(!artifact.exists());
        }

        let names: Vec<_> = placed
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        assert_eq!(names, vec!["clip.mp4", "clip (1).mp4", "clip (2).mp4"]);
    }

    #[tokio::test]
    async fn test_place_output_missing_destination() {
        let work = tempdir();
        let artifact = work.path().join("a.mp4");
        if let Err(e) = tokio::fs::write(&artifact, b"data").await {
            panic!("write: {}", e);
        }
        let missing = work.path().join("nope");
        let result = place_output(&artifact, &missing, "a", "mp4").await;
        assert!(matches!(result, Err(TransmuteError::PathNotFound(_))));
        assert!(artifact.exists());
    }

    #[tokio::test]
    async fn test_job_dirs_and_artifact_lookup() {
        let root = tempdir();
        let dirs = WorkDirs::new(root.path());
        let dir = match dirs.create_job_dir(Operation::Download, 7).await {
            Ok(dir) => dir,
            Err(e) => panic!("create: {}", e),
        };
        assert!(dir.ends_with("downloader/7"));

        for (name, len) in [("video.mp4", 10usize), ("video.mp4.part", 100), ("thumb.jpg", 2)] {
            if let Err(e) = tokio::fs::write(dir.join(name), vec![0u8; len]).await {
                panic!("write: {}", e);
            }
        }
        let found = match find_artifact(&dir).await {
            Ok(found) => found,
            Err(e) => panic!("lookup: {}", e),
        };
        assert_eq!(found, Some(dir.join("video.mp4")));

        dirs.cleanup_job(7).await;
        assert!(!dir.exists());
    }
}
