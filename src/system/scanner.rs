use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Expands directory sources into the media files they contain.
pub struct Scanner {
    pub extensions: Vec<String>,
    pub recursive: bool,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        Self {
            extensions: [
                "mp4", "mkv", "mov", "avi", "m4v", "webm", "flv", "wmv", "mpg", "mpeg", "ts",
                "mp3", "m4a", "aac", "flac", "wav", "ogg", "opus", "wma",
            ]
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
            recursive: true,
        }
    }

    pub fn is_media_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|ext| self.extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    /// Lists the media files below `dir`, sorted by path.
    pub fn scan(&self, dir: &Path) -> Vec<PathBuf> {
        info!("Scanning directory: {:?} (recursive: {})", dir, self.recursive);
        let walker = if self.recursive {
            WalkDir::new(dir)
        } else {
            WalkDir::new(dir).max_depth(1)
        };

        let mut files = Vec::new();
        for entry in walker.into_iter() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if entry.file_type().is_file() && self.is_media_file(entry.path()) {
                debug!("Found media file: {:?}", entry.path());
                files.push(entry.into_path());
            }
        }
        files.sort();

        info!("Found {} candidate media files in {:?}", files.len(), dir);
        files
    }

    /// Replaces every directory in `inputs` with the files it contains.
    /// Anything else passes through untouched for source parsing.
    pub fn expand(&self, inputs: &[String]) -> Vec<String> {
        let mut expanded = Vec::new();
        for input in inputs {
            let path = Path::new(input);
            if path.is_dir() {
                expanded.extend(
                    self.scan(path)
                        .into_iter()
                        .map(|p| p.to_string_lossy().into_owned()),
                );
            } else {
                expanded.push(input.clone());
            }
        }
        expanded
    }
}
