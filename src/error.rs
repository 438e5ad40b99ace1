use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransmuteError {
    #[error("Failed to launch {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Access denied: {}", .0.display())]
    AccessDenied(PathBuf),

    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Not enough space to write {}", .0.display())]
    InsufficientSpace(PathBuf),

    #[error("{tool} exited with {}: {detail}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()))]
    SubprocessFailure {
        tool: String,
        code: Option<i32>,
        detail: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown job: {0}")]
    UnknownJob(u64),

    #[error("Illegal job transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Job cancelled")]
    Cancelled,
}

impl TransmuteError {
    /// Maps a filesystem error on `path` to the destination-write taxonomy.
    pub fn from_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::AccessDenied(path),
            std::io::ErrorKind::NotFound => Self::PathNotFound(path),
            _ if is_disk_full(&err) => Self::InsufficientSpace(path),
            _ => Self::Io(err),
        }
    }
}

pub(crate) fn is_disk_full(err: &std::io::Error) -> bool {
    // ENOSPC on unix, ERROR_DISK_FULL / ERROR_HANDLE_DISK_FULL on windows
    match err.raw_os_error() {
        Some(code) if cfg!(windows) => code == 112 || code == 39,
        Some(code) => code == 28,
        None => false,
    }
}

pub type Result<T> = std::result::Result<T, TransmuteError>;
