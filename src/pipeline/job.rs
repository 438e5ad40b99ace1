use crate::error::{Result, TransmuteError};
use crate::media::preset::Preset;
use crate::media::progress::Progress;
use crate::pipeline::report::FailureCategory;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl JobId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        JobId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        BatchId(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "location", rename_all = "lowercase")]
pub enum Source {
    Remote(String),
    Local(PathBuf),
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:https?://)?(?:www[.])?\S+[.]\S+(?:/+\S*)*$")
            .unwrap_or_else(|e| panic!("invalid url pattern: {e}"))
    })
}

impl Source {
    /// An existing path is a local source; otherwise the input must look
    /// like a URL.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TransmuteError::InvalidInput("empty source".to_string()));
        }
        let path = PathBuf::from(trimmed);
        if path.exists() {
            return Ok(Source::Local(path));
        }
        if url_regex().is_match(trimmed) {
            return Ok(Source::Remote(trimmed.to_string()));
        }
        Err(TransmuteError::InvalidInput(format!(
            "'{}' is neither an existing file nor a URL",
            trimmed
        )))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Source::Remote(_))
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Remote(url) => write!(f, "{}", url),
            Source::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Acquiring,
    Converting,
    Completed,
    Failed,
    Canceled,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Acquiring => "acquiring",
            JobState::Converting => "converting",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Canceled)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Acquiring | JobState::Converting)
    }

    /// `Acquiring` is skipped for local sources and `Converting` for
    /// acquisition-only presets, so both may be entered directly.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Queued, Acquiring | Converting | Canceled) => true,
            (Acquiring, Converting | Completed | Failed | Canceled) => true,
            (Converting, Completed | Failed | Canceled) => true,
            _ => false,
        }
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum JobResult {
    Completed { outputs: Vec<PathBuf> },
    Failed { category: FailureCategory, message: String },
    Canceled,
}

#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub batch: BatchId,
    pub source: Source,
    pub preset: Arc<Preset>,
    state: JobState,
    /// Progress of the current phase. Restarts at zero when the job enters
    /// another running phase; read it together with `state`.
    pub progress: Progress,
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(batch: BatchId, source: Source, preset: Arc<Preset>) -> Self {
        Self {
            id: JobId::next(),
            batch,
            source,
            preset,
            state: JobState::Queued,
            progress: Progress::default(),
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// The first phase this job runs once admitted.
    pub fn first_phase(&self) -> JobState {
        if self.source.is_remote() {
            JobState::Acquiring
        } else {
            JobState::Converting
        }
    }

    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(TransmuteError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if next.is_running() && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if next.is_running() {
            // progress is per phase
            self.progress = Progress::default();
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.state = next;
        Ok(())
    }

    /// Moves to the terminal state matching `result` and stores it.
    pub fn finish(&mut self, result: JobResult) -> Result<()> {
        let next = match &result {
            JobResult::Completed { .. } => JobState::Completed,
            JobResult::Failed { .. } => JobState::Failed,
            JobResult::Canceled => JobState::Canceled,
        };
        self.transition(next)?;
        if next == JobState::Completed {
            self.progress.fraction = 1.0;
            self.progress.eta_secs = Some(0.0);
        }
        self.result = Some(result);
        Ok(())
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            batch: self.batch,
            source: self.source.clone(),
            preset: self.preset.name.clone(),
            state: self.state,
            progress: self.progress,
            result: self.result.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Read-only copy of a job handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub batch: BatchId,
    pub source: Source,
    pub preset: String,
    pub state: JobState,
    pub progress: Progress,
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
