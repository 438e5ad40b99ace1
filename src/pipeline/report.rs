//! Per-batch failure aggregation.
//!
//! Failures are local to a job and never abort the batch. Each one is
//! classified into a fixed bucket; the batch report is produced once every
//! job of the batch reached a terminal state.

use crate::error::{is_disk_full, TransmuteError};
use crate::pipeline::job::{BatchId, JobId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FailureCategory {
    AccessDenied,
    PathNotFound,
    InsufficientSpace,
    Other,
}

impl FailureCategory {
    pub fn description(&self) -> &'static str {
        match self {
            FailureCategory::AccessDenied => "access to the output location was denied",
            FailureCategory::PathNotFound => "the output path could not be found",
            FailureCategory::InsufficientSpace => "there is not enough free disk space",
            FailureCategory::Other => "an unexpected error occurred",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureCategory::AccessDenied => "access denied",
            FailureCategory::PathNotFound => "path not found",
            FailureCategory::InsufficientSpace => "insufficient space",
            FailureCategory::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Maps an error onto its bucket. Subprocess failures are classified by the
/// cause named in their trailing output.
pub fn classify(err: &TransmuteError) -> FailureCategory {
    match err {
        TransmuteError::AccessDenied(_) => FailureCategory::AccessDenied,
        TransmuteError::PathNotFound(_) => FailureCategory::PathNotFound,
        TransmuteError::InsufficientSpace(_) => FailureCategory::InsufficientSpace,
        TransmuteError::Io(io) => match io.kind() {
            std::io::ErrorKind::PermissionDenied => FailureCategory::AccessDenied,
            std::io::ErrorKind::NotFound => FailureCategory::PathNotFound,
            _ if is_disk_full(io) => FailureCategory::InsufficientSpace,
            _ => FailureCategory::Other,
        },
        TransmuteError::SubprocessFailure { detail, .. } => classify_output(detail),
        _ => FailureCategory::Other,
    }
}

fn classify_output(detail: &str) -> FailureCategory {
    if detail.contains("Permission denied") || detail.contains("Access is denied") {
        FailureCategory::AccessDenied
    } else if detail.contains("No such file or directory")
        || detail.contains("cannot find the path")
    {
        FailureCategory::PathNotFound
    } else if detail.contains("No space left on device")
        || detail.contains("not enough space on the disk")
    {
        FailureCategory::InsufficientSpace
    } else {
        FailureCategory::Other
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub job_id: JobId,
    pub category: FailureCategory,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReportSummary {
    AllSucceeded,
    Single {
        category: FailureCategory,
        count: usize,
    },
    Combined {
        total: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch: BatchId,
    pub failures: BTreeMap<FailureCategory, usize>,
    pub succeeded: Vec<PathBuf>,
    pub canceled: usize,
    pub advisories: Vec<String>,
    pub details: Vec<JobFailure>,
}

impl BatchReport {
    pub fn failure_count(&self) -> usize {
        self.failures.values().sum()
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }

    pub fn summary(&self) -> ReportSummary {
        let buckets: Vec<_> = self.failures.iter().filter(|(_, n)| **n > 0).collect();
        match buckets.as_slice() {
            [] => ReportSummary::AllSucceeded,
            [(category, count)] => ReportSummary::Single {
                category: **category,
                count: **count,
            },
            _ => ReportSummary::Combined {
                total: self.failure_count(),
            },
        }
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.summary() {
            ReportSummary::AllSucceeded => {
                write!(f, "All {} job(s) finished successfully", self.succeeded.len())?
            }
            ReportSummary::Single { category, count } => write!(
                f,
                "{} job(s) failed because {}",
                count,
                category.description()
            )?,
            ReportSummary::Combined { total } => write!(
                f,
                "{} job(s) failed for different reasons, see the log for details",
                total
            )?,
        }
        if self.canceled > 0 {
            write!(f, " ({} canceled)", self.canceled)?;
        }
        Ok(())
    }
}

/// Collects the outcome of each job of one batch.
#[derive(Debug)]
pub struct ErrorAggregator {
    batch: BatchId,
    expected: usize,
    seen: HashSet<JobId>,
    report: Option<BatchReport>,
}

impl ErrorAggregator {
    pub fn new(batch: BatchId, expected: usize) -> Self {
        Self {
            batch,
            expected,
            seen: HashSet::new(),
            report: Some(BatchReport {
                batch,
                failures: BTreeMap::new(),
                succeeded: Vec::new(),
                canceled: 0,
                advisories: Vec::new(),
                details: Vec::new(),
            }),
        }
    }

    pub fn batch(&self) -> BatchId {
        self.batch
    }

    /// `None` for a job that already reported, or after finalization.
    fn accept(&mut self, job_id: JobId) -> Option<&mut BatchReport> {
        if self.report.is_none() || !self.seen.insert(job_id) {
            return None;
        }
        self.report.as_mut()
    }

    pub fn record(&mut self, job_id: JobId, err: &TransmuteError) -> FailureCategory {
        let category = classify(err);
        if let Some(report) = self.accept(job_id) {
            *report.failures.entry(category).or_insert(0) += 1;
            report.details.push(JobFailure {
                job_id,
                category,
                message: err.to_string(),
            });
        }
        category
    }

    pub fn record_success(&mut self, job_id: JobId, outputs: Vec<PathBuf>) {
        if let Some(report) = self.accept(job_id) {
            report.succeeded.extend(outputs);
        }
    }

    pub fn record_canceled(&mut self, job_id: JobId) {
        if let Some(report) = self.accept(job_id) {
            report.canceled += 1;
        }
    }

    pub fn add_advisory(&mut self, message: impl Into<String>) {
        if let Some(report) = self.report.as_mut() {
            report.advisories.push(message.into());
        }
    }

    pub fn is_complete(&self) -> bool {
        self.seen.len() >= self.expected
    }

    /// Yields the report once every job reported. Later calls return `None`.
    pub fn finalize(&mut self) -> Option<BatchReport> {
        if !self.is_complete() {
            return None;
        }
        let report = self.report.take()?;
        info!("Batch {} finished: {}", self.batch, report);
        Some(report)
    }
}
