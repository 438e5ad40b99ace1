pub mod events;
pub mod job;
pub mod report;
pub mod runner;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use events::PipelineEvent;
pub use job::{BatchId, JobId, JobSnapshot, JobState, Source};
pub use report::{BatchReport, FailureCategory, ReportSummary};
pub use scheduler::{BatchHandle, Scheduler};
