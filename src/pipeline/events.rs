use crate::media::progress::Progress;
use crate::pipeline::job::{BatchId, JobId, JobState};
use crate::pipeline::report::{BatchReport, FailureCategory};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    JobStateChanged {
        job_id: JobId,
        batch: BatchId,
        state: JobState,
    },
    Progress {
        job_id: JobId,
        state: JobState,
        progress: Progress,
    },
    /// Non-fatal notice, e.g. a hardware encoder replaced by software.
    Advisory {
        job_id: JobId,
        message: String,
    },
    JobFailed {
        job_id: JobId,
        category: FailureCategory,
        message: String,
    },
    BatchFinished {
        report: BatchReport,
    },
}

pub fn channel() -> (broadcast::Sender<PipelineEvent>, broadcast::Receiver<PipelineEvent>) {
    broadcast::channel(EVENT_CAPACITY)
}

/// Stream view over a subscription. Lagged receivers skip the events they
/// missed instead of ending the stream.
pub fn stream(
    rx: broadcast::Receiver<PipelineEvent>,
) -> impl tokio_stream::Stream<Item = PipelineEvent> {
    BroadcastStream::new(rx).filter_map(|event| event.ok())
}
