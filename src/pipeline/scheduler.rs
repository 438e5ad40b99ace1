//! FIFO job queue with bounded concurrency.
//!
//! Queue, job table and active count live behind one mutex that is never held
//! across an await. Admission happens in `pump`, which runs after every
//! submission and every terminal transition, so a freed slot is always
//! handed to the oldest queued job.

use crate::context::AppContext;
use crate::error::{Result, TransmuteError};
use crate::media::preset::Preset;
use crate::media::progress::Progress;
use crate::pipeline::events::{self, PipelineEvent};
use crate::pipeline::job::{BatchId, Job, JobId, JobResult, JobSnapshot, JobState, Source};
use crate::pipeline::report::{BatchReport, ErrorAggregator};
use crate::pipeline::runner::{JobReporter, JobRunner, JobSpec};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Entry {
    job: Job,
    cancel: CancellationToken,
}

struct Batch {
    aggregator: ErrorAggregator,
    jobs: Vec<JobId>,
    done: Option<oneshot::Sender<BatchReport>>,
}

#[derive(Default)]
struct State {
    queue: VecDeque<JobId>,
    jobs: HashMap<JobId, Entry>,
    batches: HashMap<BatchId, Batch>,
    active: usize,
}

struct Inner {
    runner: JobRunner,
    max_concurrency: usize,
    events: broadcast::Sender<PipelineEvent>,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Returned by a submission; resolves to the batch report once every job
/// of the batch is terminal.
#[derive(Debug)]
pub struct BatchHandle {
    pub batch: BatchId,
    pub jobs: Vec<JobId>,
    report: oneshot::Receiver<BatchReport>,
}

impl BatchHandle {
    pub async fn wait(self) -> Result<BatchReport> {
        self.report.await.map_err(|_| TransmuteError::Cancelled)
    }
}

impl Scheduler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let (events, _) = events::channel();
        let max_concurrency = ctx.max_concurrency.max(1);
        info!("Scheduler ready: up to {} concurrent job(s)", max_concurrency);
        Self {
            inner: Arc::new(Inner {
                runner: JobRunner::new(ctx),
                max_concurrency,
                events,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    /// Queues one job per source. Must be called from within a tokio runtime.
    pub fn submit_batch(&self, sources: Vec<Source>, preset: Arc<Preset>) -> Result<BatchHandle> {
        if sources.is_empty() {
            return Err(TransmuteError::InvalidInput("batch has no sources".to_string()));
        }
        if !preset.transcode {
            if let Some(local) = sources.iter().find(|s| !s.is_remote()) {
                return Err(TransmuteError::InvalidInput(format!(
                    "preset '{}' only downloads, but {} is a local file",
                    preset.name, local
                )));
            }
        }

        let batch = BatchId::new();
        let (tx, rx) = oneshot::channel();
        let mut ids = Vec::with_capacity(sources.len());
        {
            let mut state = self.inner.lock();
            for source in sources {
                let job = Job::new(batch, source, preset.clone());
                let id = job.id;
                info!("[Job {}] Queued: {}", id, job.source);
                self.inner.emit(PipelineEvent::JobStateChanged {
                    job_id: id,
                    batch,
                    state: JobState::Queued,
                });
                state.jobs.insert(
                    id,
                    Entry {
                        job,
                        cancel: CancellationToken::new(),
                    },
                );
                state.queue.push_back(id);
                ids.push(id);
            }
            state.batches.insert(
                batch,
                Batch {
                    aggregator: ErrorAggregator::new(batch, ids.len()),
                    jobs: ids.clone(),
                    done: Some(tx),
                },
            );
        }
        info!("Batch {}: {} job(s) with preset '{}'", batch, ids.len(), preset.name);

        Inner::pump(&self.inner);
        Ok(BatchHandle {
            batch,
            jobs: ids,
            report: rx,
        })
    }

    pub fn submit(&self, source: Source, preset: Arc<Preset>) -> Result<BatchHandle> {
        self.submit_batch(vec![source], preset)
    }

    /// Cancels a queued or running job. Returns false when the job is
    /// unknown or already terminal.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let mut state = self.inner.lock();
        let current = match state.jobs.get(&job_id) {
            Some(entry) => entry.job.state(),
            None => return false,
        };

        match current {
            JobState::Queued => {
                state.queue.retain(|id| *id != job_id);
                info!("[Job {}] Canceled while queued", job_id);
                self.inner.settle(&mut state, job_id, Err(TransmuteError::Cancelled));
                true
            }
            JobState::Acquiring | JobState::Converting => {
                // the runner kills the subprocess and reports back
                if let Some(entry) = state.jobs.get(&job_id) {
                    info!("[Job {}] Cancel requested", job_id);
                    entry.cancel.cancel();
                }
                true
            }
            _ => false,
        }
    }

    pub fn cancel_batch(&self, batch: BatchId) -> usize {
        let ids = {
            let state = self.inner.lock();
            state
                .batches
                .get(&batch)
                .map(|b| b.jobs.clone())
                .unwrap_or_default()
        };
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn cancel_all(&self) -> usize {
        let batches: Vec<BatchId> = self.inner.lock().batches.keys().copied().collect();
        batches.into_iter().map(|b| self.cancel_batch(b)).sum()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active
    }

    pub fn queued_count(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn job(&self, job_id: JobId) -> Option<JobSnapshot> {
        self.inner.lock().jobs.get(&job_id).map(|e| e.job.snapshot())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            error!("Scheduler state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn emit(&self, event: PipelineEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Admits queued jobs while slots are free.
    fn pump(inner: &Arc<Inner>) {
        let mut admitted = Vec::new();
        {
            let mut state = inner.lock();
            while state.active < inner.max_concurrency {
                let Some(id) = state.queue.pop_front() else {
                    break;
                };
                let Some(entry) = state.jobs.get_mut(&id) else {
                    continue;
                };
                if entry.job.state() != JobState::Queued {
                    continue;
                }
                let phase = entry.job.first_phase();
                if let Err(e) = entry.job.transition(phase) {
                    error!("[Job {}] Could not start: {}", id, e);
                    continue;
                }
                let spec = JobSpec {
                    id,
                    source: entry.job.source.clone(),
                    preset: entry.job.preset.clone(),
                };
                let batch = entry.job.batch;
                let cancel = entry.cancel.clone();
                state.active += 1;
                debug!("[Job {}] Admitted ({} active)", id, state.active);
                inner.emit(PipelineEvent::JobStateChanged {
                    job_id: id,
                    batch,
                    state: phase,
                });
                admitted.push((spec, cancel));
            }
        }

        for (spec, cancel) in admitted {
            let inner = inner.clone();
            tokio::spawn(async move {
                let result = inner.runner.run(&spec, &cancel, inner.as_ref()).await;
                {
                    let mut state = inner.lock();
                    state.active = state.active.saturating_sub(1);
                    inner.settle(&mut state, spec.id, result);
                }
                Inner::pump(&inner);
            });
        }
    }

    /// Moves a job to its terminal state, records it with its batch and
    /// produces the batch report when it was the last one.
    fn settle(&self, state: &mut State, job_id: JobId, outcome: Result<Vec<PathBuf>>) {
        let Some(entry) = state.jobs.get_mut(&job_id) else {
            warn!("[Job {}] Finished but no longer tracked", job_id);
            return;
        };
        let batch_id = entry.job.batch;
        let Some(batch) = state.batches.get_mut(&batch_id) else {
            warn!("[Job {}] Batch {} missing", job_id, batch_id);
            return;
        };

        let result = match outcome {
            Ok(outputs) => {
                batch.aggregator.record_success(job_id, outputs.clone());
                JobResult::Completed { outputs }
            }
            Err(TransmuteError::Cancelled) => {
                batch.aggregator.record_canceled(job_id);
                JobResult::Canceled
            }
            Err(err) => {
                let category = batch.aggregator.record(job_id, &err);
                let message = err.to_string();
                self.emit(PipelineEvent::JobFailed {
                    job_id,
                    category,
                    message: message.clone(),
                });
                JobResult::Failed { category, message }
            }
        };

        if let Err(e) = entry.job.finish(result) {
            error!("[Job {}] {}", job_id, e);
        }
        let terminal = entry.job.state();
        info!("[Job {}] {}", job_id, terminal);
        self.emit(PipelineEvent::JobStateChanged {
            job_id,
            batch: batch_id,
            state: terminal,
        });
        if terminal == JobState::Canceled {
            state.jobs.remove(&job_id);
        }

        let finished = state
            .batches
            .get_mut(&batch_id)
            .and_then(|b| b.aggregator.finalize());
        if let Some(report) = finished {
            if let Some(batch) = state.batches.remove(&batch_id) {
                for id in &batch.jobs {
                    state.jobs.remove(id);
                }
                if let Some(done) = batch.done {
                    let _ = done.send(report.clone());
                }
            }
            self.emit(PipelineEvent::BatchFinished { report });
        }
    }
}

impl JobReporter for Inner {
    fn enter_phase(&self, job_id: JobId, phase: JobState) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.jobs.get_mut(&job_id) else {
            return false;
        };
        let current = entry.job.state();
        if current == phase {
            return true;
        }
        if entry.cancel.is_cancelled() || entry.job.transition(phase).is_err() {
            return false;
        }
        info!("[Job {}] {} -> {}", job_id, current, phase);
        self.emit(PipelineEvent::JobStateChanged {
            job_id,
            batch: entry.job.batch,
            state: phase,
        });
        true
    }

    fn progress(&self, job_id: JobId, phase: JobState, progress: Progress) {
        {
            let mut state = self.lock();
            match state.jobs.get_mut(&job_id) {
                Some(entry) if entry.job.state() == phase => entry.job.progress = progress,
                _ => return,
            }
        }
        self.emit(PipelineEvent::Progress {
            job_id,
            state: phase,
            progress,
        });
    }

    fn advisory(&self, job_id: JobId, message: String) {
        warn!("[Job {}] {}", job_id, message);
        {
            let mut state = self.lock();
            let batch = state.jobs.get(&job_id).map(|e| e.job.batch);
            if let Some(batch) = batch.and_then(|b| state.batches.get_mut(&b)) {
                batch.aggregator.add_advisory(message.clone());
            }
        }
        self.emit(PipelineEvent::Advisory { job_id, message });
    }
}
