//! Drives one admitted job through its phases.
//!
//! Remote sources are fetched with the downloader into the job's download
//! directory, then converted with the transcoder into its convert directory.
//! The final artifact is moved to the destination and the job's intermediates
//! are removed whatever the outcome.

use crate::context::AppContext;
use crate::error::{Result, TransmuteError};
use crate::media::ffmpeg::FFmpegCommandBuilder;
use crate::media::preset::{Preset, QualityStrategy, RateControl};
use crate::media::progress::{self, Progress, ProgressTracker, ProgressUpdate};
use crate::media::{bitrate, ytdlp};
use crate::pipeline::job::{JobId, JobState, Source};
use crate::system::paths::{self, Operation};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lines of tool output kept for failure classification.
const TAIL_LINES: usize = 12;

/// Receives state changes of a running job. Implemented by the scheduler,
/// which owns the job table.
pub trait JobReporter: Send + Sync {
    /// Moves the job into `phase`. Returns false when the job may no longer
    /// run, e.g. because it was canceled meanwhile.
    fn enter_phase(&self, job_id: JobId, phase: JobState) -> bool;

    fn progress(&self, job_id: JobId, phase: JobState, progress: Progress);

    fn advisory(&self, job_id: JobId, message: String);
}

/// What the runner needs to know about a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: JobId,
    pub source: Source,
    pub preset: Arc<Preset>,
}

pub struct JobRunner {
    ctx: Arc<AppContext>,
}

enum Step {
    Cancelled,
    Line(Option<String>),
}

impl JobRunner {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Runs `job` to completion. `Err(Cancelled)` means the token fired and
    /// any subprocess has already been reaped.
    pub async fn run(
        &self,
        job: &JobSpec,
        cancel: &CancellationToken,
        reporter: &dyn JobReporter,
    ) -> Result<Vec<PathBuf>> {
        info!("═══════════════════════════════════════════════════════════");
        info!("[Job {}] Processing {} with preset '{}'", job.id, job.source, job.preset.name);

        let result = self.run_phases(job, cancel, reporter).await;
        self.ctx.work_dirs.cleanup_job(job.id.0).await;

        match &result {
            Ok(outputs) => info!("[Job {}] ✅ Completed: {:?}", job.id, outputs),
            Err(TransmuteError::Cancelled) => info!("[Job {}] Canceled", job.id),
            Err(e) => warn!("[Job {}] ❌ Failed: {}", job.id, e),
        }
        result
    }

    async fn run_phases(
        &self,
        job: &JobSpec,
        cancel: &CancellationToken,
        reporter: &dyn JobReporter,
    ) -> Result<Vec<PathBuf>> {
        let preset = &job.preset;
        let dest_dir = preset
            .output_dir
            .clone()
            .unwrap_or_else(|| self.ctx.default_output_dir.clone());

        let (input, source_name) = match &job.source {
            Source::Remote(url) => {
                self.enter(job.id, JobState::Acquiring, cancel, reporter)?;
                info!("[Job {}] Phase 1: Acquisition", job.id);
                let artifact = self.acquire(job, url, cancel, reporter).await?;
                let name = file_stem(&artifact);
                (artifact, name)
            }
            Source::Local(path) => (path.clone(), file_stem(path)),
        };

        let stem = preset.render_name(&source_name);

        if !preset.transcode {
            let ext = input
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or(&preset.container)
                .to_string();
            let placed = paths::place_output(&input, &dest_dir, &stem, &ext).await?;
            return Ok(vec![placed]);
        }

        self.enter(job.id, JobState::Converting, cancel, reporter)?;
        info!("[Job {}] Phase 2: Conversion", job.id);
        let artifact = self.convert(job, &input, &stem, cancel, reporter).await?;
        let placed = paths::place_output(&artifact, &dest_dir, &stem, &preset.container).await?;
        Ok(vec![placed])
    }

    fn enter(
        &self,
        job_id: JobId,
        phase: JobState,
        cancel: &CancellationToken,
        reporter: &dyn JobReporter,
    ) -> Result<()> {
        if cancel.is_cancelled() || !reporter.enter_phase(job_id, phase) {
            return Err(TransmuteError::Cancelled);
        }
        Ok(())
    }

    async fn acquire(
        &self,
        job: &JobSpec,
        url: &str,
        cancel: &CancellationToken,
        reporter: &dyn JobReporter,
    ) -> Result<PathBuf> {
        let dir = self
            .ctx
            .work_dirs
            .create_job_dir(Operation::Download, job.id.0)
            .await?;
        let args = ytdlp::download_args(url, &dir, &job.preset, &self.ctx.ffmpeg);

        self.supervise(
            job.id,
            JobState::Acquiring,
            &self.ctx.downloader,
            &args,
            cancel,
            reporter,
            progress::parse_download,
        )
        .await?;

        paths::find_artifact(&dir)
            .await?
            .ok_or_else(|| TransmuteError::SubprocessFailure {
                tool: self.ctx.downloader.clone(),
                code: Some(0),
                detail: "download finished without producing a file".to_string(),
            })
    }

    async fn convert(
        &self,
        job: &JobSpec,
        input: &Path,
        stem: &str,
        cancel: &CancellationToken,
        reporter: &dyn JobReporter,
    ) -> Result<PathBuf> {
        let preset = &job.preset;
        let info = self.ctx.prober.probe(input).await?;
        debug!("[Job {}] Source: {:?}", job.id, info);

        let dir = self
            .ctx
            .work_dirs
            .create_job_dir(Operation::Convert, job.id.0)
            .await?;
        let output = dir.join(format!("{}.{}", paths::sanitize_file_name(stem), preset.container));

        let mut builder = FFmpegCommandBuilder::new(input, &output)
            .with_audio(preset.audio.clone())
            .with_vaapi_device(self.ctx.vaapi_device.as_deref())
            .with_threads(self.ctx.threads_per_job);

        if let Some(video) = &preset.video {
            let rate_control = match video.quality {
                QualityStrategy::MatchSource => {
                    let bps = bitrate::video_bitrate_for_file(input, &info)?;
                    info!("[Job {}] Matching source video bitrate: {} kbps", job.id, bps / 1000);
                    RateControl::Bitrate { bps }
                }
                QualityStrategy::Fixed { rate } => rate,
            };

            let resolution = self.ctx.resolver.resolve(video.requested_encoder());
            if let Some(from) = resolution.fallback_from {
                reporter.advisory(
                    job.id,
                    format!(
                        "{} encoder {} is not available, using {} instead",
                        from.accel,
                        from.label(),
                        resolution.codec_name()
                    ),
                );
            }
            info!("[Job {}] Encoder: {}", job.id, resolution.codec_name());
            builder = builder.with_video(video, resolution, rate_control);
        }

        let args = builder.build();
        let total = info.duration_secs;
        self.supervise(
            job.id,
            JobState::Converting,
            &self.ctx.ffmpeg,
            &args,
            cancel,
            reporter,
            move |line| progress::parse(line, total),
        )
        .await?;

        if !output.is_file() {
            return Err(TransmuteError::SubprocessFailure {
                tool: self.ctx.ffmpeg.clone(),
                code: Some(0),
                detail: format!("no output written to {}", output.display()),
            });
        }
        Ok(output)
    }

    /// Runs one subprocess to exit, feeding its lines through `parse` and
    /// racing every read against the cancellation token.
    #[allow(clippy::too_many_arguments)]
    async fn supervise<F>(
        &self,
        job_id: JobId,
        phase: JobState,
        tool: &str,
        args: &[String],
        cancel: &CancellationToken,
        reporter: &dyn JobReporter,
        parse: F,
    ) -> Result<()>
    where
        F: Fn(&str) -> Option<ProgressUpdate> + Send,
    {
        if cancel.is_cancelled() {
            return Err(TransmuteError::Cancelled);
        }
        let mut handle = self.ctx.launcher.launch(tool, args, None).await?;
        let mut tracker = ProgressTracker::new();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                line = handle.next_line() => Step::Line(line),
            };

            match step {
                Step::Cancelled => {
                    info!("[Job {}] Cancellation requested, stopping {}", job_id, tool);
                    handle.kill().await;
                    return Err(TransmuteError::Cancelled);
                }
                Step::Line(None) => break,
                Step::Line(Some(line)) => match parse(&line) {
                    Some(update) => {
                        if let Some(progress) = tracker.advance(update) {
                            reporter.progress(job_id, phase, progress);
                        }
                    }
                    None => {
                        debug!("[Job {}] {}: {}", job_id, tool, line);
                        if tail.len() == TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                },
            }
        }

        let exit = handle.wait().await;
        if cancel.is_cancelled() {
            return Err(TransmuteError::Cancelled);
        }
        if exit.success() {
            return Ok(());
        }

        Err(TransmuteError::SubprocessFailure {
            tool: tool.to_string(),
            code: exit.code,
            detail: Vec::from(tail).join("\n"),
        })
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::preset::Preset;
    use crate::media::probe::{MediaInfo, MediaProber};
    use crate::pipeline::testing::{fake_context, FakeLauncher, FakeProber, Script};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fires the job's token while the source is being probed.
    struct CancelOnProbe(CancellationToken);

    #[async_trait]
    impl MediaProber for CancelOnProbe {
        async fn probe(&self, _path: &Path) -> Result<MediaInfo> {
            self.0.cancel();
            Ok(MediaInfo {
                duration_secs: 10.0,
                size_bytes: 4096,
                audio_bitrate_bps: None,
                has_video: true,
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        phases: Mutex<Vec<JobState>>,
        progress: Mutex<Vec<f64>>,
        advisories: Mutex<Vec<String>>,
    }

    impl JobReporter for Recorder {
        fn enter_phase(&self, _job_id: JobId, phase: JobState) -> bool {
            if let Ok(mut phases) = self.phases.lock() {
                phases.push(phase);
            }
            true
        }

        fn progress(&self, _job_id: JobId, _phase: JobState, progress: Progress) {
            if let Ok(mut seen) = self.progress.lock() {
                seen.push(progress.fraction);
            }
        }

        fn advisory(&self, _job_id: JobId, message: String) {
            if let Ok(mut seen) = self.advisories.lock() {
                seen.push(message);
            }
        }
    }

    fn preset(name: &str) -> Arc<Preset> {
        match Preset::builtin().into_iter().find(|p| p.name == name) {
            Some(preset) => preset.into_shared(),
            None => panic!("missing builtin preset {}", name),
        }
    }

    fn source_file(dir: &Path) -> PathBuf {
        let path = dir.join("holiday.mkv");
        if let Err(e) = std::fs::write(&path, vec![0u8; 4096]) {
            panic!("write: {}", e);
        }
        path
    }

    #[tokio::test]
    async fn test_local_conversion_places_output() {
        let env = fake_context(FakeLauncher::new(Script::progress(&[25.0, 10.0, 75.0], 0)), 2);
        let input = source_file(env.input_dir());
        let runner = JobRunner::new(env.ctx.clone());
        let recorder = Recorder::default();
        let job = JobSpec {
            id: JobId(1),
            source: Source::Local(input),
            preset: preset("mp4-h265"),
        };

        let outputs = match runner.run(&job, &CancellationToken::new(), &recorder).await {
            Ok(outputs) => outputs,
            Err(e) => panic!("conversion should succeed: {}", e),
        };
        assert_eq!(outputs, vec![env.output_dir().join("holiday-h265.mp4")]);
        assert!(outputs[0].is_file());

        let phases = recorder.phases.lock().map(|p| p.clone()).unwrap_or_default();
        assert_eq!(phases, vec![JobState::Converting]);
        let progress = recorder.progress.lock().map(|p| p.clone()).unwrap_or_default();
        assert_eq!(progress, vec![0.25, 0.75]);
        assert!(!env.ctx.work_dirs.operation_dir(Operation::Convert).join("1").exists());
    }

    #[tokio::test]
    async fn test_hardware_fallback_raises_advisory() {
        let env = fake_context(FakeLauncher::new(Script::progress(&[50.0], 0)), 1);
        let input = source_file(env.input_dir());
        let mut preset = (*preset("mp4-h265")).clone();
        if let Some(video) = preset.video.as_mut() {
            video.hardware = crate::media::encoder::HardwareAccel::Nvenc;
        }
        let job = JobSpec {
            id: JobId(2),
            source: Source::Local(input),
            preset: preset.into_shared(),
        };
        let recorder = Recorder::default();
        let result = JobRunner::new(env.ctx.clone())
            .run(&job, &CancellationToken::new(), &recorder)
            .await;
        assert!(result.is_ok());

        let advisories = recorder.advisories.lock().map(|a| a.clone()).unwrap_or_default();
        assert_eq!(advisories.len(), 1);
        assert!(advisories[0].contains("hevc_nvenc"));
        assert!(advisories[0].contains("libx265"));

        let launched = env.launcher.launched();
        assert!(launched[0].1.iter().any(|a| a == "libx265"));
    }

    #[tokio::test]
    async fn test_remote_download_then_convert() {
        let env = fake_context(FakeLauncher::new(Script::progress(&[40.0, 100.0], 0)), 1);
        let job = JobSpec {
            id: JobId(3),
            source: Source::Remote("https://example.com/watch?v=1".to_string()),
            preset: preset("mp3"),
        };
        let recorder = Recorder::default();
        let outputs = match JobRunner::new(env.ctx.clone())
            .run(&job, &CancellationToken::new(), &recorder)
            .await
        {
            Ok(outputs) => outputs,
            Err(e) => panic!("job should succeed: {}", e),
        };
        assert_eq!(outputs, vec![env.output_dir().join("clip.mp3")]);

        let phases = recorder.phases.lock().map(|p| p.clone()).unwrap_or_default();
        assert_eq!(phases, vec![JobState::Acquiring, JobState::Converting]);
        let tools: Vec<_> = env.launcher.launched().into_iter().map(|(tool, _)| tool).collect();
        assert_eq!(tools, vec!["yt-dlp".to_string(), "ffmpeg".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_conversion_is_classified_from_output() {
        let script = Script::failing(&["/out/x.mp4: No space left on device"], 1);
        let env = fake_context(FakeLauncher::new(script), 1);
        let input = source_file(env.input_dir());
        let job = JobSpec {
            id: JobId(4),
            source: Source::Local(input),
            preset: preset("mp3"),
        };
        let result = JobRunner::new(env.ctx.clone())
            .run(&job, &CancellationToken::new(), &Recorder::default())
            .await;
        match result {
            Err(err) => assert_eq!(
                crate::pipeline::report::classify(&err),
                crate::pipeline::report::FailureCategory::InsufficientSpace
            ),
            Ok(_) => panic!("conversion should fail"),
        }
        assert_eq!(std::fs::read_dir(env.output_dir()).map(|d| d.count()).unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn test_cancel_kills_running_process() {
        let env = fake_context(FakeLauncher::new(Script::hang()), 1);
        let input = source_file(env.input_dir());
        let job = JobSpec {
            id: JobId(5),
            source: Source::Local(input),
            preset: preset("mp3"),
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = JobRunner::new(env.ctx.clone())
            .run(&job, &cancel, &Recorder::default())
            .await;
        assert!(matches!(result, Err(TransmuteError::Cancelled)));
        assert_eq!(env.launcher.kills(), 1);
        assert_eq!(env.launcher.live(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_probe_never_launches() {
        let cancel = CancellationToken::new();
        let env = fake_context(FakeLauncher::new(Script::progress(&[50.0], 0)), 1);
        let mut ctx = (*env.ctx).clone();
        ctx.prober = Arc::new(CancelOnProbe(cancel.clone()));
        let input = source_file(env.input_dir());
        let job = JobSpec {
            id: JobId(7),
            source: Source::Local(input),
            preset: preset("mp3"),
        };

        let result = JobRunner::new(Arc::new(ctx))
            .run(&job, &cancel, &Recorder::default())
            .await;
        assert!(matches!(result, Err(TransmuteError::Cancelled)));
        assert!(env.launcher.launched().is_empty());
        assert_eq!(env.launcher.kills(), 0);
    }

    #[tokio::test]
    async fn test_match_source_rejects_zero_duration() {
        let env = fake_context(FakeLauncher::new(Script::progress(&[], 0)), 1)
            .with_prober(FakeProber::with_duration(0.0));
        let input = source_file(env.input_dir());
        let job = JobSpec {
            id: JobId(6),
            source: Source::Local(input),
            preset: preset("mp4-match"),
        };
        let result = JobRunner::new(env.ctx.clone())
            .run(&job, &CancellationToken::new(), &Recorder::default())
            .await;
        assert!(matches!(result, Err(TransmuteError::InvalidInput(_))));
        assert!(env.launcher.launched().is_empty());
    }
}
