//! Scripted stand-ins for the external tools, shared by the pipeline tests.

use crate::config::Config;
use crate::context::AppContext;
use crate::error::{Result, TransmuteError};
use crate::media::probe::{MediaInfo, MediaProber};
use crate::system::process::{ProcessExit, ProcessHandle, ProcessLauncher};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Behaviour of every process the fake launcher starts.
#[derive(Debug, Clone)]
pub struct Script {
    /// Progress points in percent; rendered per tool.
    percents: Vec<f64>,
    extra_lines: Vec<String>,
    exit_code: i32,
    hang: bool,
    delay: Duration,
}

impl Script {
    pub fn progress(percents: &[f64], exit_code: i32) -> Self {
        Self {
            percents: percents.to_vec(),
            extra_lines: Vec::new(),
            exit_code,
            hang: false,
            delay: Duration::from_millis(5),
        }
    }

    pub fn failing(lines: &[&str], exit_code: i32) -> Self {
        Self {
            extra_lines: lines.iter().map(|l| l.to_string()).collect(),
            ..Self::progress(&[10.0], exit_code)
        }
    }

    /// Never exits on its own.
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Self::progress(&[5.0], 0)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
struct Counters {
    live: AtomicUsize,
    peak: AtomicUsize,
    kills: AtomicUsize,
    launched: Mutex<Vec<(String, Vec<String>)>>,
}

pub struct FakeLauncher {
    script: Script,
    counters: Arc<Counters>,
}

impl FakeLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn launched(&self) -> Vec<(String, Vec<String>)> {
        self.counters
            .launched
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    pub fn kills(&self) -> usize {
        self.counters.kills.load(Ordering::SeqCst)
    }

    /// Processes started but not yet reaped.
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live processes.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(
        &self,
        executable: &str,
        args: &[String],
        _working_dir: Option<&Path>,
    ) -> Result<Box<dyn ProcessHandle>> {
        if executable == "missing-tool" {
            return Err(TransmuteError::Spawn {
                executable: executable.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        if let Ok(mut launched) = self.counters.launched.lock() {
            launched.push((executable.to_string(), args.to_vec()));
        }

        let downloader = executable == "yt-dlp";
        let mut lines: VecDeque<String> = self
            .script
            .percents
            .iter()
            .map(|p| {
                if downloader {
                    format!("[download]  {:.1}% of 10.00MiB at 1.00MiB/s ETA 00:05", p)
                } else {
                    let secs = *p;
                    format!(
                        "frame=  100 fps=25.0 size=1024kB time=00:{:02}:{:05.2} bitrate=1500kbps",
                        (secs / 60.0) as u64,
                        secs % 60.0
                    )
                }
            })
            .collect();
        lines.push_front("Input #0, matroska,webm, from 'input':".to_string());
        lines.extend(self.script.extra_lines.iter().cloned());

        // the artifact the real tool would leave behind
        let artifact = if downloader {
            arg_after(args, "-o")
                .and_then(|template| Path::new(template).parent())
                .map(|dir| dir.join("clip.webm"))
        } else {
            args.last().map(PathBuf::from)
        };

        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(FakeProcess {
            lines,
            script: self.script.clone(),
            artifact,
            counters: self.counters.clone(),
            exit: None,
        }))
    }
}

struct FakeProcess {
    lines: VecDeque<String>,
    script: Script,
    artifact: Option<PathBuf>,
    counters: Arc<Counters>,
    exit: Option<ProcessExit>,
}

impl FakeProcess {
    fn reap(&mut self, code: Option<i32>) -> ProcessExit {
        if let Some(exit) = self.exit {
            return exit;
        }
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
        let exit = ProcessExit { code };
        self.exit = Some(exit);
        exit
    }
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    async fn next_line(&mut self) -> Option<String> {
        if self.exit.is_some() {
            return None;
        }
        tokio::time::sleep(self.script.delay).await;
        match self.lines.pop_front() {
            Some(line) => Some(line),
            None if self.script.hang => std::future::pending().await,
            None => None,
        }
    }

    async fn wait(&mut self) -> ProcessExit {
        if self.exit.is_none() && self.script.exit_code == 0 {
            if let Some(artifact) = &self.artifact {
                let _ = tokio::fs::write(artifact, b"media").await;
            }
        }
        let code = self.script.exit_code;
        self.reap(Some(code))
    }

    async fn kill(&mut self) {
        if self.exit.is_some() {
            return;
        }
        self.counters.kills.fetch_add(1, Ordering::SeqCst);
        self.reap(None);
    }
}

pub struct FakeProber {
    duration_secs: f64,
}

impl FakeProber {
    pub fn with_duration(duration_secs: f64) -> Self {
        Self { duration_secs }
    }
}

#[async_trait]
impl MediaProber for FakeProber {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Ok(MediaInfo {
            duration_secs: self.duration_secs,
            size_bytes,
            audio_bitrate_bps: None,
            has_video: true,
        })
    }
}

/// A context wired to fakes, with temp dirs for work, input and output.
pub struct FakeEnv {
    pub ctx: Arc<AppContext>,
    pub launcher: Arc<FakeLauncher>,
    root: tempfile::TempDir,
}

impl FakeEnv {
    pub fn input_dir(&self) -> &Path {
        self.root.path()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.path().join("out")
    }

    pub fn with_downloader(mut self, downloader: &str) -> Self {
        let mut ctx = (*self.ctx).clone();
        ctx.downloader = downloader.to_string();
        self.ctx = Arc::new(ctx);
        self
    }

    pub fn with_prober(mut self, prober: FakeProber) -> Self {
        let mut ctx = (*self.ctx).clone();
        ctx.prober = Arc::new(prober);
        self.ctx = Arc::new(ctx);
        self
    }
}

pub fn fake_context(launcher: FakeLauncher, max_concurrency: usize) -> FakeEnv {
    let root = match tempfile::tempdir() {
        Ok(root) => root,
        Err(e) => panic!("tempdir: {}", e),
    };
    let output = root.path().join("out");
    if let Err(e) = std::fs::create_dir(&output) {
        panic!("mkdir: {}", e);
    }

    let launcher = Arc::new(launcher);
    let ctx = AppContext::builder(&Config::default())
        .encoders(HashSet::new())
        .launcher(launcher.clone())
        .prober(Arc::new(FakeProber::with_duration(100.0)))
        .work_root(root.path().join("work"))
        .output_dir(output)
        .max_concurrency(max_concurrency)
        .build();

    FakeEnv {
        ctx: Arc::new(ctx),
        launcher,
        root,
    }
}
