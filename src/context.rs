//! Everything a job needs from the outside world, built once at startup and
//! passed explicitly to the scheduler and its runners.

use crate::config::Config;
use crate::media::encoder::EncoderResolver;
use crate::media::probe::{FfprobeProber, MediaProber};
use crate::system::paths::WorkDirs;
use crate::system::process::{ProcessLauncher, SystemLauncher};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppContext {
    pub ffmpeg: String,
    pub downloader: String,
    pub vaapi_device: Option<String>,
    pub threads_per_job: usize,
    pub max_concurrency: usize,
    pub default_output_dir: PathBuf,
    pub work_dirs: WorkDirs,
    pub resolver: Arc<EncoderResolver>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub prober: Arc<dyn MediaProber>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("ffmpeg", &self.ffmpeg)
            .field("downloader", &self.downloader)
            .field("max_concurrency", &self.max_concurrency)
            .field("default_output_dir", &self.default_output_dir)
            .field("work_dirs", &self.work_dirs)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Real tools from `config`, with the encoder set detected at startup.
    pub fn from_config(config: &Config, encoders: HashSet<String>) -> Self {
        Self::builder(config).encoders(encoders).build()
    }

    pub fn builder(config: &Config) -> AppContextBuilder {
        AppContextBuilder {
            ctx: AppContext {
                ffmpeg: config.tools.ffmpeg.clone(),
                downloader: config.tools.downloader.clone(),
                vaapi_device: config.tools.vaapi_device.clone(),
                threads_per_job: config.queue.threads_per_job,
                max_concurrency: config.queue.max_concurrency(),
                default_output_dir: config.paths.default_output_dir(),
                work_dirs: WorkDirs::new(config.paths.temp_root()),
                resolver: Arc::new(EncoderResolver::default()),
                launcher: Arc::new(SystemLauncher),
                prober: Arc::new(FfprobeProber::new(config.tools.ffprobe.clone())),
            },
        }
    }
}

pub struct AppContextBuilder {
    ctx: AppContext,
}

impl AppContextBuilder {
    pub fn encoders(mut self, encoders: HashSet<String>) -> Self {
        self.ctx.resolver = Arc::new(EncoderResolver::new(encoders));
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.ctx.launcher = launcher;
        self
    }

    pub fn prober(mut self, prober: Arc<dyn MediaProber>) -> Self {
        self.ctx.prober = prober;
        self
    }

    pub fn work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.ctx.work_dirs = WorkDirs::new(root);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ctx.default_output_dir = dir.into();
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.ctx.max_concurrency = limit.max(1);
        self
    }

    pub fn build(self) -> AppContext {
        self.ctx
    }
}
