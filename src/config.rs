use crate::error::{Result, TransmuteError};
use crate::media::preset::Preset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub presets: Vec<Preset>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    #[serde(default = "default_downloader")]
    pub downloader: String,
    /// Render node for VAAPI encoders.
    #[serde(default)]
    pub vaapi_device: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct QueueConfig {
    /// 0 means one job per logical processor.
    #[serde(default)]
    pub concurrent_jobs: usize,
    /// Passed to the transcoder as `-threads`; 0 leaves it to the encoder.
    #[serde(default)]
    pub threads_per_job: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PathsConfig {
    /// Root for intermediate artifacts; defaults to `<system temp>/transmute`.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Destination used when a preset has no output directory of its own.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_downloader() -> String {
    "yt-dlp".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            downloader: default_downloader(),
            vaapi_device: None,
        }
    }
}

impl QueueConfig {
    pub fn max_concurrency(&self) -> usize {
        if self.concurrent_jobs == 0 {
            num_cpus::get().max(1)
        } else {
            self.concurrent_jobs
        }
    }
}

impl PathsConfig {
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("transmute"))
    }

    pub fn default_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| TransmuteError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (i, preset) in self.presets.iter().enumerate() {
            if preset.name.trim().is_empty() {
                return Err(TransmuteError::Config(format!("preset #{} has no name", i + 1)));
            }
            if preset.container.trim().is_empty() {
                return Err(TransmuteError::Config(format!(
                    "preset '{}' has no container",
                    preset.name
                )));
            }
            if !preset.name_template.contains("{name}") {
                return Err(TransmuteError::Config(format!(
                    "preset '{}' name_template must contain {{name}}",
                    preset.name
                )));
            }
        }
        Ok(())
    }

    /// Configured presets first, so a config entry can shadow a built-in.
    pub fn all_presets(&self) -> Vec<Preset> {
        let mut presets = self.presets.clone();
        for builtin in Preset::builtin() {
            if !presets.iter().any(|p| p.name == builtin.name) {
                presets.push(builtin);
            }
        }
        presets
    }

    pub fn find_preset(&self, name: &str) -> Option<Preset> {
        self.all_presets().into_iter().find(|p| p.name == name)
    }
}
