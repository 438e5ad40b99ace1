use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use transmute::error::{Result, TransmuteError};
use transmute::media::EncoderCapabilities;
use transmute::pipeline::{events, PipelineEvent, Source};
use transmute::system::scanner::Scanner;
use transmute::{AppContext, Config, Scheduler};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URLs, media files or directories to process
    #[arg()]
    sources: Vec<String>,

    /// Preset to apply to every source
    #[arg(short, long, default_value = "mp4-match")]
    preset: String,

    /// Output directory (defaults to the configured one, then the current directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Number of concurrent jobs (defaults to the processor count)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Configuration file
    #[arg(short, long, default_value = "transmute.toml")]
    config: PathBuf,

    /// List the available presets and exit
    #[arg(long)]
    list_presets: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config).unwrap_or_else(|e| {
        warn!("Failed to load {:?}: {}. Using defaults.", args.config, e);
        Config::default()
    });

    if args.list_presets {
        for preset in config.all_presets() {
            let kind = match (preset.transcode, preset.video.is_some()) {
                (false, _) => "download only",
                (true, false) => "audio",
                (true, true) => "video",
            };
            println!("{:<16} {:<6} {}", preset.name, preset.container, kind);
        }
        return Ok(());
    }

    if args.sources.is_empty() {
        error!("No sources provided. Usage: transmute [OPTIONS] <SOURCES>...");
        return Err(TransmuteError::InvalidInput("missing sources".into()));
    }

    if let Some(jobs) = args.jobs {
        config.queue.concurrent_jobs = jobs;
    }
    if let Some(dir) = args.output_dir.clone() {
        config.paths.output_dir = Some(dir);
    }

    let preset = config
        .find_preset(&args.preset)
        .ok_or_else(|| TransmuteError::Config(format!("unknown preset '{}'", args.preset)))?
        .into_shared();

    let sources = Scanner::new()
        .expand(&args.sources)
        .iter()
        .map(|raw| Source::parse(raw))
        .collect::<Result<Vec<_>>>()?;

    info!("Transmute starting...");

    let encoders = match EncoderCapabilities::detect(&config.tools.ffmpeg).await {
        Ok(caps) => caps.video_encoders,
        Err(e) => {
            warn!("Encoder detection failed: {}. Hardware encoders disabled.", e);
            HashSet::new()
        }
    };

    let ctx = Arc::new(AppContext::from_config(&config, encoders));
    let scheduler = Scheduler::new(ctx);
    let events = events::stream(scheduler.subscribe());

    tokio::spawn(async move {
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            match event {
                PipelineEvent::Progress {
                    job_id,
                    state,
                    progress,
                } => info!(
                    "[Job {}] {}: {:.1}% (eta {}, speed {})",
                    job_id,
                    state,
                    progress.fraction * 100.0,
                    progress
                        .eta_secs
                        .map(|s| format!("{:.0}s", s))
                        .unwrap_or_else(|| "?".to_string()),
                    progress
                        .speed
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "?".to_string())
                ),
                PipelineEvent::JobFailed {
                    job_id, message, ..
                } => error!("[Job {}] {}", job_id, message),
                _ => {}
            }
        }
    });

    let handle = scheduler.submit_batch(sources, preset)?;

    let wait = handle.wait();
    tokio::pin!(wait);
    let report = tokio::select! {
        report = &mut wait => report?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, canceling remaining jobs...");
            scheduler.cancel_all();
            wait.await?
        }
    };

    for advisory in &report.advisories {
        warn!("{}", advisory);
    }
    for output in &report.succeeded {
        println!("{}", output.display());
    }
    info!("{}", report);

    if report.has_failures() {
        for failure in &report.details {
            error!("[Job {}] {}: {}", failure.job_id, failure.category, failure.message);
        }
        std::process::exit(1);
    }
    Ok(())
}
