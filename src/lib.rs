pub mod config;
pub mod context;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod system;

pub use config::Config;
pub use context::AppContext;
pub use error::{Result, TransmuteError};
pub use pipeline::{BatchReport, PipelineEvent, Scheduler};
