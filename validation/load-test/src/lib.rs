//! Load testing harness for the render service.
//!
//! This crate provides tools to:
//! - Enumerate render jobs (one model repeated, or every model in a directory)
//! - Dispatch them through a fixed-size worker pool with backpressure
//! - Aggregate per-job timings and optionally save the rendered artifacts
//! - Output results in multiple formats (console, JSON, CSV)

pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod preprocess;
pub mod recorder;
pub mod report;
pub mod runner;
pub mod source;

pub use config::{
    JobSelection, OutputSettings, RenderSettings, TestConfig, TextureSettings, DEFAULT_ENDPOINT,
};
pub use error::LoadTestError;
pub use metrics::{AggregateStats, JobTiming, MetricsCollector, RunInfo, TestResults};
pub use pool::{DispatchError, JobHandler, WorkerPool};
pub use preprocess::{prepare_textures, ImagePreprocessor, PreprocessError, ThumbnailResizer};
pub use recorder::{ArtifactWriter, FailureKind, Outcome, RenderResult, ResultRecorder};
pub use report::{ReportFormat, ResultsReport};
pub use runner::{LoadRunner, RenderHandler};
pub use source::{parse_model, JobSource, JobTemplate};
