//! Per-job outcomes: aggregation, console lines and artifact persistence.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use indicatif::ProgressBar;
use tracing::{debug, warn};

use crate::metrics::{AggregateStats, JobTiming};

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The request could not be built.
    Build(String),
    /// Connection or transfer error.
    Network(String),
    /// The client timeout expired.
    Timeout,
    /// The server answered with a non-2xx status.
    Status(u16),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Build(reason) => write!(f, "build failed: {}", reason),
            FailureKind::Network(reason) => write!(f, "network error: {}", reason),
            FailureKind::Timeout => write!(f, "timed out"),
            FailureKind::Status(status) => write!(f, "HTTP {}", status),
        }
    }
}

/// Terminal state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded { status: u16, bytes: usize },
    Failed(FailureKind),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded { .. })
    }
}

/// Everything known about one finished job.
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub sequence: usize,
    pub label: String,
    pub model_reference: String,
    /// File name the artifact is persisted under.
    pub artifact_name: String,
    pub elapsed: Duration,
    pub outcome: Outcome,
    pub body: Option<Bytes>,
}

/// Writes successful bodies to `<dir>/<artifact name>`.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    /// Creates `dir` if missing.
    pub async fn create(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write through a per-job temp file and rename into place, so jobs that
    /// share an artifact name never leave interleaved bytes behind.
    pub async fn write(&self, name: &str, sequence: usize, body: &[u8]) -> std::io::Result<PathBuf> {
        let final_path = self.dir.join(name);
        let temp_path = self.dir.join(format!(".{}.{}.partial", name, sequence));

        if let Err(e) = tokio::fs::write(&temp_path, body).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        Ok(final_path)
    }
}

/// Records every job's result into shared [`AggregateStats`].
pub struct ResultRecorder {
    stats: Arc<AggregateStats>,
    artifacts: Option<ArtifactWriter>,
    progress: ProgressBar,
    print_jobs: bool,
    persist_failures: AtomicU64,
}

impl ResultRecorder {
    pub fn new(stats: Arc<AggregateStats>) -> Self {
        Self {
            stats,
            artifacts: None,
            progress: ProgressBar::hidden(),
            print_jobs: false,
            persist_failures: AtomicU64::new(0),
        }
    }

    /// Persist successful bodies.
    pub fn with_artifacts(mut self, writer: ArtifactWriter) -> Self {
        self.artifacts = Some(writer);
        self
    }

    /// Print one line per job to stdout.
    pub fn with_job_lines(mut self, enabled: bool) -> Self {
        self.print_jobs = enabled;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn stats(&self) -> &Arc<AggregateStats> {
        &self.stats
    }

    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> &ProgressBar {
        &self.progress
    }

    /// Aggregate, print, then persist outside the stats lock.
    pub async fn record(&self, result: RenderResult) {
        let timing = JobTiming {
            sequence: result.sequence,
            label: result.label.clone(),
            elapsed_ms: result.elapsed.as_secs_f64() * 1000.0,
            succeeded: result.outcome.is_success(),
            status: match &result.outcome {
                Outcome::Succeeded { status, .. } => Some(*status),
                Outcome::Failed(FailureKind::Status(status)) => Some(*status),
                Outcome::Failed(_) => None,
            },
            error: match &result.outcome {
                Outcome::Failed(kind) => Some(kind.to_string()),
                Outcome::Succeeded { .. } => None,
            },
        };

        self.stats.with(|m| match &result.outcome {
            Outcome::Succeeded { bytes, .. } => m.record_success(timing, result.elapsed, *bytes),
            Outcome::Failed(_) => m.record_failure(timing, result.elapsed),
        });

        if self.print_jobs {
            let line = job_line(&result);
            self.progress.suspend(|| println!("{}", line));
        }
        self.progress.inc(1);

        if let Outcome::Failed(kind) = &result.outcome {
            debug!(model = %result.model_reference, error = %kind, "Job failed");
            return;
        }

        if let (Some(writer), Some(body)) = (&self.artifacts, &result.body) {
            match writer.write(&result.artifact_name, result.sequence, body).await {
                Ok(path) => debug!(path = %path.display(), "Saved artifact"),
                Err(e) => {
                    self.persist_failures.fetch_add(1, Ordering::SeqCst);
                    warn!(
                        artifact = %result.artifact_name,
                        dir = %writer.dir().display(),
                        error = %e,
                        "Failed to save artifact"
                    );
                }
            }
        }
    }
}

/// `{label:<50}{elapsed}` for successes, `{label:<50}error` for failures.
pub fn job_line(result: &RenderResult) -> String {
    match &result.outcome {
        Outcome::Succeeded { .. } => format!("{:<50}{:?}", result.label, result.elapsed),
        Outcome::Failed(_) => format!("{:<50}error", result.label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(sequence: usize, outcome: Outcome) -> RenderResult {
        let body = outcome.is_success().then(|| Bytes::from_static(b"PNGDATA"));
        RenderResult {
            sequence,
            label: "shirt.glb".to_string(),
            model_reference: "https://x/shirt.glb".to_string(),
            artifact_name: "shirt.png".to_string(),
            elapsed: Duration::from_millis(1500),
            outcome,
            body,
        }
    }

    #[test]
    fn test_job_line_format() {
        let ok = result(0, Outcome::Succeeded { status: 200, bytes: 7 });
        assert_eq!(job_line(&ok), format!("{:<50}1.5s", "shirt.glb"));

        let failed = result(1, Outcome::Failed(FailureKind::Timeout));
        let line = job_line(&failed);
        assert_eq!(line.len(), 55);
        assert!(line.ends_with("error"));
    }

    #[tokio::test]
    async fn test_record_updates_stats() {
        let stats = Arc::new(AggregateStats::new());
        let recorder = ResultRecorder::new(stats.clone());

        recorder.record(result(0, Outcome::Succeeded { status: 200, bytes: 7 })).await;
        recorder.record(result(1, Outcome::Failed(FailureKind::Status(502)))).await;

        let timings = stats.timings();
        assert_eq!(timings.len(), 2);
        assert_eq!(timings[1].status, Some(502));
        assert_eq!(timings[1].error.as_deref(), Some("HTTP 502"));
        assert_eq!(stats.failure_count(), 1);
        assert_eq!(recorder.progress().position(), 2);
    }

    #[tokio::test]
    async fn test_persists_successes_only() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::create(dir.path().join("out")).await.unwrap();
        let recorder = ResultRecorder::new(Arc::new(AggregateStats::new())).with_artifacts(writer);

        let mut failed = result(1, Outcome::Failed(FailureKind::Status(500)));
        failed.artifact_name = "broken.png".to_string();
        recorder.record(failed).await;
        recorder.record(result(0, Outcome::Succeeded { status: 200, bytes: 7 })).await;

        let saved = std::fs::read(dir.path().join("out/shirt.png")).unwrap();
        assert_eq!(saved, b"PNGDATA");
        assert!(!dir.path().join("out/broken.png").exists());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("out"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_success() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::create(dir.path()).await.unwrap();
        // A directory in the way makes the rename fail.
        std::fs::create_dir(dir.path().join("shirt.png")).unwrap();

        let stats = Arc::new(AggregateStats::new());
        let recorder = ResultRecorder::new(stats.clone()).with_artifacts(writer);
        recorder.record(result(0, Outcome::Succeeded { status: 200, bytes: 7 })).await;

        assert_eq!(recorder.persist_failures(), 1);
        assert_eq!(stats.success_count(), 1);
        assert_eq!(stats.failure_count(), 0);
    }
}
