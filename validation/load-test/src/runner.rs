//! HTTP request execution and load test orchestration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use render_protocol::{JobDescriptor, RenderRequest};
use tracing::{debug, error, info, warn};

use crate::config::TestConfig;
use crate::error::{LoadTestError, Result};
use crate::metrics::{AggregateStats, RunInfo, TestResults};
use crate::pool::{JobHandler, WorkerPool};
use crate::preprocess::{prepare_textures, ImagePreprocessor, ThumbnailResizer};
use crate::recorder::{ArtifactWriter, FailureKind, Outcome, RenderResult, ResultRecorder};
use crate::source::JobTemplate;

/// Builds, sends and classifies one render job, then hands it to the recorder.
pub struct RenderHandler {
    client: reqwest::Client,
    endpoint: String,
    recorder: Arc<ResultRecorder>,
}

impl RenderHandler {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, recorder: Arc<ResultRecorder>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            recorder,
        }
    }

    /// Run one job to a terminal state. Never panics on job errors.
    pub async fn execute(&self, job: JobDescriptor) -> RenderResult {
        let start = Instant::now();
        let sequence = job.sequence;
        let label = job.label.clone();
        let model_reference = job.model.reference();
        let artifact_name = job.artifact_name();

        let (outcome, body) = self.render(job).await;

        RenderResult {
            sequence,
            label,
            model_reference,
            artifact_name,
            elapsed: start.elapsed(),
            outcome,
            body,
        }
    }

    async fn render(&self, job: JobDescriptor) -> (Outcome, Option<bytes::Bytes>) {
        // Model files are read while building.
        let built = tokio::task::spawn_blocking(move || RenderRequest::build(&job)).await;
        let request = match built {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => return (Outcome::Failed(FailureKind::Build(e.reason())), None),
            Err(e) => return (Outcome::Failed(FailureKind::Build(e.to_string())), None),
        };

        let response = match request.into_builder(&self.client, &self.endpoint).send().await {
            Ok(response) => response,
            Err(e) => return (Outcome::Failed(classify(&e)), None),
        };

        let status = response.status();
        if !status.is_success() {
            return (Outcome::Failed(FailureKind::Status(status.as_u16())), None);
        }

        match response.bytes().await {
            Ok(body) => (
                Outcome::Succeeded {
                    status: status.as_u16(),
                    bytes: body.len(),
                },
                Some(body),
            ),
            Err(e) => (Outcome::Failed(classify(&e)), None),
        }
    }
}

#[async_trait]
impl JobHandler<JobDescriptor> for RenderHandler {
    async fn handle(&self, job: JobDescriptor) {
        let result = self.execute(job).await;
        self.recorder.record(result).await;
    }
}

fn classify(e: &reqwest::Error) -> FailureKind {
    if e.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::Network(e.to_string())
    }
}

/// Executes load tests with controlled concurrency.
pub struct LoadRunner {
    client: reqwest::Client,
    config: TestConfig,
    preprocessor: Arc<dyn ImagePreprocessor>,
    console: bool,
}

impl LoadRunner {
    /// Create a new load runner.
    pub fn new(config: TestConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| LoadTestError::Config(e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(config.concurrency)
            .build()?;

        Ok(Self {
            client,
            config,
            preprocessor: Arc::new(ThumbnailResizer),
            console: false,
        })
    }

    /// Replace the texture preprocessor.
    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn ImagePreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// Print the run header, one line per job and a progress bar.
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Run the load test.
    ///
    /// Only setup failures are returned as errors. Per-job failures end up in
    /// the results.
    pub async fn run(&self) -> Result<TestResults> {
        let config = &self.config;
        let source = config.jobs.to_source();

        let textures = prepare_textures(
            &config.textures.slots,
            config.textures.max_dimension,
            self.preprocessor.as_ref(),
        )?;
        let template = JobTemplate {
            textures,
            width: config.render.width,
            height: config.render.height,
            format: config.render.format,
        };
        let jobs = source.jobs(&template)?;

        let artifacts = if config.output.save {
            let dir = &config.output.dir;
            let writer = ArtifactWriter::create(dir)
                .await
                .map_err(|source| LoadTestError::OutputDir {
                    path: dir.clone(),
                    source,
                })?;
            Some(writer)
        } else {
            None
        };

        if config.health_check {
            if let Err(e) = self.check_health().await {
                warn!(url = %config.health_url(), error = %e, "Health check failed, continuing");
            }
        }

        if self.console {
            println!("Starting load test: {}", config.name);
            println!("  Endpoint: {}", config.endpoint);
            println!("  Jobs: {} ({})", jobs.len(), source.describe());
            println!("  Concurrency: {}", config.concurrency);
            println!(
                "  Output: {}x{} {}",
                config.render.width, config.render.height, config.render.format
            );
            if let Some(writer) = &artifacts {
                println!("  Saving to: {}", writer.dir().display());
            }
            println!();
        }

        let stats = Arc::new(AggregateStats::new());
        let mut recorder = ResultRecorder::new(stats.clone()).with_job_lines(self.console);
        if let Some(writer) = artifacts {
            recorder = recorder.with_artifacts(writer);
        }
        if self.console {
            recorder = recorder.with_progress(progress_bar(jobs.len() as u64));
        }
        let recorder = Arc::new(recorder);

        let handler = Arc::new(RenderHandler::new(
            self.client.clone(),
            config.endpoint.clone(),
            recorder.clone(),
        ));

        info!(
            jobs = jobs.len(),
            concurrency = config.concurrency,
            endpoint = %config.endpoint,
            "Dispatching jobs"
        );

        let started = Instant::now();
        let mut pool = WorkerPool::new(config.concurrency, config.queue_capacity(), handler);
        let submitted = dispatch(&mut pool, jobs).await;
        debug!(submitted, "Worker pool drained");
        let wall_clock = started.elapsed();
        recorder.progress().finish_and_clear();

        if self.console {
            println!("{:<50}{:?}", "total time", wall_clock);
            println!();
        }

        let run = RunInfo {
            scenario_name: config.name.clone(),
            endpoint: config.endpoint.clone(),
            source: source.describe(),
            concurrency: config.concurrency,
            output_format: config.render.format.to_string(),
            width: config.render.width,
            height: config.render.height,
        };
        let results = stats.results(run, wall_clock, recorder.persist_failures());

        info!(
            successful = results.successful,
            failed = results.failed,
            persist_failures = results.persist_failures,
            duration_secs = results.duration_secs,
            "Load test complete"
        );
        Ok(results)
    }

    /// `GET /health` on the service; anything but a 2xx `ok` is an error.
    pub async fn check_health(&self) -> anyhow::Result<()> {
        let response = self
            .client
            .get(self.config.health_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP {}", response.status());
        }
        let body = response.text().await?;
        if body.trim() != "ok" {
            anyhow::bail!("unexpected health response: {}", body.trim());
        }
        Ok(())
    }
}

/// Submit every job, then drain the pool. Returns how many jobs were accepted.
///
/// A closed pool stops submission but the jobs already accepted still finish
/// and get recorded.
async fn dispatch<J: Send + 'static>(pool: &mut WorkerPool<J>, jobs: Vec<J>) -> usize {
    let total = jobs.len();
    let mut submitted = 0;
    for job in jobs {
        if let Err(e) = pool.submit(job).await {
            error!(
                error = %e,
                submitted,
                remaining = total - submitted,
                "Stopped submitting jobs"
            );
            break;
        }
        submitted += 1;
    }
    if let Err(e) = pool.shutdown().await {
        error!(error = %e, "Worker pool did not drain cleanly");
    }
    submitted
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) =
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} jobs {msg}")
    {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JobSelection, OutputSettings, RenderSettings, TextureSettings};
    use render_protocol::{ModelSource, OutputFormat, Textures};
    use test_utils::{MockConfig, MockRenderServer};

    fn config(endpoint: String, model: &str, count: usize) -> TestConfig {
        TestConfig {
            name: "unit".to_string(),
            description: String::new(),
            endpoint,
            concurrency: 2,
            queue_capacity: None,
            timeout_secs: 5,
            jobs: JobSelection::Repeat {
                model: model.to_string(),
                count,
            },
            render: RenderSettings {
                width: 64,
                height: 48,
                format: OutputFormat::Png,
            },
            textures: TextureSettings::default(),
            output: OutputSettings::default(),
            health_check: false,
        }
    }

    fn job(model: ModelSource) -> JobDescriptor {
        JobDescriptor::new(0, model, Textures::new(), 64, 48, OutputFormat::Png)
    }

    #[tokio::test]
    async fn test_execute_success() {
        let server = MockRenderServer::start().await.unwrap();
        let runner = LoadRunner::new(config(server.endpoint(), "https://x/m.glb", 1)).unwrap();
        let handler = RenderHandler::new(
            runner.client.clone(),
            server.endpoint(),
            Arc::new(ResultRecorder::new(Arc::new(AggregateStats::new()))),
        );

        let result = handler
            .execute(job(ModelSource::Url("https://x/m.glb".to_string())))
            .await;
        assert!(result.outcome.is_success(), "{:?}", result.outcome);
        assert_eq!(result.artifact_name, "m.png");
        assert_eq!(result.body.unwrap(), "rendered https://x/m.glb 64x48");
    }

    #[tokio::test]
    async fn test_execute_missing_model_file_is_build_failure() {
        let server = MockRenderServer::start().await.unwrap();
        let runner = LoadRunner::new(config(server.endpoint(), "https://x/m.glb", 1)).unwrap();
        let handler = RenderHandler::new(
            runner.client.clone(),
            server.endpoint(),
            Arc::new(ResultRecorder::new(Arc::new(AggregateStats::new()))),
        );

        let result = handler
            .execute(job(ModelSource::File("/no/such/model.glb".into())))
            .await;
        assert!(matches!(result.outcome, Outcome::Failed(FailureKind::Build(_))));
        assert_eq!(server.request_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_failure() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let endpoint = format!("http://127.0.0.1:{}/render-form", port);
        let runner = LoadRunner::new(config(endpoint.clone(), "https://x/m.glb", 1)).unwrap();
        let handler = RenderHandler::new(
            runner.client.clone(),
            endpoint,
            Arc::new(ResultRecorder::new(Arc::new(AggregateStats::new()))),
        );

        let result = handler
            .execute(job(ModelSource::Url("https://x/m.glb".to_string())))
            .await;
        assert!(matches!(result.outcome, Outcome::Failed(FailureKind::Network(_))));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockRenderServer::start_with(MockConfig::default()).await.unwrap();
        let runner = LoadRunner::new(config(server.endpoint(), "https://x/m.glb", 1)).unwrap();
        runner.check_health().await.unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config("http://localhost:1/render-form".to_string(), "m.glb", 1);
        cfg.concurrency = 0;
        assert!(matches!(LoadRunner::new(cfg), Err(LoadTestError::Config(_))));
    }

    #[tokio::test]
    async fn test_closed_pool_stops_submission_and_still_drains() {
        /// Counts the job, then takes its worker down.
        struct Exploding(std::sync::atomic::AtomicUsize);

        #[async_trait]
        impl JobHandler<usize> for Exploding {
            async fn handle(&self, job: usize) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                panic!("job {} exploded", job);
            }
        }

        let handler = Arc::new(Exploding(std::sync::atomic::AtomicUsize::new(0)));
        let mut pool = WorkerPool::new(1, 1, handler.clone());

        let submitted = tokio::time::timeout(
            Duration::from_secs(5),
            dispatch(&mut pool, (0..50).collect()),
        )
        .await
        .expect("dispatch must return once the pool closes");

        assert!(submitted >= 1 && submitted < 50, "submitted {}", submitted);
        assert!(pool.is_closed());
        assert_eq!(handler.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
