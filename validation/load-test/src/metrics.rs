//! Metrics collection and statistics.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// Timing entry for one finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTiming {
    pub sequence: usize,
    pub label: String,
    pub elapsed_ms: f64,
    pub succeeded: bool,
    /// HTTP status, when a response arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Collects metrics during load test execution.
pub struct MetricsCollector {
    histogram: Histogram<u64>,
    timings: Vec<JobTiming>,
    success_count: u64,
    failure_count: u64,
    bytes_received: u64,
    total_elapsed: Duration,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            histogram: Histogram::new(3).expect("3 significant figures is a valid precision"),
            timings: Vec::new(),
            success_count: 0,
            failure_count: 0,
            bytes_received: 0,
            total_elapsed: Duration::ZERO,
        }
    }

    /// Record a successful job.
    pub fn record_success(&mut self, timing: JobTiming, elapsed: Duration, bytes: usize) {
        self.success_count += 1;
        self.bytes_received += bytes as u64;
        self.histogram.saturating_record(elapsed.as_micros() as u64);
        self.push(timing, elapsed);
    }

    /// Record a failed job. Failures stay out of the latency histogram.
    pub fn record_failure(&mut self, timing: JobTiming, elapsed: Duration) {
        self.failure_count += 1;
        self.push(timing, elapsed);
    }

    fn push(&mut self, timing: JobTiming, elapsed: Duration) {
        self.total_elapsed += elapsed;
        self.timings.push(timing);
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    pub fn timings(&self) -> &[JobTiming] {
        &self.timings
    }

    /// Summed per-job elapsed time (not wall clock).
    pub fn total_elapsed(&self) -> Duration {
        self.total_elapsed
    }

    /// Generate final test results.
    pub fn results(&self, run: RunInfo, wall_clock: Duration, persist_failures: u64) -> TestResults {
        let duration_secs = wall_clock.as_secs_f64();
        let total = self.success_count + self.failure_count;
        let per_second = |n: f64| if duration_secs > 0.0 { n / duration_secs } else { 0.0 };
        let ms = |us: u64| us as f64 / 1000.0;
        let has_samples = !self.histogram.is_empty();

        TestResults {
            timestamp: chrono::Utc::now().to_rfc3339(),
            scenario_name: run.scenario_name,
            endpoint: run.endpoint,
            source: run.source,
            concurrency: run.concurrency,
            output_format: run.output_format,
            width: run.width,
            height: run.height,
            duration_secs,
            total_jobs: total,
            successful: self.success_count,
            failed: self.failure_count,
            persist_failures,
            requests_per_second: per_second(total as f64),
            latency_p50: ms(self.histogram.value_at_quantile(0.50)),
            latency_p75: ms(self.histogram.value_at_quantile(0.75)),
            latency_p90: ms(self.histogram.value_at_quantile(0.90)),
            latency_p95: ms(self.histogram.value_at_quantile(0.95)),
            latency_p99: ms(self.histogram.value_at_quantile(0.99)),
            latency_min: if has_samples { ms(self.histogram.min()) } else { 0.0 },
            latency_max: ms(self.histogram.max()),
            latency_avg: if has_samples { self.histogram.mean() / 1000.0 } else { 0.0 },
            total_elapsed_secs: self.total_elapsed.as_secs_f64(),
            bytes_per_second: per_second(self.bytes_received as f64),
            timings: self.timings.clone(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate statistics shared by every worker of a run.
///
/// All mutation goes through one lock; a single record call updates the
/// counters, the histogram and the timing list together.
#[derive(Default)]
pub struct AggregateStats {
    inner: Mutex<MetricsCollector>,
}

impl AggregateStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with the collector locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut MetricsCollector) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn success_count(&self) -> u64 {
        self.with(|m| m.success_count())
    }

    pub fn failure_count(&self) -> u64 {
        self.with(|m| m.failure_count())
    }

    /// Copy of the timings recorded so far.
    pub fn timings(&self) -> Vec<JobTiming> {
        self.with(|m| m.timings().to_vec())
    }

    pub fn total_elapsed(&self) -> Duration {
        self.with(|m| m.total_elapsed())
    }

    pub fn results(&self, run: RunInfo, wall_clock: Duration, persist_failures: u64) -> TestResults {
        self.with(|m| m.results(run, wall_clock, persist_failures))
    }
}

/// Run-level settings echoed into the results.
#[derive(Debug, Clone, Default)]
pub struct RunInfo {
    pub scenario_name: String,
    pub endpoint: String,
    pub source: String,
    pub concurrency: usize,
    pub output_format: String,
    pub width: u32,
    pub height: u32,
}

/// Final test results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResults {
    pub timestamp: String,
    pub scenario_name: String,
    pub endpoint: String,
    pub source: String,
    pub concurrency: usize,
    pub output_format: String,
    pub width: u32,
    pub height: u32,

    /// Wall clock time from first submit to drain.
    pub duration_secs: f64,
    pub total_jobs: u64,
    pub successful: u64,
    pub failed: u64,
    pub persist_failures: u64,
    pub requests_per_second: f64,

    // Latency percentiles of successful jobs (ms)
    pub latency_p50: f64,
    pub latency_p75: f64,
    pub latency_p90: f64,
    pub latency_p95: f64,
    pub latency_p99: f64,
    pub latency_min: f64,
    pub latency_max: f64,
    pub latency_avg: f64,

    /// Sum of every job's elapsed time.
    pub total_elapsed_secs: f64,
    pub bytes_per_second: f64,

    pub timings: Vec<JobTiming>,
}

impl TestResults {
    /// Share of successful jobs, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.total_jobs == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total_jobs as f64 * 100.0
    }
}
