//! Results reporting and formatting.

use std::str::FromStr;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

use crate::metrics::TestResults;

/// How the final report is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Table,
    Json,
    Csv,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(ReportFormat::Table),
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            other => Err(format!("unknown output format '{}' (table, json, csv)", other)),
        }
    }
}

/// Formats test results for output.
pub struct ResultsReport;

impl ResultsReport {
    /// Render in the requested format.
    pub fn render(results: &TestResults, format: ReportFormat) -> anyhow::Result<String> {
        Ok(match format {
            ReportFormat::Table => Self::format_table(results),
            ReportFormat::Json => Self::format_json(results)?,
            ReportFormat::Csv => format!("{}\n{}", Self::csv_header(), Self::format_csv(results)),
        })
    }

    /// Format results as a console table.
    pub fn format_table(results: &TestResults) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![format!("Load Test Results: {}", results.scenario_name)]);

        table.add_row(vec!["Endpoint:", results.endpoint.as_str()]);
        table.add_row(vec!["Jobs:", results.source.as_str()]);
        table.add_row(vec![
            "Output:",
            &format!("{}x{} {}", results.width, results.height, results.output_format),
        ]);
        table.add_row(vec!["Concurrency:", &results.concurrency.to_string()]);

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Duration:", &format!("{:.1}s", results.duration_secs)]);
        table.add_row(vec!["Total Jobs:", &results.total_jobs.to_string()]);
        table.add_row(vec![
            "Succeeded / Failed:",
            &format!("{} / {}", results.successful, results.failed),
        ]);
        table.add_row(vec!["Success Rate:", &format!("{:.1}%", results.success_rate())]);
        table.add_row(vec![
            "Requests/sec:",
            &format!("{:.2}", results.requests_per_second),
        ]);
        if results.persist_failures > 0 {
            table.add_row(vec![
                "Save Failures:",
                &results.persist_failures.to_string(),
            ]);
        }

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Latency (ms)", "p50 / p90 / p95 / p99 / max"]);
        table.add_row(vec![
            "",
            &format!(
                "{:.1} / {:.1} / {:.1} / {:.1} / {:.1}",
                results.latency_p50,
                results.latency_p90,
                results.latency_p95,
                results.latency_p99,
                results.latency_max
            ),
        ]);
        table.add_row(vec!["Avg / Min (ms)", &format!("{:.1} / {:.1}", results.latency_avg, results.latency_min)]);

        table.add_row(vec!["", ""]);
        table.add_row(vec![
            "Summed Job Time:",
            &format!("{:.1}s", results.total_elapsed_secs),
        ]);
        table.add_row(vec![
            "Throughput:",
            &format!("{:.2} MB/s", results.bytes_per_second / 1_000_000.0),
        ]);

        table.to_string()
    }

    /// Format results as JSON.
    pub fn format_json(results: &TestResults) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(results)?)
    }

    /// Format results as CSV row.
    pub fn format_csv(results: &TestResults) -> String {
        format!(
            "{},{},{},{:.3},{},{},{},{:.2},{:.1},{:.1},{:.1},{:.1}",
            results.timestamp,
            results.scenario_name,
            results.concurrency,
            results.duration_secs,
            results.total_jobs,
            results.successful,
            results.failed,
            results.requests_per_second,
            results.latency_p50,
            results.latency_p90,
            results.latency_p99,
            results.latency_max
        )
    }

    /// CSV header row.
    pub fn csv_header() -> &'static str {
        "timestamp,scenario,concurrency,duration,jobs,succeeded,failed,rps,p50,p90,p99,max"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsCollector, RunInfo};
    use std::time::Duration;

    fn results() -> TestResults {
        let run = RunInfo {
            scenario_name: "smoke".to_string(),
            endpoint: "http://localhost:3030/render-form".to_string(),
            source: "m.glb x 2".to_string(),
            concurrency: 2,
            output_format: "png".to_string(),
            width: 3000,
            height: 2700,
        };
        MetricsCollector::new().results(run, Duration::from_secs(1), 0)
    }

    #[test]
    fn test_parse_report_format() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("xml".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_table_mentions_scenario() {
        let table = ResultsReport::format_table(&results());
        assert!(table.contains("Load Test Results: smoke"));
        assert!(table.contains("3000x2700 png"));
        assert!(!table.contains("Save Failures"));
    }

    #[test]
    fn test_csv_matches_header() {
        let r = results();
        let columns = ResultsReport::csv_header().split(',').count();
        assert_eq!(ResultsReport::format_csv(&r).split(',').count(), columns);
    }

    #[test]
    fn test_json_round_trips() {
        let json = ResultsReport::format_json(&results()).unwrap();
        let parsed: TestResults = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.scenario_name, "smoke");
        assert_eq!(parsed.concurrency, 2);
    }
}
