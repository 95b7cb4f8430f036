use crate::benchmark::BenchmarkConfig;
use crate::cli::{RateDistribution, Role, SizeDistribution, TransportKind};
use crate::measurement::{CompletionCause, Report};
use crate::metrics::{latency_csv, LatencySummary};
use crate::pipeline::SendSummary;
use crate::utils::{format_duration, format_latency_ms, format_message_rate, generate_run_id};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Write the latency series as one comma-separated line.
///
/// The parent directory must already exist; the file is created or truncated.
pub fn write_latency_artifact(path: &Path, latencies_ms: &[f64]) -> Result<()> {
    std::fs::write(path, latency_csv(latencies_ms))
        .with_context(|| format!("Failed to write latency series to {}", path.display()))?;
    debug!("Wrote {} latency samples to {:?}", latencies_ms.len(), path);
    Ok(())
}

/// Test configuration used for the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfiguration {
    pub test_name: String,
    pub role: Role,
    pub transport: TransportKind,
    pub rate_distribution: RateDistribution,
    pub size_distribution: SizeDistribution,
    pub message_size: usize,
    pub msg_count: Option<usize>,
    pub duration: Option<Duration>,
    /// Uniform pacing period
    pub send_period: Option<Duration>,
    /// Mean of the poisson delay in microseconds
    pub average_delay_us: Option<f64>,
    pub fin_enabled: bool,
    pub consumer_timeout: Option<Duration>,
    pub percentiles: Vec<f64>,
}

impl From<&BenchmarkConfig> for TestConfiguration {
    fn from(config: &BenchmarkConfig) -> Self {
        Self {
            test_name: config.test_name.clone(),
            role: config.role,
            transport: config.transport,
            rate_distribution: config.rate_distribution,
            size_distribution: config.size_distribution,
            message_size: config.message_size,
            msg_count: config.msg_count,
            duration: config.duration,
            send_period: config.send_period(),
            average_delay_us: match config.rate_distribution {
                RateDistribution::Poisson => Some(config.average_delay_us),
                RateDistribution::Uniform => None,
            },
            fin_enabled: config.drain.enabled,
            consumer_timeout: config.measurement.timeout,
            percentiles: config.measurement.percentiles.clone(),
        }
    }
}

/// Consumer side of the summary; the raw series lives in the latency artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerResults {
    pub cause: CompletionCause,
    pub message_count: u64,
    pub elapsed_ms: f64,
    pub throughput: f64,
    pub mean_latency_ms: Option<f64>,
    pub latency: LatencySummary,
    pub rejected: u64,
    pub latency_artifact: Option<PathBuf>,
}

impl ConsumerResults {
    pub fn from_report(report: &Report, latency_artifact: Option<PathBuf>) -> Self {
        Self {
            cause: report.cause,
            message_count: report.message_count,
            elapsed_ms: report.elapsed_ms,
            throughput: report.throughput,
            mean_latency_ms: report.mean_latency_ms,
            latency: report.latency.clone(),
            rejected: report.rejected,
            latency_artifact,
        }
    }
}

/// System information for reproducibility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub rust_version: String,
    pub benchmark_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: crate::utils::get_cpu_cores(),
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            benchmark_version: crate::VERSION.to_string(),
        }
    }
}

/// Run metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub system_info: SystemInfo,
}

/// Everything one process learned about a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub metadata: RunMetadata,
    pub test_config: TestConfiguration,
    pub producer: Option<SendSummary>,
    pub consumer: Option<ConsumerResults>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "-----------------------------------------------------------------"
        )?;
        writeln!(
            f,
            "Results for: {} ({}, {})",
            self.test_config.test_name, self.test_config.role, self.test_config.transport
        )?;
        writeln!(f, "  Run ID:             {}", self.metadata.run_id)?;

        if let Some(producer) = &self.producer {
            writeln!(f, "  Messages Sent:      {}", producer.messages_sent)?;
            writeln!(f, "  FIN Sent:           {}", producer.fin_sent)?;
            writeln!(f, "  Send Errors:        {}", producer.send_errors)?;
            writeln!(f, "  Pacing Time:        {}", format_duration(producer.elapsed))?;
        }

        if let Some(consumer) = &self.consumer {
            writeln!(f, "  Completed By:       {:?}", consumer.cause)?;
            writeln!(f, "  Messages Received:  {}", consumer.message_count)?;
            writeln!(f, "  Rejected:           {}", consumer.rejected)?;
            writeln!(f, "  Receive Time:       {:.3} ms", consumer.elapsed_ms)?;
            writeln!(
                f,
                "  Throughput:         {}",
                format_message_rate(consumer.throughput)
            )?;
            writeln!(
                f,
                "  Mean Latency:       {}",
                format_latency_ms(consumer.mean_latency_ms)
            )?;
            for p in &consumer.latency.percentiles {
                writeln!(f, "  P{:<18}{:.3} ms", p.percentile, p.value_ms)?;
            }
        }

        write!(
            f,
            "-----------------------------------------------------------------"
        )
    }
}

/// Results manager for the JSON run summary
pub struct ResultsManager {
    output_file: Option<PathBuf>,
    run_id: String,
}

impl ResultsManager {
    /// Create a new results manager; `None` keeps the summary in memory only
    pub fn new(output_file: Option<&Path>) -> Self {
        Self {
            output_file: output_file.map(Path::to_path_buf),
            run_id: generate_run_id(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn build_summary(
        &self,
        config: &BenchmarkConfig,
        producer: Option<SendSummary>,
        report: Option<&Report>,
    ) -> RunSummary {
        RunSummary {
            metadata: RunMetadata {
                run_id: self.run_id.clone(),
                version: crate::VERSION.to_string(),
                timestamp: chrono::Utc::now(),
                system_info: SystemInfo::default(),
            },
            test_config: TestConfiguration::from(config),
            producer,
            consumer: report.map(|r| {
                ConsumerResults::from_report(r, config.measurement.artifact_path.clone())
            }),
        }
    }

    /// Write the summary as pretty JSON if an output file is configured
    pub fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        let Some(output_file) = &self.output_file else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(summary)?;
        std::fs::write(output_file, json)
            .with_context(|| format!("Failed to write run summary to {}", output_file.display()))?;
        info!("Results written to: {:?}", output_file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use crate::metrics::LatencySeries;
    use tempfile::{NamedTempFile, TempDir};

    fn sample_report() -> Report {
        let mut series = LatencySeries::new().unwrap();
        for latency in [1.5, 2.5, 4.0] {
            series.record(latency);
        }
        Report {
            cause: CompletionCause::Fin,
            message_count: 4,
            elapsed_ms: 2.0,
            throughput: 2_000.0,
            mean_latency_ms: series.mean(),
            latency: series.summary(&[50.0, 99.0]),
            latencies_ms: series.samples().to_vec(),
            rejected: 1,
        }
    }

    #[test]
    fn test_latency_artifact_is_comma_joined() {
        let file = NamedTempFile::new().unwrap();
        write_latency_artifact(file.path(), &[0.5, 12.25, 3.0]).unwrap();
        assert_eq!(
            std::fs::read_to_string(file.path()).unwrap(),
            "0.5,12.25,3"
        );

        write_latency_artifact(file.path(), &[]).unwrap();
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "");
    }

    #[test]
    fn test_latency_artifact_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope").join("latency.csv");
        assert!(write_latency_artifact(&path, &[1.0]).is_err());
    }

    #[test]
    fn test_summary_round_trips_through_json() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("summary.json");
        let config = BenchmarkConfig::from_args(&Args::default()).unwrap();
        let manager = ResultsManager::new(Some(&output));

        let report = sample_report();
        let summary = manager.build_summary(&config, None, Some(&report));
        manager.write_summary(&summary).unwrap();

        let parsed: RunSummary =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(parsed, summary);
        assert_eq!(parsed.metadata.run_id, manager.run_id());

        let consumer = parsed.consumer.unwrap();
        assert_eq!(consumer.message_count, 4);
        assert_eq!(consumer.rejected, 1);
        assert_eq!(consumer.mean_latency_ms, report.mean_latency_ms);
    }

    #[test]
    fn test_summary_json_uses_lowercase_enums() {
        let config = BenchmarkConfig::from_args(&Args::default()).unwrap();
        let manager = ResultsManager::new(None);
        let summary = manager.build_summary(&config, None, Some(&sample_report()));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["consumer"]["cause"], "fin");
        assert_eq!(json["test_config"]["role"], "both");
        assert_eq!(json["test_config"]["transport"], "loopback");
        assert!(json["producer"].is_null());
    }

    #[test]
    fn test_write_summary_without_output_is_noop() {
        let config = BenchmarkConfig::from_args(&Args::default()).unwrap();
        let manager = ResultsManager::new(None);
        let summary = manager.build_summary(&config, None, None);
        manager.write_summary(&summary).unwrap();
        assert!(summary.to_string().contains("Results for"));
    }

    #[test]
    fn test_system_info_default() {
        let info = SystemInfo::default();

        assert!(!info.os.is_empty());
        assert!(!info.architecture.is_empty());
        assert!(info.cpu_cores > 0);
        assert_eq!(info.benchmark_version, crate::VERSION);
    }
}
