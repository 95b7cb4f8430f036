use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Message Queue Benchmark - paced traffic generator with latency measurement
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Which side of the benchmark this process runs
    #[clap(long, value_enum, env = "CLIENT_MODE", default_value_t = Role::Both, help_heading = "Core Options")]
    pub role: Role,

    /// Transport used to carry the payloads
    #[clap(short = 't', long, value_enum, default_value_t = TransportKind::Loopback, help_heading = "Core Options")]
    pub transport: TransportKind,

    /// Name of the run, used in logs and the run summary
    #[clap(long, env = "TEST_NAME", default_value = crate::defaults::TEST_NAME, help_heading = "Core Options")]
    pub test_name: String,

    /// Message size in bytes
    #[clap(short = 's', long, env = "MESSAGE_SIZE", default_value_t = crate::defaults::MESSAGE_SIZE, help_heading = "Traffic Options")]
    pub message_size: usize,

    /// Number of messages to send (0 runs for --duration instead)
    #[clap(short = 'n', long, env = "MESSAGE_COUNT", default_value_t = crate::defaults::MSG_COUNT, help_heading = "Traffic Options")]
    pub msg_count: usize,

    /// Run for this long; only used when the message count is 0
    #[clap(short = 'd', long, env = "TEST_DURATION", value_parser = parse_duration, help_heading = "Traffic Options")]
    pub duration: Option<Duration>,

    /// How the time between two messages is chosen
    #[clap(long, value_enum, default_value_t = RateDistribution::Uniform, help_heading = "Traffic Options")]
    pub rate_distribution: RateDistribution,

    /// How the size of each message is chosen
    #[clap(long, value_enum, default_value_t = SizeDistribution::Uniform, help_heading = "Traffic Options")]
    pub size_distribution: SizeDistribution,

    /// Messages per second for uniform pacing
    #[clap(short = 'r', long, default_value_t = crate::defaults::RATE, help_heading = "Traffic Options")]
    pub rate: f64,

    /// Fixed delay between messages for uniform pacing, overrides --rate
    #[clap(long, value_parser = parse_duration, help_heading = "Traffic Options")]
    pub send_delay: Option<Duration>,

    /// Mean delay between messages in microseconds for poisson pacing
    #[clap(long, default_value_t = crate::defaults::AVERAGE_DELAY_US, help_heading = "Traffic Options")]
    pub average_delay_us: f64,

    /// Seed for the poisson sampler; drawn from entropy when absent
    #[clap(long, help_heading = "Traffic Options")]
    pub seed: Option<u64>,

    /// Do not send the FIN burst when the producer stops
    #[clap(long, default_value_t = false, help_heading = "Traffic Options")]
    pub no_fin: bool,

    /// Complete the consumer this long after its first message
    #[clap(long, env = "CONSUMER_TIMEOUT", value_parser = parse_duration, help_heading = "Consumer Options")]
    pub timeout: Option<Duration>,

    /// File the comma-separated latency series is written to
    #[clap(long, default_value = crate::defaults::ARTIFACT_PATH, help_heading = "Consumer Options")]
    pub latency_output: PathBuf,

    /// Percentiles to report for the latency series
    #[clap(long, default_values_t = vec![50.0, 95.0, 99.0], help_heading = "Consumer Options")]
    pub percentiles: Vec<f64>,

    /// Host of the consumer (udp)
    #[clap(long, default_value = "127.0.0.1", help_heading = "Transport Options")]
    pub host: String,

    /// Port of the consumer (udp)
    #[clap(long, default_value_t = crate::defaults::PORT, help_heading = "Transport Options")]
    pub port: u16,

    /// Socket buffer size in bytes (udp)
    #[clap(long, default_value_t = crate::defaults::BUFFER_SIZE, help_heading = "Transport Options")]
    pub buffer_size: usize,

    /// Probability in [0, 1] that a payload is dropped (loopback)
    #[clap(long, default_value_t = 0.0, help_heading = "Transport Options")]
    pub loss_probability: f64,

    /// JSON file for the run summary
    #[clap(short = 'o', long, help_heading = "Output Options")]
    pub output_file: Option<PathBuf>,

    /// Also write logs to this file
    #[clap(long, help_heading = "Output Options")]
    pub log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = clap::ArgAction::Count, help_heading = "Output Options")]
    pub verbose: u8,

    /// Only log warnings and errors
    #[clap(short = 'q', long, default_value_t = false, help_heading = "Output Options")]
    pub quiet: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            role: Role::Both,
            transport: TransportKind::Loopback,
            test_name: crate::defaults::TEST_NAME.to_string(),
            message_size: crate::defaults::MESSAGE_SIZE,
            msg_count: crate::defaults::MSG_COUNT,
            duration: None,
            rate_distribution: RateDistribution::Uniform,
            size_distribution: SizeDistribution::Uniform,
            rate: crate::defaults::RATE,
            send_delay: None,
            average_delay_us: crate::defaults::AVERAGE_DELAY_US,
            seed: None,
            no_fin: false,
            timeout: None,
            latency_output: PathBuf::from(crate::defaults::ARTIFACT_PATH),
            percentiles: vec![50.0, 95.0, 99.0],
            host: "127.0.0.1".to_string(),
            port: crate::defaults::PORT,
            buffer_size: crate::defaults::BUFFER_SIZE,
            loss_probability: 0.0,
            output_file: None,
            log_file: None,
            verbose: 0,
            quiet: false,
        }
    }
}

/// Side of the benchmark a process runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Paces and sends messages
    Producer,
    /// Receives messages and measures latency
    Consumer,
    /// Producer and consumer in one process
    Both,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Producer => write!(f, "Producer"),
            Role::Consumer => write!(f, "Consumer"),
            Role::Both => write!(f, "Producer+Consumer"),
        }
    }
}

impl Role {
    pub fn produces(&self) -> bool {
        matches!(self, Role::Producer | Role::Both)
    }

    pub fn consumes(&self) -> bool {
        matches!(self, Role::Consumer | Role::Both)
    }
}

/// Pacing between two messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateDistribution {
    /// Fixed period
    Uniform,
    /// Poisson-sampled delay in microseconds
    Poisson,
}

impl std::fmt::Display for RateDistribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateDistribution::Uniform => write!(f, "uniform"),
            RateDistribution::Poisson => write!(f, "poisson"),
        }
    }
}

/// Size of each message
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeDistribution {
    /// Every message has the configured size
    Uniform,
}

impl std::fmt::Display for SizeDistribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeDistribution::Uniform => write!(f, "uniform"),
        }
    }
}

/// Available transports
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process channel, only valid with --role both
    Loopback,
    /// UDP datagrams
    Udp,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Loopback => write!(f, "Loopback"),
            TransportKind::Udp => write!(f, "UDP"),
        }
    }
}

/// Parse duration from string (e.g., "250us", "500ms", "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("us") {
        (stripped, "us")
    } else if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let duration = match unit {
        "us" => Duration::from_secs_f64(num / 1_000_000.0),
        "ms" => Duration::from_secs_f64(num / 1_000.0),
        "s" => Duration::from_secs_f64(num),
        "m" => Duration::from_secs_f64(num * 60.0),
        "h" => Duration::from_secs_f64(num * 3600.0),
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(duration)
}
