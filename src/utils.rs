//! # Utility Functions
//!
//! Small helpers shared by the pacing and measurement code: wall-clock
//! timestamps, human-readable formatting for log output, and validation of
//! user-supplied parameters.
//!
//! ## Usage Examples
//!
//! ```rust
//! use mq_benchmark::utils::*;
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_message_rate(15500.0), "15.50K msg/s");
//! validate_message_size(1024)?;
//! # Ok(())
//! # }
//! ```

use crate::envelope::HEADER_LEN;
use anyhow::Result;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Largest payload accepted on the command line.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Generate a unique identifier for a benchmark run
///
/// The identifier is written into the JSON summary so that producer and
/// consumer artifacts from the same run can be correlated afterwards.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get current timestamp as nanoseconds since Unix epoch
///
/// This is the clock used to stamp outgoing envelopes and to compute latency
/// on arrival, so producer and consumer must run on hosts with synchronised
/// clocks for cross-host latencies to be meaningful.
///
/// ## Error Handling
///
/// If the system time is before the Unix epoch (very rare), returns 0,
/// which consumers interpret as "timestamp withheld".
pub fn current_timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Format a duration in a human-readable way
///
/// ## Unit Selection Logic
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: For longer durations (e.g., "5m 30s")
///
/// ## Examples
///
/// ```rust
/// # use mq_benchmark::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            format!("{}h {}m {}s", minutes / 60, minutes % 60, remaining_seconds)
        }
    }
}

/// Format a message rate using decimal scaling.
///
/// ```rust
/// # use mq_benchmark::utils::format_message_rate;
/// assert_eq!(format_message_rate(750.0), "750 msg/s");
/// assert_eq!(format_message_rate(2300000.0), "2.30M msg/s");
/// ```
pub fn format_message_rate(messages_per_second: f64) -> String {
    if messages_per_second < 1000.0 {
        format!("{:.0} msg/s", messages_per_second)
    } else if messages_per_second < 1_000_000.0 {
        format!("{:.2}K msg/s", messages_per_second / 1000.0)
    } else {
        format!("{:.2}M msg/s", messages_per_second / 1_000_000.0)
    }
}

/// Format an optional latency in milliseconds, spelling out the empty case.
pub fn format_latency_ms(latency_ms: Option<f64>) -> String {
    match latency_ms {
        Some(ms) => format!("{:.3} ms", ms),
        None => "n/a (no samples)".to_string(),
    }
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Validate that a message size can carry the envelope header
///
/// ## Validation Rules
///
/// - **Minimum**: the 18-byte timestamp/FIN header
/// - **Maximum**: 16 MB, to keep per-message allocations bounded
pub fn validate_message_size(message_size: usize) -> Result<()> {
    if message_size < HEADER_LEN {
        anyhow::bail!(
            "Message size {} is smaller than the {}-byte header",
            message_size,
            HEADER_LEN
        );
    }
    if message_size > MAX_MESSAGE_SIZE {
        anyhow::bail!("Message size {} is too large (maximum 16MB)", message_size);
    }
    Ok(())
}

/// Number of logical CPU cores, reported in the run summary.
pub fn get_cpu_cores() -> usize {
    num_cpus::get()
}
