use crate::utils;
use anyhow::Result;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// Percentiles reported by default
pub const DEFAULT_PERCENTILES: [f64; 3] = [50.0, 95.0, 99.0];

/// Below this many samples percentiles come from the sorted raw series;
/// histogram bucketing is too coarse for a handful of values.
const EXACT_PERCENTILE_LIMIT: usize = 1_000;

/// Percentile value pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value_ms: f64,
}

/// Aggregate view of a latency series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub total_samples: usize,
    /// `None` when no message carried a timestamp
    pub mean_ms: Option<f64>,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub percentiles: Vec<PercentileValue>,
    /// Samples below zero, which only occur when producer and consumer
    /// clocks disagree. They count towards the mean but not the histogram.
    pub negative_samples: usize,
}

/// Latency samples in arrival order plus an HDR histogram for percentiles.
///
/// Samples are kept in milliseconds as floats for the persisted series; the
/// histogram records whole microseconds with 3 significant figures.
pub struct LatencySeries {
    samples: Vec<f64>,
    histogram: Histogram<u64>,
    negative_samples: usize,
}

impl std::fmt::Debug for LatencySeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencySeries")
            .field("samples", &self.samples.len())
            .field("negative_samples", &self.negative_samples)
            .finish()
    }
}

impl LatencySeries {
    pub fn new() -> Result<Self> {
        Ok(Self {
            samples: Vec::new(),
            histogram: Histogram::<u64>::new(3)?,
            negative_samples: 0,
        })
    }

    /// Record one latency in milliseconds
    pub fn record(&mut self, latency_ms: f64) {
        self.samples.push(latency_ms);
        if latency_ms < 0.0 {
            self.negative_samples += 1;
            return;
        }
        self.histogram
            .saturating_record((latency_ms * 1_000.0).round() as u64);
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// `sum / len` over every sample, `None` when empty
    pub fn mean(&self) -> Option<f64> {
        utils::mean(&self.samples)
    }

    pub fn summary(&self, percentiles: &[f64]) -> LatencySummary {
        let max_ms = self.samples.iter().cloned().reduce(f64::max);
        let percentiles = if self.histogram.is_empty() {
            Vec::new()
        } else if self.histogram.len() < EXACT_PERCENTILE_LIMIT as u64 {
            let mut sorted: Vec<f64> = self.samples.iter().cloned().filter(|s| *s >= 0.0).collect();
            sorted.sort_by(f64::total_cmp);
            percentiles
                .iter()
                .map(|&p| PercentileValue {
                    percentile: p,
                    value_ms: nearest_rank(&sorted, p),
                })
                .collect()
        } else {
            percentiles
                .iter()
                .map(|&p| {
                    let value_ms = self.histogram.value_at_percentile(p) as f64 / 1_000.0;
                    PercentileValue {
                        percentile: p,
                        // Bucket upper bounds can overshoot the largest sample
                        value_ms: max_ms.map_or(value_ms, |max| value_ms.min(max)),
                    }
                })
                .collect()
        };

        LatencySummary {
            total_samples: self.samples.len(),
            mean_ms: self.mean(),
            min_ms: self.samples.iter().cloned().reduce(f64::min),
            max_ms,
            percentiles,
            negative_samples: self.negative_samples,
        }
    }
}

/// Nearest-rank percentile of a sorted, non-empty series
fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    let rank = (percentile / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Join latencies with commas, no trailing separator or newline
pub fn latency_csv(samples_ms: &[f64]) -> String {
    samples_ms
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Messages per second for `count` messages over `elapsed_ms`
///
/// Returns 0 for a zero or negative window instead of dividing by zero.
pub fn throughput_per_second(count: u64, elapsed_ms: f64) -> f64 {
    if elapsed_ms > 0.0 {
        count as f64 * 1_000.0 / elapsed_ms
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_series_summary() {
        let mut series = LatencySeries::new().unwrap();
        series.record(1.0);
        series.record(2.0);
        series.record(3.0);

        let summary = series.summary(&DEFAULT_PERCENTILES);
        assert_eq!(summary.total_samples, 3);
        assert_eq!(summary.mean_ms, Some(2.0));
        assert_eq!(summary.min_ms, Some(1.0));
        assert_eq!(summary.max_ms, Some(3.0));
        let values: Vec<f64> = summary.percentiles.iter().map(|p| p.value_ms).collect();
        assert_eq!(values, vec![2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_large_series_percentiles_stay_within_range() {
        let mut series = LatencySeries::new().unwrap();
        for i in 1..=5_000 {
            series.record(i as f64 * 0.1);
        }

        let summary = series.summary(&DEFAULT_PERCENTILES);
        let max = summary.max_ms.unwrap();
        let p50 = summary.percentiles[0].value_ms;
        let p99 = summary.percentiles[2].value_ms;
        assert!((p50 - 250.0).abs() < 0.5, "p50 {}", p50);
        assert!((p99 - 495.0).abs() < 0.5, "p99 {}", p99);
        assert!(p99 >= p50 && p99 <= max);
    }

    #[test]
    fn test_single_sample_is_every_percentile() {
        let mut series = LatencySeries::new().unwrap();
        series.record(7.25);
        let summary = series.summary(&[1.0, 50.0, 100.0]);
        assert!(summary.percentiles.iter().all(|p| p.value_ms == 7.25));
    }

    #[test]
    fn test_empty_series_has_no_mean() {
        let series = LatencySeries::new().unwrap();
        let summary = series.summary(&DEFAULT_PERCENTILES);
        assert_eq!(summary.total_samples, 0);
        assert_eq!(summary.mean_ms, None);
        assert_eq!(summary.min_ms, None);
        assert!(summary.percentiles.is_empty());
        assert_eq!(latency_csv(series.samples()), "");
    }

    #[test]
    fn test_negative_samples_kept_out_of_histogram() {
        let mut series = LatencySeries::new().unwrap();
        series.record(-0.5);
        series.record(1.5);

        let summary = series.summary(&[50.0]);
        assert_eq!(summary.negative_samples, 1);
        assert_eq!(summary.mean_ms, Some(0.5));
        assert_eq!(summary.min_ms, Some(-0.5));
        assert!((summary.percentiles[0].value_ms - 1.5).abs() < 0.01);
    }

    #[test]
    fn test_csv_preserves_arrival_order() {
        let mut series = LatencySeries::new().unwrap();
        for latency in [0.25, 3.0, 1.125] {
            series.record(latency);
        }
        assert_eq!(latency_csv(series.samples()), "0.25,3,1.125");
    }

    #[test]
    fn test_throughput_per_second() {
        assert_eq!(throughput_per_second(500, 250.0), 2_000.0);
        assert_eq!(throughput_per_second(10, 0.0), 0.0);
    }
}
