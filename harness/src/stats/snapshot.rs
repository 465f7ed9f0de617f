//! Point-in-time view of the aggregated metrics

use hdrhistogram::Histogram;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

/// Pass/fail tally for a single named check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckTally {
    pub passes: u64,
    pub fails: u64,
}

impl CheckTally {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }
}

/// Merged request latency distribution (microsecond resolution)
#[derive(Debug, Clone)]
pub struct LatencyDistribution {
    histogram: Histogram<u64>,
}

impl LatencyDistribution {
    pub(crate) fn new(histogram: Histogram<u64>) -> Self {
        Self { histogram }
    }

    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    fn micros_to_ms(value: f64) -> f64 {
        value / 1000.0
    }

    /// Mean latency in milliseconds
    pub fn avg_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| Self::micros_to_ms(self.histogram.mean()))
    }

    pub fn min_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| Self::micros_to_ms(self.histogram.min() as f64))
    }

    pub fn max_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| Self::micros_to_ms(self.histogram.max() as f64))
    }

    pub fn med_ms(&self) -> Option<f64> {
        self.percentile_ms(50.0)
    }

    /// Latency at percentile `p` (0-100) in milliseconds
    pub fn percentile_ms(&self, p: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let quantile = (p / 100.0).clamp(0.0, 1.0);
        Some(Self::micros_to_ms(
            self.histogram.value_at_quantile(quantile) as f64,
        ))
    }
}

impl Serialize for LatencyDistribution {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("LatencyDistribution", 8)?;
        state.serialize_field("count", &self.count())?;
        state.serialize_field("avg_ms", &self.avg_ms())?;
        state.serialize_field("min_ms", &self.min_ms())?;
        state.serialize_field("med_ms", &self.med_ms())?;
        state.serialize_field("max_ms", &self.max_ms())?;
        state.serialize_field("p90_ms", &self.percentile_ms(90.0))?;
        state.serialize_field("p95_ms", &self.percentile_ms(95.0))?;
        state.serialize_field("p99_ms", &self.percentile_ms(99.0))?;
        state.end()
    }
}

/// Eventually consistent copy of everything the aggregator has ingested
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Time since the aggregator's clock was started
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub http_reqs: u64,
    pub http_req_failed: u64,
    pub iterations: u64,
    pub interrupted_iterations: u64,
    pub vus: u64,
    /// Lowest and highest live virtual user counts seen so far
    pub vus_min: u64,
    pub vus_max: u64,
    pub checks_passed: u64,
    pub checks_failed: u64,
    pub http_req_duration: LatencyDistribution,
    pub checks: BTreeMap<String, CheckTally>,
    pub statuses: BTreeMap<u16, u64>,
    pub errors: BTreeMap<String, u64>,
}

fn serialize_secs<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(value.as_secs_f64())
}

impl MetricsSnapshot {
    /// Fraction of requests that failed (0.0 when nothing was sent)
    pub fn failed_rate(&self) -> f64 {
        ratio(self.http_req_failed, self.http_reqs)
    }

    /// Fraction of check evaluations that passed (0.0 when none ran)
    pub fn checks_rate(&self) -> f64 {
        ratio(self.checks_passed, self.checks_passed + self.checks_failed)
    }

    /// Requests per second over the elapsed time
    pub fn http_reqs_per_sec(&self) -> f64 {
        per_sec(self.http_reqs, self.elapsed)
    }

    pub fn iterations_per_sec(&self) -> f64 {
        per_sec(self.iterations, self.elapsed)
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn per_sec(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}
