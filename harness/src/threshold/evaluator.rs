//! Threshold evaluation against aggregated snapshots

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::expr::{Aggregation, ThresholdExpr, ThresholdParseError};
use crate::stats::MetricsSnapshot;

/// Built-in metrics a threshold can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    HttpReqDuration,
    HttpReqFailed,
    Checks,
    HttpReqs,
    Iterations,
    Vus,
    VusMax,
}

/// How a metric accumulates, which decides the aggregations it supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Trend,
    Rate,
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn supports(&self, aggregation: &Aggregation) -> bool {
        match self {
            MetricKind::Trend => matches!(
                aggregation,
                Aggregation::Avg
                    | Aggregation::Min
                    | Aggregation::Max
                    | Aggregation::Med
                    | Aggregation::Percentile(_)
            ),
            MetricKind::Rate => matches!(aggregation, Aggregation::Rate),
            MetricKind::Counter => matches!(aggregation, Aggregation::Count | Aggregation::Rate),
            MetricKind::Gauge => matches!(
                aggregation,
                Aggregation::Value | Aggregation::Min | Aggregation::Max
            ),
        }
    }
}

impl MetricName {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricName::HttpReqDuration => MetricKind::Trend,
            MetricName::HttpReqFailed | MetricName::Checks => MetricKind::Rate,
            MetricName::HttpReqs | MetricName::Iterations => MetricKind::Counter,
            MetricName::Vus | MetricName::VusMax => MetricKind::Gauge,
        }
    }

    /// Whether `aggregation` has a meaning for this metric
    pub fn supports(&self, aggregation: &Aggregation) -> bool {
        match self {
            // Running peak, never decreases
            MetricName::VusMax => matches!(aggregation, Aggregation::Value | Aggregation::Max),
            _ => self.kind().supports(aggregation),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::HttpReqDuration => "http_req_duration",
            MetricName::HttpReqFailed => "http_req_failed",
            MetricName::Checks => "checks",
            MetricName::HttpReqs => "http_reqs",
            MetricName::Iterations => "iterations",
            MetricName::Vus => "vus",
            MetricName::VusMax => "vus_max",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "http_req_duration" => Ok(MetricName::HttpReqDuration),
            "http_req_failed" => Ok(MetricName::HttpReqFailed),
            "checks" => Ok(MetricName::Checks),
            "http_reqs" => Ok(MetricName::HttpReqs),
            "iterations" => Ok(MetricName::Iterations),
            "vus" => Ok(MetricName::Vus),
            "vus_max" => Ok(MetricName::VusMax),
            other => Err(ThresholdParseError::UnknownMetric(other.to_string())),
        }
    }
}

/// A validated threshold bound to one metric
#[derive(Debug, Clone)]
pub struct Threshold {
    pub metric: MetricName,
    pub expr: ThresholdExpr,
    /// Expression as written in the script, for reports
    pub source: String,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Duration,
}

impl Threshold {
    /// Parse and type-check a threshold for `metric`
    pub fn parse(metric: &str, source: &str) -> Result<Self, ThresholdParseError> {
        let metric: MetricName = metric.parse()?;
        let expr: ThresholdExpr = source.parse()?;

        if !metric.supports(&expr.aggregation) {
            return Err(ThresholdParseError::Unsupported {
                metric: metric.to_string(),
                aggregation: expr.aggregation.to_string(),
            });
        }

        Ok(Self {
            metric,
            expr,
            source: source.trim().to_string(),
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
        })
    }

    pub fn with_abort(mut self, abort_on_fail: bool, delay_abort_eval: Duration) -> Self {
        self.abort_on_fail = abort_on_fail;
        self.delay_abort_eval = delay_abort_eval;
        self
    }

    /// Value the expression is compared against, `None` for an empty trend
    pub fn observe(&self, snapshot: &MetricsSnapshot) -> Option<f64> {
        let latency = &snapshot.http_req_duration;
        match (self.metric, self.expr.aggregation) {
            (MetricName::HttpReqDuration, Aggregation::Avg) => latency.avg_ms(),
            (MetricName::HttpReqDuration, Aggregation::Min) => latency.min_ms(),
            (MetricName::HttpReqDuration, Aggregation::Max) => latency.max_ms(),
            (MetricName::HttpReqDuration, Aggregation::Med) => latency.med_ms(),
            (MetricName::HttpReqDuration, Aggregation::Percentile(p)) => latency.percentile_ms(p),
            (MetricName::HttpReqFailed, _) => Some(snapshot.failed_rate()),
            (MetricName::Checks, _) => Some(snapshot.checks_rate()),
            (MetricName::HttpReqs, Aggregation::Rate) => Some(snapshot.http_reqs_per_sec()),
            (MetricName::HttpReqs, _) => Some(snapshot.http_reqs as f64),
            (MetricName::Iterations, Aggregation::Rate) => Some(snapshot.iterations_per_sec()),
            (MetricName::Iterations, _) => Some(snapshot.iterations as f64),
            (MetricName::Vus, Aggregation::Min) => Some(snapshot.vus_min as f64),
            (MetricName::Vus, Aggregation::Max) => Some(snapshot.vus_max as f64),
            (MetricName::Vus, _) => Some(snapshot.vus as f64),
            (MetricName::VusMax, _) => Some(snapshot.vus_max as f64),
            // Rejected when the threshold was parsed
            (MetricName::HttpReqDuration, _) => None,
        }
    }

    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdOutcome {
        let observed = self.observe(snapshot);
        let passed = match observed {
            Some(value) => self.expr.holds(value),
            None => {
                debug!(
                    "{} '{}' has no samples yet, treating as passed",
                    self.metric, self.source
                );
                true
            }
        };

        ThresholdOutcome {
            metric: self.metric.to_string(),
            expression: self.source.clone(),
            observed,
            passed,
        }
    }
}

/// Result of evaluating one threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

/// All thresholds of a run
#[derive(Debug, Clone, Default)]
pub struct ThresholdSet {
    thresholds: Vec<Threshold>,
}

impl ThresholdSet {
    pub fn new(thresholds: Vec<Threshold>) -> Self {
        Self { thresholds }
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Threshold> {
        self.thresholds.iter()
    }

    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdReport {
        ThresholdReport {
            outcomes: self
                .thresholds
                .iter()
                .map(|t| t.evaluate(snapshot))
                .collect(),
        }
    }

    /// First `abortOnFail` threshold that is failing and past its delay
    pub fn abort_trigger(&self, snapshot: &MetricsSnapshot, elapsed: Duration) -> Option<&Threshold> {
        self.thresholds.iter().find(|t| {
            t.abort_on_fail && elapsed >= t.delay_abort_eval && !t.evaluate(snapshot).passed
        })
    }
}

/// Outcomes of one evaluation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThresholdReport {
    pub outcomes: Vec<ThresholdOutcome>,
}

impl ThresholdReport {
    /// Logical AND over every threshold; vacuously true when there are none
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }
}
