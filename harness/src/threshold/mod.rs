//! Pass/fail thresholds
//!
//! This module provides:
//! - `ThresholdExpr` parsing of `<aggregation> <op> <number>` expressions
//! - `Threshold` binding an expression to a built-in metric, type-checked at load time
//! - `ThresholdSet` evaluating every threshold against a `MetricsSnapshot`

mod evaluator;
mod expr;

pub use evaluator::{
    MetricKind, MetricName, Threshold, ThresholdOutcome, ThresholdReport, ThresholdSet,
};
pub use expr::{Aggregation, Comparison, ThresholdExpr, ThresholdParseError};
