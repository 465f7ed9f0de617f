//! Metrics aggregation
//!
//! This module provides:
//! - `Aggregator`, the shared many-writer sink for request samples and checks
//! - `MetricsSnapshot`, an eventually consistent copy used by thresholds,
//!   the status endpoint and the final summary

mod aggregator;
mod snapshot;

pub use aggregator::{Aggregator, StatsError};
pub use snapshot::{CheckTally, LatencyDistribution, MetricsSnapshot};
