//! loadprobe Library
//!
//! This module exports the harness components for use by the binary,
//! integration tests and external tooling.

pub mod config;
pub mod pool;
pub mod probe;
pub mod report;
pub mod runner;
pub mod schedule;
pub mod script;
pub mod stats;
pub mod status;
pub mod threshold;

mod test_utils;

// Re-export commonly used types
pub use config::Config;
pub use probe::{ErrorKind, HttpProbe, Outcome, Probe, RequestSample};
pub use runner::{RunError, RunOutcome, RunReport, Runner};
pub use schedule::{Stage, StageScheduler};
pub use script::{ScriptError, TestPlan};
pub use stats::{Aggregator, MetricsSnapshot};
pub use threshold::{Threshold, ThresholdSet};
