//! Test script loading
//!
//! This module provides:
//! - JSON script parsing (`RawScript` and friends)
//! - `TestPlan`, the validated form every run starts from
//! - `ScriptDuration` for `"1m30s"`-style durations
//!
//! Everything that can be wrong with a script is reported here, before any
//! traffic is generated.

mod duration;
mod plan;
mod types;

pub use duration::ScriptDuration;
pub use plan::{ExecutorKind, FunctionPlan, PlanDefaults, ScenarioPlan, TestPlan};
pub use types::{RawCheck, RawFunction, RawScenario, RawScript, RawStage, RawThreshold};

use std::path::PathBuf;
use thiserror::Error;

use crate::schedule::ScheduleError;
use crate::threshold::ThresholdParseError;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to read script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed script: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Script declares no scenarios")]
    NoScenarios,

    #[error("Scenario '{scenario}': {source}")]
    Schedule {
        scenario: String,
        #[source]
        source: ScheduleError,
    },

    #[error("Scenario '{scenario}': unknown executor '{executor}'")]
    UnknownExecutor { scenario: String, executor: String },

    #[error("Scenario '{scenario}': missing required field '{field}'")]
    MissingField {
        scenario: String,
        field: &'static str,
    },

    #[error("Scenario '{scenario}': exec function '{function}' is not defined")]
    UnknownFunction { scenario: String, function: String },

    #[error("Function '{function}': invalid url '{url}': {reason}")]
    InvalidUrl {
        function: String,
        url: String,
        reason: String,
    },

    #[error("Function '{function}': invalid method '{method}'")]
    InvalidMethod { function: String, method: String },

    #[error("Threshold on '{metric}': {source}")]
    Threshold {
        metric: String,
        #[source]
        source: ThresholdParseError,
    },
}
