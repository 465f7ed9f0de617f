//! Serde shapes of the JSON test script, before validation

use serde::Deserialize;
use std::collections::BTreeMap;

use super::duration::ScriptDuration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawScript {
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<RawThreshold>>,
    #[serde(default)]
    pub scenarios: BTreeMap<String, RawScenario>,
    #[serde(default)]
    pub functions: BTreeMap<String, RawFunction>,
}

/// Either `"p(95)<2000"` or `{ "threshold": "p(95)<2000", "abortOnFail": true }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawThreshold {
    Expr(String),
    Detailed {
        threshold: String,
        #[serde(default, rename = "abortOnFail")]
        abort_on_fail: bool,
        #[serde(default, rename = "delayAbortEval")]
        delay_abort_eval: Option<ScriptDuration>,
    },
}

impl RawThreshold {
    pub fn expression(&self) -> &str {
        match self {
            RawThreshold::Expr(expr) => expr,
            RawThreshold::Detailed { threshold, .. } => threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScenario {
    pub executor: String,
    #[serde(default)]
    pub stages: Vec<RawStage>,
    #[serde(default, rename = "startVUs")]
    pub start_vus: u64,
    pub vus: Option<u64>,
    pub duration: Option<ScriptDuration>,
    pub graceful_stop: Option<ScriptDuration>,
    pub graceful_ramp_down: Option<ScriptDuration>,
    pub start_time: Option<ScriptDuration>,
    pub exec: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStage {
    pub target: u64,
    pub duration: ScriptDuration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFunction {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub checks: Vec<RawCheck>,
    pub sleep: Option<ScriptDuration>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCheck {
    pub name: Option<String>,
    pub status: u16,
}
