//! Validated test plan

use reqwest::{Method, Url};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::ScriptError;
use super::types::{RawFunction, RawScenario, RawScript, RawThreshold};
use crate::probe::Check;
use crate::schedule::{Stage, StageScheduler};
use crate::threshold::{Threshold, ThresholdSet};

/// Entry function used when a scenario has no `exec`
pub const DEFAULT_EXEC: &str = "default";

/// Values applied when a scenario leaves a grace period unset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanDefaults {
    pub graceful_stop: Duration,
    pub graceful_ramp_down: Duration,
}

impl Default for PlanDefaults {
    fn default() -> Self {
        Self {
            graceful_stop: Duration::from_secs(30),
            graceful_ramp_down: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    RampingVus,
    ConstantVus,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::RampingVus => "ramping-vus",
            ExecutorKind::ConstantVus => "constant-vus",
        }
    }
}

/// What one iteration of a virtual user does
#[derive(Debug, Clone)]
pub struct FunctionPlan {
    pub name: String,
    pub method: Method,
    pub url: Url,
    pub checks: Vec<Check>,
    /// Pause after each iteration
    pub think_time: Duration,
}

#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub name: String,
    pub executor: ExecutorKind,
    pub scheduler: StageScheduler,
    pub graceful_stop: Duration,
    pub graceful_ramp_down: Duration,
    /// Offset from the run start before the scenario begins
    pub start_time: Duration,
    pub function: Arc<FunctionPlan>,
}

impl ScenarioPlan {
    /// Time from run start until the schedule (not the drain) is over
    pub fn end_offset(&self) -> Duration {
        self.start_time + self.scheduler.total_duration()
    }
}

/// A fully validated script
#[derive(Debug, Clone)]
pub struct TestPlan {
    pub scenarios: Vec<ScenarioPlan>,
    pub thresholds: ThresholdSet,
}

impl TestPlan {
    pub fn from_path(path: impl AsRef<Path>, defaults: &PlanDefaults) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents, defaults)
    }

    pub fn from_json_str(json: &str, defaults: &PlanDefaults) -> Result<Self, ScriptError> {
        let raw: RawScript = serde_json::from_str(json)?;
        Self::from_raw(raw, defaults)
    }

    pub fn from_raw(raw: RawScript, defaults: &PlanDefaults) -> Result<Self, ScriptError> {
        if raw.scenarios.is_empty() {
            return Err(ScriptError::NoScenarios);
        }

        let thresholds = build_thresholds(&raw)?;

        let mut scenarios = Vec::with_capacity(raw.scenarios.len());
        let mut functions = std::collections::BTreeMap::new();

        for (name, scenario) in &raw.scenarios {
            let exec = scenario.exec.as_deref().unwrap_or(DEFAULT_EXEC);
            let function = match functions.get(exec) {
                Some(f) => Arc::clone(f),
                None => {
                    let raw_fn =
                        raw.functions
                            .get(exec)
                            .ok_or_else(|| ScriptError::UnknownFunction {
                                scenario: name.clone(),
                                function: exec.to_string(),
                            })?;
                    let built = Arc::new(build_function(exec, raw_fn)?);
                    functions.insert(exec.to_string(), Arc::clone(&built));
                    built
                }
            };

            scenarios.push(build_scenario(name, scenario, function, defaults)?);
        }

        for name in raw.functions.keys() {
            if !functions.contains_key(name) {
                warn!("Function '{}' is not used by any scenario", name);
            }
        }

        debug!(
            "Loaded plan: {} scenario(s), {} threshold(s)",
            scenarios.len(),
            thresholds.len()
        );

        Ok(Self {
            scenarios,
            thresholds,
        })
    }

    /// Sum of the peak VU counts of every scenario
    pub fn max_vus(&self) -> u64 {
        self.scenarios.iter().map(|s| s.scheduler.max_target()).sum()
    }

    /// Time until the last scenario's schedule ends
    pub fn scheduled_duration(&self) -> Duration {
        self.scenarios
            .iter()
            .map(ScenarioPlan::end_offset)
            .max()
            .unwrap_or_default()
    }
}

fn build_thresholds(raw: &RawScript) -> Result<ThresholdSet, ScriptError> {
    let mut thresholds = Vec::new();
    for (metric, entries) in &raw.thresholds {
        for entry in entries {
            let threshold =
                Threshold::parse(metric, entry.expression()).map_err(|source| {
                    ScriptError::Threshold {
                        metric: metric.clone(),
                        source,
                    }
                })?;
            let threshold = match entry {
                RawThreshold::Expr(_) => threshold,
                RawThreshold::Detailed {
                    abort_on_fail,
                    delay_abort_eval,
                    ..
                } => threshold.with_abort(
                    *abort_on_fail,
                    delay_abort_eval.map(|d| d.into_inner()).unwrap_or_default(),
                ),
            };
            thresholds.push(threshold);
        }
    }
    Ok(ThresholdSet::new(thresholds))
}

fn build_scenario(
    name: &str,
    raw: &RawScenario,
    function: Arc<FunctionPlan>,
    defaults: &PlanDefaults,
) -> Result<ScenarioPlan, ScriptError> {
    let executor = match raw.executor.as_str() {
        "ramping-vus" => ExecutorKind::RampingVus,
        "constant-vus" => ExecutorKind::ConstantVus,
        other => {
            return Err(ScriptError::UnknownExecutor {
                scenario: name.to_string(),
                executor: other.to_string(),
            });
        }
    };

    let (start, stages) = match executor {
        ExecutorKind::RampingVus => {
            let stages = raw
                .stages
                .iter()
                .map(|s| Stage::new(s.target, s.duration.into_inner()))
                .collect();
            (raw.start_vus, stages)
        }
        ExecutorKind::ConstantVus => {
            let vus = raw.vus.unwrap_or(1);
            let duration = raw.duration.ok_or_else(|| ScriptError::MissingField {
                scenario: name.to_string(),
                field: "duration",
            })?;
            (vus, vec![Stage::new(vus, duration.into_inner())])
        }
    };

    let scheduler =
        StageScheduler::new(start, stages).map_err(|source| ScriptError::Schedule {
            scenario: name.to_string(),
            source,
        })?;

    Ok(ScenarioPlan {
        name: name.to_string(),
        executor,
        scheduler,
        graceful_stop: raw
            .graceful_stop
            .map(|d| d.into_inner())
            .unwrap_or(defaults.graceful_stop),
        graceful_ramp_down: raw
            .graceful_ramp_down
            .map(|d| d.into_inner())
            .unwrap_or(defaults.graceful_ramp_down),
        start_time: raw.start_time.map(|d| d.into_inner()).unwrap_or_default(),
        function,
    })
}

fn build_function(name: &str, raw: &RawFunction) -> Result<FunctionPlan, ScriptError> {
    let method = Method::from_bytes(raw.method.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| ScriptError::InvalidMethod {
            function: name.to_string(),
            method: raw.method.clone(),
        })?;

    let invalid_url = |reason: String| ScriptError::InvalidUrl {
        function: name.to_string(),
        url: raw.url.clone(),
        reason,
    };
    let url = Url::parse(&raw.url).map_err(|e| invalid_url(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid_url(format!("unsupported scheme '{}'", url.scheme())));
    }

    let checks = raw
        .checks
        .iter()
        .map(|c| match &c.name {
            Some(check_name) => Check::named(check_name.clone(), c.status),
            None => Check::status_equals(c.status),
        })
        .collect();

    Ok(FunctionPlan {
        name: name.to_string(),
        method,
        url,
        checks,
        think_time: raw.sleep.map(|d| d.into_inner()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduleError;
    use crate::threshold::ThresholdParseError;

    const SIMPLE50: &str = r#"{
        "thresholds": { "http_req_duration": ["p(95)<2000"] },
        "scenarios": {
            "Scenario_1": {
                "executor": "ramping-vus",
                "gracefulStop": "30s",
                "stages": [
                    { "target": 50, "duration": "1m" },
                    { "target": 50, "duration": "1m" },
                    { "target": 0, "duration": "1m" }
                ],
                "gracefulRampDown": "30s",
                "exec": "load_home"
            }
        },
        "functions": {
            "load_home": {
                "method": "GET",
                "url": "http://10.0.0.4:8080/",
                "checks": [ { "name": "status equals 200", "status": 200 } ],
                "sleep": "1s"
            }
        }
    }"#;

    fn load(json: &str) -> Result<TestPlan, ScriptError> {
        TestPlan::from_json_str(json, &PlanDefaults::default())
    }

    #[test]
    fn test_load_ramping_script() {
        let plan = load(SIMPLE50).unwrap();
        assert_eq!(plan.scenarios.len(), 1);
        assert_eq!(plan.thresholds.len(), 1);

        let scenario = &plan.scenarios[0];
        assert_eq!(scenario.name, "Scenario_1");
        assert_eq!(scenario.executor, ExecutorKind::RampingVus);
        assert_eq!(scenario.scheduler.stages().len(), 3);
        assert_eq!(scenario.scheduler.total_duration(), Duration::from_secs(180));
        assert_eq!(scenario.graceful_stop, Duration::from_secs(30));
        assert_eq!(scenario.start_time, Duration::ZERO);

        let function = &scenario.function;
        assert_eq!(function.name, "load_home");
        assert_eq!(function.method, Method::GET);
        assert_eq!(function.url.as_str(), "http://10.0.0.4:8080/");
        assert_eq!(function.checks, vec![Check::status_equals(200)]);
        assert_eq!(function.think_time, Duration::from_secs(1));

        assert_eq!(plan.max_vus(), 50);
        assert_eq!(plan.scheduled_duration(), Duration::from_secs(180));
    }

    #[test]
    fn test_constant_vus_and_defaults() {
        let plan = TestPlan::from_json_str(
            r#"{
                "scenarios": {
                    "steady": { "executor": "constant-vus", "vus": 5, "duration": 20, "startTime": "10s" }
                },
                "functions": { "default": { "url": "https://example.com/health" } }
            }"#,
            &PlanDefaults {
                graceful_stop: Duration::from_secs(3),
                graceful_ramp_down: Duration::from_secs(4),
            },
        )
        .unwrap();

        let scenario = &plan.scenarios[0];
        assert_eq!(scenario.executor, ExecutorKind::ConstantVus);
        assert_eq!(scenario.scheduler.target_at(Duration::ZERO), 5);
        assert_eq!(scenario.scheduler.target_at(Duration::from_secs(19)), 5);
        assert_eq!(scenario.graceful_stop, Duration::from_secs(3));
        assert_eq!(scenario.graceful_ramp_down, Duration::from_secs(4));
        assert_eq!(scenario.end_offset(), Duration::from_secs(30));
        assert_eq!(scenario.function.method, Method::GET);
        assert!(scenario.function.checks.is_empty());
        assert!(plan.thresholds.is_empty());
    }

    #[test]
    fn test_threshold_object_form() {
        let plan = load(
            r#"{
                "thresholds": {
                    "http_req_failed": [ { "threshold": "rate<0.01", "abortOnFail": true, "delayAbortEval": "10s" } ],
                    "http_req_duration": [ "p(95)<2000", "avg<500" ]
                },
                "scenarios": { "s": { "executor": "constant-vus", "duration": "1s" } },
                "functions": { "default": { "url": "http://localhost/" } }
            }"#,
        )
        .unwrap();

        assert_eq!(plan.thresholds.len(), 3);
        let abort = plan.thresholds.iter().find(|t| t.abort_on_fail).unwrap();
        assert_eq!(abort.source, "rate<0.01");
        assert_eq!(abort.delay_abort_eval, Duration::from_secs(10));
    }

    #[test]
    fn test_script_errors() {
        assert!(matches!(load("{ not json"), Err(ScriptError::Json(_))));
        assert!(matches!(load("{}"), Err(ScriptError::NoScenarios)));

        let err = load(
            r#"{ "scenarios": { "s": { "executor": "ramping-vus", "stages": [] } },
                 "functions": { "default": { "url": "http://localhost/" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Schedule {
                source: ScheduleError::NoStages,
                ..
            }
        ));

        let err = load(
            r#"{ "scenarios": { "s": { "executor": "ramping-vus", "stages": [ { "target": 5, "duration": "0s" } ] } },
                 "functions": { "default": { "url": "http://localhost/" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Schedule {
                source: ScheduleError::ZeroDuration { index: 0 },
                ..
            }
        ));

        let err = load(
            r#"{ "scenarios": { "s": { "executor": "per-vu-iterations" } },
                 "functions": { "default": { "url": "http://localhost/" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::UnknownExecutor { .. }));

        let err = load(
            r#"{ "scenarios": { "s": { "executor": "constant-vus", "duration": "1s", "exec": "missing" } },
                 "functions": { "default": { "url": "http://localhost/" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::UnknownFunction { .. }));

        let err = load(
            r#"{ "scenarios": { "s": { "executor": "constant-vus" } },
                 "functions": { "default": { "url": "http://localhost/" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ScriptError::MissingField {
                field: "duration",
                ..
            }
        ));
    }

    #[test]
    fn test_function_errors() {
        let err = load(
            r#"{ "scenarios": { "s": { "executor": "constant-vus", "duration": "1s" } },
                 "functions": { "default": { "url": "ftp://localhost/" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidUrl { .. }));

        let err = load(
            r#"{ "scenarios": { "s": { "executor": "constant-vus", "duration": "1s" } },
                 "functions": { "default": { "url": "not a url" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidUrl { .. }));

        let err = load(
            r#"{ "scenarios": { "s": { "executor": "constant-vus", "duration": "1s" } },
                 "functions": { "default": { "method": "GE T", "url": "http://localhost/" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidMethod { .. }));
    }

    #[test]
    fn test_bad_threshold_is_script_error() {
        let err = load(
            r#"{ "thresholds": { "http_req_duration": ["p95<2000"] },
                 "scenarios": { "s": { "executor": "constant-vus", "duration": "1s" } },
                 "functions": { "default": { "url": "http://localhost/" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Threshold {
                source: ThresholdParseError::UnknownAggregation(_),
                ..
            }
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = TestPlan::from_path("/nonexistent/loadprobe.json", &PlanDefaults::default())
            .unwrap_err();
        assert!(matches!(err, ScriptError::Io { .. }));
    }
}
