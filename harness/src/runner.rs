//! Test run orchestration
//!
//! A run starts one task per scenario. Each scenario task waits for its
//! start time, then ticks its stage scheduler and reconciles its worker pool
//! until the schedule is over, and finally drains its workers within the
//! graceful stop period. Meanwhile the runner evaluates thresholds
//! periodically and stops everything early when an `abortOnFail` threshold
//! fails or the shutdown signal fires.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::pool::{WorkerContext, WorkerPool};
use crate::probe::{HttpProbe, Probe, build_client};
use crate::script::{FunctionPlan, ScenarioPlan, TestPlan};
use crate::stats::{Aggregator, MetricsSnapshot, StatsError};
use crate::threshold::{ThresholdReport, ThresholdSet};

/// Exit code when every threshold passed
pub const EXIT_OK: i32 = 0;
/// Exit code when at least one threshold failed at the end of the run
pub const EXIT_THRESHOLDS_FAILED: i32 = 99;
/// Exit code for an invalid script or configuration
pub const EXIT_INVALID_CONFIG: i32 = 104;
/// Exit code when the run was stopped early
pub const EXIT_ABORTED: i32 = 105;

/// Spacing between scenario id ranges, used as histogram shard hints
const SCENARIO_ID_STRIDE: u64 = 1 << 32;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Failed to create metrics aggregator: {0}")]
    Stats(#[from] StatsError),

    #[error("Scenario task failed: {0}")]
    Scenario(#[from] JoinError),
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Passed,
    ThresholdsFailed,
    /// Stopped by a failing `abortOnFail` threshold
    AbortedByThreshold { metric: String, expression: String },
    /// Stopped by the shutdown signal
    Interrupted,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Passed => EXIT_OK,
            RunOutcome::ThresholdsFailed => EXIT_THRESHOLDS_FAILED,
            RunOutcome::AbortedByThreshold { .. } | RunOutcome::Interrupted => EXIT_ABORTED,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub name: String,
    pub executor: &'static str,
    pub max_vus: u64,
    /// Iterations cut short when the scenario stopped
    pub interrupted: u64,
    /// Whether the scenario was stopped before its schedule finished
    pub stopped_early: bool,
}

/// Everything known about a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
    pub outcome: RunOutcome,
    pub scenarios: Vec<ScenarioSummary>,
    pub thresholds: ThresholdReport,
    pub metrics: MetricsSnapshot,
}

fn serialize_secs<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(value.as_secs_f64())
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    pub fn passed(&self) -> bool {
        self.outcome == RunOutcome::Passed
    }
}

/// Knobs the runner takes from `Config`
#[derive(Debug, Clone)]
struct RunSettings {
    tick: Duration,
    eval_interval: Duration,
}

pub struct Runner {
    run_id: Uuid,
    plan: TestPlan,
    settings: RunSettings,
    aggregator: Arc<Aggregator>,
    probes: HashMap<String, Arc<dyn Probe>>,
}

impl Runner {
    /// Build a runner issuing real HTTP requests
    pub fn new(plan: TestPlan, config: &Config) -> Result<Self, RunError> {
        let client = build_client(&config.http)?;
        Self::with_probes(plan, config, |function| -> Arc<dyn Probe> {
            Arc::new(HttpProbe::new(
                client.clone(),
                function.method.clone(),
                function.url.clone(),
            ))
        })
    }

    /// Build a runner with a custom probe per entry function
    pub fn with_probes<F>(plan: TestPlan, config: &Config, mut probe_for: F) -> Result<Self, RunError>
    where
        F: FnMut(&FunctionPlan) -> Arc<dyn Probe>,
    {
        let aggregator = Arc::new(Aggregator::new(config.metrics_shards)?);

        let mut probes = HashMap::new();
        for scenario in &plan.scenarios {
            let function = &scenario.function;
            if !probes.contains_key(&function.name) {
                let probe = probe_for(function);
                debug!("Function '{}' -> {}", function.name, probe.describe());
                probes.insert(function.name.clone(), probe);
            }
        }

        Ok(Self {
            run_id: Uuid::new_v4(),
            plan,
            settings: RunSettings {
                tick: config.pool.tick,
                eval_interval: config.thresholds.eval_interval,
            },
            aggregator,
            probes,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn aggregator(&self) -> Arc<Aggregator> {
        Arc::clone(&self.aggregator)
    }

    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    /// Execute the plan to completion, or until `shutdown` resolves
    pub async fn run<S>(self, shutdown: S) -> Result<RunReport, RunError>
    where
        S: Future<Output = ()> + Send,
    {
        let started_at = Utc::now();
        let run_start = Instant::now();
        self.aggregator.start_clock(run_start);
        info!(
            "Run {} starting: {} scenario(s), up to {} VUs, {} scheduled",
            self.run_id,
            self.plan.scenarios.len(),
            self.plan.max_vus(),
            humantime::format_duration(self.plan.scheduled_duration())
        );

        let (stop_tx, stop_rx) = watch::channel(false);

        let mut handles = Vec::with_capacity(self.plan.scenarios.len());
        for (index, scenario) in self.plan.scenarios.iter().enumerate() {
            let Some(probe) = self.probes.get(&scenario.function.name) else {
                continue;
            };
            let template = WorkerContext {
                id: 0,
                scenario: Arc::from(scenario.name.as_str()),
                probe: Arc::clone(probe),
                checks: Arc::from(scenario.function.checks.clone()),
                think_time: scenario.function.think_time,
                aggregator: Arc::clone(&self.aggregator),
            };
            let pool = WorkerPool::new(template, index as u64 * SCENARIO_ID_STRIDE);
            handles.push(tokio::spawn(run_scenario(
                scenario.clone(),
                pool,
                run_start,
                self.settings.tick,
                stop_rx.clone(),
            )));
        }

        let scenarios_done = join_all(handles);
        tokio::pin!(scenarios_done);
        tokio::pin!(shutdown);

        let mut eval = tokio::time::interval(self.settings.eval_interval);
        eval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        eval.tick().await;

        let mut stopped: Option<RunOutcome> = None;
        let results = loop {
            tokio::select! {
                results = &mut scenarios_done => break results,
                _ = eval.tick(), if stopped.is_none() => {
                    let snapshot = self.aggregator.snapshot();
                    if let Some(outcome) = check_abort(&self.plan.thresholds, &snapshot, run_start.elapsed()) {
                        let _ = stop_tx.send(true);
                        stopped = Some(outcome);
                    }
                }
                _ = &mut shutdown, if stopped.is_none() => {
                    warn!("Shutdown requested, stopping all scenarios");
                    let _ = stop_tx.send(true);
                    stopped = Some(RunOutcome::Interrupted);
                }
            }
        };

        let mut scenarios = Vec::with_capacity(results.len());
        for result in results {
            scenarios.push(result?);
        }

        let metrics = self.aggregator.snapshot();
        let thresholds = self.plan.thresholds.evaluate(&metrics);
        for outcome in &thresholds.outcomes {
            let observed = outcome
                .observed
                .map(|v| format!("{:.3}", v))
                .unwrap_or_else(|| "n/a".to_string());
            if outcome.passed {
                info!("Threshold {} '{}' passed ({})", outcome.metric, outcome.expression, observed);
            } else {
                warn!("Threshold {} '{}' failed ({})", outcome.metric, outcome.expression, observed);
            }
        }

        let outcome = match stopped {
            Some(outcome) => outcome,
            None if thresholds.passed() => RunOutcome::Passed,
            None => RunOutcome::ThresholdsFailed,
        };

        let duration = run_start.elapsed();
        info!(
            "Run {} finished in {}: {:?}",
            self.run_id,
            humantime::format_duration(Duration::from_millis(duration.as_millis() as u64)),
            outcome
        );

        Ok(RunReport {
            run_id: self.run_id,
            started_at,
            duration,
            outcome,
            scenarios,
            thresholds,
            metrics,
        })
    }
}

fn check_abort(
    thresholds: &ThresholdSet,
    snapshot: &MetricsSnapshot,
    elapsed: Duration,
) -> Option<RunOutcome> {
    let failing = thresholds.abort_trigger(snapshot, elapsed)?;
    warn!(
        "Threshold {} '{}' failed with abortOnFail, stopping the run",
        failing.metric, failing.source
    );
    Some(RunOutcome::AbortedByThreshold {
        metric: failing.metric.to_string(),
        expression: failing.source.clone(),
    })
}

/// Drive one scenario's pool from its start time until it has drained
async fn run_scenario(
    plan: ScenarioPlan,
    mut pool: WorkerPool,
    run_start: Instant,
    tick: Duration,
    mut stop: watch::Receiver<bool>,
) -> ScenarioSummary {
    let mut summary = ScenarioSummary {
        name: plan.name.clone(),
        executor: plan.executor.as_str(),
        max_vus: plan.scheduler.max_target(),
        interrupted: 0,
        stopped_early: false,
    };

    if !plan.start_time.is_zero() {
        debug!(
            "[{}] waiting {} before starting",
            plan.name,
            humantime::format_duration(plan.start_time)
        );
        tokio::select! {
            _ = tokio::time::sleep_until(run_start + plan.start_time) => {}
            _ = stop.changed() => {
                summary.stopped_early = true;
                return summary;
            }
        }
    }

    info!(
        "[{}] starting {} with {} stage(s) over {}",
        plan.name,
        plan.executor.as_str(),
        plan.scheduler.stages().len(),
        humantime::format_duration(plan.scheduler.total_duration())
    );

    let start = Instant::now();
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut current_stage = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => {
                pool.abort_all();
                summary.interrupted = pool.interrupted();
                summary.stopped_early = true;
                info!("[{}] stopped early, {} iteration(s) interrupted", plan.name, summary.interrupted);
                return summary;
            }
        }

        let elapsed = start.elapsed();
        let stage = plan.scheduler.stage_index_at(elapsed);
        if stage != current_stage {
            if let Some(index) = stage {
                let s = plan.scheduler.stages()[index];
                info!(
                    "[{}] stage {}/{}: target {} VUs over {}",
                    plan.name,
                    index + 1,
                    plan.scheduler.stages().len(),
                    s.target,
                    humantime::format_duration(s.duration)
                );
            }
            current_stage = stage;
        }

        let target = plan.scheduler.target_at(elapsed);
        let status = pool.reconcile(target, Instant::now(), plan.graceful_ramp_down);
        debug!(
            "[{}] target {} active {} draining {}",
            plan.name, target, status.active, status.draining
        );

        if stage.is_none() {
            break;
        }
    }

    info!(
        "[{}] schedule complete, stopping VUs (graceful stop {})",
        plan.name,
        humantime::format_duration(plan.graceful_stop)
    );

    let drained = {
        let drain = pool.drain(plan.graceful_stop);
        tokio::pin!(drain);
        tokio::select! {
            _ = &mut drain => Some(()),
            _ = stop.changed() => None,
        }
    };
    if drained.is_none() {
        summary.stopped_early = true;
        pool.abort_all();
    }
    summary.interrupted = pool.interrupted();

    info!("[{}] finished", plan.name);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::PlanDefaults;
    use crate::test_utils::MockProbe;

    fn config() -> Config {
        let mut config = Config::default();
        config.metrics_shards = 2;
        config.thresholds.eval_interval = Duration::from_millis(500);
        config
    }

    fn plan(json: &str) -> TestPlan {
        TestPlan::from_json_str(json, &PlanDefaults::default()).unwrap()
    }

    fn runner_with(plan: TestPlan, probe: Arc<MockProbe>) -> Runner {
        let probe: Arc<dyn Probe> = probe;
        Runner::with_probes(plan, &config(), |_| Arc::clone(&probe)).unwrap()
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Passed.exit_code(), 0);
        assert_eq!(RunOutcome::ThresholdsFailed.exit_code(), 99);
        assert_eq!(RunOutcome::Interrupted.exit_code(), 105);
        assert_eq!(
            RunOutcome::AbortedByThreshold {
                metric: "http_req_duration".into(),
                expression: "p(95)<2000".into()
            }
            .exit_code(),
            105
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_passing_run() {
        let plan = plan(
            r#"{
                "thresholds": { "http_req_duration": ["p(95)<2000"], "checks": ["rate>0.99"] },
                "scenarios": {
                    "ramp": {
                        "executor": "ramping-vus",
                        "stages": [ { "target": 5, "duration": "2s" }, { "target": 0, "duration": "2s" } ],
                        "gracefulRampDown": "1s",
                        "gracefulStop": "1s"
                    }
                },
                "functions": { "default": { "url": "http://localhost/", "checks": [ { "status": 200 } ], "sleep": "200ms" } }
            }"#,
        );
        let runner = runner_with(plan, MockProbe::status(200, Duration::from_millis(100)));

        let report = runner.run(std::future::pending()).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Passed);
        assert_eq!(report.exit_code(), 0);
        assert!(report.metrics.http_reqs > 0);
        assert_eq!(report.metrics.vus, 0);
        assert_eq!(report.metrics.vus_max, 5);
        assert_eq!(report.scenarios.len(), 1);
        assert!(!report.scenarios[0].stopped_early);
        assert!(report.thresholds.passed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_target_fails_thresholds() {
        let plan = plan(
            r#"{
                "thresholds": { "http_req_duration": ["p(95)<2000"] },
                "scenarios": { "steady": { "executor": "constant-vus", "vus": 3, "duration": "10s", "gracefulStop": "5s" } },
                "functions": { "default": { "url": "http://localhost/" } }
            }"#,
        );
        let runner = runner_with(plan, MockProbe::status(200, Duration::from_millis(2500)));

        let report = runner.run(std::future::pending()).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::ThresholdsFailed);
        assert_ne!(report.exit_code(), 0);

        let p95 = report.thresholds.outcomes[0].observed.unwrap();
        assert!((p95 - 2500.0).abs() / 2500.0 < 0.01, "p95 = {}", p95);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_on_fail_stops_early() {
        let plan = plan(
            r#"{
                "thresholds": {
                    "http_req_failed": [ { "threshold": "rate<0.1", "abortOnFail": true, "delayAbortEval": "2s" } ]
                },
                "scenarios": { "steady": { "executor": "constant-vus", "vus": 2, "duration": "5m" } },
                "functions": { "default": { "url": "http://localhost/", "sleep": "100ms" } }
            }"#,
        );
        let runner = runner_with(plan, MockProbe::status(503, Duration::from_millis(50)));

        let started = Instant::now();
        let report = runner.run(std::future::pending()).await.unwrap();

        assert!(matches!(report.outcome, RunOutcome::AbortedByThreshold { .. }));
        assert_eq!(report.exit_code(), EXIT_ABORTED);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(report.scenarios[0].stopped_early);
        assert!(!report.thresholds.passed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_run() {
        let plan = plan(
            r#"{
                "scenarios": { "steady": { "executor": "constant-vus", "vus": 4, "duration": "1h" } },
                "functions": { "default": { "url": "http://localhost/", "sleep": "1s" } }
            }"#,
        );
        let runner = runner_with(plan, MockProbe::status(200, Duration::from_secs(5)));

        let report = runner
            .run(tokio::time::sleep(Duration::from_secs(3)))
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Interrupted);
        assert_eq!(report.exit_code(), EXIT_ABORTED);
        assert_eq!(report.scenarios[0].interrupted, 4);
        assert_eq!(report.metrics.vus, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_counts_ramp_down_interruptions() {
        let plan = plan(
            r#"{
                "scenarios": {
                    "ramp": {
                        "executor": "ramping-vus",
                        "stages": [
                            { "target": 2, "duration": "1s" },
                            { "target": 2, "duration": "1s" },
                            { "target": 0, "duration": "5s" }
                        ],
                        "gracefulRampDown": "1s"
                    }
                },
                "functions": { "default": { "url": "http://localhost/" } }
            }"#,
        );
        // Every request outlives the ramp-down grace period
        let runner = runner_with(plan, MockProbe::status(200, Duration::from_secs(60)));

        let report = runner.run(std::future::pending()).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Passed);
        assert_eq!(report.metrics.interrupted_iterations, 2);
        assert_eq!(
            report.scenarios[0].interrupted,
            report.metrics.interrupted_iterations
        );
        assert!(!report.scenarios[0].stopped_early);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rates_exclude_setup_time() {
        let plan = plan(
            r#"{
                "scenarios": { "steady": { "executor": "constant-vus", "vus": 1, "duration": "2s" } },
                "functions": { "default": { "url": "http://localhost/", "sleep": "100ms" } }
            }"#,
        );
        let runner = runner_with(plan, MockProbe::status(200, Duration::from_millis(10)));

        // Time spent between building the runner and starting it
        tokio::time::advance(Duration::from_secs(60)).await;

        let report = runner.run(std::future::pending()).await.unwrap();
        assert!(report.metrics.elapsed <= report.duration);
        assert!(report.metrics.http_reqs_per_sec() > 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_time_delays_scenario() {
        let plan = plan(
            r#"{
                "scenarios": {
                    "early": { "executor": "constant-vus", "vus": 1, "duration": "2s" },
                    "late": { "executor": "constant-vus", "vus": 1, "duration": "2s", "startTime": "3s", "exec": "other" }
                },
                "functions": {
                    "default": { "url": "http://localhost/a", "sleep": "500ms" },
                    "other": { "url": "http://localhost/b", "sleep": "500ms" }
                }
            }"#,
        );
        let runner = runner_with(plan, MockProbe::status(200, Duration::from_millis(10)));

        let started = Instant::now();
        let report = runner.run(std::future::pending()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(report.outcome, RunOutcome::Passed);
        // Scenarios never overlap, so the gauge peaks at one VU
        assert_eq!(report.metrics.vus_max, 1);
        assert_eq!(report.scenarios.len(), 2);
    }
}
