//! Thread-safe sample aggregation
//!
//! Many workers write concurrently, a reporter or threshold evaluator reads.
//! Latencies go into HDR histograms sharded by worker id so writers rarely
//! contend on the same lock; counters are plain atomics and the per-check,
//! per-status and per-error tallies live in `DashMap`s.

use dashmap::DashMap;
use hdrhistogram::{CreationError, Histogram};
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

use super::snapshot::{CheckTally, LatencyDistribution, MetricsSnapshot};
use crate::probe::{ErrorKind, Outcome, RequestSample};

/// Lowest tracked latency, in microseconds
const LATENCY_LOW_US: u64 = 1;
/// Highest tracked latency (one hour), in microseconds; larger values saturate
const LATENCY_HIGH_US: u64 = 3_600_000_000;
const LATENCY_SIGFIG: u8 = 3;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Failed to create latency histogram: {0}")]
    Histogram(#[from] CreationError),
}

#[derive(Default)]
struct CheckCounters {
    passes: AtomicU64,
    fails: AtomicU64,
}

/// Shared metrics sink for one run
pub struct Aggregator {
    /// Start of the measured window, used for per-second rates
    started: Mutex<Instant>,
    shards: Vec<Mutex<Histogram<u64>>>,
    requests: AtomicU64,
    failed_requests: AtomicU64,
    iterations: AtomicU64,
    interrupted: AtomicU64,
    checks_passed: AtomicU64,
    checks_failed: AtomicU64,
    vus: AtomicU64,
    vus_max: AtomicU64,
    /// Lowest live count pushed through `adjust_vus`, `u64::MAX` until the first one
    vus_min: AtomicU64,
    checks: DashMap<String, CheckCounters>,
    statuses: DashMap<u16, u64>,
    errors: DashMap<ErrorKind, u64>,
}

impl Aggregator {
    pub fn new(shard_count: usize) -> Result<Self, StatsError> {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            let hist = Histogram::new_with_bounds(LATENCY_LOW_US, LATENCY_HIGH_US, LATENCY_SIGFIG)?;
            shards.push(Mutex::new(hist));
        }

        Ok(Self {
            started: Mutex::new(Instant::now()),
            shards,
            requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            interrupted: AtomicU64::new(0),
            checks_passed: AtomicU64::new(0),
            checks_failed: AtomicU64::new(0),
            vus: AtomicU64::new(0),
            vus_max: AtomicU64::new(0),
            vus_min: AtomicU64::new(u64::MAX),
            checks: DashMap::new(),
            statuses: DashMap::new(),
            errors: DashMap::new(),
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Restart the window rates are computed over, typically when the run begins
    pub fn start_clock(&self, at: Instant) {
        *self.started.lock() = at;
    }

    /// Record one request sample; `shard_hint` is usually the worker id
    pub fn record_request(&self, shard_hint: u64, sample: &RequestSample) {
        let index = (shard_hint % self.shards.len() as u64) as usize;
        let micros = u64::try_from(sample.latency.as_micros()).unwrap_or(u64::MAX);
        self.shards[index].lock().saturating_record(micros);

        self.requests.fetch_add(1, Ordering::Relaxed);
        counter!("loadprobe_http_reqs_total").increment(1);
        histogram!("loadprobe_http_req_duration_seconds").record(sample.latency);

        if sample.outcome.is_failure() {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            counter!("loadprobe_http_req_failed_total").increment(1);
        }

        match sample.outcome {
            Outcome::Status(code) => *self.statuses.entry(code).or_insert(0) += 1,
            Outcome::Error(kind) => *self.errors.entry(kind).or_insert(0) += 1,
        }
    }

    /// Record the result of one named check
    pub fn record_check(&self, name: &str, passed: bool) {
        if !self.checks.contains_key(name) {
            self.checks.entry(name.to_string()).or_default();
        }
        if let Some(counters) = self.checks.get(name) {
            if passed {
                counters.passes.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.fails.fetch_add(1, Ordering::Relaxed);
            }
        }

        let result = if passed {
            self.checks_passed.fetch_add(1, Ordering::Relaxed);
            "pass"
        } else {
            self.checks_failed.fetch_add(1, Ordering::Relaxed);
            "fail"
        };
        counter!("loadprobe_checks_total", "check" => name.to_string(), "result" => result)
            .increment(1);
    }

    pub fn record_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        counter!("loadprobe_iterations_total").increment(1);
    }

    /// Iterations cut short by forced cancellation after a grace period
    pub fn record_interrupted(&self, count: u64) {
        if count > 0 {
            self.interrupted.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Move the live virtual user count from `previous` to `current`.
    ///
    /// Scenarios running side by side each own a slice of the total.
    pub fn adjust_vus(&self, previous: u64, current: u64) {
        let total = if current >= previous {
            self.vus.fetch_add(current - previous, Ordering::Relaxed) + (current - previous)
        } else {
            self.vus.fetch_sub(previous - current, Ordering::Relaxed) - (previous - current)
        };
        self.vus_max.fetch_max(total, Ordering::Relaxed);
        self.vus_min.fetch_min(total, Ordering::Relaxed);
        gauge!("loadprobe_vus").set(total as f64);
    }

    /// Copy out the current state. Concurrent writers may or may not be
    /// reflected; no ordering is promised between individual counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut merged = Histogram::new_from(&*self.shards[0].lock());
        for shard in &self.shards {
            let guard = shard.lock();
            if let Err(e) = merged.add(&*guard) {
                warn!("Failed to merge latency shard: {}", e);
            }
        }

        let checks = self
            .checks
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    CheckTally {
                        passes: entry.value().passes.load(Ordering::Relaxed),
                        fails: entry.value().fails.load(Ordering::Relaxed),
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        let statuses = self
            .statuses
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        let errors = self
            .errors
            .iter()
            .map(|entry| (entry.key().as_str().to_string(), *entry.value()))
            .collect();

        let vus = self.vus.load(Ordering::Relaxed);
        let vus_min = match self.vus_min.load(Ordering::Relaxed) {
            u64::MAX => vus,
            min => min,
        };

        MetricsSnapshot {
            elapsed: self.started.lock().elapsed(),
            http_reqs: self.requests.load(Ordering::Relaxed),
            http_req_failed: self.failed_requests.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
            interrupted_iterations: self.interrupted.load(Ordering::Relaxed),
            vus,
            vus_min,
            vus_max: self.vus_max.load(Ordering::Relaxed),
            checks_passed: self.checks_passed.load(Ordering::Relaxed),
            checks_failed: self.checks_failed.load(Ordering::Relaxed),
            http_req_duration: LatencyDistribution::new(merged),
            checks,
            statuses,
            errors,
        }
    }
}
