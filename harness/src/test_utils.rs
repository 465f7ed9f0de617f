//! Test Utilities Module
//!
//! Fixtures shared by the unit tests. Only compiled when running tests.

#![cfg(test)]

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::pool::WorkerContext;
use crate::probe::{Check, ErrorKind, Outcome, Probe, RequestSample};
use crate::stats::Aggregator;

/// Probe that waits `latency` on the tokio clock and returns a fixed outcome
pub struct MockProbe {
    outcome: Outcome,
    latency: Duration,
    calls: AtomicU64,
}

impl MockProbe {
    pub fn status(status: u16, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcome: Outcome::Status(status),
            latency,
            calls: AtomicU64::new(0),
        })
    }

    pub fn error(kind: ErrorKind, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcome: Outcome::Error(kind),
            latency,
            calls: AtomicU64::new(0),
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Probe for MockProbe {
    async fn execute(&self) -> RequestSample {
        self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;
        RequestSample::new(self.outcome, self.latency)
    }

    fn describe(&self) -> String {
        format!("mock {:?}", self.outcome)
    }
}

/// Worker context around `probe` with a single `status equals 200` check
pub fn worker_context(
    probe: Arc<dyn Probe>,
    think_time: Duration,
    aggregator: Arc<Aggregator>,
) -> WorkerContext {
    WorkerContext {
        id: 0,
        scenario: Arc::from("test"),
        probe,
        checks: Arc::from(vec![Check::status_equals(200)]),
        think_time,
        aggregator,
    }
}

pub fn test_aggregator() -> Arc<Aggregator> {
    Arc::new(Aggregator::new(4).expect("Failed to create aggregator"))
}
