//! Virtual user loop

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::probe::{Check, Probe};
use crate::stats::Aggregator;

/// Everything a virtual user needs, passed explicitly at spawn time
#[derive(Clone)]
pub struct WorkerContext {
    pub id: u64,
    pub scenario: Arc<str>,
    pub probe: Arc<dyn Probe>,
    pub checks: Arc<[Check]>,
    /// Pause between iterations
    pub think_time: Duration,
    pub aggregator: Arc<Aggregator>,
}

impl WorkerContext {
    pub fn with_id(&self, id: u64) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }
}

/// Run iterations (request, checks, think time) until retired.
///
/// Retirement never interrupts a request in flight; it only cuts the think
/// time short. Returns the number of completed iterations.
pub async fn run_worker(ctx: WorkerContext, mut retire: watch::Receiver<bool>) -> u64 {
    debug!("[{}] VU {} started", ctx.scenario, ctx.id);
    let mut iterations = 0u64;

    loop {
        if *retire.borrow() {
            break;
        }

        let sample = ctx.probe.execute().await;
        ctx.aggregator.record_request(ctx.id, &sample);
        for check in ctx.checks.iter() {
            ctx.aggregator.record_check(&check.name, check.passes(&sample));
        }
        ctx.aggregator.record_iteration();
        iterations += 1;
        trace!(
            "[{}] VU {} iteration {} -> {:?} in {:?}",
            ctx.scenario, ctx.id, iterations, sample.outcome, sample.latency
        );

        if ctx.think_time.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(ctx.think_time) => {}
            // A closed channel means the pool is gone, stop as well
            _ = retire.changed() => break,
        }
    }

    debug!(
        "[{}] VU {} retired after {} iteration(s)",
        ctx.scenario, ctx.id, iterations
    );
    iterations
}
