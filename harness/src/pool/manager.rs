//! Worker pool reconciliation
//!
//! The pool owns every virtual user of one scenario. Each tick the scenario
//! asks it to converge on the scheduler's target: missing workers are
//! spawned, surplus workers are retired (newest first) and given a grace
//! period to finish their request before they are aborted.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::worker::{WorkerContext, run_worker};
use crate::stats::Aggregator;

struct WorkerHandle {
    id: u64,
    retire: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

struct DrainingWorker {
    worker: WorkerHandle,
    deadline: Instant,
}

/// Live population of a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub active: usize,
    pub draining: usize,
}

impl PoolStatus {
    pub fn live(&self) -> usize {
        self.active + self.draining
    }
}

pub struct WorkerPool {
    template: WorkerContext,
    aggregator: Arc<Aggregator>,
    active: Vec<WorkerHandle>,
    draining: Vec<DrainingWorker>,
    next_id: u64,
    /// Live count last pushed to the aggregator's vus gauge
    reported: u64,
    /// Offset keeping ids of different scenarios apart
    id_base: u64,
    /// Workers aborted so far, by any path
    interrupted: u64,
}

impl WorkerPool {
    /// `template` is cloned for every spawned worker, with a fresh id
    pub fn new(template: WorkerContext, id_base: u64) -> Self {
        let aggregator = Arc::clone(&template.aggregator);
        Self {
            template,
            aggregator,
            active: Vec::new(),
            draining: Vec::new(),
            next_id: 0,
            reported: 0,
            id_base,
            interrupted: 0,
        }
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            active: self.active.len(),
            draining: self.draining.len(),
        }
    }

    /// Iterations cut short over the pool's lifetime, across ramp-down
    /// deadlines, the final drain and forced stops
    pub fn interrupted(&self) -> u64 {
        self.interrupted
    }

    /// Converge on `target` active workers.
    ///
    /// Retired workers get until `now + ramp_down_grace` to finish their
    /// current request; draining workers past their deadline are aborted.
    pub fn reconcile(&mut self, target: u64, now: Instant, ramp_down_grace: Duration) -> PoolStatus {
        self.active.retain(|w| {
            let running = !w.task.is_finished();
            if !running {
                warn!("VU {} exited without being retired", w.id);
            }
            running
        });

        let mut interrupted = 0u64;
        self.draining.retain(|d| {
            if d.worker.task.is_finished() {
                return false;
            }
            if d.deadline <= now {
                d.worker.task.abort();
                interrupted += 1;
                return false;
            }
            true
        });
        if interrupted > 0 {
            debug!("Aborted {} VU(s) past their ramp-down grace period", interrupted);
            self.record_interrupted(interrupted);
        }

        let target = usize::try_from(target).unwrap_or(usize::MAX);
        while self.active.len() < target {
            let worker = self.spawn_worker();
            self.active.push(worker);
        }

        if self.active.len() > target {
            let deadline = now + ramp_down_grace;
            let surplus = self.active.split_off(target);
            // Newest first
            for worker in surplus.into_iter().rev() {
                let _ = worker.retire.send(true);
                self.draining.push(DrainingWorker { worker, deadline });
            }
        }

        self.report_live();
        self.status()
    }

    /// Retire every worker and wait for them, aborting those still running
    /// once `graceful_stop` has passed. Returns the number aborted.
    pub async fn drain(&mut self, graceful_stop: Duration) -> u64 {
        let stop_deadline = Instant::now() + graceful_stop;

        for worker in self.active.drain(..).rev() {
            let _ = worker.retire.send(true);
            self.draining.push(DrainingWorker {
                worker,
                deadline: stop_deadline,
            });
        }
        for d in &mut self.draining {
            d.deadline = d.deadline.min(stop_deadline);
        }
        self.report_live();

        // Workers stay in `draining` until joined, so dropping this future
        // midway leaves them reachable for `abort_all`.
        let mut interrupted = 0u64;
        while let Some(d) = self.draining.last_mut() {
            if tokio::time::timeout_at(d.deadline, &mut d.worker.task)
                .await
                .is_err()
            {
                d.worker.task.abort();
                interrupted += 1;
            }
            self.draining.pop();
            self.report_live();
        }

        if interrupted > 0 {
            warn!(
                "Graceful stop expired, interrupted {} iteration(s)",
                interrupted
            );
            self.record_interrupted(interrupted);
        }
        interrupted
    }

    /// Abort every worker immediately. Returns the number that were still running.
    pub fn abort_all(&mut self) -> u64 {
        let mut interrupted = 0u64;
        let active = self.active.drain(..);
        let draining = self.draining.drain(..).map(|d| d.worker);
        for worker in active.chain(draining) {
            if !worker.task.is_finished() {
                worker.task.abort();
                interrupted += 1;
            }
        }
        self.record_interrupted(interrupted);
        self.report_live();
        interrupted
    }

    fn spawn_worker(&mut self) -> WorkerHandle {
        let id = self.id_base + self.next_id;
        self.next_id += 1;

        let (retire, retire_rx) = watch::channel(false);
        let ctx = self.template.with_id(id);
        let task = tokio::spawn(run_worker(ctx, retire_rx));
        WorkerHandle { id, retire, task }
    }

    fn record_interrupted(&mut self, count: u64) {
        self.interrupted += count;
        self.aggregator.record_interrupted(count);
    }

    fn report_live(&mut self) {
        let live = self.status().live() as u64;
        if live != self.reported {
            self.aggregator.adjust_vus(self.reported, live);
            self.reported = live;
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.active {
            worker.task.abort();
        }
        for d in &self.draining {
            d.worker.task.abort();
        }
        if self.reported > 0 {
            self.aggregator.adjust_vus(self.reported, 0);
        }
    }
}
