//! Stage scheduler
//!
//! Turns an ordered list of `(target, duration)` stages into the number of
//! virtual users that should be active at a given instant. Between stage
//! endpoints the target moves linearly; the first stage ramps from the
//! scenario's start value (0 when ramping from idle).

use std::time::Duration;
use thiserror::Error;

/// Errors detected while building a schedule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("stage list is empty")]
    NoStages,

    #[error("stage {index} has a non-positive duration")]
    ZeroDuration { index: usize },
}

/// A single ramping stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    /// Concurrency reached at the end of the stage
    pub target: u64,
    /// Time taken to move from the previous target to `target`
    pub duration: Duration,
}

impl Stage {
    pub fn new(target: u64, duration: Duration) -> Self {
        Self { target, duration }
    }
}

/// Piecewise-linear concurrency schedule
#[derive(Debug, Clone)]
pub struct StageScheduler {
    start: u64,
    stages: Vec<Stage>,
    total: Duration,
}

impl StageScheduler {
    pub fn new(start: u64, stages: Vec<Stage>) -> Result<Self, ScheduleError> {
        if stages.is_empty() {
            return Err(ScheduleError::NoStages);
        }
        if let Some(index) = stages.iter().position(|s| s.duration.is_zero()) {
            return Err(ScheduleError::ZeroDuration { index });
        }

        let total = stages.iter().map(|s| s.duration).sum();
        Ok(Self {
            start,
            stages,
            total,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Sum of all stage durations
    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Highest concurrency the schedule ever asks for
    pub fn max_target(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(0)
            .max(self.start)
    }

    /// Index of the stage running at `elapsed`, `None` once the schedule is over
    pub fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        let mut stage_start = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            if elapsed < stage_start + stage.duration {
                return Some(index);
            }
            stage_start += stage.duration;
        }
        None
    }

    /// Target concurrency at `elapsed`, rounded to the nearest worker
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let mut stage_start = Duration::ZERO;
        let mut from = self.start;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let diff = stage.target as f64 - from as f64;
                return (from as f64 + diff * progress).round().max(0.0) as u64;
            }
            stage_start = stage_end;
            from = stage.target;
        }

        from
    }
}
