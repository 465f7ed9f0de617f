//! Virtual user pool
//!
//! This module provides:
//! - `WorkerContext`, the explicit state handed to each virtual user
//! - `run_worker`, the request / checks / think-time loop
//! - `WorkerPool`, which reconciles running workers against a target count

mod manager;
mod worker;

pub use manager::{PoolStatus, WorkerPool};
pub use worker::{WorkerContext, run_worker};
