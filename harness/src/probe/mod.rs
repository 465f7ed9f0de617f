//! Request executor
//!
//! This module provides:
//! - `Probe` trait abstracting one scripted request
//! - `HttpProbe` issuing the request with reqwest and timing it
//! - `RequestSample` / `Outcome` / `ErrorKind` describing the result
//! - `Check` predicates evaluated against each sample

mod check;
mod executor;
pub mod http;
mod types;

pub use check::Check;
pub use executor::Probe;
pub use http::{HttpClientConfig, HttpProbe, build_client};
pub use types::{ErrorKind, Outcome, RequestSample};
