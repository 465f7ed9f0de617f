//! Request sample types

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Classification of transport-level failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ConnectionRefused,
    Dns,
    Connect,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::Dns => "dns",
            ErrorKind::Connect => "connect",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a request ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Status(u16),
    Error(ErrorKind),
}

impl Outcome {
    pub fn status(&self) -> Option<u16> {
        match self {
            Outcome::Status(code) => Some(*code),
            Outcome::Error(_) => None,
        }
    }

    /// Transport errors and statuses outside 200..=399 count as failed requests
    pub fn is_failure(&self) -> bool {
        match self {
            Outcome::Status(code) => !(200..400).contains(code),
            Outcome::Error(_) => true,
        }
    }
}

/// One measured request. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSample {
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    pub latency: Duration,
}

impl RequestSample {
    pub fn new(outcome: Outcome, latency: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            outcome,
            latency,
        }
    }
}
