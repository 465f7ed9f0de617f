//! Named pass/fail predicates applied to every sample

use super::types::RequestSample;

/// A check comparing the response status against an expected value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub expected_status: u16,
}

impl Check {
    pub fn status_equals(expected_status: u16) -> Self {
        Self {
            name: format!("status equals {}", expected_status),
            expected_status,
        }
    }

    pub fn named(name: impl Into<String>, expected_status: u16) -> Self {
        Self {
            name: name.into(),
            expected_status,
        }
    }

    /// Errored samples fail every check
    pub fn passes(&self, sample: &RequestSample) -> bool {
        sample.outcome.status() == Some(self.expected_status)
    }
}
