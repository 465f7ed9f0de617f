//! Probe trait definition

use async_trait::async_trait;

use super::types::RequestSample;

/// Something a virtual user can execute once per iteration.
///
/// Implementations never fail: transport errors are folded into the
/// returned sample so callers only ever see measurements.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Issue the request and measure it
    async fn execute(&self) -> RequestSample;

    /// Short human-readable description, used in logs
    fn describe(&self) -> String;
}
