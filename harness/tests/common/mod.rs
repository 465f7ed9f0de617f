//! Common Test Utilities for Integration Tests
//!
//! A small axum server standing in for the system under test.

#![allow(dead_code)]

use axum::{Router, extract::State, http::StatusCode, routing::get};
use loadprobe::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Requests served by the target, across all routes
#[derive(Clone, Default)]
pub struct TargetState {
    hits: Arc<AtomicU64>,
}

impl TargetState {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

async fn ok(State(state): State<TargetState>) -> &'static str {
    state.hits.fetch_add(1, Ordering::Relaxed);
    "benwis"
}

async fn error(State(state): State<TargetState>) -> (StatusCode, &'static str) {
    state.hits.fetch_add(1, Ordering::Relaxed);
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn slow(State(state): State<TargetState>) -> &'static str {
    state.hits.fetch_add(1, Ordering::Relaxed);
    tokio::time::sleep(Duration::from_millis(300)).await;
    "slow"
}

/// Start the target on an ephemeral port
pub async fn spawn_target() -> (SocketAddr, TargetState) {
    let state = TargetState::default();
    let app = Router::new()
        .route("/", get(ok))
        .route("/error", get(error))
        .route("/slow", get(slow))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind target server");
    let addr = listener.local_addr().expect("Failed to read target address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (addr, state)
}

/// An address nothing listens on
pub async fn closed_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind probe port");
    let addr = listener.local_addr().expect("Failed to read probe address");
    drop(listener);
    addr
}

/// Configuration with short ticks so real-time runs stay quick
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.pool.tick = Duration::from_millis(50);
    config.thresholds.eval_interval = Duration::from_millis(200);
    config.metrics_shards = 2;
    config.http.timeout = Duration::from_secs(5);
    config
}

/// Single-scenario script against `url`
pub fn script(url: &str, scenario: &str, thresholds: &str) -> String {
    format!(
        r#"{{
            "thresholds": {thresholds},
            "scenarios": {{ "main": {scenario} }},
            "functions": {{
                "default": {{
                    "method": "GET",
                    "url": "{url}",
                    "checks": [ {{ "name": "status equals 200", "status": 200 }} ],
                    "sleep": "100ms"
                }}
            }}
        }}"#
    )
}
