//! Harness configuration
//!
//! Runtime configuration is loaded from environment variables; command line
//! flags override it in `main`. Test scripts describe *what* to run, this
//! describes *how* the harness runs it.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::probe::HttpClientConfig;
use crate::script::PlanDefaults;

/// Main harness configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP client configuration
    pub http: HttpClientConfig,

    /// Worker pool configuration
    pub pool: PoolConfig,

    /// Threshold configuration
    pub thresholds: ThresholdConfig,

    /// Grace periods applied when a scenario leaves them unset
    pub defaults: PlanDefaults,

    /// Number of latency histogram shards
    pub metrics_shards: usize,

    /// Status endpoint bind address (disabled when unset)
    pub status_addr: Option<SocketAddr>,
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How often each scenario reconciles its pool against the schedule
    pub tick: Duration,
}

/// Threshold evaluation configuration
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    /// Interval between evaluations while the run is in progress
    pub eval_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpClientConfig::default(),
            pool: PoolConfig::default(),
            thresholds: ThresholdConfig::default(),
            defaults: PlanDefaults::default(),
            metrics_shards: default_shards(),
            status_addr: None,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            eval_interval: Duration::from_secs(2),
        }
    }
}

fn default_shards() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // HTTP client
        if let Ok(val) = env::var("HTTP_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.http.timeout = Duration::from_secs(secs);
        }
        if let Ok(agent) = env::var("USER_AGENT")
            && !agent.is_empty()
        {
            config.http.user_agent = agent;
        }

        // Pool
        if let Ok(val) = env::var("POOL_TICK_MS")
            && let Ok(ms) = val.parse::<u64>()
            && ms > 0
        {
            config.pool.tick = Duration::from_millis(ms);
        }

        // Thresholds
        if let Ok(val) = env::var("THRESHOLD_EVAL_INTERVAL_MS")
            && let Ok(ms) = val.parse::<u64>()
            && ms > 0
        {
            config.thresholds.eval_interval = Duration::from_millis(ms);
        }

        // Grace periods
        if let Ok(val) = env::var("DEFAULT_GRACEFUL_STOP_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.defaults.graceful_stop = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("DEFAULT_GRACEFUL_RAMP_DOWN_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.defaults.graceful_ramp_down = Duration::from_secs(secs);
        }

        // Metrics
        if let Ok(val) = env::var("METRICS_SHARDS")
            && let Ok(shards) = val.parse::<usize>()
            && shards > 0
        {
            config.metrics_shards = shards;
        }
        if let Ok(val) = env::var("STATUS_ADDR")
            && let Ok(addr) = val.parse()
        {
            config.status_addr = Some(addr);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.http.timeout, Duration::from_secs(60));
        assert_eq!(config.pool.tick, Duration::from_millis(100));
        assert_eq!(config.thresholds.eval_interval, Duration::from_secs(2));
        assert_eq!(config.defaults.graceful_stop, Duration::from_secs(30));
        assert_eq!(config.defaults.graceful_ramp_down, Duration::from_secs(30));
        assert!(config.metrics_shards >= 1);
        assert!(config.status_addr.is_none());
    }

    #[test]
    fn test_config_from_env() {
        // No harness variables are set here, so defaults come back
        let config = Config::from_env();
        assert!(config.metrics_shards >= 1);
        assert!(!config.http.user_agent.is_empty());
    }
}
