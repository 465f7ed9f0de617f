//! HTTP probe backed by reqwest

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use std::error::Error as _;
use std::time::{Duration, Instant};
use tracing::trace;

use super::executor::Probe;
use super::types::{ErrorKind, Outcome, RequestSample};

/// Settings shared by every HTTP client the harness builds
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: concat!("loadprobe/", env!("CARGO_PKG_VERSION")).to_string(),
            max_idle_per_host: 256,
        }
    }
}

/// Build the client shared by all workers of a run
pub fn build_client(config: &HttpClientConfig) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(config.timeout)
        .user_agent(config.user_agent.as_str())
        .pool_max_idle_per_host(config.max_idle_per_host)
        .build()
}

/// Issues a single fixed request against a literal URL
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    method: Method,
    url: Url,
}

impl HttpProbe {
    pub fn new(client: Client, method: Method, url: Url) -> Self {
        Self {
            client,
            method,
            url,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn execute(&self) -> RequestSample {
        let start = Instant::now();
        let result = self
            .client
            .request(self.method.clone(), self.url.clone())
            .send()
            .await;

        let outcome = match result {
            Ok(resp) => {
                let status = resp.status().as_u16();
                // Body content is not inspected, but reading it lets the
                // connection go back to the pool.
                match resp.bytes().await {
                    Ok(_) => Outcome::Status(status),
                    Err(e) => Outcome::Error(classify_error(&e)),
                }
            }
            Err(e) => {
                trace!("request to {} failed: {}", self.url, e);
                Outcome::Error(classify_error(&e))
            }
        };

        RequestSample::new(outcome, start.elapsed())
    }

    fn describe(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

/// Message hyper-util's connector attaches to resolver failures
const DNS_ERROR_MESSAGE: &str = "dns error";

/// Map a reqwest error onto the sample error kinds
pub fn classify_error(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        return ErrorKind::Timeout;
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => return ErrorKind::ConnectionRefused,
                std::io::ErrorKind::TimedOut => return ErrorKind::Timeout,
                _ => {}
            }
        }
        if cause.to_string().contains(DNS_ERROR_MESSAGE) {
            return ErrorKind::Dns;
        }
        source = cause.source();
    }

    if err.is_connect() {
        ErrorKind::Connect
    } else {
        ErrorKind::Other
    }
}
