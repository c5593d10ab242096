//! Pipeline configuration with env-var fallbacks.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the resilient generation client and its admission
/// controller.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Rate budget capacity: requests admitted per refill period.
    pub max_requests_per_period: u32,
    /// Rate budget refill period. The counter is topped back up to capacity
    /// once per period.
    pub refill_period: Duration,
    /// Maximum generation attempts per logical request.
    pub max_retries: u32,
    /// Backoff delay for the first retry; doubles each attempt.
    pub initial_retry_delay: Duration,
    /// Upper clamp on any single backoff sleep.
    pub max_retry_delay: Duration,
    /// Maximum generation calls in flight at any instant. Held around the
    /// whole retry loop, so retries of one request occupy one slot.
    pub max_parallel_requests: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_requests_per_period: 50,
            refill_period: Duration::from_secs(60),
            max_retries: 20,
            initial_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(180),
            max_parallel_requests: 5,
        }
    }
}

impl ClientConfig {
    /// Build from environment, falling back to defaults per field.
    ///
    /// Recognized variables: `RELIFT_RATE_LIMIT`, `RELIFT_RATE_PERIOD_SECS`,
    /// `RELIFT_MAX_RETRIES`, `RELIFT_INITIAL_RETRY_DELAY_MS`,
    /// `RELIFT_MAX_RETRY_DELAY_SECS`, `RELIFT_MAX_PARALLEL`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_requests_per_period: u32_from_env(
                "RELIFT_RATE_LIMIT",
                defaults.max_requests_per_period,
            ),
            refill_period: Duration::from_secs(u64_from_env(
                "RELIFT_RATE_PERIOD_SECS",
                defaults.refill_period.as_secs(),
            )),
            max_retries: u32_from_env("RELIFT_MAX_RETRIES", defaults.max_retries),
            initial_retry_delay: Duration::from_millis(u64_from_env(
                "RELIFT_INITIAL_RETRY_DELAY_MS",
                defaults.initial_retry_delay.as_millis() as u64,
            )),
            max_retry_delay: Duration::from_secs(u64_from_env(
                "RELIFT_MAX_RETRY_DELAY_SECS",
                defaults.max_retry_delay.as_secs(),
            )),
            max_parallel_requests: u64_from_env(
                "RELIFT_MAX_PARALLEL",
                defaults.max_parallel_requests as u64,
            ) as usize,
        }
    }
}

/// Configuration for one orchestrated migration run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Destination cloud identifier carried into the target translation
    /// and prompts (e.g. "aws", "gcp", "scaleway").
    pub destination: String,
    /// Maximum validate-repair iterations per infrastructure artifact.
    pub max_repair_iterations: u32,
    /// Fan-out ceiling: apps processed concurrently by the orchestrator.
    pub max_parallel_apps: usize,
    /// README content merged into the produced assets. Injected explicitly
    /// rather than compiled in, so callers control the final document.
    pub readme: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            destination: "aws".into(),
            max_repair_iterations: 10,
            max_parallel_apps: 5,
            readme: String::new(),
        }
    }
}

fn u32_from_env(var: &str, default: u32) -> u32 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn u64_from_env(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
