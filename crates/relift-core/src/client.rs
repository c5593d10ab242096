//! Resilient generation client: rate-limited, bounded-parallelism retry
//! wrapper around a [`GenerationService`].
//!
//! One `invoke()` call is one logical request. The in-flight semaphore is
//! held around the whole retry loop, so a request that retries five times
//! still occupies a single concurrency slot. A rate unit is acquired per
//! attempt and released on every exit path — success included — mirroring
//! the accounting of the system this replaces; the periodic refill in
//! [`RateBudget`](crate::limiter::RateBudget) is what actually meters the
//! long-run request rate.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ReliftError, Result};
use crate::limiter::RateBudget;
use crate::service::GenerationService;

pub struct ResilientClient {
    service: Arc<dyn GenerationService>,
    budget: Arc<RateBudget>,
    in_flight: Arc<Semaphore>,
    config: ClientConfig,
}

impl ResilientClient {
    /// Wrap `service` with admission control and retry. Must be called from
    /// within a tokio runtime (the rate budget spawns its refill task).
    pub fn new(service: Arc<dyn GenerationService>, config: ClientConfig) -> Self {
        let budget = RateBudget::new(config.max_requests_per_period, config.refill_period);
        let in_flight = Arc::new(Semaphore::new(config.max_parallel_requests));
        Self {
            service,
            budget,
            in_flight,
            config,
        }
    }

    /// Issue one logical generation request.
    ///
    /// Transient service failures are retried up to `max_retries` times
    /// with exponential backoff and jitter; permanent failures and
    /// content-shape failures propagate immediately. Cancellation unwinds
    /// every suspension point: the semaphore, the rate budget, the call
    /// itself, and the backoff sleep.
    pub async fn invoke(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let _slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ReliftError::Cancelled("waiting for concurrency slot".into()));
            }
            permit = self.in_flight.acquire() => permit
                .map_err(|_| ReliftError::Cancelled("client shut down".into()))?,
        };

        let mut last_error = String::new();

        for attempt in 0..self.config.max_retries {
            self.budget.acquire(cancel).await?;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.budget.release();
                    return Err(ReliftError::Cancelled("generation call".into()));
                }
                outcome = self.service.generate(prompt) => outcome,
            };
            self.budget.release();

            match outcome {
                Ok(text) => {
                    debug!(attempt, "generation succeeded");
                    return Ok(text);
                }
                Err(err) if err.is_transient() => {
                    last_error = err.to_string();
                    if attempt + 1 == self.config.max_retries {
                        break;
                    }

                    let delay = self.backoff_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "transient generation failure, retrying: {last_error}"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(ReliftError::Cancelled("backoff sleep".into()));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(ReliftError::ExhaustedRetries {
            attempts: self.config.max_retries,
            last_error,
        })
    }

    /// Delay before retrying attempt `attempt` (0-indexed): the base delay
    /// doubles each attempt, plus uniform jitter up to half the base, the
    /// whole sum clamped to `max_retry_delay`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self
            .config
            .initial_retry_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.config.max_retry_delay);
        let jitter_ms = rand::rng().random_range(0..=base.as_millis() as u64 / 2);
        (base + Duration::from_millis(jitter_ms)).min(self.config.max_retry_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    /// Scripted service: pops one canned outcome per call and records
    /// timing plus concurrency.
    struct ScriptedService {
        script: Mutex<Vec<Result<String>>>,
        calls: AtomicU32,
        call_times: Mutex<Vec<tokio::time::Instant>>,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
        latency: Duration,
    }

    impl ScriptedService {
        fn build(script: Vec<Result<String>>, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
                call_times: Mutex::new(Vec::new()),
                in_flight: AtomicU32::new(0),
                max_in_flight: AtomicU32::new(0),
                latency,
            })
        }

        fn new(script: Vec<Result<String>>) -> Arc<Self> {
            Self::build(script, Duration::ZERO)
        }

        fn slow(script: Vec<Result<String>>, latency: Duration) -> Arc<Self> {
            Self::build(script, latency)
        }
    }

    #[async_trait]
    impl GenerationService for ScriptedService {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_times.lock().unwrap().push(tokio::time::Instant::now());
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok("default".into())
            } else {
                script.remove(0)
            }
        }
    }

    fn fast_config() -> ClientConfig {
        ClientConfig {
            max_requests_per_period: 1000,
            refill_period: Duration::from_secs(60),
            max_retries: 5,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
            max_parallel_requests: 8,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let service = ScriptedService::new(vec![Ok("dockerfile".into())]);
        let client = ResilientClient::new(service.clone(), fast_config());
        let text = client
            .invoke("p", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "dockerfile");
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_with_bounded_backoff() {
        let service = ScriptedService::new(vec![
            Err(ReliftError::TransientService("429".into())),
            Err(ReliftError::TransientService("503".into())),
            Ok("ok".into()),
        ]);
        let client = ResilientClient::new(service.clone(), fast_config());
        let text = client
            .invoke("p", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "ok");
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);

        // Delay for attempt i lies in [100ms * 2^i, 100ms * 2^i * 1.5].
        let times = service.call_times.lock().unwrap().clone();
        let gap0 = times[1] - times[0];
        let gap1 = times[2] - times[1];
        assert!(gap0 >= Duration::from_millis(100) && gap0 <= Duration::from_millis(150));
        assert!(gap1 >= Duration::from_millis(200) && gap1 <= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_clamped_to_max_delay() {
        let mut config = fast_config();
        config.max_retry_delay = Duration::from_millis(250);
        let service = ScriptedService::new(vec![
            Err(ReliftError::TransientService("503".into())),
            Err(ReliftError::TransientService("503".into())),
            Err(ReliftError::TransientService("503".into())),
            Ok("ok".into()),
        ]);
        let client = ResilientClient::new(service.clone(), config);
        client
            .invoke("p", &CancellationToken::new())
            .await
            .unwrap();

        let times = service.call_times.lock().unwrap().clone();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] <= Duration::from_millis(250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_do_not_retry() {
        let service =
            ScriptedService::new(vec![Err(ReliftError::PermanentService("401".into()))]);
        let client = ResilientClient::new(service.clone(), fast_config());
        let err = client
            .invoke("p", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReliftError::PermanentService(_)));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_retries_reports_attempt_budget() {
        let mut config = fast_config();
        config.max_retries = 3;
        let service = ScriptedService::new(vec![
            Err(ReliftError::TransientService("overload".into())),
            Err(ReliftError::TransientService("overload".into())),
            Err(ReliftError::TransientService("overload".into())),
        ]);
        let client = ResilientClient::new(service.clone(), config);
        let err = client
            .invoke("p", &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ReliftError::ExhaustedRetries {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("overload"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_calls_never_exceed_parallel_ceiling() {
        let mut config = fast_config();
        config.max_parallel_requests = 2;
        let service = ScriptedService::slow(Vec::new(), Duration::from_millis(50));
        let client = Arc::new(ResilientClient::new(service.clone(), config));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                client.invoke("p", &CancellationToken::new()).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(service.calls.load(Ordering::SeqCst), 6);
        assert!(service.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let service = ScriptedService::new(vec![
            Err(ReliftError::TransientService("503".into())),
            Ok("never reached".into()),
        ]);
        let client = Arc::new(ResilientClient::new(service.clone(), fast_config()));
        let cancel = CancellationToken::new();

        let task = {
            let client = client.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { client.invoke("p", &cancel).await })
        };
        // Let the first attempt fail and the backoff sleep begin.
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ReliftError::Cancelled(_)));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }
}
