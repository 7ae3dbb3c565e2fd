use std::{fmt::Display, future::Future, time::Duration};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Attempts and fixed delay for retried requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(1000);

    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_BACKOFF)
    }
}

/// Anything carrying an HTTP status the retry loop can inspect
pub trait StatusResponse {
    fn status(&self) -> StatusCode;
}

impl StatusResponse for reqwest::Response {
    fn status(&self) -> StatusCode {
        reqwest::Response::status(self)
    }
}

/// Run a request with bounded retries on network failures and 5xx responses.
///
/// `make_request` is invoked once per attempt so every attempt sends a fresh
/// request. 4xx and other non-5xx responses are returned immediately. When
/// attempts run out the last error is returned, or the last 5xx response if
/// the final attempt got one.
pub async fn retrying_request<F, Fut, R, E>(
    mut make_request: F,
    policy: RetryPolicy,
) -> Result<R, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    R: StatusResponse,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match make_request().await {
            Ok(response) if response.status().is_server_error() => {
                if attempt >= max_attempts {
                    tracing::warn!(
                        status = %response.status(),
                        attempts = attempt,
                        "Giving up after server errors"
                    );
                    return Ok(response);
                }
                tracing::debug!(
                    status = %response.status(),
                    attempt,
                    "Server error, retrying"
                );
            }
            Ok(response) => return Ok(response),
            Err(e) => {
                if attempt >= max_attempts {
                    tracing::warn!(attempts = attempt, "Giving up after request failures: {}", e);
                    return Err(e);
                }
                tracing::debug!(attempt, "Request failed, retrying: {}", e);
            }
        }

        attempt += 1;
        tokio::time::sleep(policy.backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use tokio::time::Instant;

    use super::*;

    #[derive(Debug)]
    struct Reply(StatusCode, &'static str);

    impl StatusResponse for Reply {
        fn status(&self) -> StatusCode {
            self.0
        }
    }

    fn counted<T>(
        calls: &Arc<AtomicU32>,
        f: impl Fn(u32) -> T,
    ) -> impl FnMut() -> std::future::Ready<T> {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(f(n))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn always_500_is_attempted_max_times_with_fixed_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: Result<Reply, String> = retrying_request(
            counted(&calls, |_| Ok(Reply(StatusCode::INTERNAL_SERVER_ERROR, "boom"))),
            RetryPolicy::default(),
        )
        .await;

        let reply = result.unwrap();
        assert_eq!(reply.0, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(4000), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(4100), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_raise_the_last_error_after_exhaustion() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: Result<Reply, String> = retrying_request(
            counted(&calls, |n| Err(format!("connection reset #{n}"))),
            RetryPolicy::new(3, Duration::from_millis(250)),
        )
        .await;

        assert_eq!(result.unwrap_err(), "connection reset #3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn bad_request_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: Result<Reply, String> = retrying_request(
            counted(&calls, |_| Ok(Reply(StatusCode::BAD_REQUEST, "invalid password"))),
            RetryPolicy::default(),
        )
        .await;

        let reply = result.unwrap();
        assert_eq!(reply.0, StatusCode::BAD_REQUEST);
        assert_eq!(reply.1, "invalid password");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<Reply, String> = retrying_request(
            counted(&calls, |n| match n {
                1 => Err("timeout".to_string()),
                2 => Ok(Reply(StatusCode::SERVICE_UNAVAILABLE, "")),
                _ => Ok(Reply(StatusCode::OK, "{}")),
            }),
            RetryPolicy::default(),
        )
        .await;

        assert_eq!(result.unwrap().0, StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_attempts_still_sends_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<Reply, String> = tokio_test::block_on(retrying_request(
            counted(&calls, |_| Ok(Reply(StatusCode::OK, ""))),
            RetryPolicy::new(0, Duration::ZERO),
        ));
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
