//! Fixed-interval polling with an optional deadline and cancellation.
//!
//! Stream creation and deletion are asynchronous on the service side: the
//! request returns immediately and the stream reports `CREATING` or
//! `DELETING` for a while. [`poll_until`] re-runs a check until it yields a
//! value, the way the lifecycle controller waits for a usable or a vanished
//! stream.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How often to poll and for how long.
///
/// The default polls once per second and never gives up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Delay between two checks.
    #[serde(rename = "interval_ms", with = "crate::config::millis")]
    pub interval: Duration,
    /// Total time after which polling fails with [`PollError::Timeout`].
    #[serde(rename = "deadline_ms", with = "crate::config::optional_millis")]
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            deadline: None,
        }
    }
}

impl PollPolicy {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Same interval, bounded by `deadline`.
    pub fn with_deadline(self, deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..self
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    /// The check itself failed; polling stopped at the first failure.
    #[error(transparent)]
    Check(E),
    #[error("Timed out waiting for {what} after {attempts} attempts ({elapsed:?})")]
    Timeout {
        what: String,
        attempts: u32,
        elapsed: Duration,
    },
    #[error("Wait for {what} cancelled")]
    Cancelled { what: String },
}

/// Poll `check` until it returns `Ok(Some(_))`.
///
/// * `Ok(None)` - not there yet, sleep `policy.interval` and try again.
/// * `Err(e)` - abort immediately with [`PollError::Check`].
///
/// The first check runs without delay. When `cancel` fires, the current
/// sleep is interrupted and [`PollError::Cancelled`] is returned.
///
/// # Example
/// ```ignore
/// let desc = poll_until(&PollPolicy::default(), None, "stream", || async {
///     let desc = backend.describe_stream(name).await?;
///     Ok(desc.status.eq(&StreamStatus::Active).then_some(desc))
/// })
/// .await?;
/// ```
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    cancel: Option<&CancellationToken>,
    what: &str,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(PollError::Cancelled {
                what: what.to_string(),
            });
        }

        match check().await {
            Ok(Some(value)) => {
                debug!(what, attempts, "Poll condition met");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(what, attempts, error = %e, "Poll check failed");
                return Err(PollError::Check(e));
            }
        }

        let mut delay = policy.interval;
        if let Some(deadline) = policy.deadline {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                warn!(what, attempts, ?elapsed, "Poll deadline exceeded");
                return Err(PollError::Timeout {
                    what: what.to_string(),
                    attempts,
                    elapsed,
                });
            }
            // Never sleep past the deadline; the last check happens right at it.
            delay = delay.min(deadline - elapsed);
        }

        debug!(what, attempt = attempts, delay_ms = delay.as_millis() as u64, "Not ready, polling again");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                return Err(PollError::Cancelled { what: what.to_string() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn returns_once_the_check_yields() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = PollPolicy::every(Duration::from_secs(1));

        let value: Result<u32, PollError<String>> = poll_until(&policy, None, "thing", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok((n == 3).then_some(n))
            }
        })
        .await;

        assert_eq!(value.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn check_errors_abort_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), PollError<String>> =
            poll_until(&PollPolicy::default(), None, "thing", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("boom".to_string())
                }
            })
            .await;

        assert!(matches!(result, Err(PollError::Check(ref e)) if e == "boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_turns_into_timeout() {
        let policy = PollPolicy::every(Duration::from_secs(1)).with_deadline(Duration::from_secs(3));

        let result: Result<(), PollError<String>> =
            poll_until(&policy, None, "never", || async { Ok(None) }).await;

        match result {
            Err(PollError::Timeout { what, attempts, .. }) => {
                assert_eq!(what, "never");
                // t = 0, 1, 2, 3
                assert_eq!(attempts, 4);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let result: Result<(), PollError<String>> =
            poll_until(&PollPolicy::default(), Some(&token), "stream", || async {
                Ok(None)
            })
            .await;

        assert!(matches!(result, Err(PollError::Cancelled { .. })));
    }
}
