//! Bounded polling for platforms that process uploads asynchronously
//!
//! The loop is a fixed number of (sleep, check) pairs. Sleeping goes through
//! [`Sleeper`] so tests run without real delays, and every sleep races the
//! caller's [`CancellationToken`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{gauge, histogram};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::PublishError;
use crate::config::PollBudgetConfig;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time sleeper backed by `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Terminal(T),
    /// Budget exhausted after exactly `attempts` checks
    TimedOut { attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Polls `check` until it yields a terminal value, the budget runs out or
/// `cancel` fires. `check` receives the 1-based attempt number and returns
/// `Ok(None)` while the platform is still processing.
pub async fn poll_until_terminal<T, F, Fut>(
    platform: &str,
    budget: &PollBudgetConfig,
    sleeper: &dyn Sleeper,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<PollOutcome<T>, PublishError>
where
    F: FnMut(u32) -> Fut + Send,
    Fut: Future<Output = Result<Option<T>, PublishError>> + Send,
{
    let label = platform.to_string();
    gauge!("publish_polls_in_flight", "platform" => label.clone()).increment(1.0);
    let _in_flight = scopeguard::guard(label.clone(), |label| {
        gauge!("publish_polls_in_flight", "platform" => label).decrement(1.0);
    });

    for attempt in 1..=budget.max_attempts {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(platform, attempt, "Polling cancelled");
                return Ok(PollOutcome::Cancelled { attempts: attempt - 1 });
            }
            _ = sleeper.sleep(budget.interval()) => {}
        }

        if let Some(value) = check(attempt).await? {
            histogram!("publish_poll_attempts", "platform" => label.clone()).record(attempt as f64);
            debug!(platform, attempt, "Platform processing reached a terminal state");
            return Ok(PollOutcome::Terminal(value));
        }

        debug!(platform, attempt, max_attempts = budget.max_attempts, "Platform still processing");
    }

    histogram!("publish_poll_attempts", "platform" => label).record(budget.max_attempts as f64);
    Ok(PollOutcome::TimedOut {
        attempts: budget.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSleeper(AtomicU32);

    #[async_trait]
    impl Sleeper for CountingSleeper {
        async fn sleep(&self, _duration: Duration) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn budget(max_attempts: u32) -> PollBudgetConfig {
        PollBudgetConfig {
            max_attempts,
            interval_ms: 5000,
        }
    }

    #[tokio::test]
    async fn test_never_terminal_times_out_after_exact_budget() {
        let sleeper = CountingSleeper(AtomicU32::new(0));
        let checks = Arc::new(AtomicU32::new(0));
        let counter = checks.clone();

        let outcome: PollOutcome<()> = poll_until_terminal(
            "instagram",
            &budget(60),
            &sleeper,
            &CancellationToken::new(),
            move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 60 });
        assert_eq!(checks.load(Ordering::SeqCst), 60);
        assert_eq!(sleeper.0.load(Ordering::SeqCst), 60);
    }

    #[tokio::test]
    async fn test_returns_on_terminal_attempt() {
        let sleeper = CountingSleeper(AtomicU32::new(0));
        let outcome = poll_until_terminal(
            "tiktok",
            &budget(12),
            &sleeper,
            &CancellationToken::new(),
            |attempt| async move { Ok((attempt == 3).then_some(attempt)) },
        )
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::Terminal(3));
        assert_eq!(sleeper.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_checking() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome: PollOutcome<()> = poll_until_terminal(
            "blotato",
            &budget(24),
            &TokioSleeper,
            &cancel,
            |_| async {
                let checked: Result<Option<()>, PublishError> = Err(PublishError::Cancelled);
                checked
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::Cancelled { attempts: 0 });
    }

    #[tokio::test]
    async fn test_check_errors_propagate() {
        let sleeper = CountingSleeper(AtomicU32::new(0));
        let result: Result<PollOutcome<()>, _> = poll_until_terminal(
            "tiktok",
            &budget(5),
            &sleeper,
            &CancellationToken::new(),
            |_| async {
                Err(PublishError::UpstreamUnavailable {
                    platform: "tiktok".to_string(),
                    details: "503".to_string(),
                })
            },
        )
        .await;

        assert!(matches!(result, Err(PublishError::UpstreamUnavailable { .. })));
        assert_eq!(sleeper.0.load(Ordering::SeqCst), 1);
    }
}
