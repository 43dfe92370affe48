//! Retry with a fixed backoff schedule for external calls.

use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;

/// Delays between attempts; one attempt per entry, no sleep after the last
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySchedule {
    pub delays: Vec<Duration>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(90),
            ],
        }
    }
}

impl RetrySchedule {
    /// Same number of attempts with no waiting, for tests and dry runs
    pub fn immediate(attempts: usize) -> Self {
        Self {
            delays: vec![Duration::ZERO; attempts.max(1)],
        }
    }

    pub fn attempts(&self) -> usize {
        self.delays.len().max(1)
    }
}

/// Run `operation` until it succeeds or the schedule is exhausted.
///
/// `on_retry(attempt, &err)` is called after every failed attempt, with
/// `attempt` counted from 0.
pub async fn with_retry<T, F, Fut, R>(
    name: &str,
    schedule: &RetrySchedule,
    mut on_retry: R,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(usize, &anyhow::Error),
{
    let attempts = schedule.attempts();
    let mut last_err = None;

    for attempt in 0..attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                on_retry(attempt, &err);
                last_err = Some(err);
            }
        }

        if attempt + 1 < attempts {
            let delay = schedule.delays.get(attempt).copied().unwrap_or_default();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    match last_err {
        Some(err) => Err(anyhow!("all retries failed for {name}: {err:#}")),
        None => Err(anyhow!("all retries failed for {name}")),
    }
}
