//! Generic watcher for remote asynchronous jobs
//!
//! Sleeps one interval, queries, repeats, until the job reaches a terminal
//! state, the attempt budget runs out, or the caller cancels. A query error is
//! returned as-is on the first occurrence; the poller never retries.
//!
//! Submitting the job is not part of the loop: the caller submits, persists
//! the job id, then hands the poller a query closure. For extraction that is
//! [`ExtractionOrchestrator`](crate::processing::extraction::ExtractionOrchestrator),
//! which must record the id before polling so a restart can resume the job.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::ProcessingConfig;
use crate::error::Result;

/// Result of one status query
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    Pending,
    Success(T),
    Failure(String),
}

/// How polling ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Succeeded(T),
    Failed(String),
    TimedOut { attempts: u32 },
    Canceled,
}

/// Interval and attempt budget for one poll loop
#[derive(Debug, Clone, Copy)]
pub struct JobPoller {
    interval: Duration,
    max_attempts: u32,
}

impl JobPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self::new(config.poll_interval(), config.max_poll_attempts)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Drive a job to a terminal outcome
    ///
    /// `on_tick` sees every status (attempt numbers start at 1) before the
    /// poller acts on it.
    pub async fn poll<T, Q, Fut, F>(
        &self,
        mut query: Q,
        cancel: &CancellationToken,
        mut on_tick: F,
    ) -> Result<PollOutcome<T>>
    where
        Q: FnMut() -> Fut,
        Fut: Future<Output = Result<PollStatus<T>>>,
        F: FnMut(u32, &PollStatus<T>),
    {
        for attempt in 1..=self.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(PollOutcome::Canceled),
                _ = tokio::time::sleep(self.interval) => {}
            }

            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(PollOutcome::Canceled),
                status = query() => status?,
            };

            on_tick(attempt, &status);

            match status {
                PollStatus::Pending => continue,
                PollStatus::Success(value) => return Ok(PollOutcome::Succeeded(value)),
                PollStatus::Failure(reason) => return Ok(PollOutcome::Failed(reason)),
            }
        }

        Ok(PollOutcome::TimedOut {
            attempts: self.max_attempts,
        })
    }
}
