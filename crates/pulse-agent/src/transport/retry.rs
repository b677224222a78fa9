//! Bounded retry with a fixed backoff schedule.
//!
//! [`Backoff`] is the state machine: it counts attempts and decides, from
//! the failure, whether to wait and try again. [`RetryPolicy::execute`]
//! drives it with an injected [`Sleeper`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{TransportError, TransportResult};

/// Waits applied before the second, third and fourth attempt.
pub const DEFAULT_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// How the retry loop waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Real wall-clock waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Decision after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Wait `delay`, then make attempt number `attempt`.
    Retry { delay: Duration, attempt: usize },
    /// The failure is not transient.
    Fail,
    /// Transient, but the schedule is used up after `attempts` tries.
    Exhausted { attempts: usize },
}

/// Attempt counter over a schedule.
#[derive(Debug, Clone)]
pub struct Backoff<'a> {
    schedule: &'a [Duration],
    attempt: usize,
}

impl<'a> Backoff<'a> {
    pub fn new(schedule: &'a [Duration]) -> Self {
        Self {
            schedule,
            attempt: 1,
        }
    }

    /// Number of the attempt in flight, starting at 1.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn on_failure(&mut self, transient: bool) -> Step {
        if !transient {
            return Step::Fail;
        }
        match self.schedule.get(self.attempt - 1) {
            Some(&delay) => {
                self.attempt += 1;
                Step::Retry {
                    delay,
                    attempt: self.attempt,
                }
            }
            None => Step::Exhausted {
                attempts: self.attempt,
            },
        }
    }
}

/// Backoff schedule plus the sleeper used to wait it out.
#[derive(Clone)]
pub struct RetryPolicy {
    schedule: Vec<Duration>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEDULE.to_vec(), Arc::new(TokioSleeper))
    }
}

impl RetryPolicy {
    pub fn new(schedule: Vec<Duration>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { schedule, sleeper }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(Vec::new(), Arc::new(TokioSleeper))
    }

    pub fn schedule(&self) -> &[Duration] {
        &self.schedule
    }

    /// Run `op` until it succeeds, fails permanently, or the schedule ends.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> TransportResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let mut backoff = Backoff::new(&self.schedule);
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            match backoff.on_failure(err.is_transient()) {
                Step::Retry { delay, attempt } => {
                    warn!(
                        delay_ms = delay.as_millis() as u64,
                        attempt,
                        error = %err,
                        "transient send failure, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Step::Fail => return Err(err),
                Step::Exhausted { attempts } => {
                    return Err(TransportError::Exhausted {
                        attempts,
                        last: Box::new(err),
                    });
                }
            }
        }
    }
}
