//! Retry policy: decorrelated exponential backoff with an attempt ceiling.
//!
//! The delay before retry `n` is drawn uniformly from `[0, 2^n * base]`,
//! capped at `max`. Sleeps are taken on a shutdown channel so a closing
//! runtime never waits out a long backoff.

use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use rand::Rng;

use super::ClientError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(10),
            max: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Upper bound of the jitter window for `attempt`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(30);
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }

    /// Jittered delay for `attempt`, or `None` once the ceiling is reached.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(jitter(self.ceiling(attempt)))
    }
}

pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.policy.delay_for(self.attempt)?;
        self.attempt += 1;
        Some(delay)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn jitter(ceiling: Duration) -> Duration {
    let micros = u64::try_from(ceiling.as_micros()).unwrap_or(u64::MAX);
    if micros == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(rand::rng().random_range(0..=micros))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    Interrupted,
}

/// Sleep unless `done` fires (or is dropped) first.
pub fn interruptible_sleep(delay: Duration, done: &Receiver<()>) -> SleepOutcome {
    match done.recv_timeout(delay) {
        Err(RecvTimeoutError::Timeout) => SleepOutcome::Elapsed,
        Ok(()) | Err(RecvTimeoutError::Disconnected) => SleepOutcome::Interrupted,
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub fn retry<T>(
    policy: BackoffPolicy,
    done: &Receiver<()>,
    what: &'static str,
    mut op: impl FnMut() -> Result<T, ClientError>,
) -> Result<T, ClientError> {
    let mut backoff = Backoff::new(policy);
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.transience().is_retryable() => {
                let Some(delay) = backoff.next_delay() else {
                    tracing::warn!(what, attempts = backoff.attempt(), "giving up: {err}");
                    return Err(err);
                };
                tracing::debug!(what, attempt = backoff.attempt(), ?delay, "retrying: {err}");
                if interruptible_sleep(delay, done) == SleepOutcome::Interrupted {
                    return Err(ClientError::Shutdown);
                }
            }
            Err(err) => return Err(err),
        }
    }
}
