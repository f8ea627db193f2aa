// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Retrying fallible async operations.
//!
//! A [`RetryPolicy`] describes how many attempts an operation gets, how long to wait between
//! attempts, and how much wall-clock time may be spent overall. The delay sequence is computed up
//! front, so the number of sleeps an operation can go through is known before the first attempt.

use std::{future::Future, time::Duration};

use {
    backoff::{backoff::Backoff, ExponentialBackoff},
    log::debug,
    serde::{Deserialize, Serialize},
    thiserror::Error,
    tokio::time::Instant,
};

/// How the wait between two attempts is chosen.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delays {
    /// Exponentially growing delays, randomized by `jitter` (a fraction in `0.0..=1.0`).
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        multiplier: f64,
        jitter: f64,
    },
    /// The same delay every time.
    Constant { delay_ms: u64 },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Zero is treated as one.
    pub attempts: u32,

    /// Upper bound on the time spent across all attempts and sleeps.
    #[serde(default)]
    pub max_elapsed_ms: Option<u64>,

    pub delays: Delays,
}

impl RetryPolicy {
    /// Policy used for remote command execution. SSH connection resets and slow hosts are common
    /// right after instances boot, so this gives them a couple of minutes.
    pub fn remote_default() -> Self {
        RetryPolicy {
            attempts: 5,
            max_elapsed_ms: Some(120_000),
            delays: Delays::Exponential {
                initial_ms: 1_000,
                max_ms: 15_000,
                multiplier: 2.0,
                jitter: 0.5,
            },
        }
    }

    /// Policy used for cloud CLI invocations, which are mostly throttling-bound.
    pub fn cloud_default() -> Self {
        RetryPolicy {
            attempts: 8,
            max_elapsed_ms: Some(300_000),
            delays: Delays::Exponential {
                initial_ms: 2_000,
                max_ms: 60_000,
                multiplier: 2.0,
                jitter: 0.5,
            },
        }
    }

    /// A policy that only ever makes one attempt.
    pub fn once() -> Self {
        RetryPolicy {
            attempts: 1,
            max_elapsed_ms: None,
            delays: Delays::Constant { delay_ms: 0 },
        }
    }

    pub fn constant(attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            attempts,
            max_elapsed_ms: None,
            delays: Delays::Constant {
                delay_ms: delay.as_millis() as u64,
            },
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed_ms = Some(max_elapsed.as_millis() as u64);
        self
    }

    fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed_ms.map(Duration::from_millis)
    }

    /// The sleeps taken between consecutive attempts. There is one fewer delay than attempts.
    pub fn delay_sequence(&self) -> Vec<Duration> {
        let count = (self.attempts() - 1) as usize;
        match &self.delays {
            Delays::Constant { delay_ms } => vec![Duration::from_millis(*delay_ms); count],
            Delays::Exponential {
                initial_ms,
                max_ms,
                multiplier,
                jitter,
            } => {
                let initial_interval = Duration::from_millis(*initial_ms);
                let max_interval = Duration::from_millis(*max_ms);
                let mut backoff = ExponentialBackoff {
                    current_interval: initial_interval,
                    initial_interval,
                    randomization_factor: jitter.clamp(0.0, 1.0),
                    multiplier: *multiplier,
                    max_interval,
                    max_elapsed_time: None,
                    ..ExponentialBackoff::default()
                };
                (0..count)
                    .map(|_| backoff.next_backoff().unwrap_or(max_interval))
                    .collect()
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::remote_default()
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// The operation kept failing with transient errors until the policy ran out.
    #[error("gave up after {attempts} attempt(s) in {elapsed:?}: {source}")]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: E,
    },

    /// The operation failed with an error that is not worth retrying.
    #[error("{0}")]
    Permanent(#[source] E),
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The last error returned by the operation.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } => source,
            RetryError::Permanent(e) => e,
        }
    }

    /// How many attempts were made before giving up. Permanent errors are reported as a single
    /// attempt since nothing after them was tried.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Permanent(_) => 1,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Run `op` until it succeeds, fails with an error that `is_transient` rejects, or `policy` is
/// used up.
///
/// A transient failure on the last attempt is returned right away, and so is a transient failure
/// whose next sleep would carry the total elapsed time past the policy's limit.
pub async fn retry<T, E, Op, Fut, C>(
    policy: &RetryPolicy,
    is_transient: C,
    mut op: Op,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
{
    let attempts = policy.attempts();
    let delays = policy.delay_sequence();
    let max_elapsed = policy.max_elapsed();
    let start = Instant::now();

    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_transient(&e) => return Err(RetryError::Permanent(e)),
            Err(e) => e,
        };

        let elapsed = start.elapsed();
        let out_of_time = match max_elapsed {
            Some(max) if attempt < attempts => elapsed + delays[(attempt - 1) as usize] > max,
            _ => false,
        };
        if attempt >= attempts || out_of_time {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                elapsed,
                source: err,
            });
        }

        let delay = delays[(attempt - 1) as usize];
        debug!("attempt {attempt}/{attempts} failed: {err}; retrying in {delay:?}");
        tokio::time::sleep(delay).await;
    }
}
