//! Generic bounded/unbounded retry executor.
//!
//! Every external call in this crate (game API, spreadsheet, notification
//! probes) goes through [`execute`] with a [`RetryPolicy`] picked from the
//! profile tables in [`crate::profiles`].
//!
//! Semantics:
//! - `max_attempts` counts retries after the initial call, so a bounded policy
//!   makes `max_attempts + 1` tries in total before surfacing
//!   [`RetryError::Exhausted`].
//! - A policy with `infinite` set never exhausts; it only stops when the
//!   parent [`CancellationToken`] fires. Callers of unbounded policies must
//!   hold a token with an externally enforced lifetime.
//! - Each attempt runs under the policy's per-attempt timeout; a timed-out
//!   attempt is recorded as a retryable failure like any other.
//! - Every suspension point (the attempt itself and the backoff wait) races
//!   the parent token and returns [`RetryError::Cancelled`] promptly.
//!
//! Backoff doubles from `base_delay` per attempt (exponent capped at 30 to
//! guard against overflow in long-running unbounded loops), is clamped to
//! `max_delay`, then multiplied by a uniform jitter in `[0.5, 1.5)` and
//! clamped again so `max_delay` is a hard upper bound.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use supplywatch::error::ApiError;
//! use supplywatch::retry::{self, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::bounded(
//!     3,
//!     Duration::from_millis(10),
//!     Duration::from_millis(100),
//!     Duration::from_secs(1),
//! )
//! .unwrap();
//! let token = CancellationToken::new();
//! let value = retry::execute(&token, &policy, || async {
//!     Ok::<_, ApiError>(42)
//! })
//! .await
//! .unwrap();
//! assert_eq!(value, 42);
//! # });
//! ```

use crate::error::{AttemptError, Retryable, RetryError};
use crate::sleeper::{Sleeper, TokioSleeper};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempts past this exponent would overflow the doubling multiplier.
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Immutable retry tuning for one class of call.
///
/// Constructed once at startup (see [`crate::profiles`]) and shared by value;
/// never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    per_attempt_timeout: Duration,
    infinite: bool,
}

/// Errors produced while validating a retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// `base_delay` must not exceed `max_delay`.
    BaseExceedsMax { base: Duration, max: Duration },
    /// Delays must be positive.
    ZeroDelay,
    /// The per-attempt timeout must be positive.
    ZeroTimeout,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::BaseExceedsMax { base, max } => {
                write!(f, "base_delay ({:?}) must be <= max_delay ({:?})", base, max)
            }
            PolicyError::ZeroDelay => write!(f, "delays must be greater than zero"),
            PolicyError::ZeroTimeout => write!(f, "per-attempt timeout must be greater than zero"),
        }
    }
}

impl std::error::Error for PolicyError {}

impl RetryPolicy {
    /// A policy that gives up after `max_attempts` retries beyond the first
    /// try.
    pub fn bounded(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        per_attempt_timeout: Duration,
    ) -> Result<Self, PolicyError> {
        Self::validate(base_delay, max_delay, per_attempt_timeout)?;
        Ok(Self { max_attempts, base_delay, max_delay, per_attempt_timeout, infinite: false })
    }

    /// A policy that retries until the parent token is cancelled.
    pub fn unbounded(
        base_delay: Duration,
        max_delay: Duration,
        per_attempt_timeout: Duration,
    ) -> Result<Self, PolicyError> {
        Self::validate(base_delay, max_delay, per_attempt_timeout)?;
        Ok(Self { max_attempts: 0, base_delay, max_delay, per_attempt_timeout, infinite: true })
    }

    fn validate(
        base_delay: Duration,
        max_delay: Duration,
        per_attempt_timeout: Duration,
    ) -> Result<(), PolicyError> {
        if base_delay.is_zero() || max_delay.is_zero() {
            return Err(PolicyError::ZeroDelay);
        }
        if per_attempt_timeout.is_zero() {
            return Err(PolicyError::ZeroTimeout);
        }
        if base_delay > max_delay {
            return Err(PolicyError::BaseExceedsMax { base: base_delay, max: max_delay });
        }
        Ok(())
    }

    /// Retries allowed after the initial try (meaningless when `infinite`).
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Starting point of the backoff curve.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Hard upper bound on any backoff delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Deadline applied to each individual attempt.
    pub fn per_attempt_timeout(&self) -> Duration {
        self.per_attempt_timeout
    }

    /// Whether this policy retries forever.
    pub fn infinite(&self) -> bool {
        self.infinite
    }
}

/// Execute `op` under `policy`, retrying failures with backoff and jitter.
///
/// `op` is called once per attempt; each call runs under the policy's
/// per-attempt timeout and races `token`. Errors the caller classifies as
/// non-retryable are surfaced immediately as [`RetryError::Terminal`] without
/// consuming the remaining budget. See the module docs for the full contract.
pub async fn execute<T, E, Fut, Op>(
    token: &CancellationToken,
    policy: &RetryPolicy,
    op: Op,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display + Retryable,
    Fut: Future<Output = Result<T, E>>,
    Op: FnMut() -> Fut,
{
    execute_with_sleeper(token, policy, &TokioSleeper, op).await
}

pub(crate) async fn execute_with_sleeper<T, E, Fut, Op>(
    token: &CancellationToken,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: Op,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display + Retryable,
    Fut: Future<Output = Result<T, E>>,
    Op: FnMut() -> Fut,
{
    let mut attempt: u32 = 0;

    loop {
        if token.is_cancelled() {
            tracing::debug!("parent token cancelled, aborting retry");
            return Err(RetryError::Cancelled);
        }

        let outcome = tokio::select! {
            _ = token.cancelled() => return Err(RetryError::Cancelled),
            res = tokio::time::timeout(policy.per_attempt_timeout, op()) => res,
        };

        let failure = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                if !e.retryable() {
                    return Err(RetryError::Terminal(e));
                }
                AttemptError::Op(e)
            }
            Err(_) => AttemptError::Timeout { limit: policy.per_attempt_timeout },
        };

        if !policy.infinite && attempt >= policy.max_attempts {
            return Err(RetryError::Exhausted {
                attempts: policy.max_attempts + 1,
                source: failure,
            });
        }

        let delay = calculate_backoff_delay(attempt, policy.base_delay, policy.max_delay);
        tracing::debug!(
            attempt = attempt + 1,
            error = %failure,
            delay_ms = delay.as_millis() as u64,
            infinite = policy.infinite,
            "attempt failed, retrying after delay"
        );

        tokio::select! {
            _ = token.cancelled() => return Err(RetryError::Cancelled),
            _ = sleeper.sleep(delay) => {}
        }

        attempt += 1;
    }
}

/// Backoff delay for a 0-based attempt index: exponential growth from
/// `base_delay`, clamped to `max_delay`, with multiplicative jitter in
/// `[0.5, 1.5)` applied and clamped again.
pub fn calculate_backoff_delay(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    calculate_backoff_delay_with_rng(attempt, base_delay, max_delay, &mut rand::rng())
}

/// Same as [`calculate_backoff_delay`] with an injected RNG (for tests).
pub fn calculate_backoff_delay_with_rng<R: Rng>(
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    rng: &mut R,
) -> Duration {
    let safe_attempt = attempt.min(MAX_BACKOFF_EXPONENT);
    let multiplier = 1u32 << safe_attempt;
    let delay = base_delay.checked_mul(multiplier).unwrap_or(max_delay).min(max_delay);

    let jitter: f64 = rng.random_range(0.5..1.5);
    delay.mul_f64(jitter).min(max_delay)
}
