//! Error types shared across the external-call wrappers.

use std::fmt;
use std::time::Duration;

/// Retryability classification consumed by the retry executor.
///
/// Terminal errors (auth failures, malformed responses) are surfaced
/// immediately without consuming the remaining retry budget.
pub trait Retryable {
    fn retryable(&self) -> bool;
}

/// Error produced by the game-API and spreadsheet collaborators.
///
/// The retry layer only needs the coarse retryable/terminal split exposed by
/// [`Retryable::retryable`]; everything else is diagnostic detail.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Transport-level failure (connection refused, DNS, TLS, ...).
    #[error("transport error: {0}")]
    Transport(String),
    /// The HTTP client gave up waiting for a response.
    #[error("request timed out")]
    Timeout,
    /// Non-2xx response from the remote service.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
    /// A lookup came back without the requested record.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },
}

impl Retryable for ApiError {
    /// Transport failures, timeouts, rate limiting (429), and server-side 5xx
    /// are transient; authentication failures and other 4xx are terminal.
    fn retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::Timeout => true,
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::Decode(_) | ApiError::NotFound { .. } => false,
        }
    }
}

impl ApiError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// The failure recorded for one attempt inside the retry executor.
#[derive(Debug)]
pub enum AttemptError<E> {
    /// The operation itself returned an error.
    Op(E),
    /// The attempt exceeded the policy's per-attempt timeout.
    Timeout { limit: Duration },
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Op(e) => write!(f, "{}", e),
            AttemptError::Timeout { limit } => {
                write!(f, "attempt exceeded timeout of {:?}", limit)
            }
        }
    }
}

impl<E: Retryable> Retryable for AttemptError<E> {
    fn retryable(&self) -> bool {
        match self {
            AttemptError::Op(e) => e.retryable(),
            AttemptError::Timeout { .. } => true,
        }
    }
}

/// Terminal outcome of the retry executor.
///
/// `Exhausted` carries the total number of tries made (initial call plus
/// retries) and the last underlying failure. `Terminal` is a non-retryable
/// failure surfaced without consuming the remaining budget. `Cancelled` is
/// reported when the parent cancellation token fired during an attempt or a
/// backoff wait, and is distinguishable from exhaustion so callers can shut
/// down quietly.
#[derive(Debug)]
pub enum RetryError<E> {
    Exhausted { attempts: u32, source: AttemptError<E> },
    Terminal(E),
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, source } => {
                write!(f, "operation failed after {} attempts: {}", attempts, source)
            }
            RetryError::Terminal(e) => write!(f, "operation failed with terminal error: {}", e),
            RetryError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::Exhausted { source: AttemptError::Op(e), .. } => Some(e),
            RetryError::Terminal(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> RetryError<E> {
    /// Check if this error is due to cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }

    /// Check if this error is due to retry exhaustion.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    /// Check if this error was terminal (not worth retrying).
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryError::Terminal(_))
    }

    /// Total tries made before giving up, if exhausted.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::Exhausted { attempts, .. } => Some(*attempts),
            RetryError::Terminal(_) | RetryError::Cancelled => None,
        }
    }
}
