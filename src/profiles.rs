//! Named retry profiles for each class of external call.
//!
//! Call sites never hardcode timing; they pick a policy out of one of these
//! tables. The bounded table is for normal foreground cycles, the unbounded
//! table keeps the same per-attempt timeouts but retries until the top-level
//! token is cancelled.

use crate::retry::RetryPolicy;
use std::time::Duration;

/// One policy per call class.
#[derive(Debug, Clone)]
pub struct RetryProfiles {
    /// Game-API requests (crimes, lookups, send logs).
    pub api_request: RetryPolicy,
    /// Spreadsheet reads, appends, and cell updates.
    pub sheet_read: RetryPolicy,
    /// The whole work cycle, retried as a unit when it fails or panics.
    pub process_loop: RetryPolicy,
}

impl RetryProfiles {
    /// Bounded profiles for the normal foreground path.
    pub fn bounded() -> Self {
        Self {
            api_request: RetryPolicy::bounded(
                3,
                Duration::from_secs(1),
                Duration::from_secs(30),
                Duration::from_secs(10),
            )
            .expect("valid api-request profile"),
            sheet_read: RetryPolicy::bounded(
                3,
                Duration::from_secs(2),
                Duration::from_secs(30),
                Duration::from_secs(15),
            )
            .expect("valid sheet-read profile"),
            process_loop: RetryPolicy::bounded(
                3,
                Duration::from_secs(5),
                Duration::from_secs(60),
                Duration::from_secs(300),
            )
            .expect("valid process-loop profile"),
        }
    }

    /// Unbounded variants with the same per-attempt timeouts, for deployments
    /// that must never drop a cycle. Termination then comes only from the
    /// top-level cancellation token.
    pub fn unbounded() -> Self {
        Self {
            api_request: RetryPolicy::unbounded(
                Duration::from_secs(1),
                Duration::from_secs(30),
                Duration::from_secs(10),
            )
            .expect("valid api-request profile"),
            sheet_read: RetryPolicy::unbounded(
                Duration::from_secs(2),
                Duration::from_secs(30),
                Duration::from_secs(15),
            )
            .expect("valid sheet-read profile"),
            process_loop: RetryPolicy::unbounded(
                Duration::from_secs(5),
                Duration::from_secs(60),
                Duration::from_secs(300),
            )
            .expect("valid process-loop profile"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_profiles_are_finite() {
        let profiles = RetryProfiles::bounded();
        assert!(!profiles.api_request.infinite());
        assert!(!profiles.sheet_read.infinite());
        assert!(!profiles.process_loop.infinite());
        assert_eq!(profiles.api_request.max_attempts(), 3);
    }

    #[test]
    fn unbounded_profiles_keep_per_attempt_timeouts() {
        let bounded = RetryProfiles::bounded();
        let unbounded = RetryProfiles::unbounded();
        assert!(unbounded.api_request.infinite());
        assert_eq!(
            bounded.api_request.per_attempt_timeout(),
            unbounded.api_request.per_attempt_timeout()
        );
        assert_eq!(
            bounded.sheet_read.per_attempt_timeout(),
            unbounded.sheet_read.per_attempt_timeout()
        );
    }
}
