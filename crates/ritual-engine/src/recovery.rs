//! Error classification and retry.
//!
//! Tool failures fall into three classes: retryable (transient I/O),
//! non-critical (the run can continue without this step's output), and
//! critical (the run must stop). [`ErrorRecovery`] drives the retry loop
//! for a single step under a [`RetryPolicy`].

use std::time::Duration;

use tracing::{debug, warn};

use crate::executor::ToolError;

/// How a tool failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; try the step again.
    Retryable,
    /// Permanent for this step, but the run may continue.
    NonCritical,
    /// Permanent; the run must stop.
    Critical,
}

/// Classify a tool failure.
pub fn classify(error: &ToolError) -> ErrorClass {
    match error {
        ToolError::Connection(_) | ToolError::Timeout(_) => ErrorClass::Retryable,
        ToolError::NotFound(_) => ErrorClass::NonCritical,
        ToolError::ExecutionFailed(_) | ToolError::UnknownTool(_) => ErrorClass::Critical,
    }
}

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Constant,
    /// Delay doubles after each failed attempt.
    Exponential,
}

/// Retry budget for one step.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt after `attempt` (1-based) failed.
    /// Saturates instead of overflowing for large attempt counts.
    fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Constant => self.base_delay,
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1))),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Runs a fallible step operation under a retry policy, remembering the
/// last failure for reporting.
#[derive(Debug)]
pub struct ErrorRecovery {
    policy: RetryPolicy,
    last_error: Option<ToolError>,
}

impl ErrorRecovery {
    /// Create a recovery driver with the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            last_error: None,
        }
    }

    /// The most recent failure, if any attempt failed.
    pub fn last_error(&self) -> Option<&ToolError> {
        self.last_error.as_ref()
    }

    /// Run `operation` until it succeeds or the budget is spent.
    ///
    /// Retryable failures consume an attempt and sleep per the policy;
    /// non-critical and critical failures stop immediately. Returns the
    /// success value, or `None` with the failure held in
    /// [`last_error`](Self::last_error).
    pub async fn with_retry<F, Fut, T>(&mut self, mut operation: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ToolError>>,
    {
        self.last_error = None;

        for attempt in 1..=self.policy.max_attempts {
            match operation().await {
                Ok(value) => return Some(value),
                Err(error) => {
                    let class = classify(&error);
                    warn!(attempt, %error, ?class, "step attempt failed");
                    self.last_error = Some(error);

                    if class != ErrorClass::Retryable {
                        return None;
                    }
                    if attempt < self.policy.max_attempts {
                        let delay = self.policy.delay_after(attempt);
                        debug!(delay_ms = delay.as_millis() as u64, "backing off");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Backoff::Constant,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn classification_matches_error_kinds() {
        assert_eq!(
            classify(&ToolError::Connection("refused".into())),
            ErrorClass::Retryable
        );
        assert_eq!(
            classify(&ToolError::Timeout("slow".into())),
            ErrorClass::Retryable
        );
        assert_eq!(
            classify(&ToolError::NotFound("gone".into())),
            ErrorClass::NonCritical
        );
        assert_eq!(
            classify(&ToolError::ExecutionFailed("boom".into())),
            ErrorClass::Critical
        );
    }

    #[test]
    fn exponential_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: Backoff::Exponential,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn huge_attempt_counts_saturate_instead_of_panicking() {
        let policy = RetryPolicy {
            max_attempts: u32::MAX,
            backoff: Backoff::Exponential,
            base_delay: Duration::from_secs(1),
        };
        let capped = policy.delay_after(u32::MAX);
        assert!(capped >= policy.delay_after(40));
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_within_budget() {
        let calls = AtomicU32::new(0);
        let mut recovery = ErrorRecovery::new(fast_policy(3));

        let result = recovery
            .with_retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(ToolError::Timeout("slow".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_reports_last_error() {
        let calls = AtomicU32::new(0);
        let mut recovery = ErrorRecovery::new(fast_policy(2));

        let result: Option<()> = recovery
            .with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ToolError::Connection("refused".into())) }
            })
            .await;

        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            recovery.last_error(),
            Some(ToolError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn critical_failure_stops_without_retrying() {
        let calls = AtomicU32::new(0);
        let mut recovery = ErrorRecovery::new(fast_policy(5));

        let result: Option<()> = recovery
            .with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ToolError::ExecutionFailed("boom".into())) }
            })
            .await;

        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_critical_failure_stops_without_retrying() {
        let calls = AtomicU32::new(0);
        let mut recovery = ErrorRecovery::new(fast_policy(5));

        let result: Option<()> = recovery
            .with_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ToolError::NotFound("gone".into())) }
            })
            .await;

        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
