//! Retry with exponential backoff for transient failures.
//!
//! Covers network timeouts, vendor rate limits, and temporary
//! unavailability. Permission blocks, approval requests, and validation
//! errors are never retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::AgentError;

/// Error messages that indicate transient failures.
const TRANSIENT_ERROR_PATTERNS: [&str; 9] = [
    "rate limit",
    "quota exceeded",
    "temporarily unavailable",
    "service unavailable",
    "503",
    "429",
    "timeout",
    "connection reset",
    "connection refused",
];

/// Vendor classes that always count as transient.
const TRANSIENT_VENDOR_PATTERNS: [&str; 3] = [
    "resource exhausted",
    "deadline exceeded",
    "unavailable",
];

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Retries on top of the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Whether free text (e.g. a tool result body) reads like a transient
/// failure. Used by the self-correction gate.
pub fn text_looks_transient(text: &str) -> bool {
    let lower = text.to_lowercase();
    TRANSIENT_ERROR_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Whether the error should be retried.
pub fn is_transient(error: &AgentError) -> bool {
    match error {
        // Control flow and caller mistakes are never transient.
        AgentError::ToolBlocked { .. }
        | AgentError::ApprovalRequested { .. }
        | AgentError::BudgetExceeded(_)
        | AgentError::Validation(_)
        | AgentError::NotFound(_)
        | AgentError::Forbidden(_)
        | AgentError::Compile(_)
        | AgentError::RecursionLimit { .. } => false,
        _ => {
            let msg = error.to_string().to_lowercase();
            TRANSIENT_ERROR_PATTERNS.iter().any(|p| msg.contains(p))
                || TRANSIENT_VENDOR_PATTERNS.iter().any(|p| msg.contains(p))
        }
    }
}

/// Delay before retry number `attempt` (0-based): exponential backoff
/// capped at `max_delay`, with ±20% jitter, floored at 100 ms.
pub fn retry_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
    let base = cfg.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
    let capped = base.min(cfg.max_delay.as_secs_f64());
    let jitter = capped * 0.2 * (rand::thread_rng().gen::<f64>() * 2.0 - 1.0);
    Duration::from_secs_f64((capped + jitter).max(0.1))
}

/// Runs `f` up to `max_retries + 1` times, sleeping between attempts.
/// Non-transient errors propagate immediately; on exhaustion the last
/// error is returned.
pub async fn with_retry<T, F, Fut>(cfg: &RetryConfig, mut f: F) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !is_transient(&error) || attempt >= cfg.max_retries {
                    return Err(error);
                }
                let delay = retry_delay(cfg, attempt);
                tracing::warn!(
                    error = %error,
                    attempt = attempt + 1,
                    max_retries = cfg.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn transient_patterns_match_by_substring() {
        assert!(is_transient(&AgentError::Llm("429 rate limit hit".into())));
        assert!(is_transient(&AgentError::Llm(
            "upstream timeout while connecting".into()
        )));
        assert!(is_transient(&AgentError::Fatal(
            "RESOURCE EXHAUSTED: please slow down".into()
        )));
        assert!(!is_transient(&AgentError::Llm("invalid api key".into())));
    }

    #[test]
    fn control_flow_errors_are_never_transient() {
        assert!(!is_transient(&AgentError::ToolBlocked {
            tool: "send_email".into()
        }));
        assert!(!is_transient(&AgentError::ApprovalRequested {
            approval_id: "ap1".into(),
            description: "429 things".into(),
            tool_name: "email".into(),
        }));
        assert!(!is_transient(&AgentError::BudgetExceeded(
            "over 503 cents".into()
        )));
    }

    #[test]
    fn delay_is_bounded_and_floored() {
        let cfg = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        };
        for attempt in 0..8 {
            let delay = retry_delay(&cfg, attempt);
            assert!(delay >= Duration::from_millis(100));
            // cap 60s plus 20% jitter headroom
            assert!(delay <= Duration::from_secs(72));
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let cfg = RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result: Result<u32, _> = with_retry(&cfg, move || {
            let calls = calls_in.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AgentError::Llm("503 service unavailable".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_error_bypasses_retry() {
        let cfg = RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result: Result<(), _> = with_retry(&cfg, move || {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::Validation("empty prompt".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(AgentError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let cfg = RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result: Result<(), _> = with_retry(&cfg, move || {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::Llm("connection refused".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(AgentError::Llm(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
