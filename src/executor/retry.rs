//! Stage retry loop, reusing `AgentRetryPolicy` (itself shaped after
//! `graphweave::graph::retry::RetryPolicy`) to drive linear/exponential
//! backoff between attempts.

use std::future::Future;
use std::pin::Pin;

use crate::error::ExecutorError;
use crate::registry::agent::AgentRetryPolicy;
use crate::state::StatePatch;

pub struct RetryOutcome {
    pub result: Result<StatePatch, ExecutorError>,
    pub attempts: u32,
}

/// Invokes `attempt` up to `policy.max_retries + 1` times, sleeping
/// `policy.delay(attempt)` between failures. Records every attempt's
/// result; the caller surfaces only the final outcome and the attempt
/// count.
pub async fn with_retry<F>(policy: &AgentRetryPolicy, mut attempt: F) -> RetryOutcome
where
    F: FnMut(u32) -> Pin<Box<dyn Future<Output = Result<StatePatch, ExecutorError>> + Send>>,
{
    let mut last_error = None;
    let mut attempts = 0;

    loop {
        attempts += 1;
        match attempt(attempts - 1).await {
            Ok(patch) => {
                return RetryOutcome {
                    result: Ok(patch),
                    attempts,
                }
            }
            Err(e) => {
                tracing::debug!(attempt = attempts, error = %e, "stage attempt failed");
                let should_retry = policy.should_retry(attempts - 1);
                if !should_retry {
                    last_error = Some(e);
                    break;
                }
                tokio::time::sleep(policy.delay(attempts - 1)).await;
                last_error = Some(e);
            }
        }
    }

    RetryOutcome {
        result: Err(last_error.unwrap_or(ExecutorError::StageFailed("unknown".into(), "no attempts made".into()))),
        attempts,
    }
}
