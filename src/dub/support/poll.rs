use std::future::Future;
use std::time::Duration;

use crate::dub::error::{DubError, DubResult};

/// Outcome of one status check of a long-running job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    Pending,
    Done(T),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }
}

/// Calls `check` until it reports [`PollStatus::Done`], sleeping `interval`
/// between checks. Errors from `check` end polling immediately.
pub async fn poll_until<T, F, Fut>(job: &str, policy: PollPolicy, mut check: F) -> DubResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = DubResult<PollStatus<T>>>,
{
    for attempt in 1..=policy.max_attempts {
        if let PollStatus::Done(value) = check(attempt).await? {
            return Ok(value);
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Err(DubError::PollTimeout {
        job: job.to_string(),
        attempts: policy.max_attempts,
    })
}
