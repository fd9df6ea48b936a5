//! Bounded retry around remote calls.
//!
//! Every remote call in the pipeline goes through [`retry`] with its own
//! [`RetryPolicy`]. Transient failures are retried after the policy delay;
//! once the attempt budget is spent the caller gets `Ok(None)` instead of an
//! error. Non-transient failures are returned immediately.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Classifies an error as worth retrying or not.
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// How the delay evolves between attempts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Constant,
    Exponential { multiplier: u32, max_delay_secs: u64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay_secs: u64,
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn fixed(delay_secs: u64, max_attempts: u32) -> Self {
        Self {
            delay_secs,
            max_attempts,
            backoff: Backoff::Constant,
        }
    }

    /// Delay to wait after the given failed attempt (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let secs = match self.backoff {
            Backoff::Constant => self.delay_secs,
            Backoff::Exponential {
                multiplier,
                max_delay_secs,
            } => {
                let factor = u64::from(multiplier).saturating_pow(attempt);
                self.delay_secs.saturating_mul(factor).min(max_delay_secs)
            }
        };
        Duration::from_secs(secs)
    }
}

/// Run `operation` under `policy`.
///
/// Returns `Ok(Some(value))` on success, `Ok(None)` when every attempt failed
/// transiently, and `Err(e)` for the first non-transient failure.
pub async fn retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsTransient + Display,
{
    let attempts = policy.max_attempts;
    for attempt in 0..attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(label, attempts = attempt + 1, "request succeeded after retry");
                }
                return Ok(Some(value));
            }
            Err(err) if err.is_transient() => {
                warn!(
                    label,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    reason = %err,
                    "request failed"
                );
                if attempt + 1 < attempts {
                    let delay = policy.delay_after(attempt);
                    info!(label, delay_secs = delay.as_secs(), "waiting before retrying");
                    tokio::time::sleep(delay).await;
                } else {
                    error!(label, attempts, "all retries failed");
                }
            }
            Err(err) => {
                error!(label, error = %err, "request failed with non-retryable error");
                return Err(err);
            }
        }
    }
    Ok(None)
}
