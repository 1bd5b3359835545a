//! Two retry models, matching the two things a step can be:
//!
//! - **Action retries**: a fixed/exponential/linear/random delay strategy
//!   with jitter and a delay cap, retried while an error occurs.
//! - **Check retries**: a fixed polling interval, re-evaluated while the
//!   assertion hasn't passed yet (distinct from a hard execution error,
//!   which fails the step immediately — see `CheckError::is_retryable`).

use crate::util::parse_duration_ms;
use rand::Rng;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    Fixed,
    Exponential,
    Linear,
    Random,
}

impl RetryStrategy {
    pub fn parse(s: &str) -> Self {
        match s {
            "fixed" => Self::Fixed,
            "linear" => Self::Linear,
            "random" => Self::Random,
            _ => Self::Exponential,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionRetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub strategy: RetryStrategy,
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for ActionRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::from_secs(1),
            strategy: RetryStrategy::Exponential,
            jitter: 0.2,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ActionRetryPolicy {
    /// Reads `retries`/`retry_delay`/`retry_strategy`/`jitter`/`max_delay`
    /// out of an action's flattened params, defaulting anything absent.
    pub fn from_params(params: &Value) -> Self {
        let defaults = Self::default();
        let max_retries = params.get("retries").and_then(Value::as_u64).unwrap_or(0) as u32;
        let delay = params
            .get("retry_delay")
            .and_then(Value::as_str)
            .and_then(parse_duration_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.delay);
        let strategy = params
            .get("retry_strategy")
            .and_then(Value::as_str)
            .map(RetryStrategy::parse)
            .unwrap_or(defaults.strategy);
        let jitter = params.get("jitter").and_then(Value::as_f64).unwrap_or(defaults.jitter);
        let max_delay = params
            .get("max_delay")
            .and_then(Value::as_str)
            .and_then(parse_duration_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_delay);

        Self {
            max_retries,
            delay,
            strategy,
            jitter,
            max_delay,
        }
    }

    /// Delay before the given retry attempt (1-indexed: the wait before the
    /// *second* try is `attempt == 1`).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let raw_ms = match self.strategy {
            RetryStrategy::Fixed => base_ms,
            RetryStrategy::Exponential => base_ms * 2f64.powi(attempt as i32),
            RetryStrategy::Linear => base_ms * (attempt as f64 + 1.0),
            RetryStrategy::Random => {
                let mut rng = rand::thread_rng();
                rng.gen_range(base_ms..=max_ms.max(base_ms))
            }
        }
        .min(max_ms);

        let jittered = apply_jitter(raw_ms, self.jitter);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

fn apply_jitter(delay_ms: f64, jitter: f64) -> f64 {
    if jitter <= 0.0 {
        return delay_ms;
    }
    let spread = delay_ms * jitter * 0.5;
    let mut rng = rand::thread_rng();
    let offset = rng.gen_range(-spread..=spread);
    (delay_ms + offset).max(0.0)
}

/// Runs `operation` under an action's retry policy, sleeping between
/// attempts per [`ActionRetryPolicy::delay_for_attempt`]. Retries only on
/// `Err`; the caller decides what counts as an error for that action.
pub async fn run_action_with_retries<T, E, F, Fut>(
    policy: &ActionRetryPolicy,
    dsl: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(dsl, attempt, "action succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= policy.max_retries {
                    return Err(e);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(dsl, attempt, error = %e, delay_ms = delay.as_millis() as u64, "action failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckRetryPolicy {
    pub max_attempts: u32,
    pub retry_interval: Duration,
}

impl Default for CheckRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_interval: Duration::from_secs(1),
        }
    }
}

impl CheckRetryPolicy {
    pub fn from_params(params: &Value) -> Self {
        let defaults = Self::default();
        let max_attempts = params
            .get("max_attempts")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(defaults.max_attempts);
        let retry_interval = params
            .get("retry_interval")
            .and_then(Value::as_str)
            .and_then(parse_duration_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_interval);
        Self {
            max_attempts: max_attempts.max(1),
            retry_interval,
        }
    }
}

/// Polls `operation` until it returns `Ok`, a non-retryable `Err`, or the
/// attempt budget runs out, sleeping `retry_interval` between attempts.
pub async fn run_check_with_retries<F, Fut>(
    policy: &CheckRetryPolicy,
    dsl: &str,
    is_retryable: impl Fn(&crate::checks::CheckError) -> bool,
    mut operation: F,
) -> Result<(), crate::checks::CheckError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), crate::checks::CheckError>>,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                if attempt >= policy.max_attempts || !is_retryable(&e) {
                    return Err(e);
                }
                warn!(dsl, attempt, error = %e, "check not satisfied yet, polling again");
                tokio::time::sleep(policy.retry_interval).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn fixed_strategy_holds_delay_constant() {
        let policy = ActionRetryPolicy {
            jitter: 0.0,
            strategy: RetryStrategy::Fixed,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            max_retries: 5,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(100));
    }

    #[test]
    fn exponential_strategy_doubles_and_caps() {
        let policy = ActionRetryPolicy {
            jitter: 0.0,
            strategy: RetryStrategy::Exponential,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            max_retries: 5,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(300));
    }

    #[test]
    fn from_params_reads_overrides_and_falls_back_to_defaults() {
        let policy = ActionRetryPolicy::from_params(&json!({
            "retries": 3,
            "retry_delay": "500ms",
            "retry_strategy": "linear",
        }));
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay, Duration::from_millis(500));
        assert_eq!(policy.strategy, RetryStrategy::Linear);
        assert_eq!(policy.jitter, 0.2);
    }

    #[tokio::test]
    async fn action_retries_succeed_eventually() {
        let policy = ActionRetryPolicy {
            jitter: 0.0,
            strategy: RetryStrategy::Fixed,
            delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_retries: 3,
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<i32, &str> = run_action_with_retries(&policy, "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("not yet")
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn check_retry_policy_enforces_a_minimum_of_one_attempt() {
        let policy = CheckRetryPolicy::from_params(&json!({"max_attempts": 0}));
        assert_eq!(policy.max_attempts, 1);
    }
}
