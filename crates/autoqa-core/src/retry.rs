//! Bounded retry with exponential backoff and jitter for provider calls.
//!
//! Idempotent reads go through [`retry`]. Non-idempotent effects (posting a
//! comment, merging) go through [`retry_effect`], which asks an
//! idempotency lookup before every repeat attempt so a lost response never
//! applies the effect twice.
//!
//! ```text
//! attempt 1 ──err(transient)──► sleep(delay_for_attempt(1) ± jitter)
//! attempt 2 ──err(transient)──► lookup: applied ─► Ok(Applied)
//!                                        │
//!                                        └ not applied ─► sleep ─► attempt 3
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::forge::ForgeError;

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Errors that know whether a retry may succeed.
pub trait Transient {
    /// Whether retrying the same request may succeed.
    fn is_transient(&self) -> bool;

    /// Wait the remote side asked for, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Transient for ForgeError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        Self::retry_after(self)
    }
}

/// Retry configuration for transient provider failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound for a single delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Growth factor between attempts.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Fraction of each delay that is randomized, in `[0, 1]`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

const fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff delay after the given failed attempt (1-based), without
    /// jitter.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.initial_delay.as_secs_f64() * factor * 1000.0;
        if !millis.is_finite() || millis >= self.max_delay.as_secs_f64() * 1000.0 {
            return self.max_delay;
        }
        Duration::from_secs_f64(millis / 1000.0).min(self.max_delay)
    }

    /// Backoff delay with up to `jitter` of it shaved off at random.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let shave = rand::thread_rng().gen_range(0.0..=jitter);
        delay.mul_f64(1.0 - shave)
    }

    /// Delay before the next attempt, or `None` when retries are exhausted
    /// or the remote side asked for a wait longer than `max_delay`.
    fn next_delay<E: Transient>(&self, attempt: u32, err: &E) -> Option<Duration> {
        if attempt >= self.max_attempts || !err.is_transient() {
            return None;
        }
        match err.retry_after() {
            Some(wait) if wait > self.max_delay => None,
            Some(wait) => Some(wait),
            None => Some(self.jittered_delay(attempt)),
        }
    }
}

/// Runs `op` until it succeeds, fails permanently, or attempts run out.
///
/// `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    E: Transient + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(delay) = policy.next_delay(attempt, &err) else {
                    return Err(err);
                };
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient provider failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
        }
    }
}

/// Outcome of a guarded non-idempotent effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectOutcome<T> {
    /// This call applied the effect.
    Performed(T),
    /// A previous attempt had already applied it.
    AlreadyApplied,
}

/// Runs a non-idempotent effect, asking `applied` before each repeat
/// attempt whether an earlier attempt already took effect.
pub async fn retry_effect<T, E, F, Fut, P, PFut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
    mut applied: P,
) -> Result<EffectOutcome<T>, E>
where
    E: Transient + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut() -> PFut,
    PFut: Future<Output = Result<bool, E>>,
{
    let mut attempt = 1;
    loop {
        if attempt > 1 && applied().await? {
            tracing::info!(operation, attempt, "effect already applied, not repeating");
            return Ok(EffectOutcome::AlreadyApplied);
        }
        match op(attempt).await {
            Ok(value) => return Ok(EffectOutcome::Performed(value)),
            Err(err) => {
                let Some(delay) = policy.next_delay(attempt, &err) else {
                    return Err(err);
                };
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "effect failed, probing before retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    fn server_error() -> ForgeError {
        ForgeError::Api {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[test]
    fn test_exponential_delay_caps() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(10));
        assert_eq!(policy.jittered_delay(2), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(4),
            jitter: 0.25,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.jittered_delay(1);
            assert!(delay <= Duration::from_secs(4));
            assert!(delay >= Duration::from_secs(3));
        }
    }

    #[test]
    fn test_policy_defaults_from_toml() {
        let policy: RetryPolicy = toml::from_str("max_attempts = 2\ninitial_delay = \"250ms\"").unwrap();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, ForgeError> = retry(&fast_policy(3), "fetch", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(server_error())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ForgeError> = retry(&fast_policy(2), "fetch", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ForgeError> = retry(&fast_policy(5), "fetch", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ForgeError::NotFound {
                    resource: "issues/1".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_long_retry_after_ends_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ForgeError> = retry(&fast_policy(5), "fetch", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ForgeError::RateLimited {
                    retry_after: Some(Duration::from_secs(3600)),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(ForgeError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_effect_is_not_repeated_once_applied() {
        let calls = AtomicU32::new(0);
        let lookups = AtomicU32::new(0);
        let outcome = retry_effect(
            &fast_policy(4),
            "post_comment",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ForgeError::Transport("reset".to_string())) }
            },
            || {
                lookups.fetch_add(1, Ordering::SeqCst);
                async { Ok(true) }
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome, EffectOutcome::AlreadyApplied);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_effect_retries_when_lookup_says_not_applied() {
        let calls = AtomicU32::new(0);
        let outcome = retry_effect(
            &fast_policy(4),
            "merge",
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 1 {
                        Err(server_error())
                    } else {
                        Ok("merged")
                    }
                }
            },
            || async { Ok(false) },
        )
        .await
        .unwrap();
        assert_eq!(outcome, EffectOutcome::Performed("merged"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
