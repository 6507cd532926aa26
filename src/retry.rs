//! Retry strategies and conditions for failed responses.
//!
//! A strategy answers two questions for a given attempt: should the request
//! be retried, and how long to wait first. The attempt counter is 0-based,
//! so a strategy allowing `N` attempts produces at most `N + 1` transport
//! calls.

use crate::response::Response;
use async_trait::async_trait;
use http::StatusCode;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a failed response is worth retrying.
///
/// `None` stands for a failure with no response at all. Closures taking
/// `Option<&Response>` implement this trait directly.
///
/// # Examples
///
/// ```
/// use typed_fetch::response::Response;
/// use typed_fetch::RetryStrategy;
/// use std::time::Duration;
///
/// let strategy = RetryStrategy::linear(3, Duration::from_millis(500))
///     .retry_if(|response: Option<&Response>| {
///         response.is_some_and(|r| r.status().as_u16() == 429)
///     });
/// ```
#[async_trait]
pub trait RetryCondition: Send + Sync {
    async fn should_retry(&self, response: Option<&Response>) -> bool;
}

#[async_trait]
impl<F> RetryCondition for F
where
    F: Fn(Option<&Response>) -> bool + Send + Sync,
{
    async fn should_retry(&self, response: Option<&Response>) -> bool {
        self(response)
    }
}

/// Retry only on 5xx responses.
#[derive(Debug, Clone, Copy)]
pub struct RetryOn5xx;

#[async_trait]
impl RetryCondition for RetryOn5xx {
    async fn should_retry(&self, response: Option<&Response>) -> bool {
        response.is_some_and(|r| r.status().is_server_error())
    }
}

/// Retry only on the listed statuses.
#[derive(Debug, Clone)]
pub struct RetryOnStatus(pub Vec<StatusCode>);

#[async_trait]
impl RetryCondition for RetryOnStatus {
    async fn should_retry(&self, response: Option<&Response>) -> bool {
        response.is_some_and(|r| self.0.contains(&r.status()))
    }
}

/// Retries if ANY of the conditions holds.
///
/// # Examples
///
/// ```
/// use http::StatusCode;
/// use std::sync::Arc;
/// use typed_fetch::retry::{AnyCondition, RetryOn5xx, RetryOnStatus};
///
/// let condition = AnyCondition::new(vec![
///     Arc::new(RetryOn5xx),
///     Arc::new(RetryOnStatus(vec![StatusCode::TOO_MANY_REQUESTS])),
/// ]);
/// ```
pub struct AnyCondition {
    conditions: Vec<Arc<dyn RetryCondition>>,
}

impl AnyCondition {
    pub fn new(conditions: Vec<Arc<dyn RetryCondition>>) -> Self {
        Self { conditions }
    }
}

#[async_trait]
impl RetryCondition for AnyCondition {
    async fn should_retry(&self, response: Option<&Response>) -> bool {
        for condition in &self.conditions {
            if condition.should_retry(response).await {
                return true;
            }
        }
        false
    }
}

/// Retries only if ALL of the conditions hold.
pub struct AllCondition {
    conditions: Vec<Arc<dyn RetryCondition>>,
}

impl AllCondition {
    pub fn new(conditions: Vec<Arc<dyn RetryCondition>>) -> Self {
        Self { conditions }
    }
}

#[async_trait]
impl RetryCondition for AllCondition {
    async fn should_retry(&self, response: Option<&Response>) -> bool {
        for condition in &self.conditions {
            if !condition.should_retry(response).await {
                return false;
            }
        }
        true
    }
}

/// Fixed delay between attempts.
#[derive(Clone)]
pub struct LinearRetry {
    pub attempts: u32,
    pub delay: Duration,
    pub should_retry: Option<Arc<dyn RetryCondition>>,
}

/// Delay doubling with every attempt, capped at `max_delay`.
#[derive(Clone)]
pub struct ExponentialRetry {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 50% random extra delay on top of the computed backoff.
    pub jitter: bool,
    pub should_retry: Option<Arc<dyn RetryCondition>>,
}

/// Defines when and how failed responses are retried.
///
/// A bare number converts to a linear strategy with a one second delay.
///
/// # Examples
///
/// ```
/// use typed_fetch::RetryStrategy;
/// use std::time::Duration;
///
/// // 1s, 1s, 1s
/// let linear = RetryStrategy::from(3);
///
/// // 100ms, 200ms, 400ms, capped at 1s
/// let exponential = RetryStrategy::exponential(
///     3,
///     Duration::from_millis(100),
///     Duration::from_secs(1),
/// );
/// assert_eq!(exponential.delay(2), Duration::from_millis(400));
/// ```
#[derive(Clone)]
pub enum RetryStrategy {
    Linear(LinearRetry),
    Exponential(ExponentialRetry),
}

impl RetryStrategy {
    pub fn linear(attempts: u32, delay: Duration) -> Self {
        RetryStrategy::Linear(LinearRetry {
            attempts,
            delay,
            should_retry: None,
        })
    }

    pub fn exponential(attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        RetryStrategy::Exponential(ExponentialRetry {
            attempts,
            base_delay,
            max_delay,
            jitter: false,
            should_retry: None,
        })
    }

    /// Enables jitter on an exponential strategy. No effect on linear ones.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        if let RetryStrategy::Exponential(exponential) = &mut self {
            exponential.jitter = jitter;
        }
        self
    }

    /// Adds a condition that must hold, on top of the attempt count, for a
    /// retry to happen.
    pub fn retry_if(mut self, condition: impl RetryCondition + 'static) -> Self {
        let condition: Arc<dyn RetryCondition> = Arc::new(condition);
        match &mut self {
            RetryStrategy::Linear(linear) => linear.should_retry = Some(condition),
            RetryStrategy::Exponential(exponential) => exponential.should_retry = Some(condition),
        }
        self
    }

    /// Maximum number of retries.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryStrategy::Linear(linear) => linear.attempts,
            RetryStrategy::Exponential(exponential) => exponential.attempts,
        }
    }

    fn condition(&self) -> Option<&Arc<dyn RetryCondition>> {
        match self {
            RetryStrategy::Linear(linear) => linear.should_retry.as_ref(),
            RetryStrategy::Exponential(exponential) => exponential.should_retry.as_ref(),
        }
    }

    /// `true` if `attempt` (0-based) is below the limit and the condition,
    /// if any, holds for `response`.
    pub async fn should_attempt_retry(&self, attempt: u32, response: Option<&Response>) -> bool {
        if attempt >= self.attempts() {
            return false;
        }
        match self.condition() {
            Some(condition) => condition.should_retry(response).await,
            None => true,
        }
    }

    /// Delay before retrying after `attempt` (0-based) failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Linear(linear) => linear.delay,
            RetryStrategy::Exponential(exponential) => {
                let multiplier = 2u32.saturating_pow(attempt);
                let delay = exponential
                    .base_delay
                    .saturating_mul(multiplier)
                    .min(exponential.max_delay);

                if exponential.jitter {
                    let extra = rand::thread_rng().gen_range(0.0..=0.5);
                    delay + delay.mul_f64(extra)
                } else {
                    delay
                }
            }
        }
    }

    /// Decides the next step for a request in `state` that just failed with
    /// `response`.
    pub async fn decide(&self, state: RetryState, response: Option<&Response>) -> RetryDecision {
        if self.should_attempt_retry(state.attempt, response).await {
            RetryDecision::Retry {
                delay: self.delay(state.attempt),
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}

impl From<u32> for RetryStrategy {
    fn from(attempts: u32) -> Self {
        RetryStrategy::linear(attempts, Duration::from_millis(1000))
    }
}

impl fmt::Debug for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryStrategy::Linear(linear) => f
                .debug_struct("Linear")
                .field("attempts", &linear.attempts)
                .field("delay", &linear.delay)
                .field("should_retry", &linear.should_retry.is_some())
                .finish(),
            RetryStrategy::Exponential(exponential) => f
                .debug_struct("Exponential")
                .field("attempts", &exponential.attempts)
                .field("base_delay", &exponential.base_delay)
                .field("max_delay", &exponential.max_delay)
                .field("jitter", &exponential.jitter)
                .field("should_retry", &exponential.should_retry.is_some())
                .finish(),
        }
    }
}

/// Where a request is in its retry sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// 0 for the initial attempt.
    pub attempt: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(self) -> Self {
        Self {
            attempt: self.attempt + 1,
        }
    }

    /// Transport calls made once this attempt has been dispatched.
    pub fn calls(self) -> u32 {
        self.attempt + 1
    }
}

/// Result of consulting a strategy after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Exhausted,
}
