use std::time::Duration;

use crate::errors::HubError;

/// Everything a policy may base its decision on: how many consecutive
/// attempts have failed since the disconnect, how long ago the connection
/// dropped, and the most recent failure.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub retry_count: u32,
    pub elapsed: Duration,
    pub error: HubError,
}

/// Defines the behavior for reconnection attempts.
pub trait ReconnectionPolicy: Send + Sync {
    /// Returns the delay before the next reconnection attempt,
    /// or `None` if no more attempts should be made.
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration>;
}

/// A reconnection policy that never retries.
pub struct NoReconnectPolicy;

impl ReconnectionPolicy for NoReconnectPolicy {
    fn next_retry_delay(&self, _context: &RetryContext) -> Option<Duration> {
        None
    }
}

/// Retries after each of the listed delays, then gives up. The default
/// schedule retries immediately, then after 2, 10 and 30 seconds.
pub struct SteppedDelayPolicy {
    delays: Vec<Duration>,
}

impl SteppedDelayPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }
}

impl Default for SteppedDelayPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(0),
            Duration::from_secs(2),
            Duration::from_secs(10),
            Duration::from_secs(30),
        ])
    }
}

impl ReconnectionPolicy for SteppedDelayPolicy {
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration> {
        self.delays.get(context.retry_count as usize).copied()
    }
}

/// A reconnection policy that retries with a constant delay.
pub struct ConstantDelayPolicy {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl ConstantDelayPolicy {
    pub fn new(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self { delay, max_attempts }
    }
}

impl ReconnectionPolicy for ConstantDelayPolicy {
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if context.retry_count >= max {
                return None;
            }
        }

        Some(self.delay)
    }
}

/// A reconnection policy that retries with a linear backoff.
pub struct LinearBackoffPolicy {
    initial_delay: Duration,
    increment: Duration,
    max_delay: Option<Duration>,
    max_attempts: Option<u32>,
}

impl LinearBackoffPolicy {
    pub fn new(
        initial_delay: Duration,
        increment: Duration,
        max_delay: Option<Duration>,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            initial_delay,
            increment,
            max_delay,
            max_attempts,
        }
    }
}

impl ReconnectionPolicy for LinearBackoffPolicy {
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if context.retry_count >= max {
                return None;
            }
        }

        let delay = self.initial_delay + self.increment * context.retry_count;

        if let Some(max_delay) = self.max_delay {
            if delay > max_delay {
                return Some(max_delay);
            }
        }

        Some(delay)
    }
}

/// A reconnection policy that retries with an exponential backoff.
pub struct ExponentialBackoffPolicy {
    initial_delay: Duration,
    factor: f64,
    max_delay: Option<Duration>,
    max_attempts: Option<u32>,
}

impl ExponentialBackoffPolicy {
    pub fn new(
        initial_delay: Duration,
        factor: f64,
        max_delay: Option<Duration>,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            initial_delay,
            factor,
            max_delay,
            max_attempts,
        }
    }
}

impl ReconnectionPolicy for ExponentialBackoffPolicy {
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if context.retry_count >= max {
                return None;
            }
        }

        let delay_secs = self.initial_delay.as_secs_f64() * self.factor.powi(context.retry_count as i32);
        let delay = Duration::from_secs_f64(delay_secs);

        if let Some(max_delay) = self.max_delay {
            if delay > max_delay {
                return Some(max_delay);
            }
        }

        Some(delay)
    }
}

/// Configuration for reconnection. The default never reconnects; use
/// [`ReconnectionConfig::automatic`] for the standard backoff schedule.
#[derive(Clone)]
pub struct ReconnectionConfig {
    pub policy: std::sync::Arc<dyn ReconnectionPolicy>,
}

impl ReconnectionConfig {
    pub fn automatic() -> Self {
        Self {
            policy: std::sync::Arc::new(SteppedDelayPolicy::default()),
        }
    }
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            policy: std::sync::Arc::new(NoReconnectPolicy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(retry_count: u32) -> RetryContext {
        RetryContext {
            retry_count,
            elapsed: Duration::from_secs(1),
            error: HubError::ConnectionLost,
        }
    }

    #[test]
    fn no_reconnect_gives_up_immediately() {
        assert_eq!(NoReconnectPolicy.next_retry_delay(&context(0)), None);
    }

    #[test]
    fn stepped_policy_walks_the_schedule_then_gives_up() {
        let policy = SteppedDelayPolicy::default();

        assert_eq!(policy.next_retry_delay(&context(0)), Some(Duration::from_secs(0)));
        assert_eq!(policy.next_retry_delay(&context(1)), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_retry_delay(&context(2)), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_retry_delay(&context(3)), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_retry_delay(&context(4)), None);
    }

    #[test]
    fn constant_policy_respects_the_attempt_limit() {
        let policy = ConstantDelayPolicy::new(Duration::from_secs(5), Some(2));

        assert_eq!(policy.next_retry_delay(&context(0)), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_retry_delay(&context(1)), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_retry_delay(&context(2)), None);
    }

    #[test]
    fn linear_policy_grows_and_caps() {
        let policy = LinearBackoffPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(2),
            Some(Duration::from_secs(4)),
            None,
        );

        assert_eq!(policy.next_retry_delay(&context(0)), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_retry_delay(&context(1)), Some(Duration::from_secs(3)));
        assert_eq!(policy.next_retry_delay(&context(2)), Some(Duration::from_secs(4)));
    }

    #[test]
    fn exponential_policy_doubles_and_caps() {
        let policy = ExponentialBackoffPolicy::new(
            Duration::from_secs(1),
            2.0,
            Some(Duration::from_secs(6)),
            Some(4),
        );

        assert_eq!(policy.next_retry_delay(&context(0)), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_retry_delay(&context(1)), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_retry_delay(&context(2)), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_retry_delay(&context(3)), Some(Duration::from_secs(6)));
        assert_eq!(policy.next_retry_delay(&context(4)), None);
    }
}
