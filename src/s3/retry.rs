//! Retry classification and backoff for transient HTTP failures
//!
//! Classification is a pure function of the attempt outcome. Delays use
//! decorrelated jitter: each delay is drawn from a range that depends on the
//! previous one, so clients that failed together drift apart.

use http::StatusCode;
use rand::Rng;
use std::time::Duration;

/// Outcome of a single attempt, as seen by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The server answered with a non-success status
    Status(StatusCode),
    /// The connection failed before a response arrived
    TransportFailure,
}

/// Whether to retry, and after how long
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub fn stop() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
        }
    }
}

/// Status codes worth another attempt: 408, 423, 429, 500, 502, 503, 504
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 423 | 429 | 500 | 502 | 503 | 504)
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Median delay before the first retry
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Is this outcome transient?
    pub fn is_transient(outcome: AttemptOutcome) -> bool {
        match outcome {
            AttemptOutcome::Status(status) => is_retryable_status(status),
            AttemptOutcome::TransportFailure => true,
        }
    }

    /// Decide what to do after attempt number `attempt` (1-based) failed.
    ///
    /// `previous_delay` is the delay chosen before this attempt, if any.
    pub fn classify(
        &self,
        attempt: u32,
        outcome: AttemptOutcome,
        previous_delay: Option<Duration>,
    ) -> RetryDecision {
        if !Self::is_transient(outcome) || attempt > self.max_retries {
            return RetryDecision::stop();
        }
        RetryDecision {
            should_retry: true,
            delay: self.backoff(previous_delay),
        }
    }

    /// Next delay given the previous one.
    ///
    /// Uniform in `[base/2, 3 * previous)`, capped at `max_delay`. With no
    /// previous delay the range is `[base/2, 3 * base/2)`, centred on `base`.
    pub fn backoff(&self, previous: Option<Duration>) -> Duration {
        self.backoff_with_sample(previous, rand::thread_rng().gen::<f64>())
    }

    /// `sample` in `[0, 1)` picks the point in the jitter range
    fn backoff_with_sample(&self, previous: Option<Duration>, sample: f64) -> Duration {
        let floor = self.base_delay.as_secs_f64() / 2.0;
        let previous = previous.map_or(floor, |d| d.as_secs_f64().max(floor));
        let ceiling = (previous * 3.0).min(self.max_delay.as_secs_f64());
        if ceiling <= floor {
            return self.max_delay.min(Duration::from_secs_f64(floor));
        }
        Duration::from_secs_f64(floor + (ceiling - floor) * sample).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETRYABLE: [u16; 7] = [408, 423, 429, 500, 502, 503, 504];
    const TERMINAL: [u16; 31] = [
        400, 401, 402, 403, 405, 406, 407, 409, 410, 411, 412, 413, 414, 415, 416, 417, 421, 422,
        424, 426, 428, 431, 451, 501, 505, 506, 507, 508, 510, 511, 404,
    ];

    #[test]
    fn test_retryable_statuses() {
        let policy = RetryPolicy::default();
        for code in RETRYABLE {
            let status = StatusCode::from_u16(code).unwrap();
            let decision = policy.classify(1, AttemptOutcome::Status(status), None);
            assert!(decision.should_retry, "{} should be retried", code);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        let policy = RetryPolicy::default();
        for code in TERMINAL {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(
                policy.classify(1, AttemptOutcome::Status(status), None),
                RetryDecision::stop(),
                "{} should be terminal",
                code
            );
        }
    }

    #[test]
    fn test_transport_failure_is_retried() {
        let decision = RetryPolicy::default().classify(1, AttemptOutcome::TransportFailure, None);
        assert!(decision.should_retry);
    }

    #[test]
    fn test_retry_count_is_capped() {
        let policy = RetryPolicy::default();
        let outcome = AttemptOutcome::Status(StatusCode::SERVICE_UNAVAILABLE);
        assert!(policy.classify(5, outcome, None).should_retry);
        assert!(!policy.classify(6, outcome, None).should_retry);
        assert!(!RetryPolicy::none().classify(1, outcome, None).should_retry);
    }

    #[test]
    fn test_first_delay_around_250ms() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.backoff(None);
            assert!(delay >= Duration::from_millis(125), "{:?}", delay);
            assert!(delay < Duration::from_millis(375), "{:?}", delay);
        }
        assert_eq!(policy.backoff_with_sample(None, 0.5), Duration::from_millis(250));
    }

    #[test]
    fn test_delay_range_follows_previous_delay() {
        let policy = RetryPolicy::default();
        let previous = Some(Duration::from_secs(1));
        assert_eq!(policy.backoff_with_sample(previous, 0.0), Duration::from_millis(125));
        assert_eq!(policy.backoff_with_sample(previous, 0.5), Duration::from_micros(1_562_500));
        for _ in 0..100 {
            let delay = policy.backoff(previous);
            assert!(delay >= Duration::from_millis(125), "{:?}", delay);
            assert!(delay < Duration::from_secs(3), "{:?}", delay);
        }
    }

    #[test]
    fn test_delay_is_bounded() {
        let policy = RetryPolicy::default();
        let capped = policy.backoff_with_sample(Some(Duration::from_secs(60)), 0.999);
        assert!(capped > Duration::from_secs(19) && capped <= policy.max_delay, "{:?}", capped);

        // Chained draws never exceed the cap
        let mut previous = None;
        for _ in 0..50 {
            let delay = policy.backoff(previous);
            assert!(delay <= policy.max_delay);
            previous = Some(delay);
        }
    }
}
