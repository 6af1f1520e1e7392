//! Exponential backoff retry policy with Retry-After support.

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use rand::Rng;
use reqwest_retry::RetryDecision as MiddlewareDecision;

use super::HttpResponse;
use crate::error::Error;

/// Whether to send again, and after how long.
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

    pub fn after(delay: Duration) -> Self {
        Self {
            should_retry: true,
            delay,
        }
    }
}

/// Retry policy for transient failures.
///
/// Retries responses whose status is in `status_codes` and transport errors,
/// at most `max_retries` times after the first send. The delay before retry
/// `n` (zero based) is `base_delay * multiplier^n`, varied by up to
/// `±jitter` of itself and capped at `max_delay`. A `Retry-After` header on
/// the response replaces the computed delay.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub status_codes: HashSet<u16>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            status_codes: [423, 425, 429, 500, 502, 503, 504, 507, 510]
                .into_iter()
                .collect(),
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            max_retries: 3,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default backoff settings.
    ///
    /// # Arguments
    ///
    /// * `max_retries` - Maximum number of retries after the first attempt
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Randomize each delay by up to `jitter` of itself, clamped to `0.0..=1.0`.
    /// A non-finite value turns jitter off.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = clamp_jitter(jitter);
        self
    }

    pub fn with_status_codes(mut self, status_codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes = status_codes.into_iter().collect();
        self
    }

    /// Calculate exponential backoff delay without jitter.
    fn exponential_delay(&self, n_past_retries: u32) -> Duration {
        let delay =
            self.base_delay.as_secs_f64() * self.multiplier.powi(n_past_retries as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()).max(0.0))
    }

    /// Delay before the next retry after `n_past_retries` retries.
    pub fn backoff(&self, n_past_retries: u32) -> Duration {
        let delay = self.exponential_delay(n_past_retries).as_secs_f64();
        let jitter = clamp_jitter(self.jitter);
        let factor = if jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64((delay * factor).min(self.max_delay.as_secs_f64()).max(0.0))
    }

    /// Decide what to do with a response.
    pub fn for_response(&self, n_past_retries: u32, response: &HttpResponse) -> RetryDecision {
        if n_past_retries >= self.max_retries || !self.status_codes.contains(&response.status) {
            return RetryDecision::stop();
        }

        let delay = response
            .header("retry-after")
            .and_then(parse_retry_after)
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or_else(|| self.backoff(n_past_retries));
        RetryDecision::after(delay)
    }

    /// Decide what to do with a failed send. Only transport errors are retried.
    pub fn for_error(&self, n_past_retries: u32, error: &Error) -> RetryDecision {
        if n_past_retries >= self.max_retries || !error.is_transport() {
            return RetryDecision::stop();
        }
        RetryDecision::after(self.backoff(n_past_retries))
    }
}

impl reqwest_retry::RetryPolicy for RetryPolicy {
    fn should_retry(&self, _request_start_time: SystemTime, n_past_retries: u32) -> MiddlewareDecision {
        if n_past_retries >= self.max_retries {
            MiddlewareDecision::DoNotRetry
        } else {
            MiddlewareDecision::Retry {
                execute_after: SystemTime::now() + self.backoff(n_past_retries),
            }
        }
    }
}

/// Parse a `Retry-After` value given either as seconds or as an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = httpdate::parse_http_date(value).ok()?;
    Some(
        at.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}

fn clamp_jitter(jitter: f64) -> f64 {
    if jitter.is_finite() {
        jitter.abs().min(1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{http_error, HttpErrorKind};

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::default().with_jitter(0.0)
    }

    #[test]
    fn test_exponential_delay() {
        let policy = no_jitter();

        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = no_jitter().with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.backoff(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.backoff(1).as_secs_f64();
            assert!((1.8..=2.2).contains(&delay), "delay {}", delay);
        }
    }

    #[test]
    fn test_jitter_is_clamped() {
        assert_eq!(RetryPolicy::default().with_jitter(f64::NAN).jitter, 0.0);
        assert_eq!(RetryPolicy::default().with_jitter(f64::INFINITY).jitter, 0.0);
        assert_eq!(RetryPolicy::default().with_jitter(-0.5).jitter, 0.5);
        assert_eq!(RetryPolicy::default().with_jitter(7.0).jitter, 1.0);

        let mut policy = no_jitter();
        policy.jitter = f64::NAN;
        assert_eq!(policy.backoff(1), Duration::from_secs(2));

        policy.jitter = f64::NEG_INFINITY;
        assert_eq!(policy.backoff(0), Duration::from_secs(1));

        policy.jitter = 25.0;
        for _ in 0..50 {
            assert!(policy.backoff(1) <= Duration::from_secs(4));
        }
    }

    #[test]
    fn test_retries_configured_statuses_only() {
        let policy = no_jitter();

        assert!(policy.for_response(0, &HttpResponse::new(503, "")).should_retry);
        assert!(policy.for_response(0, &HttpResponse::new(429, "")).should_retry);
        assert!(!policy.for_response(0, &HttpResponse::new(400, "")).should_retry);
        assert!(!policy.for_response(0, &HttpResponse::new(200, "")).should_retry);
    }

    #[test]
    fn test_stops_after_max_retries() {
        let policy = no_jitter();
        let response = HttpResponse::new(500, "");

        assert!(policy.for_response(2, &response).should_retry);
        assert_eq!(policy.for_response(3, &response), RetryDecision::stop());
        assert!(!RetryPolicy::disabled().for_response(0, &response).should_retry);
    }

    #[test]
    fn test_retry_after_seconds_overrides_backoff() {
        let policy = no_jitter();
        let response = HttpResponse::new(429, "").with_header("Retry-After", "7");

        assert_eq!(
            policy.for_response(0, &response),
            RetryDecision::after(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_retry_after_http_date() {
        let at = SystemTime::now() + Duration::from_secs(30);
        let delay = parse_retry_after(&httpdate::fmt_http_date(at)).unwrap();
        assert!(delay <= Duration::from_secs(30));
        assert!(delay >= Duration::from_secs(28));

        let past = httpdate::fmt_http_date(SystemTime::now() - Duration::from_secs(30));
        assert_eq!(parse_retry_after(&past), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_transport_errors_are_retried() {
        let policy = no_jitter();

        assert!(policy
            .for_error(0, &http_error(HttpErrorKind::Network, "connection reset"))
            .should_retry);
        assert!(!policy
            .for_error(0, &http_error(HttpErrorKind::InvalidUrl, "bad url"))
            .should_retry);
        assert!(!policy
            .for_error(3, &http_error(HttpErrorKind::Network, "connection reset"))
            .should_retry);
    }

    #[test]
    fn test_middleware_policy() {
        use reqwest_retry::RetryPolicy as _;

        let policy = no_jitter();
        assert!(matches!(
            policy.should_retry(SystemTime::now(), 0),
            MiddlewareDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.should_retry(SystemTime::now(), 3),
            MiddlewareDecision::DoNotRetry
        ));
    }
}
