//! Retry policy shared by the transport-backed executors.
//!
//! Attempt budget, status predicate, and backoff math are resolved from
//! the per-resource `retry` configuration. Backoff grows linearly with the
//! attempt number (`base × attempt`) and is capped by `maxBackoff` when
//! that parses.

use crate::constants;
use crate::duration::{parse_duration, parse_duration_or};
use crate::error::Error;
use crate::executors::eval_opt_field;
use crate::expr::EvalScope;
use crate::workflow::RetryConfig;
use std::time::Duration;

/// Resolved retry policy: expressions evaluated, durations parsed.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempt budget, already clamped to ≥ 1.
    pub max_attempts: u32,
    /// Backoff base; defaults to 1s when absent or unparseable.
    pub backoff: Duration,
    /// Cap applied to each computed delay, when configured and parseable.
    pub max_backoff: Option<Duration>,
    /// Explicit status set that warrants retry; `None` selects the
    /// default predicate (status ≥ 500 or 429).
    pub retry_on: Option<Vec<u16>>,
}

impl RetryPolicy {
    /// Resolves a retry configuration: evaluates the expression-bearing
    /// duration fields, clamps the attempt budget, and parses durations
    /// (falling back silently on unparseable values).
    ///
    /// # Errors
    ///
    /// Returns an error when a duration expression fails to evaluate.
    pub fn resolve(
        config: Option<&RetryConfig>,
        scope: &EvalScope,
    ) -> Result<Option<Self>, Error> {
        let Some(config) = config else {
            return Ok(None);
        };

        let backoff_text = eval_opt_field(config.backoff.as_deref(), scope, "retry.backoff")?;
        let max_backoff_text =
            eval_opt_field(config.max_backoff.as_deref(), scope, "retry.maxBackoff")?;

        let backoff = parse_duration_or(
            backoff_text.as_deref(),
            Duration::from_millis(constants::DEFAULT_BACKOFF_MS),
        );
        let max_backoff = max_backoff_text
            .as_deref()
            .and_then(|t| parse_duration(t).ok());

        let max_attempts = u32::try_from(config.max_attempts.max(1)).unwrap_or(1);

        Ok(Some(Self {
            max_attempts,
            backoff,
            max_backoff,
            retry_on: config.retry_on.clone(),
        }))
    }

    /// Whether a response status warrants another attempt. An explicitly
    /// configured set (including an empty one) is authoritative; otherwise
    /// the default predicate retries on server errors and 429.
    #[must_use]
    pub fn should_retry_status(&self, status: u16) -> bool {
        match &self.retry_on {
            Some(set) => set.contains(&status),
            None => status >= 500 || status == 429,
        }
    }

    /// Delay before the attempt following `attempt` (1-indexed): linear in
    /// the attempt number, capped by `max_backoff`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff.saturating_mul(attempt.max(1));
        match self.max_backoff {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> EvalScope {
        EvalScope::new(json!({"input": {"delay": "2s"}}))
    }

    fn config(max_attempts: i64) -> RetryConfig {
        RetryConfig {
            max_attempts,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn absent_config_resolves_to_none() {
        assert!(RetryPolicy::resolve(None, &scope()).unwrap().is_none());
    }

    #[test]
    fn non_positive_attempts_clamp_to_one() {
        let policy = RetryPolicy::resolve(Some(&config(0)), &scope())
            .unwrap()
            .unwrap();
        assert_eq!(policy.max_attempts, 1);
        let policy = RetryPolicy::resolve(Some(&config(-5)), &scope())
            .unwrap()
            .unwrap();
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn backoff_defaults_to_one_second() {
        let policy = RetryPolicy::resolve(Some(&config(3)), &scope())
            .unwrap()
            .unwrap();
        assert_eq!(policy.backoff, Duration::from_secs(1));
    }

    #[test]
    fn unparseable_backoff_keeps_default() {
        let mut cfg = config(3);
        cfg.backoff = Some("soon".to_string());
        let policy = RetryPolicy::resolve(Some(&cfg), &scope()).unwrap().unwrap();
        assert_eq!(policy.backoff, Duration::from_secs(1));
    }

    #[test]
    fn backoff_expression_is_evaluated() {
        let mut cfg = config(3);
        cfg.backoff = Some("{{input.delay}}".to_string());
        let policy = RetryPolicy::resolve(Some(&cfg), &scope()).unwrap().unwrap();
        assert_eq!(policy.backoff, Duration::from_secs(2));
    }

    #[test]
    fn delay_grows_linearly_and_monotonically() {
        let mut cfg = config(5);
        cfg.backoff = Some("100ms".to_string());
        let policy = RetryPolicy::resolve(Some(&cfg), &scope()).unwrap().unwrap();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert!(policy.delay_for(4) > policy.delay_for(3));
    }

    #[test]
    fn delay_is_capped_by_max_backoff() {
        let mut cfg = config(10);
        cfg.backoff = Some("100ms".to_string());
        cfg.max_backoff = Some("250ms".to_string());
        let policy = RetryPolicy::resolve(Some(&cfg), &scope()).unwrap().unwrap();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
        assert_eq!(policy.delay_for(9), Duration::from_millis(250));
    }

    #[test]
    fn default_status_predicate() {
        let policy = RetryPolicy::resolve(Some(&config(2)), &scope())
            .unwrap()
            .unwrap();
        assert!(policy.should_retry_status(500));
        assert!(policy.should_retry_status(503));
        assert!(policy.should_retry_status(429));
        assert!(!policy.should_retry_status(200));
        assert!(!policy.should_retry_status(404));
        assert!(!policy.should_retry_status(499));
    }

    #[test]
    fn explicit_retry_on_is_authoritative() {
        let mut cfg = config(2);
        cfg.retry_on = Some(vec![418]);
        let policy = RetryPolicy::resolve(Some(&cfg), &scope()).unwrap().unwrap();
        assert!(policy.should_retry_status(418));
        assert!(!policy.should_retry_status(500));
        assert!(!policy.should_retry_status(429));
    }

    #[test]
    fn explicit_empty_retry_on_retries_nothing() {
        let mut cfg = config(2);
        cfg.retry_on = Some(vec![]);
        let policy = RetryPolicy::resolve(Some(&cfg), &scope()).unwrap().unwrap();
        assert!(!policy.should_retry_status(500));
        assert!(!policy.should_retry_status(429));
    }
}
