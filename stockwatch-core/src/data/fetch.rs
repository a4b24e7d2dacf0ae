//! Fetch-with-retry for a single symbol.
//!
//! Every attempt is preceded by a short random jitter. Failed attempts are
//! classified so the reaction matches the cause:
//! - no rows: retry, and report `Empty` if the last attempt is still empty
//! - provider error: retry after a multi-second pause, report `Error` at the end
//! - rate limit: retry after a much longer pause
//!
//! All sleeping goes through a [`Sleeper`] so tests can observe the schedule.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::provider::{DataError, HistoryProvider, Period};
use super::series::write_series;
use crate::config::ConfigError;

/// Longest error message kept in an outcome; the summary groups failures by it.
pub const ERROR_MESSAGE_LIMIT: usize = 50;

/// Closed interval `[min_ms, max_ms]` a random pause is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitterRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl JitterRange {
    pub const fn millis(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn zero() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rng.gen_range(self.min_ms..=self.max_ms))
    }

    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms.max(self.min_ms))
    }
}

/// Bounded retry schedule for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Slept before every network attempt.
    pub pre_request_jitter: JitterRange,
    /// Slept between attempts after an empty answer or an ordinary error.
    pub retry_interval: JitterRange,
    /// Slept between attempts after a rate-limit signal.
    pub rate_limit_backoff: JitterRange,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            pre_request_jitter: JitterRange::millis(500, 1_200),
            retry_interval: JitterRange::millis(3_000, 7_000),
            rate_limit_backoff: JitterRange::millis(20_000, 40_000),
        }
    }
}

impl RetryPolicy {
    /// No sleeping at all; for tests and local stubs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            pre_request_jitter: JitterRange::zero(),
            retry_interval: JitterRange::zero(),
            rate_limit_backoff: JitterRange::millis(1, 1),
        }
    }

    /// The rate-limit pause must be drawn from a strictly longer interval than
    /// the ordinary retry pause, and at least one attempt must be made.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.rate_limit_backoff.min_ms <= self.retry_interval.max_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.rate_limit_backoff ({}..{} ms) must start above retry.retry_interval max ({} ms)",
                self.rate_limit_backoff.min_ms,
                self.rate_limit_backoff.max_ms,
                self.retry_interval.max_ms
            )));
        }
        Ok(())
    }
}

/// Blocking pause, injectable for tests.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling OS thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Records requested pauses instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.recorded().into_iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}

/// Result of processing one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Fetched and written.
    Success { rows: usize },
    /// A fresh cached file already existed; no request was made.
    Exists,
    /// The provider has no data for the symbol.
    Empty,
    /// Failed after every attempt; message truncated to [`ERROR_MESSAGE_LIMIT`].
    Error { message: String },
}

impl Outcome {
    pub fn error(message: impl AsRef<str>) -> Self {
        Outcome::Error {
            message: truncate_message(message.as_ref()),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::Exists => "exists",
            Outcome::Empty => "empty",
            Outcome::Error { .. } => "error",
        }
    }
}

/// Cut `message` to at most [`ERROR_MESSAGE_LIMIT`] characters on a char boundary.
pub fn truncate_message(message: &str) -> String {
    message.chars().take(ERROR_MESSAGE_LIMIT).collect()
}

/// Runs the retry schedule against a provider and persists successful results.
pub struct Fetcher<'a> {
    provider: &'a dyn HistoryProvider,
    policy: RetryPolicy,
    sleeper: &'a dyn Sleeper,
}

impl<'a> Fetcher<'a> {
    pub fn new(provider: &'a dyn HistoryProvider, policy: RetryPolicy, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            provider,
            policy,
            sleeper,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `ticker` and, on success, write it to `out_path`.
    ///
    /// Attempts are strictly sequential; exactly `max_attempts` provider calls
    /// are made unless one succeeds first.
    pub fn fetch(&self, ticker: &str, period: Period, out_path: &Path) -> Outcome {
        let mut rng = rand::thread_rng();
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..attempts {
            let pause = match self.attempt(ticker, period, out_path, attempt, &mut rng) {
                Attempt::Finished(outcome) => return outcome,
                Attempt::NoRows => self.policy.retry_interval,
                Attempt::Failed(e) if e.is_rate_limited() => {
                    tracing::warn!(ticker, attempt, "rate limited, backing off");
                    self.policy.rate_limit_backoff
                }
                Attempt::Failed(e) => {
                    tracing::debug!(ticker, attempt, error = %e, "attempt failed, retrying");
                    self.policy.retry_interval
                }
            };
            self.sleeper.sleep(pause.sample(&mut rng));
        }

        match self.attempt(ticker, period, out_path, attempts, &mut rng) {
            Attempt::Finished(outcome) => outcome,
            Attempt::NoRows => {
                tracing::debug!(ticker, attempt = attempts, "provider has no rows");
                Outcome::Empty
            }
            Attempt::Failed(e) => {
                tracing::debug!(ticker, attempt = attempts, error = %e, "giving up");
                Outcome::error(e.to_string())
            }
        }
    }

    /// One jittered provider call. Rows, when present, are written here.
    fn attempt(&self, ticker: &str, period: Period, out_path: &Path, attempt: u32, rng: &mut impl Rng) -> Attempt {
        self.sleeper.sleep(self.policy.pre_request_jitter.sample(rng));

        match self.provider.history(ticker, period) {
            Ok(bars) if bars.is_empty() => Attempt::NoRows,
            Ok(bars) => Attempt::Finished(match write_series(out_path, bars) {
                Ok(rows) => {
                    tracing::debug!(ticker, rows, attempt, "fetched");
                    Outcome::Success { rows }
                }
                Err(e) => {
                    tracing::warn!(ticker, error = %e, "failed to write series");
                    Outcome::error(e.to_string())
                }
            }),
            Err(e) => Attempt::Failed(e),
        }
    }
}

/// Result of a single provider call.
enum Attempt {
    Finished(Outcome),
    NoRows,
    Failed(DataError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::DataError;
    use crate::domain::DailyBar;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns scripted responses in order; repeats the last one.
    struct Scripted {
        responses: Vec<fn() -> Result<Vec<DailyBar>, DataError>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(responses: Vec<fn() -> Result<Vec<DailyBar>, DataError>>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HistoryProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn history(&self, _ticker: &str, _period: Period) -> Result<Vec<DailyBar>, DataError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            let f = self.responses[i.min(self.responses.len() - 1)];
            f()
        }
    }

    fn one_bar() -> Result<Vec<DailyBar>, DataError> {
        Ok(vec![DailyBar {
            date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1,
        }])
    }

    fn no_rows() -> Result<Vec<DailyBar>, DataError> {
        Ok(Vec::new())
    }

    fn boom() -> Result<Vec<DailyBar>, DataError> {
        Err(DataError::NetworkUnreachable(
            "connection reset by peer while reading the response body".into(),
        ))
    }

    fn throttled() -> Result<Vec<DailyBar>, DataError> {
        Err(DataError::Other("Too Many Requests. Rate limited. Try after a while.".into()))
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            pre_request_jitter: JitterRange::millis(1, 2),
            retry_interval: JitterRange::millis(10, 20),
            rate_limit_backoff: JitterRange::millis(100, 200),
        }
    }

    #[test]
    fn success_writes_file_on_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("A.csv");
        let provider = Scripted::new(vec![one_bar]);
        let sleeper = RecordingSleeper::default();

        let outcome = Fetcher::new(&provider, policy(), &sleeper).fetch("A", Period::Year2, &out);

        assert_eq!(outcome, Outcome::Success { rows: 1 });
        assert_eq!(provider.calls(), 1);
        assert!(out.exists());
        assert_eq!(sleeper.recorded().len(), 1, "only the pre-request jitter");
    }

    #[test]
    fn persistent_error_uses_exactly_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Scripted::new(vec![boom]);
        let sleeper = RecordingSleeper::default();

        let outcome =
            Fetcher::new(&provider, policy(), &sleeper).fetch("A", Period::Year2, &dir.path().join("A.csv"));

        assert_eq!(provider.calls(), 2);
        match outcome {
            Outcome::Error { message } => {
                assert_eq!(message.chars().count(), ERROR_MESSAGE_LIMIT);
                assert!(message.starts_with("network unreachable"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn retry_bound_follows_policy() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Scripted::new(vec![boom]);
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy {
            max_attempts: 4,
            ..policy()
        };

        Fetcher::new(&provider, policy, &sleeper).fetch("A", Period::Year2, &dir.path().join("A.csv"));
        assert_eq!(provider.calls(), 4);
    }

    #[test]
    fn single_attempt_classifies_the_only_call() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("A.csv");
        let single = RetryPolicy {
            max_attempts: 1,
            ..policy()
        };

        let cases: [(fn() -> Result<Vec<DailyBar>, DataError>, &str); 3] =
            [(no_rows, "empty"), (throttled, "error"), (one_bar, "success")];
        for (response, label) in cases {
            let provider = Scripted::new(vec![response]);
            let sleeper = RecordingSleeper::default();

            let outcome = Fetcher::new(&provider, single.clone(), &sleeper).fetch("A", Period::Year2, &out);

            assert_eq!(outcome.label(), label);
            assert_eq!(provider.calls(), 1);
            assert_eq!(sleeper.recorded().len(), 1, "no pause after the last attempt");
        }
    }

    #[test]
    fn empty_then_data_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Scripted::new(vec![no_rows, one_bar]);
        let sleeper = RecordingSleeper::default();

        let outcome =
            Fetcher::new(&provider, policy(), &sleeper).fetch("A", Period::Year2, &dir.path().join("A.csv"));
        assert_eq!(outcome, Outcome::Success { rows: 1 });
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn empty_on_every_attempt_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("A.csv");
        let provider = Scripted::new(vec![no_rows]);
        let sleeper = RecordingSleeper::default();

        let outcome = Fetcher::new(&provider, policy(), &sleeper).fetch("A", Period::Year2, &out);
        assert_eq!(outcome, Outcome::Empty);
        assert_eq!(provider.calls(), 2);
        assert!(!out.exists());
    }

    #[test]
    fn sleep_schedule_for_ordinary_errors() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Scripted::new(vec![boom]);
        let sleeper = RecordingSleeper::default();

        Fetcher::new(&provider, policy(), &sleeper).fetch("A", Period::Year2, &dir.path().join("A.csv"));

        let slept = sleeper.recorded();
        // jitter, retry pause, jitter; nothing after the last attempt
        assert_eq!(slept.len(), 3);
        assert!(slept[0] <= Duration::from_millis(2));
        assert!(slept[1] >= Duration::from_millis(10) && slept[1] <= Duration::from_millis(20));
        assert!(slept[2] <= Duration::from_millis(2));
    }

    #[test]
    fn rate_limit_backoff_is_longer_than_retry_interval() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Scripted::new(vec![throttled]);
        let sleeper = RecordingSleeper::default();
        let policy = policy();

        Fetcher::new(&provider, policy.clone(), &sleeper).fetch("CCC", Period::Year2, &dir.path().join("C.csv"));

        let slept = sleeper.recorded();
        assert_eq!(slept.len(), 3);
        assert!(slept[1] > policy.retry_interval.max());
        assert!(slept[1] >= policy.rate_limit_backoff.min());
    }

    #[test]
    fn jitter_sampling_stays_in_range() {
        let mut rng = rand::thread_rng();
        let range = JitterRange::millis(300, 400);
        for _ in 0..200 {
            let d = range.sample(&mut rng);
            assert!(d >= range.min() && d <= range.max());
        }
        assert_eq!(JitterRange::zero().sample(&mut rng), Duration::ZERO);
    }

    #[test]
    fn policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        let overlapping = RetryPolicy {
            rate_limit_backoff: JitterRange::millis(5_000, 30_000),
            ..RetryPolicy::default()
        };
        assert!(overlapping.validate().is_err());
        let no_attempts = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(no_attempts.validate().is_err());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "錯".repeat(80);
        assert_eq!(truncate_message(&long).chars().count(), ERROR_MESSAGE_LIMIT);
        assert_eq!(truncate_message("short"), "short");
    }
}
