//! History provider trait and structured error types.
//!
//! The HistoryProvider trait abstracts over the historical-bar source (Yahoo
//! Finance in production, scripted mocks in tests). Providers are treated as
//! unreliable: they may return no rows, fail, or silently rate-limit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::DailyBar;

/// Structured error types for data operations.
///
/// These are designed to be displayable in CLI output and in the failure-reason
/// breakdown of a run summary.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by provider")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("catalog source '{source_name}' failed: {reason}")]
    Catalog { source_name: String, reason: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Whether this error signals provider-side throttling.
    ///
    /// HTTP 429 maps to [`DataError::RateLimited`] directly; anything else is
    /// inspected by message, since some upstream failures only say so in text.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            DataError::RateLimited { .. } => true,
            DataError::Http { status, .. } => *status == 429,
            other => message_signals_rate_limit(&other.to_string()),
        }
    }

    pub fn io(path: &std::path::Path, err: impl fmt::Display) -> Self {
        DataError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DataError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                DataError::RateLimited {
                    retry_after_secs: None,
                }
            } else {
                DataError::Http {
                    status: status.as_u16(),
                    url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                }
            }
        } else {
            DataError::NetworkUnreachable(err.to_string())
        }
    }
}

/// Case-insensitive scan for the phrases providers use when throttling.
pub fn message_signals_rate_limit(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("too many requests")
}

/// Lookback window requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1mo")]
    Month1,
    #[serde(rename = "3mo")]
    Month3,
    #[serde(rename = "6mo")]
    Month6,
    #[serde(rename = "1y")]
    Year1,
    #[default]
    #[serde(rename = "2y")]
    Year2,
    #[serde(rename = "5y")]
    Year5,
    #[serde(rename = "10y")]
    Year10,
    #[serde(rename = "max")]
    Max,
}

impl Period {
    /// The provider's range token (`2y`, `max`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Month1 => "1mo",
            Period::Month3 => "3mo",
            Period::Month6 => "6mo",
            Period::Year1 => "1y",
            Period::Year2 => "2y",
            Period::Year5 => "5y",
            Period::Year10 => "10y",
            Period::Max => "max",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1mo" => Ok(Period::Month1),
            "3mo" => Ok(Period::Month3),
            "6mo" => Ok(Period::Month6),
            "1y" => Ok(Period::Year1),
            "2y" => Ok(Period::Year2),
            "5y" => Ok(Period::Year5),
            "10y" => Ok(Period::Year10),
            "max" => Ok(Period::Max),
            other => Err(DataError::Other(format!("unknown period '{other}'"))),
        }
    }
}

/// Trait for historical daily-bar providers.
///
/// One call is one network request at a daily interval. Retries, backoff and
/// classification live above this trait in [`crate::data::fetch`]; providers
/// don't know about them.
pub trait HistoryProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily bars for `ticker` over `period`.
    ///
    /// `Ok(vec![])` means the provider answered but has no rows for the symbol.
    fn history(&self, ticker: &str, period: Period) -> Result<Vec<DailyBar>, DataError>;
}

/// Progress side channel for a dispatch run.
///
/// Not part of the correctness contract; the completed count is monotonic.
pub trait DownloadProgress: Send + Sync {
    /// Called once before any unit is dispatched.
    fn on_start(&self, total: usize);

    /// Called on the aggregating thread each time a unit finishes.
    fn on_complete(&self, ticker: &str, completed: usize, total: usize);

    /// Called when every unit has been drained.
    fn on_batch_complete(&self, completed: usize, total: usize);
}

/// Progress reporter that logs through `tracing` every `every` completions.
pub struct LogProgress {
    pub every: usize,
}

impl Default for LogProgress {
    fn default() -> Self {
        Self { every: 25 }
    }
}

impl DownloadProgress for LogProgress {
    fn on_start(&self, total: usize) {
        tracing::info!(total, "dispatching units");
    }

    fn on_complete(&self, ticker: &str, completed: usize, total: usize) {
        if self.every > 0 && (completed % self.every == 0 || completed == total) {
            let percent = if total > 0 { completed * 100 / total } else { 100 };
            tracing::info!("[{completed}/{total}] ({percent}%) last: {ticker}");
        }
    }

    fn on_batch_complete(&self, completed: usize, total: usize) {
        tracing::info!(completed, total, "all units drained");
    }
}

/// Progress reporter that does nothing.
pub struct NoProgress;

impl DownloadProgress for NoProgress {
    fn on_start(&self, _total: usize) {}
    fn on_complete(&self, _ticker: &str, _completed: usize, _total: usize) {}
    fn on_batch_complete(&self, _completed: usize, _total: usize) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_detection() {
        assert!(DataError::RateLimited {
            retry_after_secs: Some(60)
        }
        .is_rate_limited());
        assert!(DataError::Http {
            status: 429,
            url: "x".into()
        }
        .is_rate_limited());
        assert!(DataError::Other("Too Many Requests. Rate limited. Try after a while.".into())
            .is_rate_limited());
        assert!(!DataError::Http {
            status: 500,
            url: "x".into()
        }
        .is_rate_limited());
        assert!(!DataError::Timeout("read timed out".into()).is_rate_limited());
    }

    #[test]
    fn period_tokens() {
        assert_eq!(Period::default().as_str(), "2y");
        assert_eq!("max".parse::<Period>().unwrap(), Period::Max);
        assert!("7d".parse::<Period>().is_err());
    }
}
