//! Aggregate outcome counts for one market run.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::fetch::Outcome;
use crate::domain::Market;

/// Result of dispatching a market's pending units.
///
/// `success + exists + empty + error == total` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub market: Market,
    pub total: usize,
    pub success: usize,
    pub exists: usize,
    pub empty: usize,
    pub error: usize,
    /// Truncated error message -> occurrences.
    pub error_reasons: BTreeMap<String, usize>,
    /// Tickers that ended `empty` or `error`, in completion order.
    pub failed: Vec<String>,
    /// Rows written across all successful fetches.
    pub rows_written: usize,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(market: Market) -> Self {
        Self {
            market,
            total: 0,
            success: 0,
            exists: 0,
            empty: 0,
            error: 0,
            error_reasons: BTreeMap::new(),
            failed: Vec::new(),
            rows_written: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Fold one completed unit into the counts.
    pub fn record(&mut self, ticker: &str, outcome: &Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Success { rows } => {
                self.success += 1;
                self.rows_written += rows;
            }
            Outcome::Exists => self.exists += 1,
            Outcome::Empty => {
                self.empty += 1;
                self.failed.push(ticker.to_string());
            }
            Outcome::Error { message } => {
                self.error += 1;
                *self.error_reasons.entry(message.clone()).or_default() += 1;
                self.failed.push(ticker.to_string());
            }
        }
    }

    /// Units that did not end with data on disk.
    pub fn fail(&self) -> usize {
        self.empty + self.error
    }

    /// Units that ended with data on disk.
    pub fn ok(&self) -> usize {
        self.success + self.exists
    }

    /// Share of units with data on disk, in percent. 100 for an empty run.
    pub fn coverage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.ok() as f64 / self.total as f64 * 100.0
        }
    }

    pub fn is_conserved(&self) -> bool {
        self.success + self.exists + self.empty + self.error == self.total
    }

    /// Error messages ordered by frequency, most common first.
    pub fn top_error_reasons(&self) -> Vec<(&str, usize)> {
        let mut reasons: Vec<(&str, usize)> = self
            .error_reasons
            .iter()
            .map(|(msg, n)| (msg.as_str(), *n))
            .collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        reasons
    }

    pub fn log_summary(&self) {
        tracing::info!(
            market = %self.market,
            total = self.total,
            success = self.success,
            exists = self.exists,
            empty = self.empty,
            error = self.error,
            rows = self.rows_written,
            coverage = format!("{:.1}%", self.coverage()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "download finished"
        );
        for (reason, count) in self.top_error_reasons().into_iter().take(10) {
            tracing::warn!(market = %self.market, count, "failure reason: {reason}");
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_classifies_each_outcome() {
        let mut s = RunSummary::new(Market::Us);
        s.record("A", &Outcome::Success { rows: 10 });
        s.record("B", &Outcome::Exists);
        s.record("C", &Outcome::Empty);
        s.record("D", &Outcome::error("HTTP 500"));
        s.record("E", &Outcome::error("HTTP 500"));
        s.record("F", &Outcome::error("timeout"));

        assert_eq!(s.total, 6);
        assert_eq!((s.success, s.exists, s.empty, s.error), (1, 1, 1, 3));
        assert_eq!(s.fail(), 4);
        assert_eq!(s.rows_written, 10);
        assert_eq!(s.failed, vec!["C", "D", "E", "F"]);
        assert!(s.is_conserved());
        assert_eq!(s.top_error_reasons(), vec![("HTTP 500", 2), ("timeout", 1)]);
    }

    #[test]
    fn coverage_counts_cached_units() {
        let mut s = RunSummary::new(Market::Tw);
        assert_eq!(s.coverage(), 100.0);
        s.record("A", &Outcome::Exists);
        s.record("B", &Outcome::Empty);
        assert!((s.coverage() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn serializes_for_reporting() {
        let mut s = RunSummary::new(Market::Kr);
        s.record("005930.KS", &Outcome::Success { rows: 3 });
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["market"], "kr-share");
        assert_eq!(json["success"], 1);
    }
}
