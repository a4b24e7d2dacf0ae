//! Trailing-period return statistics over cached series.
//!
//! For each period (week = 5 bars, month = 20, year = 250) the reference
//! price is the close `days + 1` bars before the end. Three returns are
//! measured against it, in percent: the highest high of the window, the last
//! close, and the lowest low of the window.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::provider::DataError;
use crate::data::series::{read_series, series_dir};
use crate::domain::{DailyBar, Market};

/// Series shorter than this are not analyzed.
pub const MIN_ROWS: usize = 20;

/// Histogram bucket width, in percentage points.
pub const BUCKET_WIDTH: f64 = 10.0;
const BUCKET_LOW: f64 = -100.0;
const BUCKET_HIGH: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnPeriod {
    Week,
    Month,
    Year,
}

impl ReturnPeriod {
    pub const ALL: [ReturnPeriod; 3] = [ReturnPeriod::Week, ReturnPeriod::Month, ReturnPeriod::Year];

    /// Trading days in the window.
    pub fn days(self) -> usize {
        match self {
            ReturnPeriod::Week => 5,
            ReturnPeriod::Month => 20,
            ReturnPeriod::Year => 250,
        }
    }
}

impl fmt::Display for ReturnPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReturnPeriod::Week => "week",
            ReturnPeriod::Month => "month",
            ReturnPeriod::Year => "year",
        })
    }
}

impl FromStr for ReturnPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "week" | "w" => Ok(ReturnPeriod::Week),
            "month" | "m" => Ok(ReturnPeriod::Month),
            "year" | "y" => Ok(ReturnPeriod::Year),
            other => Err(format!("unknown period '{other}' (expected week, month or year)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnKind {
    High,
    Close,
    Low,
}

/// Returns for one period, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodReturns {
    pub high: f64,
    pub close: f64,
    pub low: f64,
}

impl PeriodReturns {
    pub fn get(&self, kind: ReturnKind) -> f64 {
        match kind {
            ReturnKind::High => self.high,
            ReturnKind::Close => self.close,
            ReturnKind::Low => self.low,
        }
    }
}

/// All periods for one series. A period is `None` when history is too short
/// or the reference close is not positive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Returns {
    pub week: Option<PeriodReturns>,
    pub month: Option<PeriodReturns>,
    pub year: Option<PeriodReturns>,
}

impl Returns {
    pub fn get(&self, period: ReturnPeriod) -> Option<PeriodReturns> {
        match period {
            ReturnPeriod::Week => self.week,
            ReturnPeriod::Month => self.month,
            ReturnPeriod::Year => self.year,
        }
    }
}

/// Returns of one cached symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolReturns {
    pub ticker: String,
    pub name: String,
    pub returns: Returns,
}

fn period_returns(bars: &[DailyBar], days: usize) -> Option<PeriodReturns> {
    if bars.len() <= days {
        return None;
    }
    let prev = bars[bars.len() - days - 1].close;
    if prev.is_nan() || prev <= 0.0 {
        return None;
    }
    let window = &bars[bars.len() - days..];
    let high = window.iter().map(|b| b.high).fold(f64::NAN, f64::max);
    let low = window.iter().map(|b| b.low).fold(f64::NAN, f64::min);
    let last = bars[bars.len() - 1].close;
    let pct = |v: f64| (v - prev) / prev * 100.0;

    Some(PeriodReturns {
        high: pct(high),
        close: pct(last),
        low: pct(low),
    })
}

/// Week, month and year returns of an ascending series.
pub fn compute_returns(bars: &[DailyBar]) -> Returns {
    Returns {
        week: period_returns(bars, ReturnPeriod::Week.days()),
        month: period_returns(bars, ReturnPeriod::Month.days()),
        year: period_returns(bars, ReturnPeriod::Year.days()),
    }
}

/// One 10%-wide histogram bucket `[lower, lower + 10)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub lower: f64,
    pub upper: f64,
    pub members: Vec<(String, f64)>,
}

/// Distribution of one return measure across a market.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    /// 20 buckets covering -100% to +100%; values below -100% land in the first.
    pub buckets: Vec<Bucket>,
    /// Values of +100% or more, largest first.
    pub overflow: Vec<(String, f64)>,
    pub total: usize,
}

/// Bucket labelled values. Non-finite values are dropped.
pub fn bucket_returns<I>(values: I) -> Histogram
where
    I: IntoIterator<Item = (String, f64)>,
{
    let count = ((BUCKET_HIGH - BUCKET_LOW) / BUCKET_WIDTH) as usize;
    let mut buckets: Vec<Bucket> = (0..count)
        .map(|i| {
            let lower = BUCKET_LOW + i as f64 * BUCKET_WIDTH;
            Bucket {
                lower,
                upper: lower + BUCKET_WIDTH,
                members: Vec::new(),
            }
        })
        .collect();
    let mut overflow = Vec::new();
    let mut total = 0;

    for (label, value) in values {
        if !value.is_finite() {
            continue;
        }
        total += 1;
        if value >= BUCKET_HIGH {
            overflow.push((label, value));
            continue;
        }
        let mut idx = (((value.max(BUCKET_LOW) - BUCKET_LOW) / BUCKET_WIDTH).floor() as usize).min(count - 1);
        // The offset can round up onto the next boundary.
        if idx > 0 && value < buckets[idx].lower {
            idx -= 1;
        }
        buckets[idx].members.push((label, value));
    }

    overflow.sort_by(|a, b| b.1.total_cmp(&a.1));
    Histogram {
        buckets,
        overflow,
        total,
    }
}

/// Histogram of one period and measure over analyzed symbols.
pub fn distribution(results: &[SymbolReturns], period: ReturnPeriod, kind: ReturnKind) -> Histogram {
    bucket_returns(results.iter().filter_map(|r| {
        r.returns
            .get(period)
            .map(|p| (format!("{}({})", r.ticker, r.name), p.get(kind)))
    }))
}

/// Compute returns for every cached series of `market` under `data_root`.
///
/// Unreadable files and series shorter than [`MIN_ROWS`] are skipped. Results
/// are ordered by ticker.
pub fn analyze_market(data_root: &Path, market: Market) -> Result<Vec<SymbolReturns>, DataError> {
    let dir = series_dir(data_root, market);
    if !dir.exists() {
        tracing::warn!(market = %market, dir = %dir.display(), "no series directory");
        return Ok(Vec::new());
    }

    let naming = market.profile().naming;
    let mut results = Vec::new();
    let entries = std::fs::read_dir(&dir).map_err(|e| DataError::io(&dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| DataError::io(&dir, e))?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = file_name.strip_suffix(".csv") else {
            continue;
        };

        let bars = match read_series(&path) {
            Ok(bars) => bars,
            Err(e) => {
                tracing::debug!(file = file_name, error = %e, "skipping unreadable series");
                continue;
            }
        };
        if bars.len() < MIN_ROWS {
            continue;
        }

        let (ticker, name) = naming.parse_stem(stem);
        results.push(SymbolReturns {
            ticker,
            name,
            returns: compute_returns(&bars),
        });
    }

    results.sort_by(|a, b| a.ticker.cmp(&b.ticker));
    tracing::info!(market = %market, symbols = results.len(), "analysis complete");
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::series::write_series;
    use chrono::NaiveDate;

    fn series(closes: &[f64]) -> Vec<DailyBar> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| DailyBar {
                date: start + chrono::Days::new(i as u64),
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 100,
            })
            .collect()
    }

    #[test]
    fn week_returns_against_reference_close() {
        // 6 bars: reference is the first close (100), window is the last five.
        let bars = series(&[100.0, 101.0, 110.0, 95.0, 102.0, 105.0]);
        let r = compute_returns(&bars);

        let week = r.week.unwrap();
        assert!((week.high - 11.0).abs() < 1e-9);
        assert!((week.close - 5.0).abs() < 1e-9);
        assert!((week.low - -6.0).abs() < 1e-9);
        assert!(r.month.is_none());
        assert!(r.year.is_none());
    }

    #[test]
    fn exactly_days_rows_is_too_short() {
        assert!(compute_returns(&series(&[1.0; 5])).week.is_none());
        assert!(compute_returns(&series(&[1.0; 21])).month.is_some());
    }

    #[test]
    fn non_positive_reference_is_skipped() {
        let bars = series(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(compute_returns(&bars).week.is_none());
    }

    #[test]
    fn buckets_clamp_low_and_sort_overflow() {
        let h = bucket_returns(vec![
            ("a".to_string(), -150.0),
            ("b".to_string(), -100.0),
            ("c".to_string(), -0.5),
            ("d".to_string(), 0.0),
            ("e".to_string(), 99.9),
            ("f".to_string(), 100.0),
            ("g".to_string(), 340.0),
            ("h".to_string(), f64::NAN),
        ]);

        assert_eq!(h.buckets.len(), 20);
        assert_eq!(h.total, 7);
        assert_eq!(h.buckets[0].members.len(), 2);
        assert_eq!(h.buckets[9].members[0].0, "c");
        assert_eq!(h.buckets[10].members[0].0, "d");
        assert_eq!(h.buckets[19].members[0].0, "e");
        let overflow: Vec<_> = h.overflow.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(overflow, vec!["g", "f"]);
    }

    #[test]
    fn analyze_reads_dayk_and_parses_names() {
        let dir = tempfile::tempdir().unwrap();
        let day_k = series_dir(dir.path(), Market::Cn);

        let closes: Vec<f64> = (0..30).map(|i| 10.0 + i as f64).collect();
        write_series(&day_k.join("600519_貴州茅台.csv"), series(&closes)).unwrap();
        write_series(&day_k.join("000001_平安銀行.csv"), series(&closes[..10])).unwrap();
        std::fs::write(day_k.join("notes.txt"), "ignored").unwrap();

        let results = analyze_market(dir.path(), Market::Cn).unwrap();
        assert_eq!(results.len(), 1, "short series skipped");
        assert_eq!(results[0].ticker, "600519");
        assert_eq!(results[0].name, "貴州茅台");
        assert!(results[0].returns.month.is_some());

        let h = distribution(&results, ReturnPeriod::Week, ReturnKind::Close);
        assert_eq!(h.total, 1);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(analyze_market(dir.path(), Market::Kr).unwrap().is_empty());
    }
}
