//! One trading day of OHLCV data.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Column order of every cached series file.
pub const SERIES_COLUMNS: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];

/// OHLCV bar for a single symbol on a single day.
///
/// Dates are exchange-local calendar dates with no timezone attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    #[serde(with = "iso_date")]
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl DailyBar {
    /// Returns true if any price field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }
}

/// Sort ascending by date and drop duplicate dates (last one wins).
pub fn normalize_bars(mut bars: Vec<DailyBar>) -> Vec<DailyBar> {
    // Stable sort keeps provider order within a date, so the later row survives the dedup below.
    bars.sort_by_key(|b| b.date);
    let mut out: Vec<DailyBar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}

mod iso_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        // Tolerate files written by other tools that append a time part.
        let day = raw.split([' ', 'T']).next().unwrap_or_default();
        NaiveDate::parse_from_str(day, FORMAT).map_err(serde::de::Error::custom)
    }
}
