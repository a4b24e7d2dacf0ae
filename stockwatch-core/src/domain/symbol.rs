//! One tradable security in a market's catalog.

use serde::{Deserialize, Serialize};

use super::market::Market;

/// A catalog entry. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolRecord {
    /// Provider-format ticker (`2330.TW`, `600519.SS`, `005930.KS`). Unique within a market.
    pub ticker: String,
    /// Raw exchange code as listed by the catalog source.
    pub code: String,
    pub display_name: String,
    pub market: Market,
    /// Board or category flag (`TWSE`/`TPEx`, `KS`/`KQ`), when the source has one.
    pub board: Option<String>,
}

/// Drop repeated tickers, keeping the first occurrence.
pub fn dedup_by_ticker(symbols: Vec<SymbolRecord>) -> Vec<SymbolRecord> {
    let mut seen = std::collections::HashSet::new();
    symbols
        .into_iter()
        .filter(|s| seen.insert(s.ticker.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first() {
        let profile = Market::Us.profile();
        let out = dedup_by_ticker(vec![
            profile.symbol("AAPL", "Apple", None),
            profile.symbol("MSFT", "Microsoft", None),
            profile.symbol("AAPL", "Apple duplicate", None),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].display_name, "Apple");
    }
}
