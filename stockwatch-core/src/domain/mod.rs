//! Domain types: markets, catalog symbols, daily bars.

pub mod bar;
pub mod market;
pub mod symbol;

pub use bar::{normalize_bars, DailyBar, SERIES_COLUMNS};
pub use market::{
    safe_file_name, CatalogKind, Market, MarketProfile, SeriesNaming, TickerRule, UnknownMarket,
};
pub use symbol::{dedup_by_ticker, SymbolRecord};
