//! Symbol catalog provider.
//!
//! Resolution order for a market on a given day:
//! 1. a cached snapshot captured today (no network)
//! 2. the market's [`CatalogSource`], whose result is cached
//! 3. the market's seed list (never cached)
//!
//! The provider always returns at least the seed symbols.

pub mod cache;
pub mod sources;

use std::collections::HashMap;

use chrono::NaiveDate;

pub use cache::{lists_dir, CatalogCache, CatalogSnapshot, JsonCatalogCache, CATALOG_CACHE_FILE};
pub use sources::{http_client, standard_source, ReferenceList, WithFallback};

use super::provider::DataError;
use crate::domain::{dedup_by_ticker, Market, SymbolRecord};

/// Where a market's symbol list comes from.
pub trait CatalogSource: Send + Sync {
    fn name(&self) -> &str;

    /// Filtered, normalized symbols. Order is the source's listing order.
    fn fetch(&self) -> Result<Vec<SymbolRecord>, DataError>;
}

/// How a catalog was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOrigin {
    Cache,
    Source,
    Seed,
}

/// Catalog lookup with a daily cache and seed-list fallback.
pub struct CatalogProvider {
    cache: Box<dyn CatalogCache>,
    sources: HashMap<Market, Box<dyn CatalogSource>>,
}

impl CatalogProvider {
    /// A provider with no sources; every market resolves to cache or seeds.
    pub fn new(cache: Box<dyn CatalogCache>) -> Self {
        Self {
            cache,
            sources: HashMap::new(),
        }
    }

    pub fn with_source(mut self, market: Market, source: Box<dyn CatalogSource>) -> Self {
        self.sources.insert(market, source);
        self
    }

    pub fn get_symbols(&self, market: Market) -> Vec<SymbolRecord> {
        self.get_symbols_on(market, chrono::Local::now().date_naive())
    }

    pub fn get_symbols_on(&self, market: Market, today: NaiveDate) -> Vec<SymbolRecord> {
        self.resolve(market, today).0
    }

    /// Symbols for `market` on `today`, and where they came from.
    pub fn resolve(&self, market: Market, today: NaiveDate) -> (Vec<SymbolRecord>, CatalogOrigin) {
        match self.cache.load(market) {
            Ok(Some(snapshot)) if snapshot.is_valid_on(today) && !snapshot.symbols.is_empty() => {
                tracing::info!(market = %market, symbols = snapshot.symbols.len(), "catalog loaded from today's cache");
                return (snapshot.symbols, CatalogOrigin::Cache);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(market = %market, error = %e, "catalog cache unreadable"),
        }

        if let Some(source) = self.sources.get(&market) {
            match source.fetch() {
                Ok(symbols) if !symbols.is_empty() => {
                    let symbols = dedup_by_ticker(symbols);
                    tracing::info!(
                        market = %market,
                        source = source.name(),
                        symbols = symbols.len(),
                        "catalog fetched"
                    );
                    let snapshot = CatalogSnapshot {
                        market,
                        captured_on: today,
                        symbols,
                    };
                    if let Err(e) = self.cache.store(&snapshot) {
                        tracing::warn!(market = %market, error = %e, "failed to cache catalog");
                    }
                    return (snapshot.symbols, CatalogOrigin::Source);
                }
                Ok(_) => {
                    tracing::warn!(market = %market, source = source.name(), "catalog source returned no symbols")
                }
                Err(e) => {
                    tracing::warn!(market = %market, source = source.name(), error = %e, "catalog source failed")
                }
            }
        }

        let seeds = market.profile().seed_symbols();
        tracing::warn!(market = %market, symbols = seeds.len(), "falling back to seed list");
        (seeds, CatalogOrigin::Seed)
    }
}
