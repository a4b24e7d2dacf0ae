//! Catalog, fetch, dispatch and persistence for daily-bar downloads.

pub mod audit;
pub mod catalog;
pub mod dispatch;
pub mod download;
pub mod fetch;
pub mod freshness;
pub mod manifest;
pub mod provider;
pub mod series;
pub mod summary;
pub mod yahoo;

pub use audit::{AuditLog, AuditRecord};
pub use catalog::{CatalogCache, CatalogProvider, CatalogSource, JsonCatalogCache};
pub use dispatch::{DispatchConfig, Dispatcher, Throttle};
pub use download::{download_market, manifest_path, DownloadContext};
pub use fetch::{Fetcher, JitterRange, Outcome, RecordingSleeper, RetryPolicy, Sleeper, ThreadSleeper};
pub use freshness::{is_fresh, is_fresh_at, FreshnessPolicy};
pub use manifest::{Manifest, ManifestEntry, ManifestStatus, StatusCounts};
pub use provider::{DataError, DownloadProgress, HistoryProvider, LogProgress, NoProgress, Period};
pub use series::{read_series, series_dir, series_path, write_series};
pub use summary::RunSummary;
pub use yahoo::YahooProvider;
