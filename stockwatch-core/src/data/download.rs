//! Download orchestrator: one market run, catalog to summary.
//!
//! Steps:
//! 1. resolve the catalog (cache, source or seeds)
//! 2. load or create the manifest; a new batch starts usable files as `done`
//! 3. dispatch the rows not yet `done`; each unit is freshness-gated, then fetched
//! 4. mark and periodically checkpoint the manifest as outcomes arrive
//! 5. final checkpoint, audit record, summary log
//!
//! Manifest and audit I/O failures are logged; they never abort a run.

use std::path::PathBuf;

use chrono::Utc;

use super::audit::{AuditLog, AuditRecord};
use super::catalog::{lists_dir, CatalogProvider};
use super::dispatch::Dispatcher;
use super::fetch::{Fetcher, Outcome, Sleeper};
use super::manifest::{Manifest, ManifestStatus, MANIFEST_FILE};
use super::provider::{DataError, DownloadProgress, HistoryProvider};
use super::series::series_path;
use super::summary::RunSummary;
use crate::config::MarketSettings;
use crate::domain::{Market, SymbolRecord};

/// Manifest location for `market` under `settings.data_root`.
pub fn manifest_path(settings: &MarketSettings) -> PathBuf {
    lists_dir(&settings.data_root, settings.profile.market).join(MANIFEST_FILE)
}

/// Collaborators for a market run.
pub struct DownloadContext<'a> {
    pub provider: &'a dyn HistoryProvider,
    pub catalog: &'a CatalogProvider,
    pub sleeper: &'a dyn Sleeper,
    pub progress: &'a dyn DownloadProgress,
}

/// Download every catalog symbol of one market that is not already done.
///
/// Rows already `done` are never dispatched again within a batch; they count
/// as `exists` in the returned summary, so `total` covers the whole manifest.
/// With `restart`, the manifest is discarded and a new batch begins: only
/// files that pass the freshness policy start `done`, so a restart together
/// with a `max_age` refreshes stale series.
pub fn download_market(
    settings: &MarketSettings,
    ctx: &DownloadContext<'_>,
    restart: bool,
) -> Result<RunSummary, DataError> {
    let profile = &settings.profile;
    let market = profile.market;
    let data_root = settings.data_root.as_path();

    tracing::info!(market = %market, period = %settings.period, "starting download");

    // 1. Catalog
    let catalog = ctx.catalog.get_symbols(market);

    // 2. Manifest
    let path = manifest_path(settings);
    if restart {
        match Manifest::discard(&path) {
            Ok(true) => tracing::info!(market = %market, "discarded previous manifest"),
            Ok(false) => {}
            Err(e) => tracing::warn!(market = %market, error = %e, "failed to discard manifest"),
        }
    }
    let mut manifest = Manifest::load_or_init(&path, &catalog, |s| {
        settings.freshness.is_fresh(&series_path(data_root, profile, s))
    });

    let done = manifest.done_symbols(market, &catalog);
    let units = manifest.pending_symbols(market, &catalog);
    tracing::info!(
        market = %market,
        catalog = catalog.len(),
        manifest = manifest.len(),
        done = done.len(),
        dispatch = units.len(),
        "work planned"
    );

    // 3-4. Dispatch
    let fetcher = Fetcher::new(ctx.provider, settings.retry.clone(), ctx.sleeper);
    let work = |symbol: &SymbolRecord| -> Outcome {
        let out_path = series_path(data_root, profile, symbol);
        if settings.freshness.is_fresh(&out_path) {
            return Outcome::Exists;
        }
        fetcher.fetch(&symbol.ticker, settings.period, &out_path)
    };

    let checkpoint_every = settings.checkpoint_every.max(1);
    let mut completed = 0usize;
    let dispatcher = Dispatcher::new(settings.dispatch.clone(), ctx.sleeper, ctx.progress);
    let mut summary = dispatcher.run(market, &units, work, |symbol, outcome| {
        manifest.mark(&symbol.ticker, ManifestStatus::from(outcome));
        completed += 1;
        if completed % checkpoint_every == 0 {
            checkpoint(&manifest, market);
        }
    })?;

    for symbol in &done {
        summary.record(&symbol.ticker, &Outcome::Exists);
    }

    // 5. Final checkpoint, audit, summary
    checkpoint(&manifest, market);

    if settings.audit {
        let log = AuditLog::under(data_root);
        if let Err(e) = log.append(&AuditRecord::from_summary(&summary, Utc::now())) {
            tracing::warn!(market = %market, error = %e, "failed to append audit record");
        }
    }

    summary.log_summary();
    Ok(summary)
}

fn checkpoint(manifest: &Manifest, market: Market) {
    match manifest.checkpoint() {
        Ok(()) => tracing::debug!(market = %market, counts = ?manifest.counts(), "manifest checkpoint"),
        Err(e) => tracing::warn!(market = %market, error = %e, "manifest checkpoint failed"),
    }
}
