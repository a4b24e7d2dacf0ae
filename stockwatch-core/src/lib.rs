//! Stockwatch Core: multi-market daily-bar downloader and return statistics.
//!
//! This crate contains:
//! - Market profiles (ticker rules, file naming, worker counts, seed lists)
//! - Symbol catalogs with a daily cache and seed fallback
//! - Fetch-with-retry with jitter and rate-limit backoff
//! - A bounded worker pool with a single aggregating consumer
//! - A resumable per-market manifest and an append-only audit log
//! - Trailing-period return statistics over the cached series

pub mod config;
pub mod data;
pub mod domain;
pub mod stats;
