//! Resumable per-market manifest.
//!
//! A CSV table `code,name,board,status` with one row per catalog symbol. A
//! run dispatches only rows not yet `done`, marks rows in memory as units
//! complete, and checkpoints the whole table periodically. A crash between
//! checkpoints loses at most that window of progress.
//!
//! The manifest is owned by the dispatcher's consumer thread; it is never
//! shared with workers.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::fetch::Outcome;
use super::provider::DataError;
use crate::domain::{Market, SymbolRecord};

/// File name of the manifest inside `<data_root>/<market>/lists/`.
pub const MANIFEST_FILE: &str = "manifest.csv";

/// Status of one manifest row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestStatus {
    Pending,
    Done,
    Empty,
    Failed,
}

impl From<&Outcome> for ManifestStatus {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Success { .. } | Outcome::Exists => ManifestStatus::Done,
            Outcome::Empty => ManifestStatus::Empty,
            Outcome::Error { .. } => ManifestStatus::Failed,
        }
    }
}

/// One manifest row. `code` holds the provider ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub code: String,
    pub name: String,
    pub board: Option<String>,
    pub status: ManifestStatus,
}

impl ManifestEntry {
    fn pending(symbol: &SymbolRecord) -> Self {
        Self {
            code: symbol.ticker.clone(),
            name: symbol.display_name.clone(),
            board: symbol.board.clone(),
            status: ManifestStatus::Pending,
        }
    }

    /// Rebuild a symbol for a row the current catalog no longer lists.
    pub fn to_symbol(&self, market: Market) -> SymbolRecord {
        let code = self
            .code
            .rsplit_once('.')
            .map(|(code, _)| code)
            .unwrap_or(&self.code);
        SymbolRecord {
            ticker: self.code.clone(),
            code: code.to_string(),
            display_name: self.name.clone(),
            market,
            board: self.board.clone(),
        }
    }
}

/// Row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub done: usize,
    pub empty: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.done + self.empty + self.failed
    }
}

/// In-memory manifest bound to its file.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    entries: Vec<ManifestEntry>,
    index: HashMap<String, usize>,
}

impl Manifest {
    /// Load the manifest at `path`, or create it from `symbols`.
    ///
    /// - No file: one `pending` row per symbol, except symbols for which
    ///   `has_series` is true, which start `done`. Written immediately.
    /// - Existing file: loaded as-is; catalog symbols it lacks are appended
    ///   as `pending`.
    /// - Unreadable file: logged, and every symbol is treated as pending.
    ///
    /// Never fails; resumability is lost at worst.
    pub fn load_or_init<F>(path: &Path, symbols: &[SymbolRecord], has_series: F) -> Self
    where
        F: Fn(&SymbolRecord) -> bool,
    {
        if path.exists() {
            match read_entries(path) {
                Ok(entries) => {
                    let mut manifest = Self::from_entries(path, entries);
                    let added = manifest.append_missing(symbols);
                    tracing::info!(
                        path = %path.display(),
                        rows = manifest.len(),
                        added,
                        "resuming from manifest"
                    );
                    return manifest;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "manifest unreadable, treating all symbols as pending"
                    );
                    return Self::from_entries(path, symbols.iter().map(ManifestEntry::pending).collect());
                }
            }
        }

        let entries = symbols
            .iter()
            .map(|s| {
                let mut entry = ManifestEntry::pending(s);
                if has_series(s) {
                    entry.status = ManifestStatus::Done;
                }
                entry
            })
            .collect();
        let manifest = Self::from_entries(path, entries);
        if let Err(e) = manifest.checkpoint() {
            tracing::warn!(path = %path.display(), error = %e, "failed to write new manifest");
        }
        manifest
    }

    fn from_entries(path: &Path, entries: Vec<ManifestEntry>) -> Self {
        let mut manifest = Self {
            path: path.to_path_buf(),
            entries: Vec::with_capacity(entries.len()),
            index: HashMap::with_capacity(entries.len()),
        };
        for entry in entries {
            // Later duplicates of a ticker are dropped.
            if !manifest.index.contains_key(&entry.code) {
                manifest.index.insert(entry.code.clone(), manifest.entries.len());
                manifest.entries.push(entry);
            }
        }
        manifest
    }

    fn append_missing(&mut self, symbols: &[SymbolRecord]) -> usize {
        let mut added = 0;
        for symbol in symbols {
            if !self.index.contains_key(&symbol.ticker) {
                self.index.insert(symbol.ticker.clone(), self.entries.len());
                self.entries.push(ManifestEntry::pending(symbol));
                added += 1;
            }
        }
        added
    }

    /// Delete the manifest file so the next run starts a new batch.
    pub fn discard(path: &Path) -> Result<bool, DataError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DataError::io(path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn status(&self, ticker: &str) -> Option<ManifestStatus> {
        self.index.get(ticker).map(|&i| self.entries[i].status)
    }

    /// Update one row in memory. Returns false if the ticker has no row.
    pub fn mark(&mut self, ticker: &str, status: ManifestStatus) -> bool {
        match self.index.get(ticker) {
            Some(&i) => {
                self.entries[i].status = status;
                true
            }
            None => {
                tracing::warn!(ticker, "mark for ticker missing from manifest");
                false
            }
        }
    }

    /// Rows still to dispatch (status other than `done`).
    pub fn pending(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| e.status != ManifestStatus::Done)
    }

    /// Symbols to dispatch, preferring the catalog's record for each row.
    pub fn pending_symbols(&self, market: Market, catalog: &[SymbolRecord]) -> Vec<SymbolRecord> {
        self.symbols_where(market, catalog, |s| s != ManifestStatus::Done)
    }

    /// Symbols of rows already `done`.
    pub fn done_symbols(&self, market: Market, catalog: &[SymbolRecord]) -> Vec<SymbolRecord> {
        self.symbols_where(market, catalog, |s| s == ManifestStatus::Done)
    }

    fn symbols_where<F>(&self, market: Market, catalog: &[SymbolRecord], keep: F) -> Vec<SymbolRecord>
    where
        F: Fn(ManifestStatus) -> bool,
    {
        let by_ticker: HashMap<&str, &SymbolRecord> =
            catalog.iter().map(|s| (s.ticker.as_str(), s)).collect();
        self.entries
            .iter()
            .filter(|e| keep(e.status))
            .map(|e| match by_ticker.get(e.code.as_str()) {
                Some(symbol) => (*symbol).clone(),
                None => e.to_symbol(market),
            })
            .collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in &self.entries {
            match entry.status {
                ManifestStatus::Pending => counts.pending += 1,
                ManifestStatus::Done => counts.done += 1,
                ManifestStatus::Empty => counts.empty += 1,
                ManifestStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Write the full table atomically (temp file, then rename).
    pub fn checkpoint(&self) -> Result<(), DataError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
        }
        let tmp_path = self.path.with_extension("csv.tmp");

        let write_result = (|| -> Result<(), DataError> {
            let mut writer =
                csv::Writer::from_path(&tmp_path).map_err(|e| DataError::Csv(e.to_string()))?;
            if self.entries.is_empty() {
                writer
                    .write_record(["code", "name", "board", "status"])
                    .map_err(|e| DataError::Csv(e.to_string()))?;
            }
            for entry in &self.entries {
                writer.serialize(entry).map_err(|e| DataError::Csv(e.to_string()))?;
            }
            writer.flush().map_err(|e| DataError::io(&tmp_path, e))
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::io(&self.path, format!("atomic rename failed: {e}"))
        })
    }
}

/// Counts for a manifest on disk, without a catalog.
pub fn read_counts(path: &Path) -> Result<StatusCounts, DataError> {
    let manifest = Manifest::from_entries(path, read_entries(path)?);
    Ok(manifest.counts())
}

fn read_entries(path: &Path) -> Result<Vec<ManifestEntry>, DataError> {
    let text = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
    let text = text.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    reader
        .deserialize()
        .map(|row| row.map_err(|e| DataError::Csv(format!("{}: {e}", path.display()))))
        .collect()
}
