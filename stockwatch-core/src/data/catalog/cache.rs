//! Day-granular catalog cache.
//!
//! One JSON snapshot per market at `<data_root>/<market>/lists/catalog_cache.json`.
//! A snapshot is only valid on the calendar date it was captured.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::provider::DataError;
use crate::domain::{Market, SymbolRecord};

pub const CATALOG_CACHE_FILE: &str = "catalog_cache.json";

/// A market's symbol list and the local date it was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub market: Market,
    pub captured_on: NaiveDate,
    pub symbols: Vec<SymbolRecord>,
}

impl CatalogSnapshot {
    pub fn is_valid_on(&self, today: NaiveDate) -> bool {
        self.captured_on == today
    }
}

/// Store for catalog snapshots, injected into the catalog provider.
pub trait CatalogCache: Send + Sync {
    /// The stored snapshot for `market`, if any. Validity is the caller's call.
    fn load(&self, market: Market) -> Result<Option<CatalogSnapshot>, DataError>;

    fn store(&self, snapshot: &CatalogSnapshot) -> Result<(), DataError>;
}

/// JSON file per market under the data root.
#[derive(Debug, Clone)]
pub struct JsonCatalogCache {
    data_root: PathBuf,
}

impl JsonCatalogCache {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn path_for(&self, market: Market) -> PathBuf {
        lists_dir(&self.data_root, market).join(CATALOG_CACHE_FILE)
    }
}

/// `<data_root>/<market>/lists`, home of the catalog cache and manifest.
pub fn lists_dir(data_root: &Path, market: Market) -> PathBuf {
    data_root.join(market.code()).join("lists")
}

impl CatalogCache for JsonCatalogCache {
    fn load(&self, market: Market) -> Result<Option<CatalogSnapshot>, DataError> {
        let path = self.path_for(market);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| DataError::io(&path, e))?;
        let snapshot: CatalogSnapshot = serde_json::from_str(&content)
            .map_err(|e| DataError::Other(format!("corrupt catalog cache {}: {e}", path.display())))?;
        if snapshot.market != market {
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    fn store(&self, snapshot: &CatalogSnapshot) -> Result<(), DataError> {
        let path = self.path_for(snapshot.market);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
        }
        let json = serde_json::to_string(snapshot)
            .map_err(|e| DataError::Other(format!("failed to serialize catalog: {e}")))?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| DataError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::io(&path, format!("atomic rename failed: {e}"))
        })
    }
}
