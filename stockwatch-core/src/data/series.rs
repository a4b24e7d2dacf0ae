//! Cached series files: one CSV of daily bars per symbol.
//!
//! Layout: `{data_root}/{market}/dayK/{file}` where `{file}` follows the
//! market's [`SeriesNaming`](crate::domain::SeriesNaming) rule.
//!
//! Writes are atomic (write to .tmp, rename into place). Files are superseded
//! by later fetches, never deleted here.

use std::fs;
use std::path::{Path, PathBuf};

use super::provider::DataError;
use crate::domain::{normalize_bars, DailyBar, Market, MarketProfile, SymbolRecord, SERIES_COLUMNS};

/// Subdirectory holding the per-symbol daily series.
pub const SERIES_SUBDIR: &str = "dayK";

/// Directory of one market's series files.
pub fn series_dir(data_root: &Path, market: Market) -> PathBuf {
    data_root.join(market.code()).join(SERIES_SUBDIR)
}

/// Deterministic series path for `symbol` under `data_root`.
pub fn series_path(data_root: &Path, profile: &MarketProfile, symbol: &SymbolRecord) -> PathBuf {
    series_dir(data_root, profile.market).join(profile.naming.file_name(symbol))
}

/// Normalize `bars` and write them to `path`, replacing any previous file.
///
/// Returns the number of rows written.
pub fn write_series(path: &Path, bars: Vec<DailyBar>) -> Result<usize, DataError> {
    let bars = normalize_bars(bars);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let write_result = (|| -> Result<(), DataError> {
        let mut writer = csv::Writer::from_path(&tmp_path).map_err(|e| DataError::Csv(e.to_string()))?;
        if bars.is_empty() {
            writer
                .write_record(SERIES_COLUMNS)
                .map_err(|e| DataError::Csv(e.to_string()))?;
        }
        for bar in &bars {
            writer.serialize(bar).map_err(|e| DataError::Csv(e.to_string()))?;
        }
        writer.flush().map_err(|e| DataError::io(&tmp_path, e))
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        // Clean up temp file on rename failure
        let _ = fs::remove_file(&tmp_path);
        DataError::io(path, format!("atomic rename failed: {e}"))
    })?;

    Ok(bars.len())
}

/// Load a series file. Column names are matched case-insensitively and extra
/// columns are ignored, so files from older tools still load.
pub fn read_series(path: &Path) -> Result<Vec<DailyBar>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| DataError::Csv(format!("{}: {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| DataError::Csv(e.to_string()))?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_ascii_lowercase())
        .collect::<Vec<_>>();

    let column = |name: &str| -> Result<usize, DataError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DataError::Csv(format!("{}: missing column '{name}'", path.display())))
    };
    let idx = [
        column("date")?,
        column("open")?,
        column("high")?,
        column("low")?,
        column("close")?,
        column("volume")?,
    ];

    let mut bars = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| DataError::Csv(e.to_string()))?;
        let field = |i: usize| record.get(idx[i]).unwrap_or("").trim();

        let day = field(0).split([' ', 'T']).next().unwrap_or_default();
        let date = chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .map_err(|e| DataError::Csv(format!("row {row}: bad date '{}': {e}", field(0))))?;
        let price = |i: usize| field(i).parse::<f64>().unwrap_or(f64::NAN);
        let volume = field(5).parse::<f64>().map(|v| v.max(0.0) as u64).unwrap_or(0);

        bars.push(DailyBar {
            date,
            open: price(1),
            high: price(2),
            low: price(3),
            close: price(4),
            volume,
        });
    }

    Ok(bars)
}
