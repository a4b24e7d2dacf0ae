//! Run audit log: JSONL, one record per market run, append-only.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::provider::DataError;
use super::summary::RunSummary;
use crate::domain::Market;

pub const AUDIT_FILE: &str = "audit.jsonl";

/// Outcome of one run, as kept for trend queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub market: Market,
    pub total: usize,
    pub success: usize,
    pub fail: usize,
    /// Percent of units with data on disk.
    pub success_rate: f64,
}

impl AuditRecord {
    pub fn from_summary(summary: &RunSummary, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            market: summary.market,
            total: summary.total,
            success: summary.ok(),
            fail: summary.fail(),
            success_rate: (summary.coverage() * 10.0).round() / 10.0,
        }
    }
}

/// Append-only JSONL file of [`AuditRecord`]s.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The log at `<data_root>/audit.jsonl`.
    pub fn under(data_root: &Path) -> Self {
        Self::new(data_root.join(AUDIT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &AuditRecord) -> Result<(), DataError> {
        let json = serde_json::to_string(record)
            .map_err(|e| DataError::Other(format!("failed to serialize audit record: {e}")))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DataError::io(&self.path, e))?;

        writeln!(file, "{json}").map_err(|e| DataError::io(&self.path, e))?;
        file.flush().map_err(|e| DataError::io(&self.path, e))
    }

    /// Every record in file order. Malformed lines are skipped.
    pub fn read_all(&self) -> Result<Vec<AuditRecord>, DataError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.path).map_err(|e| DataError::io(&self.path, e))?;
        let mut records = Vec::new();
        for line in io::BufReader::new(file).lines() {
            let line = line.map_err(|e| DataError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::debug!(error = %e, "skipping malformed audit line"),
            }
        }
        Ok(records)
    }
}
