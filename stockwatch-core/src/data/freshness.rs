//! Freshness check for cached series files.
//!
//! A pure predicate over file metadata: it never creates, touches or deletes files.

use std::path::Path;
use std::time::{Duration, SystemTime};

/// Files at or below this size are treated as truncated writes.
pub const DEFAULT_MIN_FILE_BYTES: u64 = 1000;

/// Expiry and sanity thresholds for the freshness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    /// Maximum file age. `None` means cached files never expire.
    pub max_age: Option<Duration>,
    /// A file must be strictly larger than this to count as a valid cache entry.
    pub min_bytes: u64,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            max_age: None,
            min_bytes: DEFAULT_MIN_FILE_BYTES,
        }
    }
}

impl FreshnessPolicy {
    pub fn is_fresh(&self, path: &Path) -> bool {
        self.is_fresh_at(path, SystemTime::now())
    }

    /// Freshness as observed at `now`.
    ///
    /// Fresh iff the file exists, is larger than `min_bytes`, and its age is
    /// strictly below `max_age`. An age of exactly `max_age` is stale. A
    /// modification time in the future counts as age zero.
    pub fn is_fresh_at(&self, path: &Path, now: SystemTime) -> bool {
        let Ok(meta) = path.metadata() else {
            return false;
        };
        if !meta.is_file() || meta.len() <= self.min_bytes {
            return false;
        }
        let Some(max_age) = self.max_age else {
            return true;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        age < max_age
    }
}

/// Freshness check with the default size threshold.
pub fn is_fresh(path: &Path, max_age: Option<Duration>) -> bool {
    FreshnessPolicy {
        max_age,
        ..FreshnessPolicy::default()
    }
    .is_fresh(path)
}

/// [`is_fresh`] observed at a fixed instant.
pub fn is_fresh_at(path: &Path, max_age: Option<Duration>, now: SystemTime) -> bool {
    FreshnessPolicy {
        max_age,
        ..FreshnessPolicy::default()
    }
    .is_fresh_at(path, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_file(dir: &Path, name: &str, bytes: usize) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, vec![b'x'; bytes]).unwrap();
        path
    }

    fn modified(path: &Path) -> SystemTime {
        path.metadata().unwrap().modified().unwrap()
    }

    #[test]
    fn missing_file_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_fresh(&dir.path().join("nope.csv"), None));
    }

    #[test]
    fn small_file_is_stale_even_without_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "tiny.csv", 1000);
        assert!(!is_fresh(&path, None));
        let path = write_file(dir.path(), "ok.csv", 1001);
        assert!(is_fresh(&path, None));
    }

    #[test]
    fn age_exactly_at_threshold_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.csv", 2048);
        let policy = FreshnessPolicy {
            max_age: Some(Duration::from_secs(3600)),
            ..FreshnessPolicy::default()
        };
        let mtime = modified(&path);

        assert!(!policy.is_fresh_at(&path, mtime + Duration::from_secs(3600)));
        assert!(policy.is_fresh_at(&path, mtime + Duration::from_secs(3599)));
    }

    #[test]
    fn ten_minute_old_file_is_fresh_within_an_hour() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.csv", 2048);
        let policy = FreshnessPolicy {
            max_age: Some(Duration::from_secs(3600)),
            ..FreshnessPolicy::default()
        };
        assert!(policy.is_fresh_at(&path, modified(&path) + Duration::from_secs(600)));
    }

    #[test]
    fn check_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "a.csv", 2048);
        let before = modified(&path);
        let policy = FreshnessPolicy {
            max_age: Some(Duration::from_secs(1)),
            ..FreshnessPolicy::default()
        };
        assert!(!policy.is_fresh_at(&path, before + Duration::from_secs(10)));
        assert!(path.exists());
        assert_eq!(modified(&path), before);
    }
}
