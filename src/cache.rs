//! # Tile Cache Manager
//!
//! Keeps the tile directory under a byte ceiling. Eviction is LRU driven by
//! filesystem access times: one directory scan per batch request, oldest
//! files deleted first until usage drops below the low-water mark.
//!
//! Nothing else in the crate deletes cache files. Failures while scanning or
//! deleting are logged and skipped; the next pre-flight pass retries them.
//!
//! Temporary files left behind by interrupted tile writes are counted once
//! they are older than [`STALE_TEMP_GRACE`] and evicted before any tile.

use crate::error::{Result, TilerError};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs::{self, FileTimes, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

/// Age after which an in-flight temporary file is treated as abandoned.
pub const STALE_TEMP_GRACE: Duration = Duration::from_secs(15 * 60);

/// A file in the cache directory, as seen by the last scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub size: u64,
    pub accessed: SystemTime,
}

/// Result of one directory scan, entries oldest access first.
#[derive(Debug, Clone, Default)]
pub struct CacheScan {
    pub total_bytes: u64,
    pub entries: Vec<CacheEntry>,
}

/// Outcome of [`TileCacheManager::ensure_capacity`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub scanned_files: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    /// True when usage was at or above the high-water mark.
    pub triggered: bool,
    pub evicted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl EvictionReport {
    pub fn freed_bytes(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Size-bounded tile directory.
#[derive(Debug, Clone)]
pub struct TileCacheManager {
    dir: PathBuf,
    high_water_bytes: u64,
    low_water_bytes: u64,
    temp_grace: Duration,
}

fn is_temporary(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true)
}

impl TileCacheManager {
    pub fn new<P: Into<PathBuf>>(dir: P, high_water_bytes: u64, low_water_bytes: u64) -> Self {
        TileCacheManager {
            dir: dir.into(),
            high_water_bytes,
            low_water_bytes,
            temp_grace: STALE_TEMP_GRACE,
        }
    }

    pub fn with_temp_grace(mut self, grace: Duration) -> Self {
        self.temp_grace = grace;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn high_water_bytes(&self) -> u64 {
        self.high_water_bytes
    }

    pub fn low_water_bytes(&self) -> u64 {
        self.low_water_bytes
    }

    /// Lists regular files with their size and last access time.
    ///
    /// A missing directory is an empty cache. Temporary files (dot files)
    /// modified within the grace period are in flight and not listed; older
    /// ones are listed with the epoch as access time so they go first.
    pub fn scan(&self) -> Result<CacheScan> {
        if !self.dir.exists() {
            return Ok(CacheScan::default());
        }

        let now = SystemTime::now();
        let mut scan = CacheScan::default();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| TilerError::CacheIo {
                path: self.dir.clone(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            let accessed = if is_temporary(entry.path()) {
                let age = metadata
                    .modified()
                    .ok()
                    .and_then(|m| now.duration_since(m).ok())
                    .unwrap_or_default();
                if age < self.temp_grace {
                    continue;
                }
                debug!("Stale temporary file {}", entry.path().display());
                SystemTime::UNIX_EPOCH
            } else {
                metadata
                    .accessed()
                    .or_else(|_| metadata.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH)
            };
            scan.total_bytes += metadata.len();
            scan.entries.push(CacheEntry {
                path: entry.into_path(),
                size: metadata.len(),
                accessed,
            });
        }

        scan.entries
            .sort_by(|a, b| a.accessed.cmp(&b.accessed).then_with(|| a.path.cmp(&b.path)));
        Ok(scan)
    }

    /// Total bytes currently in the cache directory.
    pub fn usage(&self) -> Result<u64> {
        Ok(self.scan()?.total_bytes)
    }

    /// Pre-flight eviction.
    ///
    /// No-op while usage is below the high-water mark. Otherwise deletes the
    /// least recently accessed files one at a time until usage is below the
    /// low-water mark or nothing is left. Never fails: scan and delete errors
    /// are logged and left for the next call.
    pub fn ensure_capacity(&self) -> EvictionReport {
        let scan = match self.scan() {
            Ok(scan) => scan,
            Err(e) => {
                warn!("Cache scan failed, skipping eviction: {}", e);
                return EvictionReport::default();
            }
        };

        let mut report = EvictionReport {
            scanned_files: scan.entries.len(),
            bytes_before: scan.total_bytes,
            bytes_after: scan.total_bytes,
            ..Default::default()
        };
        if scan.total_bytes < self.high_water_bytes {
            debug!(
                "Cache at {} bytes, below high-water mark {}",
                scan.total_bytes, self.high_water_bytes
            );
            return report;
        }

        report.triggered = true;
        let mut total = scan.total_bytes;
        for entry in scan.entries {
            if total < self.low_water_bytes {
                break;
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    total = total.saturating_sub(entry.size);
                    debug!("Evicted {} ({} bytes)", entry.path.display(), entry.size);
                    report.evicted.push(entry.path);
                }
                Err(e) => {
                    warn!("Failed to evict {}: {}", entry.path.display(), e);
                    report.failed.push(entry.path);
                }
            }
        }
        report.bytes_after = total;

        info!(
            "Cache eviction removed {} files, {} -> {} bytes",
            report.evicted.len(),
            report.bytes_before,
            report.bytes_after
        );
        report
    }

    /// Refreshes a file's access time after serving it.
    pub fn touch(&self, path: &Path) -> Result<()> {
        let io_error = |source| TilerError::CacheIo {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new().write(true).open(path).map_err(io_error)?;
        file.set_times(FileTimes::new().set_accessed(SystemTime::now()))
            .map_err(io_error)
    }

    /// First cached file whose name starts with `prefix`.
    pub fn find_by_prefix(&self, prefix: &str) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.dir).ok()?;
        let mut matches: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
            .map(|e| e.path())
            .collect();
        matches.sort();
        matches.into_iter().next()
    }
}
