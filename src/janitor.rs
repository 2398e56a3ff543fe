//! Storage janitor.
//!
//! Keeps the combined size of the public and evidence roots under the
//! configured budget by deleting the oldest files first. Runs on the
//! engine's supervisor thread on a fixed cadence; never coupled to any
//! request path.

use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::Result;

pub struct StorageJanitor {
    roots: Vec<PathBuf>,
    max_total_bytes: u64,
}

impl StorageJanitor {
    pub fn new(roots: Vec<PathBuf>, max_storage_gb: u64) -> Self {
        Self {
            roots,
            max_total_bytes: max_storage_gb.saturating_mul(1024 * 1024 * 1024),
        }
    }

    #[cfg(test)]
    fn with_byte_budget(roots: Vec<PathBuf>, max_total_bytes: u64) -> Self {
        Self {
            roots,
            max_total_bytes,
        }
    }

    /// Delete oldest files until the combined size fits the budget.
    /// Returns the number of files removed.
    pub fn enforce(&self) -> Result<usize> {
        let mut files: Vec<(SystemTime, u64, PathBuf)> = Vec::new();
        let mut total: u64 = 0;
        for root in &self.roots {
            let entries = match fs::read_dir(root) {
                Ok(entries) => entries,
                Err(_) => continue, // root not created yet
            };
            for entry in entries.flatten() {
                let Ok(meta) = entry.metadata() else {
                    continue;
                };
                if !meta.is_file() {
                    continue;
                }
                let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                total += meta.len();
                files.push((mtime, meta.len(), entry.path()));
            }
        }
        if total <= self.max_total_bytes {
            return Ok(0);
        }

        files.sort_by_key(|(mtime, _, _)| *mtime);
        let mut removed = 0usize;
        for (_, size, path) in files {
            if total <= self.max_total_bytes {
                break;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    total = total.saturating_sub(size);
                    removed += 1;
                    log::info!("storage janitor removed {}", path.display());
                }
                Err(e) => log::warn!("storage janitor could not remove {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }
}
