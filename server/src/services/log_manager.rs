// LogManager Service
// Server log file location and retention cleanup

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Name of the active server log file
pub const LOG_FILE_NAME: &str = "testcard-server.log";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE_NAME)
}

/// Remove `.log` files last modified more than `retention_days` ago.
/// The active log file is never removed. A retention of zero disables pruning.
/// Returns the removed paths.
pub fn prune_logs(log_dir: &Path, retention_days: u32) -> Result<Vec<PathBuf>, String> {
    if retention_days == 0 || !log_dir.exists() {
        return Ok(Vec::new());
    }

    let retention = Duration::from_secs(u64::from(retention_days) * SECS_PER_DAY);
    let cutoff = SystemTime::now()
        .checked_sub(retention)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let entries = fs::read_dir(log_dir)
        .map_err(|e| format!("Failed to read log dir {}: {e}", log_dir.display()))?;

    let removed = entries
        .flatten()
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "log"))
        .filter(|entry| entry.file_name() != LOG_FILE_NAME)
        .filter(|entry| {
            entry
                .metadata()
                .and_then(|metadata| metadata.modified())
                .map(|modified| modified < cutoff)
                .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .filter(|path| fs::remove_file(path).is_ok())
        .collect();

    Ok(removed)
}
