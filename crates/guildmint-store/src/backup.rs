//! Online backups, rotation, restore and auto-recovery.
//!
//! Snapshots are sibling files named `db_backup_YYYYMMDD_HHMMSS.sqlite3`,
//! produced with SQLite's online-backup API so the live handle never closes.
//! Restores first copy the (possibly corrupt) live file aside as
//! `pre_restore_YYYYMMDD_HHMMSS.bak`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::backup::Backup;
use rusqlite::Connection;
use tracing::{error, info, warn};

use guildmint_core::time::backup_suffix;
use guildmint_core::MintError;

use crate::store::{open_read_only, Store};

const BACKUP_PREFIX: &str = "db_backup_";
const BACKUP_EXT: &str = "sqlite3";

/// Create a snapshot of `store` in `dir`, verify it, and return its path.
/// The snapshot is deleted again if verification fails.
pub fn create_backup(
    store: &Store,
    dir: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf, MintError> {
    fs::create_dir_all(dir)
        .map_err(|e| MintError::Backup(format!("creating {}: {e}", dir.display())))?;

    let dest = dir.join(format!("{BACKUP_PREFIX}{}.{BACKUP_EXT}", backup_suffix(now)));

    store.with_conn(|src| {
        let mut dst = Connection::open(&dest)?;
        let backup = Backup::new(src, &mut dst)?;
        backup
            .run_to_completion(64, std::time::Duration::from_millis(10), None)
            .map_err(|e| MintError::Backup(format!("snapshot failed: {e}")))?;
        Ok(())
    })?;

    if !verify_backup(&dest) {
        let _ = fs::remove_file(&dest);
        return Err(MintError::Backup(format!(
            "snapshot {} failed integrity verification",
            dest.display()
        )));
    }

    info!(snapshot = %dest.display(), "backup created");
    Ok(dest)
}

/// Open a snapshot read-only and run the integrity check on it.
pub fn verify_backup(path: &Path) -> bool {
    let Ok(conn) = open_read_only(path) else {
        return false;
    };
    matches!(
        conn.query_row("PRAGMA integrity_check", [], |row| row.get::<_, String>(0)),
        Ok(verdict) if verdict == "ok"
    )
}

/// All snapshots in `dir`, oldest first (the timestamp suffix sorts).
pub fn list_backups(dir: &Path) -> Result<Vec<PathBuf>, MintError> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(out),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with(BACKUP_PREFIX) && name.ends_with(&format!(".{BACKUP_EXT}")) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Delete the oldest snapshots until at most `max` remain.
/// Returns how many were removed.
pub fn rotate_backups(dir: &Path, max: usize) -> Result<usize, MintError> {
    let backups = list_backups(dir)?;
    if backups.len() <= max {
        return Ok(0);
    }
    let excess = backups.len() - max;
    for old in &backups[..excess] {
        fs::remove_file(old)
            .map_err(|e| MintError::Backup(format!("removing {}: {e}", old.display())))?;
        info!(removed = %old.display(), "rotated old backup");
    }
    Ok(excess)
}

/// Integrity-check the database file at `path` without opening a `Store`.
pub fn check_database_corruption(path: &Path) -> Result<(), MintError> {
    let conn = open_read_only(path)?;
    let verdict: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if verdict == "ok" {
        Ok(())
    } else {
        Err(MintError::Corruption(verdict))
    }
}

/// Replace the live file at `db_path` with the snapshot at `backup_path`.
/// The existing live file is copied aside first.
pub fn restore_backup(
    db_path: &Path,
    backup_path: &Path,
    now: DateTime<Utc>,
) -> Result<(), MintError> {
    if !verify_backup(backup_path) {
        return Err(MintError::Backup(format!(
            "refusing restore: snapshot {} is not valid",
            backup_path.display()
        )));
    }

    if db_path.exists() {
        let aside = db_path.with_file_name(format!("pre_restore_{}.bak", backup_suffix(now)));
        fs::copy(db_path, &aside)
            .map_err(|e| MintError::Backup(format!("saving pre-restore copy: {e}")))?;
        info!(saved = %aside.display(), "pre-restore copy of live database saved");
    }

    fs::copy(backup_path, db_path)
        .map_err(|e| MintError::Backup(format!("restoring snapshot: {e}")))?;
    info!(from = %backup_path.display(), "database restored from snapshot");
    Ok(())
}

/// Startup recovery: if the live file is corrupt, restore the newest
/// snapshot that verifies. Returns `true` when a restore happened.
pub fn auto_recover(
    db_path: &Path,
    backup_dir: &Path,
    now: DateTime<Utc>,
) -> Result<bool, MintError> {
    match check_database_corruption(db_path) {
        Ok(()) => return Ok(false),
        Err(e) => warn!(error = %e, "database failed corruption check — attempting recovery"),
    }

    let mut backups = list_backups(backup_dir)?;
    backups.reverse(); // newest first
    for candidate in &backups {
        if verify_backup(candidate) {
            restore_backup(db_path, candidate, now)?;
            return Ok(true);
        }
        warn!(snapshot = %candidate.display(), "skipping invalid snapshot");
    }

    error!("no valid snapshot available for recovery");
    Err(MintError::Backup("no valid snapshot available".into()))
}
