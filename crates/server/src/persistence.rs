//! Per-device JSON snapshot storage with rotating numbered backups (§4.8).
//! The rotation/atomic-rename shape mirrors the backup scheme the teacher
//! used for its SQLite database, adapted here to one small JSON file per
//! device instead of one shared database file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{de::DeserializeOwned, Serialize};

pub const DEFAULT_BACKUP_COUNT: usize = 20;

fn live_path(dir: &Path, device_id: &str) -> PathBuf {
    dir.join(format!("plantcube-{device_id}.json"))
}

fn backup_path(dir: &Path, device_id: &str, n: usize) -> PathBuf {
    dir.join(format!("plantcube-{device_id}-backup-{n}.json"))
}

/// Rotates `backup-(n-2) -> backup-(n-1)`, ..., `backup-0 -> backup-1`, then
/// `live -> backup-0`. Missing backup files are tolerated until the first one
/// is found; a gap after that point means the rotation chain was damaged and
/// is treated as an error rather than silently skipped.
fn rotate(dir: &Path, device_id: &str, backup_count: usize) -> Result<()> {
    let mut seen_any = false;
    for n in (0..backup_count.saturating_sub(1)).rev() {
        let from = backup_path(dir, device_id, n);
        let to = backup_path(dir, device_id, n + 1);
        match std::fs::rename(&from, &to) {
            Ok(()) => seen_any = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if seen_any {
                    bail!(
                        "backup rotation gap: {} missing while later backups exist",
                        from.display()
                    );
                }
            }
            Err(e) => {
                return Err(e).with_context(|| format!("rotate {} -> {}", from.display(), to.display()))
            }
        }
    }
    let live = live_path(dir, device_id);
    if live.exists() {
        std::fs::rename(&live, backup_path(dir, device_id, 0))
            .with_context(|| format!("rotate live snapshot -> backup-0 for {device_id}"))?;
    }
    Ok(())
}

/// Rotates backups, then writes `snapshot` as the new live file. A save
/// failure here is an operational error (§7): the caller treats it as
/// fatal for the owning device's worker task.
pub fn save<T: Serialize>(dir: &Path, device_id: &str, backup_count: usize, snapshot: &T) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("create persistence dir {}", dir.display()))?;
    rotate(dir, device_id, backup_count)?;
    let json = serde_json::to_vec_pretty(snapshot).context("serialize device snapshot")?;
    std::fs::write(live_path(dir, device_id), json)
        .with_context(|| format!("write snapshot for device {device_id}"))?;
    Ok(())
}

/// Strict restore: unknown fields in the stored JSON, or trailing bytes
/// after it, both reject rather than silently ignore.
pub fn load<T: DeserializeOwned>(dir: &Path, device_id: &str) -> Result<Option<T>> {
    let path = live_path(dir, device_id);
    if !path.exists() {
        return Ok(None);
    }
    let raw =
        std::fs::read_to_string(&path).with_context(|| format!("read snapshot {}", path.display()))?;
    let snapshot: T =
        serde_json::from_str(&raw).with_context(|| format!("parse snapshot {}", path.display()))?;
    Ok(Some(snapshot))
}
