use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::catalog::CatalogRead;
use crate::LibraryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeStatus {
    NeedsScan,
    Skip,
}

/// Whole seconds since the unix epoch, negative before it.
pub fn file_last_write_time(path: &Path) -> io::Result<i64> {
    let modified = fs::metadata(path)?.modified()?;
    let secs = match modified.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX),
    };
    Ok(secs)
}

/// A cataloged file is skipped only when both its last-write time and the
/// scan version it was written with are current.
pub fn detect_change(
    session: &impl CatalogRead,
    path_key: &str,
    last_write_time: i64,
    scan_version: u32,
    force_scan: bool,
) -> Result<ChangeStatus, LibraryError> {
    if force_scan {
        return Ok(ChangeStatus::NeedsScan);
    }
    let status = match session.find_track_by_path(path_key)? {
        Some(track)
            if track.last_write_time == last_write_time && track.scan_version == scan_version =>
        {
            ChangeStatus::Skip
        }
        _ => ChangeStatus::NeedsScan,
    };
    Ok(status)
}
