use std::path::Path;

use common::has_file_any_extension;
use tracing::{debug, info};

use super::{ScanContext, ScanStepStats, Scanner};
use crate::catalog::{CatalogRead, WriteSession};
use crate::walk::is_path_in_root;
use crate::LibraryError;

const ORPHAN_BATCH_SIZE: usize = 100;

/// Drops tracks whose file vanished, moved out of the scanned tree or no
/// longer has an accepted extension.
pub(super) fn remove_orphan_tracks(
    scanner: &Scanner,
    context: &mut ScanContext,
    progress: &mut dyn FnMut(&ScanStepStats),
) -> Result<(), LibraryError> {
    let track_paths = scanner.catalog.read()?.track_paths()?;
    debug!("Checking {} tracks", track_paths.len());
    context.current_step.total_elems = track_paths.len();

    for chunk in track_paths.chunks(ORPHAN_BATCH_SIZE) {
        let mut to_remove = Vec::new();
        for (track_id, path) in chunk {
            if scanner.is_aborted() {
                return Ok(());
            }
            if let Some(reason) = orphan_reason(scanner, &context.directory, Path::new(path)) {
                info!("Removing '{}': {}", path, reason);
                to_remove.push(*track_id);
            }
            context.current_step.processed_elems += 1;
        }

        if !to_remove.is_empty() {
            let session = scanner.catalog.write()?;
            let mut removed = 0;
            for track_id in to_remove {
                if session.remove_track(track_id)? {
                    removed += 1;
                }
            }
            session.commit()?;
            context.stats.deletions += removed;
        }
        progress(&context.current_step);
    }
    Ok(())
}

fn orphan_reason(scanner: &Scanner, root: &Path, path: &Path) -> Option<&'static str> {
    let settings = &scanner.settings;
    if !path.is_file() {
        return Some("missing");
    }
    if !is_path_in_root(path, root, &settings.exclude_dir_file_name) {
        return Some("out of media directory");
    }
    if !has_file_any_extension(path, &settings.audio_file_extensions) {
        return Some("file format no longer handled");
    }
    None
}

/// Drops clusters, artists and releases no track refers to anymore.
pub(super) fn remove_orphan_entities(
    scanner: &Scanner,
    context: &mut ScanContext,
) -> Result<(), LibraryError> {
    let clusters = remove_orphans(
        scanner,
        |session, limit| session.orphan_cluster_ids(limit),
        |session, id| session.remove_cluster(id),
    )?;
    let artists = remove_orphans(
        scanner,
        |session, limit| session.orphan_artist_ids(limit),
        |session, id| session.remove_artist(id),
    )?;
    let releases = remove_orphans(
        scanner,
        |session, limit| session.orphan_release_ids(limit),
        |session, id| session.remove_release(id),
    )?;

    let removed = clusters + artists + releases;
    context.current_step.total_elems = removed;
    context.current_step.processed_elems = removed;
    info!(
        "Removed {} orphan clusters, {} orphan artists, {} orphan releases",
        clusters, artists, releases
    );
    Ok(())
}

fn remove_orphans<Id, F, R>(scanner: &Scanner, find: F, remove: R) -> Result<usize, LibraryError>
where
    Id: Copy,
    F: Fn(&WriteSession, usize) -> Result<Vec<Id>, LibraryError>,
    R: Fn(&WriteSession, Id) -> Result<bool, LibraryError>,
{
    let mut total = 0;
    while !scanner.is_aborted() {
        let session = scanner.catalog.write()?;
        let ids = find(&session, ORPHAN_BATCH_SIZE)?;
        if ids.is_empty() {
            session.abort()?;
            break;
        }

        let mut interrupted = false;
        for id in &ids {
            if scanner.is_aborted() {
                interrupted = true;
                break;
            }
            if remove(&session, *id)? {
                total += 1;
            }
        }
        session.commit()?;

        if interrupted || ids.len() < ORPHAN_BATCH_SIZE {
            break;
        }
    }
    Ok(total)
}
