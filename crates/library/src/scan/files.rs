use std::mem;
use std::path::{Path, PathBuf};

use common::{has_file_any_extension, path_key, ArtistLinkType, Track, TrackId};
use metadata::{ArtistInfo, TrackMetadata};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::detect::{detect_change, file_last_write_time, ChangeStatus};
use super::{now_secs, ScanContext, ScanError, ScanErrorKind, ScanStats, ScanStepStats, Scanner};
use crate::catalog::{CatalogRead, WriteSession};
use crate::resolve::{resolve_artists, resolve_clusters, resolve_release};
use crate::walk::explore_files_recursive;
use crate::LibraryError;

/// Outcome of the parallel stage for one file. Nothing here touched the
/// catalog beyond a read transaction.
enum FileScan {
    Unreadable(String),
    Unchanged,
    ParseFailed(String),
    Parsed {
        last_write_time: i64,
        metadata: TrackMetadata,
    },
    Failed(LibraryError),
}

pub(super) fn count_files(scanner: &Scanner, context: &mut ScanContext) {
    let settings = &scanner.settings;
    let mut count = 0;
    explore_files_recursive(
        &context.directory,
        &settings.exclude_dir_file_name,
        |err, path| {
            if scanner.is_aborted() {
                return false;
            }
            if err.is_none() && has_file_any_extension(path, &settings.audio_file_extensions) {
                count += 1;
            }
            true
        },
    );
    info!("Found {} audio files", count);
    context.stats.files_to_scan = count;
    context.current_step.total_elems = count;
    context.current_step.processed_elems = count;
}

pub(super) fn scan_files(
    scanner: &Scanner,
    context: &mut ScanContext,
    progress: &mut dyn FnMut(&ScanStepStats),
) -> Result<(), LibraryError> {
    let settings = &scanner.settings;
    context.current_step.total_elems = context.stats.files_to_scan;

    let root = context.directory.clone();
    let mut batch: Vec<(PathBuf, String)> = Vec::with_capacity(settings.batch_size);
    let mut failure = None;

    let completed = explore_files_recursive(&root, &settings.exclude_dir_file_name, |err, path| {
        if scanner.is_aborted() {
            return false;
        }
        let rejected = match err {
            Some(err) => Some((err.to_string(), false)),
            None if !has_file_any_extension(path, &settings.audio_file_extensions) => return true,
            None => match path_key(path) {
                Some(key) => {
                    batch.push((path.to_path_buf(), key.to_string()));
                    None
                }
                None => Some(("path is not valid UTF-8".to_string(), true)),
            },
        };

        if let Some((message, is_audio_file)) = rejected {
            // Keep errors in walk order.
            match scan_batch(scanner, &mut batch, context, progress) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(store_err) => {
                    failure = Some(store_err);
                    return false;
                }
            }
            warn!("Cannot process entry {:?}: {}", path, message);
            if is_audio_file {
                context.stats.skips_on_error += 1;
                context.current_step.processed_elems += 1;
            }
            context.stats.errors.push(ScanError::new(
                path,
                ScanErrorKind::CannotReadFile,
                Some(message),
            ));
            return true;
        }
        if batch.len() < settings.batch_size {
            return true;
        }
        match scan_batch(scanner, &mut batch, context, progress) {
            Ok(keep_going) => keep_going,
            Err(store_err) => {
                failure = Some(store_err);
                false
            }
        }
    });

    if let Some(err) = failure {
        return Err(err);
    }
    if completed {
        scan_batch(scanner, &mut batch, context, progress)?;
    }
    Ok(())
}

/// Prepares the pending files on the worker pool, then reconciles them in
/// walk order. Returns `false` when the run was aborted.
fn scan_batch(
    scanner: &Scanner,
    batch: &mut Vec<(PathBuf, String)>,
    context: &mut ScanContext,
    progress: &mut dyn FnMut(&ScanStepStats),
) -> Result<bool, LibraryError> {
    if batch.is_empty() {
        return Ok(true);
    }
    let files = mem::take(batch);
    let force_scan = context.force_scan;
    let prepared: Vec<FileScan> = scanner.pool.install(|| {
        files
            .par_iter()
            .map(|(path, key)| prepare_file(scanner, path, key, force_scan))
            .collect()
    });

    for ((path, key), scan) in files.iter().zip(prepared) {
        if scanner.is_aborted() {
            return Ok(false);
        }
        let mut extracted = true;
        match scan {
            FileScan::Unreadable(message) => {
                warn!("Cannot read last write time of {:?}: {}", path, message);
                context.stats.skips_on_error += 1;
                context.stats.errors.push(ScanError::new(
                    path,
                    ScanErrorKind::CannotReadFile,
                    Some(message),
                ));
                extracted = false;
            }
            FileScan::Unchanged => {
                context.stats.skips += 1;
                extracted = false;
            }
            FileScan::ParseFailed(message) => {
                warn!("Cannot parse {:?}: {}", path, message);
                context.stats.errors.push(ScanError::new(
                    path,
                    ScanErrorKind::CannotParseFile,
                    Some(message),
                ));
            }
            FileScan::Parsed {
                last_write_time,
                metadata,
            } => {
                context.stats.scans += 1;
                reconcile_file(
                    scanner,
                    path,
                    key,
                    last_write_time,
                    &metadata,
                    &mut context.stats,
                )?;
            }
            FileScan::Failed(err) => return Err(err),
        }

        context.current_step.processed_elems += 1;
        if extracted {
            progress(&context.current_step);
        }
    }
    Ok(true)
}

fn prepare_file(scanner: &Scanner, path: &Path, key: &str, force_scan: bool) -> FileScan {
    let last_write_time = match file_last_write_time(path) {
        Ok(time) => time,
        Err(err) => return FileScan::Unreadable(err.to_string()),
    };

    if !force_scan {
        let status = scanner.catalog.read().and_then(|session| {
            detect_change(
                &session,
                key,
                last_write_time,
                scanner.settings.scan_version,
                false,
            )
        });
        match status {
            Ok(ChangeStatus::Skip) => return FileScan::Unchanged,
            Ok(ChangeStatus::NeedsScan) => {}
            Err(err) => return FileScan::Failed(err),
        }
    }

    match scanner.parser.parse(path) {
        Ok(metadata) => FileScan::Parsed {
            last_write_time,
            metadata,
        },
        Err(err) => FileScan::ParseFailed(err.to_string()),
    }
}

/// Applies one parsed file to the catalog inside a single write transaction.
fn reconcile_file(
    scanner: &Scanner,
    path: &Path,
    key: &str,
    last_write_time: i64,
    metadata: &TrackMetadata,
    stats: &mut ScanStats,
) -> Result<(), LibraryError> {
    let settings = &scanner.settings;
    let session = scanner.catalog.write()?;
    let existing = session.find_track_by_path(key)?;

    if settings.skip_duplicate_recording_mbid {
        if let Some(mbid) = &metadata.recording_mbid {
            let current_id = existing.as_ref().map(|track| track.id);
            let duplicate = session
                .find_tracks_by_recording_mbid(mbid)?
                .into_iter()
                .find(|other| Some(other.id) != current_id);
            if let Some(other) = duplicate {
                debug!(
                    "Skipped {:?} (similar recording MBID in '{}')",
                    path, other.path
                );
                remove_stale(session, existing, stats)?;
                return Ok(());
            }
        }
    }

    if metadata.audio_streams == 0 {
        info!("Skipped {:?} (no audio stream found)", path);
        remove_stale(session, existing, stats)?;
        stats
            .errors
            .push(ScanError::new(path, ScanErrorKind::NoAudioTrack, None));
        return Ok(());
    }
    if metadata.duration_ms == 0 {
        info!("Skipped {:?} (duration is 0)", path);
        remove_stale(session, existing, stats)?;
        stats
            .errors
            .push(ScanError::new(path, ScanErrorKind::BadDuration, None));
        return Ok(());
    }

    let (mut track, added) = match existing {
        Some(track) => (track, false),
        None => (session.create_track(key)?, true),
    };
    apply_metadata(&session, &mut track, path, metadata, last_write_time, settings.scan_version)?;
    session.update_track(&track)?;
    session.commit()?;

    if added {
        info!("Added {:?}", path);
        stats.additions += 1;
    } else {
        info!("Updated {:?}", path);
        stats.updates += 1;
    }
    Ok(())
}

fn remove_stale(
    session: WriteSession,
    existing: Option<Track>,
    stats: &mut ScanStats,
) -> Result<(), LibraryError> {
    let track = match existing {
        Some(track) => track,
        None => return session.abort(),
    };
    session.remove_track(track.id)?;
    session.commit()?;
    info!("Removed {:?}", track.path);
    stats.deletions += 1;
    Ok(())
}

fn apply_metadata(
    session: &WriteSession,
    track: &mut Track,
    path: &Path,
    metadata: &TrackMetadata,
    last_write_time: i64,
    scan_version: u32,
) -> Result<(), LibraryError> {
    session.clear_artist_links(track.id)?;
    // Main and release artists may later gain an MBID through proper
    // tagging, so they never borrow an MBID-tagged namesake.
    link_artists(session, track.id, &metadata.artists, false, ArtistLinkType::Artist)?;
    link_artists(
        session,
        track.id,
        &metadata.album_artists,
        false,
        ArtistLinkType::ReleaseArtist,
    )?;
    link_artists(
        session,
        track.id,
        &metadata.conductor_artists,
        true,
        ArtistLinkType::Conductor,
    )?;
    link_artists(
        session,
        track.id,
        &metadata.composer_artists,
        true,
        ArtistLinkType::Composer,
    )?;
    link_artists(
        session,
        track.id,
        &metadata.lyricist_artists,
        true,
        ArtistLinkType::Lyricist,
    )?;
    link_artists(session, track.id, &metadata.mixer_artists, true, ArtistLinkType::Mixer)?;
    for (role, performers) in &metadata.performer_artists {
        link_artists(
            session,
            track.id,
            performers,
            true,
            ArtistLinkType::Performer { role: role.clone() },
        )?;
    }
    link_artists(
        session,
        track.id,
        &metadata.producer_artists,
        true,
        ArtistLinkType::Producer,
    )?;
    link_artists(
        session,
        track.id,
        &metadata.remixer_artists,
        true,
        ArtistLinkType::Remixer,
    )?;

    track.scan_version = scan_version;
    track.release_id = match &metadata.album {
        Some(album) => resolve_release(session, album)?.map(|release| release.id),
        None => None,
    };
    track.cluster_ids = resolve_clusters(session, &metadata.clusters)?
        .into_iter()
        .map(|cluster| cluster.id)
        .collect();
    track.last_write_time = last_write_time;
    track.name = if metadata.title.is_empty() {
        path.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| track.path.clone())
    } else {
        metadata.title.clone()
    };
    track.duration_ms = metadata.duration_ms;
    track.added_time = now_secs();
    track.track_number = metadata.track_number;
    track.disc_number = metadata.disc_number;
    track.total_track = metadata.total_track;
    track.total_disc = metadata.total_disc;
    track.disc_subtitle = metadata.disc_subtitle.clone();
    track.date = metadata.date.or(metadata.original_date);
    track.original_date = metadata.original_date;
    track.recording_mbid = metadata.recording_mbid.clone();
    track.track_mbid = metadata.track_mbid.clone();
    session.remove_track_features(track.id)?;
    track.has_cover = metadata.has_cover;
    track.copyright = metadata.copyright.clone();
    track.copyright_url = metadata.copyright_url.clone();
    track.track_replay_gain = metadata.track_replay_gain;
    track.release_replay_gain = metadata.album_replay_gain;
    Ok(())
}

fn link_artists(
    session: &WriteSession,
    track_id: TrackId,
    infos: &[ArtistInfo],
    allow_fallback_on_tagged_entries: bool,
    link_type: ArtistLinkType,
) -> Result<(), LibraryError> {
    for artist in resolve_artists(session, infos, allow_fallback_on_tagged_entries)? {
        session.add_artist_link(track_id, artist.id, link_type.clone())?;
    }
    Ok(())
}
