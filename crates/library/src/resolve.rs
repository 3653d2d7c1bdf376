use common::{Artist, Cluster, Release};
use metadata::{AlbumInfo, ArtistInfo, Clusters};
use tracing::debug;

use crate::catalog::{CatalogRead, WriteSession};
use crate::LibraryError;

/// Finds or creates one artist per entry, in input order.
///
/// An MBID always wins. Without one, the first same-named artist is reused,
/// skipping MBID-tagged artists unless `allow_fallback_on_tagged_entries`.
/// Entries with neither a name nor an MBID are dropped.
pub fn resolve_artists(
    session: &WriteSession,
    infos: &[ArtistInfo],
    allow_fallback_on_tagged_entries: bool,
) -> Result<Vec<Artist>, LibraryError> {
    let mut artists = Vec::with_capacity(infos.len());
    for info in infos {
        if let Some(mbid) = &info.mbid {
            let artist = match session.find_artist_by_mbid(mbid)? {
                Some(existing) => update_artist_if_needed(session, existing, info)?,
                None => {
                    session.create_artist(&info.name, info.sort_name.clone(), Some(mbid.clone()))?
                }
            };
            artists.push(artist);
            continue;
        }

        if info.name.is_empty() {
            continue;
        }

        let fallback = session
            .find_artists_by_name(&info.name)?
            .into_iter()
            .find(|candidate| allow_fallback_on_tagged_entries || candidate.mbid.is_none());
        let artist = match fallback {
            Some(existing) => update_artist_if_needed(session, existing, info)?,
            None => session.create_artist(&info.name, info.sort_name.clone(), None)?,
        };
        artists.push(artist);
    }
    Ok(artists)
}

fn update_artist_if_needed(
    session: &WriteSession,
    mut artist: Artist,
    info: &ArtistInfo,
) -> Result<Artist, LibraryError> {
    let mut changed = false;
    if artist.name != info.name {
        debug!("Renaming artist {} from '{}' to '{}'", artist.id, artist.name, info.name);
        artist.name = info.name.clone();
        changed = true;
    }
    if let Some(sort_name) = &info.sort_name {
        if artist.sort_name.as_ref() != Some(sort_name) {
            artist.sort_name = Some(sort_name.clone());
            changed = true;
        }
    }
    if changed {
        session.update_artist(&artist)?;
    }
    Ok(artist)
}

/// Finds or creates the release for an album tag. MBID-tagged releases are
/// never reused by name.
pub fn resolve_release(
    session: &WriteSession,
    album: &AlbumInfo,
) -> Result<Option<Release>, LibraryError> {
    if let Some(mbid) = &album.mbid {
        let release = match session.find_release_by_mbid(mbid)? {
            Some(mut existing) => {
                if existing.name != album.name {
                    existing.name = album.name.clone();
                    session.update_release(&existing)?;
                }
                existing
            }
            None => session.create_release(&album.name, Some(mbid.clone()))?,
        };
        return Ok(Some(release));
    }

    if album.name.is_empty() {
        return Ok(None);
    }

    let fallback = session
        .find_releases_by_name(&album.name)?
        .into_iter()
        .find(|candidate| candidate.mbid.is_none());
    let release = match fallback {
        Some(existing) => existing,
        None => session.create_release(&album.name, None)?,
    };
    Ok(Some(release))
}

/// Finds or creates clusters under already provisioned cluster types.
/// Values tagged under an unknown type are ignored.
pub fn resolve_clusters(
    session: &WriteSession,
    clusters: &Clusters,
) -> Result<Vec<Cluster>, LibraryError> {
    let mut out = Vec::new();
    for (type_name, names) in clusters {
        let cluster_type = match session.find_cluster_type_by_name(type_name)? {
            Some(cluster_type) => cluster_type,
            None => continue,
        };
        for name in names {
            let cluster = match session.find_cluster_by_name(cluster_type.id, name)? {
                Some(cluster) => cluster,
                None => session.create_cluster(cluster_type.id, name)?,
            };
            out.push(cluster);
        }
    }
    Ok(out)
}
