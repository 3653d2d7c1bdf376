use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{
    Artist, ArtistId, ArtistLink, ArtistLinkId, ArtistLinkType, Cluster, ClusterId, ClusterType,
    ClusterTypeId, Mbid, Release, ReleaseId, Track, TrackId,
};
use redb::{
    Database, Key, MultimapTableDefinition, MultimapValue, ReadTransaction,
    ReadableMultimapTable, ReadableTable, ReadableTableMetadata, TableDefinition, Value,
    WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::LibraryError;

const INDEX_VERSION: u32 = 1;
/// Bumped whenever reconciliation writes tracks differently.
pub const SCAN_LOGIC_VERSION: u32 = 1;
const KEY_SEP: char = '\x1f';

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const SEQUENCES_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sequences");
const TRACKS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("tracks");
const TRACKS_BY_PATH_TABLE: TableDefinition<&str, u64> = TableDefinition::new("tracks_by_path");
const TRACKS_BY_RECORDING_TABLE: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("tracks_by_recording_mbid");
const TRACK_FEATURES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("track_features");
const ARTISTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("artists");
const ARTISTS_BY_MBID_TABLE: TableDefinition<&str, u64> = TableDefinition::new("artists_by_mbid");
const ARTISTS_BY_NAME_TABLE: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("artists_by_name");
const RELEASES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("releases");
const RELEASES_BY_MBID_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("releases_by_mbid");
const RELEASES_BY_NAME_TABLE: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("releases_by_name");
const RELEASE_TRACKS_TABLE: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("release_tracks");
const CLUSTER_TYPES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("cluster_types");
const CLUSTER_TYPES_BY_NAME_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("cluster_types_by_name");
const CLUSTERS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("clusters");
const CLUSTERS_BY_KEY_TABLE: TableDefinition<&str, u64> = TableDefinition::new("clusters_by_key");
const CLUSTER_TRACKS_TABLE: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("cluster_tracks");
const LINKS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("artist_links");
const TRACK_LINKS_TABLE: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("track_artist_links");
const ARTIST_LINKS_TABLE: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("artist_track_links");

const META_VERSION_KEY: &str = "version";
const META_SCAN_SETTINGS_KEY: &str = "scan_settings";

/// Persisted scan state. `scan_version` is the stamp written on every track.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSettingsRecord {
    pub scan_version: u32,
    pub logic_version: u32,
    pub cluster_type_names: Vec<String>,
}

#[derive(Clone)]
pub struct Catalog {
    db: Arc<Database>,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };
        Self::with_db(Arc::new(db))
    }

    pub fn with_db(db: Arc<Database>) -> Result<Self, LibraryError> {
        let catalog = Self { db };
        catalog.init_tables()?;
        Ok(catalog)
    }

    /// Shared transaction. Any number of readers may coexist with a writer.
    pub fn read(&self) -> Result<ReadSession, LibraryError> {
        Ok(ReadSession {
            txn: self.db.begin_read()?,
        })
    }

    /// Unique transaction. Blocks while another write session is open.
    pub fn write(&self) -> Result<WriteSession, LibraryError> {
        Ok(WriteSession {
            txn: self.db.begin_write()?,
        })
    }

    pub fn db(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    /// Persists the configured cluster type names, provisions the missing
    /// cluster types and bumps the scan version when anything that changes
    /// how tracks are written differs from the last run.
    pub fn sync_scan_settings(
        &self,
        cluster_type_names: &[String],
    ) -> Result<ScanSettingsRecord, LibraryError> {
        let mut names: Vec<String> = cluster_type_names
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        names.dedup();

        let session = self.write()?;
        let mut settings = session.scan_settings()?;
        let mut changed = false;
        if settings.cluster_type_names != names {
            settings.cluster_type_names = names.clone();
            changed = true;
        }
        if settings.logic_version != SCAN_LOGIC_VERSION {
            settings.logic_version = SCAN_LOGIC_VERSION;
            changed = true;
        }
        if changed {
            settings.scan_version += 1;
            info!("Scan version is now {}", settings.scan_version);
            session.save_scan_settings(&settings)?;
        }

        for name in &names {
            if session.find_cluster_type_by_name(name)?.is_none() {
                session.create_cluster_type(name)?;
                info!("Provisioned cluster type '{}'", name);
            }
        }
        session.commit()?;
        Ok(settings)
    }

    fn init_tables(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(SEQUENCES_TABLE)?;
            let _ = write_txn.open_table(TRACKS_TABLE)?;
            let _ = write_txn.open_table(TRACKS_BY_PATH_TABLE)?;
            let _ = write_txn.open_multimap_table(TRACKS_BY_RECORDING_TABLE)?;
            let _ = write_txn.open_table(TRACK_FEATURES_TABLE)?;
            let _ = write_txn.open_table(ARTISTS_TABLE)?;
            let _ = write_txn.open_table(ARTISTS_BY_MBID_TABLE)?;
            let _ = write_txn.open_multimap_table(ARTISTS_BY_NAME_TABLE)?;
            let _ = write_txn.open_table(RELEASES_TABLE)?;
            let _ = write_txn.open_table(RELEASES_BY_MBID_TABLE)?;
            let _ = write_txn.open_multimap_table(RELEASES_BY_NAME_TABLE)?;
            let _ = write_txn.open_multimap_table(RELEASE_TRACKS_TABLE)?;
            let _ = write_txn.open_table(CLUSTER_TYPES_TABLE)?;
            let _ = write_txn.open_table(CLUSTER_TYPES_BY_NAME_TABLE)?;
            let _ = write_txn.open_table(CLUSTERS_TABLE)?;
            let _ = write_txn.open_table(CLUSTERS_BY_KEY_TABLE)?;
            let _ = write_txn.open_multimap_table(CLUSTER_TRACKS_TABLE)?;
            let _ = write_txn.open_table(LINKS_TABLE)?;
            let _ = write_txn.open_multimap_table(TRACK_LINKS_TABLE)?;
            let _ = write_txn.open_multimap_table(ARTIST_LINKS_TABLE)?;

            let mut meta_table = write_txn.open_table(META_TABLE)?;
            let stored: Option<u32> = match meta_table.get(META_VERSION_KEY)? {
                Some(value) => Some(decode_value(value.value())?),
                None => None,
            };
            match stored {
                Some(version) if version == INDEX_VERSION => {}
                Some(version) => return Err(LibraryError::VersionMismatch(version)),
                None => {
                    let bytes = encode_value(&INDEX_VERSION)?;
                    meta_table.insert(META_VERSION_KEY, bytes.as_slice())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// A transaction that catalog tables can be opened from.
pub trait TableSource {
    fn table<K: Key + 'static, V: Value + 'static>(
        &self,
        definition: TableDefinition<'static, K, V>,
    ) -> Result<impl ReadableTable<K, V> + ReadableTableMetadata + '_, LibraryError>;

    fn multimap_table<K: Key + 'static, V: Key + 'static>(
        &self,
        definition: MultimapTableDefinition<'static, K, V>,
    ) -> Result<impl ReadableMultimapTable<K, V> + '_, LibraryError>;
}

impl TableSource for ReadTransaction {
    fn table<K: Key + 'static, V: Value + 'static>(
        &self,
        definition: TableDefinition<'static, K, V>,
    ) -> Result<impl ReadableTable<K, V> + ReadableTableMetadata + '_, LibraryError> {
        Ok(self.open_table(definition)?)
    }

    fn multimap_table<K: Key + 'static, V: Key + 'static>(
        &self,
        definition: MultimapTableDefinition<'static, K, V>,
    ) -> Result<impl ReadableMultimapTable<K, V> + '_, LibraryError> {
        Ok(self.open_multimap_table(definition)?)
    }
}

impl TableSource for WriteTransaction {
    fn table<K: Key + 'static, V: Value + 'static>(
        &self,
        definition: TableDefinition<'static, K, V>,
    ) -> Result<impl ReadableTable<K, V> + ReadableTableMetadata + '_, LibraryError> {
        Ok(self.open_table(definition)?)
    }

    fn multimap_table<K: Key + 'static, V: Key + 'static>(
        &self,
        definition: MultimapTableDefinition<'static, K, V>,
    ) -> Result<impl ReadableMultimapTable<K, V> + '_, LibraryError> {
        Ok(self.open_multimap_table(definition)?)
    }
}

/// Lookups available inside both shared and unique transactions.
pub trait CatalogRead {
    type Source: TableSource;

    fn source(&self) -> &Self::Source;

    fn find_track(&self, id: TrackId) -> Result<Option<Track>, LibraryError> {
        let table = self.source().table(TRACKS_TABLE)?;
        get_entity(&table, id.0)
    }

    fn find_track_by_path(&self, path: &str) -> Result<Option<Track>, LibraryError> {
        let id = {
            let index = self.source().table(TRACKS_BY_PATH_TABLE)?;
            let id = index.get(path)?.map(|value| value.value());
            id
        };
        match id {
            Some(id) => self
                .find_track(TrackId(id))?
                .map(Some)
                .ok_or_else(|| missing("track", id)),
            None => Ok(None),
        }
    }

    fn find_tracks_by_recording_mbid(&self, mbid: &Mbid) -> Result<Vec<Track>, LibraryError> {
        let ids = {
            let index = self.source().multimap_table(TRACKS_BY_RECORDING_TABLE)?;
            let ids = collect_ids(index.get(mbid.as_str())?)?;
            ids
        };
        ids.into_iter()
            .map(|id| self.find_track(TrackId(id))?.ok_or_else(|| missing("track", id)))
            .collect()
    }

    /// Every cataloged track id with its path.
    fn track_paths(&self) -> Result<Vec<(TrackId, String)>, LibraryError> {
        let index = self.source().table(TRACKS_BY_PATH_TABLE)?;
        let mut out = Vec::new();
        for entry in index.iter()? {
            let (key, value) = entry?;
            out.push((TrackId(value.value()), key.value().to_string()));
        }
        Ok(out)
    }

    fn track_artist_links(&self, track_id: TrackId) -> Result<Vec<ArtistLink>, LibraryError> {
        let ids = {
            let index = self.source().multimap_table(TRACK_LINKS_TABLE)?;
            let ids = collect_ids(index.get(track_id.0)?)?;
            ids
        };
        let table = self.source().table(LINKS_TABLE)?;
        let mut links = Vec::with_capacity(ids.len());
        for id in ids {
            let link = get_entity(&table, id)?.ok_or_else(|| missing("artist link", id))?;
            links.push(link);
        }
        Ok(links)
    }

    fn track_features(&self, track_id: TrackId) -> Result<Option<Vec<u8>>, LibraryError> {
        let table = self.source().table(TRACK_FEATURES_TABLE)?;
        let features = table.get(track_id.0)?.map(|value| value.value().to_vec());
        Ok(features)
    }

    fn find_artist(&self, id: ArtistId) -> Result<Option<Artist>, LibraryError> {
        let table = self.source().table(ARTISTS_TABLE)?;
        get_entity(&table, id.0)
    }

    fn find_artist_by_mbid(&self, mbid: &Mbid) -> Result<Option<Artist>, LibraryError> {
        let id = {
            let index = self.source().table(ARTISTS_BY_MBID_TABLE)?;
            let id = index.get(mbid.as_str())?.map(|value| value.value());
            id
        };
        match id {
            Some(id) => self
                .find_artist(ArtistId(id))?
                .map(Some)
                .ok_or_else(|| missing("artist", id)),
            None => Ok(None),
        }
    }

    /// Same-named artists in creation order.
    fn find_artists_by_name(&self, name: &str) -> Result<Vec<Artist>, LibraryError> {
        let ids = {
            let index = self.source().multimap_table(ARTISTS_BY_NAME_TABLE)?;
            let ids = collect_ids(index.get(name)?)?;
            ids
        };
        ids.into_iter()
            .map(|id| self.find_artist(ArtistId(id))?.ok_or_else(|| missing("artist", id)))
            .collect()
    }

    fn find_release(&self, id: ReleaseId) -> Result<Option<Release>, LibraryError> {
        let table = self.source().table(RELEASES_TABLE)?;
        get_entity(&table, id.0)
    }

    fn find_release_by_mbid(&self, mbid: &Mbid) -> Result<Option<Release>, LibraryError> {
        let id = {
            let index = self.source().table(RELEASES_BY_MBID_TABLE)?;
            let id = index.get(mbid.as_str())?.map(|value| value.value());
            id
        };
        match id {
            Some(id) => self
                .find_release(ReleaseId(id))?
                .map(Some)
                .ok_or_else(|| missing("release", id)),
            None => Ok(None),
        }
    }

    /// Same-named releases in creation order.
    fn find_releases_by_name(&self, name: &str) -> Result<Vec<Release>, LibraryError> {
        let ids = {
            let index = self.source().multimap_table(RELEASES_BY_NAME_TABLE)?;
            let ids = collect_ids(index.get(name)?)?;
            ids
        };
        ids.into_iter()
            .map(|id| {
                self.find_release(ReleaseId(id))?
                    .ok_or_else(|| missing("release", id))
            })
            .collect()
    }

    fn find_cluster_type(&self, id: ClusterTypeId) -> Result<Option<ClusterType>, LibraryError> {
        let table = self.source().table(CLUSTER_TYPES_TABLE)?;
        get_entity(&table, id.0)
    }

    fn find_cluster_type_by_name(&self, name: &str) -> Result<Option<ClusterType>, LibraryError> {
        let id = {
            let index = self.source().table(CLUSTER_TYPES_BY_NAME_TABLE)?;
            let id = index.get(name)?.map(|value| value.value());
            id
        };
        match id {
            Some(id) => self
                .find_cluster_type(ClusterTypeId(id))?
                .map(Some)
                .ok_or_else(|| missing("cluster type", id)),
            None => Ok(None),
        }
    }

    fn find_cluster(&self, id: ClusterId) -> Result<Option<Cluster>, LibraryError> {
        let table = self.source().table(CLUSTERS_TABLE)?;
        get_entity(&table, id.0)
    }

    fn find_cluster_by_name(
        &self,
        cluster_type_id: ClusterTypeId,
        name: &str,
    ) -> Result<Option<Cluster>, LibraryError> {
        let key = cluster_key(cluster_type_id, name);
        let id = {
            let index = self.source().table(CLUSTERS_BY_KEY_TABLE)?;
            let id = index.get(key.as_str())?.map(|value| value.value());
            id
        };
        match id {
            Some(id) => self
                .find_cluster(ClusterId(id))?
                .map(Some)
                .ok_or_else(|| missing("cluster", id)),
            None => Ok(None),
        }
    }

    fn count_tracks(&self) -> Result<u64, LibraryError> {
        Ok(self.source().table(TRACKS_TABLE)?.len()?)
    }

    fn count_artists(&self) -> Result<u64, LibraryError> {
        Ok(self.source().table(ARTISTS_TABLE)?.len()?)
    }

    fn count_releases(&self) -> Result<u64, LibraryError> {
        Ok(self.source().table(RELEASES_TABLE)?.len()?)
    }

    fn count_clusters(&self) -> Result<u64, LibraryError> {
        Ok(self.source().table(CLUSTERS_TABLE)?.len()?)
    }

    fn count_artist_links(&self) -> Result<u64, LibraryError> {
        Ok(self.source().table(LINKS_TABLE)?.len()?)
    }

    /// Up to `limit` artists credited on no track.
    fn orphan_artist_ids(&self, limit: usize) -> Result<Vec<ArtistId>, LibraryError> {
        let ids = orphan_ids(self.source(), ARTISTS_TABLE, ARTIST_LINKS_TABLE, limit)?;
        Ok(ids.into_iter().map(ArtistId).collect())
    }

    /// Up to `limit` releases without tracks.
    fn orphan_release_ids(&self, limit: usize) -> Result<Vec<ReleaseId>, LibraryError> {
        let ids = orphan_ids(self.source(), RELEASES_TABLE, RELEASE_TRACKS_TABLE, limit)?;
        Ok(ids.into_iter().map(ReleaseId).collect())
    }

    /// Up to `limit` clusters attached to no track.
    fn orphan_cluster_ids(&self, limit: usize) -> Result<Vec<ClusterId>, LibraryError> {
        let ids = orphan_ids(self.source(), CLUSTERS_TABLE, CLUSTER_TRACKS_TABLE, limit)?;
        Ok(ids.into_iter().map(ClusterId).collect())
    }

    fn scan_settings(&self) -> Result<ScanSettingsRecord, LibraryError> {
        let table = self.source().table(META_TABLE)?;
        let settings = match table.get(META_SCAN_SETTINGS_KEY)? {
            Some(value) => decode_value(value.value())?,
            None => ScanSettingsRecord::default(),
        };
        Ok(settings)
    }
}

pub struct ReadSession {
    txn: ReadTransaction,
}

impl CatalogRead for ReadSession {
    type Source = ReadTransaction;

    fn source(&self) -> &ReadTransaction {
        &self.txn
    }
}

/// All mutations of one unit of work. Nothing is visible to readers until
/// [`WriteSession::commit`]; dropping the session discards every change.
pub struct WriteSession {
    txn: WriteTransaction,
}

impl CatalogRead for WriteSession {
    type Source = WriteTransaction;

    fn source(&self) -> &WriteTransaction {
        &self.txn
    }
}

impl WriteSession {
    pub fn commit(self) -> Result<(), LibraryError> {
        self.txn.commit()?;
        Ok(())
    }

    pub fn abort(self) -> Result<(), LibraryError> {
        self.txn.abort()?;
        Ok(())
    }

    pub fn create_track(&self, path: &str) -> Result<Track, LibraryError> {
        if self.find_track_by_path(path)?.is_some() {
            return Err(LibraryError::Conflict(format!(
                "track already cataloged at {}",
                path
            )));
        }
        let id = TrackId(self.next_id("track")?);
        let track = Track::new(id, path.to_string());
        self.put(TRACKS_TABLE, id.0, &track)?;
        let mut index = self.txn.open_table(TRACKS_BY_PATH_TABLE)?;
        index.insert(path, id.0)?;
        Ok(track)
    }

    /// Writes back a modified track, keeping every index in step.
    pub fn update_track(&self, track: &Track) -> Result<(), LibraryError> {
        let id = track.id.0;
        let previous = self
            .find_track(track.id)?
            .ok_or_else(|| missing("track", id))?;

        if previous.path != track.path {
            let mut index = self.txn.open_table(TRACKS_BY_PATH_TABLE)?;
            index.remove(previous.path.as_str())?;
            index.insert(track.path.as_str(), id)?;
        }
        if previous.recording_mbid != track.recording_mbid {
            let mut index = self.txn.open_multimap_table(TRACKS_BY_RECORDING_TABLE)?;
            if let Some(mbid) = &previous.recording_mbid {
                index.remove(mbid.as_str(), id)?;
            }
            if let Some(mbid) = &track.recording_mbid {
                index.insert(mbid.as_str(), id)?;
            }
        }
        if previous.release_id != track.release_id {
            let mut index = self.txn.open_multimap_table(RELEASE_TRACKS_TABLE)?;
            if let Some(release_id) = previous.release_id {
                index.remove(release_id.0, id)?;
            }
            if let Some(release_id) = track.release_id {
                index.insert(release_id.0, id)?;
            }
        }
        if previous.cluster_ids != track.cluster_ids {
            let mut index = self.txn.open_multimap_table(CLUSTER_TRACKS_TABLE)?;
            for cluster_id in previous.cluster_ids.difference(&track.cluster_ids) {
                index.remove(cluster_id.0, id)?;
            }
            for cluster_id in track.cluster_ids.difference(&previous.cluster_ids) {
                index.insert(cluster_id.0, id)?;
            }
        }

        self.put(TRACKS_TABLE, id, track)
    }

    /// Removes a track with its artist links and audio features.
    pub fn remove_track(&self, id: TrackId) -> Result<bool, LibraryError> {
        let track = match self.find_track(id)? {
            Some(track) => track,
            None => return Ok(false),
        };
        self.clear_artist_links(id)?;
        self.remove_track_features(id)?;

        {
            let mut index = self.txn.open_table(TRACKS_BY_PATH_TABLE)?;
            index.remove(track.path.as_str())?;
        }
        if let Some(mbid) = &track.recording_mbid {
            let mut index = self.txn.open_multimap_table(TRACKS_BY_RECORDING_TABLE)?;
            index.remove(mbid.as_str(), id.0)?;
        }
        if let Some(release_id) = track.release_id {
            let mut index = self.txn.open_multimap_table(RELEASE_TRACKS_TABLE)?;
            index.remove(release_id.0, id.0)?;
        }
        {
            let mut index = self.txn.open_multimap_table(CLUSTER_TRACKS_TABLE)?;
            for cluster_id in &track.cluster_ids {
                index.remove(cluster_id.0, id.0)?;
            }
        }

        let mut table = self.txn.open_table(TRACKS_TABLE)?;
        table.remove(id.0)?;
        Ok(true)
    }

    pub fn set_track_features(&self, track_id: TrackId, features: &[u8]) -> Result<(), LibraryError> {
        let mut table = self.txn.open_table(TRACK_FEATURES_TABLE)?;
        table.insert(track_id.0, features)?;
        Ok(())
    }

    pub fn remove_track_features(&self, track_id: TrackId) -> Result<bool, LibraryError> {
        let mut table = self.txn.open_table(TRACK_FEATURES_TABLE)?;
        let removed = table.remove(track_id.0)?.is_some();
        Ok(removed)
    }

    pub fn create_artist(
        &self,
        name: &str,
        sort_name: Option<String>,
        mbid: Option<Mbid>,
    ) -> Result<Artist, LibraryError> {
        if let Some(mbid) = &mbid {
            if self.find_artist_by_mbid(mbid)?.is_some() {
                return Err(LibraryError::Conflict(format!(
                    "artist MBID {} already cataloged",
                    mbid
                )));
            }
        }
        let artist = Artist {
            id: ArtistId(self.next_id("artist")?),
            name: name.to_string(),
            sort_name,
            mbid,
        };
        self.put(ARTISTS_TABLE, artist.id.0, &artist)?;
        {
            let mut index = self.txn.open_multimap_table(ARTISTS_BY_NAME_TABLE)?;
            index.insert(artist.name.as_str(), artist.id.0)?;
        }
        if let Some(mbid) = &artist.mbid {
            let mut index = self.txn.open_table(ARTISTS_BY_MBID_TABLE)?;
            index.insert(mbid.as_str(), artist.id.0)?;
        }
        Ok(artist)
    }

    pub fn update_artist(&self, artist: &Artist) -> Result<(), LibraryError> {
        let id = artist.id.0;
        let previous = self
            .find_artist(artist.id)?
            .ok_or_else(|| missing("artist", id))?;

        if previous.mbid != artist.mbid {
            if let Some(mbid) = &artist.mbid {
                if let Some(other) = self.find_artist_by_mbid(mbid)? {
                    if other.id != artist.id {
                        return Err(LibraryError::Conflict(format!(
                            "artist MBID {} already cataloged",
                            mbid
                        )));
                    }
                }
            }
            let mut index = self.txn.open_table(ARTISTS_BY_MBID_TABLE)?;
            if let Some(mbid) = &previous.mbid {
                index.remove(mbid.as_str())?;
            }
            if let Some(mbid) = &artist.mbid {
                index.insert(mbid.as_str(), id)?;
            }
        }
        if previous.name != artist.name {
            let mut index = self.txn.open_multimap_table(ARTISTS_BY_NAME_TABLE)?;
            index.remove(previous.name.as_str(), id)?;
            index.insert(artist.name.as_str(), id)?;
        }

        self.put(ARTISTS_TABLE, id, artist)
    }

    pub fn remove_artist(&self, id: ArtistId) -> Result<bool, LibraryError> {
        let artist = match self.find_artist(id)? {
            Some(artist) => artist,
            None => return Ok(false),
        };

        let link_ids = {
            let mut index = self.txn.open_multimap_table(ARTIST_LINKS_TABLE)?;
            let ids = collect_ids(index.remove_all(id.0)?)?;
            ids
        };
        {
            let mut links = self.txn.open_table(LINKS_TABLE)?;
            let mut track_links = self.txn.open_multimap_table(TRACK_LINKS_TABLE)?;
            for link_id in link_ids {
                let link: ArtistLink = match links.remove(link_id)? {
                    Some(value) => decode_value(value.value())?,
                    None => continue,
                };
                track_links.remove(link.track_id.0, link_id)?;
            }
        }
        {
            let mut index = self.txn.open_multimap_table(ARTISTS_BY_NAME_TABLE)?;
            index.remove(artist.name.as_str(), id.0)?;
        }
        if let Some(mbid) = &artist.mbid {
            let mut index = self.txn.open_table(ARTISTS_BY_MBID_TABLE)?;
            index.remove(mbid.as_str())?;
        }

        let mut table = self.txn.open_table(ARTISTS_TABLE)?;
        table.remove(id.0)?;
        Ok(true)
    }

    pub fn create_release(&self, name: &str, mbid: Option<Mbid>) -> Result<Release, LibraryError> {
        if let Some(mbid) = &mbid {
            if self.find_release_by_mbid(mbid)?.is_some() {
                return Err(LibraryError::Conflict(format!(
                    "release MBID {} already cataloged",
                    mbid
                )));
            }
        }
        let release = Release {
            id: ReleaseId(self.next_id("release")?),
            name: name.to_string(),
            mbid,
        };
        self.put(RELEASES_TABLE, release.id.0, &release)?;
        {
            let mut index = self.txn.open_multimap_table(RELEASES_BY_NAME_TABLE)?;
            index.insert(release.name.as_str(), release.id.0)?;
        }
        if let Some(mbid) = &release.mbid {
            let mut index = self.txn.open_table(RELEASES_BY_MBID_TABLE)?;
            index.insert(mbid.as_str(), release.id.0)?;
        }
        Ok(release)
    }

    pub fn update_release(&self, release: &Release) -> Result<(), LibraryError> {
        let id = release.id.0;
        let previous = self
            .find_release(release.id)?
            .ok_or_else(|| missing("release", id))?;

        if previous.mbid != release.mbid {
            if let Some(mbid) = &release.mbid {
                if let Some(other) = self.find_release_by_mbid(mbid)? {
                    if other.id != release.id {
                        return Err(LibraryError::Conflict(format!(
                            "release MBID {} already cataloged",
                            mbid
                        )));
                    }
                }
            }
            let mut index = self.txn.open_table(RELEASES_BY_MBID_TABLE)?;
            if let Some(mbid) = &previous.mbid {
                index.remove(mbid.as_str())?;
            }
            if let Some(mbid) = &release.mbid {
                index.insert(mbid.as_str(), id)?;
            }
        }
        if previous.name != release.name {
            let mut index = self.txn.open_multimap_table(RELEASES_BY_NAME_TABLE)?;
            index.remove(previous.name.as_str(), id)?;
            index.insert(release.name.as_str(), id)?;
        }

        self.put(RELEASES_TABLE, id, release)
    }

    /// Removes a release, detaching the tracks that still point at it.
    pub fn remove_release(&self, id: ReleaseId) -> Result<bool, LibraryError> {
        let release = match self.find_release(id)? {
            Some(release) => release,
            None => return Ok(false),
        };

        let track_ids = {
            let index = self.txn.open_multimap_table(RELEASE_TRACKS_TABLE)?;
            let ids = collect_ids(index.get(id.0)?)?;
            ids
        };
        for track_id in track_ids {
            if let Some(mut track) = self.find_track(TrackId(track_id))? {
                track.release_id = None;
                self.update_track(&track)?;
            }
        }
        {
            let mut index = self.txn.open_multimap_table(RELEASES_BY_NAME_TABLE)?;
            index.remove(release.name.as_str(), id.0)?;
        }
        if let Some(mbid) = &release.mbid {
            let mut index = self.txn.open_table(RELEASES_BY_MBID_TABLE)?;
            index.remove(mbid.as_str())?;
        }

        let mut table = self.txn.open_table(RELEASES_TABLE)?;
        table.remove(id.0)?;
        Ok(true)
    }

    pub fn create_cluster_type(&self, name: &str) -> Result<ClusterType, LibraryError> {
        if self.find_cluster_type_by_name(name)?.is_some() {
            return Err(LibraryError::Conflict(format!(
                "cluster type '{}' already exists",
                name
            )));
        }
        let cluster_type = ClusterType {
            id: ClusterTypeId(self.next_id("cluster_type")?),
            name: name.to_string(),
        };
        self.put(CLUSTER_TYPES_TABLE, cluster_type.id.0, &cluster_type)?;
        let mut index = self.txn.open_table(CLUSTER_TYPES_BY_NAME_TABLE)?;
        index.insert(name, cluster_type.id.0)?;
        Ok(cluster_type)
    }

    pub fn create_cluster(
        &self,
        cluster_type_id: ClusterTypeId,
        name: &str,
    ) -> Result<Cluster, LibraryError> {
        if self.find_cluster_type(cluster_type_id)?.is_none() {
            return Err(LibraryError::Conflict(format!(
                "unknown cluster type {}",
                cluster_type_id
            )));
        }
        if self.find_cluster_by_name(cluster_type_id, name)?.is_some() {
            return Err(LibraryError::Conflict(format!(
                "cluster '{}' already exists",
                name
            )));
        }
        let cluster = Cluster {
            id: ClusterId(self.next_id("cluster")?),
            cluster_type_id,
            name: name.to_string(),
        };
        self.put(CLUSTERS_TABLE, cluster.id.0, &cluster)?;
        let key = cluster_key(cluster_type_id, name);
        let mut index = self.txn.open_table(CLUSTERS_BY_KEY_TABLE)?;
        index.insert(key.as_str(), cluster.id.0)?;
        Ok(cluster)
    }

    /// Removes a cluster, dropping it from the tracks tagged with it.
    pub fn remove_cluster(&self, id: ClusterId) -> Result<bool, LibraryError> {
        let cluster = match self.find_cluster(id)? {
            Some(cluster) => cluster,
            None => return Ok(false),
        };

        let track_ids = {
            let index = self.txn.open_multimap_table(CLUSTER_TRACKS_TABLE)?;
            let ids = collect_ids(index.get(id.0)?)?;
            ids
        };
        for track_id in track_ids {
            if let Some(mut track) = self.find_track(TrackId(track_id))? {
                track.cluster_ids.remove(&id);
                self.update_track(&track)?;
            }
        }
        {
            let key = cluster_key(cluster.cluster_type_id, &cluster.name);
            let mut index = self.txn.open_table(CLUSTERS_BY_KEY_TABLE)?;
            index.remove(key.as_str())?;
        }

        let mut table = self.txn.open_table(CLUSTERS_TABLE)?;
        table.remove(id.0)?;
        Ok(true)
    }

    pub fn clear_artist_links(&self, track_id: TrackId) -> Result<(), LibraryError> {
        let link_ids = {
            let mut index = self.txn.open_multimap_table(TRACK_LINKS_TABLE)?;
            let ids = collect_ids(index.remove_all(track_id.0)?)?;
            ids
        };
        let mut links = self.txn.open_table(LINKS_TABLE)?;
        let mut artist_links = self.txn.open_multimap_table(ARTIST_LINKS_TABLE)?;
        for link_id in link_ids {
            let link: ArtistLink = match links.remove(link_id)? {
                Some(value) => decode_value(value.value())?,
                None => continue,
            };
            artist_links.remove(link.artist_id.0, link_id)?;
        }
        Ok(())
    }

    pub fn add_artist_link(
        &self,
        track_id: TrackId,
        artist_id: ArtistId,
        link_type: ArtistLinkType,
    ) -> Result<ArtistLink, LibraryError> {
        let link = ArtistLink {
            id: ArtistLinkId(self.next_id("artist_link")?),
            track_id,
            artist_id,
            link_type,
        };
        self.put(LINKS_TABLE, link.id.0, &link)?;
        {
            let mut index = self.txn.open_multimap_table(TRACK_LINKS_TABLE)?;
            index.insert(track_id.0, link.id.0)?;
        }
        let mut index = self.txn.open_multimap_table(ARTIST_LINKS_TABLE)?;
        index.insert(artist_id.0, link.id.0)?;
        Ok(link)
    }

    pub fn save_scan_settings(&self, settings: &ScanSettingsRecord) -> Result<(), LibraryError> {
        let mut table = self.txn.open_table(META_TABLE)?;
        let bytes = encode_value(settings)?;
        table.insert(META_SCAN_SETTINGS_KEY, bytes.as_slice())?;
        Ok(())
    }

    fn next_id(&self, sequence: &str) -> Result<u64, LibraryError> {
        let mut table = self.txn.open_table(SEQUENCES_TABLE)?;
        let next = table.get(sequence)?.map(|value| value.value()).unwrap_or(1);
        table.insert(sequence, next + 1)?;
        Ok(next)
    }

    fn put<T: Serialize>(
        &self,
        definition: TableDefinition<'static, u64, &'static [u8]>,
        id: u64,
        value: &T,
    ) -> Result<(), LibraryError> {
        let mut table = self.txn.open_table(definition)?;
        let bytes = encode_value(value)?;
        table.insert(id, bytes.as_slice())?;
        Ok(())
    }
}

fn orphan_ids<S: TableSource>(
    source: &S,
    entities: TableDefinition<'static, u64, &'static [u8]>,
    references: MultimapTableDefinition<'static, u64, u64>,
    limit: usize,
) -> Result<Vec<u64>, LibraryError> {
    let table = source.table(entities)?;
    let index = source.multimap_table(references)?;
    let mut out = Vec::new();
    for entry in table.iter()? {
        if out.len() >= limit {
            break;
        }
        let (key, _) = entry?;
        let id = key.value();
        let mut referencing = index.get(id)?;
        if referencing.next().is_none() {
            out.push(id);
        }
    }
    Ok(out)
}

fn get_entity<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    id: u64,
) -> Result<Option<T>, LibraryError> {
    match table.get(id)? {
        Some(value) => Ok(Some(decode_value(value.value())?)),
        None => Ok(None),
    }
}

fn collect_ids(values: MultimapValue<'_, u64>) -> Result<Vec<u64>, LibraryError> {
    let mut ids = Vec::new();
    for value in values {
        ids.push(value?.value());
    }
    Ok(ids)
}

fn cluster_key(cluster_type_id: ClusterTypeId, name: &str) -> String {
    let mut out = String::new();
    out.push_str(&cluster_type_id.to_string());
    out.push(KEY_SEP);
    out.push_str(name);
    out
}

fn missing(kind: &str, id: u64) -> LibraryError {
    LibraryError::CorruptIndex(format!("{} {} is indexed but missing", kind, id))
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}
