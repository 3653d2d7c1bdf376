use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use common::{path_key, ArtistLinkType, Mbid, PartialDate, Track};
use library::{
    Catalog, CatalogRead, ScanContext, ScanErrorKind, ScanStep, ScanStepStats, Scanner,
    ScannerConfig,
};
use metadata::{AlbumInfo, ArtistInfo, MetadataError, Parser, TrackMetadata};

const R1: &str = "0b6a8a5e-7c3f-4a5b-9a38-3f0a1c2b4d5e";
const R2: &str = "7d1c2b3a-4e5f-4a6b-8c7d-9e0f1a2b3c4d";
const ARTIST_MBID: &str = "a74b1b7f-71a5-4011-9441-d0b5e4122711";

#[derive(Default)]
struct FakeParser {
    records: Mutex<HashMap<PathBuf, TrackMetadata>>,
}

impl FakeParser {
    fn set(&self, path: &Path, metadata: TrackMetadata) {
        self.records
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), metadata);
    }
}

impl Parser for FakeParser {
    fn parse(&self, path: &Path) -> Result<TrackMetadata, MetadataError> {
        self.records
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| {
                MetadataError::Io(io::Error::new(io::ErrorKind::InvalidData, "unparsable"))
            })
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    catalog: Catalog,
    parser: Arc<FakeParser>,
    config: ScannerConfig,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(adjust: impl FnOnce(&mut ScannerConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        fs::create_dir_all(&root).unwrap();
        let catalog = Catalog::open(&dir.path().join("data/library.redb")).unwrap();
        let mut config = ScannerConfig {
            music_root: root.to_string_lossy().to_string(),
            cluster_types: vec!["GENRE".to_string()],
            worker_threads: 2,
            batch_size: 2,
            ..ScannerConfig::default()
        };
        adjust(&mut config);
        Self {
            _dir: dir,
            root,
            catalog,
            parser: Arc::new(FakeParser::default()),
            config,
        }
    }

    fn add_file(&self, relative: &str, metadata: TrackMetadata) -> PathBuf {
        let path = self.root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"audio").unwrap();
        self.parser.set(&path, metadata);
        path
    }

    fn scanner(&self) -> Scanner {
        self.catalog
            .sync_scan_settings(&self.config.cluster_types)
            .unwrap();
        Scanner::with_parser(self.catalog.clone(), &self.config, self.parser.clone()).unwrap()
    }

    fn scan(&self, force_scan: bool) -> ScanContext {
        self.scan_with_progress(force_scan, &mut |_| {})
    }

    fn scan_with_progress(
        &self,
        force_scan: bool,
        progress: &mut dyn FnMut(&ScanStepStats),
    ) -> ScanContext {
        let scanner = self.scanner();
        let mut context = ScanContext::new(self.root.clone(), force_scan);
        scanner.process(&mut context, progress).unwrap();
        context
    }

    fn track(&self, path: &Path) -> Option<Track> {
        self.catalog
            .read()
            .unwrap()
            .find_track_by_path(path_key(path).unwrap())
            .unwrap()
    }
}

fn audio(title: &str) -> TrackMetadata {
    TrackMetadata {
        title: title.to_string(),
        audio_streams: 1,
        duration_ms: 180_000,
        ..TrackMetadata::default()
    }
}

fn mbid(text: &str) -> Option<Mbid> {
    Mbid::parse(text)
}

#[test]
fn unchanged_files_are_skipped_without_mutation() {
    let fixture = Fixture::new();
    let mut metadata = audio("Song");
    metadata.artists = vec![ArtistInfo::named("Band")];
    let path = fixture.add_file("Band/song.mp3", metadata);

    let first = fixture.scan(false);
    assert_eq!(first.stats.additions, 1);
    assert_eq!(first.stats.scans, 1);
    let before = fixture.track(&path).unwrap();

    let second = fixture.scan(false);
    assert_eq!(second.stats.skips, 1);
    assert_eq!(second.stats.scans, 0);
    assert_eq!(second.stats.changes(), 0);
    assert!(second.stats.errors.is_empty());
    assert_eq!(fixture.track(&path).unwrap(), before);
}

#[test]
fn force_scan_updates_unchanged_files() {
    let fixture = Fixture::new();
    let path = fixture.add_file("song.mp3", audio("Song"));
    fixture.scan(false);

    fixture.parser.set(&path, audio("Renamed"));
    let context = fixture.scan(true);
    assert_eq!(context.stats.updates, 1);
    assert_eq!(context.stats.skips, 0);
    assert_eq!(fixture.track(&path).unwrap().name, "Renamed");
}

#[test]
fn modified_files_are_rescanned() {
    let fixture = Fixture::new();
    let path = fixture.add_file("song.mp3", audio("Song"));
    fixture.scan(false);

    fixture.parser.set(&path, audio("Remastered"));
    let later = std::time::SystemTime::now() + std::time::Duration::from_secs(120);
    fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(later)
        .unwrap();

    let context = fixture.scan(false);
    assert_eq!(context.stats.updates, 1);
    assert_eq!(fixture.track(&path).unwrap().name, "Remastered");
}

#[test]
fn scan_version_change_forces_rescan() {
    let fixture = Fixture::new();
    fixture.add_file("song.mp3", audio("Song"));
    fixture.scan(false);

    let mut fixture = fixture;
    fixture.config.cluster_types.push("MOOD".to_string());
    let context = fixture.scan(false);
    assert_eq!(context.stats.skips, 0);
    assert_eq!(context.stats.updates, 1);
}

#[test]
fn artist_mbid_takes_precedence_over_name() {
    let fixture = Fixture::new();
    let mut first = audio("One");
    first.artists = vec![ArtistInfo {
        name: "Radiohed".to_string(),
        mbid: mbid(ARTIST_MBID),
        sort_name: None,
    }];
    let mut second = audio("Two");
    second.artists = vec![ArtistInfo {
        name: "Radiohead".to_string(),
        mbid: mbid(ARTIST_MBID),
        sort_name: None,
    }];
    fixture.add_file("a.mp3", first);
    fixture.add_file("b.mp3", second);

    fixture.scan(false);
    let read = fixture.catalog.read().unwrap();
    assert_eq!(read.count_artists().unwrap(), 1);
    let artist = read
        .find_artist_by_mbid(&mbid(ARTIST_MBID).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(artist.name, "Radiohead");
}

#[test]
fn name_fallback_depends_on_role() {
    let fixture = Fixture::new();
    let mut tagged = audio("Tagged");
    tagged.artists = vec![ArtistInfo {
        name: "Björk".to_string(),
        mbid: mbid(ARTIST_MBID),
        sort_name: None,
    }];
    let mut untagged_main = audio("Main");
    untagged_main.artists = vec![ArtistInfo::named("Björk")];
    let mut performer = audio("Guest");
    performer
        .performer_artists
        .insert(Some("vocals".to_string()), vec![ArtistInfo::named("Björk")]);
    fixture.add_file("1.mp3", tagged);
    let main_path = fixture.add_file("2.mp3", untagged_main);
    let performer_path = fixture.add_file("3.mp3", performer);

    fixture.scan(false);
    let read = fixture.catalog.read().unwrap();
    let tagged_artist = read
        .find_artist_by_mbid(&mbid(ARTIST_MBID).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(read.count_artists().unwrap(), 2);

    let main_track = read.find_track_by_path(path_key(&main_path).unwrap()).unwrap().unwrap();
    let main_links = read.track_artist_links(main_track.id).unwrap();
    assert_eq!(main_links.len(), 1);
    assert_ne!(main_links[0].artist_id, tagged_artist.id);

    let guest_track = read
        .find_track_by_path(path_key(&performer_path).unwrap())
        .unwrap()
        .unwrap();
    let guest_links = read.track_artist_links(guest_track.id).unwrap();
    assert_eq!(guest_links.len(), 1);
    assert_eq!(guest_links[0].artist_id, tagged_artist.id);
    assert_eq!(
        guest_links[0].link_type,
        ArtistLinkType::Performer {
            role: Some("vocals".to_string())
        }
    );
}

#[test]
fn links_are_rebuilt_in_role_order() {
    let fixture = Fixture::new();
    let mut metadata = audio("Song");
    metadata.remixer_artists = vec![ArtistInfo::named("Remixer")];
    metadata.composer_artists = vec![ArtistInfo::named("Composer")];
    metadata.album_artists = vec![ArtistInfo::named("Band")];
    metadata.artists = vec![ArtistInfo::named("Singer"), ArtistInfo::named("Band")];
    let path = fixture.add_file("song.mp3", metadata);

    fixture.scan(false);
    fixture.scan(true);

    let read = fixture.catalog.read().unwrap();
    let track = read.find_track_by_path(path_key(&path).unwrap()).unwrap().unwrap();
    let roles: Vec<ArtistLinkType> = read
        .track_artist_links(track.id)
        .unwrap()
        .into_iter()
        .map(|link| link.link_type)
        .collect();
    assert_eq!(
        roles,
        vec![
            ArtistLinkType::Artist,
            ArtistLinkType::Artist,
            ArtistLinkType::ReleaseArtist,
            ArtistLinkType::Composer,
            ArtistLinkType::Remixer,
        ]
    );
    assert_eq!(read.count_artist_links().unwrap(), 5);
    assert_eq!(read.count_artists().unwrap(), 4);
}

#[test]
fn invalid_audio_removes_cataloged_track() {
    let fixture = Fixture::new();
    let path = fixture.add_file("song.mp3", audio("Song"));
    fixture.scan(false);
    assert!(fixture.track(&path).is_some());

    let mut silent = audio("Song");
    silent.audio_streams = 0;
    fixture.parser.set(&path, silent);
    let context = fixture.scan(true);

    assert!(fixture.track(&path).is_none());
    assert_eq!(context.stats.deletions, 1);
    assert_eq!(context.stats.errors.len(), 1);
    assert_eq!(context.stats.errors[0].kind, ScanErrorKind::NoAudioTrack);
    assert_eq!(context.stats.errors[0].path, path);
}

#[test]
fn zero_duration_is_rejected() {
    let fixture = Fixture::new();
    let mut empty = audio("Empty");
    empty.duration_ms = 0;
    let path = fixture.add_file("empty.flac", empty);

    let context = fixture.scan(false);
    assert!(fixture.track(&path).is_none());
    assert_eq!(context.stats.deletions, 0);
    assert_eq!(context.stats.errors[0].kind, ScanErrorKind::BadDuration);
}

#[test]
fn parse_failures_are_recorded() {
    let fixture = Fixture::new();
    let path = fixture.root.join("broken.ogg");
    fs::write(&path, b"junk").unwrap();

    let context = fixture.scan(false);
    assert_eq!(context.stats.scans, 0);
    assert_eq!(context.stats.errors.len(), 1);
    assert_eq!(context.stats.errors[0].kind, ScanErrorKind::CannotParseFile);
    assert!(context.stats.errors[0].message.is_some());
    assert_eq!(fixture.catalog.read().unwrap().count_tracks().unwrap(), 0);
}

#[test]
fn duplicate_recordings_are_skipped() {
    let fixture = Fixture::with_config(|config| config.skip_duplicate_recording_mbid = true);
    let mut first = audio("Original");
    first.recording_mbid = mbid(R1);
    let mut second = audio("Copy");
    second.recording_mbid = mbid(R1);
    let first_path = fixture.add_file("a.mp3", first);
    let second_path = fixture.add_file("b.mp3", second);

    let context = fixture.scan(false);
    assert_eq!(context.stats.additions, 1);
    assert!(fixture.track(&first_path).is_some());
    assert!(fixture.track(&second_path).is_none());
    let read = fixture.catalog.read().unwrap();
    assert_eq!(
        read.find_tracks_by_recording_mbid(&mbid(R1).unwrap())
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn duplicate_recording_removes_stale_track_at_path() {
    let fixture = Fixture::with_config(|config| config.skip_duplicate_recording_mbid = true);
    let mut first = audio("First");
    first.recording_mbid = mbid(R2);
    let mut second = audio("Second");
    second.recording_mbid = mbid(R1);
    let first_path = fixture.add_file("a.mp3", first.clone());
    let second_path = fixture.add_file("b.mp3", second);
    fixture.scan(false);
    assert!(fixture.track(&first_path).is_some());

    // a.mp3 is retagged with the recording already held by b.mp3.
    first.recording_mbid = mbid(R1);
    fixture.parser.set(&first_path, first);
    let context = fixture.scan(true);

    assert!(fixture.track(&first_path).is_none());
    assert!(fixture.track(&second_path).is_some());
    assert_eq!(context.stats.deletions, 1);
    let read = fixture.catalog.read().unwrap();
    assert_eq!(
        read.find_tracks_by_recording_mbid(&mbid(R1).unwrap())
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn duplicates_are_kept_when_policy_disabled() {
    let fixture = Fixture::new();
    let mut first = audio("Original");
    first.recording_mbid = mbid(R1);
    fixture.add_file("a.mp3", first.clone());
    fixture.add_file("b.mp3", first);

    let context = fixture.scan(false);
    assert_eq!(context.stats.additions, 2);
}

#[test]
fn stored_fields_match_tags() {
    let fixture = Fixture::new();
    let mut metadata = audio("Song");
    metadata.track_number = Some(3);
    metadata.disc_number = Some(1);
    metadata.total_track = Some(12);
    metadata.track_replay_gain = Some(1.2);
    metadata.album_replay_gain = Some(-0.5);
    metadata.has_cover = true;
    metadata.copyright = "(c) Label".to_string();
    metadata.recording_mbid = mbid(R1);
    metadata.date = PartialDate::parse("2004-07-21");
    metadata.album = Some(AlbumInfo {
        name: "Album".to_string(),
        mbid: None,
    });
    metadata
        .clusters
        .insert("GENRE".to_string(), BTreeSet::from(["Rock".to_string()]));
    metadata
        .clusters
        .insert("UNKNOWN".to_string(), BTreeSet::from(["Ignored".to_string()]));
    let path = fixture.add_file("song.flac", metadata);

    fixture.scan(false);
    let read = fixture.catalog.read().unwrap();
    let track = read.find_track_by_path(path_key(&path).unwrap()).unwrap().unwrap();
    assert_eq!(track.name, "Song");
    assert_eq!(track.track_number, Some(3));
    assert_eq!(track.disc_number, Some(1));
    assert_eq!(track.total_track, Some(12));
    assert_eq!(track.track_replay_gain, Some(1.2));
    assert_eq!(track.release_replay_gain, Some(-0.5));
    assert_eq!(track.duration_ms, 180_000);
    assert!(track.has_cover);
    assert_eq!(track.copyright, "(c) Label");
    assert_eq!(track.recording_mbid, mbid(R1));
    assert_eq!(track.date.map(|date| date.to_string()).as_deref(), Some("2004-07-21"));
    assert_eq!(track.scan_version, read.scan_settings().unwrap().scan_version);
    assert!(track.added_time > 0);

    let release = read.find_release(track.release_id.unwrap()).unwrap().unwrap();
    assert_eq!(release.name, "Album");

    let clusters: Vec<(String, String)> = track
        .cluster_ids
        .iter()
        .map(|id| {
            let cluster = read.find_cluster(*id).unwrap().unwrap();
            let cluster_type = read
                .find_cluster_type(cluster.cluster_type_id)
                .unwrap()
                .unwrap();
            (cluster_type.name, cluster.name)
        })
        .collect();
    assert_eq!(clusters, vec![("GENRE".to_string(), "Rock".to_string())]);
}

#[test]
fn release_date_falls_back_to_original_date() {
    let fixture = Fixture::new();
    let mut metadata = audio("Song");
    metadata.original_date = Some(PartialDate::from_year(1999));
    let path = fixture.add_file("song.mp3", metadata);

    fixture.scan(false);
    let track = fixture.track(&path).unwrap();
    assert_eq!(track.date, Some(PartialDate::from_year(1999)));
    assert_eq!(track.original_date, Some(PartialDate::from_year(1999)));
}

#[test]
fn untitled_tracks_use_the_file_name() {
    let fixture = Fixture::new();
    let path = fixture.add_file("Album/07 - untitled.mp3", audio(""));
    fixture.scan(false);
    assert_eq!(fixture.track(&path).unwrap().name, "07 - untitled.mp3");
}

#[test]
fn rescan_drops_track_features() {
    let fixture = Fixture::new();
    let path = fixture.add_file("song.mp3", audio("Song"));
    fixture.scan(false);
    let track = fixture.track(&path).unwrap();

    let session = fixture.catalog.write().unwrap();
    session.set_track_features(track.id, b"{}").unwrap();
    session.commit().unwrap();

    fixture.scan(true);
    let read = fixture.catalog.read().unwrap();
    assert!(read.track_features(track.id).unwrap().is_none());
}

#[test]
fn honors_extensions_and_exclusion_marker() {
    let fixture = Fixture::new();
    let kept = fixture.add_file("kept.mp3", audio("Kept"));
    let cover = fixture.add_file("cover.jpg", audio("Cover"));
    let hidden = fixture.add_file("private/hidden.mp3", audio("Hidden"));
    fs::write(fixture.root.join("private/.lmsignore"), b"").unwrap();

    let context = fixture.scan(false);
    assert_eq!(context.stats.files_to_scan, 1);
    assert!(fixture.track(&kept).is_some());
    assert!(fixture.track(&cover).is_none());
    assert!(fixture.track(&hidden).is_none());
}

#[test]
fn removed_files_and_orphans_are_cleaned_up() {
    let fixture = Fixture::new();
    let mut metadata = audio("Song");
    metadata.artists = vec![ArtistInfo::named("Band")];
    metadata.album = Some(AlbumInfo {
        name: "Album".to_string(),
        mbid: None,
    });
    metadata
        .clusters
        .insert("GENRE".to_string(), BTreeSet::from(["Rock".to_string()]));
    let gone = fixture.add_file("gone.mp3", metadata);
    let kept = fixture.add_file("kept.mp3", audio("Kept"));
    fixture.scan(false);
    {
        let read = fixture.catalog.read().unwrap();
        assert_eq!(read.count_tracks().unwrap(), 2);
        assert_eq!(read.count_artists().unwrap(), 1);
    }

    fs::remove_file(&gone).unwrap();
    let context = fixture.scan(false);
    assert_eq!(context.stats.deletions, 1);
    assert_eq!(context.stats.skips, 1);

    let read = fixture.catalog.read().unwrap();
    assert!(read.find_track_by_path(path_key(&gone).unwrap()).unwrap().is_none());
    assert!(read.find_track_by_path(path_key(&kept).unwrap()).unwrap().is_some());
    assert_eq!(read.count_artists().unwrap(), 0);
    assert_eq!(read.count_releases().unwrap(), 0);
    assert_eq!(read.count_clusters().unwrap(), 0);
    assert!(read.find_cluster_type_by_name("GENRE").unwrap().is_some());
}

#[test]
fn excluded_directories_lose_their_tracks() {
    let fixture = Fixture::new();
    let path = fixture.add_file("later-hidden/song.mp3", audio("Song"));
    fixture.scan(false);
    assert!(fixture.track(&path).is_some());

    fs::write(fixture.root.join("later-hidden/.lmsignore"), b"").unwrap();
    let context = fixture.scan(false);
    assert_eq!(context.stats.deletions, 1);
    assert!(fixture.track(&path).is_none());
}

#[test]
fn progress_follows_processed_files() {
    let fixture = Fixture::new();
    let first = fixture.add_file("a.mp3", audio("A"));
    fixture.add_file("b.mp3", audio("B"));
    fixture.add_file("c.mp3", audio("C"));
    fixture.scan(false);

    fixture.parser.set(&first, audio("A2"));
    fs::File::options()
        .write(true)
        .open(&first)
        .unwrap()
        .set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(120))
        .unwrap();

    let mut reports = Vec::new();
    let context = fixture.scan_with_progress(false, &mut |stats: &ScanStepStats| {
        if stats.step == ScanStep::ScanFiles {
            reports.push((stats.processed_elems, stats.total_elems));
        }
    });
    assert_eq!(context.stats.skips, 2);
    assert_eq!(reports, vec![(1, 3)]);
}

#[test]
fn abort_stops_before_any_file() {
    let fixture = Fixture::new();
    let path = fixture.add_file("song.mp3", audio("Song"));
    let scanner = fixture.scanner();
    scanner.abort_handle().store(true, Ordering::Relaxed);

    let mut context = ScanContext::new(fixture.root.clone(), false);
    scanner.process(&mut context, &mut |_| {}).unwrap();
    assert!(context.aborted);
    assert_eq!(context.stats.scans, 0);
    assert!(fixture.track(&path).is_none());
}

#[test]
fn abort_mid_walk_keeps_committed_files() {
    let fixture = Fixture::new();
    let first = fixture.add_file("a.mp3", audio("A"));
    let second = fixture.add_file("b.mp3", audio("B"));
    let third = fixture.add_file("c.mp3", audio("C"));
    let scanner = fixture.scanner();
    let abort = scanner.abort_handle();

    let mut context = ScanContext::new(fixture.root.clone(), false);
    scanner
        .process(&mut context, &mut |stats: &ScanStepStats| {
            if stats.step == ScanStep::ScanFiles {
                abort.store(true, Ordering::Relaxed);
            }
        })
        .unwrap();

    assert!(context.aborted);
    assert_eq!(context.stats.additions, 1);
    assert!(fixture.track(&first).is_some());
    assert!(fixture.track(&second).is_none());
    assert!(fixture.track(&third).is_none());
}

#[test]
fn next_cycle_runs_after_an_abort() {
    let fixture = Fixture::new();
    fixture.add_file("a.mp3", audio("A"));
    fixture.add_file("b.mp3", audio("B"));
    let scanner = fixture.scanner();
    let abort = scanner.abort_handle();

    let mut aborted = ScanContext::new(fixture.root.clone(), false);
    scanner
        .process(&mut aborted, &mut |_: &ScanStepStats| {
            abort.store(true, Ordering::Relaxed);
        })
        .unwrap();
    assert!(aborted.aborted);
    assert!(!scanner.abort_handle().load(Ordering::Relaxed));

    let mut next = ScanContext::new(fixture.root.clone(), false);
    scanner.process(&mut next, &mut |_| {}).unwrap();
    assert!(!next.aborted);
    assert_eq!(next.stats.files_to_scan, 2);
    assert_eq!(next.stats.additions + next.stats.skips, 2);
    assert_eq!(fixture.catalog.read().unwrap().count_tracks().unwrap(), 2);
}

#[test]
fn unreadable_last_write_time_is_an_error_skip() {
    let fixture = Fixture::with_config(|config| {
        config.batch_size = 1;
        config.worker_threads = 1;
    });
    let first = fixture.add_file("a.mp3", audio("A"));
    let vanished = fixture.add_file("b.mp3", audio("B"));
    let last = fixture.add_file("c.mp3", audio("C"));

    // The directory listing is already read when a.mp3 reports progress.
    let context = fixture.scan_with_progress(false, &mut |stats: &ScanStepStats| {
        if stats.step == ScanStep::ScanFiles && stats.processed_elems == 1 {
            let _ = fs::remove_file(&vanished);
        }
    });

    assert_eq!(context.stats.skips_on_error, 1);
    assert_eq!(context.stats.skips, 0);
    assert_eq!(context.stats.additions, 2);
    assert_eq!(context.stats.errors.len(), 1);
    assert_eq!(context.stats.errors[0].kind, ScanErrorKind::CannotReadFile);
    assert_eq!(context.stats.errors[0].path, vanished);
    assert!(fixture.track(&first).is_some());
    assert!(fixture.track(&vanished).is_none());
    assert!(fixture.track(&last).is_some());
}

#[cfg(unix)]
#[test]
fn unreadable_directories_are_reported_in_walk_order() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::new();
    // No parser record, so a.mp3 fails to parse while still pending in the batch.
    let unparsable = fixture.root.join("a.mp3");
    fs::write(&unparsable, b"junk").unwrap();
    fixture.add_file("locked/inner.mp3", audio("Inner"));
    let after = fixture.add_file("z.mp3", audio("Z"));
    let locked = fixture.root.join("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&locked).is_ok() {
        // Permission bits are not enforced for this user.
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let context = fixture.scan(false);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    let kinds: Vec<(PathBuf, ScanErrorKind)> = context
        .stats
        .errors
        .iter()
        .map(|error| (error.path.clone(), error.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (unparsable, ScanErrorKind::CannotParseFile),
            (locked, ScanErrorKind::CannotReadFile),
        ]
    );
    assert_eq!(context.stats.skips_on_error, 0);
    assert!(fixture.track(&after).is_some());
}

#[cfg(unix)]
#[test]
fn non_utf8_file_names_are_rejected_without_churn() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let fixture = Fixture::new();
    let kept = fixture.add_file("song.mp3", audio("Song"));
    let odd = fixture.root.join(OsStr::from_bytes(b"caf\xe9.mp3"));
    if fs::write(&odd, b"audio").is_err() {
        // The filesystem refuses non-UTF-8 names.
        return;
    }
    fixture.parser.set(&odd, audio("Cafe"));

    for _ in 0..2 {
        let context = fixture.scan(false);
        assert_eq!(context.stats.files_to_scan, 2);
        assert_eq!(context.stats.skips_on_error, 1);
        assert_eq!(context.stats.deletions, 0);
        assert_eq!(context.stats.errors.len(), 1);
        assert_eq!(context.stats.errors[0].kind, ScanErrorKind::CannotReadFile);
        assert_eq!(context.stats.errors[0].path, odd);
    }
    let read = fixture.catalog.read().unwrap();
    assert_eq!(read.count_tracks().unwrap(), 1);
    assert!(read.find_track_by_path(path_key(&kept).unwrap()).unwrap().is_some());
}

#[test]
fn invalid_read_style_fails_before_scanning() {
    let fixture = Fixture::with_config(|config| config.parser_read_style = "slow".to_string());
    fixture.add_file("song.mp3", audio("Song"));
    assert!(Scanner::new(fixture.catalog.clone(), &fixture.config).is_err());
    assert!(
        Scanner::with_parser(fixture.catalog.clone(), &fixture.config, fixture.parser.clone())
            .is_err()
    );
    assert_eq!(fixture.catalog.read().unwrap().count_tracks().unwrap(), 0);
}
