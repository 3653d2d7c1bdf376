use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use uuid::Uuid;

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(TrackId);
entity_id!(ArtistId);
entity_id!(ReleaseId);
entity_id!(ArtistLinkId);
entity_id!(ClusterTypeId);
entity_id!(ClusterId);

/// MusicBrainz identifier, stored in canonical lowercase hyphenated form.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Mbid(String);

impl Mbid {
    pub fn parse(text: &str) -> Option<Mbid> {
        let uuid = Uuid::parse_str(text.trim()).ok()?;
        if uuid.is_nil() {
            return None;
        }
        Some(Mbid(uuid.hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Mbid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tag date where only the year is guaranteed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartialDate {
    pub year: i32,
    pub month: Option<u8>,
    pub day: Option<u8>,
}

impl PartialDate {
    pub fn from_year(year: i32) -> Self {
        Self {
            year,
            month: None,
            day: None,
        }
    }

    /// Accepts `YYYY`, `YYYY-MM`, `YYYY-MM-DD` (also with `/` or `.`), ignoring
    /// any trailing time part. Out of range months and days are dropped.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text
            .trim()
            .split(|c: char| matches!(c, '-' | '/' | '.' | 'T' | ' '));
        let year_part = parts.next()?;
        if year_part.len() != 4 || !year_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let year = year_part.parse().ok()?;
        let month = parts
            .next()
            .and_then(|part| part.parse::<u8>().ok())
            .filter(|month| (1..=12).contains(month));
        let day = match month {
            Some(_) => parts
                .next()
                .and_then(|part| part.parse::<u8>().ok())
                .filter(|day| (1..=31).contains(day)),
            None => None,
        };
        Some(Self { year, month, day })
    }
}

impl fmt::Display for PartialDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.year)?;
        if let Some(month) = self.month {
            write!(f, "-{:02}", month)?;
            if let Some(day) = self.day {
                write!(f, "-{:02}", day)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub path: String,
    pub name: String,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub total_track: Option<u32>,
    pub total_disc: Option<u32>,
    pub disc_subtitle: String,
    pub duration_ms: u64,
    pub date: Option<PartialDate>,
    pub original_date: Option<PartialDate>,
    pub track_replay_gain: Option<f32>,
    pub release_replay_gain: Option<f32>,
    pub has_cover: bool,
    pub copyright: String,
    pub copyright_url: String,
    pub recording_mbid: Option<Mbid>,
    pub track_mbid: Option<Mbid>,
    /// Seconds since the unix epoch.
    pub last_write_time: i64,
    pub scan_version: u32,
    /// Seconds since the unix epoch.
    pub added_time: i64,
    pub release_id: Option<ReleaseId>,
    pub cluster_ids: BTreeSet<ClusterId>,
}

impl Track {
    pub fn new(id: TrackId, path: String) -> Self {
        Self {
            id,
            path,
            name: String::new(),
            track_number: None,
            disc_number: None,
            total_track: None,
            total_disc: None,
            disc_subtitle: String::new(),
            duration_ms: 0,
            date: None,
            original_date: None,
            track_replay_gain: None,
            release_replay_gain: None,
            has_cover: false,
            copyright: String::new(),
            copyright_url: String::new(),
            recording_mbid: None,
            track_mbid: None,
            last_write_time: 0,
            scan_version: 0,
            added_time: 0,
            release_id: None,
            cluster_ids: BTreeSet::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: ArtistId,
    pub name: String,
    pub sort_name: Option<String>,
    pub mbid: Option<Mbid>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,
    pub name: String,
    pub mbid: Option<Mbid>,
}

/// Role an artist played on a track. Only performers carry a free-text role.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtistLinkType {
    Artist,
    ReleaseArtist,
    Conductor,
    Composer,
    Lyricist,
    Mixer,
    Performer { role: Option<String> },
    Producer,
    Remixer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistLink {
    pub id: ArtistLinkId,
    pub track_id: TrackId,
    pub artist_id: ArtistId,
    pub link_type: ArtistLinkType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterType {
    pub id: ClusterTypeId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub cluster_type_id: ClusterTypeId,
    pub name: String,
}

/// Key under which a file is cataloged. Paths that are not valid UTF-8 have
/// no key and cannot be cataloged.
pub fn path_key(path: &Path) -> Option<&str> {
    path.to_str()
}

pub fn has_file_any_extension(path: &Path, extensions: &[String]) -> bool {
    let ext = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_ascii_lowercase(),
        None => return false,
    };
    extensions
        .iter()
        .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(&ext))
}
