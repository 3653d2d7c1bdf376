use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use common::{Mbid, PartialDate};
use lofty::config::{ParseOptions, ParsingMode};
use lofty::error::LoftyError;
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Tag;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ArtistInfo {
    pub name: String,
    pub mbid: Option<Mbid>,
    pub sort_name: Option<String>,
}

impl ArtistInfo {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AlbumInfo {
    pub name: String,
    pub mbid: Option<Mbid>,
}

/// Cluster type name to the set of values tagged under it.
pub type Clusters = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    pub artists: Vec<ArtistInfo>,
    pub album_artists: Vec<ArtistInfo>,
    pub conductor_artists: Vec<ArtistInfo>,
    pub composer_artists: Vec<ArtistInfo>,
    pub lyricist_artists: Vec<ArtistInfo>,
    pub mixer_artists: Vec<ArtistInfo>,
    /// Keyed by performer role, `None` when the tag names no role.
    pub performer_artists: BTreeMap<Option<String>, Vec<ArtistInfo>>,
    pub producer_artists: Vec<ArtistInfo>,
    pub remixer_artists: Vec<ArtistInfo>,
    pub album: Option<AlbumInfo>,
    pub track_number: Option<u32>,
    pub total_track: Option<u32>,
    pub disc_number: Option<u32>,
    pub total_disc: Option<u32>,
    pub disc_subtitle: String,
    pub date: Option<PartialDate>,
    pub original_date: Option<PartialDate>,
    pub track_replay_gain: Option<f32>,
    pub album_replay_gain: Option<f32>,
    pub recording_mbid: Option<Mbid>,
    pub track_mbid: Option<Mbid>,
    pub has_cover: bool,
    pub copyright: String,
    pub copyright_url: String,
    pub clusters: Clusters,
    pub audio_streams: usize,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Trade-off between parsing speed and tolerance to malformed files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadStyle {
    Fast,
    Average,
    #[default]
    Accurate,
}

impl ReadStyle {
    fn parsing_mode(self) -> ParsingMode {
        match self {
            ReadStyle::Fast => ParsingMode::Relaxed,
            ReadStyle::Average => ParsingMode::BestAttempt,
            ReadStyle::Accurate => ParsingMode::Strict,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownReadStyle(pub String);

impl fmt::Display for UnknownReadStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid parser read style '{}' (expected fast, average or accurate)",
            self.0
        )
    }
}

impl std::error::Error for UnknownReadStyle {}

impl FromStr for ReadStyle {
    type Err = UnknownReadStyle;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "fast" => Ok(ReadStyle::Fast),
            "average" => Ok(ReadStyle::Average),
            "accurate" => Ok(ReadStyle::Accurate),
            other => Err(UnknownReadStyle(other.to_string())),
        }
    }
}

/// Produces a metadata record from an audio file.
pub trait Parser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<TrackMetadata, MetadataError>;
}

#[derive(Debug, Clone)]
pub struct TagParser {
    read_style: ReadStyle,
    cluster_type_names: Vec<String>,
}

impl TagParser {
    pub fn new(read_style: ReadStyle, cluster_type_names: Vec<String>) -> Self {
        Self {
            read_style,
            cluster_type_names,
        }
    }
}

impl Parser for TagParser {
    fn parse(&self, path: &Path) -> Result<TrackMetadata, MetadataError> {
        let options = ParseOptions::new()
            .read_properties(true)
            .parsing_mode(self.read_style.parsing_mode());
        let tagged_file = Probe::open(path)?.options(options).read()?;
        let properties = tagged_file.properties();

        let mut info = TrackMetadata::default();
        info.duration_ms = u64::try_from(properties.duration().as_millis()).unwrap_or(u64::MAX);
        if properties.sample_rate().is_some() || properties.channels().is_some() {
            info.audio_streams = 1;
        }

        if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            read_tag(tag, &self.cluster_type_names, &mut info);
        }

        Ok(info)
    }
}

fn read_tag(tag: &Tag, cluster_type_names: &[String], info: &mut TrackMetadata) {
    info.title = tag
        .get_string(&ItemKey::TrackTitle)
        .map(|v| v.trim().to_string())
        .unwrap_or_default();

    info.artists = artists_from_tag(
        tag,
        &ItemKey::TrackArtist,
        Some(&ItemKey::MusicBrainzArtistId),
        Some(&ItemKey::TrackArtistSortOrder),
    );
    info.album_artists = artists_from_tag(
        tag,
        &ItemKey::AlbumArtist,
        Some(&ItemKey::MusicBrainzReleaseArtistId),
        Some(&ItemKey::AlbumArtistSortOrder),
    );
    info.conductor_artists = artists_from_tag(tag, &ItemKey::Conductor, None, None);
    info.composer_artists =
        artists_from_tag(tag, &ItemKey::Composer, None, Some(&ItemKey::ComposerSortOrder));
    info.lyricist_artists = artists_from_tag(tag, &ItemKey::Lyricist, None, None);
    info.mixer_artists = artists_from_tag(tag, &ItemKey::MixEngineer, None, None);
    info.producer_artists = artists_from_tag(tag, &ItemKey::Producer, None, None);
    info.remixer_artists = artists_from_tag(tag, &ItemKey::Remixer, None, None);
    for value in tag.get_strings(&ItemKey::Performer) {
        let (name, role) = parse_performer(value);
        if name.is_empty() {
            continue;
        }
        info.performer_artists
            .entry(role)
            .or_default()
            .push(ArtistInfo::named(&name));
    }

    if let Some(name) = tag.get_string(&ItemKey::AlbumTitle) {
        let name = name.trim();
        if !name.is_empty() {
            info.album = Some(AlbumInfo {
                name: name.to_string(),
                mbid: tag
                    .get_string(&ItemKey::MusicBrainzReleaseId)
                    .and_then(Mbid::parse),
            });
        }
    }

    let (track_number, track_total) = tag
        .get_string(&ItemKey::TrackNumber)
        .map(parse_number_pair)
        .unwrap_or((None, None));
    info.track_number = track_number;
    info.total_track = tag
        .get_string(&ItemKey::TrackTotal)
        .and_then(parse_number)
        .or(track_total);
    let (disc_number, disc_total) = tag
        .get_string(&ItemKey::DiscNumber)
        .map(parse_number_pair)
        .unwrap_or((None, None));
    info.disc_number = disc_number;
    info.total_disc = tag
        .get_string(&ItemKey::DiscTotal)
        .and_then(parse_number)
        .or(disc_total);
    info.disc_subtitle = tag
        .get_string(&ItemKey::SetSubtitle)
        .map(|v| v.trim().to_string())
        .unwrap_or_default();

    info.date = tag
        .get_string(&ItemKey::RecordingDate)
        .and_then(PartialDate::parse)
        .or_else(|| tag.get_string(&ItemKey::Year).and_then(PartialDate::parse));
    info.original_date = tag
        .get_string(&ItemKey::OriginalReleaseDate)
        .and_then(PartialDate::parse);

    info.track_replay_gain = tag
        .get_string(&ItemKey::ReplayGainTrackGain)
        .and_then(parse_replay_gain);
    info.album_replay_gain = tag
        .get_string(&ItemKey::ReplayGainAlbumGain)
        .and_then(parse_replay_gain);

    info.recording_mbid = tag
        .get_string(&ItemKey::MusicBrainzRecordingId)
        .and_then(Mbid::parse);
    info.track_mbid = tag
        .get_string(&ItemKey::MusicBrainzTrackId)
        .and_then(Mbid::parse);

    info.copyright = tag
        .get_string(&ItemKey::CopyrightMessage)
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    info.copyright_url = tag
        .get_string(&ItemKey::CopyrightUrl)
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    info.has_cover = !tag.pictures().is_empty();

    for type_name in cluster_type_names {
        let key = cluster_item_key(type_name);
        let mut values = BTreeSet::new();
        for value in tag.get_strings(&key) {
            values.extend(split_values(value));
        }
        if !values.is_empty() {
            info.clusters.insert(type_name.clone(), values);
        }
    }
}

fn artists_from_tag(
    tag: &Tag,
    names_key: &ItemKey,
    mbids_key: Option<&ItemKey>,
    sort_names_key: Option<&ItemKey>,
) -> Vec<ArtistInfo> {
    let names: Vec<String> = tag
        .get_strings(names_key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    let mbids: Vec<Option<Mbid>> = match mbids_key {
        Some(key) => tag.get_strings(key).map(Mbid::parse).collect(),
        None => Vec::new(),
    };
    let sort_names: Vec<String> = match sort_names_key {
        Some(key) => tag.get_strings(key).map(|v| v.trim().to_string()).collect(),
        None => Vec::new(),
    };

    // Positional pairing is only trusted when the counts line up.
    let pair_mbids = mbids.len() == names.len();
    let pair_sort_names = sort_names.len() == names.len();

    names
        .into_iter()
        .enumerate()
        .map(|(idx, name)| ArtistInfo {
            name,
            mbid: if pair_mbids { mbids[idx].clone() } else { None },
            sort_name: if pair_sort_names {
                Some(sort_names[idx].clone()).filter(|v| !v.is_empty())
            } else {
                None
            },
        })
        .collect()
}

fn cluster_item_key(type_name: &str) -> ItemKey {
    match type_name.to_ascii_uppercase().as_str() {
        "GENRE" => ItemKey::Genre,
        "MOOD" => ItemKey::Mood,
        "LANGUAGE" => ItemKey::Language,
        "GROUPING" | "ALBUMGROUPING" => ItemKey::ContentGroup,
        other => ItemKey::Unknown(other.to_string()),
    }
}

fn parse_number(text: &str) -> Option<u32> {
    text.trim().parse().ok()
}

/// Parses `3`, `3/12` or ` 3 / 12 `.
pub fn parse_number_pair(text: &str) -> (Option<u32>, Option<u32>) {
    let mut parts = text.splitn(2, '/');
    let number = parts.next().and_then(parse_number);
    let total = parts.next().and_then(parse_number);
    (number, total)
}

/// Parses replay gain values such as `+1.20 dB` or `-3.5`.
pub fn parse_replay_gain(text: &str) -> Option<f32> {
    let trimmed = text.trim();
    let unit_start = trimmed.len().saturating_sub(2);
    let without_unit = match trimmed.get(unit_start..) {
        Some(unit) if unit.eq_ignore_ascii_case("db") => &trimmed[..unit_start],
        _ => trimmed,
    };
    let value: f32 = without_unit.trim().parse().ok()?;
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// Splits `Name (role)` into its parts.
pub fn parse_performer(text: &str) -> (String, Option<String>) {
    let trimmed = text.trim();
    if let Some(stripped) = trimmed.strip_suffix(')') {
        if let Some(open_idx) = stripped.rfind('(') {
            let name = stripped[..open_idx].trim();
            let role = stripped[open_idx + 1..].trim();
            if !name.is_empty() {
                let role = if role.is_empty() {
                    None
                } else {
                    Some(role.to_string())
                };
                return (name.to_string(), role);
            }
        }
    }
    (trimmed.to_string(), None)
}

pub fn split_values(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in text.split(&[';', ',', '/', '|', '\0'][..]) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push(trimmed.to_string());
    }
    out
}
