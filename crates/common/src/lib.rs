use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub mod fold;

pub use fold::{fold_key, CaseInsensitiveMap, FoldCollision};

/// Immutable track record as produced by the upstream scanner.
///
/// Every field except `id` and `path` may be missing or empty; the catalog
/// indexes such records under empty keys instead of rejecting them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Track {
    pub id: String,
    pub version: u64,
    pub path: String,
    pub file_name: String,
    pub title: Option<String>,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genres: Vec<String>,
    pub year: Option<i32>,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub duration_ms: u32,
    pub file_size: u64,
    pub format: AudioFormat,
    pub sample_rate: Option<u32>,
    pub bitrate: Option<u32>,
    pub bit_depth: Option<u8>,
    pub has_artwork: bool,
    pub colors: Option<TrackColors>,
    pub lyrics: Option<String>,
    pub comment: Option<String>,
    pub date_added: u64,
    pub date_modified: u64,
}

impl Track {
    /// Bare record for `path` with a content-derived id.
    pub fn new(path: &str) -> Self {
        let path = normalize_location(path);
        Self {
            id: stable_id(&path),
            file_name: file_name_of(&path).to_string(),
            format: AudioFormat::from_path(&path),
            path,
            ..Self::default()
        }
    }

    pub fn display_title(&self) -> &str {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title,
            _ => file_stem_of(&self.file_name),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Flac,
    Ogg,
    Opus,
    Aac,
    Wav,
    Other(String),
    #[default]
    Unknown,
}

impl AudioFormat {
    pub fn from_path(path: &str) -> Self {
        let name = file_name_of(path);
        let ext = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
            _ => return AudioFormat::Unknown,
        };
        match ext.as_str() {
            "mp3" => AudioFormat::Mp3,
            "flac" => AudioFormat::Flac,
            "ogg" | "oga" => AudioFormat::Ogg,
            "opus" => AudioFormat::Opus,
            "m4a" | "aac" | "mp4" => AudioFormat::Aac,
            "wav" => AudioFormat::Wav,
            _ => AudioFormat::Other(ext),
        }
    }
}

/// Colors derived from a track's artwork, packed as `0xAARRGGBB`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackColors {
    pub primary: u32,
    pub secondary: u32,
    pub background: u32,
}

/// Raw scanner output: every known track keyed by id, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UnfilteredTrackIndex {
    pub root: Option<String>,
    pub tracks: IndexMap<String, Track>,
}

impl UnfilteredTrackIndex {
    pub fn new(root: Option<String>) -> Self {
        Self {
            root,
            tracks: IndexMap::new(),
        }
    }

    pub fn from_tracks(root: Option<String>, tracks: impl IntoIterator<Item = Track>) -> Self {
        let mut index = Self::new(root);
        for track in tracks {
            index.insert(track);
        }
        index
    }

    /// Inserts or replaces by id. A replaced track keeps its original position.
    pub fn insert(&mut self, track: Track) -> Option<Track> {
        self.tracks.insert(track.id.clone(), track)
    }

    pub fn get(&self, id: &str) -> Option<&Track> {
        self.tracks.get(id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(normalize_location(input).as_bytes())
        .to_hex()
        .to_string()
}

/// Trims, turns backslashes into slashes, drops empty and `.` segments and
/// resolves `..` where a parent is available. A leading `/` is preserved.
pub fn normalize_location(input: &str) -> String {
    let slashed = input.trim().replace('\\', "/");
    let absolute = slashed.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in slashed.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(last) if parts.len() == 1 && is_drive(last) => {}
                Some(last) if *last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            _ => parts.push(part),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

pub fn is_absolute_location(location: &str) -> bool {
    location.starts_with('/') || location.split('/').next().map(is_drive).unwrap_or(false)
}

fn is_drive(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Non-empty segments of a normalized location.
pub fn path_segments(location: &str) -> Vec<&str> {
    location.split('/').filter(|part| !part.is_empty()).collect()
}

pub fn parent_dir(location: &str) -> &str {
    match location.rfind('/') {
        Some(idx) => &location[..idx],
        None => "",
    }
}

pub fn file_name_of(location: &str) -> &str {
    match location.rfind(|c| c == '/' || c == '\\') {
        Some(idx) => &location[idx + 1..],
        None => location,
    }
}

pub fn file_stem_of(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

/// Resolves `location` against directory `base`. Absolute locations ignore the base.
pub fn join_location(base: &str, location: &str) -> String {
    let base = base.trim();
    if base.is_empty() || is_absolute_location(&normalize_location(location)) {
        return normalize_location(location);
    }
    normalize_location(&format!("{}/{}", base, location))
}

/// Expresses `location` relative to directory `base`, climbing with `..`.
/// Locations that share no root with the base are returned normalized.
pub fn relative_location(location: &str, base: &str) -> String {
    let location = normalize_location(location);
    let base = normalize_location(base);
    if base.is_empty() || location.starts_with('/') != base.starts_with('/') {
        return location;
    }
    let target = path_segments(&location);
    let from = path_segments(&base);
    if from.first().map(|s| is_drive(s)).unwrap_or(false)
        && target.first().map(|s| s.to_ascii_lowercase()) != from.first().map(|s| s.to_ascii_lowercase())
    {
        return location;
    }
    let common = target
        .iter()
        .zip(from.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<&str> = Vec::new();
    for _ in common..from.len() {
        parts.push("..");
    }
    parts.extend_from_slice(&target[common..]);
    parts.join("/")
}
