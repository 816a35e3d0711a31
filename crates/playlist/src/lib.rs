use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::{FoldCollision, Track};
use library::{Searchable, SortKey, SortOption, SortValue, Sortable};
use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod m3u;
pub mod resolve;
pub mod settings;
pub mod store;
pub mod sync;

pub use m3u::{read_playlist, write_playlist, Charset};
pub use resolve::{is_foreign_uri, PathResolver};
pub use settings::{PlaylistIoSettings, SyncSettings};
pub use store::PlaylistStore;
pub use sync::{
    FsSyncDirectory, PlaylistSync, SyncConfig, SyncDirectory, SyncFile, SyncReport, SyncStatus,
    SyncedFile,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub location: String,
    /// Last known title, kept so entries that stop resolving stay readable.
    pub title: Option<String>,
    pub duration_ms: Option<u32>,
}

impl PlaylistEntry {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            title: None,
            duration_ms: None,
        }
    }

    pub fn from_track(track: &Track) -> Self {
        Self {
            location: track.path.clone(),
            title: Some(track.display_title().to_string()),
            duration_ms: Some(track.duration_ms).filter(|ms| *ms > 0),
        }
    }
}

/// Timestamps are milliseconds since the Unix epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub entries: Vec<PlaylistEntry>,
    pub created_at: u64,
    pub modified_at: u64,
}

impl Playlist {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            entries: Vec::new(),
            created_at: now,
            modified_at: now,
        }
    }

    pub fn set_entries(&mut self, entries: Vec<PlaylistEntry>) {
        self.entries = entries;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.modified_at = now_millis().max(self.modified_at);
    }
}

impl Searchable for Playlist {
    fn searchable_strings(&self) -> Vec<&str> {
        vec![self.name.as_str()]
    }
}

impl Sortable for Playlist {
    const SORT_OPTIONS: &'static [SortOption] = &[
        SortOption {
            name: "name",
            keys: &[SortKey::Name],
        },
        SortOption {
            name: "date_added",
            keys: &[SortKey::DateAdded, SortKey::Name],
        },
        SortOption {
            name: "date_modified",
            keys: &[SortKey::DateModified, SortKey::Name],
        },
        SortOption {
            name: "track_count",
            keys: &[SortKey::TrackCount, SortKey::Name],
        },
    ];

    fn sort_value(&self, key: SortKey) -> SortValue<'_> {
        match key {
            SortKey::Name | SortKey::Title => SortValue::Text(&self.name),
            SortKey::DateAdded => millis(self.created_at),
            SortKey::DateModified => millis(self.modified_at),
            SortKey::TrackCount => {
                SortValue::Number(i64::try_from(self.entries.len()).unwrap_or(i64::MAX))
            }
            _ => SortValue::Missing,
        }
    }
}

fn millis(value: u64) -> SortValue<'static> {
    SortValue::Number(i64::try_from(value).unwrap_or(i64::MAX))
}

#[derive(Clone, Debug, PartialEq)]
pub struct RealizedEntry {
    pub entry: PlaylistEntry,
    pub track: Option<Arc<Track>>,
}

impl RealizedEntry {
    pub fn is_valid(&self) -> bool {
        self.track.is_some()
    }
}

/// A playlist joined against the library. Unresolved entries stay in place.
#[derive(Clone, Debug, PartialEq)]
pub struct RealizedPlaylist {
    pub id: String,
    pub name: String,
    pub created_at: u64,
    pub modified_at: u64,
    pub entries: Vec<RealizedEntry>,
}

impl RealizedPlaylist {
    pub fn invalid_count(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.is_valid()).count()
    }

    pub fn valid_tracks(&self) -> Vec<Arc<Track>> {
        self.entries
            .iter()
            .filter_map(|entry| entry.track.clone())
            .collect()
    }

    /// Resolved entries take the library's location and metadata.
    pub fn into_playlist(self, remove_invalid: bool) -> Playlist {
        let entries = self
            .entries
            .into_iter()
            .filter_map(|realized| match realized.track {
                Some(track) => Some(PlaylistEntry::from_track(&track)),
                None if remove_invalid => None,
                None => Some(realized.entry),
            })
            .collect();
        Playlist {
            id: self.id,
            name: self.name,
            entries,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

pub fn realize(
    playlist: &Playlist,
    resolver: &PathResolver,
    settings: &PlaylistIoSettings,
) -> RealizedPlaylist {
    let entries = playlist
        .entries
        .iter()
        .map(|entry| RealizedEntry {
            entry: entry.clone(),
            track: resolver.resolve(&entry.location, settings).cloned(),
        })
        .collect();
    RealizedPlaylist {
        id: playlist.id.clone(),
        name: playlist.name.clone(),
        created_at: playlist.created_at,
        modified_at: playlist.modified_at,
        entries,
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug)]
pub enum PlaylistError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    Json(serde_json::Error),
    UnknownPlaylist(String),
    Conflict(String),
}

impl std::fmt::Display for PlaylistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaylistError::Io(err) => write!(f, "io error: {}", err),
            PlaylistError::Redb(err) => write!(f, "db error: {}", err),
            PlaylistError::Bincode(err) => write!(f, "bincode error: {}", err),
            PlaylistError::Json(err) => write!(f, "json error: {}", err),
            PlaylistError::UnknownPlaylist(id) => write!(f, "unknown playlist: {}", id),
            PlaylistError::Conflict(message) => write!(f, "conflict: {}", message),
        }
    }
}

impl std::error::Error for PlaylistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlaylistError::Io(err) => Some(err),
            PlaylistError::Redb(err) => Some(err),
            PlaylistError::Bincode(err) => Some(err),
            PlaylistError::Json(err) => Some(err),
            PlaylistError::UnknownPlaylist(_) | PlaylistError::Conflict(_) => None,
        }
    }
}

impl From<std::io::Error> for PlaylistError {
    fn from(err: std::io::Error) -> Self {
        PlaylistError::Io(err)
    }
}

impl From<redb::Error> for PlaylistError {
    fn from(err: redb::Error) -> Self {
        PlaylistError::Redb(err)
    }
}

impl From<DatabaseError> for PlaylistError {
    fn from(err: DatabaseError) -> Self {
        PlaylistError::Redb(err.into())
    }
}

impl From<TableError> for PlaylistError {
    fn from(err: TableError) -> Self {
        PlaylistError::Redb(err.into())
    }
}

impl From<TransactionError> for PlaylistError {
    fn from(err: TransactionError) -> Self {
        PlaylistError::Redb(err.into())
    }
}

impl From<StorageError> for PlaylistError {
    fn from(err: StorageError) -> Self {
        PlaylistError::Redb(err.into())
    }
}

impl From<CommitError> for PlaylistError {
    fn from(err: CommitError) -> Self {
        PlaylistError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for PlaylistError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        PlaylistError::Bincode(err)
    }
}

impl From<serde_json::Error> for PlaylistError {
    fn from(err: serde_json::Error) -> Self {
        PlaylistError::Json(err)
    }
}

impl From<FoldCollision> for PlaylistError {
    fn from(err: FoldCollision) -> Self {
        PlaylistError::Conflict(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library(paths: &[&str]) -> Vec<Arc<Track>> {
        paths
            .iter()
            .map(|p| {
                let mut track = Track::new(p);
                track.duration_ms = 61_000;
                Arc::new(track)
            })
            .collect()
    }

    fn playlist(locations: &[&str]) -> Playlist {
        let mut playlist = Playlist::new("Mix");
        playlist.set_entries(locations.iter().map(|l| PlaylistEntry::new(*l)).collect());
        playlist
    }

    #[test]
    fn realize_preserves_order_and_flags_invalid() {
        let tracks = library(&["/m/a.mp3", "/m/b.mp3"]);
        let resolver = PathResolver::new(&tracks);
        let list = playlist(&["/m/b.mp3", "/gone.mp3", "/M/A.mp3"]);
        let realized = realize(&list, &resolver, &PlaylistIoSettings::default());
        assert_eq!(realized.invalid_count(), 1);
        let paths: Vec<String> = realized.valid_tracks().iter().map(|t| t.path.clone()).collect();
        assert_eq!(paths, vec!["/m/b.mp3".to_string(), "/m/a.mp3".to_string()]);
        assert!(!realized.entries[1].is_valid());
    }

    #[test]
    fn realize_is_idempotent() {
        let tracks = library(&["/m/a.mp3", "/m/b.mp3"]);
        let resolver = PathResolver::new(&tracks);
        let settings = PlaylistIoSettings::default();
        let list = playlist(&["/M/A.mp3", "/gone.mp3", "/m/b.mp3"]);

        let once = realize(&list, &resolver, &settings).into_playlist(false);
        let twice = realize(&once, &resolver, &settings).into_playlist(false);
        assert_eq!(once, twice);
        let locations: Vec<&str> = once.entries.iter().map(|e| e.location.as_str()).collect();
        assert_eq!(locations, vec!["/m/a.mp3", "/gone.mp3", "/m/b.mp3"]);
        assert_eq!(once.entries[0].duration_ms, Some(61_000));

        let pruned = realize(&list, &resolver, &settings).into_playlist(true);
        assert_eq!(pruned.entries.len(), 2);
    }

    #[test]
    fn playlists_search_and_sort_by_name() {
        let loc = library::Localization::default();
        let lists = vec![Playlist::new("Road trip"), Playlist::new("chill"), Playlist::new("Rain")];
        let found = library::search(&lists, "r", &loc);
        assert_eq!(found.len(), 2);
        let sorted = library::sort(&lists, &[SortKey::Name], true, &loc);
        let names: Vec<&str> = sorted.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["chill", "Rain", "Road trip"]);
    }

    #[test]
    fn new_playlists_get_unique_ids() {
        let a = Playlist::new("a");
        let b = Playlist::new("a");
        assert_ne!(a.id, b.id);
        assert!(a.created_at <= a.modified_at);
    }
}
