use std::fs;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::sync::SyncConfig;
use crate::{Playlist, PlaylistEntry, PlaylistError};

const PLAYLISTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("playlists");
const SYNC_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sync");

const SYNC_CONFIG_KEY: &str = "config";

#[derive(Clone)]
pub struct PlaylistStore {
    db: Arc<Database>,
}

impl PlaylistStore {
    pub fn open(path: &Path) -> Result<Self, PlaylistError> {
        let db = open_or_create_db(path)?;
        Ok(Self::new(Arc::new(db)))
    }

    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Records that fail to decode are skipped.
    pub fn list_playlists(&self) -> Result<Vec<Playlist>, PlaylistError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(PLAYLISTS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            match decode_value::<Playlist>(entry.1.value()) {
                Ok(playlist) => items.push(playlist),
                Err(err) => warn!("Skipping unreadable playlist {}: {}", entry.0.value(), err),
            }
        }
        Ok(items)
    }

    pub fn get_playlist(&self, playlist_id: &str) -> Result<Option<Playlist>, PlaylistError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(PLAYLISTS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let playlist = match table.get(playlist_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(playlist)
    }

    pub fn create_playlist(
        &self,
        name: String,
        entries: Vec<PlaylistEntry>,
    ) -> Result<Playlist, PlaylistError> {
        let mut playlist = Playlist::new(name);
        playlist.entries = entries;
        self.save_playlist(&playlist)?;
        Ok(playlist)
    }

    pub fn save_playlist(&self, playlist: &Playlist) -> Result<(), PlaylistError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PLAYLISTS_TABLE)?;
            let bytes = encode_value(playlist)?;
            table.insert(playlist.id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Renames and/or replaces the entries of a stored playlist.
    pub fn update_playlist(
        &self,
        playlist_id: &str,
        name: Option<String>,
        entries: Option<Vec<PlaylistEntry>>,
    ) -> Result<Playlist, PlaylistError> {
        let mut playlist = self
            .get_playlist(playlist_id)?
            .ok_or_else(|| PlaylistError::UnknownPlaylist(playlist_id.to_string()))?;
        if let Some(name) = name {
            playlist.name = name;
            playlist.touch();
        }
        if let Some(entries) = entries {
            playlist.set_entries(entries);
        }
        self.save_playlist(&playlist)?;
        Ok(playlist)
    }

    pub fn delete_playlist(&self, playlist_id: &str) -> Result<bool, PlaylistError> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = match write_txn.open_table(PLAYLISTS_TABLE) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(false),
                Err(err) => return Err(err.into()),
            };
            let removed = table.remove(playlist_id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    /// A stored mapping whose file names collide after case folding is an error.
    pub fn load_sync_config(&self) -> Result<SyncConfig, PlaylistError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(SYNC_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(SyncConfig::default()),
            Err(err) => return Err(err.into()),
        };
        let config = match table.get(SYNC_CONFIG_KEY)? {
            Some(value) => serde_json::from_slice(value.value())?,
            None => SyncConfig::default(),
        };
        Ok(config)
    }

    pub fn save_sync_config(&self, config: &SyncConfig) -> Result<(), PlaylistError> {
        let bytes = serde_json::to_vec(config)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SYNC_TABLE)?;
            table.insert(SYNC_CONFIG_KEY, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, PlaylistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, PlaylistError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, PlaylistError> {
    Ok(bincode::deserialize(bytes)?)
}
