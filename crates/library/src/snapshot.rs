use std::path::Path;
use std::sync::Arc;

use common::UnfilteredTrackIndex;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use tracing::{info, warn};

use crate::{decode_value, encode_value, open_or_create_db, LibraryError};

pub const SNAPSHOT_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const META_VERSION_KEY: &str = "version";
const META_SNAPSHOT_KEY: &str = "snapshot";

/// Persists the unfiltered track index between runs so a restart can rebuild
/// the catalog without waiting for a rescan.
#[derive(Clone)]
pub struct SnapshotStore {
    db: Arc<Database>,
}

impl SnapshotStore {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        let db = open_or_create_db(path)?;
        Ok(Self::with_db(Arc::new(db)))
    }

    pub fn with_db(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn save(&self, index: &UnfilteredTrackIndex) -> Result<(), LibraryError> {
        let version_bytes = encode_value(&SNAPSHOT_VERSION)?;
        let snapshot_bytes = encode_value(index)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(META_TABLE)?;
            table.insert(META_VERSION_KEY, version_bytes.as_slice())?;
            table.insert(META_SNAPSHOT_KEY, snapshot_bytes.as_slice())?;
        }
        write_txn.commit()?;
        info!("Saved snapshot with {} tracks", index.len());
        Ok(())
    }

    /// `Ok(None)` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<UnfilteredTrackIndex>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let version: u32 = match table.get(META_VERSION_KEY)? {
            Some(value) => decode_value(value.value())?,
            None => return Ok(None),
        };
        if version != SNAPSHOT_VERSION {
            return Err(LibraryError::VersionMismatch(version));
        }
        let snapshot = match table.get(META_SNAPSHOT_KEY)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(snapshot)
    }

    /// Falls back to an empty index when the stored snapshot is missing,
    /// stale or unreadable.
    pub fn load_or_default(&self, root: Option<String>) -> UnfilteredTrackIndex {
        match self.load() {
            Ok(Some(index)) => {
                info!("Loaded snapshot with {} tracks", index.len());
                index
            }
            Ok(None) => UnfilteredTrackIndex::new(root),
            Err(err) => {
                warn!("Discarding snapshot: {}", err);
                UnfilteredTrackIndex::new(root)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Track;

    fn store(dir: &tempfile::TempDir) -> SnapshotStore {
        SnapshotStore::open(&dir.path().join("db").join("snapshot.redb")).unwrap()
    }

    #[test]
    fn empty_store_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(store.load().unwrap().is_none());
        let index = store.load_or_default(Some("/music".to_string()));
        assert!(index.is_empty());
        assert_eq!(index.root.as_deref(), Some("/music"));
    }

    #[test]
    fn saved_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut track = Track::new("/music/a/1.flac");
        track.title = Some("One".to_string());
        track.artists = vec!["X".to_string(), "Y".to_string()];
        let index = UnfilteredTrackIndex::from_tracks(
            Some("/music".to_string()),
            vec![track, Track::new("/music/b.mp3")],
        );
        store(&dir).save(&index).unwrap();

        let loaded = store(&dir).load().unwrap().unwrap();
        assert_eq!(loaded, index);
        let order: Vec<&str> = loaded.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(order, vec!["/music/a/1.flac", "/music/b.mp3"]);
    }

    #[test]
    fn version_mismatch_is_reported_and_defaulted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.save(&UnfilteredTrackIndex::default()).unwrap();
        {
            let txn = store.db.begin_write().unwrap();
            {
                let mut table = txn.open_table(META_TABLE).unwrap();
                let bytes = encode_value(&(SNAPSHOT_VERSION + 1)).unwrap();
                table.insert(META_VERSION_KEY, bytes.as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }
        assert!(matches!(store.load(), Err(LibraryError::VersionMismatch(_))));
        assert!(store.load_or_default(None).is_empty());
    }

    #[test]
    fn corrupt_snapshot_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.save(&UnfilteredTrackIndex::default()).unwrap();
        {
            let txn = store.db.begin_write().unwrap();
            {
                let mut table = txn.open_table(META_TABLE).unwrap();
                table.insert(META_SNAPSHOT_KEY, [0xffu8; 3].as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }
        assert!(store.load().is_err());
        assert!(store.load_or_default(None).is_empty());
    }
}
