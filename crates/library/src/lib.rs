use std::fs;
use std::path::Path;

use redb::{CommitError, Database, DatabaseError, StorageError, TableError, TransactionError};
use serde::{Deserialize, Serialize};

pub mod catalog;
pub mod collate;
pub mod filter;
pub mod folders;
pub mod index;
pub mod search;
pub mod snapshot;
pub mod sort;

pub use catalog::{Catalog, CatalogInputs};
pub use collate::{Collator, FoldingCollator, Localization};
pub use filter::PathFilter;
pub use folders::{Folder, FolderTree};
pub use index::{build_index, AggregateStats, Album, AlbumKey, Artist, Genre, LibraryIndex};
pub use search::{search, search_by, Searchable};
pub use snapshot::{SnapshotStore, SNAPSHOT_VERSION};
pub use sort::{sort, sort_by, sort_option, SortKey, SortOption, SortValue, Sortable};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub tracks: usize,
    pub albums: usize,
    pub artists: usize,
    pub album_artists: usize,
    pub genres: usize,
    pub folders: usize,
    pub filtered_out: usize,
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    Pattern(regex::Error),
    VersionMismatch(u32),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::Pattern(err) => write!(f, "invalid path pattern: {}", err),
            LibraryError::VersionMismatch(version) => {
                write!(f, "snapshot version mismatch: {}", version)
            }
        }
    }
}

impl std::error::Error for LibraryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LibraryError::Io(err) => Some(err),
            LibraryError::Redb(err) => Some(err),
            LibraryError::Bincode(err) => Some(err.as_ref()),
            LibraryError::Pattern(err) => Some(err),
            LibraryError::VersionMismatch(_) => None,
        }
    }
}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}

impl From<regex::Error> for LibraryError {
    fn from(err: regex::Error) -> Self {
        LibraryError::Pattern(err)
    }
}

pub(crate) fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

/// One page of `items` plus the unpaged total. `limit == 0` means no limit.
pub fn page<T: Clone>(items: &[T], limit: usize, offset: usize) -> (Vec<T>, usize) {
    let total = items.len();
    let start = offset.min(total);
    let end = if limit == 0 {
        total
    } else {
        start.saturating_add(limit).min(total)
    };
    (items[start..end].to_vec(), total)
}
