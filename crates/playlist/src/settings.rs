use serde::{Deserialize, Serialize};

/// How playlist files are matched against the library and written back.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistIoSettings {
    /// Compare locations byte-for-byte instead of by folded key.
    pub case_sensitive: bool,
    /// Match on the file name alone, wherever it lives.
    pub ignore_location: bool,
    /// Drop entries that do not resolve to a library track.
    pub remove_invalid: bool,
    /// Write locations relative to `relative_base`.
    pub export_relative: bool,
    /// Directory relative lines are read against and written relative to.
    pub relative_base: String,
}

/// Settings persisted with a sync mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub io: PlaylistIoSettings,
    /// Encoding label for `.m3u` files; `None` detects on read and writes UTF-8.
    pub charset: Option<String>,
}
