use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use common::{fold_key, CaseInsensitiveMap};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::m3u::{read_playlist, write_playlist, Charset};
use crate::resolve::PathResolver;
use crate::settings::SyncSettings;
use crate::{now_millis, Playlist, PlaylistError};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedFile {
    pub playlist_id: String,
    pub last_synced_at: u64,
}

/// Persisted sync state: which playlist goes to which file, and when each
/// file was last reconciled.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Playlist id to target file name.
    pub targets: BTreeMap<String, String>,
    /// Keyed by target file name.
    pub synced: CaseInsensitiveMap<SyncedFile>,
    pub settings: SyncSettings,
}

impl SyncConfig {
    pub fn set_target(&mut self, playlist_id: impl Into<String>, file_name: impl Into<String>) {
        self.targets.insert(playlist_id.into(), file_name.into());
    }

    /// Unmaps a playlist and forgets its sync record.
    pub fn remove_target(&mut self, playlist_id: &str) -> Option<String> {
        let file_name = self.targets.remove(playlist_id)?;
        if self
            .synced
            .get(&file_name)
            .map(|synced| synced.playlist_id == playlist_id)
            .unwrap_or(false)
        {
            self.synced.remove(&file_name);
        }
        Some(file_name)
    }
}

/// A file in the sync directory. `modified_at` is in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncFile {
    pub name: String,
    pub modified_at: u64,
}

/// Flat directory of playlist files.
pub trait SyncDirectory {
    fn list(&self) -> io::Result<Vec<SyncFile>>;

    fn read(&self, name: &str) -> io::Result<Vec<u8>>;

    /// Creates or replaces `name`, returning its new modification time.
    fn write(&self, name: &str, bytes: &[u8]) -> io::Result<u64>;
}

pub struct FsSyncDirectory {
    root: PathBuf,
}

impl FsSyncDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a plain file name: {:?}", name),
            ));
        }
        Ok(self.root.join(name))
    }
}

fn modified_millis(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl SyncDirectory for FsSyncDirectory {
    fn list(&self) -> io::Result<Vec<SyncFile>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = entry.metadata().map_err(io::Error::from)?;
            files.push(SyncFile {
                name: entry.file_name().to_string_lossy().to_string(),
                modified_at: modified_millis(&metadata),
            });
        }
        Ok(files)
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(name)?)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> io::Result<u64> {
        let path = self.path_for(name)?;
        fs::write(&path, bytes)?;
        Ok(modified_millis(&fs::metadata(&path)?))
    }
}

/// Playlist ids grouped by what happened to them in one run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub imported: Vec<String>,
    pub exported: Vec<String>,
    pub unchanged: Vec<String>,
    pub skipped: Vec<String>,
    pub nonexistent: Vec<String>,
    pub failed: Vec<String>,
}

impl SyncReport {
    /// Playlists whose entries were replaced and need saving.
    pub fn changed(&self) -> &[String] {
        &self.imported
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SyncStatus {
    #[default]
    Idle,
    Running,
    Completed(SyncReport),
    Failed(String),
}

enum Outcome {
    Imported,
    Exported,
    Unchanged,
    Nonexistent,
}

/// Runs syncs and keeps their status and an append-only log.
#[derive(Default)]
pub struct PlaylistSync {
    status: Mutex<SyncStatus>,
    log: Mutex<Vec<String>>,
}

impl PlaylistSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.lock().clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Hands over the log lines written so far and starts a fresh log.
    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock())
    }

    fn append(&self, line: String) {
        self.log.lock().push(line);
    }

    /// Reconciles every mapped playlist with its file in `dir`.
    ///
    /// A newer file is imported over the playlist, a newer playlist is
    /// exported over the file. Per-playlist failures are logged and counted;
    /// only an unreadable directory fails the run.
    pub fn run(
        &self,
        playlists: &mut [Playlist],
        config: &mut SyncConfig,
        dir: &dyn SyncDirectory,
        resolver: &PathResolver,
    ) -> Result<SyncReport, PlaylistError> {
        *self.status.lock() = SyncStatus::Running;
        self.append(format!(
            "Sync started at {} with {} mapped playlists",
            now_millis(),
            config.targets.len()
        ));

        let listing = match dir.list() {
            Ok(listing) => listing,
            Err(err) => {
                warn!("Playlist sync failed: {}", err);
                self.append(format!("Cannot list the sync directory: {}", err));
                *self.status.lock() = SyncStatus::Failed(err.to_string());
                return Err(err.into());
            }
        };
        let mut files: CaseInsensitiveMap<SyncFile> = CaseInsensitiveMap::new();
        for file in listing {
            if let Err(collision) = files.try_insert(file.name.clone(), file) {
                self.append(format!(
                    "Ignoring file {}: differs only by case from {}",
                    collision.incoming, collision.existing
                ));
            }
        }

        let targets: Vec<(String, String)> = config
            .targets
            .iter()
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect();
        let mut claims: HashMap<String, Vec<String>> = HashMap::new();
        for (id, name) in &targets {
            claims.entry(fold_key(name)).or_default().push(id.clone());
        }

        let mut report = SyncReport::default();
        for (playlist_id, file_name) in targets {
            let claimants = claims
                .get(&fold_key(&file_name))
                .map(Vec::len)
                .unwrap_or(0);
            if claimants > 1 {
                self.append(format!(
                    "Skipping playlist {}: {} is the target of {} playlists",
                    playlist_id, file_name, claimants
                ));
                report.skipped.push(playlist_id);
                continue;
            }
            let playlist = match playlists.iter_mut().find(|p| p.id == playlist_id) {
                Some(playlist) => playlist,
                None => {
                    self.append(format!(
                        "Skipping unknown playlist {} mapped to {}",
                        playlist_id, file_name
                    ));
                    report.skipped.push(playlist_id);
                    continue;
                }
            };

            match self.sync_one(playlist, &file_name, files.get(&file_name), config, dir, resolver) {
                Ok(Outcome::Imported) => {
                    self.append(format!("Imported \"{}\" from {}", playlist.name, file_name));
                    report.imported.push(playlist_id);
                }
                Ok(Outcome::Exported) => {
                    self.append(format!("Exported \"{}\" to {}", playlist.name, file_name));
                    report.exported.push(playlist_id);
                }
                Ok(Outcome::Unchanged) => report.unchanged.push(playlist_id),
                Ok(Outcome::Nonexistent) => {
                    self.append(format!(
                        "Target {} of \"{}\" no longer exists",
                        file_name, playlist.name
                    ));
                    report.nonexistent.push(playlist_id);
                }
                Err(err) => {
                    warn!("Syncing {} with {} failed: {}", playlist_id, file_name, err);
                    self.append(format!(
                        "Failed to sync \"{}\" with {}: {}",
                        playlist.name, file_name, err
                    ));
                    report.failed.push(playlist_id);
                }
            }
        }

        self.append(format!(
            "Sync finished: {} imported, {} exported, {} unchanged, {} skipped, {} missing, {} failed",
            report.imported.len(),
            report.exported.len(),
            report.unchanged.len(),
            report.skipped.len(),
            report.nonexistent.len(),
            report.failed.len()
        ));
        info!(
            "Playlist sync: {} imported, {} exported, {} failed",
            report.imported.len(),
            report.exported.len(),
            report.failed.len()
        );
        *self.status.lock() = SyncStatus::Completed(report.clone());
        Ok(report)
    }

    fn sync_one(
        &self,
        playlist: &mut Playlist,
        file_name: &str,
        file: Option<&SyncFile>,
        config: &mut SyncConfig,
        dir: &dyn SyncDirectory,
        resolver: &PathResolver,
    ) -> io::Result<Outcome> {
        let last_synced = config
            .synced
            .get(file_name)
            .filter(|synced| synced.playlist_id == playlist.id)
            .map(|synced| synced.last_synced_at);
        let charset = Charset::for_file(file_name, config.settings.charset.as_deref());

        let file = match file {
            Some(file) => file,
            None if last_synced.is_some() => return Ok(Outcome::Nonexistent),
            None => {
                export(playlist, file_name, &charset, config, dir)?;
                return Ok(Outcome::Exported);
            }
        };

        let since = last_synced.unwrap_or(0);
        let file_newer = file.modified_at > since;
        let playlist_newer = playlist.modified_at > since;
        if file_newer {
            if playlist_newer && last_synced.is_some() {
                self.append(format!(
                    "Both \"{}\" and {} changed since the last sync; keeping the file",
                    playlist.name, file_name
                ));
            }
            let bytes = dir.read(&file.name)?;
            let settings = &config.settings.io;
            playlist.entries =
                read_playlist(&bytes, &charset, &settings.relative_base, resolver, settings);
            let stamp = now_millis()
                .max(file.modified_at)
                .max(playlist.modified_at);
            playlist.modified_at = stamp;
            record(config, file_name, &playlist.id, stamp);
            Ok(Outcome::Imported)
        } else if playlist_newer {
            export(playlist, &file.name, &charset, config, dir)?;
            Ok(Outcome::Exported)
        } else {
            Ok(Outcome::Unchanged)
        }
    }
}

fn export(
    playlist: &Playlist,
    file_name: &str,
    charset: &Charset,
    config: &mut SyncConfig,
    dir: &dyn SyncDirectory,
) -> io::Result<()> {
    let bytes = write_playlist(&playlist.entries, &config.settings.io, charset);
    let written_at = dir.write(file_name, &bytes)?;
    let stamp = now_millis().max(written_at).max(playlist.modified_at);
    record(config, file_name, &playlist.id, stamp);
    Ok(())
}

fn record(config: &mut SyncConfig, file_name: &str, playlist_id: &str, stamp: u64) {
    config.synced.remove(file_name);
    config.synced.insert(
        file_name.to_string(),
        SyncedFile {
            playlist_id: playlist_id.to_string(),
            last_synced_at: stamp,
        },
    );
}
