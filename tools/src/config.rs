use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use playlist::PlaylistIoSettings;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_CACHE_CAPACITY: usize = 64;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub version: u32,
    pub snapshot_path: String,
    pub playlists_path: String,
    /// Path patterns (regular expressions) excluded from the catalog.
    pub blacklist: Vec<String>,
    /// When non-empty, only paths matching one of these are kept.
    pub whitelist: Vec<String>,
    pub sync_dir: String,
    pub playlist_io: PlaylistIoSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m3u_charset: Option<String>,
    pub ignore_accents: bool,
    pub cache_capacity: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            snapshot_path: "catalog.redb".to_string(),
            playlists_path: "playlists.redb".to_string(),
            blacklist: Vec::new(),
            whitelist: Vec::new(),
            sync_dir: "".to_string(),
            playlist_io: PlaylistIoSettings::default(),
            m3u_charset: None,
            ignore_accents: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Yaml(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("CATALOG_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("catalog.yaml"))
            .unwrap_or_else(|| PathBuf::from("catalog.yaml")),
        Err(_) => PathBuf::from("catalog.yaml"),
    }
}

/// Returns the config and whether it was just written with defaults.
pub fn load_or_create_config(path: &Path) -> Result<(CatalogConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: CatalogConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.snapshot_path.trim().is_empty() {
            config.snapshot_path = "catalog.redb".to_string();
        }
        if config.playlists_path.trim().is_empty() {
            config.playlists_path = "playlists.redb".to_string();
        }
        if config.cache_capacity == 0 {
            config.cache_capacity = DEFAULT_CACHE_CAPACITY;
        }
        if let Some(label) = config.m3u_charset.as_deref() {
            if label.trim().is_empty() {
                config.m3u_charset = None;
            }
        }
        return Ok((config, false));
    }

    let config = CatalogConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &CatalogConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

/// Relative values resolve against the directory holding the config file.
pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}
