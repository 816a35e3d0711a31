mod config;

use std::env;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use cache::BoundedCache;
use common::{file_name_of, stable_id, Track, UnfilteredTrackIndex};
use config::{config_path_from_env, load_or_create_config, resolve_path, CatalogConfig};
use library::{
    Catalog, CatalogInputs, FoldingCollator, LibraryIndex, Localization, SnapshotStore,
    SortKey,
};
use playlist::{FsSyncDirectory, PathResolver, PlaylistError, PlaylistStore, PlaylistSync};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: catalog <command>
  import <tracks.json>      replace the stored track snapshot
  stats                     print catalog counts
  search <query>...         list matching tracks by title
  playlists                 list stored playlists
  map <playlist> <file>     sync a playlist (id or name) with a file in sync_dir
  sync                      reconcile mapped playlists with sync_dir";

type CliResult<T> = Result<T, Box<dyn Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    }

    let mut args = env::args().skip(1);
    let command = args.next().ok_or(USAGE)?;
    let rest: Vec<String> = args.collect();
    match (command.as_str(), rest.as_slice()) {
        ("import", [file]) => import(&config_path, &config, Path::new(file)),
        ("stats", []) => stats(&config_path, &config).await,
        ("search", queries) if !queries.is_empty() => {
            search(&config_path, &config, queries).await
        }
        ("playlists", []) => playlists(&config_path, &config).await,
        ("map", [name, file]) => map(&config_path, &config, name, file),
        ("sync", []) => sync(&config_path, &config).await,
        _ => Err(USAGE.into()),
    }
}

fn localization(config: &CatalogConfig) -> Localization {
    Localization::new(Arc::new(FoldingCollator::new(config.ignore_accents)))
}

fn import(config_path: &Path, config: &CatalogConfig, file: &Path) -> CliResult<()> {
    let bytes = fs::read(file)?;
    let tracks: Vec<Track> = serde_json::from_slice(&bytes)?;
    let mut index = UnfilteredTrackIndex::new(None);
    let mut replaced = 0usize;
    for mut track in tracks {
        if track.path.trim().is_empty() {
            warn!("Skipping track without a path: {:?}", track.id);
            continue;
        }
        if track.id.is_empty() {
            track.id = stable_id(&track.path);
        }
        if track.file_name.is_empty() {
            track.file_name = file_name_of(&track.path).to_string();
        }
        if index.insert(track).is_some() {
            replaced += 1;
        }
    }
    let store = SnapshotStore::open(&resolve_path(config_path, &config.snapshot_path))?;
    store.save(&index)?;
    println!(
        "Imported {} tracks ({} duplicate ids replaced)",
        index.len(),
        replaced
    );
    Ok(())
}

async fn load_catalog(
    config_path: &Path,
    config: &CatalogConfig,
) -> CliResult<(Catalog, Arc<LibraryIndex>)> {
    let store = SnapshotStore::open(&resolve_path(config_path, &config.snapshot_path))?;
    let catalog = Catalog::new(CatalogInputs {
        tracks: Arc::new(store.load_or_default(None)),
        blacklist: config.blacklist.clone(),
        whitelist: config.whitelist.clone(),
        localization: localization(config),
    });
    let index = match catalog.rebuild().await? {
        Some(index) => index,
        None => catalog.index(),
    };
    Ok((catalog, index))
}

async fn stats(config_path: &Path, config: &CatalogConfig) -> CliResult<()> {
    let (_, index) = load_catalog(config_path, config).await?;
    let stats = index.stats();
    println!("tracks:        {}", stats.tracks);
    println!("albums:        {}", stats.albums);
    println!("artists:       {}", stats.artists);
    println!("album artists: {}", stats.album_artists);
    println!("genres:        {}", stats.genres);
    println!("folders:       {}", stats.folders);
    println!("filtered out:  {}", stats.filtered_out);
    Ok(())
}

async fn search(config_path: &Path, config: &CatalogConfig, queries: &[String]) -> CliResult<()> {
    let (catalog, index) = load_catalog(config_path, config).await?;
    let localization = catalog.localization();
    let tracks: Arc<Vec<Arc<Track>>> = Arc::new(index.tracks.values().cloned().collect());
    // Queries that collate equal share one result.
    let results: BoundedCache<String, Arc<Vec<Arc<Track>>>> =
        BoundedCache::new(config.cache_capacity);

    for query in queries {
        let key = localization.collator().key(query.trim());
        let tracks = Arc::clone(&tracks);
        let loc = localization.clone();
        let text = query.clone();
        let found = results
            .get_or_create(key, move || async move {
                let matched = library::search(&tracks, &text, &loc);
                Ok(Arc::new(library::sort(
                    &matched,
                    &[SortKey::Title, SortKey::Path],
                    true,
                    &loc,
                )))
            })
            .await?;

        println!("{:?}: {} tracks", query, found.len());
        for track in found.iter() {
            let artist = if track.artists.is_empty() {
                localization.unknown_artist.clone()
            } else {
                track.artists.join(", ")
            };
            println!("  {} - {}  [{}]", artist, track.display_title(), track.path);
        }
    }
    results.settled().await;
    Ok(())
}

async fn playlists(config_path: &Path, config: &CatalogConfig) -> CliResult<()> {
    let (catalog, index) = load_catalog(config_path, config).await?;
    let store = PlaylistStore::open(&resolve_path(config_path, &config.playlists_path))?;
    let resolver = PathResolver::from_index(&index);
    let lists = store.list_playlists()?;
    let lists = library::sort(&lists, &[SortKey::Name], true, &catalog.localization());
    for list in &lists {
        let realized = playlist::realize(list, &resolver, &config.playlist_io);
        println!(
            "{}  {} entries, {} unresolved  ({})",
            list.name,
            realized.entries.len(),
            realized.invalid_count(),
            list.id
        );
    }
    Ok(())
}

fn map(config_path: &Path, config: &CatalogConfig, wanted: &str, file: &str) -> CliResult<()> {
    let store = PlaylistStore::open(&resolve_path(config_path, &config.playlists_path))?;
    let existing = store
        .list_playlists()?
        .into_iter()
        .find(|list| list.id == wanted || list.name == wanted);
    let list = match existing {
        Some(list) => list,
        None => store.create_playlist(wanted.to_string(), Vec::new())?,
    };
    let mut sync_config = store.load_sync_config()?;
    sync_config.set_target(list.id.clone(), file);
    store.save_sync_config(&sync_config)?;
    println!("{} ({}) -> {}", list.name, list.id, file);
    Ok(())
}

async fn sync(config_path: &Path, config: &CatalogConfig) -> CliResult<()> {
    let sync_dir = config.sync_dir.trim();
    if sync_dir.is_empty() {
        return Err("sync_dir is not set in the config".into());
    }
    let (_, index) = load_catalog(config_path, config).await?;
    let store = PlaylistStore::open(&resolve_path(config_path, &config.playlists_path))?;
    let dir = FsSyncDirectory::new(resolve_path(config_path, sync_dir));
    let io = config.playlist_io.clone();
    let charset = config.m3u_charset.clone();

    let report = tokio::task::spawn_blocking(move || -> Result<_, PlaylistError> {
        let resolver = PathResolver::from_index(&index);
        let mut lists = store.list_playlists()?;
        let mut sync_config = store.load_sync_config()?;
        sync_config.settings.io = io;
        sync_config.settings.charset = charset;

        let engine = PlaylistSync::new();
        let outcome = engine.run(&mut lists, &mut sync_config, &dir, &resolver);
        for line in engine.take_log() {
            println!("{}", line);
        }
        let report = outcome?;
        for id in report.changed() {
            if let Some(list) = lists.iter().find(|list| &list.id == id) {
                store.save_playlist(list)?;
            }
        }
        store.save_sync_config(&sync_config)?;
        Ok(report)
    })
    .await??;

    info!(
        "Sync finished: {} imported, {} exported, {} unchanged, {} skipped, {} missing, {} failed",
        report.imported.len(),
        report.exported.len(),
        report.unchanged.len(),
        report.skipped.len(),
        report.nonexistent.len(),
        report.failed.len()
    );
    Ok(())
}
