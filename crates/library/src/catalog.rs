use std::sync::Arc;

use common::UnfilteredTrackIndex;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::collate::Localization;
use crate::filter::PathFilter;
use crate::index::{build_index, LibraryIndex};

/// Everything a rebuild depends on.
#[derive(Clone, Debug, Default)]
pub struct CatalogInputs {
    pub tracks: Arc<UnfilteredTrackIndex>,
    pub blacklist: Vec<String>,
    pub whitelist: Vec<String>,
    pub localization: Localization,
}

impl CatalogInputs {
    pub fn build(&self) -> LibraryIndex {
        let filter = PathFilter::lenient(&self.blacklist, &self.whitelist);
        build_index(&self.tracks, &filter, &self.localization)
    }
}

struct Published {
    generation: u64,
    index: Arc<LibraryIndex>,
}

struct CatalogInner {
    inputs: RwLock<(u64, CatalogInputs)>,
    published: RwLock<Published>,
}

/// Holds the current inputs and the last index built from them.
///
/// Every setter bumps the generation. A rebuild publishes only if no setter
/// ran while it was building, so readers never see an index for stale inputs.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<CatalogInner>,
}

impl Catalog {
    pub fn new(inputs: CatalogInputs) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                inputs: RwLock::new((1, inputs)),
                published: RwLock::new(Published {
                    generation: 0,
                    index: Arc::new(LibraryIndex::empty()),
                }),
            }),
        }
    }

    pub fn index(&self) -> Arc<LibraryIndex> {
        Arc::clone(&self.inner.published.read().index)
    }

    pub fn generation(&self) -> u64 {
        self.inner.inputs.read().0
    }

    /// True when the published index reflects the latest inputs.
    pub fn is_current(&self) -> bool {
        // Never hold `published` while taking `inputs`; `publish` locks them
        // in the other order.
        let latest = self.generation();
        self.inner.published.read().generation == latest
    }

    pub fn localization(&self) -> Localization {
        self.inner.inputs.read().1.localization.clone()
    }

    pub fn set_tracks(&self, tracks: Arc<UnfilteredTrackIndex>) {
        self.update(|inputs| inputs.tracks = tracks);
    }

    pub fn set_blacklist(&self, blacklist: Vec<String>) {
        self.update(|inputs| inputs.blacklist = blacklist);
    }

    pub fn set_whitelist(&self, whitelist: Vec<String>) {
        self.update(|inputs| inputs.whitelist = whitelist);
    }

    pub fn set_localization(&self, localization: Localization) {
        self.update(|inputs| inputs.localization = localization);
    }

    fn update(&self, apply: impl FnOnce(&mut CatalogInputs)) {
        let mut guard = self.inner.inputs.write();
        apply(&mut guard.1);
        guard.0 += 1;
    }

    fn snapshot(&self) -> (u64, CatalogInputs) {
        let guard = self.inner.inputs.read();
        (guard.0, guard.1.clone())
    }

    /// Publishes `index` if `generation` is still the latest. Holding the
    /// inputs lock keeps a setter from slipping in between check and swap.
    fn publish(&self, generation: u64, index: LibraryIndex) -> Option<Arc<LibraryIndex>> {
        let inputs = self.inner.inputs.read();
        if inputs.0 != generation {
            debug!(
                "Dropping superseded rebuild (generation {}, latest {})",
                generation, inputs.0
            );
            return None;
        }
        let mut published = self.inner.published.write();
        if published.generation == generation {
            return Some(Arc::clone(&published.index));
        }
        let index = Arc::new(index);
        published.generation = generation;
        published.index = Arc::clone(&index);
        let stats = index.stats();
        info!(
            "Catalog ready: {} tracks, {} albums, {} artists, {} genres",
            stats.tracks, stats.albums, stats.artists, stats.genres
        );
        Some(index)
    }

    /// Rebuilds on the calling thread. `None` if the inputs changed meanwhile.
    pub fn rebuild_blocking(&self) -> Option<Arc<LibraryIndex>> {
        let (generation, inputs) = self.snapshot();
        let index = inputs.build();
        self.publish(generation, index)
    }

    /// Rebuilds on the blocking pool. `Ok(None)` if the inputs changed meanwhile.
    pub async fn rebuild(&self) -> Result<Option<Arc<LibraryIndex>>, tokio::task::JoinError> {
        let (generation, inputs) = self.snapshot();
        let index = tokio::task::spawn_blocking(move || inputs.build()).await?;
        Ok(self.publish(generation, index))
    }
}
