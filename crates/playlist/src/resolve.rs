use std::collections::HashMap;
use std::sync::Arc;

use common::{file_name_of, fold_key, normalize_location, Track};
use library::LibraryIndex;

use crate::settings::PlaylistIoSettings;

/// True for `scheme://...` locations other than `file://`.
pub fn is_foreign_uri(location: &str) -> bool {
    match location.trim().split_once("://") {
        Some((scheme, _)) => {
            scheme.len() > 1
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && !scheme.eq_ignore_ascii_case("file")
        }
        None => false,
    }
}

/// Lookup tables from playlist locations to library tracks.
///
/// When several tracks share a key the first one in library order wins.
#[derive(Clone, Debug, Default)]
pub struct PathResolver {
    exact: HashMap<String, Arc<Track>>,
    folded: HashMap<String, Arc<Track>>,
    base: HashMap<String, Arc<Track>>,
    folded_base: HashMap<String, Arc<Track>>,
}

impl PathResolver {
    pub fn new<'a>(tracks: impl IntoIterator<Item = &'a Arc<Track>>) -> Self {
        let mut resolver = Self::default();
        for track in tracks {
            let path = normalize_location(&track.path);
            let name = file_name_of(&path).to_string();
            resolver
                .folded_base
                .entry(fold_key(&name))
                .or_insert_with(|| Arc::clone(track));
            resolver
                .base
                .entry(name)
                .or_insert_with(|| Arc::clone(track));
            resolver
                .folded
                .entry(fold_key(&path))
                .or_insert_with(|| Arc::clone(track));
            resolver
                .exact
                .entry(path)
                .or_insert_with(|| Arc::clone(track));
        }
        resolver
    }

    pub fn from_index(index: &LibraryIndex) -> Self {
        Self::new(index.tracks.values())
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// `location` must already be joined against the playlist's directory.
    pub fn resolve(&self, location: &str, settings: &PlaylistIoSettings) -> Option<&Arc<Track>> {
        if is_foreign_uri(location) {
            return None;
        }
        let location = normalize_location(location);
        if location.is_empty() {
            return None;
        }
        if settings.ignore_location {
            let name = file_name_of(&location);
            if settings.case_sensitive {
                self.base.get(name)
            } else {
                self.folded_base.get(&fold_key(name))
            }
        } else if settings.case_sensitive {
            self.exact.get(&location)
        } else {
            self.exact
                .get(&location)
                .or_else(|| self.folded.get(&fold_key(&location)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(paths: &[&str]) -> PathResolver {
        let tracks: Vec<Arc<Track>> = paths.iter().map(|p| Arc::new(Track::new(p))).collect();
        PathResolver::new(&tracks)
    }

    fn resolved_path(resolver: &PathResolver, location: &str, settings: &PlaylistIoSettings) -> Option<String> {
        resolver.resolve(location, settings).map(|t| t.path.clone())
    }

    #[test]
    fn classifies_uris() {
        assert!(is_foreign_uri("http://invalid"));
        assert!(is_foreign_uri("smb+tls://host/share"));
        assert!(!is_foreign_uri("file:///music/a.mp3"));
        assert!(!is_foreign_uri("D:\\D"));
        assert!(!is_foreign_uri("C://odd"));
        assert!(!is_foreign_uri("dir/a"));
    }

    #[test]
    fn folded_lookup_unless_case_sensitive() {
        let resolver = resolver(&["/Music/Song.mp3"]);
        let mut settings = PlaylistIoSettings::default();
        assert_eq!(
            resolved_path(&resolver, "/music/SONG.mp3", &settings).as_deref(),
            Some("/Music/Song.mp3")
        );
        settings.case_sensitive = true;
        assert!(resolver.resolve("/music/SONG.mp3", &settings).is_none());
        assert!(resolver.resolve("/Music/Song.mp3", &settings).is_some());
    }

    #[test]
    fn ignore_location_matches_base_name_first_wins() {
        let resolver = resolver(&["/a/same.mp3", "/b/same.mp3"]);
        let settings = PlaylistIoSettings {
            ignore_location: true,
            ..PlaylistIoSettings::default()
        };
        assert_eq!(
            resolved_path(&resolver, "elsewhere/SAME.mp3", &settings).as_deref(),
            Some("/a/same.mp3")
        );
        assert!(resolver.resolve("http://host/same.mp3", &settings).is_none());
    }
}
