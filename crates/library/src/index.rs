use std::collections::HashMap;
use std::sync::Arc;

use common::{fold_key, Track, UnfilteredTrackIndex};
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::collate::Localization;
use crate::filter::PathFilter;
use crate::folders::FolderTree;
use crate::LibraryStats;

/// Case-folded (album, album artist) pair. Empty album means "no album tag".
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlbumKey {
    pub album: String,
    pub album_artist: Option<String>,
}

impl AlbumKey {
    pub fn new(album: &str, album_artist: Option<&str>) -> Self {
        Self {
            album: fold_key(album),
            album_artist: album_artist.map(fold_key).filter(|key| !key.is_empty()),
        }
    }

    pub fn for_track(track: &Track) -> Self {
        Self::new(
            track.album.as_deref().unwrap_or(""),
            track.album_artist.as_deref(),
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AggregateStats {
    pub track_count: usize,
    pub duration_ms: u64,
    pub date_added: u64,
    pub date_modified: u64,
}

impl AggregateStats {
    fn add(&mut self, track: &Track) {
        self.track_count += 1;
        self.duration_ms += u64::from(track.duration_ms);
        self.date_added = self.date_added.max(track.date_added);
        self.date_modified = self.date_modified.max(track.date_modified);
    }
}

#[derive(Clone, Debug, Default)]
pub struct Album {
    pub key: AlbumKey,
    pub title: Option<String>,
    pub album_artist: Option<String>,
    pub year: Option<i32>,
    /// Id of the first member track that carries artwork.
    pub cover_track: Option<String>,
    pub tracks: Vec<Arc<Track>>,
    pub stats: AggregateStats,
}

impl Album {
    pub fn display_title<'a>(&'a self, localization: &'a Localization) -> &'a str {
        self.title
            .as_deref()
            .unwrap_or(localization.unknown_album.as_str())
    }

    pub fn display_artist<'a>(&'a self, localization: &'a Localization) -> &'a str {
        self.album_artist
            .as_deref()
            .unwrap_or(localization.unknown_artist.as_str())
    }
}

/// A performer or album artist and every track credited to it.
#[derive(Clone, Debug, Default)]
pub struct Artist {
    pub key: String,
    pub name: Option<String>,
    pub tracks: Vec<Arc<Track>>,
    pub albums: Vec<AlbumKey>,
    pub stats: AggregateStats,
}

impl Artist {
    pub fn display_name<'a>(&'a self, localization: &'a Localization) -> &'a str {
        self.name
            .as_deref()
            .unwrap_or(localization.unknown_artist.as_str())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Genre {
    pub key: String,
    pub name: Option<String>,
    pub tracks: Vec<Arc<Track>>,
    pub albums: Vec<AlbumKey>,
    pub stats: AggregateStats,
}

impl Genre {
    pub fn display_name<'a>(&'a self, localization: &'a Localization) -> &'a str {
        self.name
            .as_deref()
            .unwrap_or(localization.unknown_genre.as_str())
    }
}

/// The derived catalog. Rebuilt from scratch whenever an input changes.
#[derive(Clone, Debug, Default)]
pub struct LibraryIndex {
    pub root: Option<String>,
    pub tracks: IndexMap<String, Arc<Track>>,
    pub albums: Vec<Album>,
    pub artists: Vec<Artist>,
    pub album_artists: Vec<Artist>,
    pub genres: Vec<Genre>,
    pub folders: FolderTree,
    pub filtered_out: usize,
    album_lookup: HashMap<AlbumKey, usize>,
    artist_lookup: HashMap<String, usize>,
    album_artist_lookup: HashMap<String, usize>,
    genre_lookup: HashMap<String, usize>,
}

impl LibraryIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn track(&self, id: &str) -> Option<&Arc<Track>> {
        self.tracks.get(id)
    }

    pub fn album(&self, key: &AlbumKey) -> Option<&Album> {
        self.album_lookup.get(key).map(|&idx| &self.albums[idx])
    }

    pub fn artist(&self, name: &str) -> Option<&Artist> {
        self.artist_lookup
            .get(&fold_key(name))
            .map(|&idx| &self.artists[idx])
    }

    pub fn album_artist(&self, name: &str) -> Option<&Artist> {
        self.album_artist_lookup
            .get(&fold_key(name))
            .map(|&idx| &self.album_artists[idx])
    }

    pub fn genre(&self, name: &str) -> Option<&Genre> {
        self.genre_lookup
            .get(&fold_key(name))
            .map(|&idx| &self.genres[idx])
    }

    pub fn stats(&self) -> LibraryStats {
        LibraryStats {
            tracks: self.tracks.len(),
            albums: self.albums.len(),
            artists: self.artists.len(),
            album_artists: self.album_artists.len(),
            genres: self.genres.len(),
            folders: self.folders.len(),
            filtered_out: self.filtered_out,
        }
    }
}

/// Display-form vote counter; the most frequent form wins, the first seen on ties.
#[derive(Debug, Default)]
struct Votes {
    forms: Vec<(String, usize)>,
}

impl Votes {
    fn add(&mut self, form: &str) {
        let form = form.trim();
        if form.is_empty() {
            return;
        }
        match self.forms.iter_mut().find(|(existing, _)| existing == form) {
            Some((_, count)) => *count += 1,
            None => self.forms.push((form.to_string(), 1)),
        }
    }

    fn winner(&self) -> Option<String> {
        let mut best: Option<&(String, usize)> = None;
        for candidate in &self.forms {
            if best.map(|b| candidate.1 > b.1).unwrap_or(true) {
                best = Some(candidate);
            }
        }
        best.map(|(form, _)| form.clone())
    }
}

#[derive(Default)]
struct AlbumDraft {
    titles: Votes,
    artists: Votes,
    tracks: Vec<Arc<Track>>,
}

#[derive(Default)]
struct GroupDraft {
    names: Votes,
    tracks: Vec<Arc<Track>>,
    albums: IndexSet<AlbumKey>,
}

impl GroupDraft {
    fn add(&mut self, name: Option<&str>, track: &Arc<Track>, album: &AlbumKey) {
        if let Some(name) = name {
            self.names.add(name);
        }
        self.tracks.push(Arc::clone(track));
        self.albums.insert(album.clone());
    }

    fn finish(self) -> (Option<String>, Vec<Arc<Track>>, Vec<AlbumKey>, AggregateStats) {
        let mut stats = AggregateStats::default();
        for track in &self.tracks {
            stats.add(track);
        }
        (
            self.names.winner(),
            self.tracks,
            self.albums.into_iter().collect(),
            stats,
        )
    }
}

/// Groups a multi-valued field by folded name. Spellings that fold together
/// on one track count once; a track with no usable value lands under `""`.
fn add_to_groups(
    groups: &mut IndexMap<String, GroupDraft>,
    names: &[String],
    track: &Arc<Track>,
    album: &AlbumKey,
) {
    let mut seen: Vec<String> = Vec::new();
    for name in names {
        let key = fold_key(name);
        if key.is_empty() || seen.contains(&key) {
            continue;
        }
        groups.entry(key.clone()).or_default().add(Some(name), track, album);
        seen.push(key);
    }
    if seen.is_empty() {
        groups.entry(String::new()).or_default().add(None, track, album);
    }
}

/// Builds the catalog from raw scanner output.
///
/// Iteration follows the insertion order of `source`, which makes display
/// name tie-breaks deterministic.
pub fn build_index(
    source: &UnfilteredTrackIndex,
    filter: &PathFilter,
    localization: &Localization,
) -> LibraryIndex {
    let mut tracks: IndexMap<String, Arc<Track>> = IndexMap::with_capacity(source.len());
    let mut filtered_out = 0usize;
    for track in source.iter() {
        if filter.retains(&track.path) {
            tracks.insert(track.id.clone(), Arc::new(track.clone()));
        } else {
            filtered_out += 1;
        }
    }

    let mut albums: IndexMap<AlbumKey, AlbumDraft> = IndexMap::new();
    let mut artists: IndexMap<String, GroupDraft> = IndexMap::new();
    let mut album_artists: IndexMap<String, GroupDraft> = IndexMap::new();
    let mut genres: IndexMap<String, GroupDraft> = IndexMap::new();

    for track in tracks.values() {
        let album_key = AlbumKey::for_track(track);
        let draft = albums.entry(album_key.clone()).or_default();
        draft.titles.add(track.album.as_deref().unwrap_or(""));
        draft.artists.add(track.album_artist.as_deref().unwrap_or(""));
        draft.tracks.push(Arc::clone(track));

        add_to_groups(&mut artists, &track.artists, track, &album_key);
        let album_artist: Vec<String> = track.album_artist.iter().cloned().collect();
        add_to_groups(&mut album_artists, &album_artist, track, &album_key);
        add_to_groups(&mut genres, &track.genres, track, &album_key);
    }

    let collator = localization.collator();
    let albums: Vec<Album> = albums
        .into_iter()
        .map(|(key, draft)| {
            let mut members = draft.tracks;
            members.sort_by(|a, b| {
                let disc_a = a.disc_no.unwrap_or(u16::MAX);
                let disc_b = b.disc_no.unwrap_or(u16::MAX);
                let track_a = a.track_no.unwrap_or(u16::MAX);
                let track_b = b.track_no.unwrap_or(u16::MAX);
                disc_a
                    .cmp(&disc_b)
                    .then_with(|| track_a.cmp(&track_b))
                    .then_with(|| collator.compare(a.display_title(), b.display_title()))
                    .then_with(|| a.path.cmp(&b.path))
            });
            let mut stats = AggregateStats::default();
            for track in &members {
                stats.add(track);
            }
            Album {
                key,
                title: draft.titles.winner(),
                album_artist: draft.artists.winner(),
                year: members.iter().find_map(|t| t.year),
                cover_track: members
                    .iter()
                    .find(|t| t.has_artwork)
                    .map(|t| t.id.clone()),
                tracks: members,
                stats,
            }
        })
        .collect();

    let artists = finish_artists(artists);
    let album_artists = finish_artists(album_artists);
    let genres: Vec<Genre> = genres
        .into_iter()
        .map(|(key, draft)| {
            let (name, tracks, albums, stats) = draft.finish();
            Genre {
                key,
                name,
                tracks,
                albums,
                stats,
            }
        })
        .collect();

    let folders = FolderTree::build(tracks.values());

    let album_lookup = albums
        .iter()
        .enumerate()
        .map(|(idx, album)| (album.key.clone(), idx))
        .collect();
    let artist_lookup = key_lookup(artists.iter().map(|a| a.key.as_str()));
    let album_artist_lookup = key_lookup(album_artists.iter().map(|a| a.key.as_str()));
    let genre_lookup = key_lookup(genres.iter().map(|g| g.key.as_str()));

    debug!(
        "Built index: {} tracks ({} filtered), {} albums, {} artists, {} genres, {} folders",
        tracks.len(),
        filtered_out,
        albums.len(),
        artists.len(),
        genres.len(),
        folders.len()
    );

    LibraryIndex {
        root: source.root.clone(),
        tracks,
        albums,
        artists,
        album_artists,
        genres,
        folders,
        filtered_out,
        album_lookup,
        artist_lookup,
        album_artist_lookup,
        genre_lookup,
    }
}

fn finish_artists(groups: IndexMap<String, GroupDraft>) -> Vec<Artist> {
    groups
        .into_iter()
        .map(|(key, draft)| {
            let (name, tracks, albums, stats) = draft.finish();
            Artist {
                key,
                name,
                tracks,
                albums,
                stats,
            }
        })
        .collect()
}

fn key_lookup<'a>(keys: impl Iterator<Item = &'a str>) -> HashMap<String, usize> {
    keys.enumerate()
        .map(|(idx, key)| (key.to_string(), idx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use proptest::prelude::*;

    fn track(path: &str, album: &str, album_artist: &str) -> Track {
        let mut track = Track::new(path);
        track.album = Some(album.to_string());
        track.album_artist = Some(album_artist.to_string());
        track
    }

    fn build(tracks: Vec<Track>) -> LibraryIndex {
        let source = UnfilteredTrackIndex::from_tracks(None, tracks);
        build_index(&source, &PathFilter::allow_all(), &Localization::default())
    }

    #[test]
    fn album_grouping_uses_majority_spelling() {
        let index = build(vec![
            track("/m/1.mp3", "album1", "artist1"),
            track("/m/2.mp3", "ALBUM1", "artist1"),
            track("/m/3.mp3", "ALBUM1", "ARTIST1"),
        ]);
        assert_eq!(index.albums.len(), 1);
        let album = &index.albums[0];
        assert_eq!(album.title.as_deref(), Some("ALBUM1"));
        assert_eq!(album.album_artist.as_deref(), Some("artist1"));
        assert_eq!(album.tracks.len(), 3);
        assert_eq!(index.album_artists.len(), 1);
        assert_eq!(index.album_artists[0].name.as_deref(), Some("artist1"));
    }

    #[test]
    fn exact_ties_keep_first_seen_spelling() {
        let index = build(vec![
            track("/m/1.mp3", "Abbey Road", "The Beatles"),
            track("/m/2.mp3", "ABBEY ROAD", "THE BEATLES"),
        ]);
        assert_eq!(index.albums.len(), 1);
        assert_eq!(index.albums[0].title.as_deref(), Some("Abbey Road"));
        assert_eq!(index.albums[0].album_artist.as_deref(), Some("The Beatles"));
    }

    #[test]
    fn composed_and_decomposed_spellings_share_an_album() {
        let index = build(vec![
            track("/m/1.mp3", "Caf\u{e9} Society", "Beyonc\u{e9}"),
            track("/m/2.mp3", "CAFE\u{301} SOCIETY", "Beyonce\u{301}"),
        ]);
        assert_eq!(index.albums.len(), 1);
        assert_eq!(index.albums[0].tracks.len(), 2);
        assert_eq!(index.albums[0].title.as_deref(), Some("Caf\u{e9} Society"));
        assert_eq!(index.albums[0].album_artist.as_deref(), Some("Beyonc\u{e9}"));
        assert_eq!(index.album_artists.len(), 1);
        assert!(index
            .album(&AlbumKey::new("cafe\u{301} society", Some("BEYONC\u{c9}")))
            .is_some());
    }

    #[test]
    fn same_album_name_with_different_album_artists_splits() {
        let index = build(vec![
            track("/m/1.mp3", "Greatest Hits", "Queen"),
            track("/m/2.mp3", "Greatest Hits", "ABBA"),
        ]);
        assert_eq!(index.albums.len(), 2);
        assert!(index.album(&AlbumKey::new("greatest hits", Some("QUEEN"))).is_some());
    }

    #[test]
    fn multi_valued_artists_and_genres_fan_out() {
        let mut t = Track::new("/m/duet.flac");
        t.artists = vec!["Queen".into(), "David Bowie".into(), "QUEEN".into()];
        t.genres = vec!["Rock".into(), "rock ".into(), "Pop".into()];
        let index = build(vec![t]);
        assert_eq!(index.artists.len(), 2);
        assert_eq!(index.artist("queen").map(|a| a.tracks.len()), Some(1));
        assert_eq!(index.genres.len(), 2);
        assert_eq!(index.genre("ROCK").and_then(|g| g.name.as_deref()), Some("Rock"));
    }

    #[test]
    fn tracks_without_tags_land_under_empty_keys() {
        let index = build(vec![Track::new("/m/untagged.mp3")]);
        assert_eq!(index.albums.len(), 1);
        assert_eq!(index.albums[0].key, AlbumKey::default());
        assert_eq!(index.albums[0].title, None);
        assert_eq!(index.artists[0].key, "");
        assert_eq!(index.genres[0].key, "");
        assert_eq!(index.album_artists[0].key, "");
        let loc = Localization::default();
        assert_eq!(index.albums[0].display_title(&loc), "Unknown album");
        assert_eq!(index.artists[0].display_name(&loc), "Unknown artist");
    }

    #[test]
    fn album_tracks_follow_disc_and_track_numbers() {
        let mut a = track("/m/a.mp3", "LP", "X");
        a.disc_no = Some(2);
        a.track_no = Some(1);
        let mut b = track("/m/b.mp3", "LP", "X");
        b.disc_no = Some(1);
        b.track_no = Some(2);
        b.has_artwork = true;
        b.year = Some(1999);
        let mut c = track("/m/c.mp3", "LP", "X");
        c.disc_no = Some(1);
        c.track_no = Some(1);
        let index = build(vec![a, b.clone(), c]);
        let paths: Vec<&str> = index.albums[0].tracks.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(paths, vec!["/m/c.mp3", "/m/b.mp3", "/m/a.mp3"]);
        assert_eq!(index.albums[0].cover_track.as_deref(), Some(b.id.as_str()));
        assert_eq!(index.albums[0].year, Some(1999));
    }

    #[test]
    fn filters_apply_before_grouping() {
        let source = UnfilteredTrackIndex::from_tracks(
            None,
            vec![
                track("/music/a.mp3", "A", "X"),
                track("/music/skip/b.mp3", "B", "X"),
                track("/other/c.mp3", "C", "X"),
            ],
        );
        let filter = PathFilter::new(&["/skip/"], &["^/music/"]).unwrap();
        let index = build_index(&source, &filter, &Localization::default());
        assert_eq!(index.tracks.len(), 1);
        assert_eq!(index.filtered_out, 2);
        assert_eq!(index.albums.len(), 1);
        assert_eq!(index.stats().tracks, 1);
    }

    #[test]
    fn stats_sum_member_tracks() {
        let mut a = track("/m/a.mp3", "LP", "X");
        a.duration_ms = 1000;
        a.date_added = 5;
        let mut b = track("/m/b.mp3", "LP", "X");
        b.duration_ms = 2500;
        b.date_added = 9;
        let index = build(vec![a, b]);
        let stats = index.albums[0].stats;
        assert_eq!(stats.track_count, 2);
        assert_eq!(stats.duration_ms, 3500);
        assert_eq!(stats.date_added, 9);
    }

    fn ids<'a>(tracks: impl Iterator<Item = &'a Arc<Track>>) -> Vec<String> {
        tracks.map(|t| t.id.clone()).collect()
    }

    fn arb_track() -> impl Strategy<Value = Track> {
        let names = prop::sample::select(vec!["a", "A", "b", "B", "", "Ä", "ä"]);
        (
            "[a-c]{1,3}",
            names.clone(),
            names.clone(),
            prop::collection::vec(names.clone(), 0..3),
            prop::collection::vec(names, 0..3),
        )
            .prop_map(|(file, album, album_artist, artists, genres)| {
                let mut t = Track::new(&format!("/m/{}.mp3", file));
                t.album = Some(album.to_string());
                t.album_artist = Some(album_artist.to_string());
                t.artists = artists.into_iter().map(String::from).collect();
                t.genres = genres.into_iter().map(String::from).collect();
                t
            })
    }

    proptest! {
        #[test]
        fn aggregates_partition_the_track_set(tracks in prop::collection::vec(arb_track(), 0..24)) {
            let index = build(tracks);
            let all: HashSet<String> = index.tracks.keys().cloned().collect();

            let album_ids = ids(index.albums.iter().flat_map(|a| a.tracks.iter()));
            prop_assert_eq!(album_ids.len(), all.len());
            prop_assert_eq!(album_ids.into_iter().collect::<HashSet<_>>(), all.clone());

            let album_artist_ids = ids(index.album_artists.iter().flat_map(|a| a.tracks.iter()));
            prop_assert_eq!(album_artist_ids.len(), all.len());

            for groups in [
                index.artists.iter().map(|a| (a.key.clone(), ids(a.tracks.iter()))).collect::<Vec<_>>(),
                index.genres.iter().map(|g| (g.key.clone(), ids(g.tracks.iter()))).collect::<Vec<_>>(),
            ] {
                let keys: HashSet<&String> = groups.iter().map(|(k, _)| k).collect();
                prop_assert_eq!(keys.len(), groups.len());
                let mut union = HashSet::new();
                for (_, members) in &groups {
                    let unique: HashSet<&String> = members.iter().collect();
                    prop_assert_eq!(unique.len(), members.len());
                    union.extend(members.iter().cloned());
                }
                prop_assert_eq!(&union, &all);
            }

            let album_keys: HashSet<&AlbumKey> = index.albums.iter().map(|a| &a.key).collect();
            prop_assert_eq!(album_keys.len(), index.albums.len());
        }
    }
}
