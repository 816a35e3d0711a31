use std::cmp::Ordering;
use std::sync::Arc;

use common::Track;
use serde::{Deserialize, Serialize};

use crate::collate::{Collator, Localization};
use crate::folders::Folder;
use crate::index::{Album, Artist, Genre};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Title,
    Name,
    Artist,
    Album,
    AlbumArtist,
    Year,
    DiscNumber,
    TrackNumber,
    Duration,
    DateAdded,
    DateModified,
    FileName,
    Path,
    TrackCount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortValue<'a> {
    Text(&'a str),
    Number(i64),
    Missing,
}

/// A named entry of an entity's sort menu: the keys applied in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortOption {
    pub name: &'static str,
    pub keys: &'static [SortKey],
}

pub trait Sortable {
    const SORT_OPTIONS: &'static [SortOption];

    fn sort_value(&self, key: SortKey) -> SortValue<'_>;
}

pub fn sort_option<T: Sortable>(name: &str) -> Option<&'static SortOption> {
    T::SORT_OPTIONS.iter().find(|option| option.name == name)
}

impl<T: Sortable> Sortable for Arc<T> {
    const SORT_OPTIONS: &'static [SortOption] = T::SORT_OPTIONS;

    fn sort_value(&self, key: SortKey) -> SortValue<'_> {
        self.as_ref().sort_value(key)
    }
}

fn text(value: Option<&str>) -> SortValue<'_> {
    match value {
        Some(value) if !value.trim().is_empty() => SortValue::Text(value),
        _ => SortValue::Missing,
    }
}

fn number<N: Into<i64>>(value: Option<N>) -> SortValue<'static> {
    value.map(|v| SortValue::Number(v.into())).unwrap_or(SortValue::Missing)
}

impl Sortable for Track {
    const SORT_OPTIONS: &'static [SortOption] = &[
        SortOption {
            name: "title",
            keys: &[SortKey::Title, SortKey::Artist, SortKey::Album],
        },
        SortOption {
            name: "artist",
            keys: &[
                SortKey::Artist,
                SortKey::Album,
                SortKey::DiscNumber,
                SortKey::TrackNumber,
                SortKey::Title,
            ],
        },
        SortOption {
            name: "album",
            keys: &[
                SortKey::Album,
                SortKey::DiscNumber,
                SortKey::TrackNumber,
                SortKey::Title,
            ],
        },
        SortOption {
            name: "album_artist",
            keys: &[SortKey::AlbumArtist, SortKey::Album, SortKey::TrackNumber],
        },
        SortOption {
            name: "year",
            keys: &[SortKey::Year, SortKey::Album, SortKey::TrackNumber],
        },
        SortOption {
            name: "duration",
            keys: &[SortKey::Duration, SortKey::Title],
        },
        SortOption {
            name: "date_added",
            keys: &[SortKey::DateAdded, SortKey::Title],
        },
        SortOption {
            name: "date_modified",
            keys: &[SortKey::DateModified, SortKey::Title],
        },
        SortOption {
            name: "file_name",
            keys: &[SortKey::FileName],
        },
        SortOption {
            name: "path",
            keys: &[SortKey::Path],
        },
    ];

    fn sort_value(&self, key: SortKey) -> SortValue<'_> {
        match key {
            SortKey::Title | SortKey::Name => SortValue::Text(self.display_title()),
            SortKey::Artist => text(self.artists.first().map(String::as_str)),
            SortKey::Album => text(self.album.as_deref()),
            SortKey::AlbumArtist => text(self.album_artist.as_deref()),
            SortKey::Year => number(self.year),
            SortKey::DiscNumber => number(self.disc_no),
            SortKey::TrackNumber => number(self.track_no),
            SortKey::Duration => number(Some(self.duration_ms)),
            SortKey::DateAdded => unsigned(self.date_added),
            SortKey::DateModified => unsigned(self.date_modified),
            SortKey::FileName => SortValue::Text(&self.file_name),
            SortKey::Path => SortValue::Text(&self.path),
            SortKey::TrackCount => SortValue::Missing,
        }
    }
}

fn unsigned(value: u64) -> SortValue<'static> {
    SortValue::Number(i64::try_from(value).unwrap_or(i64::MAX))
}

fn count(value: usize) -> SortValue<'static> {
    SortValue::Number(i64::try_from(value).unwrap_or(i64::MAX))
}

impl Sortable for Album {
    const SORT_OPTIONS: &'static [SortOption] = &[
        SortOption {
            name: "title",
            keys: &[SortKey::Title, SortKey::AlbumArtist],
        },
        SortOption {
            name: "artist",
            keys: &[SortKey::AlbumArtist, SortKey::Year, SortKey::Title],
        },
        SortOption {
            name: "year",
            keys: &[SortKey::Year, SortKey::Title],
        },
        SortOption {
            name: "date_added",
            keys: &[SortKey::DateAdded, SortKey::Title],
        },
        SortOption {
            name: "track_count",
            keys: &[SortKey::TrackCount, SortKey::Title],
        },
    ];

    fn sort_value(&self, key: SortKey) -> SortValue<'_> {
        match key {
            SortKey::Title | SortKey::Name | SortKey::Album => text(self.title.as_deref()),
            SortKey::Artist | SortKey::AlbumArtist => text(self.album_artist.as_deref()),
            SortKey::Year => number(self.year),
            SortKey::Duration => unsigned(self.stats.duration_ms),
            SortKey::DateAdded => unsigned(self.stats.date_added),
            SortKey::DateModified => unsigned(self.stats.date_modified),
            SortKey::TrackCount => count(self.stats.track_count),
            _ => SortValue::Missing,
        }
    }
}

const GROUP_OPTIONS: &[SortOption] = &[
    SortOption {
        name: "name",
        keys: &[SortKey::Name],
    },
    SortOption {
        name: "track_count",
        keys: &[SortKey::TrackCount, SortKey::Name],
    },
    SortOption {
        name: "duration",
        keys: &[SortKey::Duration, SortKey::Name],
    },
];

impl Sortable for Artist {
    const SORT_OPTIONS: &'static [SortOption] = GROUP_OPTIONS;

    fn sort_value(&self, key: SortKey) -> SortValue<'_> {
        match key {
            SortKey::Name | SortKey::Title | SortKey::Artist => text(self.name.as_deref()),
            SortKey::TrackCount => count(self.stats.track_count),
            SortKey::Duration => unsigned(self.stats.duration_ms),
            SortKey::DateAdded => unsigned(self.stats.date_added),
            _ => SortValue::Missing,
        }
    }
}

impl Sortable for Genre {
    const SORT_OPTIONS: &'static [SortOption] = GROUP_OPTIONS;

    fn sort_value(&self, key: SortKey) -> SortValue<'_> {
        match key {
            SortKey::Name | SortKey::Title => text(self.name.as_deref()),
            SortKey::TrackCount => count(self.stats.track_count),
            SortKey::Duration => unsigned(self.stats.duration_ms),
            SortKey::DateAdded => unsigned(self.stats.date_added),
            _ => SortValue::Missing,
        }
    }
}

impl Sortable for Folder {
    const SORT_OPTIONS: &'static [SortOption] = &[
        SortOption {
            name: "name",
            keys: &[SortKey::Name],
        },
        SortOption {
            name: "date_added",
            keys: &[SortKey::DateAdded, SortKey::Name],
        },
        SortOption {
            name: "date_modified",
            keys: &[SortKey::DateModified, SortKey::Name],
        },
    ];

    fn sort_value(&self, key: SortKey) -> SortValue<'_> {
        match key {
            SortKey::Name | SortKey::Title | SortKey::FileName => SortValue::Text(&self.name),
            SortKey::Path => SortValue::Text(&self.path),
            SortKey::DateAdded => unsigned(self.date_added),
            SortKey::DateModified => unsigned(self.date_modified),
            SortKey::TrackCount => count(self.tracks.len()),
            _ => SortValue::Missing,
        }
    }
}

/// Missing values sort after present ones.
pub fn compare_values(a: SortValue<'_>, b: SortValue<'_>, collator: &dyn Collator) -> Ordering {
    match (a, b) {
        (SortValue::Text(a), SortValue::Text(b)) => collator.compare(a, b),
        (SortValue::Number(a), SortValue::Number(b)) => a.cmp(&b),
        (SortValue::Missing, SortValue::Missing) => Ordering::Equal,
        (SortValue::Missing, _) => Ordering::Greater,
        (_, SortValue::Missing) => Ordering::Less,
        (SortValue::Number(_), SortValue::Text(_)) => Ordering::Less,
        (SortValue::Text(_), SortValue::Number(_)) => Ordering::Greater,
    }
}

pub fn compare_by_keys<S: Sortable + ?Sized>(
    a: &S,
    b: &S,
    keys: &[SortKey],
    collator: &dyn Collator,
) -> Ordering {
    for key in keys {
        let ordering = compare_values(a.sort_value(*key), b.sort_value(*key), collator);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Stable multi-key sort; a descending sort reverses the ascending result.
pub fn sort<T>(items: &[T], keys: &[SortKey], ascending: bool, localization: &Localization) -> Vec<T>
where
    T: Sortable + Clone,
{
    sort_by(items, keys, ascending, localization, |item| item)
}

pub fn sort_by<T, S, F>(
    items: &[T],
    keys: &[SortKey],
    ascending: bool,
    localization: &Localization,
    select: F,
) -> Vec<T>
where
    T: Clone,
    S: Sortable + ?Sized,
    F: Fn(&T) -> &S,
{
    let collator = localization.collator();
    let mut out = items.to_vec();
    out.sort_by(|a, b| compare_by_keys(select(a), select(b), keys, collator));
    if !ascending {
        out.reverse();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn track(title: &str, added: u64) -> Arc<Track> {
        let mut track = Track::new(&format!("/m/{}-{}.mp3", title, added));
        track.title = Some(title.to_string());
        track.date_added = added;
        Arc::new(track)
    }

    fn paths(tracks: &[Arc<Track>]) -> Vec<&str> {
        tracks.iter().map(|t| t.path.as_str()).collect()
    }

    #[test]
    fn sorts_titles_with_collator() {
        let tracks = vec![track("banana", 1), track("Apple", 2), track("cherry", 3)];
        let loc = Localization::default();
        let sorted = sort(&tracks, &[SortKey::Title], true, &loc);
        let titles: Vec<&str> = sorted.iter().map(|t| t.display_title()).collect();
        assert_eq!(titles, vec!["Apple", "banana", "cherry"]);
    }

    #[test]
    fn later_keys_break_ties() {
        let tracks = vec![track("same", 3), track("same", 1), track("other", 2)];
        let loc = Localization::default();
        let sorted = sort(&tracks, &[SortKey::Title, SortKey::DateAdded], true, &loc);
        assert_eq!(
            paths(&sorted),
            vec!["/m/other-2.mp3", "/m/same-1.mp3", "/m/same-3.mp3"]
        );
    }

    #[test]
    fn equal_keys_keep_input_order() {
        let tracks = vec![track("x", 5), track("x", 1), track("x", 3)];
        let loc = Localization::default();
        let sorted = sort(&tracks, &[SortKey::Title], true, &loc);
        assert_eq!(paths(&sorted), paths(&tracks));
    }

    #[test]
    fn missing_values_sort_last() {
        let mut with_year = Track::new("/m/a.mp3");
        with_year.year = Some(2001);
        let without_year = Track::new("/m/b.mp3");
        let loc = Localization::default();
        let sorted = sort(&[without_year, with_year], &[SortKey::Year], true, &loc);
        assert_eq!(sorted[0].year, Some(2001));
    }

    #[test]
    fn sort_by_projects_pairs() {
        let pairs = vec![("first", track("b", 1)), ("second", track("a", 2))];
        let loc = Localization::default();
        let sorted = sort_by(&pairs, &[SortKey::Title], true, &loc, |(_, t)| t);
        assert_eq!(sorted[0].0, "second");
    }

    #[test]
    fn named_options_resolve() {
        let option = sort_option::<Track>("date_added").unwrap();
        assert_eq!(option.keys, &[SortKey::DateAdded, SortKey::Title]);
        assert!(sort_option::<Album>("track_count").is_some());
        assert!(sort_option::<Arc<Artist>>("name").is_some());
        assert!(sort_option::<Folder>("duration").is_none());
    }

    proptest! {
        #[test]
        fn sort_is_stable(titles in prop::collection::vec("[ab]", 0..20)) {
            let tracks: Vec<Arc<Track>> = titles
                .iter()
                .enumerate()
                .map(|(i, t)| track(t, i as u64))
                .collect();
            let loc = Localization::default();
            let sorted = sort(&tracks, &[SortKey::Title], true, &loc);
            for pair in sorted.windows(2) {
                if pair[0].display_title() == pair[1].display_title() {
                    prop_assert!(pair[0].date_added < pair[1].date_added);
                }
            }
        }

        #[test]
        fn descending_reverses_unique_keys(values in prop::collection::hash_set(0u64..1000, 0..20)) {
            let tracks: Vec<Arc<Track>> = values.iter().map(|v| track("t", *v)).collect();
            let loc = Localization::default();
            let mut ascending = sort(&tracks, &[SortKey::DateAdded], true, &loc);
            let descending = sort(&tracks, &[SortKey::DateAdded], false, &loc);
            ascending.reverse();
            prop_assert_eq!(paths(&ascending), paths(&descending));
        }
    }
}
