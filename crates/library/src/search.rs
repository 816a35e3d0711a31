use std::sync::Arc;

use common::Track;

use crate::collate::{Collator, Localization};
use crate::folders::Folder;
use crate::index::{Album, Artist, Genre};

/// Text fields a query is matched against.
pub trait Searchable {
    fn searchable_strings(&self) -> Vec<&str>;
}

impl<T: Searchable + ?Sized> Searchable for Arc<T> {
    fn searchable_strings(&self) -> Vec<&str> {
        self.as_ref().searchable_strings()
    }
}

impl<T: Searchable + ?Sized> Searchable for &T {
    fn searchable_strings(&self) -> Vec<&str> {
        (**self).searchable_strings()
    }
}

impl Searchable for Track {
    fn searchable_strings(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(4 + self.artists.len());
        out.extend(self.title.as_deref());
        out.push(self.file_name.as_str());
        out.extend(self.artists.iter().map(String::as_str));
        out.extend(self.album.as_deref());
        out.extend(self.album_artist.as_deref());
        out
    }
}

impl Searchable for Album {
    fn searchable_strings(&self) -> Vec<&str> {
        self.title
            .as_deref()
            .into_iter()
            .chain(self.album_artist.as_deref())
            .collect()
    }
}

impl Searchable for Artist {
    fn searchable_strings(&self) -> Vec<&str> {
        self.name.as_deref().into_iter().collect()
    }
}

impl Searchable for Genre {
    fn searchable_strings(&self) -> Vec<&str> {
        self.name.as_deref().into_iter().collect()
    }
}

impl Searchable for Folder {
    fn searchable_strings(&self) -> Vec<&str> {
        vec![self.name.as_str()]
    }
}

/// True if any searchable string contains `query` under the collator.
pub fn matches<S: Searchable + ?Sized>(item: &S, query: &str, collator: &dyn Collator) -> bool {
    item.searchable_strings()
        .into_iter()
        .filter(|field| !field.is_empty())
        .any(|field| collator.contains(field, query))
}

/// Filters `items` by `query`, keeping their order. A blank query keeps everything.
pub fn search<T>(items: &[T], query: &str, localization: &Localization) -> Vec<T>
where
    T: Searchable + Clone,
{
    search_by(items, query, localization, |item| item)
}

/// Like [`search`], matching against the projection `select` while returning
/// the original items.
pub fn search_by<T, S, F>(items: &[T], query: &str, localization: &Localization, select: F) -> Vec<T>
where
    T: Clone,
    S: Searchable + ?Sized,
    F: Fn(&T) -> &S,
{
    let query = query.trim();
    if query.is_empty() {
        return items.to_vec();
    }
    let collator = localization.collator();
    items
        .iter()
        .filter(|&item| matches(select(item), query, collator))
        .cloned()
        .collect()
}
