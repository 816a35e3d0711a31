//! Case-insensitive keys and the map that stores entries under them.
//!
//! Folding is NFKC normalization followed by lowercasing, with the handful of
//! characters whose lowercase form is not their fold handled explicitly. The
//! folded form is only ever used for equality; display strings are kept as
//! they were first seen.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use unicode_normalization::UnicodeNormalization;

pub fn fold_key(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.trim().nfkc() {
        match ch {
            'ß' | 'ẞ' => out.push_str("ss"),
            'ς' => out.push('σ'),
            _ => out.extend(ch.to_lowercase()),
        }
    }
    out
}

/// Two distinct keys that fold to the same value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FoldCollision {
    pub existing: String,
    pub incoming: String,
}

impl fmt::Display for FoldCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "keys {:?} and {:?} differ only by case",
            self.existing, self.incoming
        )
    }
}

impl std::error::Error for FoldCollision {}

/// Map keyed by folded strings that remembers the first-seen spelling.
///
/// Deserializing input that contains two keys with the same fold fails
/// instead of merging them.
#[derive(Clone, Debug, PartialEq)]
pub struct CaseInsensitiveMap<V> {
    entries: BTreeMap<String, (String, V)>,
}

impl<V> Default for CaseInsensitiveMap<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> CaseInsensitiveMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_from_entries<I>(entries: I) -> Result<Self, FoldCollision>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        let mut map = Self::new();
        for (key, value) in entries {
            map.try_insert(key, value)?;
        }
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(&fold_key(key)).map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.get_mut(&fold_key(key)).map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&fold_key(key))
    }

    /// Spelling under which `key`'s entry was first inserted.
    pub fn original_key(&self, key: &str) -> Option<&str> {
        self.entries.get(&fold_key(key)).map(|(original, _)| original.as_str())
    }

    /// Replaces the value for `key`, keeping the first-seen spelling.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        match self.entries.get_mut(&fold_key(&key)) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.insert(fold_key(&key), (key, value));
                None
            }
        }
    }

    /// Inserts `value`, combining with an existing entry via `merge(existing, incoming)`.
    pub fn insert_with<F>(&mut self, key: impl Into<String>, value: V, merge: F)
    where
        F: FnOnce(V, V) -> V,
    {
        let key = key.into();
        let folded = fold_key(&key);
        let entry = match self.entries.remove(&folded) {
            Some((original, existing)) => (original, merge(existing, value)),
            None => (key, value),
        };
        self.entries.insert(folded, entry);
    }

    /// Inserts only if no entry with the same fold exists.
    pub fn try_insert(&mut self, key: impl Into<String>, value: V) -> Result<(), FoldCollision> {
        let key = key.into();
        let folded = fold_key(&key);
        if let Some((existing, _)) = self.entries.get(&folded) {
            return Err(FoldCollision {
                existing: existing.clone(),
                incoming: key,
            });
        }
        self.entries.insert(folded, (key, value));
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.remove(&fold_key(key)).map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries
            .values()
            .map(|(original, value)| (original.as_str(), value))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values().map(|(_, value)| value)
    }
}

impl<V: Serialize> Serialize for CaseInsensitiveMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (original, value) in self.entries.values() {
            map.serialize_entry(original, value)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for CaseInsensitiveMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(MapVisitor(PhantomData))
    }
}

struct MapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for MapVisitor<V> {
    type Value = CaseInsensitiveMap<V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map with case-insensitively unique keys")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = CaseInsensitiveMap::new();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            map.try_insert(key, value).map_err(de::Error::custom)?;
        }
        Ok(map)
    }
}
