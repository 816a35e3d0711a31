use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Locale-aware comparison used by search and sort.
pub trait Collator: Send + Sync {
    /// Collation key; strings with equal keys are equal at primary strength.
    fn key(&self, value: &str) -> String;

    fn compare(&self, a: &str, b: &str) -> Ordering {
        self.key(a).cmp(&self.key(b)).then_with(|| a.cmp(b))
    }

    fn contains(&self, haystack: &str, needle: &str) -> bool {
        self.key(haystack).contains(&self.key(needle))
    }
}

/// Root-locale collator: compatibility decomposition, case folding and,
/// optionally, accent stripping.
#[derive(Clone, Debug)]
pub struct FoldingCollator {
    ignore_accents: bool,
}

impl FoldingCollator {
    pub fn new(ignore_accents: bool) -> Self {
        Self { ignore_accents }
    }
}

impl Default for FoldingCollator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Collator for FoldingCollator {
    fn key(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for ch in value.nfkd() {
            if self.ignore_accents && is_combining_mark(ch) {
                continue;
            }
            out.extend(ch.to_lowercase());
        }
        out
    }
}

/// Display strings and the collator, passed explicitly wherever text is
/// compared or shown.
#[derive(Clone)]
pub struct Localization {
    collator: Arc<dyn Collator>,
    pub unknown_artist: String,
    pub unknown_album: String,
    pub unknown_genre: String,
}

impl Localization {
    pub fn new(collator: Arc<dyn Collator>) -> Self {
        Self {
            collator,
            unknown_artist: "Unknown artist".to_string(),
            unknown_album: "Unknown album".to_string(),
            unknown_genre: "Unknown genre".to_string(),
        }
    }

    pub fn collator(&self) -> &dyn Collator {
        self.collator.as_ref()
    }
}

impl Default for Localization {
    fn default() -> Self {
        Self::new(Arc::new(FoldingCollator::default()))
    }
}

impl fmt::Debug for Localization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Localization")
            .field("unknown_artist", &self.unknown_artist)
            .field("unknown_album", &self.unknown_album)
            .field("unknown_genre", &self.unknown_genre)
            .finish_non_exhaustive()
    }
}
