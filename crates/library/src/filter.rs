use regex::RegexSet;
use tracing::warn;

use crate::LibraryError;

/// Blacklist/whitelist over track paths.
///
/// A path is kept iff the whitelist is empty or matches it, and no blacklist
/// pattern matches it.
#[derive(Clone, Debug)]
pub struct PathFilter {
    blacklist: RegexSet,
    whitelist: RegexSet,
}

impl PathFilter {
    pub fn new<S: AsRef<str>>(blacklist: &[S], whitelist: &[S]) -> Result<Self, LibraryError> {
        Ok(Self {
            blacklist: RegexSet::new(blacklist.iter().map(AsRef::<str>::as_ref))?,
            whitelist: RegexSet::new(whitelist.iter().map(AsRef::<str>::as_ref))?,
        })
    }

    /// Like [`PathFilter::new`] but drops patterns that fail to compile.
    pub fn lenient<S: AsRef<str>>(blacklist: &[S], whitelist: &[S]) -> Self {
        Self {
            blacklist: compile_valid(blacklist, "blacklist"),
            whitelist: compile_valid(whitelist, "whitelist"),
        }
    }

    pub fn allow_all() -> Self {
        Self {
            blacklist: RegexSet::empty(),
            whitelist: RegexSet::empty(),
        }
    }

    pub fn retains(&self, path: &str) -> bool {
        (self.whitelist.is_empty() || self.whitelist.is_match(path))
            && !self.blacklist.is_match(path)
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::allow_all()
    }
}

fn compile_valid<S: AsRef<str>>(patterns: &[S], kind: &str) -> RegexSet {
    let valid: Vec<&str> = patterns
        .iter()
        .map(AsRef::<str>::as_ref)
        .filter(|pattern| match regex::Regex::new(pattern) {
            Ok(_) => true,
            Err(err) => {
                warn!("Ignoring invalid {} pattern {:?}: {}", kind, pattern, err);
                false
            }
        })
        .collect();
    RegexSet::new(valid).unwrap_or_else(|_| RegexSet::empty())
}
