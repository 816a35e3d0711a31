use std::collections::BTreeMap;
use std::sync::Arc;

use common::{normalize_location, path_segments, Track};

/// One directory of the library. `path` is slash-separated without a leading
/// slash; the root is the empty string.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Folder {
    pub path: String,
    pub name: String,
    /// Tracks whose parent directory is exactly this folder.
    pub tracks: Vec<Arc<Track>>,
    /// Paths of folders exactly one segment below this one, in discovery order.
    pub children: Vec<String>,
    /// Earliest `date_added` over direct tracks, 0 without direct tracks.
    pub date_added: u64,
    /// Latest `date_modified` over direct tracks, 0 without direct tracks.
    pub date_modified: u64,
}

/// Path-keyed folder map. Recursive figures are walked on demand and never
/// stored on the nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct FolderTree {
    folders: BTreeMap<String, Folder>,
}

impl Default for FolderTree {
    fn default() -> Self {
        let mut folders = BTreeMap::new();
        folders.insert(String::new(), Folder::default());
        Self { folders }
    }
}

impl FolderTree {
    pub fn build<'a>(tracks: impl IntoIterator<Item = &'a Arc<Track>>) -> Self {
        let mut tree = Self::default();
        for track in tracks {
            let normalized = normalize_location(&track.path);
            let segments = path_segments(&normalized);
            let dirs = &segments[..segments.len().saturating_sub(1)];

            let mut parent = String::new();
            for (depth, name) in dirs.iter().enumerate() {
                let path = dirs[..=depth].join("/");
                if !tree.folders.contains_key(&path) {
                    tree.folders.insert(
                        path.clone(),
                        Folder {
                            path: path.clone(),
                            name: name.to_string(),
                            ..Folder::default()
                        },
                    );
                    if let Some(parent_folder) = tree.folders.get_mut(&parent) {
                        parent_folder.children.push(path.clone());
                    }
                }
                parent = path;
            }

            if let Some(folder) = tree.folders.get_mut(&parent) {
                if folder.tracks.is_empty() {
                    folder.date_added = track.date_added;
                    folder.date_modified = track.date_modified;
                } else {
                    folder.date_added = folder.date_added.min(track.date_added);
                    folder.date_modified = folder.date_modified.max(track.date_modified);
                }
                folder.tracks.push(Arc::clone(track));
            }
        }
        tree
    }

    pub fn root(&self) -> &Folder {
        &self.folders[""]
    }

    pub fn get(&self, path: &str) -> Option<&Folder> {
        self.folders.get(folder_key(path).as_str())
    }

    pub fn parent(&self, path: &str) -> Option<&Folder> {
        let key = folder_key(path);
        if key.is_empty() {
            return None;
        }
        let parent = match key.rfind('/') {
            Some(idx) => &key[..idx],
            None => "",
        };
        self.folders.get(parent)
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root().tracks.is_empty() && self.root().children.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Folder> {
        self.folders.values()
    }

    /// Every folder strictly below `path`, depth-first in child order.
    pub fn descendants(&self, path: &str) -> Vec<&Folder> {
        let mut out = Vec::new();
        let start = match self.get(path) {
            Some(folder) => folder,
            None => return out,
        };
        let mut stack: Vec<&str> = start.children.iter().rev().map(String::as_str).collect();
        while let Some(next) = stack.pop() {
            if let Some(folder) = self.folders.get(next) {
                out.push(folder);
                stack.extend(folder.children.iter().rev().map(String::as_str));
            }
        }
        out
    }

    /// Direct tracks of all strict descendants of `path`.
    pub fn descendant_tracks(&self, path: &str) -> Vec<Arc<Track>> {
        self.descendants(path)
            .into_iter()
            .flat_map(|folder| folder.tracks.iter().cloned())
            .collect()
    }

    /// Direct tracks of `path` followed by those of its descendants.
    pub fn recursive_tracks(&self, path: &str) -> Vec<Arc<Track>> {
        let mut out: Vec<Arc<Track>> = match self.get(path) {
            Some(folder) => folder.tracks.clone(),
            None => return Vec::new(),
        };
        out.extend(self.descendant_tracks(path));
        out
    }

    pub fn recursive_track_count(&self, path: &str) -> usize {
        let own = self.get(path).map(|f| f.tracks.len()).unwrap_or(0);
        own + self
            .descendants(path)
            .iter()
            .map(|folder| folder.tracks.len())
            .sum::<usize>()
    }
}

fn folder_key(path: &str) -> String {
    path_segments(&normalize_location(path)).join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(path: &str, added: u64, modified: u64) -> Arc<Track> {
        let mut track = Track::new(path);
        track.date_added = added;
        track.date_modified = modified;
        Arc::new(track)
    }

    fn names(tracks: &[Arc<Track>]) -> Vec<&str> {
        tracks.iter().map(|t| t.file_name.as_str()).collect()
    }

    #[test]
    fn single_track_creates_folder_with_aggregates() {
        let tracks = vec![track("/music/track1.mp3", 100, 100)];
        let tree = FolderTree::build(&tracks);
        assert_eq!(tree.len(), 2);
        let music = tree.get("music").unwrap();
        assert_eq!(music.date_added, 100);
        assert_eq!(music.date_modified, 100);
        assert_eq!(names(&music.tracks), vec!["track1.mp3"]);
        assert_eq!(tree.root().children, vec!["music".to_string()]);
        assert!(tree.root().tracks.is_empty());
    }

    #[test]
    fn folders_without_direct_tracks_have_zero_aggregates() {
        let tracks = vec![track("/a/b/c/song.mp3", 7, 9)];
        let tree = FolderTree::build(&tracks);
        for path in ["", "a", "a/b"] {
            let folder = tree.get(path).unwrap();
            assert_eq!(folder.date_added, 0, "{}", path);
            assert_eq!(folder.date_modified, 0, "{}", path);
        }
        assert_eq!(tree.get("a/b/c").unwrap().date_added, 7);
        assert_eq!(tree.parent("a/b/c").map(|f| f.path.as_str()), Some("a/b"));
        assert_eq!(tree.parent("a").map(|f| f.path.as_str()), Some(""));
        assert!(tree.parent("").is_none());
    }

    #[test]
    fn aggregates_take_min_added_and_max_modified() {
        let tracks = vec![
            track("dir/one.mp3", 50, 60),
            track("dir/two.mp3", 40, 80),
            track("dir/three.mp3", 45, 70),
        ];
        let tree = FolderTree::build(&tracks);
        let dir = tree.get("/dir/").unwrap();
        assert_eq!(dir.date_added, 40);
        assert_eq!(dir.date_modified, 80);
    }

    #[test]
    fn every_prefix_is_a_node_with_one_parent() {
        let tracks = vec![
            track("/m/a/1.mp3", 1, 1),
            track("/m/a/x/2.mp3", 1, 1),
            track("/m/b/3.mp3", 1, 1),
            track("/m/4.mp3", 1, 1),
            track("root.mp3", 1, 1),
        ];
        let tree = FolderTree::build(&tracks);
        let paths: Vec<&str> = tree.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["", "m", "m/a", "m/a/x", "m/b"]);
        for folder in tree.iter().filter(|f| !f.path.is_empty()) {
            let parents = tree
                .iter()
                .filter(|p| p.children.contains(&folder.path))
                .count();
            assert_eq!(parents, 1, "{}", folder.path);
        }
        assert_eq!(names(&tree.root().tracks), vec!["root.mp3"]);
    }

    #[test]
    fn recursive_statistics_walk_descendants() {
        let tracks = vec![
            track("/m/top.mp3", 1, 1),
            track("/m/a/1.mp3", 1, 1),
            track("/m/a/2.mp3", 1, 1),
            track("/m/a/x/3.mp3", 1, 1),
            track("/m/a/x/y/4.mp3", 1, 1),
            track("/m/b/5.mp3", 1, 1),
            track("/other/6.mp3", 1, 1),
        ];
        let tree = FolderTree::build(&tracks);

        assert_eq!(
            names(&tree.descendant_tracks("m")),
            vec!["1.mp3", "2.mp3", "3.mp3", "4.mp3", "5.mp3"]
        );
        assert_eq!(names(&tree.recursive_tracks("m"))[0], "top.mp3");
        assert_eq!(tree.recursive_track_count("m"), 6);
        assert_eq!(tree.recursive_track_count("m/a"), 4);
        assert_eq!(tree.recursive_track_count(""), 7);

        let expected: usize = tree
            .descendants("m/a")
            .iter()
            .map(|f| f.tracks.len())
            .sum();
        assert_eq!(tree.descendant_tracks("m/a").len(), expected);
        assert!(tree.descendant_tracks("missing").is_empty());
    }

    #[test]
    fn empty_input_has_only_root() {
        let tree = FolderTree::build(std::iter::empty());
        assert_eq!(tree.len(), 1);
        assert!(tree.is_empty());
    }
}
