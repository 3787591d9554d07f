//! Directory classification and source discovery.
//!
//! A directory is a Session or Aggregate store when it holds the matching
//! database file; anything else is Plain. Source discovery for the aggregate
//! at `root` never descends into another aggregate: an aggregate already
//! covers everything beneath it, including a session in its own directory.

use crate::error::Result;
use crate::model::StoreKind;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Role of a directory in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirKind {
    Session,
    Aggregate,
    Plain,
}

impl DirKind {
    pub fn store_kind(self) -> Option<StoreKind> {
        match self {
            DirKind::Session => Some(StoreKind::Session),
            DirKind::Aggregate => Some(StoreKind::Aggregate),
            DirKind::Plain => None,
        }
    }
}

/// How far below the root a walk goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalMode {
    /// The root directory only.
    Single,
    /// Every directory below the root, markers ignored.
    Full,
    /// Every directory below the root, stopping at aggregates.
    #[default]
    SourceDiscovery,
}

/// A store found by [`HierarchyWalker::discover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredStore {
    pub path: PathBuf,
    pub kind: StoreKind,
}

/// Classifies `dir` by its marker files. An aggregate marker wins over a
/// session marker in the same directory; see [`stores_in`] for both.
pub fn classify(dir: &Path) -> DirKind {
    if dir.join(StoreKind::Aggregate.db_file()).is_file() {
        DirKind::Aggregate
    } else if dir.join(StoreKind::Session.db_file()).is_file() {
        DirKind::Session
    } else {
        DirKind::Plain
    }
}

/// Every store kind with a database in `dir`, session first.
pub fn stores_in(dir: &Path) -> Vec<StoreKind> {
    [StoreKind::Session, StoreKind::Aggregate]
        .into_iter()
        .filter(|kind| dir.join(kind.db_file()).is_file())
        .collect()
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_index_dir(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.ends_with(".idx"))
        .unwrap_or(false)
}

pub struct HierarchyWalker;

impl HierarchyWalker {
    /// Stores reachable from `root` under `mode`, sorted by path.
    ///
    /// - `Single`: the stores in `root` itself.
    /// - `Full`: every store in the tree, `root` included.
    /// - `SourceDiscovery`: the sources of an aggregate at `root`. Sessions
    ///   and aggregates below `root`, not descending past any aggregate, plus
    ///   a session sharing `root` with the aggregate. Never the aggregate at
    ///   `root` itself.
    pub fn discover(root: &Path, mode: TraversalMode) -> Result<Vec<DiscoveredStore>> {
        let mut found = Vec::new();

        if mode == TraversalMode::Single {
            found.extend(stores_in(root).into_iter().map(|kind| DiscoveredStore {
                path: root.to_path_buf(),
                kind,
            }));
            return Ok(found);
        }

        let walker = Self::directories(root, mode);
        for entry in walker {
            let entry = entry?;
            let kinds: Vec<StoreKind> = match (mode, entry.depth()) {
                (TraversalMode::SourceDiscovery, 0) => stores_in(entry.path())
                    .into_iter()
                    .filter(|k| *k == StoreKind::Session)
                    .collect(),
                (TraversalMode::SourceDiscovery, _) => {
                    classify(entry.path()).store_kind().into_iter().collect()
                }
                _ => stores_in(entry.path()),
            };
            for kind in kinds {
                found.push(DiscoveredStore {
                    path: entry.path().to_path_buf(),
                    kind,
                });
            }
        }

        found.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!(root = %root.display(), ?mode, stores = found.len(), "discovered stores");
        Ok(found)
    }

    /// Directories that directly contain a file with one of `extensions`,
    /// compared case-insensitively. Sorted. `Single` looks at `root` only;
    /// both descending modes walk the whole tree.
    pub fn input_dirs(
        root: &Path,
        mode: TraversalMode,
        extensions: &[String],
    ) -> Result<Vec<PathBuf>> {
        let wanted: Vec<String> = extensions.iter().map(|e| e.to_ascii_lowercase()).collect();
        let max_depth = if mode == TraversalMode::Single { 1 } else { usize::MAX };

        let mut dirs = BTreeSet::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !(is_hidden(e) || is_index_dir(e)));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let matches = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| wanted.contains(&e.to_ascii_lowercase()))
                .unwrap_or(false);
            if matches {
                if let Some(parent) = entry.path().parent() {
                    dirs.insert(parent.to_path_buf());
                }
            }
        }

        Ok(dirs.into_iter().collect())
    }

    /// Directory walk for `mode`, skipping hidden and index directories and
    /// not following symlinks.
    fn directories(
        root: &Path,
        mode: TraversalMode,
    ) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
        WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| {
                if e.depth() == 0 {
                    return true;
                }
                if !e.file_type().is_dir() || is_hidden(e) || is_index_dir(e) {
                    return false;
                }
                // Aggregates are yielded, their subtrees are not
                mode != TraversalMode::SourceDiscovery || !has_aggregate_ancestor_below_root(e)
            })
    }
}

/// True when some directory strictly between the walk root and `entry`
/// is an aggregate.
fn has_aggregate_ancestor_below_root(entry: &DirEntry) -> bool {
    let mut path = entry.path().parent();
    // depth - 1 ancestors sit below the root
    for _ in 1..entry.depth() {
        let Some(p) = path else { return false };
        if classify(p) == DirKind::Aggregate {
            return true;
        }
        path = p.parent();
    }
    false
}
