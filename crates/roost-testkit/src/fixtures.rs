//! Store directory trees for sync and discovery tests.

use crate::generators::{record_fields, unit_metadata};
use roost_store::{
    HierarchyWalker, Ingestor, Result, RoostConfig, Store, StoreKind, SyncEngine, TraversalMode,
};
use std::path::{Path, PathBuf};

/// Declares sessions and aggregates below a root, relative paths throughout.
pub struct TreeBuilder {
    root: PathBuf,
    config: RoostConfig,
    sessions: Vec<(PathBuf, Vec<Vec<f32>>)>,
    aggregates: Vec<PathBuf>,
}

/// Absolute paths of what [`TreeBuilder::build`] created.
#[derive(Debug, Clone)]
pub struct BuiltTree {
    pub root: PathBuf,
    pub sessions: Vec<PathBuf>,
    pub aggregates: Vec<PathBuf>,
}

impl BuiltTree {
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }
}

impl TreeBuilder {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            config: RoostConfig::default(),
            sessions: Vec::new(),
            aggregates: Vec::new(),
        }
    }

    pub fn config(mut self, config: RoostConfig) -> Self {
        self.config = config;
        self
    }

    /// A session at `rel` holding one record per vector, in one recording
    /// named `unit.wav`. An empty slice gives a recording with no records.
    pub fn session(mut self, rel: &str, vectors: &[Vec<f32>]) -> Self {
        self.sessions.push((PathBuf::from(rel), vectors.to_vec()));
        self
    }

    /// An aggregate at `rel`; `""` is the root itself.
    pub fn aggregate(mut self, rel: &str) -> Self {
        self.aggregates.push(PathBuf::from(rel));
        self
    }

    /// Writes the sessions, then syncs the aggregates deepest first so each
    /// one already holds its subtree when its parent is synced.
    pub fn build(self) -> Result<BuiltTree> {
        let mut sessions = Vec::new();
        for (rel, vectors) in &self.sessions {
            let dir = self.root.join(rel);
            let mut store = Store::open(&dir, StoreKind::Session, &self.config)?;
            let items = vectors
                .iter()
                .enumerate()
                .map(|(i, v)| (record_fields("unit.wav", i), Some(v.clone())))
                .collect();
            Ingestor::ingest_recording(&mut store, &unit_metadata("unit.wav", 0), items)?;
            sessions.push(dir);
        }

        let mut aggregates: Vec<PathBuf> = self.aggregates.iter().map(|r| self.root.join(r)).collect();
        aggregates.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
        for dir in &aggregates {
            let mut store = Store::open(dir, StoreKind::Aggregate, &self.config)?;
            let sources: Vec<PathBuf> =
                HierarchyWalker::discover(dir, TraversalMode::SourceDiscovery)?
                    .into_iter()
                    .map(|s| s.path)
                    .collect();
            SyncEngine::new(self.config.sync.clone()).sync(&mut store, &sources)?;
        }

        Ok(BuiltTree {
            root: self.root,
            sessions,
            aggregates,
        })
    }
}
