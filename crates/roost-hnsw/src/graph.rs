//! Graph data structures for HNSW.
//!
//! Nodes are stored densely: a node's index in the node vector is its
//! `VectorId`. Each node keeps one adjacency list per layer it lives on.

use roost_vector::VectorId;
use serde::{Deserialize, Serialize};

/// Internal node ID. Equal to the external vector id.
pub type NodeId = VectorId;

/// A node in the HNSW graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// The vector data
    pub vector: Vec<f32>,
    /// Highest layer this node is present on
    pub level: usize,
    /// Neighbor lists, `links[layer]` for `layer` in `0..=level`
    pub links: Vec<Neighbors>,
}

impl Node {
    pub fn new(vector: Vec<f32>, level: usize) -> Self {
        Self {
            vector,
            level,
            links: vec![Neighbors::new(); level + 1],
        }
    }

    /// Neighbors at `layer`, empty if the node does not reach it.
    pub fn neighbors(&self, layer: usize) -> &[NodeId] {
        self.links.get(layer).map(|n| n.ids.as_slice()).unwrap_or(&[])
    }
}

/// Neighbor list for a node at a specific layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Neighbors {
    pub ids: Vec<NodeId>,
}

impl Neighbors {
    pub fn new() -> Self {
        Self { ids: Vec::new() }
    }

    /// Add a neighbor. Returns false if already present.
    pub fn add(&mut self, id: NodeId) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// The whole multi-layer graph. Owned by `HnswIndex` behind a lock and
/// serialized verbatim into index snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub entry_point: Option<NodeId>,
    pub max_level: usize,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id as usize)
    }

    /// Checks the invariants a freshly loaded graph must satisfy.
    ///
    /// Returns a description of the first violation found.
    pub fn check_structure(&self, dimensions: usize) -> Result<(), String> {
        match (self.entry_point, self.nodes.is_empty()) {
            (None, true) => return Ok(()),
            (None, false) => return Err("non-empty graph without entry point".into()),
            (Some(ep), _) => {
                let node = self
                    .node(ep)
                    .ok_or_else(|| format!("entry point {} out of range", ep))?;
                if node.level != self.max_level {
                    return Err(format!(
                        "entry point level {} != max level {}",
                        node.level, self.max_level
                    ));
                }
            }
        }

        let n = self.nodes.len() as u64;
        for (id, node) in self.nodes.iter().enumerate() {
            if node.vector.len() != dimensions {
                return Err(format!(
                    "node {} has dimension {}, expected {}",
                    id,
                    node.vector.len(),
                    dimensions
                ));
            }
            if node.links.len() != node.level + 1 {
                return Err(format!("node {} has {} link layers", id, node.links.len()));
            }
            if node.level > self.max_level {
                return Err(format!("node {} above max level", id));
            }
            for (layer, neighbors) in node.links.iter().enumerate() {
                for &nb in &neighbors.ids {
                    if nb >= n || nb == id as u64 {
                        return Err(format!("node {} has invalid neighbor {}", id, nb));
                    }
                    if self.nodes[nb as usize].level < layer {
                        return Err(format!(
                            "node {} links to {} on layer {} it does not reach",
                            id, nb, layer
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}
