//! HNSW index implementation.
//!
//! Implements the Hierarchical Navigable Small World algorithm for
//! approximate nearest neighbor search over dense, append-only ids.

use crate::graph::{Graph, Neighbors, Node, NodeId};
use crate::layer::assign_level;
use crate::{HnswError, Result};
use parking_lot::RwLock;
use roost_vector::{
    validate_vector, DistanceFunction, VectorError, VectorId, VectorIndex, VectorMatch,
};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// HNSW configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Max connections per node (M parameter).
    /// Default: 16
    pub m: usize,

    /// Max connections in layer 0 (M_max0 = 2*M typically).
    /// Default: 32
    pub m_max0: usize,

    /// Beam width during construction (ef_construction).
    /// Higher = better quality, slower build.
    /// Default: 200
    pub ef_construction: usize,

    /// Beam width during search (ef_search).
    /// Higher = better recall, slower search.
    /// Default: 100
    pub ef_search: usize,

    /// Maximum number of layers.
    /// Default: 16 (supports ~10^7 vectors)
    pub max_layers: usize,

    /// Seed for level assignment. Changing it changes the graph shape of
    /// every index built afterwards.
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            m_max0: 32,
            ef_construction: 200,
            ef_search: 100,
            max_layers: 16,
            seed: 0x726f_6f73_7431,
        }
    }
}

impl HnswConfig {
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(HnswError::Config("m must be at least 2".into()));
        }
        if self.m_max0 < self.m {
            return Err(HnswError::Config("m_max0 must be >= m".into()));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(HnswError::Config("ef values must be positive".into()));
        }
        if self.max_layers == 0 {
            return Err(HnswError::Config("max_layers must be positive".into()));
        }
        Ok(())
    }
}

/// Candidate during search (node_id, distance).
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    node_id: NodeId,
    distance: f32,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.node_id.cmp(&other.node_id))
    }
}

/// HNSW index.
///
/// Ids must be inserted in ascending order starting at 0. Given the same
/// config and the same sequence of vectors, the resulting graph is identical.
pub struct HnswIndex {
    config: HnswConfig,
    dimensions: usize,
    distance: DistanceFunction,
    graph: RwLock<Graph>,
}

impl HnswIndex {
    /// Create an empty HNSW index.
    pub fn new(dimensions: usize, distance: DistanceFunction, config: HnswConfig) -> Self {
        Self {
            config,
            dimensions,
            distance,
            graph: RwLock::new(Graph::default()),
        }
    }

    /// Wraps a previously serialized graph after checking its structure.
    pub fn from_graph(
        dimensions: usize,
        distance: DistanceFunction,
        config: HnswConfig,
        graph: Graph,
    ) -> Result<Self> {
        graph
            .check_structure(dimensions)
            .map_err(|reason| HnswError::Corrupt { reason })?;

        Ok(Self {
            config,
            dimensions,
            distance,
            graph: RwLock::new(graph),
        })
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub fn distance_function(&self) -> DistanceFunction {
        self.distance
    }

    /// Clone of the current graph, for persistence.
    pub fn graph(&self) -> Graph {
        self.graph.read().clone()
    }

    /// Re-checks the graph invariants.
    pub fn check_structure(&self) -> Result<()> {
        self.graph
            .read()
            .check_structure(self.dimensions)
            .map_err(|reason| HnswError::Corrupt { reason })
    }

    /// Search a single layer for nearest neighbors.
    ///
    /// Returns candidates sorted by distance (closest first).
    fn search_layer(
        &self,
        graph: &Graph,
        query: &[f32],
        entry_points: &[NodeId],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        // Min-heap for candidates (closest first)
        let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        // Max-heap for results (furthest first, for pruning)
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut visited: HashSet<NodeId> = HashSet::new();

        for &ep in entry_points {
            if !visited.insert(ep) {
                continue;
            }
            let Some(node) = graph.node(ep) else { continue };
            let c = Candidate {
                node_id: ep,
                distance: self.distance.distance(query, &node.vector),
            };
            candidates.push(Reverse(c.clone()));
            results.push(c);
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if current.distance > worst.distance {
                        break;
                    }
                }
            }

            let Some(node) = graph.node(current.node_id) else { continue };
            for &neighbor_id in node.neighbors(layer) {
                if !visited.insert(neighbor_id) {
                    continue;
                }
                let Some(neighbor) = graph.node(neighbor_id) else { continue };
                let dist = self.distance.distance(query, &neighbor.vector);

                let should_add = results.len() < ef
                    || results.peek().map(|w| dist < w.distance).unwrap_or(true);

                if should_add {
                    let c = Candidate {
                        node_id: neighbor_id,
                        distance: dist,
                    };
                    candidates.push(Reverse(c.clone()));
                    results.push(c);

                    while results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Links `node_id` to `neighbors` on `layer`, shrinking any neighbor
    /// list that grows past the layer's degree bound.
    fn connect_node(&self, graph: &mut Graph, node_id: NodeId, neighbors: &[NodeId], layer: usize) {
        let max_degree = if layer == 0 {
            self.config.m_max0
        } else {
            self.config.m
        };

        for &neighbor_id in neighbors {
            graph.nodes[node_id as usize].links[layer].add(neighbor_id);
            graph.nodes[neighbor_id as usize].links[layer].add(node_id);

            let over = graph.nodes[neighbor_id as usize].links[layer].len() > max_degree;
            if over {
                let shrunk = {
                    let nb = &graph.nodes[neighbor_id as usize];
                    let mut scored: Vec<Candidate> = nb.links[layer]
                        .ids
                        .iter()
                        .map(|&nn| Candidate {
                            node_id: nn,
                            distance: self
                                .distance
                                .distance(&nb.vector, &graph.nodes[nn as usize].vector),
                        })
                        .collect();
                    scored.sort();
                    scored.truncate(max_degree);
                    Neighbors {
                        ids: scored.into_iter().map(|c| c.node_id).collect(),
                    }
                };
                graph.nodes[neighbor_id as usize].links[layer] = shrunk;
            }
        }
    }

    fn insert_internal(&self, graph: &mut Graph, id: NodeId, vector: &[f32]) {
        let level = assign_level(id, self.config.seed, self.config.m, self.config.max_layers);
        graph.nodes.push(Node::new(vector.to_vec(), level));

        let Some(entry_point) = graph.entry_point else {
            graph.entry_point = Some(id);
            graph.max_level = level;
            return;
        };
        let current_max = graph.max_level;

        let mut ep = vec![entry_point];

        // Greedy descent through the layers above the new node
        for layer in (level + 1..=current_max).rev() {
            let found = self.search_layer(graph, vector, &ep, 1, layer);
            if let Some(best) = found.first() {
                ep = vec![best.node_id];
            }
        }

        for layer in (0..=level.min(current_max)).rev() {
            let candidates =
                self.search_layer(graph, vector, &ep, self.config.ef_construction, layer);

            let m = if layer == 0 {
                self.config.m_max0
            } else {
                self.config.m
            };
            let neighbors: Vec<NodeId> = candidates
                .iter()
                .filter(|c| c.node_id != id)
                .take(m)
                .map(|c| c.node_id)
                .collect();

            self.connect_node(graph, id, &neighbors, layer);

            if !candidates.is_empty() {
                ep = candidates.into_iter().map(|c| c.node_id).collect();
            }
        }

        if level > current_max {
            graph.entry_point = Some(id);
            graph.max_level = level;
        }
    }
}

impl VectorIndex for HnswIndex {
    fn insert(&self, id: VectorId, vector: &[f32]) -> roost_vector::Result<()> {
        validate_vector(vector, self.dimensions)?;

        let mut graph = self.graph.write();
        let expected = graph.len() as VectorId;
        if id < expected {
            return Err(VectorError::DuplicateId(id));
        }
        if id > expected {
            return Err(VectorError::OutOfOrder { expected, got: id });
        }

        self.insert_internal(&mut graph, id, vector);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> roost_vector::Result<Vec<VectorMatch>> {
        validate_vector(query, self.dimensions)?;

        if k == 0 {
            return Ok(vec![]);
        }

        let graph = self.graph.read();
        let Some(entry_point) = graph.entry_point else {
            return Ok(vec![]);
        };

        let mut ep = vec![entry_point];
        for layer in (1..=graph.max_level).rev() {
            let found = self.search_layer(&graph, query, &ep, 1, layer);
            if let Some(best) = found.first() {
                ep = vec![best.node_id];
            }
        }

        let ef = self.config.ef_search.max(k);
        Ok(self
            .search_layer(&graph, query, &ep, ef, 0)
            .into_iter()
            .take(k)
            .map(|c| VectorMatch::new(c.node_id, c.distance))
            .collect())
    }

    fn get(&self, id: VectorId) -> Option<Vec<f32>> {
        self.graph.read().node(id).map(|n| n.vector.clone())
    }

    fn contains(&self, id: VectorId) -> bool {
        (id as usize) < self.graph.read().len()
    }

    fn len(&self) -> usize {
        self.graph.read().len()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
