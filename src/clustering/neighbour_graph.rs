// src/clustering/neighbour_graph.rs
use log::{debug, warn};
use std::collections::HashMap;

use crate::models::{PairEdge, TreeId};

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbour {
    pub tree_id: TreeId,
    pub distance_meters: f64,
}

/// Symmetric adjacency of neighbour pairs: tree → (neighbour → distance).
///
/// Neighbours are kept in insertion order so that downstream clustering sees
/// the same voter order on every run.
#[derive(Debug, Clone, Default)]
pub struct NeighbourGraph {
    adjacency: HashMap<TreeId, Vec<Neighbour>>,
    edge_count: usize,
}

impl NeighbourGraph {
    pub fn from_pairs(pairs: &[PairEdge]) -> Self {
        let mut graph = Self::default();
        let mut rejected = 0usize;
        for pair in pairs {
            if !graph.insert(pair) {
                rejected += 1;
            }
        }
        if rejected > 0 {
            warn!("Neighbour graph: rejected {} self or repeated pairs", rejected);
        }
        debug!(
            "Neighbour graph built with {} trees and {} edges",
            graph.adjacency.len(),
            graph.edge_count
        );
        graph
    }

    /// Inserts the edge in both directions. Returns false for self pairs and
    /// pairs already present.
    pub fn insert(&mut self, pair: &PairEdge) -> bool {
        if pair.tree_id_1 == pair.tree_id_2 {
            return false;
        }
        if self.distance(&pair.tree_id_1, &pair.tree_id_2).is_some() {
            return false;
        }
        self.adjacency
            .entry(pair.tree_id_1.clone())
            .or_default()
            .push(Neighbour {
                tree_id: pair.tree_id_2.clone(),
                distance_meters: pair.distance_meters,
            });
        self.adjacency
            .entry(pair.tree_id_2.clone())
            .or_default()
            .push(Neighbour {
                tree_id: pair.tree_id_1.clone(),
                distance_meters: pair.distance_meters,
            });
        self.edge_count += 1;
        true
    }

    pub fn neighbours(&self, tree_id: &TreeId) -> Option<&[Neighbour]> {
        self.adjacency.get(tree_id).map(|v| v.as_slice())
    }

    pub fn neighbour_count(&self, tree_id: &TreeId) -> usize {
        self.adjacency.get(tree_id).map_or(0, |v| v.len())
    }

    pub fn distance(&self, a: &TreeId, b: &TreeId) -> Option<f64> {
        self.adjacency
            .get(a)?
            .iter()
            .find(|n| &n.tree_id == b)
            .map(|n| n.distance_meters)
    }

    pub fn tree_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }
}
