// src/matching/suburbs.rs
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

use crate::models::{SuburbAdjacency, SuburbId, TreeRecord};

/// Record indices grouped by suburb, in order of first appearance.
#[derive(Debug, Default)]
pub struct SuburbGroups {
    pub order: Vec<SuburbId>,
    pub members: HashMap<SuburbId, Vec<usize>>,
    /// Records without a suburb id; they never take part in a window.
    pub unassigned: usize,
}

impl SuburbGroups {
    pub fn trees_in(&self, suburb: &SuburbId) -> &[usize] {
        self.members
            .get(suburb)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

pub fn group_by_suburb(records: &[TreeRecord]) -> SuburbGroups {
    let mut groups = SuburbGroups::default();
    for (idx, record) in records.iter().enumerate() {
        match &record.suburb_id {
            Some(suburb) => {
                if !groups.members.contains_key(suburb) {
                    groups.order.push(suburb.clone());
                }
                groups.members.entry(suburb.clone()).or_default().push(idx);
            }
            None => groups.unassigned += 1,
        }
    }
    if groups.unassigned > 0 {
        warn!(
            "{} trees have no suburb id and are excluded from the neighbour search",
            groups.unassigned
        );
    }
    groups
}

/// Registry of unordered suburb pairs whose trees have already been compared.
#[derive(Debug, Default)]
pub struct ComparedSuburbs {
    seen: HashSet<(SuburbId, SuburbId)>,
}

impl ComparedSuburbs {
    fn key(a: &SuburbId, b: &SuburbId) -> (SuburbId, SuburbId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    /// Marks the pair as compared. Returns false if it already was, in either direction.
    pub fn mark(&mut self, a: &SuburbId, b: &SuburbId) -> bool {
        self.seen.insert(Self::key(a, b))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// The trees compared while anchored on one suburb.
///
/// `tree_indices[..anchor_len]` are the anchor's own trees; only those act as
/// the first element of a pair. The rest belong to adjacent suburbs.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonWindow {
    pub anchor: SuburbId,
    pub tree_indices: Vec<usize>,
    pub anchor_len: usize,
}

impl ComparisonWindow {
    pub fn len(&self) -> usize {
        self.tree_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree_indices.is_empty()
    }
}

/// Builds one window per suburb with trees: its own trees plus those of every
/// adjacent suburb not yet compared against it.
pub fn build_comparison_windows(
    records: &[TreeRecord],
    adjacency: &SuburbAdjacency,
) -> Vec<ComparisonWindow> {
    let groups = group_by_suburb(records);
    let mut compared = ComparedSuburbs::default();
    let mut windows = Vec::with_capacity(groups.order.len());

    for anchor in &groups.order {
        let own_trees = groups.trees_in(anchor);
        let mut tree_indices = own_trees.to_vec();

        let mut adjacent: Vec<&SuburbId> = match adjacency.get(anchor) {
            Some(neighbours) => neighbours.iter().collect(),
            None => {
                debug!("Suburb {} has no adjacency entry, comparing its own trees only", anchor);
                Vec::new()
            }
        };
        adjacent.sort();

        for neighbour in adjacent {
            if neighbour == anchor {
                continue;
            }
            if !compared.mark(anchor, neighbour) {
                continue;
            }
            tree_indices.extend_from_slice(groups.trees_in(neighbour));
        }

        windows.push(ComparisonWindow {
            anchor: anchor.clone(),
            anchor_len: own_trees.len(),
            tree_indices,
        });
    }

    debug!(
        "Built {} comparison windows covering {} adjacent suburb pairs",
        windows.len(),
        compared.len()
    );
    windows
}
