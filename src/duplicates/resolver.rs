// src/duplicates/resolver.rs
use anyhow::{bail, Result};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

use crate::models::{PairEdge, TreeId, TreeRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateDecision {
    /// The pair is a duplicate; the given tree is dropped.
    Skip(TreeId),
    /// Both trees carry different genera, so they are distinct trees.
    NotDuplicate,
}

/// Result of folding the close-pair list over the record set.
#[derive(Debug, Clone, Default)]
pub struct ResolutionOutcome {
    /// Surviving records, in input order.
    pub records: Vec<TreeRecord>,
    /// Dropped tree ids, in the order they were decided.
    pub skipped_ids: Vec<TreeId>,
    /// Pairs ignored because one side had already been skipped.
    pub pairs_already_resolved: usize,
    pub not_duplicates: usize,
    /// Decisions dropped because they would skip a tree an earlier decision kept.
    pub conflicting_decisions: usize,
    /// Repeated tree ids in the input; only the first record of each is kept.
    pub repeated_ids: usize,
}

/// Decides which of two close trees survives.
///
/// Trees from the same survey cohort are compared by taxonomy and then by
/// completeness (ties keep `tree_1`). Across cohorts the tree missing from the
/// latest survey is always dropped.
pub fn decide_duplicate(
    tree_1: &TreeRecord,
    tree_2: &TreeRecord,
    latest_survey_year: u16,
) -> DuplicateDecision {
    let in_latest_1 = tree_1.found_in(latest_survey_year);
    let in_latest_2 = tree_2.found_in(latest_survey_year);

    if in_latest_1 != in_latest_2 {
        return if in_latest_1 {
            DuplicateDecision::Skip(tree_2.tree_id.clone())
        } else {
            DuplicateDecision::Skip(tree_1.tree_id.clone())
        };
    }

    // None means old incomplete data, which never contradicts a known genus
    if let (Some(genus_1), Some(genus_2)) = (&tree_1.genus, &tree_2.genus) {
        if genus_1 != genus_2 {
            return DuplicateDecision::NotDuplicate;
        }
    }

    if tree_1.completeness() >= tree_2.completeness() {
        DuplicateDecision::Skip(tree_2.tree_id.clone())
    } else {
        DuplicateDecision::Skip(tree_1.tree_id.clone())
    }
}

/// Keeps the first record of every tree id. Returns the unique records in
/// input order and the number of records dropped.
pub fn collapse_repeated_ids(records: Vec<TreeRecord>) -> (Vec<TreeRecord>, usize) {
    let mut seen: HashSet<TreeId> = HashSet::with_capacity(records.len());
    let mut unique_records = Vec::with_capacity(records.len());
    let mut repeated = 0usize;
    for record in records {
        if !seen.insert(record.tree_id.clone()) {
            warn!("Tree id {} appears more than once, keeping the first record", record.tree_id);
            repeated += 1;
            continue;
        }
        unique_records.push(record);
    }
    (unique_records, repeated)
}

/// Removes the losing side of every close pair.
///
/// The fold is sequential and order-sensitive: once a tree has been skipped,
/// later pairs touching it are ignored, and once a tree has been kept by a
/// decision it is never skipped afterwards. A pair naming an unknown tree is
/// an error.
pub fn resolve_close_pairs(
    records: Vec<TreeRecord>,
    close_pairs: &[PairEdge],
    latest_survey_year: u16,
) -> Result<ResolutionOutcome> {
    let mut outcome = ResolutionOutcome::default();

    let (unique_records, repeated_ids) = collapse_repeated_ids(records);
    outcome.repeated_ids = repeated_ids;
    let index_by_id: HashMap<TreeId, usize> = unique_records
        .iter()
        .enumerate()
        .map(|(idx, record)| (record.tree_id.clone(), idx))
        .collect();

    let mut skipped: HashSet<TreeId> = HashSet::new();
    let mut kept: HashSet<TreeId> = HashSet::new();

    for pair in close_pairs {
        let (Some(&idx_1), Some(&idx_2)) = (
            index_by_id.get(&pair.tree_id_1),
            index_by_id.get(&pair.tree_id_2),
        ) else {
            let unknown = if index_by_id.contains_key(&pair.tree_id_1) {
                &pair.tree_id_2
            } else {
                &pair.tree_id_1
            };
            bail!(
                "Close pair ({}, {}) references unknown tree {}",
                pair.tree_id_1,
                pair.tree_id_2,
                unknown
            );
        };
        if idx_1 == idx_2 {
            bail!("Close pair pairs tree {} with itself", pair.tree_id_1);
        }

        if skipped.contains(&pair.tree_id_1) || skipped.contains(&pair.tree_id_2) {
            outcome.pairs_already_resolved += 1;
            continue;
        }

        let tree_1 = &unique_records[idx_1];
        let tree_2 = &unique_records[idx_2];
        match decide_duplicate(tree_1, tree_2, latest_survey_year) {
            DuplicateDecision::NotDuplicate => {
                debug!(
                    "Trees {} and {} are {}m apart but differ in genus",
                    tree_1.tree_id, tree_2.tree_id, pair.distance_meters
                );
                outcome.not_duplicates += 1;
            }
            DuplicateDecision::Skip(loser) => {
                if kept.contains(&loser) {
                    debug!(
                        "Tree {} was already kept by an earlier decision, ignoring pair with {}",
                        loser,
                        if loser == tree_1.tree_id { &tree_2.tree_id } else { &tree_1.tree_id }
                    );
                    outcome.conflicting_decisions += 1;
                    continue;
                }
                let winner = if loser == tree_1.tree_id {
                    tree_2.tree_id.clone()
                } else {
                    tree_1.tree_id.clone()
                };
                kept.insert(winner);
                skipped.insert(loser.clone());
                outcome.skipped_ids.push(loser);
            }
        }
    }

    outcome.records = unique_records
        .into_iter()
        .filter(|record| !skipped.contains(&record.tree_id))
        .collect();

    info!(
        "Duplicate resolution: {} close pairs → {} trees skipped, {} distinct genus pairs, {} already resolved, {} conflicting",
        close_pairs.len(),
        outcome.skipped_ids.len(),
        outcome.not_duplicates,
        outcome.pairs_already_resolved,
        outcome.conflicting_decisions
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn tree(id: &str, genus: Option<&str>, completeness: f64, in_2020: bool) -> TreeRecord {
        let mut found_in_dataset = BTreeMap::new();
        found_in_dataset.insert(2017, !in_2020);
        found_in_dataset.insert(2020, in_2020);
        TreeRecord {
            tree_id: TreeId::from(id),
            lat: 50.93,
            lng: 6.95,
            suburb_id: None,
            genus: genus.map(str::to_string),
            age_group: None,
            year_sprout: None,
            found_in_dataset,
            dataset_completeness: Some(completeness),
        }
    }

    fn pair(a: &str, b: &str) -> PairEdge {
        PairEdge {
            tree_id_1: a.into(),
            tree_id_2: b.into(),
            distance_meters: 2.0,
        }
    }

    fn kept_ids(outcome: &ResolutionOutcome) -> Vec<&str> {
        outcome.records.iter().map(|r| r.tree_id.0.as_str()).collect()
    }

    #[test]
    fn test_same_cohort_keeps_more_complete_tree() {
        let records = vec![
            tree("a", Some("Acer"), 0.9, true),
            tree("b", None, 0.5, true),
        ];
        let outcome = resolve_close_pairs(records.clone(), &[pair("a", "b")], 2020).unwrap();
        assert_eq!(kept_ids(&outcome), vec!["a"]);

        // Pair order does not matter for a strict completeness difference
        let outcome = resolve_close_pairs(records, &[pair("b", "a")], 2020).unwrap();
        assert_eq!(outcome.skipped_ids, vec![TreeId::from("b")]);
    }

    #[test]
    fn test_different_cohorts_keep_latest_survey() {
        let records = vec![
            tree("old", Some("Acer"), 1.0, false),
            tree("new", None, 0.2, true),
        ];
        let outcome = resolve_close_pairs(records, &[pair("old", "new")], 2020).unwrap();
        assert_eq!(kept_ids(&outcome), vec!["new"]);
    }

    #[test]
    fn test_different_genera_are_not_duplicates() {
        let records = vec![
            tree("a", Some("Acer"), 0.9, true),
            tree("b", Some("Tilia"), 0.5, true),
        ];
        let outcome = resolve_close_pairs(records, &[pair("a", "b")], 2020).unwrap();
        assert_eq!(kept_ids(&outcome), vec!["a", "b"]);
        assert_eq!(outcome.not_duplicates, 1);
    }

    #[test]
    fn test_completeness_tie_skips_second_tree() {
        let records = vec![tree("a", None, 0.5, true), tree("b", None, 0.5, true)];
        let outcome = resolve_close_pairs(records, &[pair("a", "b")], 2020).unwrap();
        assert_eq!(outcome.skipped_ids, vec![TreeId::from("b")]);
    }

    #[test]
    fn test_skipped_tree_is_not_reconsidered() {
        let records = vec![
            tree("a", None, 0.9, true),
            tree("b", None, 0.5, true),
            tree("c", None, 0.1, true),
        ];
        // b is skipped first, so (b, c) is ignored and c survives
        let outcome =
            resolve_close_pairs(records, &[pair("a", "b"), pair("b", "c")], 2020).unwrap();
        assert_eq!(kept_ids(&outcome), vec!["a", "c"]);
        assert_eq!(outcome.pairs_already_resolved, 1);
    }

    #[test]
    fn test_kept_tree_is_never_skipped_later() {
        let records = vec![
            tree("a", None, 0.5, true),
            tree("b", None, 0.4, true),
            tree("c", None, 0.9, true),
        ];
        // a is kept against b; c would beat a, but a's first resolution wins
        let outcome =
            resolve_close_pairs(records, &[pair("a", "b"), pair("a", "c")], 2020).unwrap();
        assert_eq!(kept_ids(&outcome), vec!["a", "c"]);
        assert_eq!(outcome.conflicting_decisions, 1);
        for skipped in &outcome.skipped_ids {
            assert!(outcome.records.iter().all(|r| &r.tree_id != skipped));
        }
    }

    #[test]
    fn test_unknown_tree_is_fatal() {
        let records = vec![tree("a", None, 0.5, true)];
        let err = resolve_close_pairs(records, &[pair("a", "ghost")], 2020).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_repeated_ids_are_collapsed() {
        let records = vec![tree("a", None, 0.5, true), tree("a", None, 0.9, true)];
        let outcome = resolve_close_pairs(records, &[], 2020).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].dataset_completeness, Some(0.5));
        assert_eq!(outcome.repeated_ids, 1);
    }

    #[test]
    fn test_collapse_keeps_first_of_each_id_in_order() {
        let records = vec![
            tree("b", None, 0.1, true),
            tree("a", None, 0.2, true),
            tree("b", None, 0.3, true),
            tree("a", None, 0.4, true),
            tree("c", None, 0.5, true),
        ];
        let (unique, repeated) = collapse_repeated_ids(records);
        assert_eq!(repeated, 2);
        let ids: Vec<&str> = unique.iter().map(|r| r.tree_id.0.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert_eq!(unique[0].dataset_completeness, Some(0.1));
    }
}
