// src/matching/pairs.rs
use anyhow::{Context, Result};
use futures::future::join_all;
use indicatif::ProgressBar;
use log::{debug, warn};
use std::sync::Arc;

use crate::config::NeighbourConfig;
use crate::matching::geo::{haversine_meters, BoundingBox, GeoScale};
use crate::matching::suburbs::ComparisonWindow;
use crate::models::{GeoPoint, PairEdge, PairKind, TreeRecord};

/// Distance thresholds plus the shared scale factor for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairSearchParams {
    pub radius_meters: f64,
    pub min_tree_distance_meters: f64,
    pub scale: GeoScale,
}

impl PairSearchParams {
    pub fn from_config(config: &NeighbourConfig) -> Result<Self> {
        let scale = GeoScale::at_latitude(config.reference_latitude)
            .context("Failed to compute geo scale at the reference latitude")?;
        Ok(Self {
            radius_meters: config.radius_meters,
            min_tree_distance_meters: config.min_tree_distance_meters,
            scale,
        })
    }

    pub fn classify(&self, distance_meters: f64) -> Option<PairKind> {
        if distance_meters < self.min_tree_distance_meters {
            Some(PairKind::Close)
        } else if distance_meters <= self.radius_meters {
            Some(PairKind::Neighbour)
        } else {
            None
        }
    }
}

/// Pairs found over one or more comparison windows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairSearchResult {
    pub close_pairs: Vec<PairEdge>,
    pub neighbour_pairs: Vec<PairEdge>,
    /// Anchor trees skipped because no bounding box could be built around them.
    pub skipped_anchors: usize,
    /// Candidate pairs dropped because both sides carry the same tree id.
    pub same_id_pairs: usize,
    pub windows_searched: usize,
}

impl PairSearchResult {
    pub fn extend(&mut self, other: PairSearchResult) {
        self.close_pairs.extend(other.close_pairs);
        self.neighbour_pairs.extend(other.neighbour_pairs);
        self.skipped_anchors += other.skipped_anchors;
        self.same_id_pairs += other.same_id_pairs;
        self.windows_searched += other.windows_searched;
    }
}

/// Compares every anchor tree of the window with every later tree of the window.
pub fn find_pairs_in_window(
    records: &[TreeRecord],
    window: &ComparisonWindow,
    params: &PairSearchParams,
) -> PairSearchResult {
    let mut result = PairSearchResult {
        windows_searched: 1,
        ..PairSearchResult::default()
    };

    let positions: Vec<Option<GeoPoint>> = window
        .tree_indices
        .iter()
        .map(|&idx| records[idx].position())
        .collect();

    for i in 0..window.anchor_len.min(window.len()) {
        let tree_1 = &records[window.tree_indices[i]];
        let bbox = match positions[i]
            .context("missing or invalid position")
            .and_then(|p| BoundingBox::around(p, params.radius_meters, &params.scale))
        {
            Ok(bbox) => bbox,
            Err(e) => {
                warn!(
                    "Skipping tree {} in suburb {}: {}",
                    tree_1.tree_id, window.anchor, e
                );
                result.skipped_anchors += 1;
                continue;
            }
        };
        let Some(point_1) = positions[i] else { continue };

        for j in (i + 1)..window.len() {
            let Some(point_2) = positions[j] else { continue };
            if !bbox.contains(point_2) {
                continue;
            }
            let tree_2 = &records[window.tree_indices[j]];
            if tree_2.tree_id == tree_1.tree_id {
                warn!(
                    "Tree id {} appears twice in suburb window {}, not pairing it with itself",
                    tree_1.tree_id, window.anchor
                );
                result.same_id_pairs += 1;
                continue;
            }

            let distance_meters = haversine_meters(point_1, point_2);
            let Some(kind) = params.classify(distance_meters) else {
                continue;
            };
            let edge = PairEdge {
                tree_id_1: tree_1.tree_id.clone(),
                tree_id_2: tree_2.tree_id.clone(),
                distance_meters,
            };
            match kind {
                PairKind::Close => {
                    debug!(
                        "Close pair in suburb {}: {} / {} at {}m",
                        window.anchor, edge.tree_id_1, edge.tree_id_2, distance_meters
                    );
                    result.close_pairs.push(edge);
                }
                PairKind::Neighbour => result.neighbour_pairs.push(edge),
            }
        }
    }

    result
}

/// Searches all windows one after another.
pub fn find_all_pairs(
    records: &[TreeRecord],
    windows: &[ComparisonWindow],
    params: &PairSearchParams,
    progress: Option<&ProgressBar>,
) -> PairSearchResult {
    let mut total = PairSearchResult::default();
    for window in windows {
        let window_result = find_pairs_in_window(records, window, params);
        log_window(window, &window_result);
        total.extend(window_result);
        if let Some(pb) = progress {
            pb.inc(1);
        }
    }
    total
}

/// Searches windows on blocking tasks, `max_parallel` at a time.
///
/// Results are concatenated in window order, so the output equals
/// `find_all_pairs` on the same input.
pub async fn find_all_pairs_concurrently(
    records: Arc<Vec<TreeRecord>>,
    windows: Arc<Vec<ComparisonWindow>>,
    params: PairSearchParams,
    max_parallel: usize,
    progress: Option<ProgressBar>,
) -> Result<PairSearchResult> {
    let mut total = PairSearchResult::default();
    let chunk_size = max_parallel.max(1);

    for chunk_start in (0..windows.len()).step_by(chunk_size) {
        let chunk_end = (chunk_start + chunk_size).min(windows.len());
        let mut window_futures = Vec::with_capacity(chunk_end - chunk_start);

        for window_idx in chunk_start..chunk_end {
            let records_clone = Arc::clone(&records);
            let windows_clone = Arc::clone(&windows);
            window_futures.push(tokio::task::spawn_blocking(move || {
                find_pairs_in_window(&records_clone, &windows_clone[window_idx], &params)
            }));
        }

        let results = join_all(window_futures).await;
        for (offset, result) in results.into_iter().enumerate() {
            let window = &windows[chunk_start + offset];
            let window_result = result.with_context(|| {
                format!("Pair search task for suburb {} failed", window.anchor)
            })?;
            log_window(window, &window_result);
            total.extend(window_result);
            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }
    }

    Ok(total)
}

fn log_window(window: &ComparisonWindow, result: &PairSearchResult) {
    debug!(
        "Suburb {}: {} trees compared → {} neighbour pairs, {} close pairs",
        window.anchor,
        window.len(),
        result.neighbour_pairs.len(),
        result.close_pairs.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::suburbs::build_comparison_windows;
    use crate::models::{SuburbAdjacency, SuburbId, TreeId};
    use std::collections::{BTreeMap, HashSet};

    const BASE_LAT: f64 = 50.935;
    const BASE_LNG: f64 = 6.96;
    /// Meters per degree of latitude on the 6371 km sphere.
    const METERS_PER_DEGREE: f64 = 111_194.926_6;

    fn tree_at(id: &str, suburb: &str, meters_north: f64) -> TreeRecord {
        TreeRecord {
            tree_id: TreeId::from(id),
            lat: BASE_LAT + meters_north / METERS_PER_DEGREE,
            lng: BASE_LNG,
            suburb_id: Some(SuburbId::from(suburb)),
            genus: None,
            age_group: None,
            year_sprout: None,
            found_in_dataset: BTreeMap::new(),
            dataset_completeness: None,
        }
    }

    fn params() -> PairSearchParams {
        PairSearchParams::from_config(&NeighbourConfig::default()).unwrap()
    }

    fn adjacency_both_ways(a: &str, b: &str) -> SuburbAdjacency {
        let mut adj = SuburbAdjacency::new();
        adj.entry(a.into()).or_default().insert(b.into());
        adj.entry(b.into()).or_default().insert(a.into());
        adj
    }

    #[test]
    fn test_classify_thresholds() {
        let p = params();
        assert_eq!(p.classify(0.0), Some(PairKind::Close));
        assert_eq!(p.classify(2.99), Some(PairKind::Close));
        assert_eq!(p.classify(3.0), Some(PairKind::Neighbour));
        assert_eq!(p.classify(50.0), Some(PairKind::Neighbour));
        assert_eq!(p.classify(50.01), None);
    }

    #[test]
    fn test_pairs_are_classified_by_distance() {
        let records = vec![
            tree_at("a", "1", 0.0),
            tree_at("b", "1", 2.0),
            tree_at("c", "1", 20.0),
            tree_at("d", "1", 500.0),
        ];
        let windows = build_comparison_windows(&records, &SuburbAdjacency::new());
        let result = find_all_pairs(&records, &windows, &params(), None);

        assert_eq!(result.close_pairs.len(), 1);
        assert_eq!(result.close_pairs[0].tree_id_1, TreeId::from("a"));
        assert_eq!(result.close_pairs[0].tree_id_2, TreeId::from("b"));
        assert!((result.close_pairs[0].distance_meters - 2.0).abs() < 0.02);

        // a-c and b-c; d is too far from everyone
        assert_eq!(result.neighbour_pairs.len(), 2);
        for edge in &result.neighbour_pairs {
            assert!(edge.distance_meters >= 3.0 && edge.distance_meters <= 50.0);
            assert_ne!(edge.tree_id_1, edge.tree_id_2);
        }
    }

    #[test]
    fn test_cross_suburb_pairs_are_emitted_once() {
        let records = vec![
            tree_at("a", "1", 0.0),
            tree_at("b", "2", 10.0),
            tree_at("c", "2", 1.0),
            tree_at("d", "1", 25.0),
        ];
        let adj = adjacency_both_ways("1", "2");
        let windows = build_comparison_windows(&records, &adj);
        let result = find_all_pairs(&records, &windows, &params(), None);

        let mut seen = HashSet::new();
        for edge in result.neighbour_pairs.iter().chain(result.close_pairs.iter()) {
            assert!(seen.insert(edge.key()), "pair {:?} emitted twice", edge.key());
        }
        // All 6 unordered pairs are within 50 m
        assert_eq!(seen.len(), 6);
        assert_eq!(result.close_pairs.len(), 1);
    }

    #[test]
    fn test_invalid_positions_are_skipped() {
        let mut broken = tree_at("x", "1", 5.0);
        broken.lat = f64::NAN;
        let records = vec![tree_at("a", "1", 0.0), broken, tree_at("b", "1", 10.0)];
        let windows = build_comparison_windows(&records, &SuburbAdjacency::new());
        let result = find_all_pairs(&records, &windows, &params(), None);

        assert_eq!(result.skipped_anchors, 1);
        assert_eq!(result.neighbour_pairs.len(), 1);
        assert_eq!(result.neighbour_pairs[0].tree_id_2, TreeId::from("b"));
    }

    #[test]
    fn test_repeated_id_never_pairs_with_itself() {
        let records = vec![
            tree_at("a", "1", 0.0),
            tree_at("a", "1", 0.0),
            tree_at("b", "1", 1.0),
        ];
        let windows = build_comparison_windows(&records, &SuburbAdjacency::new());
        let result = find_all_pairs(&records, &windows, &params(), None);

        assert_eq!(result.same_id_pairs, 1);
        for edge in result.close_pairs.iter().chain(result.neighbour_pairs.iter()) {
            assert_ne!(edge.tree_id_1, edge.tree_id_2);
        }
        // Both copies of a still pair with b
        assert_eq!(result.close_pairs.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_search_matches_sequential() {
        let records: Vec<TreeRecord> = (0..40)
            .map(|i| {
                let suburb = if i % 3 == 0 { "1" } else if i % 3 == 1 { "2" } else { "3" };
                tree_at(&format!("t{}", i), suburb, i as f64 * 4.5)
            })
            .collect();
        let mut adj = adjacency_both_ways("1", "2");
        adj.entry("2".into()).or_default().insert("3".into());
        adj.entry("3".into()).or_default().insert("2".into());

        let windows = build_comparison_windows(&records, &adj);
        let sequential = find_all_pairs(&records, &windows, &params(), None);
        let concurrent = find_all_pairs_concurrently(
            Arc::new(records),
            Arc::new(windows),
            params(),
            2,
            None,
        )
        .await
        .unwrap();

        assert_eq!(sequential, concurrent);
        assert_eq!(concurrent.windows_searched, 3);
    }
}
