// src/clustering/consensus.rs - Attribute inference from clusters of neighbouring trees
//
// Every tree missing its genus and/or age gets the majority behaviour of its
// complete neighbours. Each attribute is standardized and clustered with
// DBSCAN on its own; the largest cluster (noise counts as one) provides the
// predicted value, and its size over the tree's neighbour count is the
// prediction probability.

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use linfa::traits::Transformer;
use linfa::ParamGuard;
use linfa_clustering::Dbscan;
use log::{debug, info};
use ndarray::{Array1, Array2, Axis};
use std::collections::{BTreeSet, HashMap};

use crate::clustering::neighbour_graph::NeighbourGraph;
use crate::config::NeighbourConfig;
use crate::models::{
    AttributePrediction, AttributePredictions, PredictedValue, PredictionAttribute, Predictions,
    TreeId, TreeRecord,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusParams {
    /// Minimum voters per attribute, also the DBSCAN `min_points`.
    pub min_samples: usize,
    /// DBSCAN tolerance on standardized values.
    pub eps: f64,
}

impl ConsensusParams {
    pub fn from_config(config: &NeighbourConfig) -> Self {
        Self {
            min_samples: config.min_samples,
            eps: config.cluster_eps,
        }
    }
}

/// Maps genus names to dense integer labels in sorted name order.
#[derive(Debug, Clone, Default)]
pub struct GenusEncoder {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl GenusEncoder {
    pub fn fit<'a>(genera: impl IntoIterator<Item = &'a str>) -> Self {
        let labels: Vec<String> = genera
            .into_iter()
            .collect::<BTreeSet<&str>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let index = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i))
            .collect();
        Self { labels, index }
    }

    pub fn encode(&self, genus: &str) -> Option<usize> {
        self.index.get(genus).copied()
    }

    pub fn decode(&self, label: usize) -> Option<&str> {
        self.labels.get(label).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Trees split by which attributes they carry.
#[derive(Debug, Default)]
pub struct RecordPartition<'a> {
    /// Genus and age group present; the only trees allowed to vote.
    pub complete: Vec<&'a TreeRecord>,
    /// Genus present, age group missing.
    pub missing_age_only: Vec<&'a TreeRecord>,
    /// Genus missing, whatever the age group.
    pub missing_all: Vec<&'a TreeRecord>,
}

pub fn partition_records(records: &[TreeRecord]) -> RecordPartition<'_> {
    let mut partition = RecordPartition::default();
    for record in records {
        match (&record.genus, record.age_group) {
            (Some(_), Some(_)) => partition.complete.push(record),
            (Some(_), None) => partition.missing_age_only.push(record),
            (None, _) => partition.missing_all.push(record),
        }
    }
    partition
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct VoterFeatures {
    encoded_genus: usize,
    age_group: u8,
    year_sprout: Option<i32>,
}

/// Values a tree's voting neighbours report, one vector per attribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighbourVotes {
    pub genus: Vec<f64>,
    pub age_group: Vec<f64>,
    pub year_sprout: Vec<f64>,
}

impl NeighbourVotes {
    pub fn values(&self, attribute: PredictionAttribute) -> &[f64] {
        match attribute {
            PredictionAttribute::Genus => &self.genus,
            PredictionAttribute::AgeGroup => &self.age_group,
            PredictionAttribute::YearSprout => &self.year_sprout,
        }
    }
}

/// Zero-mean, unit-variance copy of `values` as an n×1 matrix. A constant
/// input is only centred.
pub fn standardize(values: &[f64]) -> Array2<f64> {
    let column = Array1::from(values.to_vec());
    let mean = column.mean().unwrap_or(0.0);
    let std = column.std(0.0);
    let scale = if std > f64::EPSILON { std } else { 1.0 };
    column.mapv(|v| (v - mean) / scale).insert_axis(Axis(1))
}

/// DBSCAN labels of standardized 1-D values; `None` marks noise.
pub fn dbscan_labels(values: &[f64], params: &ConsensusParams) -> Result<Vec<Option<usize>>> {
    let observations = standardize(values);
    let dbscan = Dbscan::params(params.min_samples)
        .tolerance(params.eps)
        .check()
        .context("Invalid DBSCAN parameters")?;
    let labels = dbscan.transform(&observations);
    Ok(labels.to_vec())
}

/// Size of one cluster (noise included) and the value of its first member.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterTally {
    pub label: Option<usize>,
    pub count: usize,
    pub representative: f64,
}

/// Counts members per label, in order of first appearance.
pub fn tally_clusters(labels: &[Option<usize>], values: &[f64]) -> Vec<ClusterTally> {
    let mut tallies: Vec<ClusterTally> = Vec::new();
    for (label, value) in labels.iter().zip(values) {
        match tallies.iter_mut().find(|t| t.label == *label) {
            Some(tally) => tally.count += 1,
            None => tallies.push(ClusterTally {
                label: *label,
                count: 1,
                representative: *value,
            }),
        }
    }
    tallies
}

/// Largest cluster; on equal counts the later-seen label wins, noise included.
pub fn select_winning_cluster(tallies: &[ClusterTally]) -> Option<ClusterTally> {
    let mut winner: Option<ClusterTally> = None;
    let mut max_count = 0;
    for tally in tallies {
        if tally.count >= max_count {
            max_count = tally.count;
            winner = Some(*tally);
        }
    }
    winner
}

/// Statistics of one prediction pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsensusStats {
    pub candidates: usize,
    pub candidates_without_neighbours: usize,
    pub predicted_trees: usize,
    pub genus_predictions: usize,
    pub age_group_predictions: usize,
    pub year_sprout_predictions: usize,
}

pub struct ConsensusPredictor<'a> {
    graph: &'a NeighbourGraph,
    params: ConsensusParams,
    encoder: GenusEncoder,
    voters: HashMap<&'a TreeId, VoterFeatures>,
}

impl<'a> ConsensusPredictor<'a> {
    pub fn new(records: &'a [TreeRecord], graph: &'a NeighbourGraph, params: ConsensusParams) -> Self {
        let encoder = GenusEncoder::fit(records.iter().filter_map(|r| r.genus.as_deref()));
        let partition = partition_records(records);
        let mut voters = HashMap::with_capacity(partition.complete.len());
        for record in partition.complete {
            let (Some(genus), Some(age_group)) = (record.genus.as_deref(), record.age_group) else {
                continue;
            };
            let Some(encoded_genus) = encoder.encode(genus) else {
                continue;
            };
            voters.insert(
                &record.tree_id,
                VoterFeatures {
                    encoded_genus,
                    age_group,
                    year_sprout: record.year_sprout,
                },
            );
        }
        debug!(
            "Consensus predictor: {} genera, {} voting trees",
            encoder.len(),
            voters.len()
        );
        Self {
            graph,
            params,
            encoder,
            voters,
        }
    }

    pub fn votes_for(&self, tree_id: &TreeId) -> Option<NeighbourVotes> {
        let neighbours = self.graph.neighbours(tree_id)?;
        let mut votes = NeighbourVotes::default();
        for neighbour in neighbours {
            let Some(features) = self.voters.get(&neighbour.tree_id) else {
                continue;
            };
            votes.genus.push(features.encoded_genus as f64);
            votes.age_group.push(f64::from(features.age_group));
            if let Some(year) = features.year_sprout {
                votes.year_sprout.push(f64::from(year));
            }
        }
        Some(votes)
    }

    /// Predictions for every attribute `record` lacks, or `None` when no
    /// attribute has enough voters.
    pub fn predict(&self, record: &TreeRecord) -> Result<Option<AttributePredictions>> {
        let Some(votes) = self.votes_for(&record.tree_id) else {
            return Ok(None);
        };
        let neighbour_count = self.graph.neighbour_count(&record.tree_id);

        let mut predictions = AttributePredictions::new();
        for attribute in missing_attributes(record) {
            let values = votes.values(attribute);
            if values.len() < self.params.min_samples {
                continue;
            }
            let labels = dbscan_labels(values, &self.params).with_context(|| {
                format!(
                    "Clustering {} votes for tree {} failed",
                    attribute.as_str(),
                    record.tree_id
                )
            })?;
            let tallies = tally_clusters(&labels, values);
            let Some(winner) = select_winning_cluster(&tallies) else {
                continue;
            };
            let Some(prediction) = self.predicted_value(attribute, winner.representative) else {
                continue;
            };
            predictions.insert(
                attribute,
                AttributePrediction {
                    prediction,
                    probability: winner.count as f64 / neighbour_count as f64,
                    votes: winner.count,
                    neighbour_count,
                },
            );
        }

        Ok((!predictions.is_empty()).then_some(predictions))
    }

    fn predicted_value(&self, attribute: PredictionAttribute, representative: f64) -> Option<PredictedValue> {
        let value = representative as i64;
        match attribute {
            PredictionAttribute::Genus => usize::try_from(value)
                .ok()
                .and_then(|label| self.encoder.decode(label))
                .map(|genus| PredictedValue::Genus(genus.to_string())),
            PredictionAttribute::AgeGroup | PredictionAttribute::YearSprout => {
                Some(PredictedValue::Number(value))
            }
        }
    }
}

fn missing_attributes(record: &TreeRecord) -> Vec<PredictionAttribute> {
    PredictionAttribute::ALL
        .into_iter()
        .filter(|attribute| match attribute {
            PredictionAttribute::Genus => record.genus.is_none(),
            PredictionAttribute::AgeGroup => record.age_group.is_none(),
            PredictionAttribute::YearSprout => record.year_sprout.is_none(),
        })
        .collect()
}

/// Predicts missing genus / age attributes for every incomplete tree from the
/// complete trees among its neighbours.
pub fn predict_from_neighbours(
    records: &[TreeRecord],
    graph: &NeighbourGraph,
    params: ConsensusParams,
    progress: Option<&ProgressBar>,
) -> Result<(Predictions, ConsensusStats)> {
    let predictor = ConsensusPredictor::new(records, graph, params);
    let partition = partition_records(records);
    let mut stats = ConsensusStats {
        candidates: partition.missing_all.len() + partition.missing_age_only.len(),
        ..ConsensusStats::default()
    };
    if let Some(pb) = progress {
        pb.set_length(stats.candidates as u64);
    }

    let mut predictions = Predictions::new();
    for record in partition
        .missing_all
        .iter()
        .chain(partition.missing_age_only.iter())
    {
        if let Some(pb) = progress {
            pb.inc(1);
        }
        if graph.neighbours(&record.tree_id).is_none() {
            stats.candidates_without_neighbours += 1;
            continue;
        }
        let Some(attributes) = predictor.predict(record)? else {
            continue;
        };
        for attribute in attributes.keys() {
            match attribute {
                PredictionAttribute::Genus => stats.genus_predictions += 1,
                PredictionAttribute::AgeGroup => stats.age_group_predictions += 1,
                PredictionAttribute::YearSprout => stats.year_sprout_predictions += 1,
            }
        }
        predictions.insert(record.tree_id.clone(), attributes);
    }
    stats.predicted_trees = predictions.len();

    info!(
        "Consensus prediction: {} candidate trees ({} without neighbours) → {} trees predicted (genus: {}, age group: {}, year sprout: {})",
        stats.candidates,
        stats.candidates_without_neighbours,
        stats.predicted_trees,
        stats.genus_predictions,
        stats.age_group_predictions,
        stats.year_sprout_predictions
    );
    Ok((predictions, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PairEdge;
    use std::collections::BTreeMap;

    fn params() -> ConsensusParams {
        ConsensusParams {
            min_samples: 5,
            eps: 0.3,
        }
    }

    fn tree(id: &str, genus: Option<&str>, age_group: Option<u8>, year_sprout: Option<i32>) -> TreeRecord {
        TreeRecord {
            tree_id: TreeId::from(id),
            lat: 50.93,
            lng: 6.95,
            suburb_id: None,
            genus: genus.map(str::to_string),
            age_group,
            year_sprout,
            found_in_dataset: BTreeMap::new(),
            dataset_completeness: None,
        }
    }

    fn star(center: &str, leaves: &[&TreeRecord]) -> NeighbourGraph {
        let pairs: Vec<PairEdge> = leaves
            .iter()
            .enumerate()
            .map(|(i, leaf)| PairEdge {
                tree_id_1: center.into(),
                tree_id_2: leaf.tree_id.clone(),
                distance_meters: 5.0 + i as f64,
            })
            .collect();
        NeighbourGraph::from_pairs(&pairs)
    }

    #[test]
    fn test_genus_encoder_is_sorted() {
        let encoder = GenusEncoder::fit(["Tilia", "Acer", "Tilia", "Platanus"]);
        assert_eq!(encoder.len(), 3);
        assert_eq!(encoder.encode("Acer"), Some(0));
        assert_eq!(encoder.encode("Tilia"), Some(2));
        assert_eq!(encoder.decode(1), Some("Platanus"));
        assert_eq!(encoder.encode("Quercus"), None);
    }

    #[test]
    fn test_partition_records() {
        let records = vec![
            tree("full", Some("Acer"), Some(1), Some(1990)),
            tree("no_age", Some("Acer"), None, None),
            tree("nothing", None, None, None),
            tree("age_only", None, Some(2), None),
        ];
        let partition = partition_records(&records);
        assert_eq!(partition.complete.len(), 1);
        assert_eq!(partition.missing_age_only.len(), 1);
        assert_eq!(partition.missing_all.len(), 2);
    }

    #[test]
    fn test_standardize() {
        let x = standardize(&[1.0, 2.0, 3.0]);
        assert_eq!(x.shape(), &[3, 1]);
        assert!((x[[1, 0]]).abs() < 1e-12);
        assert!((x[[2, 0]] - 1.224_744_871).abs() < 1e-6);

        let constant = standardize(&[4.0, 4.0, 4.0]);
        assert!(constant.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_dbscan_marks_outlier_as_noise() {
        let labels = dbscan_labels(&[2.0, 2.0, 2.0, 2.0, 2.0, 0.0], &params()).unwrap();
        assert_eq!(labels.len(), 6);
        assert!(labels[..5].iter().all(|l| l.is_some() && *l == labels[0]));
        assert_eq!(labels[5], None);
    }

    #[test]
    fn test_tally_and_tie_break_prefers_later_label() {
        let labels = vec![Some(0), Some(0), None, Some(1), Some(1)];
        let values = vec![1.0, 1.0, 7.0, 3.0, 3.0];
        let tallies = tally_clusters(&labels, &values);
        assert_eq!(tallies.len(), 3);
        assert_eq!(tallies[1].label, None);
        assert_eq!(tallies[1].representative, 7.0);

        let winner = select_winning_cluster(&tallies).unwrap();
        assert_eq!(winner.label, Some(1));
        assert_eq!(winner.representative, 3.0);
        assert!(select_winning_cluster(&[]).is_none());
    }

    #[test]
    fn test_noise_wins_tie_when_seen_last() {
        let labels = vec![Some(0), Some(0), None, Some(0), None, None];
        let values = vec![2.0, 2.0, 0.0, 2.0, 1.0, 0.0];
        let tallies = tally_clusters(&labels, &values);
        assert_eq!(tallies.len(), 2);
        assert_eq!(tallies[0].count, 3);
        assert_eq!(tallies[1].count, 3);

        let winner = select_winning_cluster(&tallies).unwrap();
        assert_eq!(winner.label, None);
        assert_eq!(winner.count, 3);
        // Representative is the first noise point's value
        assert_eq!(winner.representative, 0.0);
    }

    #[test]
    fn test_majority_age_group_with_confidence() {
        let mut neighbours: Vec<TreeRecord> = (0..5)
            .map(|i| tree(&format!("n{}", i), Some("Acer"), Some(2), None))
            .collect();
        neighbours.push(tree("n5", Some("Acer"), Some(0), None));
        let target = tree("target", Some("Acer"), None, None);

        let graph = star("target", &neighbours.iter().collect::<Vec<_>>());
        let mut records = neighbours.clone();
        records.push(target);

        let (predictions, stats) = predict_from_neighbours(&records, &graph, params(), None).unwrap();
        let attributes = &predictions[&TreeId::from("target")];
        let age = &attributes[&PredictionAttribute::AgeGroup];
        assert_eq!(age.prediction, PredictedValue::Number(2));
        assert_eq!(age.votes, 5);
        assert_eq!(age.neighbour_count, 6);
        assert_eq!(age.probability, 5.0 / 6.0);
        // Genus is present and no neighbour has a sprout year
        assert!(!attributes.contains_key(&PredictionAttribute::Genus));
        assert!(!attributes.contains_key(&PredictionAttribute::YearSprout));
        assert_eq!(stats.age_group_predictions, 1);
    }

    #[test]
    fn test_non_voting_neighbours_count_in_denominator() {
        let mut neighbours: Vec<TreeRecord> = (0..6)
            .map(|i| tree(&format!("n{}", i), Some("Tilia"), Some(1), Some(1985)))
            .collect();
        neighbours.push(tree("incomplete_1", None, None, None));
        neighbours.push(tree("incomplete_2", Some("Acer"), None, None));
        let target = tree("target", None, None, None);

        let graph = star("target", &neighbours.iter().collect::<Vec<_>>());
        let mut records = neighbours.clone();
        records.push(target);

        let predictor = ConsensusPredictor::new(&records, &graph, params());
        let attributes = predictor.predict(&records[8]).unwrap().unwrap();

        let genus = &attributes[&PredictionAttribute::Genus];
        assert_eq!(genus.prediction, PredictedValue::Genus("Tilia".to_string()));
        assert_eq!(genus.votes, 6);
        assert_eq!(genus.neighbour_count, 8);
        assert_eq!(genus.probability, 0.75);

        let year = &attributes[&PredictionAttribute::YearSprout];
        assert_eq!(year.prediction, PredictedValue::Number(1985));
        assert!(attributes.contains_key(&PredictionAttribute::AgeGroup));
    }

    #[test]
    fn test_too_few_voters_gives_no_prediction() {
        let neighbours: Vec<TreeRecord> = (0..3)
            .map(|i| tree(&format!("n{}", i), Some("Acer"), Some(1), Some(1990)))
            .collect();
        let target = tree("target", None, None, None);
        let graph = star("target", &neighbours.iter().collect::<Vec<_>>());
        let mut records = neighbours.clone();
        records.push(target);

        let (predictions, stats) = predict_from_neighbours(&records, &graph, params(), None).unwrap();
        assert!(predictions.is_empty());
        assert_eq!(stats.predicted_trees, 0);
    }

    #[test]
    fn test_tree_without_neighbours_is_skipped() {
        let records = vec![tree("lonely", None, None, None)];
        let graph = NeighbourGraph::default();
        let (predictions, stats) = predict_from_neighbours(&records, &graph, params(), None).unwrap();
        assert!(predictions.is_empty());
        assert_eq!(stats.candidates, 1);
        assert_eq!(stats.candidates_without_neighbours, 1);
    }
}
