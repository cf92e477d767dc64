// src/models.rs
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::utils::constants::AGE_GROUP_BRACKETS;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeId(pub String);

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TreeId {
    fn from(value: &str) -> Self {
        TreeId(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuburbId(pub String);

impl fmt::Display for SuburbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SuburbId {
    fn from(value: &str) -> Self {
        SuburbId(value.to_string())
    }
}

/// Suburb id → suburbs considered spatially adjacent to it.
pub type SuburbAdjacency = HashMap<SuburbId, HashSet<SuburbId>>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// One tree of the merged census.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeRecord {
    pub tree_id: TreeId,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub suburb_id: Option<SuburbId>,
    #[serde(default)]
    pub genus: Option<String>,
    /// Index into `AGE_GROUP_BRACKETS`.
    #[serde(default)]
    pub age_group: Option<u8>,
    #[serde(default)]
    pub year_sprout: Option<i32>,
    /// Survey year → whether the tree was found in that survey.
    #[serde(default)]
    pub found_in_dataset: BTreeMap<u16, bool>,
    #[serde(default)]
    pub dataset_completeness: Option<f64>,
}

impl TreeRecord {
    pub fn position(&self) -> Option<GeoPoint> {
        let point = GeoPoint {
            lat: self.lat,
            lng: self.lng,
        };
        point.is_valid().then_some(point)
    }

    pub fn found_in(&self, survey_year: u16) -> bool {
        self.found_in_dataset
            .get(&survey_year)
            .copied()
            .unwrap_or(false)
    }

    /// Fills a missing age group from the sprout year. Returns true if the
    /// record changed.
    pub fn derive_age_group(&mut self, reference_year: i32) -> bool {
        if self.age_group.is_some() {
            return false;
        }
        let Some(year_sprout) = self.year_sprout else {
            return false;
        };
        self.age_group = age_group_for_year(year_sprout, reference_year);
        self.age_group.is_some()
    }

    /// The stored completeness score, or one derived from the record's own
    /// optional fields when the ingestion stage did not provide it.
    pub fn completeness(&self) -> f64 {
        match self.dataset_completeness {
            Some(score) => score,
            None => completeness_score(&[
                &[self.suburb_id.is_some()],
                &[self.genus.is_some()],
                &[self.year_sprout.is_some(), self.age_group.is_some()],
            ]),
        }
    }
}

/// Mean of per-section fill ratios, each rounded to two decimals.
pub fn completeness_score(sections: &[&[bool]]) -> f64 {
    let ratios: Vec<f64> = sections
        .iter()
        .filter(|section| !section.is_empty())
        .map(|section| {
            let populated = section.iter().filter(|is_set| **is_set).count();
            round_to(populated as f64 / section.len() as f64, 2)
        })
        .collect();
    if ratios.is_empty() {
        return 0.0;
    }
    round_to(ratios.iter().sum::<f64>() / ratios.len() as f64, 2)
}

/// Maps a sprout year to its age bracket as seen from `reference_year`.
pub fn age_group_for_year(year_sprout: i32, reference_year: i32) -> Option<u8> {
    let age = reference_year - year_sprout;
    AGE_GROUP_BRACKETS
        .iter()
        .position(|(lower, upper)| age >= *lower && age < *upper)
        .map(|idx| idx as u8)
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairKind {
    /// Closer than the duplicate threshold.
    Close,
    /// Within the search radius, usable for inference.
    Neighbour,
}

/// Unordered pair of trees with their great-circle distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairEdge {
    pub tree_id_1: TreeId,
    pub tree_id_2: TreeId,
    pub distance_meters: f64,
}

impl PairEdge {
    /// Order-independent key of the pair.
    pub fn key(&self) -> (TreeId, TreeId) {
        if self.tree_id_1 <= self.tree_id_2 {
            (self.tree_id_1.clone(), self.tree_id_2.clone())
        } else {
            (self.tree_id_2.clone(), self.tree_id_1.clone())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionAttribute {
    Genus,
    AgeGroup,
    YearSprout,
}

impl PredictionAttribute {
    pub const ALL: [PredictionAttribute; 3] = [
        PredictionAttribute::Genus,
        PredictionAttribute::AgeGroup,
        PredictionAttribute::YearSprout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionAttribute::Genus => "genus",
            PredictionAttribute::AgeGroup => "age_group",
            PredictionAttribute::YearSprout => "year_sprout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictedValue {
    Genus(String),
    Number(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributePrediction {
    pub prediction: PredictedValue,
    /// `votes / neighbour_count`.
    pub probability: f64,
    pub votes: usize,
    pub neighbour_count: usize,
}

pub type AttributePredictions = BTreeMap<PredictionAttribute, AttributePrediction>;

/// Tree id → predicted attributes. Trees without any prediction are absent.
pub type Predictions = BTreeMap<TreeId, AttributePredictions>;

/// Line format of the predictions export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreePrediction {
    pub tree_id: TreeId,
    pub by_radius_prediction: AttributePredictions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    PairFinding,
    DuplicateResolution,
    NeighbourGraph,
    Prediction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    pub run_id: String,
    pub run_timestamp: NaiveDateTime,
    pub description: Option<String>,
    pub total_records: usize,
    pub total_records_kept: usize,
    pub total_records_skipped: usize,
    pub total_comparison_windows: usize,
    pub total_close_pairs: usize,
    pub total_neighbour_pairs: usize,
    pub invalid_positions: usize,
    pub conflicting_duplicate_decisions: usize,
    pub total_predicted_records: usize,
    pub genus_predictions: usize,
    pub age_group_predictions: usize,
    pub year_sprout_predictions: usize,
    pub pair_finding_time: f64,
    pub duplicate_resolution_time: f64,
    pub neighbour_graph_time: f64,
    pub prediction_time: f64,
    pub total_processing_time: f64,
}

impl PipelineStats {
    pub fn new(run_id: String, run_timestamp: NaiveDateTime, description: Option<String>) -> Self {
        Self {
            run_id,
            run_timestamp,
            description,
            total_records: 0,
            total_records_kept: 0,
            total_records_skipped: 0,
            total_comparison_windows: 0,
            total_close_pairs: 0,
            total_neighbour_pairs: 0,
            invalid_positions: 0,
            conflicting_duplicate_decisions: 0,
            total_predicted_records: 0,
            genus_predictions: 0,
            age_group_predictions: 0,
            year_sprout_predictions: 0,
            pair_finding_time: 0.0,
            duplicate_resolution_time: 0.0,
            neighbour_graph_time: 0.0,
            prediction_time: 0.0,
            total_processing_time: 0.0,
        }
    }
}
