// src/config.rs
use anyhow::{bail, Result};
use log::{debug, info};

use crate::utils::constants::{
    CLUSTER_EPS, LATEST_SURVEY_YEAR, MIN_SAMPLES, MIN_TREE_DISTANCE_METERS, RADIUS_METERS,
    REFERENCE_LATITUDE,
};
use crate::utils::env::env_or;

/// Tunables of the neighbour search, duplicate resolution and consensus clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighbourConfig {
    /// Neighbour search radius in meters (`RADIUS`).
    pub radius_meters: f64,
    /// Duplicate threshold in meters (`MIN_TREE_DISTANCE`).
    pub min_tree_distance_meters: f64,
    /// Minimum voters per attribute and DBSCAN density minimum (`MIN_SAMPLES`).
    pub min_samples: usize,
    /// DBSCAN eps on standardized values (`CLUSTER_EPS`).
    pub cluster_eps: f64,
    /// Latitude at which the degree/meter scale factors are computed (`REFERENCE_LATITUDE`).
    pub reference_latitude: f64,
    /// Survey whose presence flag wins duplicate conflicts across cohorts (`LATEST_SURVEY_YEAR`).
    pub latest_survey_year: u16,
    /// Comparison windows processed concurrently; 1 means sequential (`MAX_PARALLEL_WINDOWS`).
    pub max_parallel_windows: usize,
}

impl Default for NeighbourConfig {
    fn default() -> Self {
        Self {
            radius_meters: RADIUS_METERS,
            min_tree_distance_meters: MIN_TREE_DISTANCE_METERS,
            min_samples: MIN_SAMPLES,
            cluster_eps: CLUSTER_EPS,
            reference_latitude: REFERENCE_LATITUDE,
            latest_survey_year: LATEST_SURVEY_YEAR,
            max_parallel_windows: num_cpus::get(),
        }
    }
}

impl NeighbourConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            radius_meters: env_or("RADIUS", defaults.radius_meters),
            min_tree_distance_meters: env_or("MIN_TREE_DISTANCE", defaults.min_tree_distance_meters),
            min_samples: env_or("MIN_SAMPLES", defaults.min_samples),
            cluster_eps: env_or("CLUSTER_EPS", defaults.cluster_eps),
            reference_latitude: env_or("REFERENCE_LATITUDE", defaults.reference_latitude),
            latest_survey_year: env_or("LATEST_SURVEY_YEAR", defaults.latest_survey_year),
            max_parallel_windows: env_or("MAX_PARALLEL_WINDOWS", defaults.max_parallel_windows),
        };
        debug!("Neighbour config from env: {:?}", config);
        config
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.radius_meters.is_finite() && self.radius_meters > 0.0) {
            bail!("RADIUS must be a positive number of meters, got {}", self.radius_meters);
        }
        if !(self.min_tree_distance_meters.is_finite() && self.min_tree_distance_meters >= 0.0) {
            bail!(
                "MIN_TREE_DISTANCE must be a non-negative number of meters, got {}",
                self.min_tree_distance_meters
            );
        }
        if self.min_tree_distance_meters >= self.radius_meters {
            bail!(
                "MIN_TREE_DISTANCE ({}) must be smaller than RADIUS ({})",
                self.min_tree_distance_meters,
                self.radius_meters
            );
        }
        if self.min_samples < 2 {
            bail!("MIN_SAMPLES must be at least 2, got {}", self.min_samples);
        }
        if !(self.cluster_eps.is_finite() && self.cluster_eps > 0.0) {
            bail!("CLUSTER_EPS must be positive, got {}", self.cluster_eps);
        }
        if !(self.reference_latitude.is_finite() && self.reference_latitude.abs() < 90.0) {
            bail!(
                "REFERENCE_LATITUDE must lie strictly between -90 and 90, got {}",
                self.reference_latitude
            );
        }
        if self.max_parallel_windows == 0 {
            bail!("MAX_PARALLEL_WINDOWS must be at least 1");
        }
        Ok(())
    }

    pub fn log_config(&self) {
        info!(
            "Neighbour config: radius={}m, duplicate threshold={}m, min_samples={}, eps={}, reference latitude={}, latest survey={}, parallel windows={}",
            self.radius_meters,
            self.min_tree_distance_meters,
            self.min_samples,
            self.cluster_eps,
            self.reference_latitude,
            self.latest_survey_year,
            self.max_parallel_windows
        );
    }
}
