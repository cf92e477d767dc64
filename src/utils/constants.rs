// src/utils/constants.rs

/// Neighbour search radius in meters. Also the half side of the bounding box prefilter.
pub const RADIUS_METERS: f64 = 50.0;

/// Trees closer than this (meters) are candidate duplicates rather than neighbours.
pub const MIN_TREE_DISTANCE_METERS: f64 = 3.0;

/// Minimum number of voting neighbours per attribute, and the DBSCAN density minimum.
pub const MIN_SAMPLES: usize = 5;

/// DBSCAN neighbourhood radius on standardized 1-D values.
pub const CLUSTER_EPS: f64 = 0.3;

/// Latitude of Cologne, Germany. One scale factor is computed here for the whole city.
pub const REFERENCE_LATITUDE: f64 = 50.935173;

/// Survey year whose presence flag decides recency between duplicate cohorts.
pub const LATEST_SURVEY_YEAR: u16 = 2020;

/// Mean earth radius used by the haversine distance.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// WGS84 semi-major and semi-minor axes, used for the per-latitude scale factors.
pub const WGS84_A_METERS: f64 = 6_378_137.0;
pub const WGS84_B_METERS: f64 = 6_356_752.3;

/// Age brackets (lower inclusive, upper exclusive) in years, indexed by age group.
pub const AGE_GROUP_BRACKETS: [(i32, i32); 3] = [(1, 26), (26, 41), (41, 1000)];
