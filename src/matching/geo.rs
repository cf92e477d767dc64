// src/matching/geo.rs
use anyhow::{bail, Result};

use crate::models::{round_to, GeoPoint};
use crate::utils::constants::{EARTH_RADIUS_KM, WGS84_A_METERS, WGS84_B_METERS};

/// Degree/meter scale factors at one latitude.
///
/// The city spans a small latitude range, so a single scale computed at the
/// reference latitude is threaded through the whole pair search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoScale {
    /// WGS84 earth radius at the latitude, in meters.
    pub earth_radius_meters: f64,
    /// Radius of the parallel circle at the latitude, in meters.
    pub parallel_radius_meters: f64,
}

impl GeoScale {
    pub fn at_latitude(latitude: f64) -> Result<Self> {
        if !latitude.is_finite() || latitude.abs() >= 90.0 {
            bail!("Cannot compute geo scale at degenerate latitude {}", latitude);
        }
        let lat = latitude.to_radians();
        let an = WGS84_A_METERS * WGS84_A_METERS * lat.cos();
        let bn = WGS84_B_METERS * WGS84_B_METERS * lat.sin();
        let ad = WGS84_A_METERS * lat.cos();
        let bd = WGS84_B_METERS * lat.sin();
        let earth_radius_meters = ((an * an + bn * bn) / (ad * ad + bd * bd)).sqrt();
        let parallel_radius_meters = earth_radius_meters * lat.cos();
        if parallel_radius_meters <= f64::EPSILON {
            bail!("Parallel radius vanishes at latitude {}", latitude);
        }
        Ok(Self {
            earth_radius_meters,
            parallel_radius_meters,
        })
    }

    pub fn lat_degrees_per_meter(&self) -> f64 {
        (1.0 / self.earth_radius_meters).to_degrees()
    }

    pub fn lng_degrees_per_meter(&self) -> f64 {
        (1.0 / self.parallel_radius_meters).to_degrees()
    }
}

/// Axis-aligned lat/lng box used as a cheap prefilter before the exact distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Square box with the given half side (meters) centred on `center`.
    pub fn around(center: GeoPoint, half_side_meters: f64, scale: &GeoScale) -> Result<Self> {
        if !center.is_valid() {
            bail!(
                "Invalid center ({}, {}) for bounding box",
                center.lat,
                center.lng
            );
        }
        let dlat = half_side_meters * scale.lat_degrees_per_meter();
        let dlng = half_side_meters * scale.lng_degrees_per_meter();
        Ok(Self {
            min_lat: center.lat - dlat,
            max_lat: center.lat + dlat,
            min_lng: center.lng - dlng,
            max_lng: center.lng + dlng,
        })
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lng >= self.min_lng
            && point.lng <= self.max_lng
    }
}

/// Great-circle distance in meters, rounded to two decimals.
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    // Rounding noise can push h marginally above 1 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();
    round_to(c * EARTH_RADIUS_KM * 1000.0, 2)
}
