// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Geofence validation: great-circle distance between a reported position
//! and an academy's registered coordinates. Pure functions, no state.

use geo::{Distance, Haversine, Point};

/// Maximum admissible distance between the reported position and the
/// academy, in meters.
pub const GEOFENCE_RADIUS_METERS: f64 = 300.0;

/// Great-circle distance in meters between two (latitude, longitude) pairs.
pub fn distance_meters(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    // geo points are (x, y) = (longitude, latitude)
    Haversine.distance(Point::new(lon_a, lat_a), Point::new(lon_b, lat_b))
}

/// Whether a computed distance is inside the geofence.
pub fn within_geofence(distance_meters: f64) -> bool {
    distance_meters <= GEOFENCE_RADIUS_METERS
}
