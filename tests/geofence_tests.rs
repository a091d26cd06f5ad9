// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Geofence distance tests with real-world coordinates.

use checkin_engine::services::geo::{distance_meters, within_geofence, GEOFENCE_RADIUS_METERS};

// Academia on Av. Paulista, São Paulo
const ACADEMY_LAT: f64 = -23.5614;
const ACADEMY_LON: f64 = -46.6559;

#[test]
fn test_zero_distance_at_same_point() {
    let d = distance_meters(ACADEMY_LAT, ACADEMY_LON, ACADEMY_LAT, ACADEMY_LON);
    assert!(d < 0.01, "distance at same point should be ~0, got {}", d);
}

#[test]
fn test_member_across_the_street_is_within_range() {
    // ~60 m north of the academy (1 deg latitude ~= 111.32 km)
    let member_lat = ACADEMY_LAT + 60.0 / 111_320.0;
    let d = distance_meters(member_lat, ACADEMY_LON, ACADEMY_LAT, ACADEMY_LON);

    assert!((55.0..65.0).contains(&d), "expected ~60 m, got {}", d);
    assert!(within_geofence(d));
}

#[test]
fn test_member_a_few_blocks_away_is_out_of_range() {
    // ~900 m away
    let member_lat = ACADEMY_LAT + 900.0 / 111_320.0;
    let d = distance_meters(member_lat, ACADEMY_LON, ACADEMY_LAT, ACADEMY_LON);

    assert!(d > 800.0, "expected ~900 m, got {}", d);
    assert!(!within_geofence(d));
}

#[test]
fn test_boundary_is_inclusive() {
    assert!(within_geofence(GEOFENCE_RADIUS_METERS));
    assert!(within_geofence(GEOFENCE_RADIUS_METERS - 1.0));
    assert!(!within_geofence(GEOFENCE_RADIUS_METERS + 0.1));
}

#[test]
fn test_distance_is_symmetric() {
    let other_lat = -23.5505;
    let other_lon = -46.6333;

    let ab = distance_meters(ACADEMY_LAT, ACADEMY_LON, other_lat, other_lon);
    let ba = distance_meters(other_lat, other_lon, ACADEMY_LAT, ACADEMY_LON);

    assert!((ab - ba).abs() < 1e-6);
}

#[test]
fn test_known_distance_paulista_to_se() {
    // Av. Paulista to Praça da Sé is roughly 2.6 km as the crow flies
    let d = distance_meters(ACADEMY_LAT, ACADEMY_LON, -23.5505, -46.6333);
    assert!(
        (2_300.0..3_000.0).contains(&d),
        "expected ~2.6 km, got {} m",
        d
    );
}
