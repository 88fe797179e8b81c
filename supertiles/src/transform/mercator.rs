//! Projection Web Mercator sphérique (EPSG:3857)
//!
//! Aussi connue sous le nom de Pseudo-Mercator. Modèle sphérique avec le
//! rayon équatorial WGS84, comme les services de tuiles XYZ.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

/// Demi-grand axe WGS84 (rayon équatorial) en mètres
pub const WGS84_A: f64 = 6_378_137.0;

/// Latitude au-delà de laquelle Web Mercator diverge
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

/// Convertit (lon, lat) en degrés vers (x, y) Web Mercator en mètres
pub fn geographic_to_web_mercator(lon: f64, lat: f64) -> (f64, f64) {
    // Limiter la latitude pour éviter l'infini aux pôles
    let lat = lat
        .clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE)
        .to_radians();

    let x = WGS84_A * lon.to_radians();
    let y = WGS84_A * (FRAC_PI_4 + lat / 2.0).tan().ln();

    (x, y)
}

/// Convertit (x, y) Web Mercator en mètres vers (lon, lat) en degrés
pub fn web_mercator_to_geographic(x: f64, y: f64) -> (f64, f64) {
    let lon = x / WGS84_A;
    let lat = 2.0 * (y / WGS84_A).exp().atan() - FRAC_PI_2;

    (lon.to_degrees(), lat.to_degrees())
}
