//! Reprojection géographique ↔ métrique
//!
//! Deux systèmes de référence fixes :
//! - WGS84 (EPSG:4326), degrés
//! - Web Mercator (EPSG:3857), mètres
//!
//! Le transformer est construit une fois puis partagé en lecture seule
//! entre tous les workers.

mod mercator;
#[cfg(feature = "proj")]
mod proj_backend;

pub use mercator::{MAX_MERCATOR_LATITUDE, WGS84_A};

use crate::error::TransformError;

/// Transformation bidirectionnelle EPSG:4326 ↔ EPSG:3857
pub enum CoordinateTransformer {
    /// Web Mercator sphérique (pure Rust)
    Spherical,
    /// Reprojection via PROJ (si feature activée)
    #[cfg(feature = "proj")]
    Proj(proj_backend::ProjTransformer),
}

impl Default for CoordinateTransformer {
    fn default() -> Self {
        Self::Spherical
    }
}

impl CoordinateTransformer {
    /// Crée le transformer pure Rust
    pub fn new() -> Self {
        Self::default()
    }

    /// Crée un transformer adossé à PROJ
    #[cfg(feature = "proj")]
    pub fn with_proj() -> Result<Self, TransformError> {
        Ok(Self::Proj(proj_backend::ProjTransformer::new()?))
    }

    /// (lon, lat) en degrés → (x, y) en mètres
    pub fn to_metric(&self, lon: f64, lat: f64) -> Result<(f64, f64), TransformError> {
        match self {
            Self::Spherical => Ok(mercator::geographic_to_web_mercator(lon, lat)),
            #[cfg(feature = "proj")]
            Self::Proj(p) => p.to_metric(lon, lat),
        }
    }

    /// (x, y) en mètres → (lon, lat) en degrés
    pub fn to_geographic(&self, x: f64, y: f64) -> Result<(f64, f64), TransformError> {
        match self {
            Self::Spherical => Ok(mercator::web_mercator_to_geographic(x, y)),
            #[cfg(feature = "proj")]
            Self::Proj(p) => p.to_geographic(x, y),
        }
    }

    /// Retourne une description du backend utilisé
    pub fn description(&self) -> &'static str {
        match self {
            Self::Spherical => "spherical web mercator (pure Rust)",
            #[cfg(feature = "proj")]
            Self::Proj(_) => "proj (PROJ library)",
        }
    }
}
