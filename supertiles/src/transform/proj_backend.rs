//! Reprojection via PROJ
//!
//! Ce module est disponible uniquement avec le feature `proj`.

use std::sync::Mutex;

use proj::Proj;

use crate::error::TransformError;

/// Paire de transformations EPSG:4326 ↔ EPSG:3857 via PROJ
///
/// `Proj` n'est pas `Sync` : chaque sens est protégé par un mutex pour
/// partager le transformer entre workers.
pub struct ProjTransformer {
    forward: Mutex<Proj>,
    inverse: Mutex<Proj>,
}

impl ProjTransformer {
    /// Crée les deux transformations
    pub fn new() -> Result<Self, TransformError> {
        Ok(Self {
            forward: Mutex::new(known_crs("EPSG:4326", "EPSG:3857")?),
            inverse: Mutex::new(known_crs("EPSG:3857", "EPSG:4326")?),
        })
    }

    pub fn to_metric(&self, lon: f64, lat: f64) -> Result<(f64, f64), TransformError> {
        convert(&self.forward, lon, lat)
    }

    pub fn to_geographic(&self, x: f64, y: f64) -> Result<(f64, f64), TransformError> {
        convert(&self.inverse, x, y)
    }
}

fn known_crs(source: &str, target: &str) -> Result<Proj, TransformError> {
    Proj::new_known_crs(source, target, None).map_err(|e| TransformError {
        x: f64::NAN,
        y: f64::NAN,
        reason: format!("Failed to create projection from {} to {}: {}", source, target, e),
    })
}

fn convert(proj: &Mutex<Proj>, x: f64, y: f64) -> Result<(f64, f64), TransformError> {
    let proj = proj.lock().map_err(|_| TransformError {
        x,
        y,
        reason: "projection mutex poisoned".to_string(),
    })?;

    proj.convert((x, y)).map_err(|e| TransformError {
        x,
        y,
        reason: e.to_string(),
    })
}
