//! Configuration : table zoom → rayon du buffer

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Rayon du buffer (mètres) par niveau de zoom
///
/// Format JSON : `{"18": 100, "19": 50, ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RadiusTable {
    radii: BTreeMap<u8, f64>,
}

impl RadiusTable {
    /// Charge une table depuis un fichier JSON
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read radius table: {}", path.display()))?;

        let table: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse radius table: {}", path.display()))?;
        table.validate()?;
        Ok(table)
    }

    /// Charge une table embarquée
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "default" => Self::load_embedded(include_str!("presets/default.json")),
            _ => anyhow::bail!("Unknown radius preset: {}. Use: default", preset),
        }
    }

    /// Nom de preset embarqué ou chemin vers un fichier JSON
    pub fn resolve(name: &str) -> Result<Self> {
        let path = Path::new(name);
        if path.extension().is_some_and(|ext| ext == "json") || path.is_file() {
            Self::load(path)
        } else {
            Self::from_preset(name)
        }
    }

    fn load_embedded(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse embedded radius table")
    }

    fn validate(&self) -> Result<()> {
        if let Some((zoom, radius)) = self
            .radii
            .iter()
            .find(|(_, r)| !r.is_finite() || **r <= 0.0)
        {
            anyhow::bail!("Invalid radius {} m for zoom {}", radius, zoom);
        }
        Ok(())
    }

    /// Rayon associé à un zoom, si défini
    pub fn radius_for(&self, zoom: u8) -> Option<f64> {
        self.radii.get(&zoom).copied()
    }

    pub fn zooms(&self) -> impl Iterator<Item = u8> + '_ {
        self.radii.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preset() {
        let table = RadiusTable::from_preset("default").unwrap();
        assert_eq!(table.zooms().collect::<Vec<_>>(), (1..=21).collect::<Vec<_>>());
        assert_eq!(table.radius_for(18), Some(100.0));
        assert_eq!(table.radius_for(1), Some(10_000_000.0));
        assert_eq!(table.radius_for(21), Some(10.0));
        assert_eq!(table.radius_for(22), None);
    }

    #[test]
    fn test_unknown_preset() {
        assert!(RadiusTable::from_preset("legacy").is_err());
    }

    #[test]
    fn test_load_custom_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radii.json");
        std::fs::write(&path, r#"{"17": 250.5, "18": 120}"#).unwrap();

        let table = RadiusTable::resolve(path.to_str().unwrap()).unwrap();
        assert_eq!(table.radius_for(17), Some(250.5));
        assert_eq!(table.radius_for(18), Some(120.0));
        assert_eq!(table.radius_for(19), None);
    }

    #[test]
    fn test_reject_invalid_radius() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radii.json");
        std::fs::write(&path, r#"{"18": -5}"#).unwrap();

        assert!(RadiusTable::load(&path).is_err());
    }
}
