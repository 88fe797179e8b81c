//! Rapport d'exécution d'un lot
//!
//! Collecte les compteurs du pipeline et les échecs par feature, les
//! affiche en fin de lot et peut les sauvegarder en JSON.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use supertiles::{CoveredFeature, FeatureOutcome, PipelineOutput};

/// Statut global du lot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Toutes les features ont abouti
    Success,
    /// Au moins une feature a abouti, au moins une a échoué
    PartialSuccess,
    /// Aucune feature n'a abouti
    Failed,
}

/// Échec d'une feature
#[derive(Debug, Clone, Serialize)]
pub struct FeatureFailure {
    /// Position dans la collection d'entrée
    pub index: usize,
    pub id: Option<Value>,
    /// `geometry`, `no_tiles`, `stitch` ou `worker`
    pub kind: String,
    pub message: String,
}

/// Rapport complet d'un lot
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source: String,
    pub zoom: u8,
    pub buffer_radius: f64,
    pub status: RunStatus,

    pub duration_secs: f64,
    pub coverage_secs: f64,
    pub fetch_secs: f64,

    pub features_total: usize,
    pub features_covered: usize,
    pub features_stitched: usize,
    pub features_failed: usize,
    pub failures_by_kind: BTreeMap<String, usize>,

    pub tiles_requested: usize,
    pub tiles_cached: usize,
    pub tiles_downloaded: usize,
    pub tiles_missing: usize,

    pub failures: Vec<FeatureFailure>,
}

impl RunReport {
    pub fn new(source: &str, zoom: u8, buffer_radius: f64) -> Self {
        Self {
            source: source.to_string(),
            zoom,
            buffer_radius,
            status: RunStatus::Success,
            duration_secs: 0.0,
            coverage_secs: 0.0,
            fetch_secs: 0.0,
            features_total: 0,
            features_covered: 0,
            features_stitched: 0,
            features_failed: 0,
            failures_by_kind: BTreeMap::new(),
            tiles_requested: 0,
            tiles_cached: 0,
            tiles_downloaded: 0,
            tiles_missing: 0,
            failures: Vec::new(),
        }
    }

    /// Reprend les résultats d'un lot complet
    pub fn record_output(&mut self, output: &PipelineOutput) {
        let stats = &output.stats;
        self.features_total = stats.features;
        self.features_covered = stats.covered;
        self.features_stitched = stats.stitched;
        self.coverage_secs = stats.coverage_duration.as_secs_f64();
        self.fetch_secs = stats.fetch_duration.as_secs_f64();
        self.tiles_requested = stats.tiles_requested;
        self.tiles_cached = stats.tiles_cached;
        self.tiles_downloaded = stats.tiles_downloaded;
        self.tiles_missing = stats.tiles_missing;

        for (index, (outcome, feature)) in output.outcomes.iter().zip(&output.features).enumerate()
        {
            if let FeatureOutcome::Failed(e) = outcome {
                self.record_failure(index, feature.id.clone(), e.kind(), &e.to_string());
            }
        }
    }

    /// Reprend les résultats de l'étape de couverture seule
    pub fn record_coverage(&mut self, covered: &[CoveredFeature], duration: Duration) {
        self.features_total = covered.len();
        self.coverage_secs = duration.as_secs_f64();

        for (index, c) in covered.iter().enumerate() {
            match &c.coverage {
                Ok(_) => self.features_covered += 1,
                Err(e) => {
                    self.record_failure(index, c.feature.id.clone(), "geometry", &e.to_string())
                }
            }
        }
    }

    pub fn record_failure(&mut self, index: usize, id: Option<Value>, kind: &str, message: &str) {
        self.features_failed += 1;
        *self.failures_by_kind.entry(kind.to_string()).or_default() += 1;
        self.failures.push(FeatureFailure {
            index,
            id,
            kind: kind.to_string(),
            message: message.to_string(),
        });
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Détermine le statut final
    ///
    /// `succeeded` : nombre de features ayant produit le résultat attendu
    /// (mosaïque pour `run`, couverture pour `coverage`).
    pub fn finalize(&mut self, succeeded: usize) {
        self.status = if self.features_failed == 0 && succeeded > 0 {
            RunStatus::Success
        } else if succeeded > 0 {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Failed
        };
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("SUPERTILES REPORT - zoom {}", self.zoom);
        println!("{}", "=".repeat(60));

        println!("\nSource: {}", self.source);
        println!("Buffer radius: {} m", self.buffer_radius);
        println!("Status: {:?}", self.status);
        println!(
            "Duration: {:.2}s (coverage {:.2}s, fetch+stitch {:.2}s)",
            self.duration_secs, self.coverage_secs, self.fetch_secs
        );

        println!("\n--- FEATURES ---");
        println!(
            "{} total, {} covered, {} stitched, {} failed",
            self.features_total, self.features_covered, self.features_stitched, self.features_failed
        );
        for (kind, count) in &self.failures_by_kind {
            println!("  {}: {}", kind, count);
        }

        if self.tiles_requested > 0 {
            println!("\n--- TILES ---");
            println!(
                "{} requested, {} downloaded, {} cached, {} missing",
                self.tiles_requested, self.tiles_downloaded, self.tiles_cached, self.tiles_missing
            );
        }

        if !self.failures.is_empty() {
            println!("\n--- FAILURES ({}) ---", self.failures.len());
            for f in self.failures.iter().take(20) {
                let id = f.id.as_ref().map(Value::to_string).unwrap_or_default();
                println!("  #{} {} [{}] {}", f.index, id, f.kind, f.message);
            }
            if self.failures.len() > 20 {
                println!("  ... and {} more", self.failures.len() - 20);
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(())
    }

    /// Résumé sur une ligne
    pub fn summary(&self) -> String {
        format!(
            "zoom {}: {} features, {} stitched, {} failed, {} tiles downloaded",
            self.zoom,
            self.features_total,
            self.features_stitched,
            self.features_failed,
            self.tiles_downloaded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_report() {
        let report = RunReport::new("input.geojson", 18, 100.0);
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.features_total, 0);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_record_failure() {
        let mut report = RunReport::new("input.geojson", 18, 100.0);
        report.record_failure(2, Some(Value::from("f2")), "geometry", "Feature has no geometry");
        report.record_failure(5, None, "no_tiles", "no tiles");
        report.record_failure(6, None, "no_tiles", "no tiles");

        assert_eq!(report.features_failed, 3);
        assert_eq!(report.failures_by_kind["no_tiles"], 2);
        assert_eq!(report.failures_by_kind["geometry"], 1);
    }

    #[test]
    fn test_finalize() {
        let mut report = RunReport::new("input.geojson", 18, 100.0);
        report.finalize(3);
        assert_eq!(report.status, RunStatus::Success);

        report.record_failure(0, None, "stitch", "boom");
        report.finalize(3);
        assert_eq!(report.status, RunStatus::PartialSuccess);

        report.finalize(0);
        assert_eq!(report.status, RunStatus::Failed);
    }

    #[test]
    fn test_save_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let mut report = RunReport::new("input.geojson", 17, 200.0);
        report.tiles_downloaded = 12;
        report.finalize(1);
        report.save_to_file(&path).unwrap();

        let json: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["status"], "Success");
        assert_eq!(json["tiles_downloaded"], 12);
        assert!(report.summary().contains("zoom 17"));
    }
}
