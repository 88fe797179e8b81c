//! Écriture des FeatureCollections de sortie (streaming, geozero)

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;
use geo::Geometry;
use geozero::geojson::GeoJsonWriter;
use geozero::GeozeroGeometry;
use tracing::info;

use supertiles::{CoverageResult, Destination, Feature};

/// Écrit une collection vers un chemin local ou une URI de stockage objet
pub async fn save_features(location: &str, features: &[Feature]) -> Result<()> {
    if location.contains("://") {
        let (root, name) = location
            .rsplit_once('/')
            .with_context(|| format!("Invalid output URI: {}", location))?;

        let mut buf = Vec::new();
        write_collection(&mut buf, features)?;
        Destination::parse(root)?
            .write(name, Bytes::from(buf))
            .await
            .with_context(|| format!("Failed to upload {}", location))?;
    } else {
        export_to_geojson(features, Path::new(location))?;
    }

    info!(output = location, features = features.len(), "GeoJSON written");
    Ok(())
}

/// Exporte des features dans un fichier GeoJSON local
pub fn export_to_geojson(features: &[Feature], output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let file = File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);
    write_collection(&mut writer, features)?;
    writer.flush()?;

    Ok(())
}

/// Collection de visualisation : géométrie remplacée par l'emprise des tuiles
///
/// Les features sans couverture gardent leur géométrie d'origine.
pub fn coverage_features(features: &[Feature], coverages: &[Option<CoverageResult>]) -> Vec<Feature> {
    features
        .iter()
        .zip(coverages)
        .map(|(feature, coverage)| {
            let mut out = feature.clone();
            if let Some(coverage) = coverage {
                out.geometry = Some(Geometry::Polygon(coverage.bbox.to_polygon()));
            }
            out
        })
        .collect()
}

pub fn write_collection<W: Write>(writer: &mut W, features: &[Feature]) -> Result<()> {
    write!(writer, r#"{{"type":"FeatureCollection","features":["#)?;

    for (i, feature) in features.iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write_feature(writer, feature)?;
    }

    write!(writer, "]}}")?;
    Ok(())
}

fn write_feature<W: Write>(writer: &mut W, feature: &Feature) -> Result<()> {
    write!(writer, r#"{{"type":"Feature","#)?;

    if let Some(id) = &feature.id {
        write!(writer, r#""id":"#)?;
        serde_json::to_writer(&mut *writer, id)?;
        write!(writer, ",")?;
    }

    write!(writer, r#""geometry":"#)?;
    match &feature.geometry {
        Some(geometry) => {
            let mut geom_buf = Vec::new();
            geometry.process_geom(&mut GeoJsonWriter::new(&mut geom_buf))?;
            writer.write_all(&geom_buf)?;
        }
        None => write!(writer, "null")?,
    }

    write!(writer, r#","properties":"#)?;
    serde_json::to_writer(&mut *writer, &feature.properties)?;
    write!(writer, "}}")?;

    Ok(())
}
