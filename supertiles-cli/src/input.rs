//! Chargement de la FeatureCollection d'entrée
//!
//! Sources acceptées : fichier local, URL `http(s)://`, ou URI de stockage
//! objet (`s3://`, `gs://`).

use std::str::FromStr;

use anyhow::{Context, Result};
use geojson::{feature::Id, GeoJson};
use serde_json::Value;
use tracing::{debug, info, warn};

use supertiles::{Destination, Feature};

/// Lit et décode une FeatureCollection depuis une source
pub async fn load_features(source: &str) -> Result<Vec<Feature>> {
    let text = read_source(source).await?;
    let features =
        parse_features(&text).with_context(|| format!("Invalid GeoJSON in {}", source))?;

    info!(source, features = features.len(), "Input loaded");
    Ok(features)
}

async fn read_source(source: &str) -> Result<String> {
    if source.starts_with("http://") || source.starts_with("https://") {
        debug!(url = source, "Downloading input");
        let response = reqwest::get(source)
            .await
            .with_context(|| format!("Failed to download {}", source))?
            .error_for_status()
            .with_context(|| format!("Failed to download {}", source))?;
        return response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {}", source));
    }

    if source.contains("://") {
        let (root, name) = source
            .rsplit_once('/')
            .with_context(|| format!("Invalid object URI: {}", source))?;
        let data = Destination::parse(root)?.read(name).await?;
        return String::from_utf8(data.to_vec())
            .with_context(|| format!("Input is not valid UTF-8: {}", source));
    }

    tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("Failed to read input file: {}", source))
}

/// Décode un document GeoJSON en features
///
/// Une géométrie absente ou non convertible donne une feature sans
/// géométrie : elle sera signalée en échec par le pipeline, sans bloquer
/// les autres.
pub fn parse_features(text: &str) -> Result<Vec<Feature>> {
    let features = match GeoJson::from_str(text)? {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(geometry) => vec![geojson::Feature {
            geometry: Some(geometry),
            ..Default::default()
        }],
    };

    Ok(features
        .into_iter()
        .enumerate()
        .map(|(idx, f)| convert(idx, f))
        .collect())
}

fn convert(idx: usize, feature: geojson::Feature) -> Feature {
    let id = feature.id.map(|id| match id {
        Id::String(s) => Value::String(s),
        Id::Number(n) => Value::Number(n),
    });

    let geometry = feature
        .geometry
        .and_then(|g| match geo::Geometry::<f64>::try_from(g) {
            Ok(geometry) => Some(geometry),
            Err(e) => {
                warn!(feature = idx, error = %e, "Unreadable geometry");
                None
            }
        });

    Feature {
        id,
        geometry,
        properties: feature.properties.unwrap_or_default(),
    }
}
