//! Modules d'export

pub mod geojson;

pub use geojson::{coverage_features, export_to_geojson, save_features};
