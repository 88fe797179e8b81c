//! # supertiles-cli
//!
//! Construction de supertiles depuis une FeatureCollection GeoJSON.
//!
//! ## Usage CLI
//!
//! ```bash
//! # Couverture, tuiles et mosaïques (commande par défaut)
//! supertiles --geojson-file schools.geojson --zoom 18 \
//!     --tiles-folder data/tiles --st-tiles-folder s3://bucket/supertiles
//!
//! # Couverture seule, sans réseau
//! supertiles coverage --geojson-file schools.geojson --zoom 17 \
//!     --coverage-output data/coverage.geojson
//! ```

pub mod config;
pub mod export;
pub mod input;
pub mod report;

pub use config::RadiusTable;
pub use report::{RunReport, RunStatus};
