//! # supertiles
//!
//! Construction de « supertiles » : mosaïques raster de tuiles XYZ autour de
//! chaque feature d'une collection, destinées à l'entraînement de modèles.
//!
//! ## Features
//!
//! - Couverture en tuiles d'une feature (buffer carré métrique, recalé sur
//!   la tuile enfant)
//! - Découpage de la géométrie à l'emprise des tuiles (`has_clip`)
//! - Téléchargement idempotent vers un répertoire local ou un stockage objet
//! - Assemblage des tuiles par position dans la grille
//! - Pipeline parallèle borné avec isolation des échecs par feature
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use supertiles::{CoordinateTransformer, Destination, Orchestrator, PipelineConfig};
//!
//! let config = PipelineConfig::new(18, 100.0, "https://tile.openstreetmap.org/{z}/{x}/{y}.png");
//! let orchestrator = Orchestrator::with_http(
//!     config,
//!     Arc::new(CoordinateTransformer::new()),
//!     Destination::parse("data/tiles")?,
//!     Destination::parse("s3://bucket/supertiles")?,
//! )?;
//!
//! let output = orchestrator.run(features).await?;
//! println!("{} mosaics", output.stats.stitched);
//! ```

pub mod clip;
pub mod coverage;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod stitch;
pub mod storage;
pub mod tile;
pub mod transform;
pub mod types;

pub use clip::GeometryClipper;
pub use coverage::CoverageCalculator;
pub use error::{
    ConfigError, FeatureError, GeometryError, PipelineError, StitchError, StorageError,
    TileFetchFailure,
};
pub use fetch::{FetchOutcome, ReqwestTileClient, TileClient, TileFetcher};
pub use pipeline::{
    CoverageStage, CoveredFeature, FeatureOutcome, MapServiceType, Orchestrator, PipelineConfig,
    PipelineOutput, PipelineStats,
};
pub use stitch::MosaicStitcher;
pub use storage::Destination;
pub use tile::TileId;
pub use transform::CoordinateTransformer;
pub use types::{CoverageResult, Feature};
