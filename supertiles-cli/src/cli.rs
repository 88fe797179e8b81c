//! Définition et implémentation des commandes CLI
//!
//! - `run` (défaut) : couverture, téléchargement des tuiles et mosaïques
//! - `coverage` : couverture et découpage seuls, sans réseau

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tracing::{info, warn};

use supertiles::coverage::DEFAULT_MAX_TILES;
use supertiles::pipeline::{default_jobs, DEFAULT_URL_TEMPLATE, MAX_ZOOM, MIN_ZOOM};
use supertiles::{
    CoordinateTransformer, CoverageResult, CoverageStage, Destination, MapServiceType,
    Orchestrator, PipelineConfig,
};
use supertiles_cli::config::RadiusTable;
use supertiles_cli::export::geojson::{coverage_features, save_features};
use supertiles_cli::input::load_features;
use supertiles_cli::report::RunReport;

#[derive(Subcommand)]
pub enum Commands {
    /// Compute tile coverage, download tiles and build supertiles (default)
    Run(RunArgs),

    /// Compute tile coverage and clip geometries only (no network access)
    Coverage(CoverageArgs),
}

/// Options communes aux deux commandes
#[derive(Args, Debug, Clone)]
pub struct CoverageArgs {
    /// Input GeoJSON: local path, http(s):// URL, or s3:// / gs:// URI
    #[arg(long)]
    pub geojson_file: String,

    /// Zoom level of the tiles
    #[arg(long, default_value_t = 18, value_parser = clap::value_parser!(u8).range(i64::from(MIN_ZOOM)..=i64::from(MAX_ZOOM)))]
    pub zoom: u8,

    /// Buffer radius in meters (overrides the radius preset)
    #[arg(long)]
    pub buffer: Option<f64>,

    /// Zoom→radius preset name (default) or path to a JSON table
    #[arg(long, default_value = "default")]
    pub radius_preset: String,

    /// Output GeoJSON with tiles_list, tiles_bbox, has_clip and stile
    #[arg(long, default_value = "data/supertiles.geojson")]
    pub geojson_output: String,

    /// Optional GeoJSON whose geometries are the coverage bounding boxes
    #[arg(long)]
    pub coverage_output: Option<String>,

    /// Maximum tiles per feature; larger coverages fail that feature only
    #[arg(long, env = "SUPERTILES_MAX_TILES", default_value_t = DEFAULT_MAX_TILES)]
    pub max_tiles: usize,

    /// Worker count (default: available parallelism)
    #[arg(long, env = "SUPERTILES_JOBS")]
    pub jobs: Option<usize>,

    /// Write a JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Use the PROJ library for reprojection
    #[cfg(feature = "proj")]
    #[arg(long)]
    pub proj: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub coverage: CoverageArgs,

    /// Tile service URL template with {x}, {y} and {z}
    #[arg(long, env = "SUPERTILES_URL_MAP_SERVICE", default_value = DEFAULT_URL_TEMPLATE)]
    pub url_map_service: String,

    /// Tile service type (only tms is supported)
    #[arg(long, default_value = "tms")]
    pub url_map_service_type: String,

    /// Tiles destination: local folder or s3:// / gs:// prefix
    #[arg(long, default_value = "data/tiles")]
    pub tiles_folder: String,

    /// Supertiles destination: local folder or s3:// / gs:// prefix
    #[arg(long, default_value = "data/supertiles")]
    pub st_tiles_folder: String,

    /// Tile file extension
    #[arg(long, default_value = "png")]
    pub tile_format: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 3.05)]
    pub timeout: f64,
}

impl CoverageArgs {
    fn radius(&self) -> Result<f64> {
        if let Some(radius) = self.buffer {
            return Ok(radius);
        }
        let table = RadiusTable::resolve(&self.radius_preset)?;
        table.radius_for(self.zoom).with_context(|| {
            format!(
                "No buffer radius for zoom {} in preset '{}'; use --buffer",
                self.zoom, self.radius_preset
            )
        })
    }

    fn transformer(&self) -> Result<Arc<CoordinateTransformer>> {
        #[cfg(feature = "proj")]
        if self.proj {
            return Ok(Arc::new(
                CoordinateTransformer::with_proj().context("Failed to initialise PROJ")?,
            ));
        }
        Ok(Arc::new(CoordinateTransformer::new()))
    }

    fn pipeline_config(&self, url_template: &str) -> Result<PipelineConfig> {
        let config = PipelineConfig::new(self.zoom, self.radius()?, url_template)
            .with_jobs(self.jobs.unwrap_or_else(default_jobs))
            .with_max_tiles(self.max_tiles);
        Ok(config)
    }
}

/// Exécute la commande run
pub async fn cmd_run(args: RunArgs) -> Result<()> {
    let start = Instant::now();
    let common = &args.coverage;

    if !args.timeout.is_finite() || args.timeout <= 0.0 {
        anyhow::bail!("Invalid timeout: {}s", args.timeout);
    }

    let mut config = common
        .pipeline_config(&args.url_map_service)?
        .with_extension(args.tile_format.trim_start_matches('.'))
        .with_timeout(Duration::from_secs_f64(args.timeout));
    config.service_type = args.url_map_service_type.parse::<MapServiceType>()?;
    config.validate().context("Invalid configuration")?;

    let transformer = common.transformer()?;

    println!("=== Supertiles ===");
    println!("Input: {}", common.geojson_file);
    println!("Zoom: {}", config.zoom);
    println!("Buffer radius: {} m", config.buffer_radius);
    println!("Tile service: {}", config.url_template);
    println!("Tiles: {}", args.tiles_folder);
    println!("Supertiles: {}", args.st_tiles_folder);
    println!("Jobs: {}", config.jobs);
    println!("Max tiles per feature: {}", config.max_tiles);
    println!("Reprojection: {}", transformer.description());

    let features = load_features(&common.geojson_file).await?;
    if features.is_empty() {
        anyhow::bail!("No features in {}", common.geojson_file);
    }

    let tiles = Destination::parse(&args.tiles_folder)?;
    let mosaics = Destination::parse(&args.st_tiles_folder)?;

    let mut report = RunReport::new(&common.geojson_file, config.zoom, config.buffer_radius);
    let orchestrator = Orchestrator::with_http(config, transformer, tiles, mosaics)?;
    let output = orchestrator.run(features).await?;

    save_features(&common.geojson_output, &output.features).await?;
    if let Some(path) = &common.coverage_output {
        save_features(path, &coverage_features(&output.features, &output.coverages)).await?;
    }

    report.record_output(&output);
    report.set_duration(start.elapsed());
    report.finalize(output.stats.stitched);
    finish(&report, common.report.as_deref())
}

/// Exécute la commande coverage
pub async fn cmd_coverage(args: CoverageArgs) -> Result<()> {
    let start = Instant::now();

    let config = args.pipeline_config(DEFAULT_URL_TEMPLATE)?;
    config.validate().context("Invalid configuration")?;

    let features = load_features(&args.geojson_file).await?;
    if features.is_empty() {
        anyhow::bail!("No features in {}", args.geojson_file);
    }

    info!(
        features = features.len(),
        zoom = config.zoom,
        radius = config.buffer_radius,
        "Computing coverage"
    );

    let stage = CoverageStage::new(args.transformer()?, &config);
    let stage_start = Instant::now();
    let covered = tokio::task::spawn_blocking(move || stage.run(features))
        .await
        .context("Coverage task failed")??;

    let mut report = RunReport::new(&args.geojson_file, config.zoom, config.buffer_radius);
    report.record_coverage(&covered, stage_start.elapsed());

    let (features, coverages): (Vec<_>, Vec<Option<CoverageResult>>) = covered
        .into_iter()
        .map(|c| (c.feature, c.coverage.ok()))
        .unzip();

    save_features(&args.geojson_output, &features).await?;
    if let Some(path) = &args.coverage_output {
        save_features(path, &coverage_features(&features, &coverages)).await?;
    }

    report.set_duration(start.elapsed());
    report.finalize(report.features_covered);
    finish(&report, args.report.as_deref())
}

fn finish(report: &RunReport, path: Option<&std::path::Path>) -> Result<()> {
    report.display();
    if let Some(path) = path {
        report.save_to_file(path)?;
        info!(path = %path.display(), "Report saved");
    }
    if report.features_failed > 0 {
        warn!("{}", report.summary());
    } else {
        info!("{}", report.summary());
    }
    Ok(())
}
