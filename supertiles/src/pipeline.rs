//! Orchestration du traitement d'une collection de features
//!
//! Deux étapes, chacune en « scatter puis gather » :
//! 1. couverture + découpage, CPU, sur un pool rayon de `jobs` threads
//! 2. récupération des tuiles + assemblage, I/O, `jobs` features à la fois,
//!    toutes les tuiles d'une feature en parallèle
//!
//! Les résultats gardent l'ordre d'entrée. L'échec d'une feature est
//! enregistré dans son résultat (`stile = null`) sans interrompre le lot.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::clip::GeometryClipper;
use crate::coverage::{CoverageCalculator, DEFAULT_MAX_TILES};
use crate::error::{ConfigError, FeatureError, GeometryError, PipelineError, StitchError};
use crate::fetch::{FetchOutcome, ReqwestTileClient, TileClient, TileFetcher, DEFAULT_TIMEOUT};
use crate::stitch::MosaicStitcher;
use crate::storage::Destination;
use crate::tile::TILE_SIZE;
use crate::transform::CoordinateTransformer;
use crate::types::{CoverageResult, Feature};

/// Zooms acceptés par le pipeline
pub const MIN_ZOOM: u8 = 1;
pub const MAX_ZOOM: u8 = 21;

/// Gabarit d'URL par défaut (OpenStreetMap)
pub const DEFAULT_URL_TEMPLATE: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";

/// Nombre de workers par défaut : parallélisme matériel disponible
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Protocole du service de tuiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapServiceType {
    /// Adressage XYZ simple (`{z}/{x}/{y}`)
    #[default]
    Tms,
}

impl FromStr for MapServiceType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tms" | "xyz" => Ok(Self::Tms),
            _ => Err(ConfigError::ServiceType(s.to_string())),
        }
    }
}

/// Paramètres d'un lot
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub zoom: u8,
    /// Rayon du buffer carré en mètres
    pub buffer_radius: f64,
    pub url_template: String,
    pub service_type: MapServiceType,
    /// Extension des fichiers de tuiles (`png`, `jpg`, ...)
    pub tile_extension: String,
    /// Délai maximal d'une requête de tuile
    pub timeout: Duration,
    /// Taille des deux pools de workers
    pub jobs: usize,
    /// Nombre maximal de tuiles par feature
    pub max_tiles: usize,
}

impl PipelineConfig {
    pub fn new(zoom: u8, buffer_radius: f64, url_template: impl Into<String>) -> Self {
        Self {
            zoom,
            buffer_radius,
            url_template: url_template.into(),
            service_type: MapServiceType::Tms,
            tile_extension: "png".to_string(),
            timeout: DEFAULT_TIMEOUT,
            jobs: default_jobs(),
            max_tiles: DEFAULT_MAX_TILES,
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tiles(mut self, max_tiles: usize) -> Self {
        self.max_tiles = max_tiles;
        self
    }

    /// Limite de pixels d'une mosaïque, tuiles jusqu'à 512 px acceptées
    pub fn max_pixels(&self) -> u64 {
        let side = u64::from(2 * TILE_SIZE);
        (self.max_tiles as u64).saturating_mul(side * side)
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.tile_extension = extension.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_ZOOM..=MAX_ZOOM).contains(&self.zoom) {
            return Err(ConfigError::Zoom {
                zoom: self.zoom,
                min: MIN_ZOOM,
                max: MAX_ZOOM,
            });
        }
        if !self.buffer_radius.is_finite() || self.buffer_radius <= 0.0 {
            return Err(ConfigError::Radius(self.buffer_radius));
        }
        if !["{x}", "{y}", "{z}"]
            .iter()
            .all(|p| self.url_template.contains(p))
        {
            return Err(ConfigError::UrlTemplate(self.url_template.clone()));
        }
        if self.jobs == 0 {
            return Err(ConfigError::Jobs);
        }
        if self.max_tiles == 0 {
            return Err(ConfigError::MaxTiles);
        }
        Ok(())
    }
}

/// Feature après l'étape de couverture
#[derive(Debug)]
pub struct CoveredFeature {
    pub feature: Feature,
    pub coverage: Result<CoverageResult, GeometryError>,
}

/// Issue du traitement complet d'une feature
#[derive(Debug)]
pub enum FeatureOutcome {
    Stitched { mosaic: String },
    Failed(FeatureError),
}

impl FeatureOutcome {
    pub fn is_stitched(&self) -> bool {
        matches!(self, Self::Stitched { .. })
    }
}

/// Compteurs d'un lot
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub features: usize,
    pub covered: usize,
    pub stitched: usize,
    pub failed: usize,
    pub tiles_requested: usize,
    pub tiles_cached: usize,
    pub tiles_downloaded: usize,
    pub tiles_missing: usize,
    pub coverage_duration: Duration,
    pub fetch_duration: Duration,
}

/// Résultat d'un lot, aligné sur l'ordre d'entrée
#[derive(Debug)]
pub struct PipelineOutput {
    pub features: Vec<Feature>,
    pub coverages: Vec<Option<CoverageResult>>,
    pub outcomes: Vec<FeatureOutcome>,
    pub stats: PipelineStats,
}

/// Étape 1 : couverture et découpage, sans réseau
#[derive(Clone)]
pub struct CoverageStage {
    calculator: CoverageCalculator,
    clipper: GeometryClipper,
    zoom: u8,
    radius: f64,
    jobs: usize,
}

impl CoverageStage {
    pub fn new(transformer: Arc<CoordinateTransformer>, config: &PipelineConfig) -> Self {
        Self {
            calculator: CoverageCalculator::new(transformer).with_max_tiles(config.max_tiles),
            clipper: GeometryClipper::new(),
            zoom: config.zoom,
            radius: config.buffer_radius,
            jobs: config.jobs.max(1),
        }
    }

    /// Traite toutes les features sur un pool de `jobs` threads
    pub fn run(&self, features: Vec<Feature>) -> Result<Vec<CoveredFeature>, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;

        Ok(pool.install(|| {
            features
                .into_par_iter()
                .enumerate()
                .map(|(idx, feature)| self.cover(idx, feature))
                .collect()
        }))
    }

    fn cover(&self, idx: usize, mut feature: Feature) -> CoveredFeature {
        let coverage = isolate_panic(|| self.cover_in_place(&mut feature));

        match &coverage {
            Ok(coverage) => debug!(
                feature = idx,
                tiles = coverage.tiles.len(),
                has_clip = feature.has_clip(),
                "Coverage computed"
            ),
            Err(e) => warn!(feature = idx, error = %e, "Coverage failed"),
        }

        CoveredFeature { feature, coverage }
    }

    fn cover_in_place(&self, feature: &mut Feature) -> Result<CoverageResult, GeometryError> {
        let geometry = feature.geometry.as_ref().ok_or(GeometryError::Missing)?;
        let coverage = self.calculator.compute(geometry, self.zoom, self.radius)?;

        feature.apply_coverage(&coverage);
        self.clipper.clip_in_place(feature, coverage.bbox);
        Ok(coverage)
    }
}

/// Exécute `f` en convertissant une panique en échec de la seule feature
fn isolate_panic<F>(f: F) -> Result<CoverageResult, GeometryError>
where
    F: FnOnce() -> Result<CoverageResult, GeometryError>,
{
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(GeometryError::Panicked(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[derive(Default)]
struct FetchCounters {
    requested: AtomicUsize,
    cached: AtomicUsize,
    downloaded: AtomicUsize,
    missing: AtomicUsize,
}

impl FetchCounters {
    fn record(&self, outcomes: &[FetchOutcome]) {
        self.requested.fetch_add(outcomes.len(), Ordering::Relaxed);
        for outcome in outcomes {
            let counter = match outcome {
                FetchOutcome::Fetched { cached: true, .. } => &self.cached,
                FetchOutcome::Fetched { cached: false, .. } => &self.downloaded,
                FetchOutcome::Missing { .. } => &self.missing,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Pilote couverture → découpage → récupération → assemblage sur un lot
pub struct Orchestrator<C> {
    config: PipelineConfig,
    coverage: CoverageStage,
    fetcher: TileFetcher<C>,
    stitcher: MosaicStitcher,
}

impl Orchestrator<ReqwestTileClient> {
    /// Orchestrateur avec le client HTTP réel
    pub fn with_http(
        config: PipelineConfig,
        transformer: Arc<CoordinateTransformer>,
        tiles: Destination,
        mosaics: Destination,
    ) -> Result<Self, PipelineError> {
        let client = ReqwestTileClient::new(config.timeout)?;
        Self::new(config, transformer, client, tiles, mosaics)
    }
}

impl<C: TileClient> Orchestrator<C> {
    pub fn new(
        config: PipelineConfig,
        transformer: Arc<CoordinateTransformer>,
        client: C,
        tiles: Destination,
        mosaics: Destination,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        Ok(Self {
            coverage: CoverageStage::new(transformer, &config),
            fetcher: TileFetcher::new(
                client,
                tiles.clone(),
                config.url_template.clone(),
                config.tile_extension.clone(),
            ),
            stitcher: MosaicStitcher::new(tiles, mosaics).with_max_pixels(config.max_pixels()),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Traite tout le lot
    ///
    /// Seules les erreurs globales (destinations inutilisables, pool de
    /// threads) sont renvoyées en `Err` ; les échecs par feature sont dans
    /// [`PipelineOutput::outcomes`].
    pub async fn run(&self, features: Vec<Feature>) -> Result<PipelineOutput, PipelineError> {
        let mut stats = PipelineStats {
            features: features.len(),
            ..Default::default()
        };

        self.fetcher.destination().ensure_ready().await?;
        self.stitcher.mosaics().ensure_ready().await?;

        // Étape 1
        let start = Instant::now();
        let stage = self.coverage.clone();
        let covered = tokio::task::spawn_blocking(move || stage.run(features))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))??;
        stats.coverage_duration = start.elapsed();
        stats.covered = covered.iter().filter(|c| c.coverage.is_ok()).count();

        info!(
            features = stats.features,
            covered = stats.covered,
            duration_ms = stats.coverage_duration.as_millis() as u64,
            "Coverage stage done"
        );

        // Étape 2
        let start = Instant::now();
        let counters = FetchCounters::default();
        let results: Vec<(Feature, Option<CoverageResult>, FeatureOutcome)> =
            stream::iter(covered.into_iter().enumerate())
                .map(|(idx, covered)| self.process(idx, covered, &counters))
                .buffered(self.config.jobs)
                .collect()
                .await;
        stats.fetch_duration = start.elapsed();

        stats.tiles_requested = counters.requested.load(Ordering::Relaxed);
        stats.tiles_cached = counters.cached.load(Ordering::Relaxed);
        stats.tiles_downloaded = counters.downloaded.load(Ordering::Relaxed);
        stats.tiles_missing = counters.missing.load(Ordering::Relaxed);

        let mut output = PipelineOutput {
            features: Vec::with_capacity(results.len()),
            coverages: Vec::with_capacity(results.len()),
            outcomes: Vec::with_capacity(results.len()),
            stats,
        };
        for (feature, coverage, outcome) in results {
            if outcome.is_stitched() {
                output.stats.stitched += 1;
            } else {
                output.stats.failed += 1;
            }
            output.features.push(feature);
            output.coverages.push(coverage);
            output.outcomes.push(outcome);
        }

        info!(
            stitched = output.stats.stitched,
            failed = output.stats.failed,
            tiles_downloaded = output.stats.tiles_downloaded,
            tiles_cached = output.stats.tiles_cached,
            tiles_missing = output.stats.tiles_missing,
            duration_ms = output.stats.fetch_duration.as_millis() as u64,
            "Fetch and stitch stage done"
        );

        Ok(output)
    }

    /// Récupération et assemblage d'une feature ; ne renvoie jamais d'erreur
    async fn process(
        &self,
        idx: usize,
        covered: CoveredFeature,
        counters: &FetchCounters,
    ) -> (Feature, Option<CoverageResult>, FeatureOutcome) {
        let CoveredFeature {
            mut feature,
            coverage,
        } = covered;

        let coverage = match coverage {
            Ok(coverage) => coverage,
            Err(e) => {
                feature.set_stile(None);
                return (feature, None, FeatureOutcome::Failed(e.into()));
            }
        };

        let result = AssertUnwindSafe(self.fetch_and_stitch(&coverage, counters))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(FeatureError::Worker(panic_message(&*payload))));

        let outcome = match result {
            Ok(mosaic) => {
                feature.set_stile(Some(&mosaic));
                FeatureOutcome::Stitched { mosaic }
            }
            Err(e) => {
                warn!(feature = idx, kind = e.kind(), error = %e, "Feature failed");
                feature.set_stile(None);
                FeatureOutcome::Failed(e)
            }
        };

        (feature, Some(coverage), outcome)
    }

    async fn fetch_and_stitch(
        &self,
        coverage: &CoverageResult,
        counters: &FetchCounters,
    ) -> Result<String, FeatureError> {
        let outcomes = self.fetcher.fetch_all(&coverage.tiles).await;
        counters.record(&outcomes);

        let name = coverage
            .mosaic_name()
            .ok_or(StitchError::NoTiles)?;
        Ok(self.stitcher.stitch(&outcomes, &name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TileFetchFailure;
    use crate::types::ATTR_STILE;
    use bytes::Bytes;
    use geo::{Geometry, Point};
    use image::{ImageFormat, Rgba, RgbaImage};
    use serde_json::Value;
    use std::io::Cursor;

    /// Sert un PNG uni, ou 404 si `fail` ; compte les requêtes
    #[derive(Default)]
    struct MockClient {
        calls: AtomicUsize,
        fail: bool,
    }

    impl TileClient for MockClient {
        async fn get(&self, url: &str) -> Result<Bytes, TileFetchFailure> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(TileFetchFailure::Status {
                    status: 404,
                    url: url.to_string(),
                });
            }
            let img = RgbaImage::from_pixel(256, 256, Rgba([0, 128, 0, 255]));
            let mut buf = Vec::new();
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
                .unwrap();
            Ok(Bytes::from(buf))
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::new(18, 100.0, "https://tiles.test/{z}/{x}/{y}.png").with_jobs(2)
    }

    fn orchestrator(client: MockClient) -> Orchestrator<MockClient> {
        Orchestrator::new(
            config(),
            Arc::new(CoordinateTransformer::new()),
            client,
            Destination::in_memory("tiles"),
            Destination::in_memory("supertiles"),
        )
        .unwrap()
    }

    fn point(lon: f64, lat: f64) -> Feature {
        Feature::new(Geometry::Point(Point::new(lon, lat)))
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate().is_ok());

        let mut c = config();
        c.zoom = 0;
        assert!(matches!(c.validate(), Err(ConfigError::Zoom { .. })));

        let mut c = config();
        c.zoom = 22;
        assert!(matches!(c.validate(), Err(ConfigError::Zoom { .. })));

        let c = PipelineConfig::new(18, 100.0, "https://tiles.test/{z}/{x}.png");
        assert!(matches!(c.validate(), Err(ConfigError::UrlTemplate(_))));

        assert!(matches!(
            config().with_jobs(0).validate(),
            Err(ConfigError::Jobs)
        ));

        let mut c = config();
        c.buffer_radius = -1.0;
        assert!(matches!(c.validate(), Err(ConfigError::Radius(_))));

        assert!(matches!(
            config().with_max_tiles(0).validate(),
            Err(ConfigError::MaxTiles)
        ));
        assert_eq!(config().with_max_tiles(4).max_pixels(), 4 * 512 * 512);
    }

    #[test]
    fn test_panic_in_coverage_stays_with_feature() {
        let result = isolate_panic(|| panic!("boolean ops failed"));
        assert!(matches!(
            result,
            Err(GeometryError::Panicked(ref msg)) if msg == "boolean ops failed"
        ));

        let result = isolate_panic(|| panic!("ring {} not closed", 3));
        assert!(matches!(
            result,
            Err(GeometryError::Panicked(ref msg)) if msg == "ring 3 not closed"
        ));
    }

    #[tokio::test]
    async fn test_oversized_coverage_fails_per_feature() {
        let mut config = config();
        config.buffer_radius = 50_000.0;
        let orchestrator = Orchestrator::new(
            config,
            Arc::new(CoordinateTransformer::new()),
            MockClient::default(),
            Destination::in_memory("tiles"),
            Destination::in_memory("supertiles"),
        )
        .unwrap();

        let output = orchestrator
            .run(vec![point(2.35, 48.85), point(-77.03, 38.89)])
            .await
            .unwrap();

        assert_eq!(output.stats.failed, 2);
        assert_eq!(output.stats.tiles_requested, 0);
        for (feature, outcome) in output.features.iter().zip(&output.outcomes) {
            assert_eq!(feature.properties[ATTR_STILE], Value::Null);
            assert!(matches!(
                outcome,
                FeatureOutcome::Failed(FeatureError::Geometry(GeometryError::TooManyTiles {
                    max: DEFAULT_MAX_TILES,
                    ..
                }))
            ));
        }
        assert_eq!(orchestrator.fetcher.client().calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_service_type() {
        assert_eq!("tms".parse::<MapServiceType>().unwrap(), MapServiceType::Tms);
        assert_eq!("TMS".parse::<MapServiceType>().unwrap(), MapServiceType::Tms);
        assert!(matches!(
            "wmts".parse::<MapServiceType>(),
            Err(ConfigError::ServiceType(_))
        ));
    }

    #[test]
    fn test_coverage_stage_preserves_order() {
        let stage = CoverageStage::new(Arc::new(CoordinateTransformer::new()), &config());
        let features = vec![point(2.35, 48.85), Feature::default(), point(-77.03, 38.89)];

        let covered = stage.run(features).unwrap();
        assert_eq!(covered.len(), 3);
        assert!(covered[0].coverage.is_ok());
        assert!(matches!(covered[1].coverage, Err(GeometryError::Missing)));
        assert!(covered[2].coverage.is_ok());

        let first = covered[0].coverage.as_ref().unwrap();
        assert_eq!(first.tiles[0].to_string(), "132782-90191-18");
        assert_eq!(covered[0].feature.tiles_list(), first.tiles);
    }

    #[tokio::test]
    async fn test_run_isolates_invalid_feature() {
        let orchestrator = orchestrator(MockClient::default());
        let features = vec![point(2.35, 48.85), Feature::default(), point(-77.03, 38.89)];

        let output = orchestrator.run(features).await.unwrap();

        assert_eq!(output.features.len(), 3);
        assert_eq!(
            output.features[0].stile(),
            Some("memory://supertiles/132782-90191-18-st.png")
        );
        assert_eq!(output.features[1].properties[ATTR_STILE], Value::Null);
        assert!(output.features[2].stile().is_some());

        assert!(matches!(
            output.outcomes[1],
            FeatureOutcome::Failed(FeatureError::Geometry(GeometryError::Missing))
        ));
        assert!(output.coverages[1].is_none());

        assert_eq!(output.stats.features, 3);
        assert_eq!(output.stats.covered, 2);
        assert_eq!(output.stats.stitched, 2);
        assert_eq!(output.stats.failed, 1);
        assert_eq!(output.stats.tiles_requested, 8);
        assert_eq!(output.stats.tiles_downloaded, 8);
    }

    #[tokio::test]
    async fn test_second_run_hits_cache() {
        let orchestrator = orchestrator(MockClient::default());

        orchestrator.run(vec![point(2.35, 48.85)]).await.unwrap();
        let output = orchestrator.run(vec![point(2.35, 48.85)]).await.unwrap();

        assert_eq!(output.stats.tiles_cached, 4);
        assert_eq!(output.stats.tiles_downloaded, 0);
        assert_eq!(
            orchestrator.fetcher.client().calls.load(Ordering::Relaxed),
            4
        );
    }

    #[tokio::test]
    async fn test_all_tiles_missing() {
        let orchestrator = orchestrator(MockClient {
            fail: true,
            ..Default::default()
        });

        let output = orchestrator.run(vec![point(2.35, 48.85)]).await.unwrap();

        assert_eq!(output.features[0].stile(), None);
        assert!(matches!(
            output.outcomes[0],
            FeatureOutcome::Failed(FeatureError::Stitch(StitchError::NoTiles))
        ));
        assert_eq!(output.stats.tiles_missing, 4);
        // La couverture reste publiée
        assert_eq!(output.features[0].tiles_list().len(), 4);
    }
}
