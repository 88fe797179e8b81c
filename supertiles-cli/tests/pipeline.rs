//! Tests de bout en bout : GeoJSON → pipeline → GeoJSON, sans réseau

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::Value;

use supertiles::{
    CoordinateTransformer, Destination, FeatureOutcome, Orchestrator, PipelineConfig,
    TileClient, TileFetchFailure,
};
use supertiles_cli::config::RadiusTable;
use supertiles_cli::export::{coverage_features, export_to_geojson};
use supertiles_cli::input::parse_features;

const INPUT: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {"type": "Feature", "id": 1,
         "geometry": {"type": "Point", "coordinates": [2.35, 48.85]},
         "properties": {"name": "paris"}},
        {"type": "Feature", "id": 2, "geometry": null,
         "properties": {"name": "broken"}},
        {"type": "Feature", "id": 3,
         "geometry": {"type": "Polygon", "coordinates": [[
            [-77.0400, 38.8890], [-77.0200, 38.8890],
            [-77.0200, 38.8910], [-77.0400, 38.8910], [-77.0400, 38.8890]
         ]]},
         "properties": {"name": "washington"}}
    ]
}"#;

/// Service de tuiles factice : PNG 256×256, 404 sur les lignes impaires si demandé
#[derive(Default)]
struct FakeTileService {
    requests: AtomicUsize,
    odd_rows_missing: bool,
}

impl TileClient for FakeTileService {
    async fn get(&self, url: &str) -> Result<Bytes, TileFetchFailure> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let y: u32 = url
            .trim_end_matches(".png")
            .rsplit('/')
            .next()
            .and_then(|y| y.parse().ok())
            .unwrap();
        if self.odd_rows_missing && y % 2 == 1 {
            return Err(TileFetchFailure::Status {
                status: 404,
                url: url.to_string(),
            });
        }

        let img = RgbaImage::from_pixel(256, 256, Rgba([200, 100, 50, 255]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        Ok(Bytes::from(buf))
    }
}

fn orchestrator(
    dir: &std::path::Path,
    service: FakeTileService,
) -> Orchestrator<FakeTileService> {
    let radius = RadiusTable::from_preset("default")
        .unwrap()
        .radius_for(18)
        .unwrap();
    let config = PipelineConfig::new(18, radius, "https://tiles.test/{z}/{x}/{y}.png").with_jobs(2);

    Orchestrator::new(
        config,
        Arc::new(CoordinateTransformer::new()),
        service,
        Destination::Local(dir.join("tiles")),
        Destination::Local(dir.join("supertiles")),
    )
    .unwrap()
}

#[tokio::test]
async fn test_end_to_end_local() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), FakeTileService::default());

    let features = parse_features(INPUT).unwrap();
    let output = orchestrator.run(features).await.unwrap();

    // Même longueur, même ordre
    let names: Vec<_> = output
        .features
        .iter()
        .map(|f| f.properties["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["paris", "broken", "washington"]);

    // Feature invalide isolée
    assert!(matches!(output.outcomes[1], FeatureOutcome::Failed(_)));
    assert!(output.outcomes[0].is_stitched());
    assert!(output.outcomes[2].is_stitched());

    // Mosaïque 2×2 tuiles
    let mosaic = dir.path().join("supertiles/132782-90191-18-st.png");
    let img = image::open(&mosaic).unwrap();
    assert_eq!((img.width(), img.height()), (512, 512));

    // Tuiles nommées x-y-z.png
    assert!(dir.path().join("tiles/132782-90191-18.png").exists());

    let out_path = dir.path().join("supertiles.geojson");
    export_to_geojson(&output.features, &out_path).unwrap();
    let json: Value = serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();

    let paris = &json["features"][0];
    assert_eq!(paris["id"], 1);
    assert_eq!(
        paris["properties"]["tiles_list"],
        serde_json::json!([
            "132782-90191-18",
            "132782-90192-18",
            "132783-90191-18",
            "132783-90192-18"
        ])
    );
    assert_eq!(paris["properties"]["has_clip"], false);
    assert_eq!(paris["properties"]["tiles_width"], 512);
    assert!(paris["properties"]["stile"]
        .as_str()
        .unwrap()
        .ends_with("132782-90191-18-st.png"));

    let broken = &json["features"][1];
    assert_eq!(broken["properties"]["stile"], Value::Null);
    assert_eq!(broken["geometry"], Value::Null);

    // Le polygone dépasse l'emprise des tuiles : il est tronqué
    let washington = &json["features"][2];
    assert_eq!(washington["properties"]["has_clip"], true);
    assert_eq!(washington["geometry"]["type"], "MultiPolygon");
}

#[tokio::test]
async fn test_rerun_uses_cached_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), FakeTileService::default());

    let first = orchestrator.run(parse_features(INPUT).unwrap()).await.unwrap();
    let second = orchestrator.run(parse_features(INPUT).unwrap()).await.unwrap();

    assert_eq!(first.stats.tiles_downloaded, 8);
    assert_eq!(second.stats.tiles_downloaded, 0);
    assert_eq!(second.stats.tiles_cached, 8);
}

#[tokio::test]
async fn test_missing_tiles_leave_holes() {
    let dir = tempfile::tempdir().unwrap();
    let service = FakeTileService {
        odd_rows_missing: true,
        ..Default::default()
    };
    let orchestrator = orchestrator(dir.path(), service);

    let output = orchestrator.run(parse_features(INPUT).unwrap()).await.unwrap();
    assert!(output.stats.tiles_missing > 0);

    // Paris : lignes 90191 (impaire, absente) et 90192 (présente)
    let img = image::open(dir.path().join("supertiles/132782-90191-18-st.png"))
        .unwrap()
        .to_rgba8();
    assert_eq!(img.dimensions(), (512, 256));
    assert_eq!(img.get_pixel(10, 10)[3], 255);
}

#[tokio::test]
async fn test_coverage_collection() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), FakeTileService::default());
    let output = orchestrator.run(parse_features(INPUT).unwrap()).await.unwrap();

    let coverage = coverage_features(&output.features, &output.coverages);
    let path = dir.path().join("coverage.geojson");
    export_to_geojson(&coverage, &path).unwrap();

    let json: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["features"][0]["geometry"]["type"], "Polygon");
    assert_eq!(json["features"][1]["geometry"], Value::Null);
    assert_eq!(json["features"][2]["geometry"]["type"], "Polygon");
}
