//! Calcul de la couverture en tuiles d'une feature
//!
//! Étapes :
//! 1. centroïde de la géométrie
//! 2. recalage sur le centre de la tuile enfant (`zoom + 1`) qui le contient
//! 3. buffer carré de `radius` mètres autour de ce point, en Web Mercator
//! 4. retour en degrés sommet par sommet, puis énumération des tuiles
//!    du zoom demandé qui intersectent l'emprise du buffer
//! 5. déduplication en conservant l'ordre de première énumération
//!
//! Le nombre de tuiles est borné par `max_tiles`, vérifié avant l'énumération.

use std::collections::HashSet;
use std::sync::Arc;

use geo::{coord, Centroid, CoordsIter, Geometry, Rect};
use tracing::trace;

use crate::error::GeometryError;
use crate::tile::{count_tiles_in_bbox, tiles_in_bbox, TileId, MAX_ZOOM, TILE_SIZE};
use crate::transform::CoordinateTransformer;
use crate::types::CoverageResult;

/// Calcule la couverture en tuiles d'une géométrie
///
/// Sans état hormis le transformer partagé : peut être cloné et utilisé
/// depuis plusieurs threads.
#[derive(Clone)]
pub struct CoverageCalculator {
    transformer: Arc<CoordinateTransformer>,
    max_tiles: usize,
}

/// Nombre maximal de tuiles par feature (grille 32×32, canevas 8192×8192 px)
pub const DEFAULT_MAX_TILES: usize = 1024;

impl CoverageCalculator {
    pub fn new(transformer: Arc<CoordinateTransformer>) -> Self {
        Self {
            transformer,
            max_tiles: DEFAULT_MAX_TILES,
        }
    }

    pub fn with_max_tiles(mut self, max_tiles: usize) -> Self {
        self.max_tiles = max_tiles;
        self
    }

    pub fn max_tiles(&self) -> usize {
        self.max_tiles
    }

    pub fn transformer(&self) -> &CoordinateTransformer {
        &self.transformer
    }

    /// Couverture d'une géométrie au zoom donné avec un buffer de `radius` mètres
    ///
    /// # Errors
    ///
    /// `GeometryError` si la géométrie est vide, contient des coordonnées
    /// non finies, si le zoom ou le rayon sont invalides, ou si l'emprise
    /// demande plus de `max_tiles` tuiles.
    pub fn compute(
        &self,
        geometry: &Geometry,
        zoom: u8,
        radius: f64,
    ) -> Result<CoverageResult, GeometryError> {
        if zoom >= MAX_ZOOM {
            return Err(GeometryError::ZoomOutOfRange {
                zoom,
                max: MAX_ZOOM - 1,
            });
        }
        if !radius.is_finite() || radius <= 0.0 {
            return Err(GeometryError::InvalidRadius(radius));
        }
        if geometry
            .coords_iter()
            .any(|c| !c.x.is_finite() || !c.y.is_finite())
        {
            return Err(GeometryError::NonFinite);
        }

        let centroid = geometry
            .centroid()
            .ok_or_else(|| GeometryError::empty(geometry_kind(geometry)))?;

        // Recalage sur la tuile enfant
        let child = TileId::containing(centroid.x(), centroid.y(), zoom + 1);
        let child_bounds = child.bounds();
        let center = child_bounds.center();

        let footprint = self.square_buffer(center.x, center.y, radius)?;
        trace!(
            %child,
            west = footprint.min().x,
            south = footprint.min().y,
            east = footprint.max().x,
            north = footprint.max().y,
            "Coverage footprint"
        );

        let count = count_tiles_in_bbox(footprint, zoom);
        if count > self.max_tiles as u64 {
            return Err(GeometryError::TooManyTiles {
                count,
                max: self.max_tiles,
            });
        }

        let tiles = dedup_preserving_order(tiles_in_bbox(footprint, zoom));
        Ok(summarize(tiles))
    }

    /// Buffer carré (coins à angle droit) autour d'un point, renvoyé en degrés
    fn square_buffer(&self, lon: f64, lat: f64, radius: f64) -> Result<Rect<f64>, GeometryError> {
        let (cx, cy) = self.transformer.to_metric(lon, lat)?;

        let corners = [
            (cx - radius, cy - radius),
            (cx + radius, cy - radius),
            (cx + radius, cy + radius),
            (cx - radius, cy + radius),
        ];

        let mut min = coord! { x: f64::INFINITY, y: f64::INFINITY };
        let mut max = coord! { x: f64::NEG_INFINITY, y: f64::NEG_INFINITY };
        for (x, y) in corners {
            let (lon, lat) = self.transformer.to_geographic(x, y)?;
            min.x = min.x.min(lon);
            min.y = min.y.min(lat);
            max.x = max.x.max(lon);
            max.y = max.y.max(lat);
        }

        Ok(Rect::new(min, max))
    }
}

fn dedup_preserving_order(tiles: Vec<TileId>) -> Vec<TileId> {
    let mut seen = HashSet::with_capacity(tiles.len());
    tiles.into_iter().filter(|t| seen.insert(*t)).collect()
}

/// Emprise union et dimensions en pixels d'une liste de tuiles non vide
fn summarize(tiles: Vec<TileId>) -> CoverageResult {
    let mut columns = HashSet::new();
    let mut rows = HashSet::new();
    let mut min = coord! { x: f64::INFINITY, y: f64::INFINITY };
    let mut max = coord! { x: f64::NEG_INFINITY, y: f64::NEG_INFINITY };

    for tile in &tiles {
        columns.insert(tile.x);
        rows.insert(tile.y);

        let b = tile.bounds();
        min.x = min.x.min(b.min().x);
        min.y = min.y.min(b.min().y);
        max.x = max.x.max(b.max().x);
        max.y = max.y.max(b.max().y);
    }

    CoverageResult {
        width: columns.len() as u32 * TILE_SIZE,
        height: rows.len() as u32 * TILE_SIZE,
        bbox: Rect::new(min, max),
        tiles,
    }
}

fn geometry_kind(geometry: &Geometry) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
