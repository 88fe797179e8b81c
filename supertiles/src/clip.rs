//! Découpage d'une géométrie à l'emprise de sa couverture
//!
//! Une feature dont la géométrie dépasse l'imagerie générée est tronquée à
//! l'emprise des tuiles, et marquée `has_clip = true`.

use geo::{
    BooleanOps, BoundingRect, Coord, Geometry, GeometryCollection, LineString, MultiLineString,
    MultiPoint, MultiPolygon, Point, Polygon, Rect,
};
use tracing::debug;

use crate::types::Feature;

/// Tronque les features à l'emprise de leur couverture
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryClipper;

impl GeometryClipper {
    pub fn new() -> Self {
        Self
    }

    /// Renvoie la feature avec sa géométrie tronquée à `bbox` si nécessaire
    ///
    /// Géométrie contenue (bords inclus) : inchangée, `has_clip = false`.
    /// Sinon la géométrie devient son intersection avec `bbox` et
    /// `has_clip = true`.
    pub fn clip(&self, mut feature: Feature, bbox: Rect<f64>) -> Feature {
        self.clip_in_place(&mut feature, bbox);
        feature
    }

    /// Variante de [`GeometryClipper::clip`] qui modifie la feature en place
    pub fn clip_in_place(&self, feature: &mut Feature, bbox: Rect<f64>) {
        let clipped = feature
            .geometry
            .as_ref()
            .and_then(|geometry| clip_to_bbox(geometry, bbox));

        match clipped {
            Some(geometry) => {
                debug!(?feature.id, "Geometry clipped to coverage bbox");
                feature.geometry = Some(geometry);
                feature.set_has_clip(true);
            }
            None => feature.set_has_clip(false),
        }
    }
}

/// Intersection de `geometry` avec `bbox`, ou `None` si `bbox` la contient déjà
pub fn clip_to_bbox(geometry: &Geometry, bbox: Rect<f64>) -> Option<Geometry> {
    if is_within(geometry, bbox) {
        return None;
    }
    Some(intersection(geometry, bbox))
}

fn is_within(geometry: &Geometry, bbox: Rect<f64>) -> bool {
    match geometry.bounding_rect() {
        Some(extent) => covers(bbox, extent.min()) && covers(bbox, extent.max()),
        // Rien à découper
        None => true,
    }
}

fn covers(bbox: Rect<f64>, c: Coord<f64>) -> bool {
    bbox.min().x <= c.x && c.x <= bbox.max().x && bbox.min().y <= c.y && c.y <= bbox.max().y
}

fn intersection(geometry: &Geometry, bbox: Rect<f64>) -> Geometry {
    let window = bbox.to_polygon();

    match geometry {
        Geometry::Point(p) => Geometry::MultiPoint(keep_points(std::slice::from_ref(p), bbox)),
        Geometry::MultiPoint(mp) => Geometry::MultiPoint(keep_points(&mp.0, bbox)),
        Geometry::Line(line) => clip_lines(&window, vec![LineString::from(*line)]),
        Geometry::LineString(ls) => clip_lines(&window, vec![ls.clone()]),
        Geometry::MultiLineString(mls) => clip_lines(&window, mls.0.clone()),
        Geometry::Polygon(poly) => Geometry::MultiPolygon(poly.intersection(&window)),
        Geometry::MultiPolygon(mp) => {
            Geometry::MultiPolygon(mp.intersection(&MultiPolygon::new(vec![window])))
        }
        Geometry::Rect(rect) => Geometry::MultiPolygon(rect.to_polygon().intersection(&window)),
        Geometry::Triangle(tri) => Geometry::MultiPolygon(tri.to_polygon().intersection(&window)),
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(GeometryCollection::new_from(
            gc.iter().map(|g| intersection(g, bbox)).collect(),
        )),
    }
}

fn keep_points(points: &[Point<f64>], bbox: Rect<f64>) -> MultiPoint<f64> {
    points
        .iter()
        .filter(|p| covers(bbox, p.0))
        .copied()
        .collect::<Vec<_>>()
        .into()
}

fn clip_lines(window: &Polygon<f64>, lines: Vec<LineString<f64>>) -> Geometry {
    Geometry::MultiLineString(window.clip(&MultiLineString::new(lines), false))
}
