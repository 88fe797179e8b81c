//! Tuiles XYZ (slippy map) : identifiants, emprises et énumération
//!
//! Convention Web Mercator standard : colonne `x` d'ouest en est, ligne `y`
//! du nord au sud, `2^z` tuiles par axe.

use std::f64::consts::PI;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::OnceLock;

use geo::{coord, Rect};
use regex::Regex;

use crate::error::ParseTileIdError;

/// Taille d'une tuile en pixels
pub const TILE_SIZE: u32 = 256;

/// Zoom maximal supporté (le zoom enfant `z + 1` doit tenir sur `u32`)
pub const MAX_ZOOM: u8 = 28;

/// Latitude limite de la projection Web Mercator
pub const MAX_LATITUDE: f64 = 85.051129;

const EPSILON: f64 = 1e-14;
const LL_EPSILON: f64 = 1e-11;

/// Identifiant immuable d'une tuile (colonne, ligne, zoom)
///
/// Forme canonique : `"x-y-z"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileId {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Tuile contenant le point (lon, lat) en degrés au zoom donné
    ///
    /// Les points hors du monde Web Mercator sont ramenés sur la tuile de bord.
    pub fn containing(lon: f64, lat: f64, zoom: u8) -> Self {
        let x = lon / 360.0 + 0.5;
        let sin_lat = lat.to_radians().sin();
        let y = 0.5 - 0.25 * ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / PI;

        let n = 2f64.powi(i32::from(zoom));
        Self {
            x: axis_index(x, n),
            y: axis_index(y, n),
            z: zoom,
        }
    }

    /// Emprise géographique de la tuile (ouest, sud) → (est, nord) en degrés
    pub fn bounds(&self) -> Rect<f64> {
        let n = 2f64.powi(i32::from(self.z));
        let x = f64::from(self.x);
        let y = f64::from(self.y);

        let west = x / n * 360.0 - 180.0;
        let east = (x + 1.0) / n * 360.0 - 180.0;
        let north = (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();
        let south = (PI * (1.0 - 2.0 * (y + 1.0) / n)).sinh().atan().to_degrees();

        Rect::new(coord! { x: west, y: south }, coord! { x: east, y: north })
    }

    /// Nom de fichier de la tuile : `"x-y-z.ext"`
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self, extension)
    }

    /// Substitue `{x}`, `{y}` et `{z}` dans un gabarit d'URL
    pub fn url(&self, template: &str) -> String {
        template
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
            .replace("{z}", &self.z.to_string())
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.x, self.y, self.z)
    }
}

impl FromStr for TileId {
    type Err = ParseTileIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseTileIdError(s.to_string());

        let mut parts = s.split('-');
        let (Some(x), Some(y), Some(z), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        Ok(Self {
            x: x.parse().map_err(|_| invalid())?,
            y: y.parse().map_err(|_| invalid())?,
            z: z.parse().map_err(|_| invalid())?,
        })
    }
}

/// Position (x, y) dans la grille depuis un chemin ou nom de fichier de tuile
///
/// Accepte `x-y-z.ext` et `x-y.ext`, précédés ou non d'un répertoire
/// (`/`, `\`) ou d'un préfixe d'URI.
pub fn grid_position(path: &str) -> Option<(u32, u32)> {
    static TILE_NAME: OnceLock<Regex> = OnceLock::new();
    let re = TILE_NAME.get_or_init(|| {
        Regex::new(r"^(\d+)-(\d+)(?:-\d+)?(?:\.[A-Za-z0-9]+)?$").expect("valid tile name regex")
    });

    let base = path.rsplit(['/', '\\']).next()?;
    let caps = re.captures(base)?;
    let x = caps.get(1)?.as_str().parse().ok()?;
    let y = caps.get(2)?.as_str().parse().ok()?;
    Some((x, y))
}

/// Énumère les tuiles d'un zoom qui intersectent une emprise géographique
///
/// Les coordonnées sont tronquées aux limites du monde ; une emprise qui
/// traverse l'antiméridien (`west > east`) est découpée en deux. L'ordre
/// d'énumération est colonnes puis lignes.
pub fn tiles_in_bbox(bbox: Rect<f64>, zoom: u8) -> Vec<TileId> {
    tiles_in_bounds(bbox.min().x, bbox.min().y, bbox.max().x, bbox.max().y, zoom)
}

/// Variante de [`tiles_in_bbox`] sur des bornes brutes (ouest, sud, est, nord)
pub fn tiles_in_bounds(west: f64, south: f64, east: f64, north: f64, zoom: u8) -> Vec<TileId> {
    let mut tiles = Vec::new();
    for (columns, rows) in grid_ranges(west, south, east, north, zoom) {
        for x in columns {
            for y in rows.clone() {
                tiles.push(TileId::new(x, y, zoom));
            }
        }
    }
    tiles
}

/// Nombre de tuiles que [`tiles_in_bbox`] énumérerait, sans les créer
pub fn count_tiles_in_bbox(bbox: Rect<f64>, zoom: u8) -> u64 {
    grid_ranges(bbox.min().x, bbox.min().y, bbox.max().x, bbox.max().y, zoom)
        .into_iter()
        .map(|(columns, rows)| range_len(&columns) * range_len(&rows))
        .sum()
}

/// Plages de colonnes et de lignes couvrant l'emprise, une par côté de
/// l'antiméridien
fn grid_ranges(
    west: f64,
    south: f64,
    east: f64,
    north: f64,
    zoom: u8,
) -> Vec<(RangeInclusive<u32>, RangeInclusive<u32>)> {
    let (w, s) = truncate_lnglat(west, south);
    let (e, n) = truncate_lnglat(east, north);

    let boxes = if w > e {
        vec![(-180.0, s, e, n), (w, s, 180.0, n)]
    } else {
        vec![(w, s, e, n)]
    };

    boxes
        .into_iter()
        .map(|(w, s, e, n)| {
            let w = w.max(-180.0);
            let s = s.max(-MAX_LATITUDE);
            let e = e.min(180.0);
            let n = n.min(MAX_LATITUDE);

            let upper_left = TileId::containing(w, n, zoom);
            let lower_right = TileId::containing(e - LL_EPSILON, s + LL_EPSILON, zoom);
            (upper_left.x..=lower_right.x, upper_left.y..=lower_right.y)
        })
        .collect()
}

fn range_len(range: &RangeInclusive<u32>) -> u64 {
    if range.is_empty() {
        0
    } else {
        u64::from(*range.end() - *range.start()) + 1
    }
}

fn axis_index(value: f64, n: f64) -> u32 {
    if value <= 0.0 {
        0
    } else if value >= 1.0 {
        n as u32 - 1
    } else {
        ((value + EPSILON) * n).floor() as u32
    }
}

fn truncate_lnglat(lng: f64, lat: f64) -> (f64, f64) {
    (lng.clamp(-180.0, 180.0), lat.clamp(-90.0, 90.0))
}
