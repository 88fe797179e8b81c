//! Types de données pour le crate supertiles

use geo::{Geometry, Rect};
use serde_json::{Map, Value};

use crate::tile::{TileId, TILE_SIZE};

/// Attribut : liste ordonnée des tuiles couvrantes (`"x-y-z"`)
pub const ATTR_TILES_LIST: &str = "tiles_list";
/// Attribut : emprise des tuiles `[min_x, min_y, max_x, max_y]` en degrés
pub const ATTR_TILES_BBOX: &str = "tiles_bbox";
/// Attribut : largeur de la mosaïque en pixels
pub const ATTR_TILES_WIDTH: &str = "tiles_width";
/// Attribut : hauteur de la mosaïque en pixels
pub const ATTR_TILES_HEIGHT: &str = "tiles_height";
/// Attribut : géométrie tronquée à l'emprise de couverture
pub const ATTR_HAS_CLIP: &str = "has_clip";
/// Attribut : chemin de la mosaïque, `null` en cas d'échec
pub const ATTR_STILE: &str = "stile";

/// Une feature géographique avec sa géométrie et ses attributs
///
/// Produite par le chargeur externe, enrichie en place par chaque étape du
/// pipeline, sérialisée à la fin.
#[derive(Debug, Clone, Default)]
pub struct Feature {
    /// Identifiant GeoJSON (chaîne ou nombre), si présent
    pub id: Option<Value>,

    /// Géométrie en degrés ; `None` si absente ou illisible en entrée
    pub geometry: Option<Geometry>,

    /// Attributs ouverts de la feature
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            id: None,
            geometry: Some(geometry),
            properties: Map::new(),
        }
    }

    /// Écrit `tiles_list`, `tiles_bbox`, `tiles_width` et `tiles_height`
    pub fn apply_coverage(&mut self, coverage: &CoverageResult) {
        let tiles: Vec<Value> = coverage
            .tiles
            .iter()
            .map(|t| Value::String(t.to_string()))
            .collect();

        self.properties
            .insert(ATTR_TILES_LIST.to_string(), Value::Array(tiles));
        self.properties.insert(
            ATTR_TILES_BBOX.to_string(),
            Value::from(coverage.bbox_array().to_vec()),
        );
        self.properties
            .insert(ATTR_TILES_WIDTH.to_string(), Value::from(coverage.width));
        self.properties
            .insert(ATTR_TILES_HEIGHT.to_string(), Value::from(coverage.height));
    }

    pub fn set_has_clip(&mut self, has_clip: bool) {
        self.properties
            .insert(ATTR_HAS_CLIP.to_string(), Value::Bool(has_clip));
    }

    /// Enregistre le chemin de la mosaïque, ou la sentinelle `null`
    pub fn set_stile(&mut self, stile: Option<&str>) {
        let value = stile.map_or(Value::Null, |s| Value::String(s.to_string()));
        self.properties.insert(ATTR_STILE.to_string(), value);
    }

    pub fn has_clip(&self) -> bool {
        self.properties
            .get(ATTR_HAS_CLIP)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn stile(&self) -> Option<&str> {
        self.properties.get(ATTR_STILE).and_then(Value::as_str)
    }

    /// Relit `tiles_list` depuis les attributs (entrées invalides ignorées)
    pub fn tiles_list(&self) -> Vec<TileId> {
        self.properties
            .get(ATTR_TILES_LIST)
            .and_then(Value::as_array)
            .map(|tiles| {
                tiles
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|s| s.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Résultat du calcul de couverture d'une feature
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageResult {
    /// Tuiles couvrantes, uniques, dans l'ordre de première énumération
    pub tiles: Vec<TileId>,

    /// Union des emprises géographiques des tuiles
    pub bbox: Rect<f64>,

    /// Nombre de colonnes distinctes × 256
    pub width: u32,

    /// Nombre de lignes distinctes × 256
    pub height: u32,
}

impl CoverageResult {
    /// Emprise sous forme `[min_x, min_y, max_x, max_y]`
    pub fn bbox_array(&self) -> [f64; 4] {
        [
            self.bbox.min().x,
            self.bbox.min().y,
            self.bbox.max().x,
            self.bbox.max().y,
        ]
    }

    /// Nom de la mosaïque : `"{première tuile}-st.png"`
    pub fn mosaic_name(&self) -> Option<String> {
        self.tiles.first().map(|t| format!("{}-st.png", t))
    }

    pub fn columns(&self) -> u32 {
        self.width / TILE_SIZE
    }

    pub fn rows(&self) -> u32 {
        self.height / TILE_SIZE
    }
}
