//! Types d'erreurs pour le crate supertiles
//!
//! Chaque erreur est contenue au plus petit niveau capable de continuer :
//! tuile → feature → lot. Rien en dessous de l'orchestrateur n'interrompt
//! le traitement complet.

use thiserror::Error;

/// Erreur de reprojection d'une coordonnée
#[derive(Debug, Error)]
#[error("Coordinate transformation failed for ({x}, {y}): {reason}")]
pub struct TransformError {
    pub x: f64,
    pub y: f64,
    pub reason: String,
}

/// Géométrie d'entrée inutilisable : fatale pour la feature uniquement
#[derive(Debug, Error)]
pub enum GeometryError {
    /// Géométrie absente (null dans la collection d'entrée)
    #[error("Feature has no geometry")]
    Missing,

    /// Géométrie vide (pas de centroïde calculable)
    #[error("Empty geometry: {0}")]
    Empty(String),

    /// Coordonnées non finies (NaN, infini)
    #[error("Non-finite coordinates in geometry")]
    NonFinite,

    /// Niveau de zoom hors de la plage supportée
    #[error("Zoom level {zoom} out of range (max {max})")]
    ZoomOutOfRange { zoom: u8, max: u8 },

    /// Rayon de buffer invalide
    #[error("Invalid buffer radius: {0} m")]
    InvalidRadius(f64),

    /// Couverture trop étendue pour une seule mosaïque
    #[error("Coverage needs {count} tiles, limit is {max}")]
    TooManyTiles { count: u64, max: usize },

    /// Panique pendant la couverture ou le découpage
    #[error("Coverage computation panicked: {0}")]
    Panicked(String),

    /// Reprojection impossible
    #[error(transparent)]
    Transform(#[from] TransformError),
}

impl GeometryError {
    /// Crée une erreur de géométrie vide avec contexte
    pub fn empty(kind: impl Into<String>) -> Self {
        Self::Empty(kind.into())
    }
}

/// Erreurs d'accès au stockage (local ou objet)
#[derive(Debug, Error)]
pub enum StorageError {
    /// Erreur d'I/O sur le système de fichiers local
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Erreur du stockage objet (S3, GCS, ...)
    #[error("Object store error on {location}: {source}")]
    ObjectStore {
        location: String,
        #[source]
        source: object_store::Error,
    },

    /// URI de destination invalide
    #[error("Invalid destination '{uri}': {reason}")]
    InvalidDestination { uri: String, reason: String },
}

impl StorageError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn object_store(location: impl Into<String>, source: object_store::Error) -> Self {
        Self::ObjectStore {
            location: location.into(),
            source,
        }
    }

    pub fn invalid_destination(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDestination {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

/// Échec de récupération d'une tuile
///
/// Jamais propagé comme `Err` au-delà du fetcher : il est porté par
/// `FetchOutcome::Missing`.
#[derive(Debug, Error)]
pub enum TileFetchFailure {
    /// Le service a répondu avec un statut différent de 200
    #[error("HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    /// Erreur de transport (DNS, connexion, timeout)
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// Le contenu reçu n'est pas une image reconnue
    #[error("Response from {url} is not a recognized image")]
    InvalidImage { url: String },

    /// Écriture de la tuile impossible
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Erreurs lors de l'assemblage d'une mosaïque
#[derive(Debug, Error)]
pub enum StitchError {
    /// Aucune tuile exploitable pour la mosaïque
    #[error("no tiles")]
    NoTiles,

    /// Encodage de la mosaïque impossible
    #[error("Failed to encode mosaic {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: image::ImageError,
    },

    /// Canevas au-delà de la limite de pixels
    #[error("Mosaic {name} would be {columns}x{rows} tiles of {tile_width}x{tile_height} px, over the {max_pixels} pixel limit")]
    CanvasTooLarge {
        name: String,
        columns: u64,
        rows: u64,
        tile_width: u32,
        tile_height: u32,
        max_pixels: u64,
    },

    /// Lecture ou écriture impossible
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Tâche de composition interrompue
    #[error("Compositing task failed: {0}")]
    Worker(String),
}

/// Configuration de pipeline invalide
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Zoom level {zoom} out of range ({min}..={max})")]
    Zoom { zoom: u8, min: u8, max: u8 },

    #[error("Invalid buffer radius: {0} m")]
    Radius(f64),

    #[error("URL template '{0}' must contain {{x}}, {{y}} and {{z}}")]
    UrlTemplate(String),

    #[error("Unsupported map service type '{0}' (supported: tms)")]
    ServiceType(String),

    #[error("Worker count must be at least 1")]
    Jobs,

    #[error("Tile limit per feature must be at least 1")]
    MaxTiles,
}

/// Cause d'échec d'une feature, agrégée par l'orchestrateur
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Stitch(#[from] StitchError),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl FeatureError {
    /// Libellé court du type d'échec (pour les rapports)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Geometry(_) => "geometry",
            Self::Stitch(StitchError::NoTiles) => "no_tiles",
            Self::Stitch(_) => "stitch",
            Self::Worker(_) => "worker",
        }
    }
}

/// Erreur de décodage d'un identifiant de tuile
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid tile id '{0}', expected 'x-y-z'")]
pub struct ParseTileIdError(pub String);

/// Erreur fatale pour un lot complet (jamais causée par une feature isolée)
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("Coverage stage failed: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::TileId;

    #[test]
    fn test_feature_error_kind() {
        let err = FeatureError::from(GeometryError::Missing);
        assert_eq!(err.kind(), "geometry");

        let err = FeatureError::from(StitchError::NoTiles);
        assert_eq!(err.kind(), "no_tiles");
        assert_eq!(err.to_string(), "no tiles");
    }

    #[test]
    fn test_fetch_failure_message() {
        let failure = TileFetchFailure::Status {
            status: 404,
            url: "https://tile.example/18/1/2.png".to_string(),
        };
        assert!(failure.to_string().contains("404"));
    }

    #[test]
    fn test_parse_error_keeps_input() {
        let err = "1-2-3-".parse::<TileId>().unwrap_err();
        assert_eq!(err, ParseTileIdError("1-2-3-".to_string()));
        assert_eq!(err.to_string(), "Invalid tile id '1-2-3-', expected 'x-y-z'");
    }

    #[test]
    fn test_too_many_tiles_message() {
        let err = GeometryError::TooManyTiles {
            count: 429_025,
            max: 1024,
        };
        assert_eq!(err.to_string(), "Coverage needs 429025 tiles, limit is 1024");
        assert_eq!(FeatureError::from(err).kind(), "geometry");
    }
}
