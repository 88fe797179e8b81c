//! Assemblage des tuiles en mosaïque (supertile)
//!
//! Les tuiles sont placées selon leur position relative dans la grille,
//! recalculée depuis leur nom de fichier. Les cases sans tuile restent
//! transparentes. La taille du canevas est bornée par `max_pixels`.

use std::io::Cursor;

use bytes::Bytes;
use futures::future::join_all;
use image::{imageops, ImageFormat, RgbaImage};
use tracing::{debug, warn};

use crate::error::StitchError;
use crate::fetch::FetchOutcome;
use crate::storage::Destination;
use crate::tile::{grid_position, TILE_SIZE};

/// Limite de pixels par défaut : 1024 tuiles de 256 px (256 Mo en RGBA)
pub const DEFAULT_MAX_PIXELS: u64 = 1024 * (TILE_SIZE as u64) * (TILE_SIZE as u64);

/// Compose les mosaïques à partir des tuiles téléchargées
#[derive(Debug, Clone)]
pub struct MosaicStitcher {
    tiles: Destination,
    mosaics: Destination,
    max_pixels: u64,
}

/// Tuile lue depuis le stockage, pas encore décodée
struct RawTile {
    x: u32,
    y: u32,
    location: String,
    data: Bytes,
}

impl MosaicStitcher {
    pub fn new(tiles: Destination, mosaics: Destination) -> Self {
        Self {
            tiles,
            mosaics,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }

    pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    pub fn mosaics(&self) -> &Destination {
        &self.mosaics
    }

    /// Assemble les tuiles récupérées et écrit la mosaïque sous `output_name`
    ///
    /// Renvoie l'emplacement de la mosaïque écrite.
    ///
    /// # Errors
    ///
    /// [`StitchError::NoTiles`] si aucune tuile n'est exploitable,
    /// [`StitchError::CanvasTooLarge`] si le canevas dépasse `max_pixels`.
    pub async fn stitch(
        &self,
        outcomes: &[FetchOutcome],
        output_name: &str,
    ) -> Result<String, StitchError> {
        let positioned: Vec<((u32, u32), &str)> = outcomes
            .iter()
            .filter_map(FetchOutcome::location)
            .filter_map(|location| grid_position(location).map(|pos| (pos, location)))
            .collect();

        if positioned.is_empty() {
            return Err(StitchError::NoTiles);
        }

        let reads = join_all(
            positioned
                .iter()
                .map(|(_, location)| self.tiles.read(base_name(location))),
        )
        .await;

        let mut raw = Vec::with_capacity(positioned.len());
        for (((x, y), location), data) in positioned.into_iter().zip(reads) {
            match data {
                Ok(data) => raw.push(RawTile {
                    x,
                    y,
                    location: location.to_string(),
                    data,
                }),
                Err(e) => warn!(location, error = %e, "Tile unreadable, left as a hole"),
            }
        }

        let name = output_name.to_string();
        let max_pixels = self.max_pixels;
        let png = tokio::task::spawn_blocking(move || compose(raw, &name, max_pixels))
            .await
            .map_err(|e| StitchError::Worker(e.to_string()))??;

        let location = self.mosaics.write(output_name, png).await?;
        debug!(location = %location, "Mosaic written");
        Ok(location)
    }
}

fn base_name(location: &str) -> &str {
    location.rsplit(['/', '\\']).next().unwrap_or(location)
}

/// Décode, place et encode en PNG (CPU, hors runtime async)
fn compose(raw: Vec<RawTile>, name: &str, max_pixels: u64) -> Result<Bytes, StitchError> {
    let tiles: Vec<(u32, u32, RgbaImage)> = raw
        .into_iter()
        .filter_map(|tile| match image::load_from_memory(&tile.data) {
            Ok(img) => Some((tile.x, tile.y, img.to_rgba8())),
            Err(e) => {
                warn!(location = %tile.location, error = %e, "Tile undecodable, skipped");
                None
            }
        })
        .collect();

    let Some((_, _, reference)) = tiles.first() else {
        return Err(StitchError::NoTiles);
    };
    let (tile_width, tile_height) = reference.dimensions();

    let min_x = tiles.iter().map(|t| t.0).min().unwrap_or(0);
    let max_x = tiles.iter().map(|t| t.0).max().unwrap_or(0);
    let min_y = tiles.iter().map(|t| t.1).min().unwrap_or(0);
    let max_y = tiles.iter().map(|t| t.1).max().unwrap_or(0);

    let columns = u64::from(max_x - min_x) + 1;
    let rows = u64::from(max_y - min_y) + 1;
    let (width, height) = canvas_size(columns, rows, tile_width, tile_height, max_pixels)
        .ok_or_else(|| StitchError::CanvasTooLarge {
            name: name.to_string(),
            columns,
            rows,
            tile_width,
            tile_height,
            max_pixels,
        })?;

    // Fond transparent
    let mut canvas = RgbaImage::new(width, height);

    for (x, y, tile) in &tiles {
        let px = i64::from(x - min_x) * i64::from(tile_width);
        let py = i64::from(y - min_y) * i64::from(tile_height);
        imageops::replace(&mut canvas, tile, px, py);
    }

    let mut buf = Vec::new();
    canvas
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|source| StitchError::Encode {
            name: name.to_string(),
            source,
        })?;

    Ok(Bytes::from(buf))
}

/// Dimensions du canevas, `None` au-delà de `max_pixels` ou de `u32`
fn canvas_size(
    columns: u64,
    rows: u64,
    tile_width: u32,
    tile_height: u32,
    max_pixels: u64,
) -> Option<(u32, u32)> {
    let width = columns.checked_mul(u64::from(tile_width))?;
    let height = rows.checked_mul(u64::from(tile_height))?;
    if width.checked_mul(height)? > max_pixels {
        return None;
    }
    Some((u32::try_from(width).ok()?, u32::try_from(height).ok()?))
}
