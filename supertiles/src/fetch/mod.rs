//! Récupération des tuiles depuis un service XYZ
//!
//! Chaque tuile est écrite sous `{x}-{y}-{z}.{ext}` dans la destination.
//! Une tuile déjà présente n'est jamais redemandée. Les échecs sont portés
//! par [`FetchOutcome::Missing`] et journalisés, jamais propagés.

mod http;

pub use http::{ReqwestTileClient, TileClient, DEFAULT_TIMEOUT};

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::TileFetchFailure;
use crate::storage::Destination;
use crate::tile::TileId;

/// Résultat de la récupération d'une tuile
#[derive(Debug)]
pub enum FetchOutcome {
    /// Tuile disponible à `location` (`cached` : déjà présente, aucune requête)
    Fetched {
        tile: TileId,
        location: String,
        cached: bool,
    },
    /// Tuile absente, avec la cause
    Missing {
        tile: TileId,
        reason: TileFetchFailure,
    },
}

impl FetchOutcome {
    pub fn tile(&self) -> TileId {
        match self {
            Self::Fetched { tile, .. } | Self::Missing { tile, .. } => *tile,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Fetched { location, .. } => Some(location),
            Self::Missing { .. } => None,
        }
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self, Self::Fetched { .. })
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Fetched { cached: true, .. })
    }
}

/// Télécharge les tuiles d'un gabarit d'URL vers une destination
pub struct TileFetcher<C> {
    client: C,
    destination: Destination,
    url_template: String,
    extension: String,
}

impl<C: TileClient> TileFetcher<C> {
    pub fn new(
        client: C,
        destination: Destination,
        url_template: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            client,
            destination,
            url_template: url_template.into(),
            extension: extension.into(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Récupère une tuile (idempotent : une tuile présente n'est pas redemandée)
    pub async fn fetch(&self, tile: TileId) -> FetchOutcome {
        match self.try_fetch(tile).await {
            Ok((location, cached)) => FetchOutcome::Fetched {
                tile,
                location,
                cached,
            },
            Err(reason) => {
                warn!(%tile, error = %reason, "Tile unavailable");
                FetchOutcome::Missing { tile, reason }
            }
        }
    }

    /// Récupère toutes les tuiles en parallèle, dans l'ordre d'entrée
    pub async fn fetch_all(&self, tiles: &[TileId]) -> Vec<FetchOutcome> {
        join_all(tiles.iter().map(|&tile| self.fetch(tile))).await
    }

    async fn try_fetch(&self, tile: TileId) -> Result<(String, bool), TileFetchFailure> {
        let name = tile.file_name(&self.extension);

        if self.destination.exists(&name).await? {
            debug!(%tile, "Tile already present");
            return Ok((self.destination.location(&name), true));
        }

        let url = tile.url(&self.url_template);
        let data = self.client.get(&url).await?;

        if image::guess_format(&data).is_err() {
            return Err(TileFetchFailure::InvalidImage { url });
        }

        let location = self.destination.write(&name, data).await?;
        debug!(%tile, location = %location, "Tile downloaded");
        Ok((location, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const TEMPLATE: &str = "https://tiles.test/{z}/{x}/{y}.png";

    fn png_bytes() -> Bytes {
        let img = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        Bytes::from(buf)
    }

    /// Client factice : compte les requêtes, 404 pour les x impairs
    #[derive(Default)]
    struct CountingClient {
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
    }

    impl TileClient for CountingClient {
        async fn get(&self, url: &str) -> Result<Bytes, TileFetchFailure> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.urls.lock().unwrap().push(url.to_string());

            if url.ends_with("/garbage.png") {
                return Ok(Bytes::from_static(b"<html>rate limited</html>"));
            }
            let x: u32 = url.split('/').nth(4).unwrap().parse().unwrap();
            if x % 2 == 1 {
                return Err(TileFetchFailure::Status {
                    status: 404,
                    url: url.to_string(),
                });
            }
            Ok(png_bytes())
        }
    }

    fn fetcher(destination: Destination) -> TileFetcher<CountingClient> {
        TileFetcher::new(CountingClient::default(), destination, TEMPLATE, "png")
    }

    #[tokio::test]
    async fn test_fetch_writes_tile() {
        let dir = tempfile::tempdir().unwrap();
        let dest = Destination::Local(dir.path().to_path_buf());
        let fetcher = fetcher(dest);

        let outcome = fetcher.fetch(TileId::new(2, 5, 18)).await;
        let FetchOutcome::Fetched {
            location, cached, ..
        } = &outcome
        else {
            panic!("expected a fetched tile, got {outcome:?}");
        };
        assert!(!cached);
        assert!(location.ends_with("2-5-18.png"));
        assert!(dir.path().join("2-5-18.png").exists());
        assert_eq!(
            fetcher.client.urls.lock().unwrap().as_slice(),
            ["https://tiles.test/18/2/5.png"]
        );
    }

    #[tokio::test]
    async fn test_fetch_is_idempotent() {
        let fetcher = fetcher(Destination::in_memory("tiles"));
        let tile = TileId::new(4, 4, 12);

        assert!(!fetcher.fetch(tile).await.is_cached());
        assert!(fetcher.fetch(tile).await.is_cached());
        assert_eq!(fetcher.client.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_missing() {
        let fetcher = fetcher(Destination::in_memory("tiles"));
        let tile = TileId::new(3, 4, 12);

        let outcome = fetcher.fetch(tile).await;
        assert!(matches!(
            outcome,
            FetchOutcome::Missing {
                reason: TileFetchFailure::Status { status: 404, .. },
                ..
            }
        ));
        assert!(!fetcher
            .destination()
            .exists(&tile.file_name("png"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_invalid_payload_not_written() {
        let fetcher = TileFetcher::new(
            CountingClient::default(),
            Destination::in_memory("tiles"),
            "https://tiles.test/garbage.png",
            "png",
        );
        let tile = TileId::new(0, 0, 1);

        let outcome = fetcher.fetch(tile).await;
        assert!(matches!(
            outcome,
            FetchOutcome::Missing {
                reason: TileFetchFailure::InvalidImage { .. },
                ..
            }
        ));
        assert!(!fetcher
            .destination()
            .exists(&tile.file_name("png"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_fetch_all_keeps_every_tile() {
        let fetcher = fetcher(Destination::in_memory("tiles"));
        let tiles: Vec<_> = (0..6).map(|x| TileId::new(x, 7, 10)).collect();

        let outcomes = fetcher.fetch_all(&tiles).await;
        assert_eq!(outcomes.len(), tiles.len());
        for (outcome, tile) in outcomes.iter().zip(&tiles) {
            assert_eq!(outcome.tile(), *tile);
            assert_eq!(outcome.is_fetched(), tile.x % 2 == 0);
        }
    }
}
