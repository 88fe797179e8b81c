//! Client HTTP des services de tuiles

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use tracing::trace;

use crate::error::{PipelineError, TileFetchFailure};

/// Délai par défaut d'une requête de tuile
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3050);

/// User-Agent envoyé au service (requis par la politique d'usage d'OSM)
const USER_AGENT: &str = concat!("supertiles/", env!("CARGO_PKG_VERSION"));

/// Requête GET unique vers un service de tuiles
///
/// Seul un statut 200 est un succès. Aucun réessai à ce niveau.
pub trait TileClient: Send + Sync {
    fn get(&self, url: &str) -> impl Future<Output = Result<Bytes, TileFetchFailure>> + Send;
}

/// Client reqwest avec délai borné
#[derive(Clone)]
pub struct ReqwestTileClient {
    client: reqwest::Client,
}

impl ReqwestTileClient {
    pub fn new(timeout: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::HttpClient(e.to_string()))?;

        Ok(Self { client })
    }
}

impl TileClient for ReqwestTileClient {
    async fn get(&self, url: &str) -> Result<Bytes, TileFetchFailure> {
        trace!(url, "GET");

        let transport = |e: reqwest::Error| TileFetchFailure::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(TileFetchFailure::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.bytes().await.map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds() {
        assert!(ReqwestTileClient::new(DEFAULT_TIMEOUT).is_ok());
    }

    #[test]
    fn test_user_agent() {
        assert!(USER_AGENT.starts_with("supertiles/"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_failure() {
        let client = ReqwestTileClient::new(Duration::from_millis(500)).unwrap();
        let result = client.get("http://127.0.0.1:9/0/0/0.png").await;
        assert!(matches!(result, Err(TileFetchFailure::Transport { .. })));
    }
}
