//! Destinations de stockage des tuiles et mosaïques
//!
//! Une destination est soit un répertoire local, soit un préfixe de
//! stockage objet (`s3://`, `gs://`, `memory://`). Les destinations objet ne
//! créent jamais de répertoire local.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tracing::debug;
use url::Url;

use crate::error::StorageError;

static TMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Racine de stockage (répertoire local ou préfixe objet)
#[derive(Debug, Clone)]
pub enum Destination {
    Local(PathBuf),
    Object {
        store: Arc<dyn ObjectStore>,
        prefix: ObjectPath,
        /// URI d'origine sans `/` final, pour l'affichage des emplacements
        uri: String,
    },
}

impl Destination {
    /// Interprète une racine de destination
    ///
    /// Les identifiants S3/GCS sont lus dans les variables `AWS_*` et
    /// `GOOGLE_*` de l'environnement.
    pub fn parse(root: &str) -> Result<Self, StorageError> {
        let root = match root.trim_end_matches('/') {
            "" if root.starts_with('/') => "/",
            trimmed => trimmed,
        };

        let Some((scheme, rest)) = root.split_once("://") else {
            return Ok(Self::Local(PathBuf::from(root)));
        };

        let store: Arc<dyn ObjectStore> = match scheme {
            "s3" | "s3a" => Arc::new(
                AmazonS3Builder::from_env()
                    .with_url(root)
                    .build()
                    .map_err(|e| StorageError::invalid_destination(root, e.to_string()))?,
            ),
            "gs" => Arc::new(
                GoogleCloudStorageBuilder::from_env()
                    .with_url(root)
                    .build()
                    .map_err(|e| StorageError::invalid_destination(root, e.to_string()))?,
            ),
            "memory" => {
                let prefix = rest.trim_matches('/');
                return Ok(Self::object(Arc::new(InMemory::new()), prefix, root));
            }
            other => {
                return Err(StorageError::invalid_destination(
                    root,
                    format!("unsupported scheme '{}'", other),
                ))
            }
        };

        let url =
            Url::parse(root).map_err(|e| StorageError::invalid_destination(root, e.to_string()))?;
        let prefix = url.path().trim_matches('/').to_string();

        Ok(Self::object(store, &prefix, root))
    }

    /// Destination objet sur un store existant
    pub fn object(store: Arc<dyn ObjectStore>, prefix: &str, uri: &str) -> Self {
        Self::Object {
            store,
            prefix: ObjectPath::from(prefix),
            uri: uri.trim_end_matches('/').to_string(),
        }
    }

    /// Destination en mémoire (`memory://{prefix}`)
    pub fn in_memory(prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        Self::object(
            Arc::new(InMemory::new()),
            prefix,
            &format!("memory://{}", prefix),
        )
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Object { .. })
    }

    /// Emplacement affichable d'un fichier de la destination
    pub fn location(&self, name: &str) -> String {
        match self {
            Self::Local(dir) => dir.join(name).display().to_string(),
            Self::Object { uri, .. } => format!("{}/{}", uri, name),
        }
    }

    /// Prépare la destination avant la première écriture
    ///
    /// Crée le répertoire local ; sans effet pour le stockage objet.
    pub async fn ensure_ready(&self) -> Result<(), StorageError> {
        match self {
            Self::Local(dir) => tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::io(dir.display().to_string(), e)),
            Self::Object { .. } => Ok(()),
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        match self {
            Self::Local(dir) => {
                let path = dir.join(name);
                tokio::fs::try_exists(&path)
                    .await
                    .map_err(|e| StorageError::io(path.display().to_string(), e))
            }
            Self::Object { store, prefix, .. } => {
                match store.head(&prefix.child(name)).await {
                    Ok(_) => Ok(true),
                    Err(object_store::Error::NotFound { .. }) => Ok(false),
                    Err(e) => Err(StorageError::object_store(self.location(name), e)),
                }
            }
        }
    }

    pub async fn read(&self, name: &str) -> Result<Bytes, StorageError> {
        match self {
            Self::Local(dir) => {
                let path = dir.join(name);
                tokio::fs::read(&path)
                    .await
                    .map(Bytes::from)
                    .map_err(|e| StorageError::io(path.display().to_string(), e))
            }
            Self::Object { store, prefix, .. } => {
                let to_err = |e| StorageError::object_store(self.location(name), e);
                let result = store.get(&prefix.child(name)).await.map_err(to_err)?;
                result.bytes().await.map_err(to_err)
            }
        }
    }

    /// Écrit un fichier et renvoie son emplacement
    ///
    /// En local l'écriture passe par un fichier temporaire renommé : un
    /// lecteur concurrent ne voit jamais de fichier partiel.
    pub async fn write(&self, name: &str, data: Bytes) -> Result<String, StorageError> {
        let location = self.location(name);

        match self {
            Self::Local(dir) => {
                let path = dir.join(name);
                let tmp = dir.join(format!(
                    ".{}.{}.{}.tmp",
                    name,
                    std::process::id(),
                    TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
                ));

                tokio::fs::write(&tmp, &data)
                    .await
                    .map_err(|e| StorageError::io(tmp.display().to_string(), e))?;
                if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(StorageError::io(path.display().to_string(), e));
                }
            }
            Self::Object { store, prefix, .. } => {
                store
                    .put(&prefix.child(name), PutPayload::from(data))
                    .await
                    .map_err(|e| StorageError::object_store(&location, e))?;
            }
        }

        debug!(location = %location, "Stored");
        Ok(location)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(dir) => write!(f, "{}", dir.display()),
            Self::Object { uri, .. } => write!(f, "{}", uri),
        }
    }
}
