use super::{StoreRegistry, parse_s3_location};
use crate::utils::paths::join_paths;
use async_trait::async_trait;
use common::{Error, Result};
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Object access relative to the lake root
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, key: &Path, data: Vec<u8>) -> Result<()>;
    async fn get_object(&self, key: &Path) -> Result<Vec<u8>>;
    /// Keys below `prefix`, relative to the lake root
    async fn list_objects(&self, prefix: &Path) -> Result<Vec<Path>>;
    /// Deleting a missing object is not an error
    async fn delete_object(&self, key: &Path) -> Result<()>;
    async fn delete_prefix(&self, prefix: &Path) -> Result<usize>;
    async fn rename_object(&self, from: &Path, to: &Path) -> Result<()>;
    async fn check_file_exists(&self, key: &Path) -> Result<bool>;
    /// Url of `key` as understood by DataFusion's object store registry
    fn location_url(&self, key: &Path) -> String;
}

pub struct LakeStorage {
    store: Arc<dyn ObjectStore>,
    root: Path,
    url_root: String,
}

impl LakeStorage {
    pub fn local(dir: impl AsRef<std::path::Path>) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let canonical = std::fs::canonicalize(dir.as_ref())?;
        let store = LocalFileSystem::new_with_prefix(&canonical)?;
        let url = Url::from_directory_path(&canonical).map_err(|_| {
            Error::InvalidUri(format!("Cannot express {} as a url", canonical.display()))
        })?;

        Ok(Self {
            store: Arc::new(store),
            root: Path::default(),
            url_root: url.to_string(),
        })
    }

    pub fn s3(store: Arc<dyn ObjectStore>, bucket: &str, prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        let url_root = if prefix.is_empty() {
            format!("s3://{}/", bucket)
        } else {
            format!("s3://{}/{}/", bucket, prefix)
        };

        Self {
            store,
            root: Path::from(prefix),
            url_root,
        }
    }

    /// Opens the lake at a local directory or an `s3://bucket/prefix` location
    pub fn from_location(location: &str, registry: &StoreRegistry) -> Result<Self> {
        match parse_s3_location(location)? {
            Some(s3) => {
                let store = registry.get_object_store(&s3.bucket)?;
                Ok(Self::s3(store, &s3.bucket, &s3.prefix))
            }
            None => Self::local(location),
        }
    }

    fn full_path(&self, key: &Path) -> Path {
        join_paths(&self.root, key)
    }
}

#[async_trait]
impl ObjectStorage for LakeStorage {
    async fn put_object(&self, key: &Path, data: Vec<u8>) -> Result<()> {
        self.store
            .put(&self.full_path(key), PutPayload::from(data))
            .await?;
        Ok(())
    }

    async fn get_object(&self, key: &Path) -> Result<Vec<u8>> {
        let result = self.store.get(&self.full_path(key)).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => {
                Error::Storage(format!("Object {} not found in lake {}", key, self.url_root))
            }
            other => other.into(),
        })?;

        Ok(result.bytes().await?.to_vec())
    }

    async fn list_objects(&self, prefix: &Path) -> Result<Vec<Path>> {
        let full_prefix = self.full_path(prefix);
        let objects: Vec<_> = self.store.list(Some(&full_prefix)).try_collect().await?;

        let keys = objects
            .into_iter()
            .filter_map(|meta| {
                meta.location
                    .prefix_match(&self.root)
                    .map(Path::from_iter)
            })
            .collect();

        Ok(keys)
    }

    async fn delete_object(&self, key: &Path) -> Result<()> {
        match self.store.delete(&self.full_path(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_prefix(&self, prefix: &Path) -> Result<usize> {
        let keys = self.list_objects(prefix).await?;
        for key in &keys {
            self.store.delete(&self.full_path(key)).await?;
        }

        debug!(prefix = %prefix, deleted = keys.len(), "Deleted objects");
        Ok(keys.len())
    }

    async fn rename_object(&self, from: &Path, to: &Path) -> Result<()> {
        self.store
            .rename(&self.full_path(from), &self.full_path(to))
            .await?;
        Ok(())
    }

    async fn check_file_exists(&self, key: &Path) -> Result<bool> {
        match self.store.head(&self.full_path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn location_url(&self, key: &Path) -> String {
        format!("{}{}", self.url_root, key)
    }
}
