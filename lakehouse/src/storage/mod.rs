pub mod lake;
pub mod writer;

pub use lake::{LakeStorage, ObjectStorage};
pub use writer::{TableMarker, TableWriter, read_table_set};

use common::config::S3Settings;
use common::{Error, Result};
use dashmap::DashMap;
use datafusion::execution::context::SessionContext;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use std::sync::Arc;
use url::Url;

/// Bucket and key prefix of an `s3://` location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub prefix: String,
}

/// Returns `None` for anything that is not an `s3://` url, i.e. a local path.
pub fn parse_s3_location(location: &str) -> Result<Option<S3Location>> {
    if !location.starts_with("s3://") {
        return Ok(None);
    }

    let parsed_url = Url::parse(location)?;
    let bucket = parsed_url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| Error::InvalidUri(format!("S3 location '{}' has no bucket", location)))?
        .to_string();
    let prefix = parsed_url.path().trim_matches('/').to_string();

    Ok(Some(S3Location { bucket, prefix }))
}

/// Hands out one S3 store per bucket and registers them with DataFusion
#[derive(Clone)]
pub struct StoreRegistry {
    settings: Option<S3Settings>,
    object_store_cache: Arc<DashMap<String, Arc<AmazonS3>>>,
}

impl StoreRegistry {
    pub fn new(settings: Option<S3Settings>) -> Self {
        Self {
            settings,
            object_store_cache: Arc::new(DashMap::new()),
        }
    }

    pub fn get_object_store(&self, bucket: &str) -> Result<Arc<AmazonS3>> {
        if let Some(store) = self.object_store_cache.get(bucket) {
            return Ok(store.clone());
        }

        // Without an [s3] section credentials come from the usual AWS_* variables
        let builder = match &self.settings {
            Some(settings) => AmazonS3Builder::new()
                .with_region(&settings.region)
                .with_access_key_id(&settings.access_key)
                .with_secret_access_key(&settings.secret_key)
                .with_endpoint(&settings.endpoint)
                .with_allow_http(settings.allow_http),
            None => AmazonS3Builder::from_env(),
        };

        let store = Arc::new(builder.with_bucket_name(bucket).build()?);
        self.object_store_cache
            .insert(bucket.to_string(), store.clone());
        Ok(store)
    }

    /// Makes an `s3://` location readable from `ctx`. Local paths need nothing.
    pub fn register_location(&self, ctx: &SessionContext, location: &str) -> Result<()> {
        if let Some(s3) = parse_s3_location(location)? {
            let store = self.get_object_store(&s3.bucket)?;
            let url = Url::parse(&format!("s3://{}", s3.bucket))?;
            ctx.runtime_env().register_object_store(&url, store);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_location() {
        let location = parse_s3_location("s3://travel-lake/runs/2016/").unwrap().unwrap();
        assert_eq!(location.bucket, "travel-lake");
        assert_eq!(location.prefix, "runs/2016");

        let bare = parse_s3_location("s3://travel-lake").unwrap().unwrap();
        assert_eq!(bare.prefix, "");

        assert!(parse_s3_location("data/lake").unwrap().is_none());
    }
}
