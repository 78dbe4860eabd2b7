//! Object-store backend seam.
//!
//! The pipeline only sees the [`Backend`] trait; [`ObjectStoreBackend`]
//! adapts any `object_store::ObjectStore` implementation (S3 in production,
//! the in-memory store in tests).

use crate::types::AccessTier;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as StorePath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload, TagSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("object not found: {0}")]
    NotFound(String),

    /// Bulk delete where some keys failed. Distinct from a transport error:
    /// the surviving keys stay stale until a future run retries them.
    #[error("bulk delete failed for {failed} of {total} keys")]
    PartialDelete { failed: usize, total: usize },

    #[error(transparent)]
    Store(#[from] object_store::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One put-object call.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    pub cache_control: String,
    pub access: AccessTier,
}

/// Blob-store operations the pipeline needs.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Bytes, BackendError>;

    async fn put(&self, request: PutRequest) -> Result<(), BackendError>;

    async fn delete(&self, key: &str) -> Result<(), BackendError>;

    /// Delete a batch of keys, surfacing partial failure as
    /// [`BackendError::PartialDelete`].
    async fn delete_many(&self, keys: &[String]) -> Result<(), BackendError>;

    /// Every key in the bucket. Used only for the first-run wipe.
    async fn list_all(&self) -> Result<Vec<String>, BackendError>;
}

/// [`Backend`] over an `object_store` store.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// S3 backend from the standard AWS environment variables.
    /// Construction failure is the run's only fatal error class.
    pub fn s3_from_env(bucket: &str) -> Result<Self, BackendError> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()?;
        Ok(Self::new(Arc::new(store)))
    }
}

#[async_trait]
impl Backend for ObjectStoreBackend {
    async fn get(&self, key: &str) -> Result<Bytes, BackendError> {
        let path = StorePath::from(key);
        let result = self.store.get(&path).await.map_err(|err| match err {
            object_store::Error::NotFound { .. } => BackendError::NotFound(key.to_string()),
            other => BackendError::Store(other),
        })?;
        Ok(result.bytes().await?)
    }

    async fn put(&self, request: PutRequest) -> Result<(), BackendError> {
        let path = StorePath::from(request.key.as_str());

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, request.content_type.into());
        attributes.insert(Attribute::CacheControl, request.cache_control.into());

        // Canned ACLs are not expressible through object_store; the access
        // tier travels as an object tag for bucket policies to act on.
        let mut tags = TagSet::default();
        tags.push("acl", request.access.as_str());

        let options = PutOptions {
            attributes,
            tags,
            ..Default::default()
        };

        let size = request.body.len();
        self.store
            .put_opts(&path, PutPayload::from(request.body), options)
            .await?;
        debug!("put {} ({size} bytes)", path);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        let path = StorePath::from(key);
        self.store.delete(&path).await?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), BackendError> {
        let total = keys.len();
        if total == 0 {
            return Ok(());
        }

        let locations = stream::iter(
            keys.iter()
                .map(|key| Ok(StorePath::from(key.as_str())))
                .collect::<Vec<_>>(),
        )
        .boxed();

        let mut failed = 0usize;
        let mut results = self.store.delete_stream(locations);
        while let Some(result) = results.next().await {
            match result {
                Ok(_) => {}
                // Already-gone keys are not a failure for our purposes.
                Err(object_store::Error::NotFound { .. }) => {}
                Err(err) => {
                    debug!("delete failed: {err}");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(BackendError::PartialDelete { failed, total });
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<String>, BackendError> {
        let mut keys = Vec::new();
        let mut listing = self.store.list(None);
        while let Some(meta) = listing.next().await {
            keys.push(meta?.location.to_string());
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn memory_backend() -> ObjectStoreBackend {
        ObjectStoreBackend::new(Arc::new(InMemory::new()))
    }

    fn put_request(key: &str, body: &str) -> PutRequest {
        PutRequest {
            key: key.to_string(),
            body: Bytes::from(body.to_string()),
            content_type: "text/plain".to_string(),
            cache_control: "max-age=60".to_string(),
            access: AccessTier::Public,
        }
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let backend = memory_backend();

        backend.put(put_request("a.txt", "hello")).await.unwrap();
        let body = backend.get("a.txt").await.unwrap();
        assert_eq!(&body[..], b"hello");

        backend.delete("a.txt").await.unwrap();
        match backend.get("a.txt").await {
            Err(BackendError::NotFound(key)) => assert_eq!(key, "a.txt"),
            other => panic!("expected NotFound, got {:?}", other.map(|b| b.len())),
        }
    }

    #[tokio::test]
    async fn test_delete_many_and_list() {
        let backend = memory_backend();
        for key in ["a.txt", "b.txt", "sub/c.txt"] {
            backend.put(put_request(key, "x")).await.unwrap();
        }

        let mut keys = backend.list_all().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a.txt", "b.txt", "sub/c.txt"]);

        backend
            .delete_many(&["a.txt".to_string(), "b.txt".to_string()])
            .await
            .unwrap();

        let keys = backend.list_all().await.unwrap();
        assert_eq!(keys, vec!["sub/c.txt"]);
    }

    #[tokio::test]
    async fn test_delete_many_ignores_missing_keys() {
        let backend = memory_backend();
        backend.put(put_request("a.txt", "x")).await.unwrap();

        backend
            .delete_many(&["a.txt".to_string(), "ghost.txt".to_string()])
            .await
            .unwrap();

        assert!(backend.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_many_empty_batch() {
        let backend = memory_backend();
        backend.delete_many(&[]).await.unwrap();
    }
}
