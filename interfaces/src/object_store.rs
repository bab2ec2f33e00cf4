//! Object store interface for score/audio/voicebank bytes. `aria-sessions`
//! uses it for per-session scratch (upload bytes, `score.json`, job audio);
//! voicebank fetch (`spec.md` §1 "lazy fetch from blob storage into a local
//! cache") is interface-only here, per Non-goals.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<(), ObjectStoreError>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    async fn delete_prefix(&self, prefix: &str) -> Result<(), ObjectStoreError>;

    /// A signed, time-limited URL for serving the object directly (used by
    /// deployments that front audio with a CDN rather than proxying bytes
    /// through the HTTP edge). Returns `None` when the backend has no
    /// notion of signed URLs (e.g. local scratch), in which case the edge
    /// falls back to streaming bytes itself.
    fn sign_url(&self, _key: &str) -> Option<String> {
        None
    }
}

/// In-memory object store for tests (mirrors local scratch semantics).
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<(), ObjectStoreError> {
        self.objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.objects
            .get(key)
            .map(|v| v.clone())
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), ObjectStoreError> {
        self.objects.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}
