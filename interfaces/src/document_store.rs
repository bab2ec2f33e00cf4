//! Document store interface: a Firestore-shaped `get/put/cas` contract.
//!
//! `aria-credits` is the primary consumer — ledger mutations go through
//! `compare_and_set` so that two racing settlements on the same user never
//! both win (`spec.md` §9 "durable backing store is an external
//! collaborator with compare-and-set semantics").

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CasError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("compare-and-set conflict on {0}: expected version {expected}, found {found}", expected = .1, found = .2)]
    Conflict(String, u64, u64),
    #[error("backend error: {0}")]
    Backend(String),
}

/// A versioned document. The version is opaque to callers beyond equality
/// comparison for CAS.
#[derive(Debug, Clone)]
pub struct Document {
    pub value: Value,
    pub version: u64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>, CasError>;

    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<Document, CasError>;

    /// Atomically replace the document at `(collection, key)` only if its
    /// current version equals `expected_version`. Returns the new document
    /// on success.
    async fn compare_and_set(
        &self,
        collection: &str,
        key: &str,
        expected_version: Option<u64>,
        value: Value,
    ) -> Result<Document, CasError>;
}

/// In-memory `DocumentStore` for tests and single-host deployment, grounded
/// on the teacher's `MemoryConversationStorage` double.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    rows: DashMap<(String, String), Document>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>, CasError> {
        Ok(self
            .rows
            .get(&(collection.to_string(), key.to_string()))
            .map(|r| r.clone()))
    }

    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<Document, CasError> {
        let k = (collection.to_string(), key.to_string());
        let version = self.rows.get(&k).map(|d| d.version + 1).unwrap_or(1);
        let doc = Document { value, version };
        self.rows.insert(k, doc.clone());
        Ok(doc)
    }

    async fn compare_and_set(
        &self,
        collection: &str,
        key: &str,
        expected_version: Option<u64>,
        value: Value,
    ) -> Result<Document, CasError> {
        let k = (collection.to_string(), key.to_string());
        let current_version = self.rows.get(&k).map(|d| d.version);
        if current_version != expected_version {
            return Err(CasError::Conflict(
                format!("{collection}/{key}"),
                expected_version.unwrap_or(0),
                current_version.unwrap_or(0),
            ));
        }
        let doc = Document {
            value,
            version: current_version.unwrap_or(0) + 1,
        };
        self.rows.insert(k, doc.clone());
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cas_rejects_stale_version() {
        let store = InMemoryDocumentStore::new();
        let doc = store
            .put("ledger", "user-1", serde_json::json!({"balance": 10}))
            .await
            .unwrap();
        assert_eq!(doc.version, 1);

        let err = store
            .compare_and_set(
                "ledger",
                "user-1",
                Some(0),
                serde_json::json!({"balance": 8}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CasError::Conflict(_, _, _)));

        let ok = store
            .compare_and_set(
                "ledger",
                "user-1",
                Some(1),
                serde_json::json!({"balance": 8}),
            )
            .await
            .unwrap();
        assert_eq!(ok.version, 2);
    }
}
