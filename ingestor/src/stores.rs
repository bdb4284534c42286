use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::model::{BlobKey, TransactionHeader};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("the {store} store is unavailable")]
    Unavailable { store: &'static str },

    #[error("the {store} store refused to write `{key}`: {reason}")]
    WriteRefused {
        store: &'static str,
        key: String,
        reason: String,
    },
}

/// Key-value store holding transaction metadata and blob mappings.
pub trait MetadataStore: Send + Sync + 'static {
    fn write_transaction_metadata(
        &self,
        header: &TransactionHeader,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn write_blob_mapping(
        &self,
        key: &BlobKey,
        uri: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Object storage receiving payload data.
pub trait BlobStore: Send + Sync + 'static {
    /// Uploads `data` under `key` and returns the URI of the stored blob.
    fn upload_blob(
        &self,
        key: &BlobKey,
        data: Bytes,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;
}

#[derive(Debug, Default)]
struct MetadataInner {
    transactions: BTreeMap<String, TransactionHeader>,
    blob_mappings: BTreeMap<BlobKey, String>,
}

/// In-memory [`MetadataStore`] used by the service and by tests.
///
/// Can be switched to an unavailable mode in which every write fails.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadataStore {
    inner: Arc<Mutex<MetadataInner>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub async fn transaction(&self, transaction_id: &str) -> Option<TransactionHeader> {
        self.inner
            .lock()
            .await
            .transactions
            .get(transaction_id)
            .cloned()
    }

    pub async fn blob_mappings(&self) -> BTreeMap<BlobKey, String> {
        self.inner.lock().await.blob_mappings.clone()
    }

    pub async fn transaction_count(&self) -> usize {
        self.inner.lock().await.transactions.len()
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable { store: "metadata" });
        }

        Ok(())
    }
}

impl MetadataStore for MemoryMetadataStore {
    async fn write_transaction_metadata(&self, header: &TransactionHeader) -> Result<(), StoreError> {
        self.ensure_available()?;

        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.transactions.get(&header.transaction_id) {
            if existing != header {
                return Err(StoreError::WriteRefused {
                    store: "metadata",
                    key: header.transaction_id.clone(),
                    reason: "transaction already initialized with different metadata".to_string(),
                });
            }
        }

        debug!(transaction_id = %header.transaction_id, "writing transaction metadata");
        inner
            .transactions
            .insert(header.transaction_id.clone(), header.clone());

        Ok(())
    }

    async fn write_blob_mapping(&self, key: &BlobKey, uri: &str) -> Result<(), StoreError> {
        self.ensure_available()?;

        debug!(%key, uri, "writing blob mapping");
        self.inner
            .lock()
            .await
            .blob_mappings
            .insert(key.clone(), uri.to_string());

        Ok(())
    }
}

/// In-memory [`BlobStore`] addressing blobs as `memory://{transaction}/{series}/{ordinal}`.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<BTreeMap<BlobKey, Bytes>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub async fn blob(&self, key: &BlobKey) -> Option<Bytes> {
        self.blobs.lock().await.get(key).cloned()
    }

    pub async fn blob_count(&self) -> usize {
        self.blobs.lock().await.len()
    }
}

impl BlobStore for MemoryBlobStore {
    async fn upload_blob(&self, key: &BlobKey, data: Bytes) -> Result<String, StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable { store: "blob" });
        }

        debug!(%key, size = data.len(), "uploading blob");
        self.blobs.lock().await.insert(key.clone(), data);

        Ok(format!("memory://{key}"))
    }
}
