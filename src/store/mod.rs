//! Secret storage backends.
//!
//! Two pairings exist, chosen once at startup by [`connect`]:
//!   - `aws`: DynamoDB metadata + S3 blobs
//!   - `gcp`: Firestore metadata + GCS blobs
//!
//! Callers only ever see `Arc<dyn SecretStore>`.

pub mod blob;
pub mod dynamo;
pub mod firestore;
pub mod firestore_client;
pub mod metadata;
pub mod paired;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BackendConfig, StoreConfig};
use crate::context::CallContext;
use crate::errors::Result;
use crate::record::SecretRecord;

pub use blob::{BlobStore, ObjectBlobStore};
pub use dynamo::DynamoMetadataStore;
pub use firestore::FirestoreMetadataStore;
pub use firestore_client::FirestoreRestClient;
pub use metadata::MetadataStore;
pub use paired::PairedSecretStore;

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Persist a fully populated record, overwriting any with the same id.
    /// File-backed payloads go to the blob store.
    async fn store_secret(&self, ctx: &CallContext, record: &SecretRecord) -> Result<()>;

    /// Read a record back, payload included. Absent, expired and consumed
    /// secrets all fail with `ErrorKind::NotFound`.
    async fn get_secret(&self, ctx: &CallContext, secret_id: &str) -> Result<SecretRecord>;

    /// Write `record.view_count`; every other field is ignored.
    async fn update_secret(&self, ctx: &CallContext, record: &SecretRecord) -> Result<()>;

    /// Metadata deletes are idempotent. Expired and undecodable file-backed
    /// records still lose their blob; a missing blob is an error only while
    /// the record is live.
    async fn delete_secret(&self, ctx: &CallContext, secret_id: &str) -> Result<()>;

    /// Atomically take one view, returning how many remain. A record with no
    /// views left is `NotFound`.
    async fn consume_view(&self, ctx: &CallContext, secret_id: &str) -> Result<u32>;

    fn backend_name(&self) -> &'static str;
}

/// Build the store for the configured pairing.
pub fn connect(config: &StoreConfig) -> anyhow::Result<Arc<dyn SecretStore>> {
    let store = match &config.backend {
        BackendConfig::Aws(aws) => PairedSecretStore::new(
            "aws",
            Arc::new(DynamoMetadataStore::from_config(aws)?),
            Arc::new(ObjectBlobStore::s3(aws)?),
        ),
        BackendConfig::Gcp(gcp) => {
            let client = FirestoreRestClient::from_config(gcp)?;
            PairedSecretStore::new(
                "gcp",
                Arc::new(FirestoreMetadataStore::new(Arc::new(client), gcp.collection.clone())),
                Arc::new(ObjectBlobStore::gcs(gcp)?),
            )
        }
    };
    tracing::info!(backend = store.backend_name(), "secret store ready");
    Ok(Arc::new(store))
}
