use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::blob::BlobStore;
use super::metadata::MetadataStore;
use super::SecretStore;
use crate::context::CallContext;
use crate::errors::{Result, StoreError};
use crate::record::SecretRecord;

/// A metadata store and a blob store acting as one [`SecretStore`].
///
/// The two are not transactional. Writes go blob-first so an interruption
/// leaves at worst an orphaned blob, never metadata pointing at nothing.
pub struct PairedSecretStore {
    name: &'static str,
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
}

impl PairedSecretStore {
    pub fn new(name: &'static str, metadata: Arc<dyn MetadataStore>, blobs: Arc<dyn BlobStore>) -> Self {
        tracing::debug!(
            pairing = name,
            metadata = metadata.backend_name(),
            blobs = blobs.backend_name(),
            "secret store assembled"
        );
        Self { name, metadata, blobs }
    }
}

#[async_trait]
impl SecretStore for PairedSecretStore {
    async fn store_secret(&self, ctx: &CallContext, record: &SecretRecord) -> Result<()> {
        if record.is_file {
            self.blobs
                .store_encrypted_file(ctx, &record.secret_id, &record.data)
                .await?;
            self.metadata.put_secret(ctx, &record.without_payload()).await
        } else {
            self.metadata.put_secret(ctx, record).await
        }
    }

    async fn get_secret(&self, ctx: &CallContext, secret_id: &str) -> Result<SecretRecord> {
        let mut record = self.metadata.get_secret(ctx, secret_id).await?;
        if record.is_file {
            record.data = self.blobs.get_encrypted_file(ctx, secret_id).await?;
        }
        Ok(record)
    }

    async fn update_secret(&self, ctx: &CallContext, record: &SecretRecord) -> Result<()> {
        self.metadata
            .update_view_count(ctx, &record.secret_id, record.view_count)
            .await
    }

    async fn consume_view(&self, ctx: &CallContext, secret_id: &str) -> Result<u32> {
        self.metadata.decrement_view_count(ctx, secret_id).await
    }

    async fn delete_secret(&self, ctx: &CallContext, secret_id: &str) -> Result<()> {
        // Expired and undecodable records still own their blob.
        let Some(shape) = self.metadata.inspect_secret(ctx, secret_id).await? else {
            self.metadata.delete_secret(ctx, secret_id).await?;
            tracing::debug!(secret_id, pairing = self.name, "nothing stored to delete");
            return Ok(());
        };
        let live = shape.is_live_at(Utc::now());

        self.metadata.delete_secret(ctx, secret_id).await?;
        let tolerate_missing = match shape.is_file {
            Some(false) => {
                tracing::debug!(secret_id, pairing = self.name, "secret deleted");
                return Ok(());
            }
            Some(true) => !live,
            None => {
                tracing::warn!(secret_id, "is_file unreadable; removing any encrypted file");
                true
            }
        };

        match self.blobs.delete_encrypted_file(ctx, secret_id).await {
            Ok(()) => {}
            Err(StoreError::ObjectMissing { .. }) if tolerate_missing => {
                tracing::debug!(secret_id, live, "no encrypted file left to remove");
            }
            Err(e) => return Err(e),
        }
        tracing::debug!(secret_id, live, pairing = self.name, "file-backed secret deleted");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        self.name
    }
}
