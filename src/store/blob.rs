//! Blob store for file-backed secrets.
//!
//! One object per secret at `<secret_id>.enc`, body = URL-safe base64 of the
//! ciphertext. Unlike metadata deletes, a missing object is an error on both
//! read and delete.
//!
//! ```text
//! S3:   S3_BUCKET (+ S3_ENDPOINT for MinIO), AWS_REGION, AWS_* credentials
//! GCS:  GCS_BUCKET, credentials from GOOGLE_SERVICE_ACCOUNT / ADC
//! ```

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};

use super::metadata::FIELD_DATA;
use crate::config::{AwsConfig, GcpConfig};
use crate::context::CallContext;
use crate::encoding;
use crate::errors::{Result, StoreError};
use crate::record::blob_key;

const BLOB_CONTENT_TYPE: &str = "text/plain";
const S3_SSE_ALGORITHM: &str = "aws:kms";

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload (or overwrite) the payload for `secret_id`.
    async fn store_encrypted_file(&self, ctx: &CallContext, secret_id: &str, data: &[u8]) -> Result<()>;

    /// Fails with a not-found error carrying the backend cause when absent.
    async fn get_encrypted_file(&self, ctx: &CallContext, secret_id: &str) -> Result<Vec<u8>>;

    /// Not idempotent: deleting an absent object fails.
    async fn delete_encrypted_file(&self, ctx: &CallContext, secret_id: &str) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}

/// [`BlobStore`] over any `object_store` backend.
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    name: &'static str,
}

impl ObjectBlobStore {
    pub fn new(store: Arc<dyn ObjectStore>, name: &'static str) -> Self {
        Self { store, name }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory")
    }

    /// S3 (or an S3-compatible endpoint) with SSE-KMS requested on every
    /// upload. Objects are private under the bucket's default ACL.
    pub fn s3(cfg: &AwsConfig) -> anyhow::Result<Self> {
        let sse_key: AmazonS3ConfigKey = "aws_server_side_encryption"
            .parse()
            .context("object_store does not recognise the S3 encryption key")?;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&cfg.s3_bucket)
            .with_region(&cfg.region)
            .with_config(sse_key, S3_SSE_ALGORITHM);

        if let Some(endpoint) = &cfg.s3_endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }

        // Without explicit keys the builder falls back to the instance role.
        if let Some(creds) = &cfg.credentials {
            builder = builder
                .with_access_key_id(&creds.access_key_id)
                .with_secret_access_key(&creds.secret_access_key);
            if let Some(token) = &creds.session_token {
                builder = builder.with_token(token);
            }
        }

        let store = builder.build().context("failed to build S3 object store")?;
        tracing::info!(bucket = %cfg.s3_bucket, region = %cfg.region, "ObjectBlobStore: using S3");
        Ok(Self::new(Arc::new(store), "s3"))
    }

    /// GCS encrypts at rest by default; access follows the bucket's IAM.
    pub fn gcs(cfg: &GcpConfig) -> anyhow::Result<Self> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&cfg.gcs_bucket)
            .build()
            .context("failed to build GCS object store")?;
        tracing::info!(bucket = %cfg.gcs_bucket, "ObjectBlobStore: using GCS");
        Ok(Self::new(Arc::new(store), "gcs"))
    }

    fn path(secret_id: &str) -> Path {
        Path::from(blob_key(secret_id))
    }

    fn map_error(&self, operation: &'static str, key: &Path, err: object_store::Error) -> StoreError {
        match err {
            object_store::Error::NotFound { .. } => {
                tracing::debug!(operation, key = %key, backend = self.name, "encrypted file not found");
                StoreError::ObjectMissing {
                    key: key.to_string(),
                    source: err,
                }
            }
            other => {
                tracing::warn!(operation, key = %key, backend = self.name, error = %other, "object store call failed");
                StoreError::backend(operation, other)
            }
        }
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn store_encrypted_file(&self, ctx: &CallContext, secret_id: &str, data: &[u8]) -> Result<()> {
        let path = Self::path(secret_id);
        let body = PutPayload::from(encoding::encode(data));

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, BLOB_CONTENT_TYPE.into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        ctx.run("store_encrypted_file", async {
            self.store
                .put_opts(&path, body, opts)
                .await
                .map_err(|e| self.map_error("store_encrypted_file", &path, e))
        })
        .await?;
        tracing::debug!(secret_id, key = %path, bytes = data.len(), "uploaded encrypted file");
        Ok(())
    }

    async fn get_encrypted_file(&self, ctx: &CallContext, secret_id: &str) -> Result<Vec<u8>> {
        let path = Self::path(secret_id);
        let body = ctx
            .run("get_encrypted_file", async {
                let result = self
                    .store
                    .get(&path)
                    .await
                    .map_err(|e| self.map_error("get_encrypted_file", &path, e))?;
                result
                    .bytes()
                    .await
                    .map_err(|e| self.map_error("get_encrypted_file", &path, e))
            })
            .await?;

        encoding::decode(&body).map_err(|e| StoreError::decode(secret_id, FIELD_DATA, e))
    }

    async fn delete_encrypted_file(&self, ctx: &CallContext, secret_id: &str) -> Result<()> {
        let path = Self::path(secret_id);
        ctx.run("delete_encrypted_file", async {
            // Object store deletes succeed on absent keys; check with `head` first so a
            // missing blob surfaces.
            self.store
                .head(&path)
                .await
                .map_err(|e| self.map_error("delete_encrypted_file", &path, e))?;
            self.store
                .delete(&path)
                .await
                .map_err(|e| self.map_error("delete_encrypted_file", &path, e))
        })
        .await?;
        tracing::debug!(secret_id, key = %path, "deleted encrypted file");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        self.name
    }
}
