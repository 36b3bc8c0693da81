//! Document metadata store: one document per secret in a named collection,
//! the document id being the secret id.
//!
//! Besides the integer `ttl`, an `expire_at` timestamp is written so a
//! Firestore TTL policy can purge expired documents natively.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::firestore_client::{
    Code, DocumentClient, DocumentData, DocumentError, DocumentRef, DocumentSnapshot, FieldValue,
    Precondition,
};
use super::metadata::{
    field, EncodedSecret, MetadataStore, StoredShape, FIELD_DATA, FIELD_HEADER, FIELD_IS_FILE, FIELD_NONCE,
    FIELD_SALT, FIELD_SECRET_ID, FIELD_TTL, FIELD_VIEW_COUNT,
};
use crate::context::CallContext;
use crate::errors::{FieldError, Result, StoreError};
use crate::record::SecretRecord;

pub const FIELD_EXPIRE_AT: &str = "expire_at";

/// Optimistic decrement attempts before giving up under contention.
const MAX_CONSUME_ATTEMPTS: u32 = 5;

pub struct FirestoreMetadataStore {
    client: Arc<dyn DocumentClient>,
    collection: String,
}

impl FirestoreMetadataStore {
    pub fn new(client: Arc<dyn DocumentClient>, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    fn doc(&self, secret_id: &str) -> Box<dyn DocumentRef> {
        self.client.collection(&self.collection).doc(secret_id)
    }

    /// Fetch a document, mapping the backend's absence code to `NotFound`.
    async fn fetch(&self, operation: &'static str, doc: &dyn DocumentRef) -> Result<DocumentSnapshot> {
        doc.get()
            .await
            .map_err(|e| self.map_error(operation, doc.id(), e))
    }

    fn map_error(&self, operation: &'static str, secret_id: &str, err: DocumentError) -> StoreError {
        if err.is_not_found() {
            return StoreError::not_found(secret_id);
        }
        tracing::warn!(
            operation,
            secret_id,
            collection = %self.collection,
            error = %err,
            "Firestore call failed"
        );
        StoreError::backend(operation, err)
    }

    async fn consume(&self, secret_id: &str) -> Result<u32> {
        let doc = self.doc(secret_id);
        for attempt in 1..=MAX_CONSUME_ATTEMPTS {
            let snapshot = self.fetch("decrement_view_count", doc.as_ref()).await?;
            let encoded = from_document(secret_id, &snapshot.data)?;
            if encoded.is_expired_at(Utc::now()) || encoded.view_count <= 0 {
                return Err(StoreError::not_found(secret_id));
            }
            let Some(update_time) = snapshot.update_time else {
                return Err(StoreError::backend(
                    "decrement_view_count",
                    anyhow::anyhow!("document {} has no update time", secret_id),
                ));
            };

            let remaining = encoded.view_count - 1;
            let mut patch = DocumentData::new();
            patch.insert(FIELD_VIEW_COUNT.into(), FieldValue::Integer(remaining));

            match doc.update(patch, Precondition::UpdateTime(update_time)).await {
                Ok(()) => {
                    tracing::debug!(secret_id, remaining, attempt, "consumed one view");
                    return u32::try_from(remaining).map_err(|_| {
                        StoreError::decode(
                            secret_id,
                            FIELD_VIEW_COUNT,
                            FieldError::WrongType { expected: "non-negative 32-bit" },
                        )
                    });
                }
                Err(e) if matches!(e.code(), Some(Code::FailedPrecondition | Code::Aborted)) => {
                    tracing::debug!(secret_id, attempt, "view count changed concurrently, re-reading");
                }
                Err(e) => return Err(self.map_error("decrement_view_count", secret_id, e)),
            }
        }

        tracing::warn!(secret_id, attempts = MAX_CONSUME_ATTEMPTS, "gave up consuming a view");
        Err(StoreError::backend(
            "decrement_view_count",
            anyhow::anyhow!(
                "view count of {} kept changing across {} attempts",
                secret_id,
                MAX_CONSUME_ATTEMPTS
            ),
        ))
    }
}

pub fn to_document(secret_id: &str, encoded: &EncodedSecret) -> DocumentData {
    let mut data = DocumentData::new();
    data.insert(FIELD_SECRET_ID.into(), FieldValue::String(secret_id.into()));
    data.insert(FIELD_VIEW_COUNT.into(), FieldValue::Integer(encoded.view_count));
    data.insert(
        FIELD_DATA.into(),
        FieldValue::String(encoded.data.clone().unwrap_or_default()),
    );
    data.insert(FIELD_IS_FILE.into(), FieldValue::Boolean(encoded.is_file));
    data.insert(FIELD_NONCE.into(), FieldValue::String(encoded.nonce.clone()));
    data.insert(FIELD_SALT.into(), FieldValue::String(encoded.salt.clone()));
    data.insert(FIELD_HEADER.into(), FieldValue::String(encoded.header.clone()));
    data.insert(FIELD_TTL.into(), FieldValue::Integer(encoded.ttl));
    if let Some(expire_at) = DateTime::from_timestamp(encoded.ttl, 0) {
        data.insert(FIELD_EXPIRE_AT.into(), FieldValue::Timestamp(expire_at));
    }
    data
}

fn get_field<'a>(data: &'a DocumentData, name: &str) -> std::result::Result<&'a FieldValue, FieldError> {
    data.get(name).ok_or(FieldError::Missing)
}

fn string_field(data: &DocumentData, name: &str) -> std::result::Result<String, FieldError> {
    get_field(data, name)?
        .as_str()
        .map(str::to_owned)
        .ok_or(FieldError::WrongType { expected: "string" })
}

fn integer_field(data: &DocumentData, name: &str) -> std::result::Result<i64, FieldError> {
    get_field(data, name)?
        .as_integer()
        .ok_or(FieldError::WrongType { expected: "integer" })
}

fn bool_field(data: &DocumentData, name: &str) -> std::result::Result<bool, FieldError> {
    get_field(data, name)?
        .as_bool()
        .ok_or(FieldError::WrongType { expected: "boolean" })
}

pub fn shape_of(data: &DocumentData) -> StoredShape {
    StoredShape {
        is_file: bool_field(data, FIELD_IS_FILE).ok(),
        ttl: integer_field(data, FIELD_TTL).ok(),
    }
}

pub fn from_document(secret_id: &str, data: &DocumentData) -> Result<EncodedSecret> {
    let payload = match string_field(data, FIELD_DATA) {
        Err(FieldError::Missing) => Ok(None),
        other => other.map(Some),
    };
    Ok(EncodedSecret {
        view_count: field(secret_id, FIELD_VIEW_COUNT, integer_field(data, FIELD_VIEW_COUNT))?,
        data: field(secret_id, FIELD_DATA, payload)?,
        is_file: field(secret_id, FIELD_IS_FILE, bool_field(data, FIELD_IS_FILE))?,
        nonce: field(secret_id, FIELD_NONCE, string_field(data, FIELD_NONCE))?,
        salt: field(secret_id, FIELD_SALT, string_field(data, FIELD_SALT))?,
        header: field(secret_id, FIELD_HEADER, string_field(data, FIELD_HEADER))?,
        ttl: field(secret_id, FIELD_TTL, integer_field(data, FIELD_TTL))?,
    })
}

#[async_trait]
impl MetadataStore for FirestoreMetadataStore {
    async fn put_secret(&self, ctx: &CallContext, record: &SecretRecord) -> Result<()> {
        let doc = self.doc(&record.secret_id);
        let data = to_document(&record.secret_id, &EncodedSecret::from_record(record));
        ctx.run("put_secret", async {
            doc.set(data)
                .await
                .map_err(|e| self.map_error("put_secret", &record.secret_id, e))
        })
        .await?;
        tracing::debug!(secret_id = %record.secret_id, collection = %self.collection, "stored secret document");
        Ok(())
    }

    async fn get_secret(&self, ctx: &CallContext, secret_id: &str) -> Result<SecretRecord> {
        let doc = self.doc(secret_id);
        let snapshot = ctx
            .run("get_secret", self.fetch("get_secret", doc.as_ref()))
            .await?;
        from_document(secret_id, &snapshot.data)?.into_live_record(secret_id, Utc::now())
    }

    async fn update_view_count(&self, ctx: &CallContext, secret_id: &str, view_count: u32) -> Result<()> {
        let doc = self.doc(secret_id);
        let mut patch = DocumentData::new();
        patch.insert(FIELD_VIEW_COUNT.into(), FieldValue::Integer(i64::from(view_count)));
        ctx.run("update_view_count", async {
            doc.update(patch, Precondition::Exists)
                .await
                .map_err(|e| self.map_error("update_view_count", secret_id, e))
        })
        .await?;
        tracing::debug!(secret_id, view_count, "updated view count");
        Ok(())
    }

    async fn decrement_view_count(&self, ctx: &CallContext, secret_id: &str) -> Result<u32> {
        ctx.run("decrement_view_count", self.consume(secret_id)).await
    }

    async fn inspect_secret(&self, ctx: &CallContext, secret_id: &str) -> Result<Option<StoredShape>> {
        let doc = self.doc(secret_id);
        match ctx
            .run("inspect_secret", self.fetch("inspect_secret", doc.as_ref()))
            .await
        {
            Ok(snapshot) => Ok(Some(shape_of(&snapshot.data))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_secret(&self, ctx: &CallContext, secret_id: &str) -> Result<()> {
        let doc = self.doc(secret_id);
        ctx.run("delete_secret", async {
            doc.delete()
                .await
                .map_err(|e| self.map_error("delete_secret", secret_id, e))
        })
        .await?;
        tracing::debug!(secret_id, collection = %self.collection, "deleted secret document");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "firestore"
    }
}
