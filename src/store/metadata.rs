//! Metadata store contract and the backend-neutral field set.
//!
//! Each backend maps [`EncodedSecret`] onto its own attribute/field types;
//! turning those fields back into a [`SecretRecord`] (base64 decoding,
//! expiry check) happens here so both backends agree on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::context::CallContext;
use crate::encoding;
use crate::errors::{FieldError, Result, StoreError};
use crate::record::{is_expired, SecretRecord};

pub const FIELD_SECRET_ID: &str = "secret_id";
pub const FIELD_VIEW_COUNT: &str = "view_count";
pub const FIELD_DATA: &str = "data";
pub const FIELD_IS_FILE: &str = "is_file";
pub const FIELD_NONCE: &str = "nonce";
pub const FIELD_SALT: &str = "salt";
pub const FIELD_HEADER: &str = "header";
pub const FIELD_TTL: &str = "ttl";

/// Persists a secret's scalar and binary fields and enforces its expiry.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Write every field. Overwrites an existing record with the same id.
    async fn put_secret(&self, ctx: &CallContext, record: &SecretRecord) -> Result<()>;

    /// Fails with `NotFound` when the record is absent or expired.
    async fn get_secret(&self, ctx: &CallContext, secret_id: &str) -> Result<SecretRecord>;

    /// Set `view_count` only. Never creates a record.
    async fn update_view_count(&self, ctx: &CallContext, secret_id: &str, view_count: u32) -> Result<()>;

    /// Atomically decrement a positive `view_count`, returning the new value.
    async fn decrement_view_count(&self, ctx: &CallContext, secret_id: &str) -> Result<u32>;

    /// Read `is_file` and `ttl` of whatever is stored, expired or not, without
    /// decoding any other field. `None` when no record exists.
    async fn inspect_secret(&self, ctx: &CallContext, secret_id: &str) -> Result<Option<StoredShape>>;

    /// Idempotent: deleting an absent record succeeds.
    async fn delete_secret(&self, ctx: &CallContext, secret_id: &str) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}

/// The two fields a delete needs, as they sit in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredShape {
    /// `None` when the flag is missing or mistyped.
    pub is_file: Option<bool>,
    pub ttl: Option<i64>,
}

impl StoredShape {
    /// A record with an unreadable `ttl` counts as expired.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.ttl.map_or(false, |ttl| !is_expired(ttl, now))
    }
}

/// A record with its binary fields text-encoded, as it sits in a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSecret {
    pub view_count: i64,
    pub data: Option<String>,
    pub is_file: bool,
    pub nonce: String,
    pub salt: String,
    pub header: String,
    pub ttl: i64,
}

impl EncodedSecret {
    pub fn from_record(record: &SecretRecord) -> Self {
        Self {
            view_count: i64::from(record.view_count),
            data: Some(encoding::encode(&record.data)),
            is_file: record.is_file,
            nonce: encoding::encode(&record.nonce),
            salt: encoding::encode(&record.salt),
            header: encoding::encode(&record.header),
            ttl: record.ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.ttl, now)
    }

    /// Decode every field. A failure names the field; nothing is zero-filled.
    pub fn into_record(self, secret_id: &str) -> Result<SecretRecord> {
        let view_count = u32::try_from(self.view_count).map_err(|_| {
            StoreError::decode(
                secret_id,
                FIELD_VIEW_COUNT,
                FieldError::WrongType { expected: "non-negative 32-bit" },
            )
        })?;
        let data = match self.data.as_deref() {
            Some(text) => decode_field(secret_id, FIELD_DATA, text)?,
            None => Vec::new(),
        };

        Ok(SecretRecord {
            secret_id: secret_id.to_string(),
            view_count,
            data,
            is_file: self.is_file,
            nonce: decode_field(secret_id, FIELD_NONCE, &self.nonce)?,
            salt: decode_field(secret_id, FIELD_SALT, &self.salt)?,
            header: decode_field(secret_id, FIELD_HEADER, &self.header)?,
            ttl: self.ttl,
        })
    }

    /// [`EncodedSecret::into_record`], treating an expired record as absent.
    pub fn into_live_record(self, secret_id: &str, now: DateTime<Utc>) -> Result<SecretRecord> {
        if self.is_expired_at(now) {
            tracing::debug!(secret_id, ttl = self.ttl, "stored secret is past its ttl");
            return Err(StoreError::not_found(secret_id));
        }
        self.into_record(secret_id)
    }
}

fn decode_field(secret_id: &str, field: &'static str, text: &str) -> Result<Vec<u8>> {
    encoding::decode(text).map_err(|e| StoreError::decode(secret_id, field, e))
}

/// Attach the field name to a per-field extraction failure.
pub(crate) fn field<T>(
    secret_id: &str,
    name: &'static str,
    value: std::result::Result<T, FieldError>,
) -> Result<T> {
    value.map_err(|e| StoreError::decode(secret_id, name, e))
}
