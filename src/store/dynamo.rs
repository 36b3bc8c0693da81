//! Key-value metadata store: one DynamoDB item per secret, keyed by
//! `secret_id`, spoken over the DynamoDB JSON 1.0 protocol with SigV4.
//!
//! Item layout:
//!
//! ```text
//! secret_id  S     (partition key)
//! view_count N
//! data       S     base64url
//! is_file    BOOL
//! nonce      S     base64url
//! salt       S     base64url
//! header     S     base64url
//! ttl        N     epoch seconds, the table's TTL attribute
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Map, Value};
use thiserror::Error;

use super::metadata::{
    field, EncodedSecret, MetadataStore, StoredShape, FIELD_DATA, FIELD_HEADER, FIELD_IS_FILE, FIELD_NONCE,
    FIELD_SALT, FIELD_SECRET_ID, FIELD_TTL, FIELD_VIEW_COUNT,
};
use crate::config::AwsConfig;
use crate::context::CallContext;
use crate::credentials::{sigv4, AwsCredentialSource};
use crate::errors::{FieldError, Result, StoreError};
use crate::record::SecretRecord;

const SERVICE: &str = "dynamodb";
const TARGET_PREFIX: &str = "DynamoDB_20120810";
const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// UpdateItem creates the item when the key is absent unless guarded.
const EXISTS_CONDITION: &str = "attribute_exists(secret_id)";

/// Consuming a view also requires the item to be unexpired and positive.
/// `ttl` is a reserved word, hence the name placeholder.
const CONSUMABLE_CONDITION: &str =
    "attribute_exists(secret_id) AND #ttl > :now AND view_count > :zero";

#[derive(Debug, Error)]
pub enum DynamoError {
    #[error("{code} (HTTP {status}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("request to DynamoDB failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed DynamoDB payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request signing failed: {0}")]
    Signing(anyhow::Error),

    #[error("{0:#}")]
    Credentials(anyhow::Error),
}

impl DynamoError {
    pub fn is_conditional_check_failed(&self) -> bool {
        matches!(self, Self::Service { code, .. } if code == "ConditionalCheckFailedException")
    }
}

/// Minimal DynamoDB client: signs and posts one JSON action per call.
pub struct DynamoClient {
    http: reqwest::Client,
    endpoint: String,
    region: String,
    credentials: AwsCredentialSource,
}

impl std::fmt::Debug for DynamoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoClient")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl DynamoClient {
    pub fn new(
        region: impl Into<String>,
        endpoint: Option<String>,
        credentials: impl Into<AwsCredentialSource>,
    ) -> anyhow::Result<Self> {
        let region = region.into();
        let endpoint =
            endpoint.unwrap_or_else(|| format!("https://dynamodb.{}.amazonaws.com/", region));
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("failed to build DynamoDB HTTP client")?;
        Ok(Self {
            http,
            endpoint,
            region,
            credentials: credentials.into(),
        })
    }

    /// Invoke `action` (e.g. `GetItem`) with a JSON input document.
    pub async fn call(&self, action: &str, input: &Value) -> std::result::Result<Value, DynamoError> {
        let body = serde_json::to_vec(input)?;
        let credentials = self
            .credentials
            .resolve()
            .await
            .map_err(DynamoError::Credentials)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(
            "x-amz-target",
            HeaderValue::from_str(&format!("{}.{}", TARGET_PREFIX, action))
                .map_err(|e| DynamoError::Signing(e.into()))?,
        );
        sigv4::sign_request(
            "POST",
            &self.endpoint,
            &mut headers,
            &body,
            &credentials,
            &self.region,
            SERVICE,
        )
        .map_err(DynamoError::Signing)?;

        let resp = self
            .http
            .post(&self.endpoint)
            .headers(headers)
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        if status.is_success() {
            if bytes.is_empty() {
                return Ok(json!({}));
            }
            return Ok(serde_json::from_slice(&bytes)?);
        }

        // {"__type":"com.amazonaws.dynamodb.v20120810#ResourceNotFoundException","message":"..."}
        let payload: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        let code = payload["__type"]
            .as_str()
            .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
            .unwrap_or_else(|| "UnknownError".to_string());
        let message = payload["message"]
            .as_str()
            .or_else(|| payload["Message"].as_str())
            .unwrap_or_default()
            .to_string();
        Err(DynamoError::Service {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

pub struct DynamoMetadataStore {
    client: Arc<DynamoClient>,
    table: String,
}

impl DynamoMetadataStore {
    pub fn new(client: Arc<DynamoClient>, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    pub fn from_config(cfg: &AwsConfig) -> anyhow::Result<Self> {
        let credentials = match &cfg.credentials {
            Some(keys) => AwsCredentialSource::Static(keys.clone()),
            None => AwsCredentialSource::default_chain(&cfg.region, &cfg.s3_bucket)?,
        };
        let client = DynamoClient::new(cfg.region.clone(), cfg.dynamo_endpoint.clone(), credentials)?;
        tracing::info!(
            table = %cfg.dynamo_table,
            region = %cfg.region,
            credentials = ?client.credentials,
            "DynamoMetadataStore: using DynamoDB table"
        );
        Ok(Self::new(Arc::new(client), cfg.dynamo_table.clone()))
    }

    fn key(&self, secret_id: &str) -> Value {
        json!({ FIELD_SECRET_ID: { "S": secret_id } })
    }

    async fn call(&self, operation: &'static str, action: &str, input: Value) -> Result<Value> {
        self.client.call(action, &input).await.map_err(|e| {
            tracing::warn!(operation, table = %self.table, error = %e, "DynamoDB call failed");
            StoreError::backend(operation, e)
        })
    }

    /// Run a guarded UpdateItem, mapping a failed guard to `NotFound`.
    async fn guarded_update(
        &self,
        operation: &'static str,
        secret_id: &str,
        mut input: Value,
    ) -> Result<Value> {
        input["TableName"] = json!(self.table);
        input["Key"] = self.key(secret_id);
        match self.client.call("UpdateItem", &input).await {
            Ok(output) => Ok(output),
            Err(e) if e.is_conditional_check_failed() => Err(StoreError::not_found(secret_id)),
            Err(e) => {
                tracing::warn!(operation, secret_id, error = %e, "DynamoDB update failed");
                Err(StoreError::backend(operation, e))
            }
        }
    }
}

fn to_item(secret_id: &str, encoded: &EncodedSecret) -> Value {
    json!({
        FIELD_SECRET_ID: { "S": secret_id },
        FIELD_VIEW_COUNT: { "N": encoded.view_count.to_string() },
        FIELD_DATA: { "S": encoded.data.clone().unwrap_or_default() },
        FIELD_IS_FILE: { "BOOL": encoded.is_file },
        FIELD_NONCE: { "S": encoded.nonce },
        FIELD_SALT: { "S": encoded.salt },
        FIELD_HEADER: { "S": encoded.header },
        FIELD_TTL: { "N": encoded.ttl.to_string() },
    })
}

fn attr<'a>(
    item: &'a Map<String, Value>,
    name: &str,
    type_tag: &str,
    expected: &'static str,
) -> std::result::Result<&'a Value, FieldError> {
    item.get(name)
        .ok_or(FieldError::Missing)?
        .get(type_tag)
        .ok_or(FieldError::WrongType { expected })
}

fn string_attr(item: &Map<String, Value>, name: &str) -> std::result::Result<String, FieldError> {
    attr(item, name, "S", "string")?
        .as_str()
        .map(str::to_owned)
        .ok_or(FieldError::WrongType { expected: "string" })
}

fn number_attr(item: &Map<String, Value>, name: &str) -> std::result::Result<i64, FieldError> {
    let text = attr(item, name, "N", "number")?
        .as_str()
        .ok_or(FieldError::WrongType { expected: "number" })?;
    Ok(text.parse::<i64>()?)
}

fn bool_attr(item: &Map<String, Value>, name: &str) -> std::result::Result<bool, FieldError> {
    attr(item, name, "BOOL", "boolean")?
        .as_bool()
        .ok_or(FieldError::WrongType { expected: "boolean" })
}

fn from_item(secret_id: &str, item: &Map<String, Value>) -> Result<EncodedSecret> {
    let data = match string_attr(item, FIELD_DATA) {
        Err(FieldError::Missing) => Ok(None),
        other => other.map(Some),
    };
    Ok(EncodedSecret {
        view_count: field(secret_id, FIELD_VIEW_COUNT, number_attr(item, FIELD_VIEW_COUNT))?,
        data: field(secret_id, FIELD_DATA, data)?,
        is_file: field(secret_id, FIELD_IS_FILE, bool_attr(item, FIELD_IS_FILE))?,
        nonce: field(secret_id, FIELD_NONCE, string_attr(item, FIELD_NONCE))?,
        salt: field(secret_id, FIELD_SALT, string_attr(item, FIELD_SALT))?,
        header: field(secret_id, FIELD_HEADER, string_attr(item, FIELD_HEADER))?,
        ttl: field(secret_id, FIELD_TTL, number_attr(item, FIELD_TTL))?,
    })
}

/// Read the delete-relevant attributes, tolerating anything else being broken.
fn shape_of(item: &Map<String, Value>) -> StoredShape {
    StoredShape {
        is_file: bool_attr(item, FIELD_IS_FILE).ok(),
        ttl: number_attr(item, FIELD_TTL).ok(),
    }
}

#[async_trait]
impl MetadataStore for DynamoMetadataStore {
    async fn put_secret(&self, ctx: &CallContext, record: &SecretRecord) -> Result<()> {
        let input = json!({
            "TableName": self.table,
            "Item": to_item(&record.secret_id, &EncodedSecret::from_record(record)),
        });
        ctx.run("put_secret", self.call("put_secret", "PutItem", input))
            .await?;
        tracing::debug!(secret_id = %record.secret_id, table = %self.table, "stored secret item");
        Ok(())
    }

    async fn get_secret(&self, ctx: &CallContext, secret_id: &str) -> Result<SecretRecord> {
        let input = json!({
            "TableName": self.table,
            "Key": self.key(secret_id),
            "ConsistentRead": true,
        });
        let output = ctx
            .run("get_secret", self.call("get_secret", "GetItem", input))
            .await?;

        let Some(item) = output.get("Item").and_then(Value::as_object) else {
            return Err(StoreError::not_found(secret_id));
        };
        from_item(secret_id, item)?.into_live_record(secret_id, Utc::now())
    }

    async fn update_view_count(&self, ctx: &CallContext, secret_id: &str, view_count: u32) -> Result<()> {
        let input = json!({
            "UpdateExpression": "SET view_count = :val",
            "ConditionExpression": EXISTS_CONDITION,
            "ExpressionAttributeValues": {
                ":val": { "N": view_count.to_string() },
            },
        });
        ctx.run(
            "update_view_count",
            self.guarded_update("update_view_count", secret_id, input),
        )
        .await?;
        tracing::debug!(secret_id, view_count, "updated view count");
        Ok(())
    }

    async fn decrement_view_count(&self, ctx: &CallContext, secret_id: &str) -> Result<u32> {
        let input = json!({
            "UpdateExpression": "SET view_count = view_count - :one",
            "ConditionExpression": CONSUMABLE_CONDITION,
            "ExpressionAttributeNames": { "#ttl": FIELD_TTL },
            "ExpressionAttributeValues": {
                ":one": { "N": "1" },
                ":zero": { "N": "0" },
                ":now": { "N": Utc::now().timestamp().to_string() },
            },
            "ReturnValues": "UPDATED_NEW",
        });
        let output = ctx
            .run(
                "decrement_view_count",
                self.guarded_update("decrement_view_count", secret_id, input),
            )
            .await?;

        let attributes = output
            .get("Attributes")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                StoreError::decode(secret_id, FIELD_VIEW_COUNT, FieldError::Missing)
            })?;
        let remaining = field(secret_id, FIELD_VIEW_COUNT, number_attr(attributes, FIELD_VIEW_COUNT))?;
        let remaining = u32::try_from(remaining).map_err(|_| {
            StoreError::decode(
                secret_id,
                FIELD_VIEW_COUNT,
                FieldError::WrongType { expected: "non-negative 32-bit" },
            )
        })?;
        tracing::debug!(secret_id, remaining, "consumed one view");
        Ok(remaining)
    }

    async fn inspect_secret(&self, ctx: &CallContext, secret_id: &str) -> Result<Option<StoredShape>> {
        let input = json!({
            "TableName": self.table,
            "Key": self.key(secret_id),
            "ConsistentRead": true,
            "ProjectionExpression": "is_file, #ttl",
            "ExpressionAttributeNames": { "#ttl": FIELD_TTL },
        });
        let output = ctx
            .run("inspect_secret", self.call("inspect_secret", "GetItem", input))
            .await?;
        Ok(output.get("Item").and_then(Value::as_object).map(shape_of))
    }

    async fn delete_secret(&self, ctx: &CallContext, secret_id: &str) -> Result<()> {
        let input = json!({
            "TableName": self.table,
            "Key": self.key(secret_id),
        });
        ctx.run("delete_secret", self.call("delete_secret", "DeleteItem", input))
            .await?;
        tracing::debug!(secret_id, table = %self.table, "deleted secret item");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "dynamodb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded() -> EncodedSecret {
        EncodedSecret {
            view_count: 3,
            data: Some("AQI=".into()),
            is_file: false,
            nonce: "qg==".into(),
            salt: "uw==".into(),
            header: "zA==".into(),
            ttl: 1_900_000_000,
        }
    }

    #[test]
    fn test_item_uses_typed_attributes() {
        let item = to_item("abc123", &encoded());
        assert_eq!(item["secret_id"]["S"], "abc123");
        assert_eq!(item["view_count"]["N"], "3");
        assert_eq!(item["is_file"]["BOOL"], false);
        assert_eq!(item["ttl"]["N"], "1900000000");
        assert_eq!(item["nonce"]["S"], "qg==");
    }

    #[test]
    fn test_item_roundtrip() {
        let item = to_item("abc123", &encoded());
        let parsed = from_item("abc123", item.as_object().unwrap()).unwrap();
        assert_eq!(parsed, encoded());
    }

    #[test]
    fn test_missing_data_attribute_is_allowed() {
        let mut item = to_item("abc123", &encoded());
        item.as_object_mut().unwrap().remove("data");
        let parsed = from_item("abc123", item.as_object().unwrap()).unwrap();
        assert_eq!(parsed.data, None);
    }

    #[test]
    fn test_wrong_attribute_type_names_field() {
        let mut item = to_item("abc123", &encoded());
        item["salt"] = json!({ "N": "5" });
        let err = from_item("abc123", item.as_object().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Decode { field: "salt", source: FieldError::WrongType { .. }, .. }
        ));
    }

    #[test]
    fn test_partial_item_is_rejected() {
        // What an unguarded UpdateItem on a missing key would leave behind.
        let item = json!({ "secret_id": { "S": "abc123" }, "view_count": { "N": "2" } });
        let err = from_item("abc123", item.as_object().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Decode { source: FieldError::Missing, .. }
        ));
    }

    #[test]
    fn test_shape_ignores_undecodable_attributes() {
        let mut item = to_item("abc123", &EncodedSecret { is_file: true, ..encoded() });
        item["nonce"] = json!({ "S": "**corrupt**" });
        item["view_count"] = json!({ "S": "three" });
        let shape = shape_of(item.as_object().unwrap());
        assert_eq!(shape, StoredShape { is_file: Some(true), ttl: Some(1_900_000_000) });

        item["is_file"] = json!({ "S": "true" });
        assert_eq!(shape_of(item.as_object().unwrap()).is_file, None);
    }

    #[test]
    fn test_conditional_failure_detection() {
        let err = DynamoError::Service {
            status: 400,
            code: "ConditionalCheckFailedException".into(),
            message: "The conditional request failed".into(),
        };
        assert!(err.is_conditional_check_failed());
        let err = DynamoError::Service {
            status: 400,
            code: "ResourceNotFoundException".into(),
            message: "Requested resource not found".into(),
        };
        assert!(!err.is_conditional_check_failed());
    }
}
