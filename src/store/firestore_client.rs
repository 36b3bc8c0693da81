//! Narrow document-database seam (client / collection / document /
//! snapshot) and its Firestore REST v1 implementation.
//!
//! The traits carry no behaviour of their own; they exist so the document
//! metadata store can run against an in-memory substitute in tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::GcpConfig;
use crate::credentials::gcp_token::TokenSource;

const FIRESTORE_API: &str = "https://firestore.googleapis.com/v1";

/// A single typed document field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    String(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    /// Any value type this crate never writes, kept so a mistyped field is
    /// reported as such rather than as missing.
    Other(Value),
}

pub type DocumentData = BTreeMap<String, FieldValue>;

impl FieldValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Firestore `Value` JSON. 64-bit integers travel as strings.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Integer(v) => json!({ "integerValue": v.to_string() }),
            Self::String(v) => json!({ "stringValue": v }),
            Self::Boolean(v) => json!({ "booleanValue": v }),
            Self::Timestamp(v) => {
                json!({ "timestampValue": v.to_rfc3339_opts(SecondsFormat::AutoSi, true) })
            }
            Self::Other(v) => v.clone(),
        }
    }

    pub fn from_json(value: &Value) -> Self {
        if let Some(v) = value.get("integerValue") {
            let parsed = match v {
                Value::String(s) => s.parse::<i64>().ok(),
                Value::Number(n) => n.as_i64(),
                _ => None,
            };
            if let Some(n) = parsed {
                return Self::Integer(n);
            }
        } else if let Some(Value::String(s)) = value.get("stringValue") {
            return Self::String(s.clone());
        } else if let Some(Value::Bool(b)) = value.get("booleanValue") {
            return Self::Boolean(*b);
        } else if let Some(Value::String(s)) = value.get("timestampValue") {
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Self::Timestamp(ts.with_timezone(&Utc));
            }
        }
        Self::Other(value.clone())
    }
}

pub fn fields_to_json(data: &DocumentData) -> Value {
    let fields: Map<String, Value> = data
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    Value::Object(fields)
}

pub fn fields_from_json(fields: &Value) -> DocumentData {
    fields
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(name, value)| (name.clone(), FieldValue::from_json(value)))
                .collect()
        })
        .unwrap_or_default()
}

/// Write condition attached to an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    None,
    /// The document must already exist.
    Exists,
    /// The document must be unchanged since this update time.
    UpdateTime(String),
}

/// gRPC-style status codes carried in Firestore error envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Code {
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Aborted,
    InvalidArgument,
    PermissionDenied,
    Unauthenticated,
    ResourceExhausted,
    Unavailable,
    DeadlineExceeded,
    Internal,
    Other(String),
}

impl Code {
    pub fn from_status(status: &str) -> Self {
        match status {
            "NOT_FOUND" => Self::NotFound,
            "ALREADY_EXISTS" => Self::AlreadyExists,
            "FAILED_PRECONDITION" => Self::FailedPrecondition,
            "ABORTED" => Self::Aborted,
            "INVALID_ARGUMENT" => Self::InvalidArgument,
            "PERMISSION_DENIED" => Self::PermissionDenied,
            "UNAUTHENTICATED" => Self::Unauthenticated,
            "RESOURCE_EXHAUSTED" => Self::ResourceExhausted,
            "UNAVAILABLE" => Self::Unavailable,
            "DEADLINE_EXCEEDED" => Self::DeadlineExceeded,
            "INTERNAL" => Self::Internal,
            other => Self::Other(other.to_string()),
        }
    }

    /// Fallback when the body carries no status string.
    fn from_http(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            404 => Self::NotFound,
            409 => Self::Aborted,
            412 => Self::FailedPrecondition,
            400 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            429 => Self::ResourceExhausted,
            503 => Self::Unavailable,
            504 => Self::DeadlineExceeded,
            other => Self::Other(format!("HTTP {}", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("{code:?}: {message}")]
    Status { code: Code, message: String },

    #[error("request to document store failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed document response: {0}")]
    Malformed(String),

    #[error("could not obtain access token: {0}")]
    Auth(anyhow::Error),
}

impl DocumentError {
    pub fn status(code: Code, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&Code> {
        match self {
            Self::Status { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(&Code::NotFound)
    }
}

/// A read document. `get` on an absent document fails with `NotFound`
/// instead of returning an empty snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub data: DocumentData,
    /// Opaque version token for optimistic writes.
    pub update_time: Option<String>,
}

impl DocumentSnapshot {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.data.get(field)
    }
}

pub trait DocumentClient: Send + Sync {
    fn collection(&self, name: &str) -> Box<dyn CollectionRef>;
}

pub trait CollectionRef: Send + Sync {
    fn doc(&self, id: &str) -> Box<dyn DocumentRef>;
}

#[async_trait]
pub trait DocumentRef: Send + Sync {
    fn id(&self) -> &str;

    async fn get(&self) -> Result<DocumentSnapshot, DocumentError>;

    /// Create or fully replace the document.
    async fn set(&self, data: DocumentData) -> Result<(), DocumentError>;

    /// Write only the given fields, subject to `precondition`.
    async fn update(&self, data: DocumentData, precondition: Precondition) -> Result<(), DocumentError>;

    /// Deleting an absent document succeeds.
    async fn delete(&self) -> Result<(), DocumentError>;
}

// ── REST implementation ─────────────────────────────────────────

struct RestInner {
    http: reqwest::Client,
    base_url: String,
    /// `projects/{p}/databases/{d}/documents`
    documents_path: String,
    tokens: TokenSource,
}

/// Firestore over the REST v1 API.
#[derive(Clone)]
pub struct FirestoreRestClient {
    inner: Arc<RestInner>,
}

impl std::fmt::Debug for FirestoreRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirestoreRestClient")
            .field("base_url", &self.inner.base_url)
            .field("documents_path", &self.inner.documents_path)
            .field("tokens", &self.inner.tokens)
            .finish()
    }
}

impl FirestoreRestClient {
    /// `base_url` is the API root, e.g. `https://firestore.googleapis.com/v1`.
    pub fn new(
        base_url: impl Into<String>,
        project_id: &str,
        database: &str,
        tokens: TokenSource,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("failed to build Firestore HTTP client")?;
        Ok(Self {
            inner: Arc::new(RestInner {
                http,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                documents_path: format!("projects/{}/databases/{}/documents", project_id, database),
                tokens,
            }),
        })
    }

    pub fn from_config(cfg: &GcpConfig) -> anyhow::Result<Self> {
        let (base_url, tokens) = match &cfg.emulator_host {
            Some(host) => {
                let base = if host.starts_with("http://") || host.starts_with("https://") {
                    format!("{}/v1", host.trim_end_matches('/'))
                } else {
                    format!("http://{}/v1", host.trim_end_matches('/'))
                };
                (base, TokenSource::Emulator)
            }
            None => {
                let tokens = match (&cfg.access_token, &cfg.credentials_file) {
                    (Some(token), _) => TokenSource::Static(token.clone()),
                    (None, Some(path)) => TokenSource::key_file(path),
                    (None, None) => TokenSource::application_default(),
                };
                (FIRESTORE_API.to_string(), tokens)
            }
        };
        tracing::info!(
            project = %cfg.project_id,
            database = %cfg.database,
            base_url = %base_url,
            tokens = ?tokens,
            "FirestoreRestClient: using Firestore"
        );
        Self::new(base_url, &cfg.project_id, &cfg.database, tokens)
    }
}

impl DocumentClient for FirestoreRestClient {
    fn collection(&self, name: &str) -> Box<dyn CollectionRef> {
        Box::new(RestCollection {
            inner: self.inner.clone(),
            name: name.to_string(),
        })
    }
}

struct RestCollection {
    inner: Arc<RestInner>,
    name: String,
}

impl CollectionRef for RestCollection {
    fn doc(&self, id: &str) -> Box<dyn DocumentRef> {
        let url = format!(
            "{}/{}/{}/{}",
            self.inner.base_url,
            self.inner.documents_path,
            urlencoding::encode(&self.name),
            urlencoding::encode(id)
        );
        Box::new(RestDocument {
            inner: self.inner.clone(),
            id: id.to_string(),
            url,
        })
    }
}

struct RestDocument {
    inner: Arc<RestInner>,
    id: String,
    url: String,
}

impl RestDocument {
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, DocumentError> {
        let req = match self
            .inner
            .tokens
            .bearer()
            .await
            .map_err(DocumentError::Auth)?
        {
            Some(bearer) => req.header(reqwest::header::AUTHORIZATION, bearer),
            None => req,
        };

        let resp = req.send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        let body: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        if status.is_success() {
            return Ok(body);
        }

        // {"error": {"code": 404, "message": "...", "status": "NOT_FOUND"}}
        let error = &body["error"];
        let code = error["status"]
            .as_str()
            .map(Code::from_status)
            .unwrap_or_else(|| Code::from_http(status));
        let message = error["message"]
            .as_str()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("HTTP {}", status));
        Err(DocumentError::Status { code, message })
    }
}

#[async_trait]
impl DocumentRef for RestDocument {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get(&self) -> Result<DocumentSnapshot, DocumentError> {
        let body = self.send(self.inner.http.get(&self.url)).await?;
        if !body.is_object() {
            return Err(DocumentError::Malformed("expected a document object".into()));
        }
        Ok(DocumentSnapshot {
            id: self.id.clone(),
            data: fields_from_json(&body["fields"]),
            update_time: body["updateTime"].as_str().map(str::to_owned),
        })
    }

    async fn set(&self, data: DocumentData) -> Result<(), DocumentError> {
        let body = json!({ "fields": fields_to_json(&data) });
        self.send(self.inner.http.patch(&self.url).json(&body)).await?;
        Ok(())
    }

    async fn update(&self, data: DocumentData, precondition: Precondition) -> Result<(), DocumentError> {
        let mut query: Vec<(&str, String)> = data
            .keys()
            .map(|name| ("updateMask.fieldPaths", name.clone()))
            .collect();
        match precondition {
            Precondition::None => {}
            Precondition::Exists => query.push(("currentDocument.exists", "true".into())),
            Precondition::UpdateTime(ts) => query.push(("currentDocument.updateTime", ts)),
        }

        let body = json!({ "fields": fields_to_json(&data) });
        self.send(self.inner.http.patch(&self.url).query(&query).json(&body))
            .await?;
        Ok(())
    }

    async fn delete(&self) -> Result<(), DocumentError> {
        match self.send(self.inner.http.delete(&self.url)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
