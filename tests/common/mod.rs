//! Shared fakes for integration tests.
//!
//! - `FakeDynamoTable`: a stateful wiremock responder that behaves like a
//!   single DynamoDB table for the actions the store uses.
//! - `InMemoryDocuments`: an in-process implementation of the document
//!   client seam with Firestore's precondition semantics.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use wiremock::matchers::{header, method};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use ots_store::credentials::AwsCredentials;
use ots_store::record::SecretRecord;
use ots_store::store::dynamo::{DynamoClient, DynamoMetadataStore};
use ots_store::store::firestore_client::{
    Code, CollectionRef, DocumentClient, DocumentData, DocumentError, DocumentRef,
    DocumentSnapshot, FieldValue, Precondition,
};

pub const TABLE: &str = "ots-secrets";
pub const COLLECTION: &str = "secrets";

/// The record used throughout the scenario tests.
pub fn sample_record(secret_id: &str) -> SecretRecord {
    SecretRecord {
        secret_id: secret_id.to_string(),
        view_count: 3,
        data: vec![0x01, 0x02],
        is_file: false,
        nonce: vec![0xAA],
        salt: vec![0xBB],
        header: vec![0xCC],
        ttl: (Utc::now() + chrono::Duration::days(7)).timestamp(),
    }
}

pub fn sample_file_record(secret_id: &str) -> SecretRecord {
    SecretRecord {
        data: (0..=255u8).cycle().take(4096).collect(),
        is_file: true,
        ..sample_record(secret_id)
    }
}

// ── DynamoDB ────────────────────────────────────────────────────

type Items = Arc<Mutex<HashMap<String, Map<String, Value>>>>;

#[derive(Clone, Default)]
pub struct FakeDynamoTable {
    items: Items,
}

fn dynamo_error(code: &str, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_json(json!({
        "__type": format!("com.amazonaws.dynamodb.v20120810#{}", code),
        "message": message,
    }))
}

fn number(value: &Value) -> i64 {
    value["N"]
        .as_str()
        .and_then(|n| n.parse().ok())
        .unwrap_or_default()
}

impl FakeDynamoTable {
    pub fn item(&self, secret_id: &str) -> Option<Map<String, Value>> {
        self.items.lock().unwrap().get(secret_id).cloned()
    }

    /// Overwrite one attribute out-of-band.
    pub fn set_attribute(&self, secret_id: &str, name: &str, value: Value) {
        let mut items = self.items.lock().unwrap();
        let item = items.get_mut(secret_id).expect("item exists");
        item.insert(name.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    fn key_of(body: &Value) -> String {
        body["Key"]["secret_id"]["S"].as_str().unwrap_or_default().to_string()
    }

    fn update_item(&self, body: &Value) -> ResponseTemplate {
        let key = Self::key_of(body);
        let condition = body["ConditionExpression"].as_str().unwrap_or_default();
        let update = body["UpdateExpression"].as_str().unwrap_or_default();
        let values = &body["ExpressionAttributeValues"];

        let mut items = self.items.lock().unwrap();
        let existing = items.get(&key);

        let mut guard_ok = true;
        if condition.contains("attribute_exists(secret_id)") {
            guard_ok &= existing.is_some();
        }
        if let Some(item) = existing {
            if condition.contains("#ttl > :now") {
                guard_ok &= number(&item["ttl"]) > number(&values[":now"]);
            }
            if condition.contains("view_count > :zero") {
                guard_ok &= number(&item["view_count"]) > number(&values[":zero"]);
            }
        }
        if !guard_ok {
            return dynamo_error("ConditionalCheckFailedException", "The conditional request failed");
        }

        // Unguarded UpdateItem upserts a partial item, as DynamoDB does.
        let item = items.entry(key.clone()).or_insert_with(|| {
            let mut partial = Map::new();
            partial.insert("secret_id".into(), json!({ "S": key }));
            partial.insert("view_count".into(), json!({ "N": "0" }));
            partial
        });
        let new_count = if update.contains("view_count - :one") {
            number(&item["view_count"]) - number(&values[":one"])
        } else {
            number(&values[":val"])
        };
        item.insert("view_count".into(), json!({ "N": new_count.to_string() }));

        if body["ReturnValues"] == "UPDATED_NEW" {
            ResponseTemplate::new(200).set_body_json(json!({
                "Attributes": { "view_count": { "N": new_count.to_string() } }
            }))
        } else {
            ResponseTemplate::new(200).set_body_json(json!({}))
        }
    }
}

impl wiremock::Respond for FakeDynamoTable {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let target = request
            .headers
            .get("x-amz-target")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return dynamo_error("SerializationException", "bad body"),
        };
        if body["TableName"] != TABLE {
            return dynamo_error("ResourceNotFoundException", "Requested resource not found");
        }

        match target.trim_start_matches("DynamoDB_20120810.") {
            "PutItem" => {
                let item = body["Item"].as_object().cloned().unwrap_or_default();
                let key = item["secret_id"]["S"].as_str().unwrap_or_default().to_string();
                self.items.lock().unwrap().insert(key, item);
                ResponseTemplate::new(200).set_body_json(json!({}))
            }
            "GetItem" => {
                let key = Self::key_of(&body);
                match self.items.lock().unwrap().get(&key) {
                    Some(item) => ResponseTemplate::new(200).set_body_json(json!({ "Item": item })),
                    None => ResponseTemplate::new(200).set_body_json(json!({})),
                }
            }
            "DeleteItem" => {
                let key = Self::key_of(&body);
                self.items.lock().unwrap().remove(&key);
                ResponseTemplate::new(200).set_body_json(json!({}))
            }
            "UpdateItem" => self.update_item(&body),
            other => dynamo_error("UnknownOperationException", &format!("unsupported {}", other)),
        }
    }
}

pub fn test_credentials() -> AwsCredentials {
    AwsCredentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY")
}

/// A DynamoDB endpoint backed by a fresh fake table.
pub async fn dynamo_server() -> (MockServer, FakeDynamoTable) {
    let server = MockServer::start().await;
    let table = FakeDynamoTable::default();
    Mock::given(method("POST"))
        .and(header("content-type", "application/x-amz-json-1.0"))
        .respond_with(table.clone())
        .mount(&server)
        .await;
    (server, table)
}

pub fn dynamo_store(server: &MockServer) -> DynamoMetadataStore {
    let client = DynamoClient::new("us-east-1", Some(format!("{}/", server.uri())), test_credentials())
        .expect("client builds");
    DynamoMetadataStore::new(Arc::new(client), TABLE)
}

// ── Document store ──────────────────────────────────────────────

struct StoredDocument {
    data: DocumentData,
    version: u64,
}

#[derive(Default)]
struct DocumentState {
    docs: Mutex<HashMap<(String, String), StoredDocument>>,
    clock: AtomicU64,
    /// Updates still to be preceded by a simulated concurrent write.
    contended_updates: AtomicU32,
}

#[derive(Clone, Default)]
pub struct InMemoryDocuments {
    state: Arc<DocumentState>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<DocumentData> {
        self.state
            .docs
            .lock()
            .unwrap()
            .get(&(collection.to_string(), id.to_string()))
            .map(|doc| doc.data.clone())
    }

    pub fn set_field(&self, collection: &str, id: &str, name: &str, value: FieldValue) {
        let mut docs = self.state.docs.lock().unwrap();
        let doc = docs
            .get_mut(&(collection.to_string(), id.to_string()))
            .expect("document exists");
        doc.data.insert(name.to_string(), value);
        doc.version = self.state.clock.fetch_add(1, Ordering::SeqCst) + 1;
    }

    /// Make the next `n` version-guarded updates lose a race against
    /// another writer.
    pub fn contend_next_updates(&self, n: u32) {
        self.state.contended_updates.store(n, Ordering::SeqCst);
    }
}

impl DocumentClient for InMemoryDocuments {
    fn collection(&self, name: &str) -> Box<dyn CollectionRef> {
        Box::new(MemCollection {
            state: self.state.clone(),
            name: name.to_string(),
        })
    }
}

struct MemCollection {
    state: Arc<DocumentState>,
    name: String,
}

impl CollectionRef for MemCollection {
    fn doc(&self, id: &str) -> Box<dyn DocumentRef> {
        Box::new(MemDocument {
            state: self.state.clone(),
            key: (self.name.clone(), id.to_string()),
        })
    }
}

struct MemDocument {
    state: Arc<DocumentState>,
    key: (String, String),
}

impl MemDocument {
    fn tick(&self) -> u64 {
        self.state.clock.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl DocumentRef for MemDocument {
    fn id(&self) -> &str {
        &self.key.1
    }

    async fn get(&self) -> Result<DocumentSnapshot, DocumentError> {
        let docs = self.state.docs.lock().unwrap();
        match docs.get(&self.key) {
            Some(doc) => Ok(DocumentSnapshot {
                id: self.key.1.clone(),
                data: doc.data.clone(),
                update_time: Some(format!("v{}", doc.version)),
            }),
            None => Err(DocumentError::status(Code::NotFound, "no entity to get")),
        }
    }

    async fn set(&self, data: DocumentData) -> Result<(), DocumentError> {
        let version = self.tick();
        self.state
            .docs
            .lock()
            .unwrap()
            .insert(self.key.clone(), StoredDocument { data, version });
        Ok(())
    }

    async fn update(&self, data: DocumentData, precondition: Precondition) -> Result<(), DocumentError> {
        let version = self.tick();
        let mut docs = self.state.docs.lock().unwrap();

        if let Precondition::UpdateTime(_) = precondition {
            let contended = self
                .state
                .contended_updates
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if contended {
                if let Some(doc) = docs.get_mut(&self.key) {
                    doc.version = self.state.clock.fetch_add(1, Ordering::SeqCst) + 1;
                }
            }
        }

        match (&precondition, docs.get(&self.key)) {
            (Precondition::Exists, None) | (Precondition::UpdateTime(_), None) => {
                return Err(DocumentError::status(Code::NotFound, "no entity to update"));
            }
            (Precondition::UpdateTime(expected), Some(doc))
                if *expected != format!("v{}", doc.version) =>
            {
                return Err(DocumentError::status(
                    Code::FailedPrecondition,
                    "the stored version does not match the required base version",
                ));
            }
            _ => {}
        }

        let doc = docs.entry(self.key.clone()).or_insert_with(|| StoredDocument {
            data: DocumentData::new(),
            version,
        });
        doc.data.extend(data);
        doc.version = version;
        Ok(())
    }

    async fn delete(&self) -> Result<(), DocumentError> {
        self.state.docs.lock().unwrap().remove(&self.key);
        Ok(())
    }
}
