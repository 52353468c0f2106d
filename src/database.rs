//! # Document Store
//!
//! Schemaless store addressed by `(collection, document id)`.
//!
//! The backend never owns persisted state. Every handler receives a shared
//! [`DocumentStore`] handle and issues single, independent writes against it.
//!
//! ## Operations
//!
//! - `generate_document_id`: client side auto id, 20 alphanumeric characters
//! - `write_document`: create or overwrite
//! - `create_document`: insert only if the id is free, used for placeholders
//! - `list_documents`: bounded listing, used for existence checks
//!
//! ## Values
//!
//! Documents are [`Fields`], an ordered map of [`FieldValue`]s. Request payloads
//! arrive as arbitrary JSON and are converted wholesale; timestamps and the
//! [`FieldValue::ServerTimestamp`] sentinel are the only values JSON cannot express.
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::utils::auto_id;

pub type Fields = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<FieldValue>),
    Map(Fields),
    /// Resolved by the store to its own clock at write time.
    ServerTimestamp,
}

impl FieldValue {
    pub fn empty_array() -> Self {
        FieldValue::Array(Vec::new())
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => n.as_f64().map_or(FieldValue::Null, FieldValue::Double),
            },
            Value::String(s) => FieldValue::String(s),
            Value::Array(items) => {
                FieldValue::Array(items.into_iter().map(FieldValue::from).collect())
            }
            Value::Object(map) => FieldValue::Map(
                map.into_iter()
                    .map(|(key, value)| (key, FieldValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Fields,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Request to document store failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Document store rejected request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("Failed to sign access token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Malformed document store response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn generate_document_id(&self, _collection: &str) -> String {
        auto_id()
    }

    async fn write_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError>;

    /// Returns `false` without writing when `id` already exists.
    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<bool, StoreError>;

    async fn list_documents(
        &self,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, StoreError>;
}

/// In-process store. Server timestamps resolve to the wall clock.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Fields>>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, collection: &str, id: &str) -> Option<Fields> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned()
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Number of documents written since creation, overwrites included.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn write_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        let resolved = resolve_server_timestamps(fields, Utc::now());

        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), resolved);
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();

        if documents.contains_key(id) {
            return Ok(false);
        }

        documents.insert(
            id.to_string(),
            resolve_server_timestamps(fields, Utc::now()),
        );
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(true)
    }

    async fn list_documents(
        &self,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let collections = self.collections.read().await;

        Ok(collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .take(limit)
                    .map(|(id, fields)| StoredDocument {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn resolve_server_timestamps(fields: Fields, now: DateTime<Utc>) -> Fields {
    fields
        .into_iter()
        .map(|(key, value)| (key, resolve_value(value, now)))
        .collect()
}

fn resolve_value(value: FieldValue, now: DateTime<Utc>) -> FieldValue {
    match value {
        FieldValue::ServerTimestamp => FieldValue::Timestamp(now),
        FieldValue::Map(fields) => FieldValue::Map(resolve_server_timestamps(fields, now)),
        FieldValue::Array(items) => FieldValue::Array(
            items
                .into_iter()
                .map(|item| resolve_value(item, now))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_numbers_keep_integer_precision() {
        assert_eq!(FieldValue::from(json!(42)), FieldValue::Integer(42));
        assert_eq!(FieldValue::from(json!(1.5)), FieldValue::Double(1.5));
        assert_eq!(
            FieldValue::from(json!(u64::MAX)),
            FieldValue::Double(u64::MAX as f64)
        );
    }

    #[test]
    fn nested_json_becomes_maps_and_arrays() {
        let value = FieldValue::from(json!({"tags": ["a", null], "geo": {"lat": 1}}));

        let FieldValue::Map(fields) = value else {
            panic!("expected map");
        };
        assert_eq!(
            fields["tags"],
            FieldValue::Array(vec![FieldValue::from("a"), FieldValue::Null])
        );
        assert_eq!(
            fields["geo"],
            FieldValue::Map(Fields::from([("lat".to_string(), FieldValue::Integer(1))]))
        );
    }

    #[tokio::test]
    async fn memory_store_resolves_server_timestamps() {
        let store = MemoryStore::new();
        let fields = Fields::from([
            ("createdAt".to_string(), FieldValue::ServerTimestamp),
            (
                "nested".to_string(),
                FieldValue::Map(Fields::from([(
                    "at".to_string(),
                    FieldValue::ServerTimestamp,
                )])),
            ),
        ]);

        store.write_document("users", "u1", fields).await.unwrap();

        let stored = store.get("users", "u1").await.unwrap();
        assert!(stored["createdAt"].as_timestamp().is_some());
        let FieldValue::Map(nested) = &stored["nested"] else {
            panic!("expected map");
        };
        assert!(nested["at"].as_timestamp().is_some());
    }

    #[tokio::test]
    async fn memory_store_create_refuses_existing_ids() {
        let store = MemoryStore::new();
        let fields = Fields::from([("n".to_string(), FieldValue::Integer(1))]);

        assert!(store.create_document("c", "x", fields.clone()).await.unwrap());
        assert!(!store.create_document("c", "x", Fields::new()).await.unwrap());

        assert_eq!(store.get("c", "x").await, Some(fields));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn memory_store_lists_up_to_limit() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store.write_document("c", id, Fields::new()).await.unwrap();
        }

        assert_eq!(store.list_documents("c", 2).await.unwrap().len(), 2);
        assert!(store.list_documents("missing", 1).await.unwrap().is_empty());
    }
}
