//! # Events
//!
//! Caller supplied event payloads are stored nearly verbatim in `events`.
//!
//! ## Enrichment
//! - `id`: store generated, also the document id
//! - `images`, `registeredUsers`: empty lists unless the caller sent them
//! - `createdAt`, `updatedAt`: server timestamps
//! - `start_datetime`, `end_datetime`: stored as timestamps when they parse as
//!   ISO-8601, otherwise kept as the original string
use serde_json::{Map, Value};
use tracing::info;

use crate::{
    database::{DocumentStore, FieldValue, Fields},
    error::AppError::{self, MalformedPayload, MissingPayload},
    utils::parse_optional_timestamp,
};

pub const EVENTS_COLLECTION: &str = "events";
pub const DATE_FIELDS: [&str; 2] = ["start_datetime", "end_datetime"];
pub const LIST_FIELDS: [&str; 2] = ["images", "registeredUsers"];

pub fn parse_event_payload(body: &[u8]) -> Result<Map<String, Value>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(MissingPayload);
    }

    match serde_json::from_slice::<Value>(body).map_err(|_| MalformedPayload)? {
        Value::Object(payload) if payload.is_empty() => Err(MissingPayload),
        Value::Object(payload) => Ok(payload),
        Value::Null | Value::Bool(false) => Err(MissingPayload),
        Value::Array(items) if items.is_empty() => Err(MissingPayload),
        Value::String(text) if text.is_empty() => Err(MissingPayload),
        Value::Number(n) if n.as_f64() == Some(0.0) => Err(MissingPayload),
        _ => Err(MalformedPayload),
    }
}

pub fn build_event_document(payload: Map<String, Value>, id: &str) -> Fields {
    let mut document: Fields = payload
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(raw) if DATE_FIELDS.contains(&key.as_str()) => {
                    FieldValue::from(parse_optional_timestamp(&raw))
                }
                other => FieldValue::from(other),
            };

            (key, value)
        })
        .collect();

    document.insert("id".to_string(), id.into());
    for field in LIST_FIELDS {
        document
            .entry(field.to_string())
            .or_insert_with(FieldValue::empty_array);
    }
    document.insert("createdAt".to_string(), FieldValue::ServerTimestamp);
    document.insert("updatedAt".to_string(), FieldValue::ServerTimestamp);

    document
}

pub async fn create_event(
    store: &dyn DocumentStore,
    payload: Map<String, Value>,
) -> Result<String, AppError> {
    let id = store.generate_document_id(EVENTS_COLLECTION);
    let document = build_event_document(payload, &id);

    store
        .write_document(EVENTS_COLLECTION, &id, document)
        .await?;
    info!("Created event {id}");

    Ok(id)
}
