//! # Firestore
//!
//! [`DocumentStore`] backed by the Firestore REST API.
//!
//! ## Auth
//!
//! The service account key signs its own RS256 JWT with the Firestore API as
//! audience. Google accepts that JWT directly as a bearer token, so there is no
//! OAuth exchange. Tokens live an hour and are re-minted five minutes early.
//!
//! ## Writes
//!
//! All writes go through `documents:commit`:
//! - `update` without a mask replaces the whole document, same as `set()`
//! - every [`FieldValue::ServerTimestamp`] becomes a `REQUEST_TIME` field transform
//! - inserts carry the `currentDocument.exists = false` precondition
//!
//! ## Commands
//!
//! Inspect a collection by hand.
//! ```sh
//! curl -H "Authorization: Bearer $TOKEN" \
//!   https://firestore.googleapis.com/v1/projects/$PROJECT/databases/(default)/documents/events?pageSize=1
//! ```
use std::{fs::read_to_string, path::Path};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::database::{DocumentStore, FieldValue, Fields, StoreError, StoredDocument};

const FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";
const TOKEN_AUDIENCE: &str = "https://firestore.googleapis.com/";
const TOKEN_LIFETIME_SECS: i64 = 60 * 60;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

#[derive(Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
}

impl ServiceAccount {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = read_to_string(path)
            .with_context(|| format!("Failed to read service account {}", path.display()))?;

        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid service account file {}", path.display()))
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

struct AccessToken {
    value: String,
    expires_at: i64,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    documents: Vec<RawDocument>,
}

#[derive(Deserialize)]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

pub struct FirestoreStore {
    client: Client,
    account: ServiceAccount,
    key: EncodingKey,
    base_url: String,
    documents_path: String,
    token: Mutex<Option<AccessToken>>,
}

impl FirestoreStore {
    pub fn new(account: ServiceAccount, database: &str) -> Result<Self, StoreError> {
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())?;
        let client = Client::builder().build()?;
        let documents_path = format!(
            "projects/{}/databases/{}/documents",
            account.project_id, database
        );

        Ok(Self {
            client,
            account,
            key,
            base_url: FIRESTORE_URL.to_string(),
            documents_path,
            token: Mutex::new(None),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.account.project_id
    }

    async fn bearer(&self) -> Result<String, StoreError> {
        let now = Utc::now().timestamp();
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at - TOKEN_REFRESH_MARGIN_SECS > now {
                return Ok(token.value.clone());
            }
        }

        let claims = Claims {
            iss: &self.account.client_email,
            sub: &self.account.client_email,
            aud: TOKEN_AUDIENCE,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.account.private_key_id.clone();

        let value = encode(&header, &claims, &self.key)?;
        debug!("Minted Firestore access token");

        *cached = Some(AccessToken {
            value: value.clone(),
            expires_at: claims.exp,
        });

        Ok(value)
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.documents_path, collection, id)
    }

    async fn commit(&self, write: Value) -> Result<Response, StoreError> {
        let url = format!("{}/{}:commit", self.base_url, self.documents_path);

        let response = self
            .client
            .post(url)
            .bearer_auth(self.bearer().await?)
            .json(&json!({ "writes": [write] }))
            .send()
            .await?;

        Ok(response)
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn write_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        let write = encode_write(&self.document_name(collection, id), &fields, false);
        let response = self.commit(write).await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        Ok(())
    }

    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<bool, StoreError> {
        let write = encode_write(&self.document_name(collection, id), &fields, true);
        let response = self.commit(write).await?;

        if response.status().is_success() {
            return Ok(true);
        }

        match rejection(response).await {
            StoreError::Rejected { status, message } if is_already_exists(status, &message) => {
                debug!("{collection}/{id} already exists, skipping insert");
                Ok(false)
            }
            err => Err(err),
        }
    }

    async fn list_documents(
        &self,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let url = format!("{}/{}/{}", self.base_url, self.documents_path, collection);

        let response = self
            .client
            .get(url)
            .bearer_auth(self.bearer().await?)
            .query(&[("pageSize", limit)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let listing: ListResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        listing.documents.into_iter().map(decode_document).collect()
    }
}

async fn rejection(response: Response) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody { error }) if !error.status.is_empty() => {
            format!("{}: {}", error.status, error.message)
        }
        Ok(ErrorBody { error }) => error.message,
        Err(_) => body,
    };

    StoreError::Rejected { status, message }
}

fn is_already_exists(status: StatusCode, message: &str) -> bool {
    status == StatusCode::CONFLICT || message.starts_with("ALREADY_EXISTS")
}

/// Builds one `Write` for `documents:commit`.
fn encode_write(name: &str, fields: &Fields, must_not_exist: bool) -> Value {
    let mut transforms = Vec::new();
    let encoded = encode_fields(fields, &[], &mut transforms);

    let mut write = Map::new();
    write.insert(
        "update".to_string(),
        json!({ "name": name, "fields": encoded }),
    );

    if !transforms.is_empty() {
        let transforms: Vec<Value> = transforms
            .into_iter()
            .map(|path| json!({ "fieldPath": path, "setToServerValue": "REQUEST_TIME" }))
            .collect();
        write.insert("updateTransforms".to_string(), Value::Array(transforms));
    }

    if must_not_exist {
        write.insert("currentDocument".to_string(), json!({ "exists": false }));
    }

    Value::Object(write)
}

fn encode_fields(fields: &Fields, parent: &[&str], transforms: &mut Vec<String>) -> Value {
    let mut encoded = Map::new();

    for (key, value) in fields {
        let mut path = parent.to_vec();
        path.push(key.as_str());

        match value {
            FieldValue::ServerTimestamp => transforms.push(field_path(&path)),
            FieldValue::Map(inner) => {
                encoded.insert(
                    key.clone(),
                    json!({ "mapValue": { "fields": encode_fields(inner, &path, transforms) } }),
                );
            }
            other => {
                encoded.insert(key.clone(), encode_value(other));
            }
        }
    }

    Value::Object(encoded)
}

fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => json!({ "nullValue": null }),
        FieldValue::Bool(b) => json!({ "booleanValue": b }),
        FieldValue::Integer(i) => json!({ "integerValue": i.to_string() }),
        FieldValue::Double(d) => json!({ "doubleValue": d }),
        FieldValue::String(s) => json!({ "stringValue": s }),
        FieldValue::Timestamp(t) => {
            json!({ "timestampValue": t.to_rfc3339_opts(SecondsFormat::AutoSi, true) })
        }
        FieldValue::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        FieldValue::Map(fields) => {
            let encoded: Map<String, Value> = fields
                .iter()
                .map(|(key, value)| (key.clone(), encode_value(value)))
                .collect();
            json!({ "mapValue": { "fields": encoded } })
        }
        // Firestore has no server timestamps inside arrays
        FieldValue::ServerTimestamp => {
            warn!("Server timestamp outside a map field, storing null");
            json!({ "nullValue": null })
        }
    }
}

/// Dotted field path, backquoting segments that are not plain identifiers.
fn field_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|segment| {
            let mut chars = segment.chars();
            let simple = chars
                .next()
                .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
                && chars.all(|c| c == '_' || c.is_ascii_alphanumeric());

            if simple {
                segment.to_string()
            } else {
                let escaped = segment.replace('\\', "\\\\").replace('`', "\\`");
                format!("`{escaped}`")
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn decode_document(raw: RawDocument) -> Result<StoredDocument, StoreError> {
    let id = raw
        .name
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StoreError::Decode(format!("Bad document name {}", raw.name)))?
        .to_string();

    Ok(StoredDocument {
        id,
        fields: decode_fields(raw.fields)?,
    })
}

fn decode_fields(fields: Map<String, Value>) -> Result<Fields, StoreError> {
    fields
        .into_iter()
        .map(|(key, value)| Ok((key, decode_value(value)?)))
        .collect()
}

fn decode_value(value: Value) -> Result<FieldValue, StoreError> {
    let Value::Object(typed) = value else {
        return Err(StoreError::Decode(format!("Untyped value {value}")));
    };
    let Some((kind, inner)) = typed.into_iter().next() else {
        return Err(StoreError::Decode("Empty value".to_string()));
    };

    let decoded = match (kind.as_str(), inner) {
        ("nullValue", _) => FieldValue::Null,
        ("booleanValue", Value::Bool(b)) => FieldValue::Bool(b),
        ("integerValue", Value::String(s)) => s
            .parse()
            .map(FieldValue::Integer)
            .map_err(|e| StoreError::Decode(format!("Bad integerValue {s}: {e}")))?,
        ("integerValue", Value::Number(n)) => n
            .as_i64()
            .map(FieldValue::Integer)
            .ok_or_else(|| StoreError::Decode(format!("Bad integerValue {n}")))?,
        ("doubleValue", Value::Number(n)) => n
            .as_f64()
            .map(FieldValue::Double)
            .ok_or_else(|| StoreError::Decode(format!("Bad doubleValue {n}")))?,
        ("timestampValue", Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|t| FieldValue::Timestamp(t.with_timezone(&Utc)))
            .map_err(|e| StoreError::Decode(format!("Bad timestampValue {s}: {e}")))?,
        ("stringValue" | "referenceValue" | "bytesValue", Value::String(s)) => {
            FieldValue::String(s)
        }
        ("geoPointValue", Value::Object(point)) => FieldValue::Map(
            point
                .into_iter()
                .map(|(key, value)| (key, FieldValue::from(value)))
                .collect(),
        ),
        ("mapValue", Value::Object(mut map)) => match map.remove("fields") {
            Some(Value::Object(fields)) => FieldValue::Map(decode_fields(fields)?),
            _ => FieldValue::Map(Fields::new()),
        },
        ("arrayValue", Value::Object(mut array)) => match array.remove("values") {
            Some(Value::Array(values)) => FieldValue::Array(
                values
                    .into_iter()
                    .map(decode_value)
                    .collect::<Result<_, _>>()?,
            ),
            _ => FieldValue::empty_array(),
        },
        (kind, inner) => {
            return Err(StoreError::Decode(format!("Unsupported {kind}: {inner}")));
        }
    };

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn write_turns_server_timestamps_into_transforms() {
        let fields = Fields::from([
            ("title".to_string(), FieldValue::from("Launch")),
            ("createdAt".to_string(), FieldValue::ServerTimestamp),
            (
                "audit".to_string(),
                FieldValue::Map(Fields::from([(
                    "seen at".to_string(),
                    FieldValue::ServerTimestamp,
                )])),
            ),
        ]);

        let write = encode_write(
            "projects/p/databases/(default)/documents/events/e1",
            &fields,
            false,
        );

        assert_eq!(
            write["update"]["fields"],
            json!({
                "title": { "stringValue": "Launch" },
                "audit": { "mapValue": { "fields": {} } },
            })
        );
        assert_eq!(
            write["updateTransforms"],
            json!([
                { "fieldPath": "audit.`seen at`", "setToServerValue": "REQUEST_TIME" },
                { "fieldPath": "createdAt", "setToServerValue": "REQUEST_TIME" },
            ])
        );
        assert!(write.get("currentDocument").is_none());
    }

    #[test]
    fn inserts_carry_missing_precondition() {
        let write = encode_write("n", &Fields::new(), true);

        assert_eq!(write["currentDocument"], json!({ "exists": false }));
        assert!(write.get("updateTransforms").is_none());
    }

    #[test]
    fn values_use_firestore_encoding() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        assert_eq!(encode_value(&FieldValue::Integer(7)), json!({ "integerValue": "7" }));
        assert_eq!(
            encode_value(&FieldValue::Timestamp(at)),
            json!({ "timestampValue": "2024-05-01T10:00:00Z" })
        );
        assert_eq!(
            encode_value(&FieldValue::empty_array()),
            json!({ "arrayValue": { "values": [] } })
        );
    }

    #[test]
    fn field_paths_quote_special_segments() {
        assert_eq!(field_path(&["createdAt"]), "createdAt");
        assert_eq!(field_path(&["_placeholder"]), "_placeholder");
        assert_eq!(field_path(&["a", "1st"]), "a.`1st`");
        assert_eq!(field_path(&["we`ird"]), "`we\\`ird`");
    }

    #[test]
    fn listed_documents_decode() {
        let raw: RawDocument = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/users/sample-user",
            "fields": {
                "role": { "stringValue": "user" },
                "age": { "integerValue": "30" },
                "read": { "booleanValue": false },
                "createdAt": { "timestampValue": "2024-05-01T10:00:00.123456Z" },
                "tags": { "arrayValue": {} },
                "profile": { "mapValue": { "fields": { "bio": { "nullValue": null } } } },
            },
        }))
        .unwrap();

        let document = decode_document(raw).unwrap();

        assert_eq!(document.id, "sample-user");
        assert_eq!(document.fields["role"], FieldValue::from("user"));
        assert_eq!(document.fields["age"], FieldValue::Integer(30));
        assert_eq!(document.fields["read"], FieldValue::Bool(false));
        assert!(document.fields["createdAt"].as_timestamp().is_some());
        assert_eq!(document.fields["tags"], FieldValue::empty_array());
        assert_eq!(
            document.fields["profile"],
            FieldValue::Map(Fields::from([("bio".to_string(), FieldValue::Null)]))
        );
    }

    #[test]
    fn unknown_value_kinds_are_decode_errors() {
        assert!(matches!(
            decode_value(json!({ "mysteryValue": 1 })),
            Err(StoreError::Decode(_))
        ));
    }

    #[test]
    fn conflicts_mean_already_exists() {
        assert!(is_already_exists(StatusCode::CONFLICT, ""));
        assert!(is_already_exists(
            StatusCode::CONFLICT,
            "ALREADY_EXISTS: Document already exists"
        ));
        assert!(!is_already_exists(
            StatusCode::BAD_REQUEST,
            "FAILED_PRECONDITION: The query requires an index"
        ));
        assert!(!is_already_exists(StatusCode::FORBIDDEN, "PERMISSION_DENIED: no"));
    }

    #[test]
    fn service_account_reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"type": "service_account", "project_id": "demo", "client_email": "svc@demo.iam.gserviceaccount.com", "private_key": "pem"}}"#
        )
        .unwrap();

        let account = ServiceAccount::from_file(file.path()).unwrap();

        assert_eq!(account.project_id, "demo");
        assert_eq!(account.private_key_id, None);
    }

    #[test]
    fn malformed_service_account_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();

        assert!(ServiceAccount::from_file(file.path()).is_err());
        assert!(ServiceAccount::from_file(Path::new("/nonexistent/key.json")).is_err());
    }
}
