//! # Collections
//!
//! The client assumes a handful of collections exist. Firestore only has a
//! collection once it holds a document, so these helpers keep at least one
//! document in each.
//!
//! ## Seed
//! Overwrites one fixed sample document per collection. Safe to rerun, each run
//! refreshes the timestamps.
//!
//! ## Ensure
//! Inserts a placeholder into every required collection that is empty. The
//! placeholder has a fixed id and is written insert-only, so concurrent calls
//! never leave more than one.
use tracing::info;

use crate::{
    database::{DocumentStore, FieldValue, Fields},
    error::AppError,
    events::EVENTS_COLLECTION,
};

pub const USERS_COLLECTION: &str = "users";
pub const CHAT_MESSAGES_COLLECTION: &str = "chatMessages";
pub const NOTIFICATIONS_COLLECTION: &str = "notifications";
pub const EVENT_REGISTRATIONS_COLLECTION: &str = "eventRegistrations";

pub const REQUIRED_COLLECTIONS: [&str; 5] = [
    EVENTS_COLLECTION,
    USERS_COLLECTION,
    CHAT_MESSAGES_COLLECTION,
    NOTIFICATIONS_COLLECTION,
    EVENT_REGISTRATIONS_COLLECTION,
];

pub const PLACEHOLDER_ID: &str = "_placeholder";

const SAMPLE_USER_ID: &str = "sample-user";
const SAMPLE_EVENT_ID: &str = "sample-event";

pub struct SampleDocument {
    pub collection: &'static str,
    pub id: &'static str,
    pub fields: Fields,
}

fn document<const N: usize>(entries: [(&str, FieldValue); N]) -> Fields {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

pub fn sample_documents() -> [SampleDocument; 4] {
    [
        SampleDocument {
            collection: USERS_COLLECTION,
            id: SAMPLE_USER_ID,
            fields: document([
                ("uid", SAMPLE_USER_ID.into()),
                ("email", "user@example.com".into()),
                ("displayName", "Sample User".into()),
                ("role", "user".into()),
                ("createdAt", FieldValue::ServerTimestamp),
                ("updatedAt", FieldValue::ServerTimestamp),
            ]),
        },
        SampleDocument {
            collection: CHAT_MESSAGES_COLLECTION,
            id: "sample-msg",
            fields: document([
                ("id", "sample-msg".into()),
                ("eventId", SAMPLE_EVENT_ID.into()),
                ("senderUid", SAMPLE_USER_ID.into()),
                ("text", "Hello world".into()),
                ("timestamp", FieldValue::ServerTimestamp),
            ]),
        },
        SampleDocument {
            collection: NOTIFICATIONS_COLLECTION,
            id: "sample-notif",
            fields: document([
                ("id", "sample-notif".into()),
                ("userId", SAMPLE_USER_ID.into()),
                ("title", "Welcome".into()),
                ("body", "This is a sample notification".into()),
                ("createdAt", FieldValue::ServerTimestamp),
                ("read", false.into()),
            ]),
        },
        SampleDocument {
            collection: EVENT_REGISTRATIONS_COLLECTION,
            id: "sample-reg",
            fields: document([
                ("id", "sample-reg".into()),
                ("eventId", SAMPLE_EVENT_ID.into()),
                ("userUid", SAMPLE_USER_ID.into()),
                ("status", "registered".into()),
                ("registeredAt", FieldValue::ServerTimestamp),
            ]),
        },
    ]
}

pub fn placeholder_document() -> Fields {
    document([
        ("_placeholder", true.into()),
        ("createdAt", FieldValue::ServerTimestamp),
    ])
}

/// Writes are independent; a failure part way leaves earlier samples in place.
pub async fn seed(store: &dyn DocumentStore) -> Result<(), AppError> {
    for sample in sample_documents() {
        store
            .write_document(sample.collection, sample.id, sample.fields)
            .await?;
        info!("Seeded {}/{}", sample.collection, sample.id);
    }

    Ok(())
}

/// Returns the collections that received a placeholder, in order.
pub async fn ensure_collections(store: &dyn DocumentStore) -> Result<Vec<String>, AppError> {
    let mut created = Vec::new();

    for collection in REQUIRED_COLLECTIONS {
        if !store.list_documents(collection, 1).await?.is_empty() {
            continue;
        }

        if store
            .create_document(collection, PLACEHOLDER_ID, placeholder_document())
            .await?
        {
            info!("Created placeholder in {collection}");
            created.push(collection.to_string());
        }
    }

    Ok(created)
}
