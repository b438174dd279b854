//! Mapping tables between background event and CloudEvent vocabularies.
//!
//! All tables are ordered slices. Lookups take the first match, which is
//! what makes the reverse (CloudEvent to background) direction well defined
//! when several legacy names map onto one CloudEvent type.

use regex::Regex;
use std::sync::LazyLock;

pub const FIREBASE_AUTH_SERVICE: &str = "firebaseauth.googleapis.com";
pub const FIREBASE_SERVICE: &str = "firebase.googleapis.com";
pub const FIREBASE_DB_SERVICE: &str = "firebasedatabase.googleapis.com";
pub const FIRESTORE_SERVICE: &str = "firestore.googleapis.com";
pub const PUBSUB_SERVICE: &str = "pubsub.googleapis.com";
pub const STORAGE_SERVICE: &str = "storage.googleapis.com";

/// `(background event type, CloudEvent type)`, preferred legacy name first.
pub const EVENT_TYPES: &[(&str, &str)] = &[
    ("google.pubsub.topic.publish", "google.cloud.pubsub.topic.v1.messagePublished"),
    ("providers/cloud.pubsub/eventTypes/topic.publish", "google.cloud.pubsub.topic.v1.messagePublished"),
    ("google.storage.object.finalize", "google.cloud.storage.object.v1.finalized"),
    ("google.storage.object.delete", "google.cloud.storage.object.v1.deleted"),
    ("google.storage.object.archive", "google.cloud.storage.object.v1.archived"),
    ("google.storage.object.metadataUpdate", "google.cloud.storage.object.v1.metadataUpdated"),
    ("providers/cloud.storage/eventTypes/object.change", "google.cloud.storage.object.v1.finalized"),
    ("providers/cloud.firestore/eventTypes/document.write", "google.cloud.firestore.document.v1.written"),
    ("providers/cloud.firestore/eventTypes/document.create", "google.cloud.firestore.document.v1.created"),
    ("providers/cloud.firestore/eventTypes/document.update", "google.cloud.firestore.document.v1.updated"),
    ("providers/cloud.firestore/eventTypes/document.delete", "google.cloud.firestore.document.v1.deleted"),
    ("providers/firebase.auth/eventTypes/user.create", "google.firebase.auth.user.v1.created"),
    ("providers/firebase.auth/eventTypes/user.delete", "google.firebase.auth.user.v1.deleted"),
    ("providers/google.firebase.analytics/eventTypes/event.log", "google.firebase.analytics.log.v1.written"),
    ("providers/google.firebase.database/eventTypes/ref.create", "google.firebase.database.ref.v1.created"),
    ("providers/google.firebase.database/eventTypes/ref.write", "google.firebase.database.ref.v1.written"),
    ("providers/google.firebase.database/eventTypes/ref.update", "google.firebase.database.ref.v1.updated"),
    ("providers/google.firebase.database/eventTypes/ref.delete", "google.firebase.database.ref.v1.deleted"),
];

/// `(background event type prefix, CloudEvent service)`.
pub const SERVICE_PREFIXES: &[(&str, &str)] = &[
    ("providers/cloud.firestore/", FIRESTORE_SERVICE),
    ("providers/google.firebase.analytics/", FIREBASE_SERVICE),
    ("providers/firebase.auth/", FIREBASE_AUTH_SERVICE),
    ("providers/google.firebase.database/", FIREBASE_DB_SERVICE),
    ("providers/cloud.pubsub/", PUBSUB_SERVICE),
    ("providers/cloud.storage/", STORAGE_SERVICE),
    ("google.pubsub", PUBSUB_SERVICE),
    ("google.storage", STORAGE_SERVICE),
];

/// Firebase Auth user metadata fields renamed on the way to a CloudEvent.
pub const FIREBASE_AUTH_METADATA_FIELDS: &[(&str, &str)] = &[
    ("createdAt", "createTime"),
    ("lastSignedInAt", "lastSignInTime"),
];

/// Per-service patterns splitting a resource path into `(resource, subject)`.
/// Every pattern has exactly two capture groups.
static RESOURCE_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        (FIREBASE_SERVICE, r"^(projects/[^/]+)/(events/[^/]+)$"),
        (FIREBASE_DB_SERVICE, r"^projects/_/(instances/[^/]+)/(refs/.+)$"),
        (FIRESTORE_SERVICE, r"^(projects/[^/]+/databases/\(default\))/(documents/.+)$"),
        (STORAGE_SERVICE, r"^(projects/_/buckets/[^/]+)/(objects/.+)$"),
    ]
    .into_iter()
    .map(|(service, pattern)| (service, Regex::new(pattern).expect("resource pattern compiles")))
    .collect()
});

/// Look up the CloudEvent type for a background event type.
pub fn cloud_event_type(background_type: &str) -> Option<&'static str> {
    EVENT_TYPES
        .iter()
        .find(|(bg, _)| *bg == background_type)
        .map(|(_, ce)| *ce)
}

/// Look up the preferred background event type for a CloudEvent type.
pub fn background_event_type(cloud_event_type: &str) -> Option<&'static str> {
    EVENT_TYPES
        .iter()
        .find(|(_, ce)| *ce == cloud_event_type)
        .map(|(bg, _)| *bg)
}

/// Infer the CloudEvent service from a background event type by prefix.
pub fn service_for_event_type(background_type: &str) -> Option<&'static str> {
    SERVICE_PREFIXES
        .iter()
        .find(|(prefix, _)| background_type.starts_with(prefix))
        .map(|(_, service)| *service)
}

/// The resource-splitting pattern for `service`, if it has one.
pub fn resource_pattern(service: &str) -> Option<&'static Regex> {
    RESOURCE_PATTERNS
        .iter()
        .find(|(s, _)| *s == service)
        .map(|(_, re)| re)
}
