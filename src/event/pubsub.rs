//! Legacy Pub/Sub push subscription payloads.
//!
//! Pub/Sub push endpoints receive `{subscription, message}` bodies that do
//! not carry the topic. The topic has to be recovered from the push URL,
//! which is expected to contain `projects/<project>/topics/<topic>`.

use super::background::{BackgroundEvent, Metadata, Resource};
use super::tables::PUBSUB_SERVICE;
use super::EventError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::sync::LazyLock;

pub const PUBSUB_EVENT_TYPE: &str = "google.pubsub.topic.publish";
pub const PUBSUB_MESSAGE_TYPE: &str = "type.googleapis.com/google.pubsub.v1.PubsubMessage";

static TOPIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(projects/[^/?]+/topics/[^/?]+)/*").expect("topic pattern compiles")
});

/// Body of a legacy Pub/Sub push request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegacyPushEvent {
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub message: PubsubMessage,
}

/// A Pub/Sub message as delivered to push endpoints.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    #[serde(default, rename = "messageId")]
    pub id: String,
    #[serde(default, deserialize_with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub attributes: Option<HashMap<String, String>>,
    #[serde(default)]
    pub publish_time: Option<DateTime<Utc>>,
}

fn base64_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = Option::<String>::deserialize(deserializer)?;
    match encoded {
        Some(encoded) => STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom),
        None => Ok(Vec::new()),
    }
}

/// Extract `projects/<project>/topics/<topic>` from a push request path or URL.
pub fn extract_topic_from_request_path(path: &str) -> Result<String, EventError> {
    TOPIC_PATTERN
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| EventError::TopicNotFound(path.to_string()))
}

impl LegacyPushEvent {
    /// Rebuild the background event a Pub/Sub trigger would have delivered.
    ///
    /// An empty `topic` leaves the resource name empty. A missing publish
    /// time is replaced by the current time.
    pub fn to_background_event(&self, topic: &str) -> BackgroundEvent {
        let message = &self.message;
        let timestamp = message.publish_time.unwrap_or_else(Utc::now);
        let data = serde_json::json!({
            "@type": PUBSUB_MESSAGE_TYPE,
            "data": STANDARD.encode(&message.data),
            "attributes": message.attributes,
        });

        BackgroundEvent {
            metadata: Metadata {
                event_id: message.id.clone(),
                timestamp: Some(timestamp),
                event_type: PUBSUB_EVENT_TYPE.to_string(),
                resource: Some(Resource {
                    name: topic.to_string(),
                    resource_type: PUBSUB_MESSAGE_TYPE.to_string(),
                    service: PUBSUB_SERVICE.to_string(),
                    raw_path: String::new(),
                }),
            },
            data,
            domain: None,
        }
    }
}
