//! Background (legacy) event envelopes and their classification.
//!
//! A background event is `{"context": {...}, "data": ...}`, or the same
//! metadata fields inlined at the top level next to `data`. Legacy Pub/Sub
//! push bodies are also accepted and rebuilt into that shape.

use super::pubsub::{extract_topic_from_request_path, LegacyPushEvent};
use super::EventError;
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

/// Event metadata carried by background events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, deserialize_with = "null_as_default")]
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
}

/// The resource an event refers to.
///
/// On the wire this is either an object or, for older event types, a bare
/// path string, kept in `raw_path`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    pub service: String,
    pub name: String,
    pub resource_type: String,
    pub raw_path: String,
}

impl Resource {
    /// A resource given as a bare path string.
    pub fn raw(path: impl Into<String>) -> Self {
        Self {
            raw_path: path.into(),
            ..Default::default()
        }
    }

    /// The resource name, falling back to the raw path.
    pub fn name_or_path(&self) -> &str {
        if self.name.is_empty() {
            &self.raw_path
        } else {
            &self.name
        }
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Path(String),
            Object {
                #[serde(default)]
                service: Option<String>,
                #[serde(default)]
                name: Option<String>,
                #[serde(default, rename = "type")]
                resource_type: Option<String>,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Path(path) => Resource::raw(path),
            Repr::Object {
                service,
                name,
                resource_type,
            } => Resource {
                service: service.unwrap_or_default(),
                name: name.unwrap_or_default(),
                resource_type: resource_type.unwrap_or_default(),
                raw_path: String::new(),
            },
        })
    }
}

impl Serialize for Resource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if !self.raw_path.is_empty() && self.name.is_empty() && self.service.is_empty() {
            return serializer.serialize_str(&self.raw_path);
        }
        let mut map = serializer.serialize_map(None)?;
        if !self.service.is_empty() {
            map.serialize_entry("service", &self.service)?;
        }
        if !self.name.is_empty() {
            map.serialize_entry("name", &self.name)?;
        }
        if !self.resource_type.is_empty() {
            map.serialize_entry("type", &self.resource_type)?;
        }
        map.end()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A classified background event.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundEvent {
    pub metadata: Metadata,
    pub data: Value,
    /// Top-level `domain` field sent with Firebase Realtime Database events.
    pub domain: Option<String>,
}

impl BackgroundEvent {
    /// Encode as a context-wrapped envelope.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        let mut envelope = Map::new();
        envelope.insert("context".to_string(), serde_json::to_value(&self.metadata)?);
        envelope.insert("data".to_string(), self.data.clone());
        if let Some(domain) = &self.domain {
            envelope.insert("domain".to_string(), Value::String(domain.clone()));
        }
        Ok(Value::Object(envelope))
    }
}

type Classifier = fn(&Map<String, Value>, &str) -> Result<Option<BackgroundEvent>, EventError>;

/// Classify a request body as a background event.
///
/// Returns `Ok(None)` when the body is well-formed JSON but not a background
/// event; only malformed JSON (or a recognised envelope with invalid fields)
/// is an error. Classifiers run in order and the first match wins.
pub fn get_background_event(
    body: &[u8],
    url_path: &str,
) -> Result<Option<BackgroundEvent>, EventError> {
    let value: Value = serde_json::from_slice(body).map_err(EventError::MalformedJson)?;
    let Value::Object(fields) = value else {
        return Ok(None);
    };

    let classifiers: [Classifier; 3] = [legacy_pubsub, context_envelope, flat_envelope];
    for classify in classifiers {
        if let Some(event) = classify(&fields, url_path)? {
            return Ok(Some(event));
        }
    }
    Ok(None)
}

fn present<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|v| !v.is_null())
}

fn domain(fields: &Map<String, Value>) -> Option<String> {
    present(fields, "domain")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn legacy_pubsub(
    fields: &Map<String, Value>,
    url_path: &str,
) -> Result<Option<BackgroundEvent>, EventError> {
    if fields.contains_key("data") || fields.contains_key("context") {
        return Ok(None);
    }
    if !fields.contains_key("message") && !fields.contains_key("subscription") {
        return Ok(None);
    }

    let event: LegacyPushEvent = serde_json::from_value(Value::Object(fields.clone()))
        .map_err(EventError::MalformedJson)?;
    let topic = extract_topic_from_request_path(url_path).unwrap_or_else(|err| {
        warn!("{}", err);
        String::new()
    });
    Ok(Some(event.to_background_event(&topic)))
}

fn context_envelope(
    fields: &Map<String, Value>,
    _url_path: &str,
) -> Result<Option<BackgroundEvent>, EventError> {
    let (Some(data), Some(context)) = (present(fields, "data"), present(fields, "context")) else {
        return Ok(None);
    };
    let metadata: Metadata =
        serde_json::from_value(context.clone()).map_err(EventError::MalformedJson)?;
    Ok(Some(BackgroundEvent {
        metadata,
        data: data.clone(),
        domain: domain(fields),
    }))
}

fn flat_envelope(
    fields: &Map<String, Value>,
    _url_path: &str,
) -> Result<Option<BackgroundEvent>, EventError> {
    let Some(data) = present(fields, "data") else {
        return Ok(None);
    };
    let metadata: Metadata = serde_json::from_value(Value::Object(fields.clone()))
        .map_err(EventError::MalformedJson)?;
    if metadata.event_id.is_empty() {
        return Ok(None);
    }
    Ok(Some(BackgroundEvent {
        metadata,
        data: data.clone(),
        domain: domain(fields),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(s: &str) -> Option<DateTime<Utc>> {
        Some(DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc))
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(matches!(
            get_background_event(b"{bad json", ""),
            Err(EventError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_not_a_background_event() {
        assert_eq!(get_background_event(br#"{"random": "x"}"#, "").unwrap(), None);
        assert_eq!(get_background_event(br#"[1, 2]"#, "").unwrap(), None);
        assert_eq!(
            get_background_event(br#"{"data": {"data": "abc"}}"#, "").unwrap(),
            None
        );
        assert_eq!(
            get_background_event(br#"{"data": null, "eventId": "1"}"#, "").unwrap(),
            None
        );
    }

    #[test]
    fn test_context_wrapped_event() {
        let body = br#"{
            "context": {
                "eventId": "1144231683168617",
                "timestamp": "2020-05-18T12:13:19.209Z",
                "eventType": "google.pubsub.topic.publish",
                "resource": {
                    "service": "pubsub.googleapis.com",
                    "name": "projects/sample-project/topics/gcf-test",
                    "type": "type.googleapis.com/google.pubsub.v1.PubsubMessage"
                }
            },
            "data": {"data": "dGVzdCBtZXNzYWdlIDM="}
        }"#;
        let event = get_background_event(body, "").unwrap().unwrap();
        assert_eq!(
            event.metadata,
            Metadata {
                event_id: "1144231683168617".to_string(),
                timestamp: ts("2020-05-18T12:13:19.209Z"),
                event_type: "google.pubsub.topic.publish".to_string(),
                resource: Some(Resource {
                    service: "pubsub.googleapis.com".to_string(),
                    name: "projects/sample-project/topics/gcf-test".to_string(),
                    resource_type: "type.googleapis.com/google.pubsub.v1.PubsubMessage"
                        .to_string(),
                    raw_path: String::new(),
                }),
            }
        );
        assert_eq!(event.data, json!({"data": "dGVzdCBtZXNzYWdlIDM="}));
    }

    #[test]
    fn test_flat_event_with_raw_resource() {
        let body = br#"{
            "eventId": "1215011316659232",
            "timestamp": "2020-05-18T12:13:19.209Z",
            "eventType": "providers/cloud.pubsub/eventTypes/topic.publish",
            "resource": "projects/sample-project/topics/gcf-test",
            "data": {"data": "VGhpcyBpcyBhIHNhbXBsZSBtZXNzYWdl"}
        }"#;
        let event = get_background_event(body, "").unwrap().unwrap();
        assert_eq!(event.metadata.event_id, "1215011316659232");
        assert_eq!(
            event.metadata.resource,
            Some(Resource::raw("projects/sample-project/topics/gcf-test"))
        );
        assert_eq!(event.data, json!({"data": "VGhpcyBpcyBhIHNhbXBsZSBtZXNzYWdl"}));
    }

    #[test]
    fn test_raw_pubsub_push_event() {
        let body = br#"{
            "subscription": "projects/FOO/subscriptions/BAR_SUB",
            "message": {
                "data": "eyJmb28iOiJiYXIifQ==",
                "messageId": "1",
                "attributes": {"test": "123"}
            }
        }"#;
        let event = get_background_event(body, "/projects/sample-project/topics/gcf-test")
            .unwrap()
            .unwrap();
        assert_eq!(event.metadata.event_id, "1");
        assert_eq!(event.metadata.event_type, "google.pubsub.topic.publish");
        assert_eq!(
            event.metadata.resource.as_ref().unwrap().name,
            "projects/sample-project/topics/gcf-test"
        );

        let event = get_background_event(body, "/").unwrap().unwrap();
        assert_eq!(event.metadata.resource.unwrap().name, "");
    }

    #[test]
    fn test_zero_timestamp_is_kept() {
        let body = br#"{
            "eventId": "1",
            "timestamp": "0001-01-01T00:00:00Z",
            "eventType": "google.storage.object.finalize",
            "data": {}
        }"#;
        let event = get_background_event(body, "").unwrap().unwrap();
        assert_eq!(event.metadata.timestamp, ts("0001-01-01T00:00:00Z"));
    }

    #[test]
    fn test_resource_serializes_back_to_its_wire_shape() {
        assert_eq!(
            serde_json::to_value(Resource::raw("projects/p/topics/t")).unwrap(),
            json!("projects/p/topics/t")
        );
        let resource = Resource {
            service: "storage.googleapis.com".to_string(),
            name: "projects/_/buckets/b".to_string(),
            resource_type: "storage#object".to_string(),
            raw_path: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&resource).unwrap(),
            json!({"service": "storage.googleapis.com", "name": "projects/_/buckets/b", "type": "storage#object"})
        );
    }
}
