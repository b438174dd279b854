//! Conversion between background events and CloudEvents.

use super::background::{get_background_event, BackgroundEvent, Metadata, Resource};
use super::cloudevent::{format_time, CloudEvent, JSON_CONTENT_TYPE, STRUCTURED_CONTENT_TYPE};
use super::pubsub::PUBSUB_MESSAGE_TYPE;
use super::tables::{
    background_event_type, cloud_event_type, resource_pattern, service_for_event_type,
    FIREBASE_AUTH_METADATA_FIELDS, FIREBASE_AUTH_SERVICE, FIREBASE_DB_SERVICE, PUBSUB_SERVICE,
    STORAGE_SERVICE,
};
use super::EventError;
use crate::http::FunctionRequest;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

const DEFAULT_FIREBASE_DB_DOMAIN: &str = "firebaseio.com";
const DEFAULT_FIREBASE_DB_LOCATION: &str = "us-central1";
const LEGACY_EVENT_TYPE_PREFIX: &str = "providers/";

static FIREBASE_DB_DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w-]+)\.firebasedatabase\.app$").expect("domain pattern compiles")
});

static FIREBASE_DB_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^projects/_/locations/([^/]+)/(instances/[^/]+)$")
        .expect("source pattern compiles")
});

/// Split a background resource path into a CloudEvent resource and subject.
///
/// Services without a pattern pass the resource through with no subject.
pub fn split_resource(service: &str, resource: &str) -> Result<(String, String), EventError> {
    let Some(pattern) = resource_pattern(service) else {
        return Ok((resource.to_string(), String::new()));
    };
    let caps = pattern
        .captures(resource)
        .ok_or_else(|| EventError::ResourceMismatch {
            service: service.to_string(),
            resource: resource.to_string(),
        })?;
    match (caps.get(1), caps.get(2)) {
        (Some(resource), Some(subject)) => {
            Ok((resource.as_str().to_string(), subject.as_str().to_string()))
        }
        _ => Err(EventError::ResourceMismatch {
            service: service.to_string(),
            resource: resource.to_string(),
        }),
    }
}

fn firebase_db_location(domain: Option<&str>) -> Result<String, EventError> {
    match domain {
        None | Some(DEFAULT_FIREBASE_DB_DOMAIN) => Ok(DEFAULT_FIREBASE_DB_LOCATION.to_string()),
        Some(domain) => FIREBASE_DB_DOMAIN
            .captures(domain)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| EventError::UnknownDomain(domain.to_string())),
    }
}

fn firebase_db_domain(location: &str) -> String {
    if location == DEFAULT_FIREBASE_DB_LOCATION {
        DEFAULT_FIREBASE_DB_DOMAIN.to_string()
    } else {
        format!("{location}.firebasedatabase.app")
    }
}

fn rename_fields(data: &mut Value, renames: impl Iterator<Item = (&'static str, &'static str)>) {
    let Some(metadata) = data.get_mut("metadata").and_then(Value::as_object_mut) else {
        return;
    };
    for (from, to) in renames {
        if let Some(value) = metadata.remove(from) {
            metadata.insert(to.to_string(), value);
        }
    }
}

fn firebase_auth_subject(data: &Value) -> Option<String> {
    match data.get("uid")? {
        Value::String(uid) => Some(format!("users/{uid}")),
        Value::Null => None,
        other => Some(format!("users/{other}")),
    }
}

/// Upcast a background event to the equivalent CloudEvent.
pub fn background_to_cloud_event(event: &BackgroundEvent) -> Result<CloudEvent, EventError> {
    let metadata = &event.metadata;
    let ty = cloud_event_type(&metadata.event_type)
        .ok_or_else(|| EventError::UnknownEventType(metadata.event_type.clone()))?;

    let resource = metadata.resource.clone().unwrap_or_default();
    let service = if resource.service.is_empty() {
        service_for_event_type(&metadata.event_type)
            .ok_or_else(|| EventError::UnknownService(metadata.event_type.clone()))?
            .to_string()
    } else {
        resource.service.clone()
    };

    let (mut ce_resource, mut subject) = split_resource(&service, resource.name_or_path())?;
    let mut data = event.data.clone();

    match service.as_str() {
        PUBSUB_SERVICE => {
            if let Value::Object(message) = &mut data {
                message.insert("messageId".into(), Value::String(metadata.event_id.clone()));
                if let Some(timestamp) = &metadata.timestamp {
                    message.insert("publishTime".into(), Value::String(format_time(timestamp)));
                }
            }
            data = serde_json::json!({ "message": data });
        }
        FIREBASE_AUTH_SERVICE => {
            rename_fields(&mut data, FIREBASE_AUTH_METADATA_FIELDS.iter().copied());
            if let Some(s) = firebase_auth_subject(&data) {
                subject = s;
            }
        }
        FIREBASE_DB_SERVICE => {
            let location = firebase_db_location(event.domain.as_deref())?;
            ce_resource = format!("projects/_/locations/{location}/{ce_resource}");
        }
        _ => {}
    }

    let mut ce = CloudEvent::new(
        metadata.event_id.clone(),
        format!("//{service}/{ce_resource}"),
        ty,
    )
    .with_json_data(data);
    if let Some(timestamp) = metadata.timestamp {
        ce = ce.with_time(timestamp);
    }
    if !subject.is_empty() {
        ce = ce.with_subject(subject);
    }
    Ok(ce)
}

/// Downcast a CloudEvent to the background event a legacy trigger would send.
pub fn cloud_event_to_background(event: &CloudEvent) -> Result<BackgroundEvent, EventError> {
    let event_type = background_event_type(&event.ty)
        .ok_or_else(|| EventError::UnknownCloudEventType(event.ty.clone()))?;

    let (service, ce_resource) = event
        .source
        .strip_prefix("//")
        .and_then(|s| s.split_once('/'))
        .ok_or_else(|| EventError::InvalidCloudEvent(format!("invalid source {}", event.source)))?;

    // Only subjects split off a resource path are joined back. Services
    // without a resource pattern derive the subject from the data.
    let subject = match resource_pattern(service) {
        Some(_) => event.subject.as_deref().unwrap_or_default(),
        None => "",
    };
    let join = |resource: &str| {
        if subject.is_empty() {
            resource.to_string()
        } else {
            format!("{resource}/{subject}")
        }
    };

    let mut data = event.data_json().unwrap_or(Value::Null);
    let mut domain = None;
    let mut resource = Resource {
        service: service.to_string(),
        name: join(ce_resource),
        ..Default::default()
    };

    match service {
        PUBSUB_SERVICE => {
            let mut message = match data.get_mut("message").map(Value::take) {
                Some(Value::Object(message)) => message,
                _ => Map::new(),
            };
            message.remove("messageId");
            message.remove("publishTime");
            message.insert("@type".into(), Value::String(PUBSUB_MESSAGE_TYPE.to_string()));
            data = Value::Object(message);
            resource.resource_type = PUBSUB_MESSAGE_TYPE.to_string();
        }
        FIREBASE_AUTH_SERVICE => {
            let renames = FIREBASE_AUTH_METADATA_FIELDS.iter().map(|(bg, ce)| (*ce, *bg));
            rename_fields(&mut data, renames);
        }
        FIREBASE_DB_SERVICE => {
            let caps = FIREBASE_DB_SOURCE.captures(ce_resource).ok_or_else(|| {
                EventError::ResourceMismatch {
                    service: service.to_string(),
                    resource: ce_resource.to_string(),
                }
            })?;
            domain = Some(firebase_db_domain(&caps[1]));
            resource.name = join(&format!("projects/_/{}", &caps[2]));
        }
        STORAGE_SERVICE => {
            if let Some(kind) = data.get("kind").and_then(Value::as_str) {
                resource.resource_type = kind.to_string();
            }
        }
        _ => {}
    }

    if event_type.starts_with(LEGACY_EVENT_TYPE_PREFIX) {
        resource = Resource::raw(resource.name);
    }

    Ok(BackgroundEvent {
        metadata: Metadata {
            event_id: event.id.clone(),
            timestamp: event.time,
            event_type: event_type.to_string(),
            resource: Some(resource),
        },
        data,
        domain,
    })
}

/// Rewrite a background event request into a structured-mode CloudEvent.
pub fn convert_background_to_cloud_event_request(
    req: &mut FunctionRequest,
) -> Result<(), EventError> {
    let body = req.body_bytes();
    let event = get_background_event(body, req.path())?
        .ok_or_else(|| EventError::NotBackgroundEvent(String::from_utf8_lossy(body).to_string()))?;
    let ce = background_to_cloud_event(&event)?;
    let encoded = serde_json::to_vec(&ce.to_structured_json()).map_err(EventError::MalformedJson)?;

    req.set_header("content-type", STRUCTURED_CONTENT_TYPE);
    req.replace_body(encoded);
    Ok(())
}

/// Rewrite a CloudEvent request (either encoding) into a background event body.
pub fn convert_cloud_event_to_background_request(
    req: &mut FunctionRequest,
) -> Result<(), EventError> {
    let ce = CloudEvent::from_request(req)?;
    let event = cloud_event_to_background(&ce)?;
    let encoded = serde_json::to_vec(&event.to_json().map_err(EventError::MalformedJson)?)
        .map_err(EventError::MalformedJson)?;

    req.headers.retain(|name, _| !name.starts_with("ce-"));
    req.set_header("content-type", JSON_CONTENT_TYPE);
    req.replace_body(encoded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::tables::{FIREBASE_SERVICE, FIRESTORE_SERVICE};
    use crate::http::{Method, StatusCode};
    use serde_json::json;

    fn post(body: &str) -> FunctionRequest {
        FunctionRequest::new(Method::Post, "/").body(body.to_string())
    }

    fn converted(body: &str) -> CloudEvent {
        let mut req = post(body);
        convert_background_to_cloud_event_request(&mut req).unwrap();
        assert_eq!(
            req.get_header("content-type").map(String::as_str),
            Some(STRUCTURED_CONTENT_TYPE)
        );
        assert_eq!(
            req.get_header("content-length"),
            Some(&req.body_bytes().len().to_string())
        );
        CloudEvent::from_request(&req).unwrap()
    }

    fn expected(value: Value) -> CloudEvent {
        CloudEvent::from_structured_json(value).unwrap()
    }

    #[test]
    fn test_split_resource() {
        let cases = [
            (FIREBASE_AUTH_SERVICE, "projects/my-project-id", "projects/my-project-id", ""),
            (
                FIREBASE_SERVICE,
                "projects/my-project-id/events/my-event",
                "projects/my-project-id",
                "events/my-event",
            ),
            (
                FIREBASE_DB_SERVICE,
                "projects/_/instances/my-instance/refs/abc/xyz",
                "instances/my-instance",
                "refs/abc/xyz",
            ),
            (
                FIRESTORE_SERVICE,
                "projects/my-project-id/databases/(default)/documents/abc/xyz",
                "projects/my-project-id/databases/(default)",
                "documents/abc/xyz",
            ),
            (
                PUBSUB_SERVICE,
                "projects/my-project-id/topics/my-topic",
                "projects/my-project-id/topics/my-topic",
                "",
            ),
            (
                STORAGE_SERVICE,
                "projects/_/buckets/b/objects/a/b.txt",
                "projects/_/buckets/b",
                "objects/a/b.txt",
            ),
            (
                "unknown.googleapis.com",
                "projects/my-project-id/stuff/thing/abc/xyz",
                "projects/my-project-id/stuff/thing/abc/xyz",
                "",
            ),
        ];
        for (service, resource, want_resource, want_subject) in cases {
            let (got_resource, got_subject) = split_resource(service, resource).unwrap();
            assert_eq!(got_resource, want_resource, "{service}");
            assert_eq!(got_subject, want_subject, "{service}");
        }
    }

    #[test]
    fn test_split_resource_failures() {
        for resource in [
            "projects/my-project-id/stuff/thing/abc/xyz",
            "projects/_/buckets/my-bucket/",
        ] {
            assert!(matches!(
                split_resource(STORAGE_SERVICE, resource),
                Err(EventError::ResourceMismatch { .. })
            ));
        }
    }

    fn pubsub_ce() -> CloudEvent {
        expected(json!({
            "specversion": "1.0",
            "id": "1215011316659232",
            "source": "//pubsub.googleapis.com/projects/sample-project/topics/gcf-test",
            "time": "2020-05-18T12:13:19.209Z",
            "type": "google.cloud.pubsub.topic.v1.messagePublished",
            "datacontenttype": "application/json",
            "data": {
                "message": {
                    "data": "10",
                    "messageId": "1215011316659232",
                    "publishTime": "2020-05-18T12:13:19.209Z"
                }
            }
        }))
    }

    #[test]
    fn test_pubsub_flat_event_upcast() {
        let ce = converted(
            r#"{
                "eventId": "1215011316659232",
                "timestamp": "2020-05-18T12:13:19.209Z",
                "eventType": "providers/cloud.pubsub/eventTypes/topic.publish",
                "resource": "projects/sample-project/topics/gcf-test",
                "data": {"data": "10"}
            }"#,
        );
        assert_eq!(ce, pubsub_ce());
    }

    #[test]
    fn test_pubsub_context_event_upcast() {
        let ce = converted(
            r#"{
                "context": {
                    "eventId": "1215011316659232",
                    "timestamp": "2020-05-18T12:13:19.209Z",
                    "eventType": "google.pubsub.topic.publish",
                    "resource": {
                        "service": "pubsub.googleapis.com",
                        "name": "projects/sample-project/topics/gcf-test",
                        "type": "type.googleapis.com/google.pubsub.v1.PubsubMessage"
                    }
                },
                "data": {"data": "10"}
            }"#,
        );
        assert_eq!(ce, pubsub_ce());
    }

    #[test]
    fn test_firebase_auth_upcast() {
        let ce = converted(
            r#"{
                "data": {
                    "email": "test@nowhere.com",
                    "metadata": {
                        "createdAt": "2020-05-26T10:42:27Z",
                        "lastSignedInAt": "2020-10-24T11:00:00Z"
                    },
                    "providerData": [
                        {"email": "test@nowhere.com", "providerId": "password", "uid": "test@nowhere.com"}
                    ],
                    "uid": "UUpby3s4spZre6kHsgVSPetzQ8l2"
                },
                "eventId": "aaaaaa-1111-bbbb-2222-cccccccccccc",
                "eventType": "providers/firebase.auth/eventTypes/user.create",
                "notSupported": {},
                "resource": "projects/my-project-id",
                "timestamp": "2020-09-29T11:32:00.000Z"
            }"#,
        );
        let want = expected(json!({
            "specversion": "1.0",
            "type": "google.firebase.auth.user.v1.created",
            "source": "//firebaseauth.googleapis.com/projects/my-project-id",
            "subject": "users/UUpby3s4spZre6kHsgVSPetzQ8l2",
            "id": "aaaaaa-1111-bbbb-2222-cccccccccccc",
            "time": "2020-09-29T11:32:00.000Z",
            "datacontenttype": "application/json",
            "data": {
                "email": "test@nowhere.com",
                "metadata": {
                    "createTime": "2020-05-26T10:42:27Z",
                    "lastSignInTime": "2020-10-24T11:00:00Z"
                },
                "providerData": [
                    {"email": "test@nowhere.com", "providerId": "password", "uid": "test@nowhere.com"}
                ],
                "uid": "UUpby3s4spZre6kHsgVSPetzQ8l2"
            }
        }));
        assert_eq!(ce, want);
    }

    fn firebase_db_body(domain: &str) -> String {
        format!(
            r#"{{
                "eventType": "providers/google.firebase.database/eventTypes/ref.write",
                "params": {{"child": "xyz"}},
                "auth": {{"admin": true}},
                "domain": "{domain}",
                "data": {{"data": null, "delta": {{"grandchild": "other"}}}},
                "resource": "projects/_/instances/my-project-id/refs/gcf-test/xyz",
                "timestamp": "2020-09-29T11:32:00.000Z",
                "eventId": "aaaaaa-1111-bbbb-2222-cccccccccccc"
            }}"#
        )
    }

    #[test]
    fn test_firebase_db_upcast() {
        for (domain, location) in [
            ("firebaseio.com", "us-central1"),
            ("europe-west1.firebasedatabase.app", "europe-west1"),
        ] {
            let ce = converted(&firebase_db_body(domain));
            let want = expected(json!({
                "specversion": "1.0",
                "type": "google.firebase.database.ref.v1.written",
                "source": format!(
                    "//firebasedatabase.googleapis.com/projects/_/locations/{location}/instances/my-project-id"
                ),
                "subject": "refs/gcf-test/xyz",
                "id": "aaaaaa-1111-bbbb-2222-cccccccccccc",
                "time": "2020-09-29T11:32:00.000Z",
                "datacontenttype": "application/json",
                "data": {"data": null, "delta": {"grandchild": "other"}}
            }));
            assert_eq!(ce, want, "{domain}");
        }
    }

    #[test]
    fn test_firebase_db_unknown_domain() {
        let mut req = post(&firebase_db_body("example.com"));
        let err = convert_background_to_cloud_event_request(&mut req).unwrap_err();
        assert!(matches!(err, EventError::UnknownDomain(_)));
    }

    #[test]
    fn test_upcast_failures() {
        let mut req = post(r#"{"random": "x"}"#);
        assert!(matches!(
            convert_background_to_cloud_event_request(&mut req),
            Err(EventError::NotBackgroundEvent(_))
        ));

        let mut req = post(r#"{"eventId": "1", "eventType": "com.example.unknown", "data": {}}"#);
        let err = convert_background_to_cloud_event_request(&mut req).unwrap_err();
        assert!(matches!(err, EventError::UnknownEventType(_)));
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_pubsub_round_trip_keeps_identity() {
        let mut req = post(
            r#"{
                "context": {
                    "eventId": "123",
                    "eventType": "google.pubsub.topic.publish",
                    "resource": {"name": "projects/P/topics/T", "service": "pubsub.googleapis.com"}
                },
                "data": {"data": "aGVsbG8=", "attributes": {"k": "v"}}
            }"#,
        );
        convert_background_to_cloud_event_request(&mut req).unwrap();
        convert_cloud_event_to_background_request(&mut req).unwrap();

        let event = get_background_event(req.body_bytes(), "").unwrap().unwrap();
        assert_eq!(event.metadata.event_id, "123");
        assert_eq!(event.metadata.event_type, "google.pubsub.topic.publish");
        assert_eq!(event.metadata.resource.unwrap().name, "projects/P/topics/T");
        assert_eq!(event.data["data"], "aGVsbG8=");
        assert_eq!(event.data["attributes"], json!({"k": "v"}));
        assert!(event.data.get("messageId").is_none());
    }

    #[test]
    fn test_storage_downcast_from_binary_event() {
        let ce = CloudEvent::new(
            "aaaaaa-1111-bbbb-2222-cccccccccccc",
            "//storage.googleapis.com/projects/_/buckets/some-bucket",
            "google.cloud.storage.object.v1.finalized",
        )
        .with_subject("objects/folder/Test.cs")
        .with_json_data(json!({"bucket": "some-bucket", "kind": "storage#object"}));
        let mut req = FunctionRequest::new(Method::Post, "/").body(ce.binary_body().unwrap());
        for (name, value) in ce.to_binary_headers() {
            req.set_header(name, value);
        }

        convert_cloud_event_to_background_request(&mut req).unwrap();
        assert!(!req.has_header("ce-id"));
        let body: Value = req.json().unwrap().unwrap();
        assert_eq!(
            body["context"],
            json!({
                "eventId": "aaaaaa-1111-bbbb-2222-cccccccccccc",
                "eventType": "google.storage.object.finalize",
                "resource": {
                    "service": "storage.googleapis.com",
                    "name": "projects/_/buckets/some-bucket/objects/folder/Test.cs",
                    "type": "storage#object"
                }
            })
        );
        assert_eq!(body["data"]["bucket"], "some-bucket");
    }

    #[test]
    fn test_firebase_round_trips() {
        let upcast = converted(&firebase_db_body("europe-west1.firebasedatabase.app"));
        let event = cloud_event_to_background(&upcast).unwrap();
        assert_eq!(event.domain.as_deref(), Some("europe-west1.firebasedatabase.app"));
        assert_eq!(
            event.metadata.resource,
            Some(Resource::raw("projects/_/instances/my-project-id/refs/gcf-test/xyz"))
        );

        let ce = CloudEvent::new(
            "1",
            "//firebaseauth.googleapis.com/projects/my-project-id",
            "google.firebase.auth.user.v1.created",
        )
        .with_json_data(json!({"uid": "u", "metadata": {"createTime": "t"}}));
        let event = cloud_event_to_background(&ce).unwrap();
        assert_eq!(event.data["metadata"], json!({"createdAt": "t"}));
        assert_eq!(event.metadata.resource, Some(Resource::raw("projects/my-project-id")));
    }

    #[test]
    fn test_firebase_auth_round_trip_keeps_resource() {
        let mut req = post(
            r#"{
                "eventId": "1",
                "eventType": "providers/firebase.auth/eventTypes/user.create",
                "resource": "projects/my-project-id",
                "timestamp": "2020-09-29T11:32:00.000Z",
                "data": {"uid": "UID1", "metadata": {"createdAt": "2020-05-26T10:42:27Z"}}
            }"#,
        );
        convert_background_to_cloud_event_request(&mut req).unwrap();
        convert_cloud_event_to_background_request(&mut req).unwrap();

        let event = get_background_event(req.body_bytes(), "").unwrap().unwrap();
        assert_eq!(
            event.metadata.event_type,
            "providers/firebase.auth/eventTypes/user.create"
        );
        assert_eq!(event.metadata.resource, Some(Resource::raw("projects/my-project-id")));
        assert_eq!(event.data["uid"], "UID1");
        assert_eq!(event.data["metadata"], json!({"createdAt": "2020-05-26T10:42:27Z"}));
    }

    #[test]
    fn test_unknown_cloud_event_type() {
        let ce = CloudEvent::new("1", "//example.com/x", "com.example.unknown");
        assert!(matches!(
            cloud_event_to_background(&ce),
            Err(EventError::UnknownCloudEventType(_))
        ));
    }
}
