//! CloudEvents 1.0 model and its two HTTP encodings.
//!
//! Binary mode carries attributes in `ce-*` headers and the data as the
//! body. Structured mode carries everything in one JSON object sent as
//! `application/cloudevents+json`.

use super::EventError;
use crate::http::FunctionRequest;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const SPEC_VERSION: &str = "1.0";
pub const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Headers whose presence marks a binary-mode CloudEvent.
const BINARY_MARKER_HEADERS: [&str; 4] = ["ce-type", "ce-specversion", "ce-source", "ce-id"];

const CONTEXT_ATTRIBUTES: [&str; 8] = [
    "id",
    "source",
    "specversion",
    "type",
    "datacontenttype",
    "dataschema",
    "subject",
    "time",
];

/// Event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum CloudEventData {
    Json(Value),
    Text(String),
    Binary(Bytes),
}

/// A CloudEvent with its context attributes and optional data.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudEvent {
    pub id: String,
    pub source: String,
    pub specversion: String,
    pub ty: String,
    pub datacontenttype: Option<String>,
    pub dataschema: Option<String>,
    pub subject: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub data: Option<CloudEventData>,
    pub extensions: BTreeMap<String, String>,
}

impl CloudEvent {
    /// Create an event with the required attributes and no data.
    pub fn new(id: impl Into<String>, source: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            specversion: SPEC_VERSION.to_string(),
            ty: ty.into(),
            datacontenttype: None,
            dataschema: None,
            subject: None,
            time: None,
            data: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Attach JSON data and mark the content type as `application/json`.
    pub fn with_json_data(mut self, data: Value) -> Self {
        self.datacontenttype = Some(JSON_CONTENT_TYPE.to_string());
        self.data = Some(CloudEventData::Json(data));
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(name.into(), value.into());
        self
    }

    /// Decode a CloudEvent from either HTTP encoding.
    pub fn from_request(req: &FunctionRequest) -> Result<Self, EventError> {
        if is_binary_cloud_event(req) {
            Self::from_binary(req)
        } else {
            let value: Value = serde_json::from_slice(req.body_bytes())
                .map_err(|err| EventError::InvalidCloudEvent(err.to_string()))?;
            Self::from_structured_json(value)
        }
    }

    fn from_binary(req: &FunctionRequest) -> Result<Self, EventError> {
        let attr = |name: &str| req.get_header(&format!("ce-{name}")).cloned();

        let mut event = CloudEvent::new(
            attr("id").unwrap_or_default(),
            attr("source").unwrap_or_default(),
            attr("type").unwrap_or_default(),
        );
        event.specversion = attr("specversion").unwrap_or_default();
        event.subject = attr("subject");
        event.dataschema = attr("dataschema");
        event.time = attr("time").map(|t| parse_time(&t)).transpose()?;
        event.datacontenttype = req.get_header("content-type").cloned();

        for (name, value) in &req.headers {
            if let Some(attribute) = name.strip_prefix("ce-") {
                if !CONTEXT_ATTRIBUTES.contains(&attribute) {
                    event.extensions.insert(attribute.to_string(), value.clone());
                }
            }
        }

        if let Some(body) = req.body.as_ref().filter(|b| !b.is_empty()) {
            event.data = Some(decode_binary_data(event.datacontenttype.as_deref(), body));
        }

        event.validate()?;
        Ok(event)
    }

    /// Decode a structured-mode CloudEvent from its JSON object.
    pub fn from_structured_json(value: Value) -> Result<Self, EventError> {
        let Value::Object(mut fields) = value else {
            return Err(EventError::InvalidCloudEvent(
                "structured event is not a JSON object".to_string(),
            ));
        };

        let mut take = |name: &str| -> Result<Option<String>, EventError> {
            match fields.remove(name) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s)),
                Some(other) => Err(EventError::InvalidCloudEvent(format!(
                    "attribute {name} must be a string, found {other}"
                ))),
            }
        };

        let mut event = CloudEvent::new(
            take("id")?.unwrap_or_default(),
            take("source")?.unwrap_or_default(),
            take("type")?.unwrap_or_default(),
        );
        event.specversion = take("specversion")?.unwrap_or_default();
        event.datacontenttype = take("datacontenttype")?;
        event.dataschema = take("dataschema")?;
        event.subject = take("subject")?;
        event.time = take("time")?.map(|t| parse_time(&t)).transpose()?;

        let data_base64 = take("data_base64")?;
        event.data = match (fields.remove("data"), data_base64) {
            (Some(_), Some(_)) => {
                return Err(EventError::InvalidCloudEvent(
                    "both data and data_base64 are set".to_string(),
                ))
            }
            (None | Some(Value::Null), Some(encoded)) => {
                let bytes = STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|err| EventError::InvalidCloudEvent(err.to_string()))?;
                Some(CloudEventData::Binary(Bytes::from(bytes)))
            }
            (None | Some(Value::Null), None) => None,
            (Some(Value::String(text)), None) if !is_json(event.datacontenttype.as_deref()) => {
                Some(CloudEventData::Text(text))
            }
            (Some(value), None) => Some(CloudEventData::Json(value)),
        };

        for (name, value) in fields {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            event.extensions.insert(name, value);
        }

        event.validate()?;
        Ok(event)
    }

    /// Check the required context attributes.
    pub fn validate(&self) -> Result<(), EventError> {
        for (name, value) in [
            ("id", &self.id),
            ("source", &self.source),
            ("specversion", &self.specversion),
            ("type", &self.ty),
        ] {
            if value.is_empty() {
                return Err(EventError::InvalidCloudEvent(format!(
                    "missing required attribute {name}"
                )));
            }
        }
        if self.specversion != SPEC_VERSION {
            return Err(EventError::InvalidCloudEvent(format!(
                "unsupported specversion {}",
                self.specversion
            )));
        }
        Ok(())
    }

    /// Encode as a structured-mode JSON object.
    pub fn to_structured_json(&self) -> Value {
        let mut fields = Map::new();
        fields.insert("specversion".into(), Value::String(self.specversion.clone()));
        fields.insert("id".into(), Value::String(self.id.clone()));
        fields.insert("source".into(), Value::String(self.source.clone()));
        fields.insert("type".into(), Value::String(self.ty.clone()));
        let optional = [
            ("datacontenttype", &self.datacontenttype),
            ("dataschema", &self.dataschema),
            ("subject", &self.subject),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                fields.insert(name.into(), Value::String(value.clone()));
            }
        }
        if let Some(time) = &self.time {
            fields.insert("time".into(), Value::String(format_time(time)));
        }
        for (name, value) in &self.extensions {
            fields.insert(name.clone(), Value::String(value.clone()));
        }
        match &self.data {
            Some(CloudEventData::Json(value)) => {
                fields.insert("data".into(), value.clone());
            }
            Some(CloudEventData::Text(text)) => {
                fields.insert("data".into(), Value::String(text.clone()));
            }
            Some(CloudEventData::Binary(bytes)) => {
                fields.insert("data_base64".into(), Value::String(STANDARD.encode(bytes)));
            }
            None => {}
        }
        Value::Object(fields)
    }

    /// Encode the context attributes as binary-mode headers.
    pub fn to_binary_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("ce-specversion".to_string(), self.specversion.clone()),
            ("ce-id".to_string(), self.id.clone()),
            ("ce-source".to_string(), self.source.clone()),
            ("ce-type".to_string(), self.ty.clone()),
        ];
        if let Some(subject) = &self.subject {
            headers.push(("ce-subject".to_string(), subject.clone()));
        }
        if let Some(dataschema) = &self.dataschema {
            headers.push(("ce-dataschema".to_string(), dataschema.clone()));
        }
        if let Some(time) = &self.time {
            headers.push(("ce-time".to_string(), format_time(time)));
        }
        for (name, value) in &self.extensions {
            headers.push((format!("ce-{name}"), value.clone()));
        }
        if let Some(content_type) = &self.datacontenttype {
            headers.push(("content-type".to_string(), content_type.clone()));
        }
        headers
    }

    /// The data encoded as a binary-mode body.
    pub fn binary_body(&self) -> Result<Bytes, serde_json::Error> {
        Ok(match &self.data {
            Some(CloudEventData::Json(value)) => Bytes::from(serde_json::to_vec(value)?),
            Some(CloudEventData::Text(text)) => Bytes::from(text.clone()),
            Some(CloudEventData::Binary(bytes)) => bytes.clone(),
            None => Bytes::new(),
        })
    }

    /// The data as a JSON value, decoding text and bytes when they hold JSON.
    pub fn data_json(&self) -> Option<Value> {
        match self.data.as_ref()? {
            CloudEventData::Json(value) => Some(value.clone()),
            CloudEventData::Text(text) => serde_json::from_str(text).ok(),
            CloudEventData::Binary(bytes) => serde_json::from_slice(bytes).ok(),
        }
    }

    /// Deserialize the data into `T`. Missing data decodes from `null`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.data {
            Some(CloudEventData::Json(value)) => T::deserialize(value),
            Some(CloudEventData::Text(text)) => serde_json::from_str(text),
            Some(CloudEventData::Binary(bytes)) => serde_json::from_slice(bytes),
            None => T::deserialize(&Value::Null),
        }
    }
}

impl Serialize for CloudEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_structured_json().serialize(serializer)
    }
}

impl TryFrom<Value> for CloudEvent {
    type Error = EventError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_structured_json(value)
    }
}

/// RFC3339 in UTC with a `Z` suffix and only as many fractional digits as needed.
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, EventError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| EventError::InvalidCloudEvent(format!("invalid time {value:?}: {err}")))
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type.map_or(true, |ct| ct.contains("json"))
}

fn decode_binary_data(content_type: Option<&str>, body: &Bytes) -> CloudEventData {
    if is_json(content_type) {
        if let Ok(value) = serde_json::from_slice(body) {
            return CloudEventData::Json(value);
        }
    }
    match std::str::from_utf8(body) {
        Ok(text) if content_type.is_some_and(|ct| ct.starts_with("text/")) => {
            CloudEventData::Text(text.to_string())
        }
        _ => CloudEventData::Binary(body.clone()),
    }
}

/// Whether any binary-mode marker header is present.
pub fn is_binary_cloud_event(req: &FunctionRequest) -> bool {
    BINARY_MARKER_HEADERS.iter().any(|h| req.has_header(h))
}

/// Whether the request is a structured-mode CloudEvent: either announced by
/// its content type, or a JSON object carrying the four required attributes.
pub fn is_structured_cloud_event(req: &FunctionRequest) -> bool {
    if req
        .get_header("content-type")
        .is_some_and(|ct| ct.contains("cloudevents"))
    {
        return true;
    }
    let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(req.body_bytes()) else {
        return false;
    };
    ["specversion", "type", "source", "id"].iter().all(|name| {
        fields
            .get(*name)
            .and_then(Value::as_str)
            .is_some_and(|v| !v.is_empty())
    })
}

/// Whether the request carries a CloudEvent in either encoding.
pub fn is_cloud_event(req: &FunctionRequest) -> bool {
    is_binary_cloud_event(req) || is_structured_cloud_event(req)
}
