//! Event normalization.
//!
//! Classifies inbound bodies as background events, legacy Pub/Sub pushes or
//! CloudEvents, and rewrites requests between the background and CloudEvent
//! encodings so each function kind sees one canonical shape.

mod background;
mod cloudevent;
mod convert;
mod pubsub;
mod tables;

pub use background::{get_background_event, BackgroundEvent, Metadata, Resource};
pub use cloudevent::{
    is_binary_cloud_event, is_cloud_event, is_structured_cloud_event, CloudEvent,
    CloudEventData, JSON_CONTENT_TYPE, SPEC_VERSION, STRUCTURED_CONTENT_TYPE,
};
pub use convert::{
    background_to_cloud_event, cloud_event_to_background,
    convert_background_to_cloud_event_request, convert_cloud_event_to_background_request,
    split_resource,
};
pub use pubsub::{
    extract_topic_from_request_path, LegacyPushEvent, PubsubMessage, PUBSUB_EVENT_TYPE,
    PUBSUB_MESSAGE_TYPE,
};

use crate::http::StatusCode;
use thiserror::Error;

/// Failures while classifying or converting events.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("{0}")]
    MalformedJson(#[source] serde_json::Error),

    #[error("unable to extract background event from {0}")]
    NotBackgroundEvent(String),

    #[error("unable to find CloudEvent equivalent event type for {0}")]
    UnknownEventType(String),

    #[error("unable to find CloudEvent equivalent service for {0}")]
    UnknownService(String),

    #[error("resource regexp did not match: service {service}, resource {resource}")]
    ResourceMismatch { service: String, resource: String },

    #[error("unable to find background event equivalent type for {0}")]
    UnknownCloudEventType(String),

    #[error("invalid CloudEvent: {0}")]
    InvalidCloudEvent(String),

    #[error("unable to extract topic from path {0:?}")]
    TopicNotFound(String),

    #[error("unknown Firebase Realtime Database domain {0}")]
    UnknownDomain(String),
}

impl EventError {
    /// The HTTP status a conversion failure is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            EventError::InvalidCloudEvent(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            EventError::InvalidCloudEvent("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            EventError::UnknownService("x".into()).status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
    }

    #[test]
    fn test_messages_name_the_input() {
        let err = EventError::UnknownEventType("com.example.thing".into());
        assert_eq!(
            err.to_string(),
            "unable to find CloudEvent equivalent event type for com.example.thing"
        );
    }
}
