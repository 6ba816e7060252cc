use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::errors::{Error, Result};

/// Identifier assigned by the event log. Strictly increasing in append order.
pub type EventId = i64;

/// A durably stored event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub channel: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// An event that has not been appended yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub channel: String,
    pub event_type: String,
    pub payload: JsonValue,
}

impl NewEvent {
    pub fn new(
        channel: impl Into<String>,
        event_type: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            channel: channel.into(),
            event_type: event_type.into(),
            payload,
        }
    }

    /// Reject events that cannot be framed on the wire.
    pub fn validate(&self) -> Result<()> {
        validate_channel(&self.channel)?;
        if self.event_type.is_empty() {
            return Err(Error::validation("eventType must not be empty"));
        }
        if self.event_type.contains(['\r', '\n']) {
            return Err(Error::validation("eventType must be a single line"));
        }
        if self.payload.is_null() {
            return Err(Error::validation("payload is required"));
        }
        Ok(())
    }

    /// Attach the log-assigned identity.
    pub fn into_event(self, id: EventId, created_at: DateTime<Utc>) -> Event {
        Event {
            id,
            channel: self.channel,
            event_type: self.event_type,
            payload: self.payload,
            created_at,
        }
    }
}

/// Channel names travel comma separated in stream requests, so commas and
/// line breaks are not allowed.
pub fn validate_channel(channel: &str) -> Result<()> {
    if channel.is_empty() {
        return Err(Error::validation("channel must not be empty"));
    }
    if channel.contains([',', '\r', '\n']) {
        return Err(Error::validation(format!(
            "channel {:?} contains a reserved character",
            channel
        )));
    }
    Ok(())
}
