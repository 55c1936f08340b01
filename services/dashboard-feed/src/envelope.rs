//! Inbound envelopes and published notifications

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::{self, DecodeError};

/// A server frame that carries dashboard data
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub data_type: String,
    pub payload: Value,
    pub datestamp: Option<String>,
    pub compressed: bool,
}

impl Envelope {
    /// Parse a raw frame into an envelope
    ///
    /// Returns `None` for anything that is not JSON, not an object, lacks a
    /// string `dataType`, or lacks a `payload` key. A `payload` of `null` is
    /// still a valid envelope.
    pub fn parse(raw: &str) -> Option<Envelope> {
        let value: Value = serde_json::from_str(raw).ok()?;
        Envelope::from_value(value)
    }

    pub fn from_value(value: Value) -> Option<Envelope> {
        let Value::Object(mut object) = value else {
            return None;
        };

        let data_type = object.get("dataType")?.as_str()?.to_string();
        let payload = object.remove("payload")?;
        let datestamp = object
            .get("datestamp")
            .and_then(Value::as_str)
            .map(str::to_string);
        let compressed = object
            .get("compressed")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Some(Envelope {
            data_type,
            payload,
            datestamp,
            compressed,
        })
    }

    /// Convert into the notification subscribers receive
    ///
    /// A compressed payload goes through the codec first; a failure becomes
    /// an error-shaped notification rather than being dropped.
    pub fn into_notification(self) -> Notification {
        let body = if self.compressed {
            match self.payload.as_str() {
                Some(encoded) => match codec::decode(encoded) {
                    Ok(value) => NotificationBody::Data(value),
                    Err(e) => {
                        tracing::debug!("Failed to decode '{}' payload: {}", self.data_type, e);
                        NotificationBody::Error(e.reason().to_string())
                    }
                },
                None => {
                    tracing::debug!(
                        "Compressed '{}' payload is not a string",
                        self.data_type
                    );
                    NotificationBody::Error(DecodeError::Base64.reason().to_string())
                }
            }
        } else {
            NotificationBody::Data(self.payload)
        };

        Notification {
            datestamp: self.datestamp,
            body,
            data_type: self.data_type,
        }
    }

    /// Serialize back to wire form, mostly useful for tests and mock servers
    pub fn to_json(&self) -> String {
        let mut object = Map::new();
        object.insert("dataType".to_string(), Value::String(self.data_type.clone()));
        object.insert("payload".to_string(), self.payload.clone());
        if let Some(datestamp) = &self.datestamp {
            object.insert("datestamp".to_string(), Value::String(datestamp.clone()));
        }
        if self.compressed {
            object.insert("compressed".to_string(), Value::Bool(true));
        }
        Value::Object(object).to_string()
    }
}

/// Either the decoded payload or the reason decoding failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationBody {
    Data(Value),
    Error(String),
}

/// What subscribers receive for each accepted envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub datestamp: Option<String>,
    #[serde(flatten)]
    pub body: NotificationBody,
    pub data_type: String,
}

impl Notification {
    pub fn data(&self) -> Option<&Value> {
        match &self.body {
            NotificationBody::Data(value) => Some(value),
            NotificationBody::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.body {
            NotificationBody::Data(_) => None,
            NotificationBody::Error(reason) => Some(reason),
        }
    }
}
