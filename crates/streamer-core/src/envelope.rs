//! Wire envelopes.
//!
//! Inbound frames are JSON. A frame whose top-level object carries the
//! [`SETUP_MARKER`] field is the session handshake; everything else is
//! ordinary data handed to the relay untouched.
//!
//! Outbound frames always use the [`Notification`] shape
//! `{ "data": <payload | null>, "isAsleep"?: bool }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;

/// Reserved top-level field that marks a handshake frame.
pub const SETUP_MARKER: &str = "setup";

/// A classified inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Handshake: the value of the marker field (relay configuration).
    Setup(Value),
    /// Ordinary data, passed through verbatim.
    Data(String),
}

/// Classify a raw inbound text frame.
///
/// A marker field holding `null` does not count as a handshake.
pub fn classify(text: &str) -> Result<Inbound, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    match value {
        Value::Object(mut map) => match map.remove(SETUP_MARKER) {
            Some(setup) if !setup.is_null() => Ok(Inbound::Setup(setup)),
            _ => Ok(Inbound::Data(text.to_owned())),
        },
        _ => Ok(Inbound::Data(text.to_owned())),
    }
}

/// Outbound envelope sent to the client.
///
/// `data: null` together with `isAsleep` is a lifecycle event. `data: null`
/// alone is the terminal envelope of a relay (end of stream or failure).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Relay output, or `null` for lifecycle and terminal envelopes.
    pub data: Value,
    /// Present on lifecycle events and on streamed speech fragments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_asleep: Option<bool>,
}

impl Notification {
    /// Relay output without a lifecycle flag.
    pub fn data(data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            is_asleep: None,
        }
    }

    /// Relay output flagged as "session awake".
    pub fn awake(data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            is_asleep: Some(false),
        }
    }

    /// The session never became active and is being put to sleep.
    pub fn sleeping() -> Self {
        Self {
            data: Value::Null,
            is_asleep: Some(true),
        }
    }

    /// The session was active and has been idle too long.
    pub fn idle() -> Self {
        Self {
            data: Value::Null,
            is_asleep: Some(false),
        }
    }

    /// Terminal envelope: end of a relay's output, or a backend failure.
    pub fn terminal() -> Self {
        Self {
            data: Value::Null,
            is_asleep: None,
        }
    }

    /// Serialize to the JSON text sent over the socket.
    pub fn to_json(&self) -> String {
        // Value and Option<bool> always serialize.
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"data":null}"#))
    }
}
