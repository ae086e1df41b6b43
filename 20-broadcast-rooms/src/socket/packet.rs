use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// One protocol packet: `{"type": ..., "data": {...}}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Packet {
    Connect {
        id: String,
    },
    Event {
        event: String,
        args: Vec<Value>,
        /// `0` when no acknowledgement is requested.
        #[serde(rename = "ackId")]
        ack_id: u64,
    },
    Ack {
        id: u64,
        args: Vec<Value>,
    },
    Disconnect {
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not a packet envelope at all.
    #[error("invalid packet envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    /// The envelope parsed but its type or data fields did not.
    #[error("malformed {kind} packet: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Envelope failures end the connection; malformed packets are skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::Envelope(_))
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: Map<String, Value>,
}

impl Packet {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let Envelope { kind, data } = serde_json::from_str(frame).map_err(DecodeError::Envelope)?;
        serde_json::from_value(json!({ "type": kind.clone(), "data": data }))
            .map_err(|source| DecodeError::Malformed { kind, source })
    }
}
