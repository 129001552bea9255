//! Signaling message types and type-discriminated parsing
//!
//! Relay messages are plain JSON objects carrying a `type` discriminator:
//! session descriptions as `{"type":"offer"|"answer","sdp":...}` and
//! browser-style candidates as `{"type":"candidate","candidate":...,
//! "sdpMid":...,"sdpMLineIndex":...}`. Anything else is ignored.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A session description exchanged over the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionDescription {
    /// Description kind: "offer" or "answer"
    #[serde(rename = "type")]
    pub kind: String,

    /// Raw SDP payload
    pub sdp: String,
}

/// Browser-style ICE candidate fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateInit {
    /// The candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the media description the candidate belongs to
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// A recognized signaling message
#[derive(Debug, Clone, PartialEq)]
pub enum SignalMessage {
    /// Local or remote SDP offer
    Offer(SessionDescription),
    /// Remote SDP answer
    Answer(SessionDescription),
    /// Remote or local ICE candidate
    Candidate(CandidateInit),
}

impl SignalMessage {
    /// Build an offer message from a local SDP string
    pub fn offer(sdp: String) -> Self {
        Self::Offer(SessionDescription {
            kind: "offer".to_string(),
            sdp,
        })
    }

    /// Build an answer message from an SDP string
    pub fn answer(sdp: String) -> Self {
        Self::Answer(SessionDescription {
            kind: "answer".to_string(),
            sdp,
        })
    }

    /// Build a candidate message from browser-style candidate fields
    pub fn candidate(init: CandidateInit) -> Self {
        Self::Candidate(init)
    }

    /// The `type` discriminator carried on the wire
    pub fn kind(&self) -> &str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
        }
    }

    /// Serialize to the wire JSON form
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            Self::Offer(desc) | Self::Answer(desc) => serde_json::to_value(desc),
            Self::Candidate(init) => serde_json::to_value(init).map(|mut v| {
                if let Value::Object(ref mut map) = v {
                    map.insert("type".to_string(), Value::String("candidate".to_string()));
                }
                v
            }),
        }
        .map_err(|e| Error::SignalingError(format!("Failed to serialize message: {}", e)))?;

        serde_json::to_string(&value)
            .map_err(|e| Error::SignalingError(format!("Failed to serialize message: {}", e)))
    }
}

/// Parse one relay frame.
///
/// Returns `Ok(None)` for well-formed JSON whose `type` is missing or
/// unrecognized; returns an error only when the text is not valid JSON or
/// a recognized kind is missing its required fields.
pub fn parse(text: &str) -> Result<Option<SignalMessage>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::SignalingError(format!("Invalid signaling JSON: {}", e)))?;

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_string(),
        None => {
            debug!("Ignoring signaling message without a type discriminator");
            return Ok(None);
        }
    };

    match kind.as_str() {
        "offer" | "answer" => {
            let desc: SessionDescription = serde_json::from_value(value)
                .map_err(|e| Error::SignalingError(format!("Invalid {} message: {}", kind, e)))?;
            Ok(Some(if kind == "offer" {
                SignalMessage::Offer(desc)
            } else {
                SignalMessage::Answer(desc)
            }))
        }
        "candidate" => {
            let init: CandidateInit = serde_json::from_value(value)
                .map_err(|e| Error::SignalingError(format!("Invalid candidate message: {}", e)))?;
            Ok(Some(SignalMessage::Candidate(init)))
        }
        other => {
            debug!("Ignoring signaling message of unrecognized type {:?}", other);
            Ok(None)
        }
    }
}
