//! Wire envelopes
//!
//! JSON message format spoken over the socket.
//!
//! Outbound (client -> server):
//! - `{"method": string, "arguments"?: [value...], "callback"?: string}`
//!
//! Inbound (server -> client), possibly double-encoded as a JSON string
//! containing JSON (a known transport artifact):
//! - `{"callback": string, "arguments": [value...]}` - reply to a call
//! - `{"channel": string, "data": value}` - broadcast channel event
//!
//! Anything that fails to decode or matches neither shape is malformed and
//! dropped. Reply arguments follow the `(error, results...)` convention:
//! the first element is the error slot, `null` meaning success.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Result, UsherError};

/// Outbound call envelope
///
/// An empty argument list is omitted from the payload entirely, not sent
/// as an empty array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Remote method name
    pub method: String,

    /// Positional call arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<Value>>,

    /// Correlation token for the reply, if one is expected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

impl Envelope {
    /// Build a call envelope; empty arguments are dropped from the payload
    pub fn new(method: impl Into<String>, arguments: Vec<Value>, callback: Option<String>) -> Self {
        Self {
            method: method.into(),
            arguments: if arguments.is_empty() {
                None
            } else {
                Some(arguments)
            },
            callback,
        }
    }

    /// Serialize to the JSON wire form
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Reply correlated to an outbound call
    CallbackReply { token: String, arguments: Vec<Value> },
    /// Server-pushed event on a named channel
    ChannelEvent { channel: String, data: Value },
    /// Undecodable or unrecognized payload; dropped by the router
    Malformed,
}

impl InboundMessage {
    /// Decode a raw text payload into an inbound message
    ///
    /// Tolerates one extra layer of JSON encoding: if the decoded value is
    /// itself a string, it is decoded once more. Decode failures are
    /// absorbed as `Malformed`.
    pub fn decode(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => return Self::Malformed,
        };

        // Double-encoding artifact: a JSON string containing JSON
        let value = match value {
            Value::String(inner) => match serde_json::from_str(&inner) {
                Ok(value) => value,
                Err(_) => return Self::Malformed,
            },
            value => value,
        };

        Self::classify(value)
    }

    fn classify(value: Value) -> Self {
        let Value::Object(map) = value else {
            return Self::Malformed;
        };

        if let Some(Value::String(token)) = map.get("callback") {
            let arguments = match map.get("arguments") {
                Some(Value::Array(arguments)) => arguments.clone(),
                _ => Vec::new(),
            };
            return Self::CallbackReply {
                token: token.clone(),
                arguments,
            };
        }

        if let Some(Value::String(channel)) = map.get("channel") {
            let data = map.get("data").cloned().unwrap_or(Value::Null);
            return Self::ChannelEvent {
                channel: channel.clone(),
                data,
            };
        }

        Self::Malformed
    }
}

/// Split a reply's arguments into the error slot and the results
///
/// The first argument is the error slot by call convention; `null` (or no
/// arguments at all) means success and the rest are the results.
pub fn split_reply(arguments: Vec<Value>) -> Result<Vec<Value>> {
    let mut arguments = arguments.into_iter();
    match arguments.next() {
        None | Some(Value::Null) => Ok(arguments.collect()),
        Some(Value::String(message)) => Err(UsherError::RemoteCall(message)),
        Some(other) => Err(UsherError::RemoteCall(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_omits_empty_arguments() {
        let envelope = Envelope::new("ready", Vec::new(), Some("cb_ready".to_string()));
        let json = envelope.to_json().unwrap();
        assert_eq!(json, r#"{"method":"ready","callback":"cb_ready"}"#);
    }

    #[test]
    fn test_envelope_with_arguments() {
        let envelope = Envelope::new("echo", vec![json!("hi")], Some("cb_0".to_string()));
        let json = envelope.to_json().unwrap();
        assert_eq!(json, r#"{"method":"echo","arguments":["hi"],"callback":"cb_0"}"#);
    }

    #[test]
    fn test_envelope_without_callback() {
        let envelope = Envelope::new("ping", vec![json!(1)], None);
        let json = envelope.to_json().unwrap();
        assert_eq!(json, r#"{"method":"ping","arguments":[1]}"#);
    }

    #[test]
    fn test_decode_callback_reply() {
        let message = InboundMessage::decode(r#"{"callback":"cb_0","arguments":[null,"hi"]}"#);
        assert_eq!(
            message,
            InboundMessage::CallbackReply {
                token: "cb_0".to_string(),
                arguments: vec![json!(null), json!("hi")],
            }
        );
    }

    #[test]
    fn test_decode_channel_event() {
        let message = InboundMessage::decode(r#"{"channel":"chat","data":{"text":"hello"}}"#);
        assert_eq!(
            message,
            InboundMessage::ChannelEvent {
                channel: "chat".to_string(),
                data: json!({"text": "hello"}),
            }
        );
    }

    #[test]
    fn test_decode_double_encoded_matches_single_encoded() {
        let payload = json!({"channel": "chat", "data": [1, 2, 3]});
        let single = payload.to_string();
        let double = serde_json::to_string(&single).unwrap();
        assert_eq!(InboundMessage::decode(&double), InboundMessage::decode(&single));
    }

    #[test]
    fn test_decode_missing_arguments_defaults_empty() {
        let message = InboundMessage::decode(r#"{"callback":"cb_3"}"#);
        assert_eq!(
            message,
            InboundMessage::CallbackReply {
                token: "cb_3".to_string(),
                arguments: Vec::new(),
            }
        );
    }

    #[test]
    fn test_decode_malformed() {
        assert_eq!(InboundMessage::decode("not json"), InboundMessage::Malformed);
        assert_eq!(InboundMessage::decode("42"), InboundMessage::Malformed);
        assert_eq!(InboundMessage::decode(r#""still a string""#), InboundMessage::Malformed);
        assert_eq!(InboundMessage::decode(r#"{"neither":"shape"}"#), InboundMessage::Malformed);
        // Non-string callback/channel fields don't match either shape
        assert_eq!(InboundMessage::decode(r#"{"callback":7}"#), InboundMessage::Malformed);
    }

    #[test]
    fn test_split_reply_success() {
        let results = split_reply(vec![json!(null), json!("hi"), json!(2)]).unwrap();
        assert_eq!(results, vec![json!("hi"), json!(2)]);
    }

    #[test]
    fn test_split_reply_empty_is_success() {
        assert!(split_reply(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_split_reply_error() {
        match split_reply(vec![json!("boom"), json!("ignored")]) {
            Err(UsherError::RemoteCall(message)) => assert_eq!(message, "boom"),
            other => panic!("expected RemoteCall, got {:?}", other),
        }
    }
}
