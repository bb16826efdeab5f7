//! Push channel message envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{CheckResult, Target};

/// Raw `{type, data}` frame as it travels over the push channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A decoded push channel message
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// Full replacement target list
    TargetsUpdated(Vec<Target>),
    Ping,
    Pong,
    /// Result submitted by the agent
    CheckResult(CheckResult),
    /// Controller acknowledgment of a pushed result
    CheckResultAck(Option<Value>),
    /// Error reported by the controller
    Error(String),
    /// Any kind this agent does not understand
    Unknown(String),
}

impl PushMessage {
    pub const TARGETS_UPDATED: &'static str = "sites_updated";
    pub const PING: &'static str = "ping";
    pub const PONG: &'static str = "pong";
    pub const CHECK_RESULT: &'static str = "check_result";
    pub const CHECK_RESULT_ACK: &'static str = "check_result_ack";
    pub const ERROR: &'static str = "error";

    /// Wire name of this message kind
    pub fn kind(&self) -> &str {
        match self {
            PushMessage::TargetsUpdated(_) => Self::TARGETS_UPDATED,
            PushMessage::Ping => Self::PING,
            PushMessage::Pong => Self::PONG,
            PushMessage::CheckResult(_) => Self::CHECK_RESULT,
            PushMessage::CheckResultAck(_) => Self::CHECK_RESULT_ACK,
            PushMessage::Error(_) => Self::ERROR,
            PushMessage::Unknown(kind) => kind,
        }
    }

    /// Decode a text frame, re-decoding the payload according to its kind
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let data = envelope.data;

        let message = match envelope.kind.as_str() {
            Self::TARGETS_UPDATED => {
                PushMessage::TargetsUpdated(serde_json::from_value(data.unwrap_or(Value::Null))?)
            }
            Self::PING => PushMessage::Ping,
            Self::PONG => PushMessage::Pong,
            Self::CHECK_RESULT => {
                PushMessage::CheckResult(serde_json::from_value(data.unwrap_or(Value::Null))?)
            }
            Self::CHECK_RESULT_ACK => PushMessage::CheckResultAck(data),
            Self::ERROR => {
                let message = match data {
                    Some(Value::Object(map)) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
                    Some(Value::String(message)) => message,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                PushMessage::Error(message)
            }
            _ => PushMessage::Unknown(envelope.kind),
        };

        Ok(message)
    }

    /// Encode this message as a text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let data = match self {
            PushMessage::TargetsUpdated(targets) => Some(serde_json::to_value(targets)?),
            PushMessage::CheckResult(result) => Some(serde_json::to_value(result)?),
            PushMessage::CheckResultAck(data) => data.clone(),
            PushMessage::Error(message) => Some(serde_json::json!({ "message": message })),
            PushMessage::Ping | PushMessage::Pong | PushMessage::Unknown(_) => None,
        };

        serde_json::to_string(&Envelope { kind: self.kind().to_string(), data })
    }
}
