//! Control message model.
//!
//! Both peers exchange the same envelope: `{type, id, payload}`. The `id` is
//! an opaque correlation string echoed back on responses; `payload` is a
//! type-specific JSON object.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Default wall-clock budget for an `exec` request.
pub const DEFAULT_EXEC_TIMEOUT_MS: u64 = 30_000;

/// Message discriminator carried in the `type` field.
///
/// Unknown strings survive decoding as [`MessageKind::Unknown`] so the peer
/// can be answered with an `error` frame instead of tearing the stream down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Ready,
    Ping,
    Pong,
    Exec,
    ExecResult,
    Error,
    #[serde(untagged)]
    Unknown(String),
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Exec => "exec",
            Self::ExecResult => "exec_result",
            Self::Error => "error",
            Self::Unknown(other) => other.as_str(),
        };
        f.write_str(name)
    }
}

/// A single control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message discriminator.
    #[serde(rename = "type")]
    pub kind: MessageKind,

    /// Opaque correlation id, echoed on responses.
    #[serde(default)]
    pub id: String,

    /// Type-specific payload object.
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    /// The `ready` frame sent once per connection, before any read.
    pub fn ready() -> Self {
        Self {
            kind: MessageKind::Ready,
            id: uuid::Uuid::new_v4().to_string(),
            payload: json!({}),
        }
    }

    /// Reply to a `ping`, echoing its id.
    pub fn pong(id: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Pong,
            id: id.into(),
            payload: json!({}),
        }
    }

    /// Reply to an `exec`, echoing its id.
    pub fn exec_result(id: impl Into<String>, result: &ExecResult) -> Self {
        Self {
            kind: MessageKind::ExecResult,
            id: id.into(),
            payload: serde_json::to_value(result).unwrap_or(Value::Null),
        }
    }

    /// Reply to an unintelligible message.
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            id: id.into(),
            payload: json!({ "message": message.into() }),
        }
    }
}

/// Payload of an `exec` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecRequest {
    #[serde(default)]
    pub command: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_EXEC_TIMEOUT_MS
}

impl Default for ExecRequest {
    fn default() -> Self {
        Self {
            command: String::new(),
            timeout_ms: DEFAULT_EXEC_TIMEOUT_MS,
        }
    }
}

impl ExecRequest {
    /// Decode an `exec` payload, falling back to defaults on malformed input.
    pub fn from_payload(payload: &Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or_default()
    }
}

/// Payload of an `exec_result` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Payload of an `error` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}
