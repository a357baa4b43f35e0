//! Wire protocol message types.
//!
//! Every frame on a driver-manager connection is one [`Message`] serialized as
//! a single JSON object. Four message kinds exist: the one-shot `handshake`
//! that announces a manager's driver catalog, `request`/`response` pairs
//! correlated by `id`, and `ping` liveness probes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default TCP port a host listens on for driver-manager connections.
pub const DEFAULT_PORT: u16 = 5245;

/// Correlation id carried by every handshake frame.
pub const HANDSHAKE_ID: &str = "handshake";

/// Protocol-level rejection (malformed message, unknown method, bad params).
pub const CODE_BAD_REQUEST: i32 = 400;
/// The named driver or instance does not exist on this manager.
pub const CODE_NOT_FOUND: i32 = 404;
/// The driver itself failed while servicing the operation.
pub const CODE_DRIVER_ERROR: i32 = 500;

/// Message kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Handshake,
    Request,
    Response,
    Ping,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Handshake => write!(f, "handshake"),
            MessageType::Request => write!(f, "request"),
            MessageType::Response => write!(f, "response"),
            MessageType::Ping => write!(f, "ping"),
        }
    }
}

/// Error payload carried inside a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: i32,
    pub message: String,
}

impl ErrorInfo {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(CODE_BAD_REQUEST, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CODE_NOT_FOUND, message)
    }

    #[must_use]
    pub fn driver_error(message: impl Into<String>) -> Self {
        Self::new(CODE_DRIVER_ERROR, message)
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "driver manager error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorInfo {}

/// One protocol frame.
///
/// Invariants: `method`/`params` are present only on requests, `result` and
/// `error` are mutually exclusive on responses, `id` is empty only for
/// fire-and-forget frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Message {
    #[must_use]
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Option<Map<String, Value>>) -> Self {
        Self {
            id: id.into(),
            message_type: MessageType::Request,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    #[must_use]
    pub fn response(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            message_type: MessageType::Response,
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn error_response(id: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            id: id.into(),
            message_type: MessageType::Response,
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn ping(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message_type: MessageType::Ping,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    /// Build the one-shot handshake frame carrying a manager's catalog.
    #[must_use]
    pub fn handshake(result: Value) -> Self {
        Self {
            id: HANDSHAKE_ID.to_string(),
            message_type: MessageType::Handshake,
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Parse a single wire line into a `Message`.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or missing required fields.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Serialize this message to its single-line JSON form (no trailing newline).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        self.message_type == MessageType::Response
    }
}

/// Catalog snapshot received (client role) or sent (server role) at
/// connection start. Immutable after capture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandshakeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<String>,
    #[serde(default)]
    pub driver_count: usize,
    #[serde(default)]
    pub drivers: Map<String, Value>,
}

impl HandshakeInfo {
    /// Decode the `result` payload of a handshake frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match the handshake shape.
    pub fn from_result(result: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(result.clone())
    }

    #[must_use]
    pub fn has_driver(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }
}
