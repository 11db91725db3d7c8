//! Outbound message shapes.
//!
//! The core treats these as opaque payloads: it only needs them to be
//! serializable. They are encoded to JSON once, before entering a session
//! queue, so the drain task only ever deals with bytes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{EmitError, EmitResult};

/// Routing and correlation metadata copied from the client's request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestHeader {
    pub env: String,
    pub idc: String,
    pub ip: String,
    pub pid: String,
    pub sys: String,
    pub username: String,
    pub language: String,
    pub protocol_type: String,
    pub protocol_version: String,
    pub protocol_desc: String,
    /// Correlates a response with the request that produced it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Topic the response relates to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl RequestHeader {
    /// Creates a header carrying only a correlation id.
    pub fn correlated(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Default::default()
        }
    }
}

/// Result code pushed back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCode {
    pub ret_code: String,
    pub err_msg: String,
}

impl StatusCode {
    pub const SUCCESS: (&'static str, &'static str) = ("0", "success");
    pub const OVERLOAD: (&'static str, &'static str) = ("1", "eventMesh overload, try later");
    pub const REQUEST_CODE_INVALID: (&'static str, &'static str) =
        ("2", "requestCode can't be null, or must be number");
    pub const SEND_ASYNC_MSG_ERR: (&'static str, &'static str) = ("14", "send async msg err");
    pub const SUBSCRIBE_ERR: (&'static str, &'static str) = ("17", "subscribe err");
    pub const HEARTBEAT_ERR: (&'static str, &'static str) = ("19", "heartbeat err");
    pub const RUNTIME_ERR: (&'static str, &'static str) = ("28", "eventMesh runtime err");

    pub fn new(ret_code: impl Into<String>, err_msg: impl Into<String>) -> Self {
        Self {
            ret_code: ret_code.into(),
            err_msg: err_msg.into(),
        }
    }

    /// Builds a status from one of the well-known `(code, message)` pairs.
    #[must_use]
    pub fn from_known((code, msg): (&'static str, &'static str)) -> Self {
        Self::new(code, msg)
    }

    /// Builds a well-known status with extra detail appended to the message.
    #[must_use]
    pub fn with_detail((code, msg): (&'static str, &'static str), detail: &str) -> Self {
        Self::new(code, format!("{msg}: {detail}"))
    }

    #[must_use]
    pub fn success() -> Self {
        Self::from_known(Self::SUCCESS)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.ret_code == Self::SUCCESS.0
    }
}

/// A response to push onto a session stream. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    header: RequestHeader,
    status: StatusCode,
}

impl OutboundMessage {
    pub fn new(header: RequestHeader, status: StatusCode) -> Self {
        Self { header, status }
    }

    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    pub fn status(&self) -> &StatusCode {
        &self.status
    }

    /// Serializes the message into a wire frame payload.
    pub fn encode(&self) -> EmitResult<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| EmitError::InvalidMessage(e.to_string()))
    }
}
