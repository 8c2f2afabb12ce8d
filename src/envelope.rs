//! JSON-RPC shaped envelopes exchanged on the signaling topics.
//!
//! Requests arrive as `{"jsonrpc":"2.0","id":<int>,"method":<string>,"params":<optional>}` and
//! replies leave as `{"jsonrpc":"2.0","id":<int>,"result":<string>}`. A reply without `result`
//! is still a reply: it acknowledges the id without content.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: i64, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: impl Into<Value>) -> Self {
        self.params = Some(params.into());
        self
    }

    /// `params` when it is a JSON string; session descriptions travel this way.
    pub fn params_str(&self) -> Option<&str> {
        self.params.as_ref().and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub jsonrpc: String,
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Reply {
    /// Reply that carries only the id.
    pub fn bare(id: i64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
        }
    }

    pub fn with_result(id: i64, result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            ..Self::bare(id)
        }
    }
}

/// Decode an inbound payload into a request.
///
/// Anything that is not an object with an integer `id` and a string `method` is rejected;
/// callers drop those without replying.
pub fn decode(payload: &[u8]) -> Result<Request, DecodeError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Syntax(e.to_string()))?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let id = object
        .get("id")
        .and_then(Value::as_i64)
        .ok_or(DecodeError::MissingId)?;
    let method = object
        .get("method")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingMethod)?;
    let jsonrpc = object
        .get("jsonrpc")
        .and_then(Value::as_str)
        .unwrap_or(JSONRPC_VERSION);

    Ok(Request {
        jsonrpc: jsonrpc.to_owned(),
        id,
        method: method.to_owned(),
        params: object.get("params").filter(|p| !p.is_null()).cloned(),
    })
}

/// Serialize an envelope in compact form.
pub fn encode<T: Serialize>(envelope: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}
