//! Call and reply envelopes.
//!
//! ```text
//! Call:    { "type": "call", "id": string, "method": string, "params": any }
//! Cancel:  { "type": "call", "id": string, "method": ".cancel" }
//! Ok:      { "id": string, "result": any }
//! Error:   { "id": string, "error": string }
//! ```
//!
//! Ids and methods are opaque strings. Params are kept as raw JSON until the
//! handler asks for them, so they pass through the dispatcher untouched.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;

use super::{CANCEL_METHOD, MESSAGE_TYPE_CALL};
use crate::message::Message;
use crate::stream::ReplySender;
use crate::{Result, StreamError};

/// Client-chosen call identifier, unique among the active calls of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for CallId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the call handler a call is routed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallMethod(String);

impl CallMethod {
    pub fn new(method: impl Into<String>) -> Self {
        Self(method.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the built-in cancel pseudo-method.
    pub fn is_cancel(&self) -> bool {
        self.0 == CANCEL_METHOD
    }
}

impl From<&str> for CallMethod {
    fn from(method: &str) -> Self {
        Self(method.to_string())
    }
}

impl From<String> for CallMethod {
    fn from(method: String) -> Self {
        Self(method)
    }
}

impl Borrow<str> for CallMethod {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded call envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub method: CallMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,
}

#[derive(Serialize)]
struct CallEnvelope<'a> {
    #[serde(rename = "type")]
    message_type: &'a str,
    id: &'a CallId,
    method: &'a CallMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a RawValue>,
}

impl Call {
    pub fn new(id: impl Into<CallId>, method: impl Into<CallMethod>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    /// A cancel request for the call with the given id.
    pub fn cancel(id: impl Into<CallId>) -> Self {
        Self::new(id, CANCEL_METHOD)
    }

    /// Attach parameters, encoded as JSON.
    pub fn with_params<T: Serialize + ?Sized>(mut self, params: &T) -> Result<Self> {
        self.params = Some(serde_json::value::to_raw_value(params)?);
        Ok(self)
    }

    /// Decode the parameters. Missing params decode as JSON `null`.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T> {
        let decoded = match &self.params {
            Some(raw) => serde_json::from_str(raw.get()),
            None => serde_json::from_value(Value::Null),
        };
        decoded.map_err(|e| StreamError::InvalidParams {
            method: self.method.to_string(),
            message: e.to_string(),
        })
    }

    /// Raw parameter JSON, if any was sent.
    pub fn raw_params(&self) -> Option<&str> {
        self.params.as_deref().map(RawValue::get)
    }

    /// Encode as a full `type: "call"` message.
    pub fn to_message(&self) -> Result<Message> {
        Message::from_json(&CallEnvelope {
            message_type: MESSAGE_TYPE_CALL,
            id: &self.id,
            method: &self.method,
            params: self.params.as_deref(),
        })
    }
}

/// One reply frame for a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn ok(id: CallId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: CallId, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
        }
    }

    /// The `"ok"` acknowledgement sent for cancel requests.
    pub fn ack(id: CallId) -> Self {
        Self::ok(id, Value::String("ok".to_string()))
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl ReplySender {
    /// Encode and queue a call reply.
    pub async fn send_reply(&self, reply: &Reply) -> Result<()> {
        self.send_json(reply).await
    }
}
