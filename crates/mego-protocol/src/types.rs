//! Request and response envelopes.

use std::fmt;

use mego_core::{Status, Value};
use serde::{Deserialize, Serialize};

/// Client-supplied correlation token, echoed back in responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric token.
    Number(u64),
    /// String token.
    Text(String),
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::Text(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// One fragment of an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Chunk {
    /// Raw chunk bytes.
    pub data: Vec<u8>,
    /// Marks the final chunk of the file.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub last: bool,
    /// Asks the server to discard the upload.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub abort: bool,
}

impl Chunk {
    /// Creates an intermediate chunk.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Creates the final chunk.
    pub fn last(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            last: true,
            abort: false,
        }
    }

    /// Creates an abort marker.
    pub fn abort() -> Self {
        Self {
            abort: true,
            ..Self::default()
        }
    }

    /// Returns the chunk length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the chunk carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A method call sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Method name.
    pub method: String,
    /// Correlation token.
    pub id: RequestId,
    /// Positional parameters.
    ///
    /// Each one is parsed into a dynamic [`Value`] with the rest of the frame;
    /// only the conversion to a concrete type is deferred until a handler asks
    /// for that index. Frames are size-checked before decoding, which bounds
    /// that parse.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
    /// Upload fragment, only for methods that receive files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<Chunk>,
}

impl Request {
    /// Creates a request without parameters.
    pub fn new(method: impl Into<String>, id: impl Into<RequestId>) -> Self {
        Self {
            method: method.into(),
            id: id.into(),
            params: Vec::new(),
            chunk: None,
        }
    }

    /// Builder: set positional parameters.
    pub fn with_params(mut self, params: impl IntoIterator<Item = Value>) -> Self {
        self.params = params.into_iter().collect();
        self
    }

    /// Builder: attach an upload chunk.
    pub fn with_chunk(mut self, chunk: Chunk) -> Self {
        self.chunk = Some(chunk);
        self
    }
}

/// A reply or an event pushed to the client.
///
/// Replies echo the request `id`; event deliveries carry `event` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Correlation token of the request being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Status code.
    pub status: Status,
    /// Error message, usually present on error codes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Event name for pub/sub deliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Result payload.
    #[serde(default)]
    pub result: Value,
}

impl Response {
    /// Creates a reply to the request identified by `id`.
    pub fn reply(id: RequestId, status: Status, result: Value) -> Self {
        Self {
            id: Some(id),
            status,
            message: None,
            event: None,
            result,
        }
    }

    /// Creates an error reply carrying a message.
    pub fn error(id: Option<RequestId>, status: Status, message: impl Into<String>) -> Self {
        Self {
            id,
            status,
            message: Some(message.into()),
            event: None,
            result: Value::Null,
        }
    }

    /// Creates an event delivery.
    pub fn event(name: impl Into<String>, result: Value) -> Self {
        Self {
            id: None,
            status: Status::Ok,
            message: None,
            event: Some(name.into()),
            result,
        }
    }

    /// True if this is a pub/sub delivery rather than a reply.
    pub fn is_event(&self) -> bool {
        self.event.is_some()
    }
}
