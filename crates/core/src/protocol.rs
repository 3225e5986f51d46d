//! Defines the JSON frame protocol spoken over the chat websocket.
//!
//! The client sends exactly one [`OutboundRequest`] right after the channel
//! opens. The server answers with a run of `token` frames closed by a single
//! `done` or `error` frame. [`decode`] is the only place where malformed or
//! unknown frames are rejected; everything downstream works on the typed
//! [`InboundEvent`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Text used for a server `error` frame that carries no usable message.
pub const DEFAULT_ERROR_MESSAGE: &str = "Error while chatting.";

/// The single request frame sent from the client to the server.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// The question typed by the user.
    pub query: String,
    /// The identifier the tutor backend tracks mastery under.
    pub user_id: String,
}

impl OutboundRequest {
    pub fn new(query: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: user_id.into(),
        }
    }
}

/// A validated frame received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A partial chunk of the assistant's answer.
    Token { text: String },
    /// The answer is complete.
    Done,
    /// The server gave up on this exchange.
    Error { message: String },
}

/// Raised when an inbound frame is not valid JSON or has an unexpected shape.
#[derive(Debug, thiserror::Error)]
#[error("Malformed inbound frame: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Wire shape of server frames, before defaults are applied.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Token {
        text: String,
    },
    Done,
    Error {
        /// Any JSON value; only a non-empty string is kept.
        #[serde(default)]
        message: Option<Value>,
    },
}

/// Parses one raw text frame into an [`InboundEvent`].
pub fn decode(raw: &str) -> Result<InboundEvent, DecodeError> {
    let frame: ServerFrame = serde_json::from_str(raw)?;
    Ok(match frame {
        ServerFrame::Token { text } => InboundEvent::Token { text },
        ServerFrame::Done => InboundEvent::Done,
        ServerFrame::Error { message } => InboundEvent::Error {
            message: match message {
                Some(Value::String(m)) if !m.is_empty() => m,
                _ => DEFAULT_ERROR_MESSAGE.to_string(),
            },
        },
    })
}

/// Serializes the request frame sent once the channel is open.
pub fn encode(req: &OutboundRequest) -> Result<String, serde_json::Error> {
    serde_json::to_string(req)
}
