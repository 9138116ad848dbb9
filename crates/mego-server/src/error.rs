//! Server error types.

use std::io;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the engine and its transport.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (listener, config file, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (encoding, decoding, size limits).
    #[error("Protocol error: {0}")]
    Protocol(#[from] mego_protocol::ProtocolError),

    /// WebSocket handshake or frame error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The engine already holds the maximum number of sessions.
    #[error("Session limit reached ({max})")]
    SessionLimit { max: usize },

    /// No session is registered under the given ID.
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    /// The event was never declared.
    #[error("the event doesn't exist: {event}")]
    EventNotFound { event: String },

    /// The event exists but the channel has no subscribers.
    #[error("the channel doesn't exist: {event}/{channel}")]
    ChannelNotFound { event: String, channel: String },

    /// The connection is gone.
    #[error("Transport closed")]
    TransportClosed,

    /// The connection's outbound queue is full.
    #[error("Transport send queue is full")]
    TransportFull,
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a session-not-found error.
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound { id: id.into() }
    }

    /// Creates an event-not-found error.
    pub fn event_not_found(event: impl Into<String>) -> Self {
        Self::EventNotFound {
            event: event.into(),
        }
    }

    /// Creates a channel-not-found error.
    pub fn channel_not_found(event: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::ChannelNotFound {
            event: event.into(),
            channel: channel.into(),
        }
    }
}
