//! Engine error types.

use tds_framer::FramerError;
use tds_protocol::{ProtocolError, ServerMessage};
use tds_tls::TlsError;
use tds_types::TypeError;
use thiserror::Error;

/// Errors that can occur while driving a TDS session.
#[derive(Debug, Error)]
pub enum Error {
    /// The byte stream failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet framing failed.
    #[error("framing error: {0}")]
    Framer(#[from] FramerError),

    /// The server sent bytes that do not form valid tokens or messages.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// Login was refused, by the server or by encryption negotiation.
    #[error("handshake rejected: {message}")]
    HandshakeRejected {
        /// Server error number, when the server refused the login.
        number: Option<i32>,
        /// Server message text, or the local reason.
        message: String,
    },

    /// The server reported an error for a command.
    ///
    /// The response has been drained and the connection is usable.
    #[error("server error {}: {}", .0.number, .0.message)]
    Server(ServerMessage),

    /// A value could not be converted.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// Invalid configuration, reported before any I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// The login did not complete in time.
    #[error("login timed out")]
    LoginTimeout,

    /// A response is still outstanding.
    #[error("previous response has not been drained")]
    ResponsePending,

    /// An attention was sent and has not been acknowledged.
    #[error("cancellation not yet acknowledged by the server")]
    AttentionPending,

    /// An earlier failure left the connection unusable.
    #[error("connection is poisoned by an earlier failure")]
    Poisoned,
}

impl Error {
    /// Whether the connection must be discarded after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Framer(e) => e.is_fatal(),
            Self::Io(_)
            | Self::Protocol(_)
            | Self::Tls(_)
            | Self::HandshakeRejected { .. }
            | Self::LoginTimeout
            | Self::Poisoned => true,
            Self::Server(_)
            | Self::Type(_)
            | Self::Config(_)
            | Self::ResponsePending
            | Self::AttentionPending => false,
        }
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        match self {
            Self::Server(msg) => msg.number == number,
            Self::HandshakeRejected { number: n, .. } => *n == Some(number),
            _ => false,
        }
    }

    /// Severity class (0-25) if this is a server error.
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server(msg) => Some(msg.class),
            _ => None,
        }
    }

    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            number: None,
            message: message.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
