//! Framer error types.

use std::sync::Arc;

use tds_protocol::{PacketType, ProtocolError};
use thiserror::Error;

/// Errors raised by the packet framer.
///
/// Every variant except [`FramerError::Usage`] leaves the framer poisoned.
#[derive(Debug, Clone, Error)]
pub enum FramerError {
    /// The byte stream failed.
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    /// A packet header could not be trusted.
    #[error("corrupt packet: {0}")]
    Corrupt(#[from] ProtocolError),

    /// A packet exceeds the negotiated size.
    #[error("packet of {size} bytes exceeds negotiated size {max}")]
    PacketTooLarge {
        /// Packet size.
        size: usize,
        /// Negotiated size.
        max: usize,
    },

    /// The peer closed the stream.
    #[error("connection closed")]
    ConnectionClosed,

    /// A continuation packet changed type mid-message.
    #[error("packet type changed from {expected:?} to {actual:?} inside a message")]
    TypeChanged {
        /// Type of the message being read.
        expected: PacketType,
        /// Type of the offending packet.
        actual: PacketType,
    },

    /// An earlier failure left the stream at an unknown position.
    #[error("framer is poisoned by an earlier failure")]
    Poisoned,

    /// The call does not fit the current read or write state.
    #[error("framer misuse: {0}")]
    Usage(&'static str),
}

impl From<std::io::Error> for FramerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl FramerError {
    /// Whether the framer can no longer be used.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Usage(_))
    }
}
