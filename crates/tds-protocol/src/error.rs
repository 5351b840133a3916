//! Protocol-level error types.

use tds_types::TypeError;
use thiserror::Error;

/// Errors raised while encoding or decoding TDS structures.
///
/// [`ProtocolError::Incomplete`] is not a failure: it means the input ended
/// inside a structure and decoding should be retried with more bytes. Every
/// other variant means the byte stream is corrupt or a request cannot be
/// represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Input ended before the structure was complete.
    #[error("incomplete input: need {needed} bytes, have {available}")]
    Incomplete {
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Unexpected end of a complete message.
    #[error("unexpected end of message")]
    UnexpectedEof,

    /// Unknown packet type byte.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Packet length field outside the allowed range.
    #[error("invalid packet length {length} (allowed 8..={max})")]
    InvalidPacketLength {
        /// Declared length.
        length: u16,
        /// Largest length allowed.
        max: usize,
    },

    /// Unknown PRELOGIN option.
    #[error("invalid prelogin option: 0x{0:02X}")]
    InvalidPreloginOption(u8),

    /// Unknown token type byte.
    #[error("unknown token type: 0x{0:02X}")]
    UnknownToken(u8),

    /// A structure's length fields disagree with its content.
    #[error("malformed {what}: {reason}")]
    Malformed {
        /// Structure name.
        what: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// ROW or NBCROW without a preceding COLMETADATA.
    #[error("row token received before column metadata")]
    RowWithoutMetadata,

    /// A request field is too long for its wire length field.
    #[error("{field} is too long ({len} units)")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Actual length.
        len: usize,
    },

    /// Value framing or type info error.
    #[error(transparent)]
    Type(TypeError),
}

impl ProtocolError {
    /// Whether the input simply ended early.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }

    /// Build a [`ProtocolError::Malformed`] for `what`.
    pub fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            reason: reason.into(),
        }
    }
}

impl From<TypeError> for ProtocolError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::Incomplete { needed, available } => Self::Incomplete { needed, available },
            other => Self::Type(other),
        }
    }
}

/// Fail with [`ProtocolError::Incomplete`] unless `buf` holds `needed` bytes.
pub(crate) fn ensure(buf: &impl bytes::Buf, needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Incomplete {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}
