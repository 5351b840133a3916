//! Codec failures.

use thiserror::Error;

/// Why one value could not be read from or written to the wire.
///
/// [`TypeError::Incomplete`] is the only variant that means "not enough
/// bytes yet"; incremental decoders treat it as a request for more input
/// rather than a failure. The others are local to a single value, so a
/// decoder records them against the column and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// The input ends inside the value.
    #[error("value needs {needed} bytes, {available} buffered")]
    Incomplete {
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// A TYPE_INFO names a type id this codec does not know.
    #[error("unknown type id 0x{0:02X}")]
    UnknownType(u8),

    /// Bytes that no valid value of the wire type produces.
    #[error("malformed {wire} data: {detail}")]
    Malformed {
        /// Wire layout being read.
        wire: &'static str,
        /// What was wrong.
        detail: String,
    },

    /// The value exists but the target cannot represent it.
    #[error("{target} cannot hold {detail}")]
    Overflow {
        /// Wire or native type that was too small.
        target: &'static str,
        /// The offending value or size.
        detail: String,
    },

    /// Text that does not survive the column's code page.
    #[error("text does not round-trip through {charset}")]
    Charset {
        /// Encoding name.
        charset: &'static str,
    },

    /// No conversion exists between this value and the wire type.
    #[error("a {value} value cannot be sent as {wire}")]
    Incompatible {
        /// Kind of native value.
        value: &'static str,
        /// Wire type requested.
        wire: &'static str,
    },
}

impl TypeError {
    /// Whether this error only means the input ended early.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }

    pub(crate) fn malformed(wire: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            wire,
            detail: detail.into(),
        }
    }

    pub(crate) fn overflow(target: &'static str, detail: impl ToString) -> Self {
        Self::Overflow {
            target,
            detail: detail.to_string(),
        }
    }
}

/// Fail with [`TypeError::Incomplete`] unless `buf` holds `needed` bytes.
pub(crate) fn ensure_remaining(buf: &impl bytes::Buf, needed: usize) -> Result<(), TypeError> {
    if buf.remaining() < needed {
        return Err(TypeError::Incomplete {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}
