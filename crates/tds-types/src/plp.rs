//! Partially length-prefixed (PLP) values.
//!
//! Layout: a `u64` total length (`u64::MAX` for NULL, `u64::MAX - 1` when the
//! sender does not know it), then chunks of `u32 length + bytes`, terminated
//! by a zero-length chunk.

use bytes::{Buf, BufMut, Bytes};

use crate::error::{TypeError, ensure_remaining};

/// Total-length marker for a NULL PLP value.
pub const PLP_NULL: u64 = u64::MAX;

/// Total-length marker for a PLP value of undeclared length.
pub const PLP_UNKNOWN_LENGTH: u64 = u64::MAX - 1;

/// Chunks of one PLP value, borrowed out of the input buffer.
///
/// [`PlpChunks::read`] validates the whole chunk sequence up front so
/// iteration cannot fail and costs no copies.
#[derive(Debug, Clone)]
pub struct PlpChunks {
    declared: Option<u64>,
    body: Bytes,
    cursor: Bytes,
}

impl PlpChunks {
    /// Read one PLP value, returning `None` for NULL.
    ///
    /// On success `src` is advanced past the terminator. If the input ends
    /// before the terminator, `src` is left untouched and
    /// [`TypeError::Incomplete`] is returned.
    pub fn read(src: &mut Bytes) -> Result<Option<Self>, TypeError> {
        let mut scan = src.clone();
        ensure_remaining(&scan, 8)?;
        let total = scan.get_u64_le();
        if total == PLP_NULL {
            src.advance(8);
            return Ok(None);
        }

        let mut payload_len = 0u64;
        let mut consumed = 8usize;
        loop {
            ensure_remaining(&scan, 4)?;
            let chunk_len = scan.get_u32_le() as usize;
            consumed += 4;
            if chunk_len == 0 {
                break;
            }
            ensure_remaining(&scan, chunk_len)?;
            scan.advance(chunk_len);
            consumed += chunk_len;
            payload_len += chunk_len as u64;
        }

        let declared = (total != PLP_UNKNOWN_LENGTH).then_some(total);
        if let Some(declared) = declared {
            if declared != payload_len {
                return Err(TypeError::malformed(
                    "PLP",
                    format!("declared {declared} bytes but chunks carry {payload_len}"),
                ));
            }
        }

        let body = src.slice(8..consumed);
        src.advance(consumed);
        Ok(Some(Self {
            declared,
            cursor: body.clone(),
            body,
        }))
    }

    /// Declared total length, if the sender supplied one.
    #[must_use]
    pub fn declared_length(&self) -> Option<u64> {
        self.declared
    }

    /// Rewind iteration to the first chunk.
    pub fn restart(&mut self) {
        self.cursor = self.body.clone();
    }

    /// Concatenate all chunks. A single chunk is returned without copying.
    #[must_use]
    pub fn into_bytes(mut self) -> Bytes {
        self.restart();
        let chunks = self.by_ref();
        let Some(first) = chunks.next() else {
            return Bytes::new();
        };
        let Some(second) = chunks.next() else {
            return first;
        };
        let mut joined = Vec::with_capacity(first.len() + second.len());
        joined.extend_from_slice(&first);
        joined.extend_from_slice(&second);
        for chunk in chunks {
            joined.extend_from_slice(&chunk);
        }
        Bytes::from(joined)
    }
}

impl PartialEq for PlpChunks {
    fn eq(&self, other: &Self) -> bool {
        self.declared == other.declared && self.body == other.body
    }
}

impl Iterator for PlpChunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.cursor.remaining() < 4 {
            return None;
        }
        let len = self.cursor.get_u32_le() as usize;
        if len == 0 {
            return None;
        }
        Some(self.cursor.split_to(len))
    }
}

/// Write `data` as a PLP value with a known length and a single chunk.
pub fn write_plp(dst: &mut impl BufMut, data: &[u8]) -> Result<(), TypeError> {
    dst.put_u64_le(data.len() as u64);
    if !data.is_empty() {
        let len = u32::try_from(data.len())
            .map_err(|_| TypeError::overflow("PLP chunk", format!("{} bytes", data.len())))?;
        dst.put_u32_le(len);
        dst.put_slice(data);
    }
    dst.put_u32_le(0);
    Ok(())
}

/// Write a NULL PLP value.
pub fn write_plp_null(dst: &mut impl BufMut) {
    dst.put_u64_le(PLP_NULL);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn chunked(total: u64, chunks: &[&[u8]]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u64_le(total);
        for chunk in chunks {
            buf.put_u32_le(chunk.len() as u32);
            buf.put_slice(chunk);
        }
        buf.put_u32_le(0);
        buf.freeze()
    }

    #[test]
    fn test_multi_chunk_iteration() {
        let mut src = chunked(6, &[b"abc", b"def"]);
        let chunks = PlpChunks::read(&mut src).unwrap().unwrap();
        assert!(src.is_empty());
        let parts: Vec<Bytes> = chunks.clone().collect();
        assert_eq!(parts, vec![Bytes::from_static(b"abc"), Bytes::from_static(b"def")]);
        assert_eq!(chunks.into_bytes(), Bytes::from_static(b"abcdef"));
    }

    #[test]
    fn test_unknown_length_accepted() {
        let mut src = chunked(PLP_UNKNOWN_LENGTH, &[b"xy"]);
        let chunks = PlpChunks::read(&mut src).unwrap().unwrap();
        assert_eq!(chunks.declared_length(), None);
        assert_eq!(chunks.into_bytes(), Bytes::from_static(b"xy"));
    }

    #[test]
    fn test_null_marker() {
        let mut src = Bytes::from_static(&[0xFF; 8]);
        assert!(PlpChunks::read(&mut src).unwrap().is_none());
        assert!(src.is_empty());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut src = chunked(10, &[b"abc"]);
        assert!(matches!(
            PlpChunks::read(&mut src),
            Err(TypeError::Malformed { wire: "PLP", .. })
        ));
    }

    #[test]
    fn test_truncated_leaves_input() {
        let full = chunked(6, &[b"abc", b"def"]);
        let mut src = full.slice(..full.len() - 2);
        let before = src.len();
        assert!(PlpChunks::read(&mut src).unwrap_err().is_incomplete());
        assert_eq!(src.len(), before);
    }

    #[test]
    fn test_restart() {
        let mut src = chunked(3, &[b"abc"]);
        let mut chunks = PlpChunks::read(&mut src).unwrap().unwrap();
        assert_eq!(chunks.next().unwrap(), Bytes::from_static(b"abc"));
        assert!(chunks.next().is_none());
        chunks.restart();
        assert_eq!(chunks.next().unwrap(), Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_write_roundtrip() {
        let mut buf = BytesMut::new();
        write_plp(&mut buf, b"hello").unwrap();
        let mut src = buf.freeze();
        let chunks = PlpChunks::read(&mut src).unwrap().unwrap();
        assert_eq!(chunks.declared_length(), Some(5));
        assert_eq!(chunks.into_bytes(), Bytes::from_static(b"hello"));
    }
}
