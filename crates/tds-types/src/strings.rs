//! UTF-16LE string helpers shared by the value codec and the protocol layer.
//!
//! TDS counts `B_VARCHAR` and `US_VARCHAR` lengths in UTF-16 code units, not
//! bytes; value payloads (NVARCHAR and friends) are counted in bytes.

use bytes::{Buf, BufMut};

use crate::error::{TypeError, ensure_remaining};

/// Decode UTF-16LE bytes into a `String`.
pub fn decode_utf16(data: &[u8]) -> Result<String, TypeError> {
    if data.len() % 2 != 0 {
        return Err(TypeError::malformed(
            "UTF-16",
            format!("odd length {}", data.len()),
        ));
    }

    let units = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));

    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|e| TypeError::malformed("UTF-16", e.to_string()))
}

/// Write `s` as UTF-16LE without a length prefix.
pub fn encode_utf16(s: &str, dst: &mut impl BufMut) {
    for unit in s.encode_utf16() {
        dst.put_u16_le(unit);
    }
}

/// Byte length of `s` once encoded as UTF-16LE.
#[must_use]
pub fn utf16_byte_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

/// Read a string of `char_count` UTF-16 code units.
pub fn read_utf16(src: &mut impl Buf, char_count: usize) -> Result<String, TypeError> {
    let byte_count = char_count * 2;
    ensure_remaining(src, byte_count)?;
    let mut raw = vec![0u8; byte_count];
    src.copy_to_slice(&mut raw);
    decode_utf16(&raw)
}

/// Read a `B_VARCHAR`: one length byte (in characters) then UTF-16LE.
pub fn read_b_varchar(src: &mut impl Buf) -> Result<String, TypeError> {
    ensure_remaining(src, 1)?;
    let len = src.get_u8() as usize;
    read_utf16(src, len)
}

/// Read a `US_VARCHAR`: two length bytes (in characters) then UTF-16LE.
pub fn read_us_varchar(src: &mut impl Buf) -> Result<String, TypeError> {
    ensure_remaining(src, 2)?;
    let len = src.get_u16_le() as usize;
    read_utf16(src, len)
}

/// Write a `B_VARCHAR`.
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) -> Result<(), TypeError> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = u8::try_from(units.len())
        .map_err(|_| TypeError::overflow("B_VARCHAR", format!("{} characters", units.len())))?;
    dst.put_u8(len);
    for unit in units {
        dst.put_u16_le(unit);
    }
    Ok(())
}

/// Write a `US_VARCHAR`.
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) -> Result<(), TypeError> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let len = u16::try_from(units.len())
        .map_err(|_| TypeError::overflow("US_VARCHAR", format!("{} characters", units.len())))?;
    dst.put_u16_le(len);
    for unit in units {
        dst.put_u16_le(unit);
    }
    Ok(())
}
