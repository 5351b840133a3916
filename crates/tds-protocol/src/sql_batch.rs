//! SQLBATCH request encoding.
//!
//! A batch is the ALL_HEADERS block followed by the SQL text in UTF-16LE.

use bytes::{BufMut, Bytes, BytesMut};
use tds_types::strings::encode_utf16;

/// Size of ALL_HEADERS with only the transaction descriptor header.
pub const ALL_HEADERS_LEN: usize = 22;

const HEADER_TYPE_TRANSACTION_DESCRIPTOR: u16 = 0x0002;

/// Write ALL_HEADERS carrying the transaction descriptor.
///
/// `transaction_descriptor` is the value from the last BEGIN TRANSACTION
/// environment change, or 0 in auto-commit mode. The outstanding request
/// count is always 1 because only one request is in flight.
pub fn write_all_headers(dst: &mut impl BufMut, transaction_descriptor: u64) {
    dst.put_u32_le(ALL_HEADERS_LEN as u32);
    dst.put_u32_le(18);
    dst.put_u16_le(HEADER_TYPE_TRANSACTION_DESCRIPTOR);
    dst.put_u64_le(transaction_descriptor);
    dst.put_u32_le(1);
}

/// Encode a SQLBATCH payload.
#[must_use]
pub fn encode_sql_batch(sql: &str, transaction_descriptor: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ALL_HEADERS_LEN + sql.len() * 2);
    write_all_headers(&mut buf, transaction_descriptor);
    encode_utf16(sql, &mut buf);
    buf.freeze()
}
