//! Decoding values from the wire.
//!
//! Decoding is split in two steps. [`read_value`] applies the framing for the
//! column's `TYPE_INFO` and yields the raw payload; a failure there leaves the
//! token stream unusable. [`convert_value`] turns a payload into a
//! [`SqlValue`]; a failure there only affects that one value.

use bytes::{Buf, Bytes};
use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use uuid::Uuid;

use crate::collation::Collation;
use crate::error::{TypeError, ensure_remaining};
use crate::numeric::Numeric;
use crate::plp::PlpChunks;
use crate::strings::decode_utf16;
use crate::temporal;
use crate::type_info::{TypeId, TypeInfo, ValueFraming};
use crate::value::SqlValue;

/// Read one framed value, returning its payload or `None` for NULL.
///
/// `src` is only advanced when a complete value was read; on
/// [`TypeError::Incomplete`] it is left where it was.
pub fn read_value(src: &mut Bytes, info: &TypeInfo) -> Result<Option<Bytes>, TypeError> {
    match info.framing() {
        ValueFraming::Fixed(0) => Ok(None),
        ValueFraming::Fixed(len) => {
            ensure_remaining(src, len)?;
            Ok(Some(src.split_to(len)))
        }
        ValueFraming::Byte => {
            ensure_remaining(src, 1)?;
            let len = usize::from(src[0]);
            if len == 0 {
                src.advance(1);
                return Ok(None);
            }
            ensure_remaining(src, 1 + len)?;
            src.advance(1);
            Ok(Some(src.split_to(len)))
        }
        ValueFraming::UShort => {
            ensure_remaining(src, 2)?;
            let len = u16::from_le_bytes([src[0], src[1]]);
            if len == 0xFFFF {
                src.advance(2);
                return Ok(None);
            }
            let len = usize::from(len);
            ensure_remaining(src, 2 + len)?;
            src.advance(2);
            Ok(Some(src.split_to(len)))
        }
        ValueFraming::TextPointer => {
            let mut scan = src.clone();
            ensure_remaining(&scan, 1)?;
            let ptr_len = usize::from(scan.get_u8());
            if ptr_len == 0 {
                src.advance(1);
                return Ok(None);
            }
            // Text pointer, then the 8-byte timestamp.
            ensure_remaining(&scan, ptr_len + 8 + 4)?;
            scan.advance(ptr_len + 8);
            let len = scan.get_u32_le() as usize;
            ensure_remaining(&scan, len)?;
            let data = scan.split_to(len);
            *src = scan;
            Ok(Some(data))
        }
        ValueFraming::Plp => Ok(PlpChunks::read(src)?.map(PlpChunks::into_bytes)),
    }
}

/// Convert a raw payload to a native value.
pub fn convert_value(data: Option<Bytes>, info: &TypeInfo) -> Result<SqlValue, TypeError> {
    let Some(data) = data else {
        return Ok(SqlValue::Null);
    };

    match info.type_id {
        TypeId::Null => Ok(SqlValue::Null),
        TypeId::Bit | TypeId::BitN => {
            expect_len(&data, &[1], info)?;
            Ok(SqlValue::Bool(data[0] != 0))
        }
        TypeId::Int1 | TypeId::Int2 | TypeId::Int4 | TypeId::Int8 | TypeId::IntN => {
            decode_int(&data, info)
        }
        TypeId::Float4 | TypeId::Float8 | TypeId::FloatN => {
            expect_len(&data, &[4, 8], info)?;
            let mut buf = &data[..];
            Ok(if data.len() == 4 {
                SqlValue::Float(buf.get_f32_le())
            } else {
                SqlValue::Double(buf.get_f64_le())
            })
        }
        TypeId::Money | TypeId::Money4 | TypeId::MoneyN => {
            expect_len(&data, &[4, 8], info)?;
            let mut buf = &data[..];
            Ok(SqlValue::Money(if data.len() == 4 {
                i64::from(buf.get_i32_le())
            } else {
                let high = i64::from(buf.get_i32_le());
                let low = i64::from(buf.get_u32_le());
                (high << 32) | low
            }))
        }
        TypeId::DateTime | TypeId::DateTime4 | TypeId::DateTimeN => {
            expect_len(&data, &[4, 8], info)?;
            let mut buf = &data[..];
            let value = if data.len() == 4 {
                let days = buf.get_u16_le();
                let minutes = buf.get_u16_le();
                temporal::smalldatetime_from_parts(days, minutes)?
            } else {
                let days = buf.get_i32_le();
                let ticks = buf.get_u32_le();
                temporal::datetime_from_parts(days, ticks)?
            };
            Ok(SqlValue::DateTime(value))
        }
        TypeId::Guid => {
            expect_len(&data, &[16], info)?;
            Ok(SqlValue::Uuid(decode_guid(&data)))
        }
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            decode_decimal(&data, info.scale).map(SqlValue::Decimal)
        }
        TypeId::BigVarChar | TypeId::BigChar | TypeId::Text => {
            let collation = info.collation.unwrap_or_default();
            decode_ansi(&data, &collation).map(SqlValue::String)
        }
        TypeId::NVarChar | TypeId::NChar | TypeId::NText => {
            decode_utf16(&data).map(SqlValue::String)
        }
        TypeId::BigVarBinary | TypeId::BigBinary | TypeId::Image => Ok(SqlValue::Binary(data)),
        TypeId::Date => {
            expect_len(&data, &[3], info)?;
            temporal::date_from_days(read_u24(&data)).map(SqlValue::Date)
        }
        TypeId::Time => {
            let time_len = temporal::time_len(info.scale);
            expect_len(&data, &[time_len], info)?;
            temporal::time_from_ticks(read_ticks(&data), info.scale).map(SqlValue::Time)
        }
        TypeId::DateTime2 => {
            let time_len = temporal::time_len(info.scale);
            expect_len(&data, &[time_len + 3], info)?;
            decode_datetime2(&data, info.scale).map(SqlValue::DateTime)
        }
        TypeId::DateTimeOffset => {
            let time_len = temporal::time_len(info.scale);
            expect_len(&data, &[time_len + 5], info)?;
            let utc = decode_datetime2(&data[..time_len + 3], info.scale)?;
            let minutes = i16::from_le_bytes([data[time_len + 3], data[time_len + 4]]);
            let offset = FixedOffset::east_opt(i32::from(minutes) * 60).ok_or_else(|| {
                TypeError::malformed("datetimeoffset", format!("offset of {minutes} minutes"))
            })?;
            Ok(SqlValue::DateTimeOffset(offset.from_utc_datetime(&utc)))
        }
        TypeId::Xml => {
            let body = data.strip_prefix(&[0xFF, 0xFE][..]).unwrap_or(&data);
            decode_utf16(body).map(SqlValue::Xml)
        }
    }
}

/// Read and convert one value.
pub fn decode_value(src: &mut Bytes, info: &TypeInfo) -> Result<SqlValue, TypeError> {
    let data = read_value(src, info)?;
    convert_value(data, info)
}

fn expect_len(data: &[u8], allowed: &[usize], info: &TypeInfo) -> Result<(), TypeError> {
    if allowed.contains(&data.len()) {
        Ok(())
    } else {
        Err(TypeError::malformed(
            info.type_id.name(),
            format!("value of {} bytes", data.len()),
        ))
    }
}

fn decode_int(data: &[u8], info: &TypeInfo) -> Result<SqlValue, TypeError> {
    expect_len(data, &[1, 2, 4, 8], info)?;
    let mut buf = data;
    Ok(match data.len() {
        1 => SqlValue::TinyInt(buf.get_u8()),
        2 => SqlValue::SmallInt(buf.get_i16_le()),
        4 => SqlValue::Int(buf.get_i32_le()),
        _ => SqlValue::BigInt(buf.get_i64_le()),
    })
}

/// SQL Server stores the first three GUID groups little-endian.
fn decode_guid(data: &[u8]) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&data[..16]);
    bytes[0..4].reverse();
    bytes[4..6].reverse();
    bytes[6..8].reverse();
    Uuid::from_bytes(bytes)
}

fn decode_decimal(data: &[u8], scale: u8) -> Result<Numeric, TypeError> {
    let Some((&sign, magnitude)) = data.split_first() else {
        return Err(TypeError::malformed("decimal", "empty payload"));
    };
    if magnitude.len() > 16 {
        return Err(TypeError::malformed(
            "decimal",
            format!("{} magnitude bytes", magnitude.len()),
        ));
    }
    let mut raw = [0u8; 16];
    raw[..magnitude.len()].copy_from_slice(magnitude);
    let magnitude = u128::from_le_bytes(raw);
    let value =
        i128::try_from(magnitude).map_err(|_| TypeError::overflow("decimal(38)", magnitude))?;
    Numeric::new(if sign == 1 { value } else { -value }, scale)
}

fn decode_ansi(data: &[u8], collation: &Collation) -> Result<String, TypeError> {
    let encoding = collation.encoding();
    let (text, had_errors) = encoding.decode_without_bom_handling(data);
    if had_errors {
        return Err(TypeError::Charset {
            charset: encoding.name(),
        });
    }
    Ok(text.into_owned())
}

fn read_u24(data: &[u8]) -> u32 {
    u32::from(data[0]) | (u32::from(data[1]) << 8) | (u32::from(data[2]) << 16)
}

fn read_ticks(data: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw[..data.len()].copy_from_slice(data);
    u64::from_le_bytes(raw)
}

fn decode_datetime2(data: &[u8], scale: u8) -> Result<NaiveDateTime, TypeError> {
    let (time, date) = data.split_at(data.len() - 3);
    let time = temporal::time_from_ticks(read_ticks(time), scale)?;
    let date = temporal::date_from_days(read_u24(date))?;
    Ok(date.and_time(time))
}
