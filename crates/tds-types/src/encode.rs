//! Encoding values to the wire.
//!
//! [`encode_payload`] converts a native value to the payload bytes of the
//! target type; [`encode_value`] adds the length prefix or NULL marker the
//! type's framing requires.

use bytes::BufMut;
use uuid::Uuid;

use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::plp::{write_plp, write_plp_null};
use crate::strings::encode_utf16;
use crate::temporal;
use crate::type_info::{MAX_LENGTH_PLP, TypeId, TypeInfo, ValueFraming, decimal_storage_len};
use crate::value::SqlValue;

/// Encode `value` framed as a value of type `info`.
pub fn encode_value(
    value: &SqlValue,
    info: &TypeInfo,
    dst: &mut impl BufMut,
) -> Result<(), TypeError> {
    let framing = info.framing();

    if value.is_null() {
        match framing {
            ValueFraming::Fixed(0) => {}
            ValueFraming::Fixed(_) => return Err(incompatible(value, info)),
            ValueFraming::Byte | ValueFraming::TextPointer => dst.put_u8(0),
            ValueFraming::UShort => dst.put_u16_le(0xFFFF),
            ValueFraming::Plp => write_plp_null(dst),
        }
        return Ok(());
    }

    let payload = encode_payload(value, info)?;
    match framing {
        ValueFraming::Fixed(len) => {
            if payload.len() != len {
                return Err(TypeError::overflow(
                    info.type_id.name(),
                    format!("{} bytes (exactly {len} required)", payload.len()),
                ));
            }
            dst.put_slice(&payload);
        }
        ValueFraming::Byte => {
            let len = u8::try_from(payload.len()).map_err(|_| too_long(info, payload.len()))?;
            dst.put_u8(len);
            dst.put_slice(&payload);
        }
        ValueFraming::UShort => {
            if payload.len() > info.max_length as usize || payload.len() >= MAX_LENGTH_PLP as usize {
                return Err(too_long(info, payload.len()));
            }
            dst.put_u16_le(payload.len() as u16);
            dst.put_slice(&payload);
        }
        ValueFraming::TextPointer => {
            let len = u32::try_from(payload.len()).map_err(|_| too_long(info, payload.len()))?;
            // Dummy text pointer and timestamp.
            dst.put_u8(16);
            dst.put_bytes(0, 16 + 8);
            dst.put_u32_le(len);
            dst.put_slice(&payload);
        }
        ValueFraming::Plp => write_plp(dst, &payload)?,
    }
    Ok(())
}

fn too_long(info: &TypeInfo, len: usize) -> TypeError {
    TypeError::overflow(
        info.type_id.name(),
        format!("{len} bytes (declared {})", info.sql_declaration()),
    )
}

fn incompatible(value: &SqlValue, info: &TypeInfo) -> TypeError {
    TypeError::Incompatible {
        value: value.type_name(),
        wire: info.type_id.name(),
    }
}

/// Convert `value` to the unframed payload of type `info`.
pub fn encode_payload(value: &SqlValue, info: &TypeInfo) -> Result<Vec<u8>, TypeError> {
    let width = info
        .type_id
        .fixed_size()
        .unwrap_or(info.max_length as usize);

    match info.type_id {
        TypeId::Null => Err(incompatible(value, info)),
        TypeId::Bit | TypeId::BitN => {
            let bit = match value {
                SqlValue::Bool(b) => *b,
                other => other.as_i64().ok_or_else(|| incompatible(value, info))? != 0,
            };
            Ok(vec![u8::from(bit)])
        }
        TypeId::Int1 | TypeId::Int2 | TypeId::Int4 | TypeId::Int8 | TypeId::IntN => {
            let n = match value {
                SqlValue::Bool(b) => i64::from(*b),
                other => other.as_i64().ok_or_else(|| incompatible(value, info))?,
            };
            encode_int(n, width)
        }
        TypeId::Float4 | TypeId::Float8 | TypeId::FloatN => {
            let f = match value {
                SqlValue::Float(f) => f64::from(*f),
                SqlValue::Double(f) => *f,
                other => other.as_i64().ok_or_else(|| incompatible(value, info))? as f64,
            };
            Ok(if width == 4 {
                (f as f32).to_le_bytes().to_vec()
            } else {
                f.to_le_bytes().to_vec()
            })
        }
        TypeId::Money | TypeId::Money4 | TypeId::MoneyN => {
            let units = money_units(value).ok_or_else(|| incompatible(value, info))??;
            if width == 4 {
                let small =
                    i32::try_from(units).map_err(|_| TypeError::overflow("smallmoney", units))?;
                Ok(small.to_le_bytes().to_vec())
            } else {
                let mut out = Vec::with_capacity(8);
                out.put_i32_le((units >> 32) as i32);
                out.put_u32_le(units as u32);
                Ok(out)
            }
        }
        TypeId::DateTime | TypeId::DateTime4 | TypeId::DateTimeN => {
            let dt = match value {
                SqlValue::DateTime(dt) => *dt,
                SqlValue::Date(d) => d.and_time(chrono::NaiveTime::MIN),
                _ => return Err(incompatible(value, info)),
            };
            let mut out = Vec::with_capacity(width);
            if width == 4 {
                let (days, minutes) = temporal::smalldatetime_to_parts(dt)?;
                out.put_u16_le(days);
                out.put_u16_le(minutes);
            } else {
                let (days, ticks) = temporal::datetime_to_parts(dt)?;
                out.put_i32_le(days);
                out.put_u32_le(ticks);
            }
            Ok(out)
        }
        TypeId::Guid => {
            let uuid = match value {
                SqlValue::Uuid(u) => *u,
                SqlValue::String(s) => Uuid::parse_str(s)
                    .map_err(|e| TypeError::malformed("uniqueidentifier text", e.to_string()))?,
                _ => return Err(incompatible(value, info)),
            };
            Ok(encode_guid(&uuid).to_vec())
        }
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            let n = match value {
                SqlValue::Decimal(n) => *n,
                SqlValue::Money(_) => value.as_numeric().ok_or_else(|| incompatible(value, info))?,
                other => Numeric::from(other.as_i64().ok_or_else(|| incompatible(value, info))?),
            };
            encode_decimal(&n, info.precision, info.scale)
        }
        TypeId::BigVarChar | TypeId::BigChar | TypeId::Text => {
            let text = value.as_str().ok_or_else(|| incompatible(value, info))?;
            let encoding = info.collation.unwrap_or_default().encoding();
            let (bytes, _, had_errors) = encoding.encode(text);
            if had_errors {
                return Err(TypeError::Charset {
                    charset: encoding.name(),
                });
            }
            Ok(bytes.into_owned())
        }
        TypeId::NVarChar | TypeId::NChar | TypeId::NText | TypeId::Xml => {
            let text = value.as_str().ok_or_else(|| incompatible(value, info))?;
            let mut out = Vec::with_capacity(text.len() * 2);
            encode_utf16(text, &mut out);
            Ok(out)
        }
        TypeId::BigVarBinary | TypeId::BigBinary | TypeId::Image => value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| incompatible(value, info)),
        TypeId::Date => {
            let date = match value {
                SqlValue::Date(d) => *d,
                SqlValue::DateTime(dt) => dt.date(),
                _ => return Err(incompatible(value, info)),
            };
            let days = temporal::days_from_date(date)?;
            Ok(days.to_le_bytes()[..3].to_vec())
        }
        TypeId::Time => {
            let time = match value {
                SqlValue::Time(t) => *t,
                _ => return Err(incompatible(value, info)),
            };
            let mut out = Vec::with_capacity(5);
            put_time(&mut out, time, info.scale);
            Ok(out)
        }
        TypeId::DateTime2 => {
            let dt = match value {
                SqlValue::DateTime(dt) => *dt,
                SqlValue::Date(d) => d.and_time(chrono::NaiveTime::MIN),
                _ => return Err(incompatible(value, info)),
            };
            let mut out = Vec::with_capacity(8);
            put_datetime2(&mut out, dt, info.scale)?;
            Ok(out)
        }
        TypeId::DateTimeOffset => {
            let (utc, offset_minutes) = match value {
                SqlValue::DateTimeOffset(dto) => {
                    (dto.naive_utc(), dto.offset().local_minus_utc() / 60)
                }
                SqlValue::DateTime(dt) => (*dt, 0),
                _ => return Err(incompatible(value, info)),
            };
            let mut out = Vec::with_capacity(10);
            put_datetime2(&mut out, utc, info.scale)?;
            out.put_i16_le(offset_minutes as i16);
            Ok(out)
        }
    }
}

fn encode_int(n: i64, width: usize) -> Result<Vec<u8>, TypeError> {
    let range_err = |target| TypeError::overflow(target, n);
    Ok(match width {
        1 => vec![u8::try_from(n).map_err(|_| range_err("tinyint"))?],
        2 => i16::try_from(n)
            .map_err(|_| range_err("smallint"))?
            .to_le_bytes()
            .to_vec(),
        4 => i32::try_from(n)
            .map_err(|_| range_err("int"))?
            .to_le_bytes()
            .to_vec(),
        8 => n.to_le_bytes().to_vec(),
        other => {
            return Err(TypeError::malformed("intn", format!("width {other}")));
        }
    })
}

/// MONEY units (ten-thousandths) for a value, `None` if the type does not apply.
fn money_units(value: &SqlValue) -> Option<Result<i64, TypeError>> {
    match value {
        SqlValue::Money(m) => Some(Ok(*m)),
        SqlValue::Decimal(n) => Some(n.rescale(4).and_then(|n| {
            i64::try_from(n.value()).map_err(|_| TypeError::overflow("money", n))
        })),
        other => other.as_i64().map(|n| {
            n.checked_mul(10_000)
                .ok_or_else(|| TypeError::overflow("money", n))
        }),
    }
}

fn encode_guid(uuid: &Uuid) -> [u8; 16] {
    let mut bytes = *uuid.as_bytes();
    bytes[0..4].reverse();
    bytes[4..6].reverse();
    bytes[6..8].reverse();
    bytes
}

fn encode_decimal(n: &Numeric, precision: u8, scale: u8) -> Result<Vec<u8>, TypeError> {
    let n = n.rescale(scale)?;
    if n.precision() > precision.max(1) && n.value() != 0 {
        return Err(TypeError::overflow(
            "decimal",
            format!("{n} at precision {precision}"),
        ));
    }
    let storage = decimal_storage_len(precision);
    let mut out = Vec::with_capacity(storage + 1);
    out.push(u8::from(!n.is_negative()));
    out.extend_from_slice(&n.value().unsigned_abs().to_le_bytes()[..storage]);
    Ok(out)
}

fn put_time(out: &mut Vec<u8>, time: chrono::NaiveTime, scale: u8) {
    let ticks = temporal::ticks_from_time(time, scale);
    out.extend_from_slice(&ticks.to_le_bytes()[..temporal::time_len(scale)]);
}

fn put_datetime2(out: &mut Vec<u8>, dt: chrono::NaiveDateTime, scale: u8) -> Result<(), TypeError> {
    put_time(out, dt.time(), scale);
    let days = temporal::days_from_date(dt.date())?;
    out.extend_from_slice(&days.to_le_bytes()[..3]);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::decode::decode_value;
    use bytes::{Bytes, BytesMut};
    use chrono::{FixedOffset, NaiveDate, TimeZone};

    fn encode(value: &SqlValue, info: &TypeInfo) -> Bytes {
        let mut buf = BytesMut::new();
        encode_value(value, info, &mut buf).unwrap();
        buf.freeze()
    }

    #[test]
    fn test_null_markers_by_framing() {
        assert_eq!(&encode(&SqlValue::Null, &TypeInfo::int_n(4))[..], &[0]);
        assert_eq!(&encode(&SqlValue::Null, &TypeInfo::nvarchar(10))[..], &[0xFF, 0xFF]);
        assert_eq!(&encode(&SqlValue::Null, &TypeInfo::nvarchar_max())[..], &[0xFF; 8]);
        assert_eq!(
            encode_value(&SqlValue::Null, &TypeInfo::new(TypeId::Int4), &mut BytesMut::new()),
            Err(TypeError::Incompatible {
                value: "NULL",
                wire: "int",
            })
        );
    }

    #[test]
    fn test_int_range_checked() {
        let err = encode_value(&SqlValue::Int(300), &TypeInfo::int_n(1), &mut BytesMut::new());
        assert!(matches!(err, Err(TypeError::Overflow { .. })));
        assert_eq!(&encode(&SqlValue::Int(-2), &TypeInfo::int_n(2))[..], &[2, 0xFE, 0xFF]);
    }

    #[test]
    fn test_nvarchar_too_long() {
        let err = encode_value(&SqlValue::from("abcdef"), &TypeInfo::nvarchar(10), &mut BytesMut::new());
        assert!(matches!(err, Err(TypeError::Overflow { .. })));
    }

    #[test]
    fn test_varchar_unmappable() {
        let info = TypeInfo::varchar(20, crate::collation::Collation::default());
        let err = encode_value(&SqlValue::from("日本"), &info, &mut BytesMut::new());
        assert!(matches!(err, Err(TypeError::Charset { .. })));
        assert_eq!(&encode(&SqlValue::from("é"), &info)[..], &[1, 0, 0xE9]);
    }

    #[test]
    fn test_decimal_storage_by_precision() {
        let n: Numeric = "-1.5".parse().unwrap();
        let bytes = encode(&SqlValue::Decimal(n), &TypeInfo::numeric(18, 2));
        assert_eq!(&bytes[..], &[9, 0, 150, 0, 0, 0, 0, 0, 0, 0]);
        let back = decode_value(&mut bytes.clone(), &TypeInfo::numeric(18, 2)).unwrap();
        assert_eq!(back.as_numeric().unwrap().to_string(), "-1.50");
    }

    #[test]
    fn test_decimal_precision_overflow() {
        let n: Numeric = "12345".parse().unwrap();
        let err = encode_value(&SqlValue::Decimal(n), &TypeInfo::numeric(4, 0), &mut BytesMut::new());
        assert!(matches!(err, Err(TypeError::Overflow { .. })));
    }

    #[test]
    fn test_money_from_decimal() {
        let n: Numeric = "12.5".parse().unwrap();
        let bytes = encode(&SqlValue::Decimal(n), &TypeInfo::money_n(8));
        assert_eq!(decode_value(&mut bytes.clone(), &TypeInfo::money_n(8)).unwrap(), SqlValue::Money(125_000));
    }

    #[test]
    fn test_datetimeoffset_roundtrip() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let local = NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_micro_opt(8, 30, 0, 123_456)
            .unwrap();
        let value = SqlValue::DateTimeOffset(offset.from_local_datetime(&local).unwrap());
        let info = TypeInfo::with_scale(TypeId::DateTimeOffset, 6);
        let bytes = encode(&value, &info);
        assert_eq!(decode_value(&mut bytes.clone(), &info).unwrap(), value);
    }

    #[test]
    fn test_plp_value() {
        let data = vec![7u8; 9000];
        let bytes = encode(&SqlValue::from(data.clone()), &TypeInfo::varbinary_max());
        assert_eq!(bytes.len(), 8 + 4 + 9000 + 4);
        let back = decode_value(&mut bytes.clone(), &TypeInfo::varbinary_max()).unwrap();
        assert_eq!(back.as_bytes().unwrap(), &data[..]);
    }

    #[test]
    fn test_unsupported_conversion() {
        let err = encode_payload(&SqlValue::from("x"), &TypeInfo::new(TypeId::Date));
        assert!(matches!(err, Err(TypeError::Incompatible { .. })));
    }
}
