//! Wire type identifiers and the `TYPE_INFO` structure.
//!
//! `TYPE_INFO` appears in COLMETADATA, RETURNVALUE and RPC parameters. It
//! fixes how a value of the column is framed on the wire (see
//! [`ValueFraming`]) and carries the precision, scale and collation the
//! payload conversion needs.

use bytes::{Buf, BufMut};

use crate::collation::Collation;
use crate::error::{TypeError, ensure_remaining};
use crate::numeric::Numeric;
use crate::strings::{read_b_varchar, read_us_varchar, utf16_byte_len};
use crate::value::SqlValue;

/// Length marker that selects PLP framing for `(max)` types.
pub const MAX_LENGTH_PLP: u32 = 0xFFFF;

/// Largest byte length of a non-`max` variable-length value.
pub const MAX_INLINE_BYTES: usize = 8000;

/// TDS data type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// Null type.
    Null = 0x1F,
    /// Unsigned 8-bit integer (TINYINT).
    Int1 = 0x30,
    /// Bit.
    Bit = 0x32,
    /// 16-bit integer.
    Int2 = 0x34,
    /// 32-bit integer.
    Int4 = 0x38,
    /// 64-bit integer.
    Int8 = 0x7F,
    /// 32-bit float.
    Float4 = 0x3B,
    /// 64-bit float.
    Float8 = 0x3E,
    /// 8-byte money.
    Money = 0x3C,
    /// 4-byte money.
    Money4 = 0x7A,
    /// 8-byte datetime.
    DateTime = 0x3D,
    /// 4-byte smalldatetime.
    DateTime4 = 0x3A,
    /// Uniqueidentifier.
    Guid = 0x24,
    /// Nullable integer.
    IntN = 0x26,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// Nullable bit.
    BitN = 0x68,
    /// Decimal.
    DecimalN = 0x6A,
    /// Numeric.
    NumericN = 0x6C,
    /// Nullable float.
    FloatN = 0x6D,
    /// Nullable money.
    MoneyN = 0x6E,
    /// Nullable datetime.
    DateTimeN = 0x6F,
    /// VARBINARY.
    BigVarBinary = 0xA5,
    /// VARCHAR.
    BigVarChar = 0xA7,
    /// BINARY.
    BigBinary = 0xAD,
    /// CHAR.
    BigChar = 0xAF,
    /// NVARCHAR.
    NVarChar = 0xE7,
    /// NCHAR.
    NChar = 0xEF,
    /// Legacy TEXT.
    Text = 0x23,
    /// Legacy IMAGE.
    Image = 0x22,
    /// Legacy NTEXT.
    NText = 0x63,
    /// DATE.
    Date = 0x28,
    /// TIME(n).
    Time = 0x29,
    /// DATETIME2(n).
    DateTime2 = 0x2A,
    /// DATETIMEOFFSET(n).
    DateTimeOffset = 0x2B,
    /// XML.
    Xml = 0xF1,
}

impl TypeId {
    /// Create a type ID from a raw byte.
    pub fn from_u8(value: u8) -> Result<Self, TypeError> {
        Ok(match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x7F => Self::Int8,
            0x3B => Self::Float4,
            0x3E => Self::Float8,
            0x3C => Self::Money,
            0x7A => Self::Money4,
            0x3D => Self::DateTime,
            0x3A => Self::DateTime4,
            0x24 => Self::Guid,
            0x26 => Self::IntN,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x68 => Self::BitN,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x6F => Self::DateTimeN,
            0xA5 => Self::BigVarBinary,
            0xA7 => Self::BigVarChar,
            0xAD => Self::BigBinary,
            0xAF => Self::BigChar,
            0xE7 => Self::NVarChar,
            0xEF => Self::NChar,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0x63 => Self::NText,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0xF1 => Self::Xml,
            other => return Err(TypeError::UnknownType(other)),
        })
    }

    /// Byte width of fixed-length types.
    #[must_use]
    pub const fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => Some(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => Some(8),
            _ => None,
        }
    }

    /// Whether values are single-byte text interpreted through a collation.
    #[must_use]
    pub const fn is_ansi_text(&self) -> bool {
        matches!(self, Self::BigVarChar | Self::BigChar | Self::Text)
    }

    /// Whether values are UTF-16LE text.
    #[must_use]
    pub const fn is_unicode_text(&self) -> bool {
        matches!(self, Self::NVarChar | Self::NChar | Self::NText)
    }

    /// Whether the type carries a collation in its `TYPE_INFO`.
    #[must_use]
    pub const fn has_collation(&self) -> bool {
        self.is_ansi_text() || self.is_unicode_text()
    }

    /// Whether the type is one of the legacy text-pointer LOB types.
    #[must_use]
    pub const fn is_text_pointer(&self) -> bool {
        matches!(self, Self::Text | Self::NText | Self::Image)
    }

    /// SQL name used in diagnostics and `INSERT BULK` column lists.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int1 => "tinyint",
            Self::Bit | Self::BitN => "bit",
            Self::Int2 => "smallint",
            Self::Int4 => "int",
            Self::Int8 => "bigint",
            Self::IntN => "int",
            Self::Float4 => "real",
            Self::Float8 | Self::FloatN => "float",
            Self::Money | Self::MoneyN => "money",
            Self::Money4 => "smallmoney",
            Self::DateTime | Self::DateTimeN => "datetime",
            Self::DateTime4 => "smalldatetime",
            Self::Guid => "uniqueidentifier",
            Self::Decimal | Self::DecimalN => "decimal",
            Self::Numeric | Self::NumericN => "numeric",
            Self::BigVarBinary => "varbinary",
            Self::BigVarChar => "varchar",
            Self::BigBinary => "binary",
            Self::BigChar => "char",
            Self::NVarChar => "nvarchar",
            Self::NChar => "nchar",
            Self::Text => "text",
            Self::Image => "image",
            Self::NText => "ntext",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime2 => "datetime2",
            Self::DateTimeOffset => "datetimeoffset",
            Self::Xml => "xml",
        }
    }
}

/// How a single value of a type is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFraming {
    /// Exactly this many bytes, never NULL.
    Fixed(usize),
    /// One length byte; zero means NULL.
    Byte,
    /// Two length bytes; `0xFFFF` means NULL.
    UShort,
    /// Text pointer, timestamp and four length bytes; empty pointer means NULL.
    TextPointer,
    /// Partially length-prefixed chunks.
    Plp,
}

/// TDS type information for one column or parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// The wire type.
    pub type_id: TypeId,
    /// Declared maximum length in bytes (`0xFFFF` for `max` types).
    pub max_length: u32,
    /// Precision for decimal types.
    pub precision: u8,
    /// Scale for decimal and time types.
    pub scale: u8,
    /// Collation for text types.
    pub collation: Option<Collation>,
}

impl TypeInfo {
    /// Type info with only a type id; fixed types get their natural width.
    #[must_use]
    pub fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            max_length: type_id.fixed_size().unwrap_or(0) as u32,
            precision: 0,
            scale: 0,
            collation: None,
        }
    }

    fn sized(type_id: TypeId, max_length: u32) -> Self {
        Self {
            max_length,
            ..Self::new(type_id)
        }
    }

    /// Nullable integer of 1, 2, 4 or 8 bytes.
    #[must_use]
    pub fn int_n(width: u8) -> Self {
        Self::sized(TypeId::IntN, u32::from(width))
    }

    /// Nullable bit.
    #[must_use]
    pub fn bit_n() -> Self {
        Self::sized(TypeId::BitN, 1)
    }

    /// Nullable float of 4 or 8 bytes.
    #[must_use]
    pub fn float_n(width: u8) -> Self {
        Self::sized(TypeId::FloatN, u32::from(width))
    }

    /// Nullable money of 4 or 8 bytes.
    #[must_use]
    pub fn money_n(width: u8) -> Self {
        Self::sized(TypeId::MoneyN, u32::from(width))
    }

    /// Nullable datetime of 4 (smalldatetime) or 8 bytes.
    #[must_use]
    pub fn datetime_n(width: u8) -> Self {
        Self::sized(TypeId::DateTimeN, u32::from(width))
    }

    /// Uniqueidentifier.
    #[must_use]
    pub fn guid() -> Self {
        Self::sized(TypeId::Guid, 16)
    }

    /// `NUMERIC(precision, scale)`.
    #[must_use]
    pub fn numeric(precision: u8, scale: u8) -> Self {
        Self {
            precision,
            scale,
            ..Self::sized(TypeId::NumericN, decimal_storage_len(precision) as u32 + 1)
        }
    }

    /// `NVARCHAR(n)` where `max_bytes` is twice the character count.
    #[must_use]
    pub fn nvarchar(max_bytes: u16) -> Self {
        Self {
            collation: Some(Collation::default()),
            ..Self::sized(TypeId::NVarChar, u32::from(max_bytes))
        }
    }

    /// `NVARCHAR(max)`.
    #[must_use]
    pub fn nvarchar_max() -> Self {
        Self::nvarchar(MAX_LENGTH_PLP as u16)
    }

    /// `VARCHAR(n)` in the given collation.
    #[must_use]
    pub fn varchar(max_bytes: u16, collation: Collation) -> Self {
        Self {
            collation: Some(collation),
            ..Self::sized(TypeId::BigVarChar, u32::from(max_bytes))
        }
    }

    /// `VARBINARY(n)`.
    #[must_use]
    pub fn varbinary(max_bytes: u16) -> Self {
        Self::sized(TypeId::BigVarBinary, u32::from(max_bytes))
    }

    /// `VARBINARY(max)`.
    #[must_use]
    pub fn varbinary_max() -> Self {
        Self::varbinary(MAX_LENGTH_PLP as u16)
    }

    /// A date/time type with fractional-second scale (TIME, DATETIME2, DATETIMEOFFSET).
    #[must_use]
    pub fn with_scale(type_id: TypeId, scale: u8) -> Self {
        Self {
            scale,
            ..Self::new(type_id)
        }
    }

    /// How values of this type are framed.
    #[must_use]
    pub fn framing(&self) -> ValueFraming {
        if let Some(size) = self.type_id.fixed_size() {
            return ValueFraming::Fixed(size);
        }
        match self.type_id {
            TypeId::Xml => ValueFraming::Plp,
            TypeId::Text | TypeId::NText | TypeId::Image => ValueFraming::TextPointer,
            TypeId::BigVarBinary
            | TypeId::BigVarChar
            | TypeId::BigBinary
            | TypeId::BigChar
            | TypeId::NVarChar
            | TypeId::NChar => {
                if self.max_length == MAX_LENGTH_PLP {
                    ValueFraming::Plp
                } else {
                    ValueFraming::UShort
                }
            }
            _ => ValueFraming::Byte,
        }
    }

    /// Whether values are sent as PLP chunks.
    #[must_use]
    pub fn is_plp(&self) -> bool {
        self.framing() == ValueFraming::Plp
    }

    /// Decode a `TYPE_INFO` (type byte included, legacy LOB table name excluded).
    pub fn decode(src: &mut impl Buf) -> Result<Self, TypeError> {
        ensure_remaining(src, 1)?;
        let type_id = TypeId::from_u8(src.get_u8())?;
        let mut info = Self::new(type_id);

        match type_id {
            _ if type_id.fixed_size().is_some() => {}
            TypeId::Guid
            | TypeId::IntN
            | TypeId::BitN
            | TypeId::FloatN
            | TypeId::MoneyN
            | TypeId::DateTimeN => {
                ensure_remaining(src, 1)?;
                info.max_length = u32::from(src.get_u8());
            }
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                ensure_remaining(src, 3)?;
                info.max_length = u32::from(src.get_u8());
                info.precision = src.get_u8();
                info.scale = src.get_u8();
            }
            TypeId::BigVarChar | TypeId::BigChar | TypeId::NVarChar | TypeId::NChar => {
                ensure_remaining(src, 2)?;
                info.max_length = u32::from(src.get_u16_le());
                info.collation = Some(Collation::decode(src)?);
            }
            TypeId::BigVarBinary | TypeId::BigBinary => {
                ensure_remaining(src, 2)?;
                info.max_length = u32::from(src.get_u16_le());
            }
            TypeId::Text | TypeId::NText => {
                ensure_remaining(src, 4)?;
                info.max_length = src.get_u32_le();
                info.collation = Some(Collation::decode(src)?);
            }
            TypeId::Image => {
                ensure_remaining(src, 4)?;
                info.max_length = src.get_u32_le();
            }
            TypeId::Date => {}
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                ensure_remaining(src, 1)?;
                info.scale = src.get_u8();
                if info.scale > 7 {
                    return Err(TypeError::malformed(
                        "TYPE_INFO",
                        format!("time scale {} exceeds 7", info.scale),
                    ));
                }
            }
            TypeId::Xml => {
                ensure_remaining(src, 1)?;
                if src.get_u8() != 0 {
                    // Schema-bound XML: database, owning schema, collection.
                    read_b_varchar(src)?;
                    read_b_varchar(src)?;
                    read_us_varchar(src)?;
                }
                info.max_length = MAX_LENGTH_PLP;
            }
            _ => {}
        }

        Ok(info)
    }

    /// Encode this `TYPE_INFO`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.type_id as u8);
        match self.type_id {
            _ if self.type_id.fixed_size().is_some() => {}
            TypeId::Guid
            | TypeId::IntN
            | TypeId::BitN
            | TypeId::FloatN
            | TypeId::MoneyN
            | TypeId::DateTimeN => dst.put_u8(self.max_length as u8),
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                dst.put_u8(self.max_length as u8);
                dst.put_u8(self.precision);
                dst.put_u8(self.scale);
            }
            TypeId::BigVarChar | TypeId::BigChar | TypeId::NVarChar | TypeId::NChar => {
                dst.put_u16_le(self.max_length as u16);
                self.collation.unwrap_or_default().encode(dst);
            }
            TypeId::BigVarBinary | TypeId::BigBinary => dst.put_u16_le(self.max_length as u16),
            TypeId::Text | TypeId::NText => {
                dst.put_u32_le(self.max_length);
                self.collation.unwrap_or_default().encode(dst);
            }
            TypeId::Image => dst.put_u32_le(self.max_length),
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => dst.put_u8(self.scale),
            TypeId::Xml => dst.put_u8(0),
            _ => {}
        }
    }

    /// Narrowest type info able to carry `value`.
    ///
    /// Variable-length values use the smallest inline length that fits and
    /// switch to `max` (PLP) only above 8000 bytes.
    #[must_use]
    pub fn for_value(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => Self::nvarchar(2),
            SqlValue::Bool(_) => Self::bit_n(),
            SqlValue::TinyInt(_) => Self::int_n(1),
            SqlValue::SmallInt(_) => Self::int_n(2),
            SqlValue::Int(_) => Self::int_n(4),
            SqlValue::BigInt(_) => Self::int_n(8),
            SqlValue::Float(_) => Self::float_n(4),
            SqlValue::Double(_) => Self::float_n(8),
            SqlValue::Decimal(n) => {
                let precision = n.precision().max(n.scale()).max(1);
                Self::numeric(precision, n.scale())
            }
            SqlValue::Money(_) => Self::money_n(8),
            SqlValue::String(s) => {
                let bytes = utf16_byte_len(s);
                if bytes > MAX_INLINE_BYTES {
                    Self::nvarchar_max()
                } else {
                    Self::nvarchar(bytes.max(2) as u16)
                }
            }
            SqlValue::Binary(b) => {
                if b.len() > MAX_INLINE_BYTES {
                    Self::varbinary_max()
                } else {
                    Self::varbinary(b.len().max(1) as u16)
                }
            }
            SqlValue::Uuid(_) => Self::guid(),
            SqlValue::Date(_) => Self::new(TypeId::Date),
            SqlValue::Time(_) => Self::with_scale(TypeId::Time, 7),
            SqlValue::DateTime(_) => Self::with_scale(TypeId::DateTime2, 7),
            SqlValue::DateTimeOffset(_) => Self::with_scale(TypeId::DateTimeOffset, 7),
            SqlValue::Xml(_) => Self {
                max_length: MAX_LENGTH_PLP,
                ..Self::new(TypeId::Xml)
            },
        }
    }

    /// SQL declaration such as `nvarchar(20)` or `decimal(38,4)`.
    #[must_use]
    pub fn sql_declaration(&self) -> String {
        let name = self.type_id.name();
        match self.type_id {
            TypeId::IntN => match self.max_length {
                1 => "tinyint".into(),
                2 => "smallint".into(),
                8 => "bigint".into(),
                _ => "int".into(),
            },
            TypeId::FloatN if self.max_length == 4 => "real".into(),
            TypeId::MoneyN if self.max_length == 4 => "smallmoney".into(),
            TypeId::DateTimeN if self.max_length == 4 => "smalldatetime".into(),
            TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
                format!("{name}({},{})", self.precision, self.scale)
            }
            TypeId::NVarChar | TypeId::NChar => {
                if self.max_length == MAX_LENGTH_PLP {
                    format!("{name}(max)")
                } else {
                    format!("{name}({})", (self.max_length / 2).max(1))
                }
            }
            TypeId::BigVarChar | TypeId::BigChar | TypeId::BigVarBinary | TypeId::BigBinary => {
                if self.max_length == MAX_LENGTH_PLP {
                    format!("{name}(max)")
                } else {
                    format!("{name}({})", self.max_length.max(1))
                }
            }
            TypeId::Time | TypeId::DateTime2 | TypeId::DateTimeOffset => {
                format!("{name}({})", self.scale)
            }
            _ => name.into(),
        }
    }
}

/// Magnitude bytes used for a decimal of the given precision.
#[must_use]
pub const fn decimal_storage_len(precision: u8) -> usize {
    match precision {
        0..=9 => 4,
        10..=19 => 8,
        20..=28 => 12,
        _ => 16,
    }
}

impl From<&Numeric> for TypeInfo {
    fn from(value: &Numeric) -> Self {
        Self::for_value(&SqlValue::Decimal(*value))
    }
}
