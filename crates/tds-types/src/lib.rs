//! # tds-types
//!
//! Wire layouts and native values for SQL Server data types.
//!
//! This crate is the value codec of the TDS engine. It knows how each type's
//! `TYPE_INFO` is laid out, how values are framed (fixed width, byte or
//! ushort length prefix, text pointer, PLP chunks) and how payloads map to
//! [`SqlValue`]. It has no knowledge of packets or tokens.
//!
//! ## Type Mappings
//!
//! | SQL Server Type | Rust Type |
//! |-----------------|-----------|
//! | `BIT` | `bool` |
//! | `TINYINT` | `u8` |
//! | `SMALLINT` | `i16` |
//! | `INT` | `i32` |
//! | `BIGINT` | `i64` |
//! | `REAL` | `f32` |
//! | `FLOAT` | `f64` |
//! | `DECIMAL`/`NUMERIC` | [`Numeric`] (38 digits) |
//! | `MONEY`/`SMALLMONEY` | `i64` ten-thousandths |
//! | `CHAR`/`VARCHAR`/`TEXT` | `String` (via the collation's code page) |
//! | `NCHAR`/`NVARCHAR`/`NTEXT` | `String` |
//! | `BINARY`/`VARBINARY`/`IMAGE` | `bytes::Bytes` |
//! | `DATE` | `chrono::NaiveDate` |
//! | `TIME` | `chrono::NaiveTime` |
//! | `DATETIME`/`SMALLDATETIME`/`DATETIME2` | `chrono::NaiveDateTime` |
//! | `DATETIMEOFFSET` | `chrono::DateTime<FixedOffset>` |
//! | `UNIQUEIDENTIFIER` | `uuid::Uuid` |
//! | `XML` | `String` |
//!
//! ## Features
//!
//! - `decimal` (default): conversions between [`Numeric`] and
//!   `rust_decimal::Decimal`

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod collation;
pub mod decode;
pub mod encode;
pub mod error;
pub mod numeric;
pub mod plp;
pub mod strings;
pub mod temporal;
pub mod type_info;
pub mod value;

pub use collation::Collation;
pub use decode::{convert_value, decode_value, read_value};
pub use encode::{encode_payload, encode_value};
pub use error::TypeError;
pub use numeric::Numeric;
pub use plp::PlpChunks;
pub use type_info::{TypeId, TypeInfo, ValueFraming};
pub use value::SqlValue;
