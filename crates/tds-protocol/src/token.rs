//! TDS token stream definitions.
//!
//! Tokens are the units of a server response. Each begins with a one-byte
//! type identifier followed by token-specific data; some tokens carry their
//! own length prefix, others (COLMETADATA, ROW, NBCROW, RETURNVALUE) are
//! sized by the column metadata that precedes them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tds_protocol::token::{Token, TokenDecoder};
//!
//! let mut decoder = TokenDecoder::new();
//! while let Some(token) = decoder.decode(&mut buf)? {
//!     match token {
//!         Token::Done(done) => println!("rows affected: {:?}", done.row_count()),
//!         Token::Error(err) => eprintln!("error {}: {}", err.number, err.message),
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::Arc;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes};
use tds_types::strings::{
    decode_utf16, read_b_varchar, read_us_varchar, write_b_varchar, write_us_varchar,
};
use tds_types::{
    Collation, PlpChunks, SqlValue, TypeError, TypeInfo, convert_value, encode_value, read_value,
};

use crate::error::{ProtocolError, ensure};
use crate::version::{ServerVersion, TdsVersion};

/// Token type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Return status of a stored procedure.
    ReturnStatus = 0x79,
    /// Result set metadata.
    ColMetaData = 0x81,
    /// Result ordering.
    Order = 0xA9,
    /// Error message.
    Error = 0xAA,
    /// Informational message.
    Info = 0xAB,
    /// Output parameter value.
    ReturnValue = 0xAC,
    /// Login acknowledgment.
    LoginAck = 0xAD,
    /// Feature extension acknowledgment.
    FeatureExtAck = 0xAE,
    /// Row data.
    Row = 0xD1,
    /// Null bitmap compressed row.
    NbcRow = 0xD2,
    /// Environment change.
    EnvChange = 0xE3,
    /// SSPI challenge.
    Sspi = 0xED,
    /// Federated authentication information.
    FedAuthInfo = 0xEE,
    /// End of a SQL statement.
    Done = 0xFD,
    /// End of a stored procedure.
    DoneProc = 0xFE,
    /// End of a statement inside a stored procedure.
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x79 => Self::ReturnStatus,
            0x81 => Self::ColMetaData,
            0xA9 => Self::Order,
            0xAA => Self::Error,
            0xAB => Self::Info,
            0xAC => Self::ReturnValue,
            0xAD => Self::LoginAck,
            0xAE => Self::FeatureExtAck,
            0xD1 => Self::Row,
            0xD2 => Self::NbcRow,
            0xE3 => Self::EnvChange,
            0xED => Self::Sspi,
            0xEE => Self::FedAuthInfo,
            0xFD => Self::Done,
            0xFE => Self::DoneProc,
            0xFF => Self::DoneInProc,
            other => return Err(ProtocolError::UnknownToken(other)),
        })
    }
}

/// Decoded TDS token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Column metadata for the rows that follow.
    ColMetaData(Arc<ColMetaData>),
    /// A row (ROW or NBCROW).
    Row(Row),
    /// DONE.
    Done(Done),
    /// DONEPROC.
    DoneProc(Done),
    /// DONEINPROC.
    DoneInProc(Done),
    /// Server error.
    Error(ServerMessage),
    /// Server informational message.
    Info(ServerMessage),
    /// Login acknowledgment.
    LoginAck(LoginAck),
    /// Environment change.
    EnvChange(EnvChange),
    /// Stored procedure return status.
    ReturnStatus(i32),
    /// Output parameter.
    ReturnValue(ReturnValue),
    /// ORDER BY column ordinals.
    Order(Vec<u16>),
    /// Feature extension acknowledgment.
    FeatureExtAck(Vec<FeatureAck>),
    /// SSPI challenge blob.
    Sspi(Bytes),
    /// Federated authentication information.
    FedAuthInfo(FedAuthInfo),
}

impl Token {
    /// The DONE-family payload, if this is one.
    #[must_use]
    pub fn as_done(&self) -> Option<&Done> {
        match self {
            Self::Done(done) | Self::DoneProc(done) | Self::DoneInProc(done) => Some(done),
            _ => None,
        }
    }
}

bitflags! {
    /// COLMETADATA column flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ColumnFlags: u16 {
        /// Column accepts NULL.
        const NULLABLE = 0x0001;
        /// Case-sensitive comparisons.
        const CASE_SENSITIVE = 0x0002;
        /// Updatable (read/write).
        const UPDATEABLE = 0x0004;
        /// Updatability unknown.
        const UPDATEABLE_UNKNOWN = 0x0008;
        /// Identity column.
        const IDENTITY = 0x0010;
        /// Computed column.
        const COMPUTED = 0x0020;
        /// Fixed-length CLR type.
        const FIXED_LEN_CLR_TYPE = 0x0100;
        /// Sparse column set.
        const SPARSE_COLUMN_SET = 0x0400;
        /// Always Encrypted column.
        const ENCRYPTED = 0x0800;
        /// Hidden (browse mode).
        const HIDDEN = 0x2000;
        /// Key column (browse mode).
        const KEY = 0x4000;
        /// Nullability unknown.
        const NULLABLE_UNKNOWN = 0x8000;
    }
}

/// One column of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// User type id.
    pub user_type: u32,
    /// Column flags.
    pub flags: ColumnFlags,
    /// Wire type.
    pub type_info: TypeInfo,
    /// Table name parts, present for TEXT, NTEXT and IMAGE columns.
    pub table_name: Option<Vec<String>>,
}

impl Column {
    /// Column with default flags.
    pub fn new(name: impl Into<String>, type_info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            user_type: 0,
            flags: ColumnFlags::NULLABLE,
            type_info,
            table_name: None,
        }
    }

    /// Whether the column accepts NULL.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.flags.contains(ColumnFlags::NULLABLE)
    }

    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        ensure(src, 6)?;
        let user_type = src.get_u32_le();
        let flags = ColumnFlags::from_bits_retain(src.get_u16_le());
        let type_info = TypeInfo::decode(src)?;

        let table_name = if type_info.type_id.is_text_pointer() {
            ensure(src, 1)?;
            let parts = src.get_u8();
            let mut names = Vec::with_capacity(usize::from(parts));
            for _ in 0..parts {
                names.push(read_us_varchar(src)?);
            }
            Some(names)
        } else {
            None
        };

        let name = read_b_varchar(src)?;
        Ok(Self {
            name,
            user_type,
            flags,
            type_info,
            table_name,
        })
    }

    fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        dst.put_u32_le(self.user_type);
        dst.put_u16_le(self.flags.bits());
        self.type_info.encode(dst);
        if self.type_info.type_id.is_text_pointer() {
            let parts = self.table_name.as_deref().unwrap_or_default();
            let count = u8::try_from(parts.len()).map_err(|_| ProtocolError::FieldTooLong {
                field: "table name",
                len: parts.len(),
            })?;
            dst.put_u8(count);
            for part in parts {
                write_us_varchar(dst, part)?;
            }
        }
        write_b_varchar(dst, &self.name)?;
        Ok(())
    }
}

/// COLMETADATA: the columns of the result set that follows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColMetaData {
    /// Columns in ordinal order.
    pub columns: Vec<Column>,
}

impl ColMetaData {
    /// Column count announcing that no metadata follows.
    pub const NO_METADATA: u16 = 0xFFFF;

    /// Build from columns.
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether there are no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Ordinal of the column named `name` (case-insensitive).
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Decode the body of a COLMETADATA token.
    pub fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let count = src.get_u16_le();
        if count == Self::NO_METADATA {
            return Ok(Self::default());
        }
        let mut columns = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            columns.push(Column::decode(src)?);
        }
        Ok(Self { columns })
    }

    /// Encode as a complete COLMETADATA token.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        let count = u16::try_from(self.columns.len())
            .ok()
            .filter(|c| *c != Self::NO_METADATA)
            .ok_or(ProtocolError::FieldTooLong {
                field: "column count",
                len: self.columns.len(),
            })?;
        dst.put_u8(TokenType::ColMetaData as u8);
        dst.put_u16_le(count);
        for column in &self.columns {
            column.encode(dst)?;
        }
        Ok(())
    }
}

/// A decoded row.
///
/// Conversion failures are kept per value so one bad column does not lose
/// the rest of the row or desynchronize the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    metadata: Arc<ColMetaData>,
    values: Vec<Result<SqlValue, TypeError>>,
    plp: Vec<(usize, PlpChunks)>,
}

impl Row {
    /// Build a row from converted values.
    #[must_use]
    pub fn new(metadata: Arc<ColMetaData>, values: Vec<Result<SqlValue, TypeError>>) -> Self {
        Self {
            metadata,
            values,
            plp: Vec::new(),
        }
    }

    /// Metadata the row was decoded against.
    #[must_use]
    pub fn metadata(&self) -> &Arc<ColMetaData> {
        &self.metadata
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `index`, or its conversion error.
    pub fn get(&self, index: usize) -> Option<&Result<SqlValue, TypeError>> {
        self.values.get(index)
    }

    /// Value of the column named `name`.
    pub fn get_by_name(&self, name: &str) -> Option<&Result<SqlValue, TypeError>> {
        self.metadata.position(name).and_then(|i| self.values.get(i))
    }

    /// Iterate values in column order.
    pub fn iter(&self) -> impl Iterator<Item = &Result<SqlValue, TypeError>> {
        self.values.iter()
    }

    /// Chunks of a `max` column exactly as the server sent them.
    ///
    /// The chunks share the response buffer. `None` for NULL and for
    /// columns that are not PLP-framed.
    #[must_use]
    pub fn plp_chunks(&self, index: usize) -> Option<PlpChunks> {
        self.plp
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, chunks)| chunks.clone())
    }

    /// All values, failing on the first conversion error.
    pub fn into_values(self) -> Result<Vec<SqlValue>, TypeError> {
        self.values.into_iter().collect()
    }

    fn decode(
        src: &mut Bytes,
        metadata: &Arc<ColMetaData>,
        null_bitmap: bool,
    ) -> Result<Self, ProtocolError> {
        let count = metadata.len();
        let bitmap = if null_bitmap {
            let len = count.div_ceil(8);
            ensure(src, len)?;
            Some(src.split_to(len))
        } else {
            None
        };

        let mut values = Vec::with_capacity(count);
        let mut plp = Vec::new();
        for (i, column) in metadata.columns.iter().enumerate() {
            let is_null = bitmap
                .as_ref()
                .is_some_and(|b| b[i / 8] & (1 << (i % 8)) != 0);
            if is_null {
                values.push(Ok(SqlValue::Null));
                continue;
            }
            let payload = if column.type_info.is_plp() {
                PlpChunks::read(src)?.map(|chunks| {
                    plp.push((i, chunks.clone()));
                    chunks.into_bytes()
                })
            } else {
                read_value(src, &column.type_info)?
            };
            values.push(convert_value(payload, &column.type_info));
        }

        Ok(Self {
            metadata: Arc::clone(metadata),
            values,
            plp,
        })
    }
}

/// Encode a ROW token of `values` against `metadata`.
pub fn encode_row(
    metadata: &ColMetaData,
    values: &[SqlValue],
    dst: &mut impl BufMut,
) -> Result<(), ProtocolError> {
    if values.len() != metadata.len() {
        return Err(ProtocolError::malformed(
            "ROW",
            format!("{} values for {} columns", values.len(), metadata.len()),
        ));
    }
    dst.put_u8(TokenType::Row as u8);
    for (value, column) in values.iter().zip(&metadata.columns) {
        encode_value(value, &column.type_info, dst)?;
    }
    Ok(())
}

bitflags! {
    /// DONE status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow in this response.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const IN_XACT = 0x0004;
        /// `row_count` is valid.
        const COUNT = 0x0010;
        /// Acknowledges an attention.
        const ATTN = 0x0020;
        /// Server error; discard the results.
        const SRVERROR = 0x0100;
    }
}

/// DONE, DONEPROC and DONEINPROC payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Done {
    /// Status bits.
    pub status: DoneStatus,
    /// Current command token.
    pub cur_cmd: u16,
    /// Rows affected, valid when [`DoneStatus::COUNT`] is set.
    pub row_count: u64,
}

impl Done {
    /// Encoded body size.
    pub const SIZE: usize = 12;

    /// More results follow.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// The statement failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status.intersects(DoneStatus::ERROR | DoneStatus::SRVERROR)
    }

    /// This DONE acknowledges an attention.
    #[must_use]
    pub fn is_attention(&self) -> bool {
        self.status.contains(DoneStatus::ATTN)
    }

    /// Rows affected, when reported.
    #[must_use]
    pub fn row_count(&self) -> Option<u64> {
        self.status
            .contains(DoneStatus::COUNT)
            .then_some(self.row_count)
    }

    /// Decode the 12-byte body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, Self::SIZE)?;
        Ok(Self {
            status: DoneStatus::from_bits_retain(src.get_u16_le()),
            cur_cmd: src.get_u16_le(),
            row_count: src.get_u64_le(),
        })
    }

    /// Encode as a complete DONE token.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(TokenType::Done as u8);
        dst.put_u16_le(self.status.bits());
        dst.put_u16_le(self.cur_cmd);
        dst.put_u64_le(self.row_count);
    }
}

/// ERROR or INFO message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// Error state.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number.
    pub line: u32,
}

impl ServerMessage {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        ensure(src, 6)?;
        let number = src.get_i32_le();
        let state = src.get_u8();
        let class = src.get_u8();
        let message = read_us_varchar(src)?;
        let server = read_b_varchar(src)?;
        let procedure = read_b_varchar(src)?;
        ensure(src, 4)?;
        let line = src.get_u32_le();
        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }
}

/// LOGINACK payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface (1 = T-SQL).
    pub interface: u8,
    /// TDS version the server agreed to.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub prog_name: String,
    /// Server program version.
    pub prog_version: ServerVersion,
}

impl LoginAck {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        ensure(src, 5)?;
        let interface = src.get_u8();
        let tds_version = TdsVersion::new(src.get_u32());
        let prog_name = read_b_varchar(src)?;
        ensure(src, 4)?;
        let major = src.get_u8();
        let minor = src.get_u8();
        let build = src.get_u16();
        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version: ServerVersion {
                major,
                minor,
                build,
                sub_build: 0,
            },
        })
    }
}

/// ENVCHANGE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// Current database changed.
    Database {
        /// New database.
        new: String,
        /// Previous database.
        old: String,
    },
    /// Session language changed.
    Language {
        /// New language.
        new: String,
        /// Previous language.
        old: String,
    },
    /// Character set changed.
    CharacterSet {
        /// New character set.
        new: String,
        /// Previous character set.
        old: String,
    },
    /// Packet size changed.
    PacketSize {
        /// New size.
        new: u32,
        /// Previous size.
        old: u32,
    },
    /// Default collation changed.
    Collation {
        /// New collation, if any.
        new: Option<Collation>,
    },
    /// A transaction started.
    BeginTransaction {
        /// Transaction descriptor for subsequent requests.
        descriptor: u64,
    },
    /// A transaction committed.
    CommitTransaction {
        /// Descriptor of the finished transaction.
        descriptor: u64,
    },
    /// A transaction rolled back.
    RollbackTransaction {
        /// Descriptor of the finished transaction.
        descriptor: u64,
    },
    /// The server asks the client to reconnect elsewhere.
    Routing {
        /// Protocol (0 = TCP).
        protocol: u8,
        /// Port.
        port: u16,
        /// Alternate server.
        server: String,
    },
    /// A change this client does not act on.
    Other {
        /// ENVCHANGE type byte.
        kind: u8,
        /// Raw data after the type byte.
        data: Bytes,
    },
}

impl EnvChange {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        ensure(src, 1)?;
        let kind = src.get_u8();
        Ok(match kind {
            1 => {
                let (new, old) = read_string_pair(src)?;
                Self::Database { new, old }
            }
            2 => {
                let (new, old) = read_string_pair(src)?;
                Self::Language { new, old }
            }
            3 => {
                let (new, old) = read_string_pair(src)?;
                Self::CharacterSet { new, old }
            }
            4 => {
                let (new, old) = read_string_pair(src)?;
                Self::PacketSize {
                    new: parse_packet_size(&new)?,
                    old: old.parse().unwrap_or(0),
                }
            }
            7 => {
                let new = read_b_varbyte(src)?;
                read_b_varbyte(src)?;
                let new = if new.is_empty() {
                    None
                } else {
                    Some(Collation::decode(&mut new.clone())?)
                };
                Self::Collation { new }
            }
            8 => {
                let new = read_b_varbyte(src)?;
                read_b_varbyte(src)?;
                Self::BeginTransaction {
                    descriptor: descriptor(&new)?,
                }
            }
            9 | 10 => {
                read_b_varbyte(src)?;
                let old = read_b_varbyte(src)?;
                let descriptor = descriptor(&old)?;
                if kind == 9 {
                    Self::CommitTransaction { descriptor }
                } else {
                    Self::RollbackTransaction { descriptor }
                }
            }
            20 => {
                ensure(src, 2)?;
                let len = usize::from(src.get_u16_le());
                ensure(src, len)?;
                let mut value = src.split_to(len);
                ensure(&value, 3)?;
                let protocol = value.get_u8();
                let port = value.get_u16_le();
                let server = read_us_varchar(&mut value)?;
                Self::Routing {
                    protocol,
                    port,
                    server,
                }
            }
            _ => Self::Other {
                kind,
                data: src.split_to(src.len()),
            },
        })
    }
}

fn read_string_pair(src: &mut Bytes) -> Result<(String, String), ProtocolError> {
    let new = read_b_varchar(src)?;
    let old = read_b_varchar(src)?;
    Ok((new, old))
}

fn read_b_varbyte(src: &mut Bytes) -> Result<Bytes, ProtocolError> {
    ensure(src, 1)?;
    let len = usize::from(src.get_u8());
    ensure(src, len)?;
    Ok(src.split_to(len))
}

fn descriptor(value: &[u8]) -> Result<u64, ProtocolError> {
    let bytes: [u8; 8] = value.try_into().map_err(|_| {
        ProtocolError::malformed(
            "ENVCHANGE",
            format!("transaction descriptor of {} bytes", value.len()),
        )
    })?;
    Ok(u64::from_le_bytes(bytes))
}

fn parse_packet_size(value: &str) -> Result<u32, ProtocolError> {
    value
        .parse()
        .map_err(|_| ProtocolError::malformed("ENVCHANGE", format!("packet size {value:?}")))
}

/// RETURNVALUE: an output parameter or UDF result.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnValue {
    /// Parameter ordinal.
    pub ordinal: u16,
    /// Parameter name.
    pub name: String,
    /// Status (1 = output parameter, 2 = UDF return value).
    pub status: u8,
    /// User type id.
    pub user_type: u32,
    /// Flags.
    pub flags: ColumnFlags,
    /// Wire type.
    pub type_info: TypeInfo,
    /// Converted value.
    pub value: Result<SqlValue, TypeError>,
}

impl ReturnValue {
    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        ensure(src, 2)?;
        let ordinal = src.get_u16_le();
        let name = read_b_varchar(src)?;
        ensure(src, 7)?;
        let status = src.get_u8();
        let user_type = src.get_u32_le();
        let flags = ColumnFlags::from_bits_retain(src.get_u16_le());
        let type_info = TypeInfo::decode(src)?;
        let payload = read_value(src, &type_info)?;
        let value = convert_value(payload, &type_info);
        Ok(Self {
            ordinal,
            name,
            status,
            user_type,
            flags,
            type_info,
            value,
        })
    }
}

/// One acknowledged feature from FEATUREEXTACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureAck {
    /// Feature id.
    pub feature_id: u8,
    /// Feature data.
    pub data: Bytes,
}

fn decode_feature_ext_ack(src: &mut Bytes) -> Result<Vec<FeatureAck>, ProtocolError> {
    let mut features = Vec::new();
    loop {
        ensure(src, 1)?;
        let feature_id = src.get_u8();
        if feature_id == 0xFF {
            return Ok(features);
        }
        ensure(src, 4)?;
        let len = src.get_u32_le() as usize;
        ensure(src, len)?;
        features.push(FeatureAck {
            feature_id,
            data: src.split_to(len),
        });
    }
}

/// FEDAUTHINFO payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FedAuthInfo {
    /// Token endpoint URL.
    pub sts_url: String,
    /// Service principal name.
    pub spn: String,
}

impl FedAuthInfo {
    const STS_URL: u8 = 0x01;
    const SPN: u8 = 0x02;

    fn decode(body: &Bytes) -> Result<Self, ProtocolError> {
        let mut src = body.clone();
        ensure(&src, 4)?;
        let count = src.get_u32_le() as usize;
        let mut info = Self::default();
        for _ in 0..count {
            ensure(&src, 9)?;
            let id = src.get_u8();
            let len = src.get_u32_le() as usize;
            let offset = src.get_u32_le() as usize;
            let data = body.get(offset..offset + len).ok_or_else(|| {
                ProtocolError::malformed(
                    "FEDAUTHINFO",
                    format!("option at {offset}+{len} exceeds {} bytes", body.len()),
                )
            })?;
            match id {
                Self::STS_URL => info.sts_url = decode_utf16(data)?,
                Self::SPN => info.spn = decode_utf16(data)?,
                _ => {}
            }
        }
        Ok(info)
    }
}

/// Incremental token decoder.
///
/// Holds the current result-set metadata so ROW and NBCROW tokens can be
/// decoded. [`TokenDecoder::decode`] only consumes input when a whole token
/// was decoded; on [`ProtocolError::Incomplete`] the caller appends more
/// bytes and tries again.
#[derive(Debug, Default)]
pub struct TokenDecoder {
    metadata: Option<Arc<ColMetaData>>,
}

impl TokenDecoder {
    /// Create a decoder with no metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata of the current result set.
    #[must_use]
    pub fn metadata(&self) -> Option<&Arc<ColMetaData>> {
        self.metadata.as_ref()
    }

    /// Decode the next token, or `None` if `src` is empty.
    pub fn decode(&mut self, src: &mut Bytes) -> Result<Option<Token>, ProtocolError> {
        if src.is_empty() {
            return Ok(None);
        }
        let mut cursor = src.clone();
        let token = self.decode_token(&mut cursor)?;
        *src = cursor;
        Ok(Some(token))
    }

    fn decode_token(&mut self, src: &mut Bytes) -> Result<Token, ProtocolError> {
        let token_type = TokenType::from_u8(src.get_u8())?;
        let token = match token_type {
            TokenType::ColMetaData => {
                let metadata = Arc::new(ColMetaData::decode(src)?);
                self.metadata = Some(Arc::clone(&metadata));
                Token::ColMetaData(metadata)
            }
            TokenType::Row | TokenType::NbcRow => {
                let metadata = self
                    .metadata
                    .as_ref()
                    .ok_or(ProtocolError::RowWithoutMetadata)?;
                Token::Row(Row::decode(src, metadata, token_type == TokenType::NbcRow)?)
            }
            TokenType::Done => Token::Done(Done::decode(src)?),
            TokenType::DoneProc => Token::DoneProc(Done::decode(src)?),
            TokenType::DoneInProc => Token::DoneInProc(Done::decode(src)?),
            TokenType::ReturnStatus => {
                ensure(src, 4)?;
                Token::ReturnStatus(src.get_i32_le())
            }
            TokenType::ReturnValue => Token::ReturnValue(ReturnValue::decode(src)?),
            TokenType::FeatureExtAck => Token::FeatureExtAck(decode_feature_ext_ack(src)?),
            TokenType::Error => {
                Token::Error(length_prefixed(src, "ERROR", ServerMessage::decode)?)
            }
            TokenType::Info => Token::Info(length_prefixed(src, "INFO", ServerMessage::decode)?),
            TokenType::LoginAck => {
                Token::LoginAck(length_prefixed(src, "LOGINACK", LoginAck::decode)?)
            }
            TokenType::EnvChange => {
                Token::EnvChange(length_prefixed(src, "ENVCHANGE", EnvChange::decode)?)
            }
            TokenType::Order => Token::Order(length_prefixed(src, "ORDER", |body| {
                if body.len() % 2 != 0 {
                    return Err(ProtocolError::malformed("ORDER", "odd length"));
                }
                let mut columns = Vec::with_capacity(body.len() / 2);
                while body.has_remaining() {
                    columns.push(body.get_u16_le());
                }
                Ok(columns)
            })?),
            TokenType::Sspi => Token::Sspi(length_prefixed(src, "SSPI", |body| {
                Ok(body.split_to(body.len()))
            })?),
            TokenType::FedAuthInfo => {
                ensure(src, 4)?;
                let len = src.get_u32_le() as usize;
                ensure(src, len)?;
                let body = src.split_to(len);
                Token::FedAuthInfo(FedAuthInfo::decode(&body).map_err(|e| bounded("FEDAUTHINFO", e))?)
            }
        };
        Ok(token)
    }
}

/// Decode a token whose body is prefixed by a `u16` length.
///
/// Running short inside a complete body means the length field lied.
fn length_prefixed<T>(
    src: &mut Bytes,
    what: &'static str,
    decode: impl FnOnce(&mut Bytes) -> Result<T, ProtocolError>,
) -> Result<T, ProtocolError> {
    ensure(src, 2)?;
    let len = usize::from(src.get_u16_le());
    ensure(src, len)?;
    let mut body = src.split_to(len);
    decode(&mut body).map_err(|e| bounded(what, e))
}

fn bounded(what: &'static str, err: ProtocolError) -> ProtocolError {
    if err.is_incomplete() {
        ProtocolError::malformed(what, "length field shorter than content")
    } else {
        err
    }
}
