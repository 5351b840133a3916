//! LOGIN7 message construction.
//!
//! LOGIN7 is a 94-byte fixed part holding flags and `(offset, length)` pairs,
//! followed by the variable data those pairs point at. String lengths count
//! UTF-16 code units; offsets are from the start of the message.
//!
//! The password is obfuscated, not encrypted: each byte has its nibbles
//! swapped and is XORed with `0xA5`. Only send it over TLS.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use tds_types::strings::encode_utf16;

use crate::error::ProtocolError;
use crate::version::TdsVersion;

/// Size of the fixed part.
pub const LOGIN7_HEADER_SIZE: usize = 94;

bitflags! {
    /// OptionFlags1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags1: u8 {
        /// Big-endian byte order.
        const BYTE_ORDER_BE = 0x01;
        /// EBCDIC character set.
        const CHAR_EBCDIC = 0x02;
        /// Dump/load off.
        const DUMP_LOAD_OFF = 0x10;
        /// Notify on database change.
        const USE_DB_NOTIFY = 0x20;
        /// Initial database failure is fatal.
        const DATABASE_FATAL = 0x40;
        /// Notify on language change.
        const SET_LANG_WARN = 0x80;
    }
}

bitflags! {
    /// OptionFlags2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags2: u8 {
        /// Initial language failure is fatal.
        const LANGUAGE_FATAL = 0x01;
        /// ODBC client.
        const ODBC = 0x02;
        /// Integrated (SSPI) security.
        const INTEGRATED_SECURITY = 0x80;
    }
}

bitflags! {
    /// TypeFlags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeFlags: u8 {
        /// T-SQL dialect.
        const SQL_TSQL = 0x01;
        /// OLE DB client.
        const OLEDB = 0x10;
        /// Application intent is read-only.
        const READ_ONLY_INTENT = 0x20;
    }
}

bitflags! {
    /// OptionFlags3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags3: u8 {
        /// Change password request.
        const CHANGE_PASSWORD = 0x01;
        /// User instance.
        const USER_INSTANCE = 0x02;
        /// Unknown collations are accepted.
        const UNKNOWN_COLLATION_HANDLING = 0x08;
        /// A feature extension block is present.
        const EXTENSION = 0x10;
    }
}

/// Feature extension identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FeatureId {
    /// Session recovery.
    SessionRecovery = 0x01,
    /// Federated authentication.
    FedAuth = 0x02,
    /// UTF-8 collation support.
    Utf8Support = 0x0A,
    /// End of the feature block.
    Terminator = 0xFF,
}

/// FEDAUTH library: the client already holds a security token.
const FEDAUTH_LIBRARY_SECURITY_TOKEN: u8 = 0x01;

/// One feature extension entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureExtension {
    /// Feature ID.
    pub feature_id: FeatureId,
    /// Feature data.
    pub data: Bytes,
}

impl FeatureExtension {
    /// FEDAUTH entry carrying a bearer token.
    ///
    /// `echo` must be set when the server asked for federated authentication
    /// in its PRELOGIN response.
    #[must_use]
    pub fn fed_auth_token(token: &str, echo: bool) -> Self {
        let mut token_bytes = Vec::with_capacity(token.len() * 2);
        encode_utf16(token, &mut token_bytes);

        let mut data = BytesMut::with_capacity(5 + token_bytes.len());
        data.put_u8((FEDAUTH_LIBRARY_SECURITY_TOKEN << 1) | u8::from(echo));
        data.put_u32_le(token_bytes.len() as u32);
        data.put_slice(&token_bytes);
        Self {
            feature_id: FeatureId::FedAuth,
            data: data.freeze(),
        }
    }
}

/// LOGIN7 request.
#[derive(Debug, Clone)]
pub struct Login7 {
    /// TDS version to request.
    pub tds_version: TdsVersion,
    /// Requested packet size.
    pub packet_size: u32,
    /// Client program version.
    pub client_prog_version: u32,
    /// Client process ID.
    pub client_pid: u32,
    /// Connection ID.
    pub connection_id: u32,
    /// Option flags 1.
    pub option_flags1: OptionFlags1,
    /// Option flags 2.
    pub option_flags2: OptionFlags2,
    /// Type flags.
    pub type_flags: TypeFlags,
    /// Option flags 3.
    pub option_flags3: OptionFlags3,
    /// Client timezone offset in minutes.
    pub client_timezone: i32,
    /// Client LCID.
    pub client_lcid: u32,
    /// Client machine name.
    pub hostname: String,
    /// SQL login name.
    pub username: String,
    /// SQL login password.
    pub password: String,
    /// Application name.
    pub app_name: String,
    /// Server name as the client addressed it.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Initial language.
    pub language: String,
    /// Initial database.
    pub database: String,
    /// Client MAC address.
    pub client_id: [u8; 6],
    /// Initial SSPI blob for integrated authentication.
    pub sspi_data: Vec<u8>,
    /// Database file to attach.
    pub attach_db_file: String,
    /// New password for a password change.
    pub new_password: String,
    /// Feature extensions.
    pub features: Vec<FeatureExtension>,
}

impl Default for Login7 {
    fn default() -> Self {
        Self {
            tds_version: TdsVersion::V7_4,
            packet_size: 4096,
            client_prog_version: 0,
            client_pid: std::process::id(),
            connection_id: 0,
            option_flags1: OptionFlags1::USE_DB_NOTIFY | OptionFlags1::DATABASE_FATAL,
            option_flags2: OptionFlags2::LANGUAGE_FATAL | OptionFlags2::ODBC,
            type_flags: TypeFlags::empty(),
            option_flags3: OptionFlags3::UNKNOWN_COLLATION_HANDLING,
            client_timezone: 0,
            client_lcid: 0x0409,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            app_name: String::new(),
            server_name: String::new(),
            library_name: String::from("tds-engine"),
            language: String::new(),
            database: String::new(),
            client_id: [0u8; 6],
            sspi_data: Vec::new(),
            attach_db_file: String::new(),
            new_password: String::new(),
            features: Vec::new(),
        }
    }
}

/// Variable-data writer tracking where each field landed.
struct VarData {
    buf: BytesMut,
}

impl VarData {
    fn offset(&self) -> usize {
        LOGIN7_HEADER_SIZE + self.buf.len()
    }

    /// Append a string, returning `(offset, length in code units)`.
    fn text(&mut self, field: &'static str, s: &str, max: usize) -> Result<(u16, u16), ProtocolError> {
        let units = s.encode_utf16().count();
        if units > max {
            return Err(ProtocolError::FieldTooLong { field, len: units });
        }
        let offset = self.checked_offset(field)?;
        encode_utf16(s, &mut self.buf);
        Ok((offset, units as u16))
    }

    fn password(&mut self, field: &'static str, s: &str) -> Result<(u16, u16), ProtocolError> {
        let units = s.encode_utf16().count();
        if units > 128 {
            return Err(ProtocolError::FieldTooLong { field, len: units });
        }
        let offset = self.checked_offset(field)?;
        write_obfuscated_password(&mut self.buf, s);
        Ok((offset, units as u16))
    }

    fn checked_offset(&self, field: &'static str) -> Result<u16, ProtocolError> {
        u16::try_from(self.offset()).map_err(|_| ProtocolError::FieldTooLong {
            field,
            len: self.offset(),
        })
    }
}

impl Login7 {
    /// Create a LOGIN7 with default flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use SQL Server authentication.
    #[must_use]
    pub fn with_sql_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self.option_flags2.remove(OptionFlags2::INTEGRATED_SECURITY);
        self
    }

    /// Use integrated authentication with an initial SSPI blob.
    #[must_use]
    pub fn with_integrated_auth(mut self, sspi_data: Vec<u8>) -> Self {
        self.sspi_data = sspi_data;
        self.option_flags2.insert(OptionFlags2::INTEGRATED_SECURITY);
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the client machine name.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Declare read-only application intent.
    #[must_use]
    pub fn with_read_only_intent(mut self, read_only: bool) -> Self {
        self.type_flags.set(TypeFlags::READ_ONLY_INTENT, read_only);
        self
    }

    /// Add a feature extension.
    #[must_use]
    pub fn with_feature(mut self, feature: FeatureExtension) -> Self {
        self.option_flags3.insert(OptionFlags3::EXTENSION);
        self.features.push(feature);
        self
    }

    /// Encode the message.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut var = VarData {
            buf: BytesMut::with_capacity(256),
        };

        let hostname = var.text("hostname", &self.hostname, 128)?;
        let username = var.text("username", &self.username, 128)?;
        let password = var.password("password", &self.password)?;
        let app_name = var.text("application name", &self.app_name, 128)?;
        let server_name = var.text("server name", &self.server_name, 128)?;

        let has_extension = self.option_flags3.contains(OptionFlags3::EXTENSION);
        let extension = if has_extension {
            let offset = var.checked_offset("feature extension")?;
            var.buf.put_u32_le(0);
            (offset, 4u16)
        } else {
            (var.checked_offset("unused")?, 0)
        };

        let library_name = var.text("library name", &self.library_name, 128)?;
        let language = var.text("language", &self.language, 128)?;
        let database = var.text("database", &self.database, 128)?;

        let sspi_offset = var.checked_offset("sspi")?;
        var.buf.put_slice(&self.sspi_data);
        let (sspi_len, sspi_long) = if self.sspi_data.len() >= 0xFFFF {
            (0xFFFFu16, self.sspi_data.len() as u32)
        } else {
            (self.sspi_data.len() as u16, 0)
        };

        let attach_db = var.text("attach db file", &self.attach_db_file, 260)?;
        let new_password = var.password("new password", &self.new_password)?;

        if has_extension {
            let block_offset = var.offset() as u32;
            let at = usize::from(extension.0) - LOGIN7_HEADER_SIZE;
            var.buf[at..at + 4].copy_from_slice(&block_offset.to_le_bytes());
            for feature in &self.features {
                var.buf.put_u8(feature.feature_id as u8);
                var.buf.put_u32_le(feature.data.len() as u32);
                var.buf.put_slice(&feature.data);
            }
            var.buf.put_u8(FeatureId::Terminator as u8);
        }

        let total_length = LOGIN7_HEADER_SIZE + var.buf.len();
        let mut buf = BytesMut::with_capacity(total_length);
        buf.put_u32_le(total_length as u32);
        buf.put_u32_le(self.tds_version.raw());
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.client_prog_version);
        buf.put_u32_le(self.client_pid);
        buf.put_u32_le(self.connection_id);

        buf.put_u8(self.option_flags1.bits());
        buf.put_u8(self.option_flags2.bits());
        buf.put_u8(self.type_flags.bits());
        buf.put_u8(self.option_flags3.bits());

        buf.put_i32_le(self.client_timezone);
        buf.put_u32_le(self.client_lcid);

        for (offset, len) in [hostname, username, password, app_name, server_name, extension] {
            buf.put_u16_le(offset);
            buf.put_u16_le(len);
        }
        for (offset, len) in [library_name, language, database] {
            buf.put_u16_le(offset);
            buf.put_u16_le(len);
        }
        buf.put_slice(&self.client_id);
        buf.put_u16_le(sspi_offset);
        buf.put_u16_le(sspi_len);
        for (offset, len) in [attach_db, new_password] {
            buf.put_u16_le(offset);
            buf.put_u16_le(len);
        }
        buf.put_u32_le(sspi_long);

        buf.put_slice(&var.buf);
        Ok(buf.freeze())
    }
}

/// Write a password with the LOGIN7 byte obfuscation.
fn write_obfuscated_password(dst: &mut impl BufMut, password: &str) {
    for unit in password.encode_utf16() {
        for b in unit.to_le_bytes() {
            dst.put_u8(b.rotate_right(4) ^ 0xA5);
        }
    }
}
