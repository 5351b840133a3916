//! PRELOGIN message.
//!
//! PRELOGIN is the first exchange on a connection and is always sent in
//! clear text. It is a table of `(option, offset, length)` entries terminated
//! by `0xFF`, followed by the option data. Offsets are absolute within the
//! payload and both offset and length are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, ensure};
use crate::version::ServerVersion;

/// Pre-login option tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreLoginOption {
    /// Version information.
    Version = 0x00,
    /// Encryption negotiation.
    Encryption = 0x01,
    /// Instance name (for named instances).
    Instance = 0x02,
    /// Client thread ID.
    ThreadId = 0x03,
    /// MARS (Multiple Active Result Sets) support.
    Mars = 0x04,
    /// Trace ID for correlating client and server traces.
    TraceId = 0x05,
    /// Federated authentication required.
    FedAuthRequired = 0x06,
    /// Nonce for encryption.
    Nonce = 0x07,
    /// Terminator (end of options).
    Terminator = 0xFF,
}

impl PreLoginOption {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Version),
            0x01 => Ok(Self::Encryption),
            0x02 => Ok(Self::Instance),
            0x03 => Ok(Self::ThreadId),
            0x04 => Ok(Self::Mars),
            0x05 => Ok(Self::TraceId),
            0x06 => Ok(Self::FedAuthRequired),
            0x07 => Ok(Self::Nonce),
            0xFF => Ok(Self::Terminator),
            _ => Err(ProtocolError::InvalidPreloginOption(value)),
        }
    }
}

/// Encryption level requested by the client or answered by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encrypt the login only.
    Off = 0x00,
    /// Encrypt everything.
    #[default]
    On = 0x01,
    /// No encryption available.
    NotSupported = 0x02,
    /// Encryption is mandatory.
    Required = 0x03,
}

impl EncryptionLevel {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Off),
            0x01 => Ok(Self::On),
            0x02 => Ok(Self::NotSupported),
            0x03 => Ok(Self::Required),
            other => Err(ProtocolError::malformed(
                "PRELOGIN",
                format!("unknown encryption level 0x{other:02X}"),
            )),
        }
    }
}

/// How much of the session runs over TLS once negotiation settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    /// Everything in clear text.
    None,
    /// LOGIN7 over TLS, then clear text.
    LoginOnly,
    /// Everything after PRELOGIN over TLS.
    Full,
}

/// Trace correlation data for the TRACEID option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceId {
    /// Connection ID (GUID bytes).
    pub connection_id: [u8; 16],
    /// Activity ID (GUID bytes).
    pub activity_id: [u8; 16],
    /// Activity sequence.
    pub activity_sequence: u32,
}

/// PRELOGIN request or response.
///
/// The client sends its driver version in VERSION; the server answers with
/// its product version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreLogin {
    /// Driver version (request) or server product version (response).
    pub version: ServerVersion,
    /// Encryption level.
    pub encryption: EncryptionLevel,
    /// Instance name; empty means the default instance.
    pub instance: String,
    /// Client thread ID.
    pub thread_id: u32,
    /// MARS enabled.
    pub mars: bool,
    /// Trace correlation data.
    pub trace_id: Option<TraceId>,
    /// Federated authentication required (request: a bearer token will be used).
    pub fed_auth_required: bool,
}

impl PreLogin {
    /// Create a new request with the given encryption level.
    #[must_use]
    pub fn new(encryption: EncryptionLevel) -> Self {
        Self {
            encryption,
            ..Self::default()
        }
    }

    /// Set the instance name.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Set the trace ID.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Mark that federated authentication will be used.
    #[must_use]
    pub fn with_fed_auth(mut self, required: bool) -> Self {
        self.fed_auth_required = required;
        self
    }

    /// Encode the option table and data.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut options: Vec<(PreLoginOption, Vec<u8>)> = Vec::with_capacity(7);

        let mut version = Vec::with_capacity(6);
        version.put_u32(self.version.raw());
        version.put_u16_le(self.version.sub_build);
        options.push((PreLoginOption::Version, version));
        options.push((PreLoginOption::Encryption, vec![self.encryption as u8]));

        let mut instance = self.instance.as_bytes().to_vec();
        instance.push(0);
        options.push((PreLoginOption::Instance, instance));

        options.push((PreLoginOption::ThreadId, self.thread_id.to_be_bytes().to_vec()));
        options.push((PreLoginOption::Mars, vec![u8::from(self.mars)]));

        if let Some(trace) = &self.trace_id {
            let mut data = Vec::with_capacity(36);
            data.put_slice(&trace.connection_id);
            data.put_slice(&trace.activity_id);
            data.put_u32_le(trace.activity_sequence);
            options.push((PreLoginOption::TraceId, data));
        }
        if self.fed_auth_required {
            options.push((PreLoginOption::FedAuthRequired, vec![0x01]));
        }

        let table_len = options.len() * 5 + 1;
        let data_len: usize = options.iter().map(|(_, d)| d.len()).sum();
        let mut buf = BytesMut::with_capacity(table_len + data_len);

        let mut offset = table_len;
        for (option, data) in &options {
            buf.put_u8(*option as u8);
            buf.put_u16(offset as u16);
            buf.put_u16(data.len() as u16);
            offset += data.len();
        }
        buf.put_u8(PreLoginOption::Terminator as u8);
        for (_, data) in &options {
            buf.put_slice(data);
        }

        buf.freeze()
    }

    /// Decode a PRELOGIN payload.
    ///
    /// Entries pointing outside the payload are rejected. Unknown options
    /// with valid bounds are skipped.
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        let mut table = src;
        let mut entries = Vec::new();
        loop {
            ensure(&table, 1)?;
            let tag = table.get_u8();
            if tag == PreLoginOption::Terminator as u8 {
                break;
            }
            ensure(&table, 4)?;
            let offset = table.get_u16() as usize;
            let length = table.get_u16() as usize;
            if offset + length > src.len() {
                return Err(ProtocolError::malformed(
                    "PRELOGIN",
                    format!("option 0x{tag:02X} at {offset}+{length} exceeds {} bytes", src.len()),
                ));
            }
            entries.push((tag, &src[offset..offset + length]));
        }

        let mut prelogin = Self::default();
        for (tag, data) in entries {
            let Ok(option) = PreLoginOption::from_u8(tag) else {
                continue;
            };
            match option {
                PreLoginOption::Version if data.len() >= 4 => {
                    let raw = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                    let sub_build = if data.len() >= 6 {
                        u16::from_le_bytes([data[4], data[5]])
                    } else {
                        0
                    };
                    prelogin.version = ServerVersion::from_raw(raw, sub_build);
                }
                PreLoginOption::Encryption if !data.is_empty() => {
                    prelogin.encryption = EncryptionLevel::from_u8(data[0])?;
                }
                PreLoginOption::Instance => {
                    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                    prelogin.instance = String::from_utf8_lossy(&data[..end]).into_owned();
                }
                PreLoginOption::ThreadId if data.len() >= 4 => {
                    prelogin.thread_id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                }
                PreLoginOption::Mars if !data.is_empty() => prelogin.mars = data[0] != 0,
                PreLoginOption::TraceId if data.len() >= 36 => {
                    let mut connection_id = [0u8; 16];
                    let mut activity_id = [0u8; 16];
                    connection_id.copy_from_slice(&data[..16]);
                    activity_id.copy_from_slice(&data[16..32]);
                    let mut seq = &data[32..36];
                    prelogin.trace_id = Some(TraceId {
                        connection_id,
                        activity_id,
                        activity_sequence: seq.get_u32_le(),
                    });
                }
                PreLoginOption::FedAuthRequired if !data.is_empty() => {
                    prelogin.fed_auth_required = data[0] != 0;
                }
                _ => {}
            }
        }

        Ok(prelogin)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let encoded = PreLogin::new(EncryptionLevel::NotSupported).encode();
        // Five options, 5 bytes each, plus terminator.
        assert_eq!(encoded[0], PreLoginOption::Version as u8);
        assert_eq!(&encoded[1..3], &[0x00, 26]);
        assert_eq!(encoded[25], 0xFF);
        // Encryption byte follows the 6-byte version.
        assert_eq!(encoded[26 + 6], EncryptionLevel::NotSupported as u8);
    }

    #[test]
    fn test_roundtrip_with_trace_and_fedauth() {
        let original = PreLogin::new(EncryptionLevel::Required)
            .with_instance("SQLEXPRESS")
            .with_fed_auth(true)
            .with_trace_id(TraceId {
                connection_id: [1; 16],
                activity_id: [2; 16],
                activity_sequence: 7,
            });
        let decoded = PreLogin::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_out_of_order_options() {
        let mut buf = BytesMut::new();
        buf.put_u8(PreLoginOption::Encryption as u8);
        buf.put_u16(11);
        buf.put_u16(1);
        buf.put_u8(PreLoginOption::Version as u8);
        buf.put_u16(12);
        buf.put_u16(6);
        buf.put_u8(0xFF);
        buf.put_u8(0x01);
        buf.put_slice(&[0x10, 0x00, 0x03, 0xE8, 0x00, 0x00]);

        let decoded = PreLogin::decode(&buf).unwrap();
        assert_eq!(decoded.encryption, EncryptionLevel::On);
        assert_eq!(decoded.version.to_string(), "16.0.1000");
    }

    #[test]
    fn test_decode_rejects_out_of_bounds() {
        let mut buf = BytesMut::new();
        buf.put_u8(PreLoginOption::Encryption as u8);
        buf.put_u16(6);
        buf.put_u16(10);
        buf.put_u8(0xFF);
        assert!(matches!(
            PreLogin::decode(&buf),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unknown_encryption_level() {
        assert!(EncryptionLevel::from_u8(0x80).is_err());
    }
}
