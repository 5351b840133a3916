//! TDS packet header definitions.

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::{ProtocolError, ensure};

/// TDS packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Packet size used until LOGIN7 negotiation completes.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Smallest packet size a session may negotiate.
pub const MIN_PACKET_SIZE: usize = 512;

/// Largest packet size a session may negotiate.
pub const MAX_PACKET_SIZE: usize = 32767;

/// Clamp a requested packet size into the negotiable range.
///
/// Zero and anything below 512 become 512; anything above 32767 becomes 32767.
#[must_use]
pub fn clamp_packet_size(requested: u32) -> usize {
    (requested as usize).clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE)
}

/// TDS packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// SQL batch request.
    SqlBatch = 0x01,
    /// Remote procedure call.
    Rpc = 0x03,
    /// Tabular response (server reply).
    TabularResult = 0x04,
    /// Attention signal.
    Attention = 0x06,
    /// Bulk load data.
    BulkLoad = 0x07,
    /// Federated authentication token.
    FedAuthToken = 0x08,
    /// TDS7+ login packet.
    Tds7Login = 0x10,
    /// SSPI authentication.
    Sspi = 0x11,
    /// Pre-login packet.
    PreLogin = 0x12,
}

impl PacketType {
    /// Create a packet type from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::SqlBatch),
            0x03 => Ok(Self::Rpc),
            0x04 => Ok(Self::TabularResult),
            0x06 => Ok(Self::Attention),
            0x07 => Ok(Self::BulkLoad),
            0x08 => Ok(Self::FedAuthToken),
            0x10 => Ok(Self::Tds7Login),
            0x11 => Ok(Self::Sspi),
            0x12 => Ok(Self::PreLogin),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

bitflags! {
    /// TDS packet status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PacketStatus: u8 {
        /// End of message (last packet).
        const END_OF_MESSAGE = 0x01;
        /// Ignore this event (used for attention acknowledgment).
        const IGNORE_EVENT = 0x02;
        /// Reset connection before processing the request.
        const RESET_CONNECTION = 0x08;
    }
}

/// TDS packet header.
///
/// Every TDS packet begins with an 8-byte header. Length and SPID are
/// big-endian, unlike almost everything else in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Type of packet.
    pub packet_type: PacketType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total packet length including header.
    pub length: u16,
    /// Server process ID (SPID).
    pub spid: u16,
    /// Packet sequence number (wraps at 255).
    pub packet_id: u8,
    /// Window (unused, always 0).
    pub window: u8,
}

impl PacketHeader {
    /// Create a new packet header.
    #[must_use]
    pub const fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 0,
            window: 0,
        }
    }

    /// Parse a packet header.
    ///
    /// Unknown status bits are preserved; an unknown packet type or a length
    /// shorter than the header itself is an error.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure(src, PACKET_HEADER_SIZE)?;

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let status = PacketStatus::from_bits_retain(src.get_u8());
        let length = src.get_u16();
        let spid = src.get_u16();
        let packet_id = src.get_u8();
        let window = src.get_u8();

        if (length as usize) < PACKET_HEADER_SIZE {
            return Err(ProtocolError::InvalidPacketLength {
                length,
                max: MAX_PACKET_SIZE,
            });
        }

        Ok(Self {
            packet_type,
            status,
            length,
            spid,
            packet_id,
            window,
        })
    }

    /// Encode the packet header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Payload length (total length minus header).
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length.saturating_sub(PACKET_HEADER_SIZE as u16) as usize
    }

    /// Check if this is the last packet in a message.
    #[must_use]
    pub const fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }

    /// Set the packet ID (sequence number).
    #[must_use]
    pub const fn with_packet_id(mut self, id: u8) -> Self {
        self.packet_id = id;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader {
            packet_type: PacketType::SqlBatch,
            status: PacketStatus::END_OF_MESSAGE,
            length: 100,
            spid: 54,
            packet_id: 1,
            window: 0,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(&buf[..], &[0x01, 0x01, 0x00, 0x64, 0x00, 0x36, 0x01, 0x00]);

        let decoded = PacketHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_payload_length() {
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 100);
        assert_eq!(header.payload_length(), 92);
    }

    #[test]
    fn test_rejects_unknown_type_and_short_length() {
        let mut unknown: &[u8] = &[0x02, 0x01, 0x00, 0x08, 0, 0, 1, 0];
        assert_eq!(
            PacketHeader::decode(&mut unknown),
            Err(ProtocolError::InvalidPacketType(0x02))
        );

        let mut short: &[u8] = &[0x04, 0x01, 0x00, 0x07, 0, 0, 1, 0];
        assert!(matches!(
            PacketHeader::decode(&mut short),
            Err(ProtocolError::InvalidPacketLength { length: 7, .. })
        ));
    }

    #[test]
    fn test_clamp_packet_size() {
        assert_eq!(clamp_packet_size(0), 512);
        assert_eq!(clamp_packet_size(1), 512);
        assert_eq!(clamp_packet_size(4096), 4096);
        assert_eq!(clamp_packet_size(65535), 32767);
    }
}
