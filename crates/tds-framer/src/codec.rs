//! TDS packet codec.

use bytes::{BufMut, Bytes, BytesMut};
use tds_protocol::packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketType,
};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FramerError;

/// One physical packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header. `length` and `packet_id` are filled in on encode.
    pub header: PacketHeader,
    /// Payload after the header.
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet.
    #[must_use]
    pub fn new(header: PacketHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Size on the wire including the header.
    #[must_use]
    pub fn total_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Whether this packet ends its message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }
}

/// TDS packet codec for tokio-util framing.
///
/// Decoding validates the header before waiting for the body, so a corrupt
/// length is reported as soon as eight bytes are in.
#[derive(Debug)]
pub struct TdsCodec {
    packet_size: usize,
    packet_id: u8,
}

impl TdsCodec {
    /// Codec using the default packet size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            packet_id: 1,
        }
    }

    /// Negotiated packet size, header included.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Change the negotiated packet size.
    pub fn set_packet_size(&mut self, size: usize) {
        self.packet_size = size.min(MAX_PACKET_SIZE);
    }

    /// Sequence number the next encoded packet will carry.
    #[must_use]
    pub fn next_packet_id(&self) -> u8 {
        self.packet_id
    }

    /// Restart numbering; called at the start of each outgoing message.
    pub fn reset_packet_id(&mut self) {
        self.packet_id = 1;
    }

    fn take_packet_id(&mut self) -> u8 {
        let id = self.packet_id;
        self.packet_id = self.packet_id.wrapping_add(1);
        id
    }
}

impl Default for TdsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TdsCodec {
    type Item = Packet;
    type Error = FramerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let header = PacketHeader::decode(&mut &src[..PACKET_HEADER_SIZE])?;
        let length = usize::from(header.length);
        if length > self.packet_size {
            return Err(FramerError::PacketTooLarge {
                size: length,
                max: self.packet_size,
            });
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut packet = src.split_to(length);
        let payload = packet.split_off(PACKET_HEADER_SIZE).freeze();

        tracing::trace!(
            packet_type = ?header.packet_type,
            length,
            packet_id = header.packet_id,
            eom = header.is_end_of_message(),
            "decoded packet"
        );

        Ok(Some(Packet::new(header, payload)))
    }
}

impl Encoder<Packet> for TdsCodec {
    type Error = FramerError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total = item.total_size();
        if total > self.packet_size {
            return Err(FramerError::PacketTooLarge {
                size: total,
                max: self.packet_size,
            });
        }

        let mut header = item.header;
        header.length = total as u16;
        header.packet_id = self.take_packet_id();

        dst.reserve(total);
        header.encode(dst);
        dst.put_slice(&item.payload);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = total,
            packet_id = header.packet_id,
            eom = header.is_end_of_message(),
            "encoded packet"
        );

        Ok(())
    }
}

/// Header for an outgoing packet; length and id are set by the codec.
pub(crate) fn outgoing_header(
    packet_type: PacketType,
    status: tds_protocol::PacketStatus,
) -> PacketHeader {
    PacketHeader::new(packet_type, status, 0)
}
