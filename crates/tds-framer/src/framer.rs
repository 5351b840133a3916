//! Logical message framing over a byte stream.
//!
//! A logical message is one or more packets of the same type; the last one
//! carries END_OF_MESSAGE. [`PacketFramer`] hides packet boundaries in both
//! directions: reads hand out payload chunks and fetch the next packet when
//! the current one is used up, writes fragment a message into packets of at
//! most the negotiated size.
//!
//! The underlying stream can be replaced (TLS upgrade, or back to clear text
//! after a login-only TLS session) with [`PacketFramer::into_parts`] and
//! [`PacketFramer::from_parts`]; packet size, sequence numbers and any
//! partially read message survive the swap.

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tds_protocol::packet::{PACKET_HEADER_SIZE, PacketStatus, PacketType, clamp_packet_size};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, FramedParts};

use crate::codec::{Packet, TdsCodec, outgoing_header};
use crate::error::FramerError;

#[derive(Debug)]
struct ReadState {
    packet_type: PacketType,
    current: Bytes,
    end_of_message: bool,
}

impl ReadState {
    fn is_drained(&self) -> bool {
        self.end_of_message && self.current.is_empty()
    }
}

#[derive(Debug)]
struct WriteState {
    packet_type: PacketType,
    pending: BytesMut,
    first: bool,
}

/// Framer state detached from its stream.
#[derive(Debug)]
pub struct FramerState {
    codec: TdsCodec,
    read_buf: BytesMut,
    reading: Option<ReadState>,
    writing: Option<WriteState>,
    reset_connection: bool,
    spid: u16,
    poisoned: bool,
}

/// Packet framer over an async byte stream.
#[derive(Debug)]
pub struct PacketFramer<S> {
    framed: Framed<S, TdsCodec>,
    reading: Option<ReadState>,
    writing: Option<WriteState>,
    reset_connection: bool,
    spid: u16,
    poisoned: bool,
}

impl<S> PacketFramer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Framer using the default packet size.
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, TdsCodec::new()),
            reading: None,
            writing: None,
            reset_connection: false,
            spid: 0,
            poisoned: false,
        }
    }

    /// Negotiated packet size, header included.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.framed.codec().packet_size()
    }

    /// Change the packet size; the value is clamped to 512..=32767.
    ///
    /// Returns the size in effect.
    pub fn set_packet_size(&mut self, requested: u32) -> usize {
        let size = clamp_packet_size(requested);
        self.framed.codec_mut().set_packet_size(size);
        tracing::debug!(packet_size = size, "packet size changed");
        size
    }

    /// Server process id from the most recent packet.
    #[must_use]
    pub fn spid(&self) -> u16 {
        self.spid
    }

    /// Whether an earlier failure made the framer unusable.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Whether an inbound message has been started but not fully read.
    #[must_use]
    pub fn is_reading(&self) -> bool {
        self.reading.as_ref().is_some_and(|r| !r.is_drained())
    }

    /// Mark the framer unusable.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.framed.get_ref()
    }

    /// Mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        self.framed.get_mut()
    }

    /// Set RESETCONNECTION on the first packet of the next outgoing message.
    pub fn set_reset_connection(&mut self) {
        self.reset_connection = true;
    }

    /// Detach the stream, keeping everything else.
    pub fn into_parts(self) -> (S, FramerState) {
        let parts = self.framed.into_parts();
        let state = FramerState {
            codec: parts.codec,
            read_buf: parts.read_buf,
            reading: self.reading,
            writing: self.writing,
            reset_connection: self.reset_connection,
            spid: self.spid,
            poisoned: self.poisoned,
        };
        (parts.io, state)
    }

    /// Reattach a (possibly different) stream to detached state.
    pub fn from_parts(stream: S, state: FramerState) -> Self {
        let mut parts = FramedParts::new::<Packet>(stream, state.codec);
        parts.read_buf = state.read_buf;
        Self {
            framed: Framed::from_parts(parts),
            reading: state.reading,
            writing: state.writing,
            reset_connection: state.reset_connection,
            spid: state.spid,
            poisoned: state.poisoned,
        }
    }

    fn check(&self) -> Result<(), FramerError> {
        if self.poisoned {
            return Err(FramerError::Poisoned);
        }
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T, FramerError>) -> Result<T, FramerError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.poisoned = true;
            }
        }
        result
    }

    async fn next_packet(&mut self) -> Result<Packet, FramerError> {
        let result = match self.framed.next().await {
            Some(result) => result,
            None => Err(FramerError::ConnectionClosed),
        };
        let packet = self.track(result)?;
        self.spid = packet.header.spid;
        Ok(packet)
    }

    async fn send_packet(&mut self, packet: Packet) -> Result<(), FramerError> {
        let result = self.framed.send(packet).await;
        self.track(result)
    }

    /// Wait for the first packet of the next inbound message.
    ///
    /// The previous message must have been read to its end.
    pub async fn begin_read(&mut self) -> Result<PacketType, FramerError> {
        self.check()?;
        if self.is_reading() {
            return Err(FramerError::Usage("previous message not fully read"));
        }
        if self.writing.is_some() {
            return Err(FramerError::Usage("request not finished"));
        }

        let packet = self.next_packet().await?;
        let packet_type = packet.header.packet_type;
        self.reading = Some(ReadState {
            packet_type,
            end_of_message: packet.is_end_of_message(),
            current: packet.payload,
        });
        Ok(packet_type)
    }

    /// Next chunk of the current inbound message, or `None` once the packet
    /// carrying END_OF_MESSAGE has been consumed.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>, FramerError> {
        self.check()?;
        loop {
            let Some(state) = self.reading.as_mut() else {
                return Err(FramerError::Usage("no inbound message"));
            };
            if !state.current.is_empty() {
                return Ok(Some(std::mem::take(&mut state.current)));
            }
            if state.end_of_message {
                return Ok(None);
            }
            let expected = state.packet_type;

            let packet = self.next_packet().await?;
            if packet.header.packet_type != expected {
                self.poisoned = true;
                return Err(FramerError::TypeChanged {
                    expected,
                    actual: packet.header.packet_type,
                });
            }
            if let Some(state) = self.reading.as_mut() {
                state.end_of_message = packet.is_end_of_message();
                state.current = packet.payload;
            }
        }
    }

    /// Read a whole inbound message.
    pub async fn read_message(&mut self) -> Result<(PacketType, Bytes), FramerError> {
        let packet_type = self.begin_read().await?;
        let mut payload = BytesMut::new();
        while let Some(chunk) = self.read_chunk().await? {
            payload.extend_from_slice(&chunk);
        }
        Ok((packet_type, payload.freeze()))
    }

    /// Discard the rest of the current inbound message.
    pub async fn skip_message(&mut self) -> Result<(), FramerError> {
        while self.read_chunk().await?.is_some() {}
        Ok(())
    }

    /// Start an outgoing message.
    pub fn begin_write(&mut self, packet_type: PacketType) -> Result<(), FramerError> {
        self.check()?;
        if self.writing.is_some() {
            return Err(FramerError::Usage("previous request not finished"));
        }
        self.framed.codec_mut().reset_packet_id();
        self.writing = Some(WriteState {
            packet_type,
            pending: BytesMut::new(),
            first: true,
        });
        Ok(())
    }

    /// Append payload to the outgoing message.
    ///
    /// Full packets are sent as soon as they are complete; less than one
    /// packet of payload stays buffered.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), FramerError> {
        self.check()?;
        let max_payload = self.packet_size() - PACKET_HEADER_SIZE;
        let Some(state) = self.writing.as_mut() else {
            return Err(FramerError::Usage("no outgoing message"));
        };
        state.pending.extend_from_slice(data);

        // Keep at least one byte back so the final packet is never empty.
        while self
            .writing
            .as_ref()
            .is_some_and(|s| s.pending.len() > max_payload)
        {
            let packet = self.cut_packet(max_payload, false)?;
            self.send_packet(packet).await?;
        }
        Ok(())
    }

    /// Send the buffered tail with END_OF_MESSAGE and flush.
    pub async fn finish(&mut self) -> Result<(), FramerError> {
        self.check()?;
        let max_payload = self.packet_size() - PACKET_HEADER_SIZE;
        let packet = self.cut_packet(max_payload, true)?;
        self.send_packet(packet).await?;
        self.writing = None;
        Ok(())
    }

    fn cut_packet(&mut self, max_payload: usize, last: bool) -> Result<Packet, FramerError> {
        let reset = self.reset_connection;
        let Some(state) = self.writing.as_mut() else {
            return Err(FramerError::Usage("no outgoing message"));
        };
        let take = state.pending.len().min(max_payload);
        let payload = state.pending.split_to(take).freeze();

        let mut status = if last {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::empty()
        };
        if state.first && reset {
            status |= PacketStatus::RESET_CONNECTION;
        }
        let first = std::mem::replace(&mut state.first, false);
        let packet_type = state.packet_type;
        if first {
            self.reset_connection = false;
        }
        Ok(Packet::new(outgoing_header(packet_type, status), payload))
    }

    /// Send a whole message.
    pub async fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: &[u8],
    ) -> Result<(), FramerError> {
        self.begin_write(packet_type)?;
        self.write(payload).await?;
        self.finish().await
    }

    /// Send an ATTENTION packet.
    ///
    /// Allowed while a response is being read, not while a request is being
    /// written.
    pub async fn send_attention(&mut self) -> Result<(), FramerError> {
        self.check()?;
        if self.writing.is_some() {
            return Err(FramerError::Usage("request not finished"));
        }
        self.framed.codec_mut().reset_packet_id();
        let header = outgoing_header(PacketType::Attention, PacketStatus::END_OF_MESSAGE);
        tracing::debug!("sending attention");
        self.send_packet(Packet::new(header, Bytes::new())).await
    }
}
