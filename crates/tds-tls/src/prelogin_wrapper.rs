//! PRELOGIN framing for the TLS handshake.
//!
//! Until the handshake finishes, every TLS record exchanged with the server
//! travels as the payload of PRELOGIN (0x12) packets. This wrapper adds that
//! framing on the way out and strips it on the way in, then becomes a
//! transparent pass-through.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const HEADER_SIZE: usize = 8;
const PACKET_TYPE_PRELOGIN: u8 = 0x12;
const STATUS_EOM: u8 = 0x01;
const DEFAULT_PACKET_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy)]
enum ReadState {
    Header { filled: usize },
    Payload { remaining: usize },
}

/// Stream adapter that frames TLS handshake traffic in PRELOGIN packets.
#[derive(Debug)]
pub struct TlsPreloginWrapper<S> {
    stream: S,
    pending_handshake: bool,
    packet_size: usize,

    read_state: ReadState,
    header: [u8; HEADER_SIZE],
    scratch: Vec<u8>,

    // TLS bytes accepted by poll_write and not yet framed.
    write_buf: Vec<u8>,
    // Framed packets waiting to go out, with the send cursor.
    outgoing: Vec<u8>,
    outgoing_pos: usize,
}

impl<S> TlsPreloginWrapper<S> {
    /// Wrap a stream that has completed the cleartext PRELOGIN exchange.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending_handshake: true,
            packet_size: DEFAULT_PACKET_SIZE,
            read_state: ReadState::Header { filled: 0 },
            header: [0; HEADER_SIZE],
            scratch: Vec::new(),
            write_buf: Vec::new(),
            outgoing: Vec::new(),
            outgoing_pos: 0,
        }
    }

    /// Limit outgoing PRELOGIN packets to `size` bytes including the header.
    #[must_use]
    pub fn with_packet_size(mut self, size: usize) -> Self {
        self.packet_size = size.max(HEADER_SIZE + 1);
        self
    }

    /// Stop framing; later traffic is passed through untouched.
    pub fn handshake_complete(&mut self) {
        self.pending_handshake = false;
    }

    /// Whether handshake framing is still active.
    #[must_use]
    pub fn is_handshaking(&self) -> bool {
        self.pending_handshake
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Get a mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consume the wrapper and return the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn frame_pending_writes(&mut self) {
        let max_payload = self.packet_size - HEADER_SIZE;
        let chunks = self.write_buf.chunks(max_payload);
        let count = chunks.len();

        self.outgoing.clear();
        self.outgoing_pos = 0;
        for (index, chunk) in chunks.enumerate() {
            let length = (HEADER_SIZE + chunk.len()) as u16;
            let status = if index + 1 == count { STATUS_EOM } else { 0 };
            let packet_id = (index as u8).wrapping_add(1);
            self.outgoing.extend_from_slice(&[PACKET_TYPE_PRELOGIN, status]);
            self.outgoing.extend_from_slice(&length.to_be_bytes());
            self.outgoing.extend_from_slice(&[0, 0, packet_id, 0]);
            self.outgoing.extend_from_slice(chunk);
        }
        tracing::trace!(
            bytes = self.write_buf.len(),
            packets = count,
            "framed TLS handshake data"
        );
        self.write_buf.clear();
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TlsPreloginWrapper<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        loop {
            match this.read_state {
                ReadState::Header { filled } => {
                    let mut header_buf = ReadBuf::new(&mut this.header[filled..]);
                    ready!(Pin::new(&mut this.stream).poll_read(cx, &mut header_buf))?;
                    let n = header_buf.filled().len();
                    if n == 0 {
                        if filled == 0 {
                            return Poll::Ready(Ok(()));
                        }
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed inside a PRELOGIN header",
                        )));
                    }

                    let filled = filled + n;
                    if filled < HEADER_SIZE {
                        this.read_state = ReadState::Header { filled };
                        continue;
                    }

                    if this.header[0] != PACKET_TYPE_PRELOGIN {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!(
                                "expected PRELOGIN packet during TLS handshake, got 0x{:02X}",
                                this.header[0]
                            ),
                        )));
                    }
                    let length = usize::from(u16::from_be_bytes([this.header[2], this.header[3]]));
                    if length < HEADER_SIZE {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("PRELOGIN packet length {length} is shorter than its header"),
                        )));
                    }

                    this.read_state = match length - HEADER_SIZE {
                        0 => ReadState::Header { filled: 0 },
                        remaining => ReadState::Payload { remaining },
                    };
                }
                ReadState::Payload { remaining } => {
                    let max = remaining.min(buf.remaining());
                    if max == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    if this.scratch.len() < max {
                        this.scratch.resize(max, 0);
                    }

                    let mut scratch = ReadBuf::new(&mut this.scratch[..max]);
                    ready!(Pin::new(&mut this.stream).poll_read(cx, &mut scratch))?;
                    let n = scratch.filled().len();
                    if n == 0 {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed inside a PRELOGIN packet",
                        )));
                    }
                    buf.put_slice(scratch.filled());

                    this.read_state = match remaining - n {
                        0 => ReadState::Header { filled: 0 },
                        remaining => ReadState::Payload { remaining },
                    };
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TlsPreloginWrapper<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if !this.pending_handshake {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }

        // Framing happens on flush so one TLS flight becomes one message.
        this.write_buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.outgoing_pos == this.outgoing.len() && !this.write_buf.is_empty() {
            this.frame_pending_writes();
        }

        while this.outgoing_pos < this.outgoing.len() {
            let n = ready!(
                Pin::new(&mut this.stream).poll_write(cx, &this.outgoing[this.outgoing_pos..])
            )?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.outgoing_pos += n;
        }
        this.outgoing.clear();
        this.outgoing_pos = 0;

        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    fn packet(status: u8, id: u8, payload: &[u8]) -> Vec<u8> {
        let length = (HEADER_SIZE + payload.len()) as u16;
        let mut out = vec![PACKET_TYPE_PRELOGIN, status];
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&[0, 0, id, 0]);
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_write_is_framed_on_flush() {
        let (client, mut server) = duplex(4096);
        let mut wrapper = TlsPreloginWrapper::new(client);

        wrapper.write_all(b"hello").await.unwrap();
        wrapper.flush().await.unwrap();

        let mut received = vec![0u8; 13];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, packet(STATUS_EOM, 1, b"hello"));
    }

    #[tokio::test]
    async fn test_write_fragments_to_packet_size() {
        let (client, mut server) = duplex(8192);
        let mut wrapper = TlsPreloginWrapper::new(client).with_packet_size(512);

        let data: Vec<u8> = (0..1200u32).map(|i| i as u8).collect();
        wrapper.write_all(&data).await.unwrap();
        wrapper.flush().await.unwrap();

        let mut expected = packet(0, 1, &data[..504]);
        expected.extend(packet(0, 2, &data[504..1008]));
        expected.extend(packet(STATUS_EOM, 3, &data[1008..]));

        let mut received = vec![0u8; expected.len()];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_read_strips_headers_and_skips_empty_packets() {
        let (client, mut server) = duplex(4096);
        let mut wrapper = TlsPreloginWrapper::new(client);

        let mut wire = packet(0, 1, b"abc");
        wire.extend(packet(0, 2, b""));
        wire.extend(packet(STATUS_EOM, 3, b"defg"));
        server.write_all(&wire).await.unwrap();

        let mut received = vec![0u8; 7];
        wrapper.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"abcdefg");
    }

    #[tokio::test]
    async fn test_read_rejects_other_packet_types() {
        let (client, mut server) = duplex(4096);
        let mut wrapper = TlsPreloginWrapper::new(client);

        let mut wire = packet(STATUS_EOM, 1, b"x");
        wire[0] = 0x04;
        server.write_all(&wire).await.unwrap();

        let mut byte = [0u8; 1];
        let err = wrapper.read_exact(&mut byte).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_pass_through_after_handshake() {
        let (client, mut server) = duplex(4096);
        let mut wrapper = TlsPreloginWrapper::new(client);
        wrapper.handshake_complete();
        assert!(!wrapper.is_handshaking());

        wrapper.write_all(b"raw").await.unwrap();
        wrapper.flush().await.unwrap();

        let mut received = [0u8; 3];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"raw");
    }
}
