//! Transport that may or may not be encrypted.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::client::TlsStream;

use crate::prelogin_wrapper::TlsPreloginWrapper;

/// Session transport: cleartext, or TLS established after PRELOGIN.
///
/// A login-only session starts plain, becomes [`MaybeTlsStream::Tls`] for
/// LOGIN7, and drops back to plain through [`MaybeTlsStream::downgrade`].
#[derive(Debug)]
pub enum MaybeTlsStream<S> {
    /// Unencrypted transport.
    Plain(S),
    /// TLS over the transport.
    Tls(Box<TlsStream<TlsPreloginWrapper<S>>>),
}

impl<S> MaybeTlsStream<S> {
    /// Whether traffic is currently encrypted.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Discard the TLS layer and return to the raw transport.
    ///
    /// Any buffered plaintext inside the TLS session is lost; callers flush
    /// before switching.
    #[must_use]
    pub fn downgrade(self) -> Self {
        match self {
            Self::Plain(stream) => Self::Plain(stream),
            Self::Tls(tls) => {
                let (wrapper, _session) = tls.into_inner();
                Self::Plain(wrapper.into_inner())
            }
        }
    }

    /// Get a reference to the raw transport.
    pub fn get_ref(&self) -> &S {
        match self {
            Self::Plain(stream) => stream,
            Self::Tls(tls) => tls.get_ref().0.get_ref(),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for MaybeTlsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for MaybeTlsStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[tokio::test]
    async fn test_plain_passes_through() {
        let (client, mut server) = duplex(64);
        let mut stream = MaybeTlsStream::Plain(client);
        assert!(!stream.is_tls());

        stream.write_all(b"ping").await.unwrap();
        let mut received = [0u8; 4];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"ping");

        let stream = stream.downgrade();
        assert!(!stream.is_tls());
    }
}
