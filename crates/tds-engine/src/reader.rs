//! Token decoding on top of the packet framer.

use bytes::{Bytes, BytesMut};
use tds_framer::PacketFramer;
use tds_protocol::token::{Token, TokenDecoder};
use tds_protocol::{PacketType, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Pulls tokens out of tabular-result messages.
///
/// Payload is fetched from the framer only when the decoder reports that
/// the buffered bytes end inside a token, so tokens may span any number of
/// packets. Each refill at least doubles the buffer, which keeps re-decoding
/// of a large token linear overall.
#[derive(Debug, Default)]
pub(crate) struct TokenReader {
    decoder: TokenDecoder,
    pending: Bytes,
    staged: BytesMut,
    in_message: bool,
    end_of_message: bool,
}

impl TokenReader {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Forget metadata and buffered bytes before a new response.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Next token of the current message, starting one if needed.
    ///
    /// `None` means the message has been consumed to its last byte.
    pub(crate) async fn next<S>(&mut self, framer: &mut PacketFramer<S>) -> Result<Option<Token>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.in_message {
            let packet_type = framer.begin_read().await?;
            if packet_type != PacketType::TabularResult {
                framer.poison();
                return Err(ProtocolError::malformed(
                    "response",
                    format!("expected a tabular result message, got {packet_type:?}"),
                )
                .into());
            }
            self.in_message = true;
            self.end_of_message = false;
        }

        self.unstage();
        loop {
            match self.decoder.decode(&mut self.pending) {
                Ok(Some(token)) => return Ok(Some(token)),
                Ok(None) if self.end_of_message => {
                    self.in_message = false;
                    return Ok(None);
                }
                Ok(None) => self.fill(framer, 1).await?,
                Err(e) if e.is_incomplete() => {
                    if self.end_of_message {
                        return Err(ProtocolError::malformed(
                            "token stream",
                            format!("message ended inside a token ({e})"),
                        )
                        .into());
                    }
                    let target = self.pending.len().saturating_mul(2).max(1);
                    self.fill(framer, target).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Buffer at least `target` bytes of the message, or all that is left.
    ///
    /// Chunks land in `staged` as they arrive, so dropping the future between
    /// packets keeps everything read so far.
    async fn fill<S>(&mut self, framer: &mut PacketFramer<S>, target: usize) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.pending.is_empty() && self.staged.is_empty() {
            match framer.read_chunk().await? {
                Some(chunk) if chunk.len() >= target => {
                    self.pending = chunk;
                    return Ok(());
                }
                Some(chunk) => self.staged.extend_from_slice(&chunk),
                None => {
                    self.end_of_message = true;
                    return Ok(());
                }
            }
        }

        self.staged.reserve(target.saturating_sub(self.staged.len()));
        if !self.pending.is_empty() {
            self.staged.extend_from_slice(&self.pending);
            self.pending = Bytes::new();
        }
        while self.staged.len() < target {
            match framer.read_chunk().await? {
                Some(chunk) => self.staged.extend_from_slice(&chunk),
                None => {
                    self.end_of_message = true;
                    break;
                }
            }
        }
        self.unstage();
        Ok(())
    }

    /// Hand bytes left behind by an interrupted refill back to the decoder.
    fn unstage(&mut self) {
        if !self.staged.is_empty() {
            self.pending = self.staged.split().freeze();
        }
    }
}
