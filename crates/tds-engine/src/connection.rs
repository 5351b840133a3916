//! Established sessions and the request/response discipline.

use tds_framer::PacketFramer;
use tds_protocol::token::Token;
use tds_protocol::{PacketType, RpcRequest, encode_sql_batch};
use tds_tls::MaybeTlsStream;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{Config, LogFlags};
use crate::error::{Error, Result};
use crate::handshake::Handshake;
use crate::reader::TokenReader;
use crate::session::Session;
use crate::state::ProtocolState;
use crate::stream::TokenStream;

/// An authenticated TDS session over a byte stream.
///
/// One request is outstanding at a time. A request may only be written once
/// the previous response has been drained or cancelled, and a response is
/// only read after its request has been written completely.
#[derive(Debug)]
pub struct Connection<S> {
    pub(crate) framer: PacketFramer<MaybeTlsStream<S>>,
    pub(crate) session: Session,
    pub(crate) state: ProtocolState,
    pub(crate) reader: TokenReader,
    pub(crate) log: LogFlags,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the handshake over `stream` and return the ready session.
    ///
    /// The whole exchange must finish within `config.login_timeout`.
    pub async fn connect(stream: S, config: &Config) -> Result<Self> {
        config.validate()?;
        let mut handshake = Handshake::new(stream, config.clone());
        tokio::time::timeout(config.login_timeout, handshake.run())
            .await
            .map_err(|_| Error::LoginTimeout)??;
        handshake.into_connection()
    }

    pub(crate) fn from_handshake(
        framer: PacketFramer<MaybeTlsStream<S>>,
        session: Session,
        log: LogFlags,
    ) -> Self {
        Self {
            framer,
            session,
            state: ProtocolState::Ready,
            reader: TokenReader::new(),
            log,
        }
    }

    /// Negotiated session parameters.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Current protocol state.
    #[must_use]
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Whether an earlier failure made the connection unusable.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.state == ProtocolState::Poisoned
    }

    /// The underlying transport.
    pub fn get_ref(&self) -> &S {
        self.framer.get_ref().get_ref()
    }

    /// Ask the server to reset session state before the next request.
    pub fn reset_on_next_request(&mut self) {
        self.framer.set_reset_connection();
    }

    /// Send a SQL batch.
    pub async fn send_batch(&mut self, sql: &str) -> Result<TokenStream<'_, S>> {
        self.ensure_ready()?;
        if self.log.contains(LogFlags::SQL) {
            tracing::debug!(sql = %sql, "sending SQL batch");
        }
        let payload = encode_sql_batch(sql, self.session.transaction);
        self.send_request(PacketType::SqlBatch, &payload).await?;
        Ok(TokenStream::new(self))
    }

    /// Call a stored procedure.
    ///
    /// Parameterized commands travel as `sp_executesql` calls (see
    /// [`RpcRequest::execute_sql`]). The server runs each call in its own
    /// scope: a temporary table created inside the call is dropped when the
    /// call returns and is not visible to later requests. Create such tables
    /// with [`Connection::send_batch`] instead.
    pub async fn execute_rpc(&mut self, request: &RpcRequest) -> Result<TokenStream<'_, S>> {
        self.ensure_ready()?;
        if self.log.contains(LogFlags::PARAMS) {
            for param in request.params() {
                tracing::debug!(
                    name = %param.name,
                    ty = ?param.type_info.type_id,
                    flags = ?param.flags,
                    "rpc parameter"
                );
            }
        }
        let payload = request.encode(self.session.transaction)?;
        self.send_request(PacketType::Rpc, &payload).await?;
        Ok(TokenStream::new(self))
    }

    /// Cancel the outstanding request.
    ///
    /// Sends ATTENTION and discards the response up to the DONE that
    /// acknowledges it. Does nothing when no response is outstanding.
    pub async fn cancel(&mut self) -> Result<()> {
        match self.state {
            ProtocolState::Ready => Ok(()),
            ProtocolState::Poisoned => Err(Error::Poisoned),
            ProtocolState::AwaitingResponse => {
                self.send_attention().await?;
                self.wait_attention_ack().await
            }
            ProtocolState::AttentionPending => self.wait_attention_ack().await,
        }
    }

    /// Send ATTENTION without waiting for the acknowledgement.
    ///
    /// Until [`Connection::wait_attention_ack`] returns, new requests fail
    /// with [`Error::AttentionPending`].
    pub async fn send_attention(&mut self) -> Result<()> {
        match self.state {
            ProtocolState::AwaitingResponse => {}
            ProtocolState::AttentionPending => return Ok(()),
            ProtocolState::Poisoned => return Err(Error::Poisoned),
            ProtocolState::Ready => return Ok(()),
        }
        if let Err(e) = self.framer.send_attention().await {
            return Err(self.fail(e.into()));
        }
        self.state = ProtocolState::AttentionPending;
        Ok(())
    }

    /// Discard server output up to and including the DONE carrying the
    /// ATTN bit.
    pub async fn wait_attention_ack(&mut self) -> Result<()> {
        if self.state != ProtocolState::AttentionPending {
            return Ok(());
        }

        let mut acknowledged = false;
        loop {
            let token = match self.reader.next(&mut self.framer).await {
                Ok(token) => token,
                Err(e) => return Err(self.fail(e)),
            };
            match token {
                Some(Token::EnvChange(change)) => {
                    if let Some(size) = self.session.apply_env_change(&change, self.log) {
                        self.session.packet_size = self.framer.set_packet_size(size);
                    }
                }
                Some(token) => {
                    if token.as_done().is_some_and(|done| done.is_attention()) {
                        acknowledged = true;
                    }
                }
                None if acknowledged => break,
                None => {}
            }
        }

        tracing::debug!("attention acknowledged");
        self.reader.reset();
        self.state = ProtocolState::Ready;
        Ok(())
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        match self.state {
            ProtocolState::Ready => Ok(()),
            ProtocolState::AwaitingResponse => Err(Error::ResponsePending),
            ProtocolState::AttentionPending => Err(Error::AttentionPending),
            ProtocolState::Poisoned => Err(Error::Poisoned),
        }
    }

    /// Write one request message and start expecting its response.
    pub(crate) async fn send_request(&mut self, packet_type: PacketType, payload: &[u8]) -> Result<()> {
        self.ensure_ready()?;
        self.reader.reset();
        if let Err(e) = self.framer.send_message(packet_type, payload).await {
            return Err(self.fail(e.into()));
        }
        self.state = ProtocolState::AwaitingResponse;
        Ok(())
    }

    /// Record a failure; fatal ones poison the connection.
    pub(crate) fn fail(&mut self, err: Error) -> Error {
        if err.is_fatal() {
            tracing::debug!(error = %err, "connection poisoned");
            self.state = ProtocolState::Poisoned;
            self.framer.poison();
        }
        err
    }
}
