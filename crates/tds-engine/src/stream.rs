//! Response token streams.
//!
//! A [`TokenStream`] is handed out for every request. It is lazy and
//! forward-only: tokens are decoded as the caller pulls them, and
//! environment changes, return status and output parameters are recorded
//! on the way past.

use std::sync::Arc;

use tds_protocol::token::{ColMetaData, ReturnValue, Row, Token};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::LogFlags;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::state::ProtocolState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultSet {
    NotStarted,
    Open,
    Closed,
}

/// Summary of a fully drained response.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    /// Sum of the row counts reported by DONE tokens.
    pub rows_affected: u64,
    /// RETURNSTATUS of the procedure, if any.
    pub return_status: Option<i32>,
    /// Output parameters in the order the server sent them.
    pub output: Vec<ReturnValue>,
}

/// Tokens of one response.
///
/// Dropping the stream before it is drained leaves the connection in
/// [`ProtocolState::AwaitingResponse`]; the next request is rejected until
/// [`Connection::cancel`] has discarded the rest of the response.
#[derive(Debug)]
pub struct TokenStream<'a, S> {
    conn: &'a mut Connection<S>,
    finished: bool,
    result_set: ResultSet,
    metadata: Option<Arc<ColMetaData>>,
    completion: Completion,
    resize: Option<u32>,
}

impl<'a, S> TokenStream<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(conn: &'a mut Connection<S>) -> Self {
        Self {
            conn,
            finished: false,
            result_set: ResultSet::NotStarted,
            metadata: None,
            completion: Completion::default(),
            resize: None,
        }
    }

    /// Whether the whole response has been read.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Metadata of the current result set.
    #[must_use]
    pub fn metadata(&self) -> Option<&Arc<ColMetaData>> {
        self.metadata.as_ref()
    }

    /// Rows affected so far.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.completion.rows_affected
    }

    /// Next token of the response, `None` once it has been fully read.
    ///
    /// An ERROR token fails the command: the rest of the response is
    /// drained first, so the connection is immediately reusable, and the
    /// server's message is returned as [`Error::Server`]. INFO tokens are
    /// returned like any other token.
    pub async fn next(&mut self) -> Result<Option<Token>> {
        match self.advance().await? {
            Some(Token::Error(message)) => {
                while self.advance().await?.is_some() {}
                Err(Error::Server(message))
            }
            other => Ok(other),
        }
    }

    /// Next row of the current result set.
    ///
    /// Enters the first result set on its own. Returns `None` at the DONE
    /// that closes the set; [`TokenStream::next_result`] moves on.
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        if self.result_set == ResultSet::Closed {
            return Ok(None);
        }
        loop {
            let Some(token) = self.next().await? else {
                return Ok(None);
            };
            match token {
                Token::Row(row) => return Ok(Some(row)),
                Token::ColMetaData(_) => self.result_set = ResultSet::Open,
                Token::Done(_) | Token::DoneInProc(_) | Token::DoneProc(_)
                    if self.result_set == ResultSet::Open =>
                {
                    self.result_set = ResultSet::Closed;
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    /// Skip what is left of the current result set and move to the next.
    ///
    /// Returns the new set's metadata, or `None` when the response holds no
    /// further result sets.
    pub async fn next_result(&mut self) -> Result<Option<Arc<ColMetaData>>> {
        loop {
            let Some(token) = self.next().await? else {
                return Ok(None);
            };
            if let Token::ColMetaData(metadata) = token {
                self.result_set = ResultSet::Open;
                return Ok(Some(metadata));
            }
        }
    }

    /// Output parameters.
    ///
    /// They are sent after every row, so remaining rows are read and
    /// discarded first.
    pub async fn output_params(&mut self) -> Result<&[ReturnValue]> {
        self.drain().await?;
        Ok(&self.completion.output)
    }

    /// Procedure return status; drains remaining rows like
    /// [`TokenStream::output_params`].
    pub async fn return_status(&mut self) -> Result<Option<i32>> {
        self.drain().await?;
        Ok(self.completion.return_status)
    }

    /// Drain the response and summarize it.
    pub async fn finish(mut self) -> Result<Completion> {
        self.drain().await?;
        Ok(std::mem::take(&mut self.completion))
    }

    /// Abandon the response: send ATTENTION and discard everything up to
    /// the server's acknowledgement.
    pub async fn cancel(self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.conn.cancel().await
    }

    async fn drain(&mut self) -> Result<()> {
        while self.next().await?.is_some() {}
        Ok(())
    }

    /// Decode one token and apply its side effects.
    async fn advance(&mut self) -> Result<Option<Token>> {
        if self.finished {
            return Ok(None);
        }

        let conn = &mut *self.conn;
        let token = match conn.reader.next(&mut conn.framer).await {
            Ok(token) => token,
            Err(e) => return Err(conn.fail(e)),
        };
        conn.session.spid = conn.framer.spid();

        let Some(token) = token else {
            self.complete();
            return Ok(None);
        };

        let log = conn.log;
        match &token {
            Token::ColMetaData(metadata) => self.metadata = Some(Arc::clone(metadata)),
            Token::EnvChange(change) => {
                if let Some(size) = conn.session.apply_env_change(change, log) {
                    self.resize = Some(size);
                }
            }
            Token::ReturnStatus(status) => self.completion.return_status = Some(*status),
            Token::ReturnValue(value) => self.completion.output.push(value.clone()),
            Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done) => {
                if let Some(count) = done.row_count() {
                    self.completion.rows_affected += count;
                    if log.contains(LogFlags::ROWS) {
                        tracing::debug!(rows = count, "rows affected");
                    }
                }
            }
            Token::Info(message) if log.contains(LogFlags::MESSAGES) => {
                tracing::info!(
                    number = message.number,
                    class = message.class,
                    message = %message.message,
                    "server message"
                );
            }
            Token::Error(message) if log.contains(LogFlags::ERRORS) => {
                tracing::warn!(
                    number = message.number,
                    class = message.class,
                    state = message.state,
                    line = message.line,
                    message = %message.message,
                    "server error"
                );
            }
            _ => {}
        }
        Ok(Some(token))
    }

    fn complete(&mut self) {
        self.finished = true;
        let conn = &mut *self.conn;
        conn.state = ProtocolState::Ready;
        if let Some(size) = self.resize.take() {
            conn.session.packet_size = conn.framer.set_packet_size(size);
        }
    }
}
