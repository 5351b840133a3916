//! Bulk copy (BCP) support.
//!
//! A bulk load is prepared with an `INSERT BULK` statement, then streamed
//! as BULKLOAD (0x07) messages:
//!
//! ```text
//! [COLMETADATA]            metadata message
//! [ROW ROW ...]            one message per batch
//! [ROW ... DONE]           last batch carries the closing DONE
//! ```
//!
//! With no rows the metadata and the DONE travel together in a single
//! message. Rows use the same layout the server uses in result sets.
//!
//! ```rust,ignore
//! let columns = vec![
//!     BulkColumn::new("id", TypeInfo::int_n(4)),
//!     BulkColumn::new("name", TypeInfo::nvarchar(100)),
//! ];
//! let options = BulkOptions::new().rows_per_batch(1000).table_lock(true);
//!
//! let mut load = conn.bulk_insert("dbo.users", columns, options).await?;
//! for user in users {
//!     load.send_row(&[user.id.into(), user.name.into()]).await?;
//! }
//! let rows = load.finish().await?;
//! ```

use bytes::{Bytes, BytesMut};
use tds_protocol::token::{ColMetaData, Column, ColumnFlags, Done};
use tds_protocol::{PacketType, ProtocolError, encode_row};
use tds_types::{SqlValue, TypeInfo};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::state::ProtocolState;
use crate::stream::TokenStream;

/// Sort direction for an ORDER hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Ascending,
    /// Descending.
    Descending,
}

/// Options controlling bulk insert behavior.
///
/// These map to the hints of `INSERT BULK ... WITH (...)`; the batch limits
/// also decide when buffered rows are sent.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Check constraints during insert. Default: true.
    pub check_constraints: bool,
    /// Fire INSERT triggers on the table. Default: false.
    pub fire_triggers: bool,
    /// Keep NULL values instead of using column defaults. Default: true.
    pub keep_nulls: bool,
    /// Take a table lock for the duration of the load. Default: false.
    pub table_lock: bool,
    /// Rows per BULKLOAD message.
    pub rows_per_batch: Option<u32>,
    /// Kilobytes of row data per BULKLOAD message.
    pub kilobytes_per_batch: Option<u32>,
    /// Order the rows are already sorted in.
    pub order: Vec<(String, SortOrder)>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            check_constraints: true,
            fire_triggers: false,
            keep_nulls: true,
            table_lock: false,
            rows_per_batch: None,
            kilobytes_per_batch: None,
            order: Vec::new(),
        }
    }
}

impl BulkOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check constraints.
    #[must_use]
    pub fn check_constraints(mut self, enabled: bool) -> Self {
        self.check_constraints = enabled;
        self
    }

    /// Fire INSERT triggers.
    #[must_use]
    pub fn fire_triggers(mut self, enabled: bool) -> Self {
        self.fire_triggers = enabled;
        self
    }

    /// Keep NULLs.
    #[must_use]
    pub fn keep_nulls(mut self, enabled: bool) -> Self {
        self.keep_nulls = enabled;
        self
    }

    /// Take a table lock.
    #[must_use]
    pub fn table_lock(mut self, enabled: bool) -> Self {
        self.table_lock = enabled;
        self
    }

    /// Send a batch every `rows` rows.
    #[must_use]
    pub fn rows_per_batch(mut self, rows: u32) -> Self {
        self.rows_per_batch = Some(rows);
        self
    }

    /// Send a batch once `kilobytes` of row data are buffered.
    #[must_use]
    pub fn kilobytes_per_batch(mut self, kilobytes: u32) -> Self {
        self.kilobytes_per_batch = Some(kilobytes);
        self
    }

    /// Declare the input sorted by `column`.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order.push((column.into(), order));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.rows_per_batch == Some(0) {
            return Err(Error::Config("rows_per_batch must be at least 1".into()));
        }
        if self.kilobytes_per_batch == Some(0) {
            return Err(Error::Config("kilobytes_per_batch must be at least 1".into()));
        }
        Ok(())
    }
}

/// Destination column of a bulk load.
#[derive(Debug, Clone)]
pub struct BulkColumn {
    /// Column name.
    pub name: String,
    /// Wire type; `None` when it is not known.
    pub type_info: Option<TypeInfo>,
    /// Whether the column allows NULL.
    pub nullable: bool,
}

impl BulkColumn {
    /// Nullable column of a known type.
    pub fn new(name: impl Into<String>, type_info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            type_info: Some(type_info),
            nullable: true,
        }
    }

    /// Column whose type has not been determined.
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_info: None,
            nullable: true,
        }
    }

    /// Set nullability.
    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

impl From<&Column> for BulkColumn {
    fn from(column: &Column) -> Self {
        Self {
            name: column.name.clone(),
            type_info: Some(column.type_info.clone()),
            nullable: column.is_nullable(),
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Build the `INSERT BULK` statement that prepares the load.
pub fn insert_bulk_statement(
    table: &str,
    columns: &[BulkColumn],
    options: &BulkOptions,
) -> Result<String> {
    let mut definitions = Vec::with_capacity(columns.len());
    for column in columns {
        let type_info = column.type_info.as_ref().ok_or_else(|| untyped(column))?;
        definitions.push(format!(
            "{} {}",
            quote_identifier(&column.name),
            type_info.sql_declaration()
        ));
    }
    let mut sql = format!("INSERT BULK {table} ({})", definitions.join(", "));

    let mut hints: Vec<String> = Vec::new();
    if options.check_constraints {
        hints.push("CHECK_CONSTRAINTS".to_string());
    }
    if options.fire_triggers {
        hints.push("FIRE_TRIGGERS".to_string());
    }
    if options.keep_nulls {
        hints.push("KEEP_NULLS".to_string());
    }
    if options.table_lock {
        hints.push("TABLOCK".to_string());
    }
    if let Some(rows) = options.rows_per_batch {
        hints.push(format!("ROWS_PER_BATCH = {rows}"));
    }
    if let Some(kilobytes) = options.kilobytes_per_batch {
        hints.push(format!("KILOBYTES_PER_BATCH = {kilobytes}"));
    }
    if !options.order.is_empty() {
        let order: Vec<String> = options
            .order
            .iter()
            .map(|(name, order)| {
                let direction = match order {
                    SortOrder::Ascending => "ASC",
                    SortOrder::Descending => "DESC",
                };
                format!("{} {direction}", quote_identifier(name))
            })
            .collect();
        hints.push(format!("ORDER({})", order.join(", ")));
    }

    if !hints.is_empty() {
        sql.push_str(" WITH (");
        sql.push_str(&hints.join(", "));
        sql.push(')');
    }
    Ok(sql)
}

fn untyped(column: &BulkColumn) -> Error {
    Error::Config(format!(
        "cannot determine the type of bulk column '{}'",
        column.name
    ))
}

/// Encodes bulk rows; knows nothing about the connection.
#[derive(Debug, Clone)]
pub struct BulkEncoder {
    metadata: ColMetaData,
    options: BulkOptions,
}

impl BulkEncoder {
    /// Check columns and options, failing before any I/O.
    pub fn new(columns: &[BulkColumn], options: BulkOptions) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::Config("bulk load needs at least one column".into()));
        }
        options.validate()?;

        let mut described = Vec::with_capacity(columns.len());
        for column in columns {
            let type_info = column.type_info.clone().ok_or_else(|| untyped(column))?;
            let mut col = Column::new(column.name.clone(), type_info);
            col.flags.set(ColumnFlags::NULLABLE, column.nullable);
            described.push(col);
        }
        Ok(Self {
            metadata: ColMetaData::new(described),
            options,
        })
    }

    /// Options in effect.
    #[must_use]
    pub fn options(&self) -> &BulkOptions {
        &self.options
    }

    /// Append the COLMETADATA token.
    pub fn encode_metadata(&self, dst: &mut BytesMut) -> Result<()> {
        self.metadata.encode(dst).map_err(protocol_to_engine)
    }

    /// Append one ROW token.
    pub fn encode_row(&self, values: &[SqlValue], dst: &mut BytesMut) -> Result<()> {
        if values.len() != self.metadata.len() {
            return Err(Error::Config(format!(
                "row has {} values but the load has {} columns",
                values.len(),
                self.metadata.len()
            )));
        }
        for (value, column) in values.iter().zip(&self.metadata.columns) {
            if value.is_null() && !column.is_nullable() {
                return Err(Error::Config(format!(
                    "NULL for non-nullable column '{}'",
                    column.name
                )));
            }
        }

        // Encode into a scratch buffer so a failed value leaves `dst` intact.
        let mut row = BytesMut::new();
        encode_row(&self.metadata, values, &mut row).map_err(protocol_to_engine)?;
        dst.extend_from_slice(&row);
        Ok(())
    }

    /// Append the closing DONE token.
    pub fn encode_done(&self, dst: &mut BytesMut) {
        Done::default().encode(dst);
    }

    fn batch_full(&self, rows: u32, bytes: usize) -> bool {
        self.options.rows_per_batch.is_some_and(|limit| rows >= limit)
            || self
                .options
                .kilobytes_per_batch
                .is_some_and(|kb| bytes >= kb as usize * 1024)
    }
}

fn protocol_to_engine(err: ProtocolError) -> Error {
    match err {
        ProtocolError::Type(e) => Error::Type(e),
        other => Error::Protocol(other),
    }
}

/// A bulk load in progress.
///
/// Rows are buffered and sent when a batch limit is reached;
/// [`BulkLoad::finish`] sends the rest with the closing DONE and reads the
/// server's answer.
#[derive(Debug)]
pub struct BulkLoad<'a, S> {
    conn: &'a mut Connection<S>,
    encoder: BulkEncoder,
    buffer: BytesMut,
    buffered_rows: u32,
    metadata_sent: bool,
    rows_sent: u64,
}

impl<'a, S> BulkLoad<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(conn: &'a mut Connection<S>, encoder: BulkEncoder) -> Self {
        // The server now expects bulk data; a dropped load must be cancelled.
        conn.state = ProtocolState::AwaitingResponse;
        Self {
            conn,
            encoder,
            buffer: BytesMut::new(),
            buffered_rows: 0,
            metadata_sent: false,
            rows_sent: 0,
        }
    }

    /// Rows handed to [`BulkLoad::send_row`] so far.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.rows_sent + u64::from(self.buffered_rows)
    }

    /// Rows waiting for the next batch.
    #[must_use]
    pub fn rows_in_batch(&self) -> u32 {
        self.buffered_rows
    }

    /// Add a row, sending a batch if a limit is reached.
    pub async fn send_row(&mut self, values: &[SqlValue]) -> Result<()> {
        self.encoder.encode_row(values, &mut self.buffer)?;
        self.buffered_rows += 1;
        if self.encoder.batch_full(self.buffered_rows, self.buffer.len()) {
            self.flush().await?;
        }
        Ok(())
    }

    /// Send buffered rows as one BULKLOAD message.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffered_rows == 0 {
            return Ok(());
        }
        self.send_metadata().await?;
        let batch = self.buffer.split().freeze();
        self.send(&batch).await?;
        tracing::debug!(rows = self.buffered_rows, bytes = batch.len(), "bulk batch sent");
        self.rows_sent += u64::from(self.buffered_rows);
        self.buffered_rows = 0;
        Ok(())
    }

    /// Send remaining rows and the closing DONE, then read the server's
    /// answer. Returns the row count the server reports.
    pub async fn finish(mut self) -> Result<u64> {
        let mut last = BytesMut::new();
        if !self.metadata_sent && self.buffered_rows == 0 {
            self.encoder.encode_metadata(&mut last)?;
            self.metadata_sent = true;
        } else {
            self.send_metadata().await?;
            last.extend_from_slice(&self.buffer.split());
        }
        self.encoder.encode_done(&mut last);
        self.send(&last.freeze()).await?;
        self.rows_sent += u64::from(self.buffered_rows);
        self.buffered_rows = 0;

        self.conn.reader.reset();
        let completion = TokenStream::new(self.conn).finish().await?;
        tracing::debug!(
            sent = self.rows_sent,
            reported = completion.rows_affected,
            "bulk load finished"
        );
        Ok(completion.rows_affected)
    }

    async fn send_metadata(&mut self) -> Result<()> {
        if self.metadata_sent {
            return Ok(());
        }
        let mut metadata = BytesMut::new();
        self.encoder.encode_metadata(&mut metadata)?;
        self.send(&metadata.freeze()).await?;
        self.metadata_sent = true;
        Ok(())
    }

    async fn send(&mut self, message: &Bytes) -> Result<()> {
        if let Err(e) = self.conn.framer.send_message(PacketType::BulkLoad, message).await {
            return Err(self.conn.fail(e.into()));
        }
        Ok(())
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Start a bulk load into `table`.
    ///
    /// Columns and options are checked before anything is sent; a column
    /// without a type is a configuration error. The `INSERT BULK` statement
    /// is executed and must succeed before rows can be streamed.
    pub async fn bulk_insert(
        &mut self,
        table: &str,
        columns: Vec<BulkColumn>,
        options: BulkOptions,
    ) -> Result<BulkLoad<'_, S>> {
        self.ensure_ready()?;
        let statement = insert_bulk_statement(table, &columns, &options)?;
        let encoder = BulkEncoder::new(&columns, options)?;

        self.send_batch(&statement).await?.finish().await?;
        Ok(BulkLoad::new(self, encoder))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_protocol::token::{Token, TokenDecoder};

    fn columns() -> Vec<BulkColumn> {
        vec![
            BulkColumn::new("id", TypeInfo::int_n(4)).with_nullable(false),
            BulkColumn::new("name", TypeInfo::nvarchar(100)),
        ]
    }

    #[test]
    fn test_bulk_options_default() {
        let options = BulkOptions::default();
        assert!(options.check_constraints);
        assert!(!options.fire_triggers);
        assert!(options.keep_nulls);
        assert!(!options.table_lock);
        assert!(options.rows_per_batch.is_none());
    }

    #[test]
    fn test_insert_bulk_statement() {
        let options = BulkOptions::new()
            .check_constraints(false)
            .table_lock(true)
            .rows_per_batch(500)
            .kilobytes_per_batch(64)
            .order_by("id", SortOrder::Ascending)
            .order_by("na]me", SortOrder::Descending);
        let sql = insert_bulk_statement("dbo.users", &columns(), &options).unwrap();
        assert_eq!(
            sql,
            "INSERT BULK dbo.users ([id] int, [name] nvarchar(50)) WITH (KEEP_NULLS, TABLOCK, \
             ROWS_PER_BATCH = 500, KILOBYTES_PER_BATCH = 64, ORDER([id] ASC, [na]]me] DESC))"
        );
    }

    #[test]
    fn test_untyped_column_is_config_error() {
        let columns = vec![BulkColumn::untyped("mystery")];
        assert!(matches!(
            BulkEncoder::new(&columns, BulkOptions::new()),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            insert_bulk_statement("t", &columns, &BulkOptions::new()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_zero_batch_limits_rejected() {
        let options = BulkOptions::new().rows_per_batch(0);
        assert!(matches!(
            BulkEncoder::new(&columns(), options),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_encoded_rows_decode_as_result_set() {
        let encoder = BulkEncoder::new(&columns(), BulkOptions::new()).unwrap();
        let mut buf = BytesMut::new();
        encoder.encode_metadata(&mut buf).unwrap();
        encoder
            .encode_row(&[SqlValue::Int(7), SqlValue::from("seven")], &mut buf)
            .unwrap();
        encoder
            .encode_row(&[SqlValue::Int(8), SqlValue::Null], &mut buf)
            .unwrap();
        encoder.encode_done(&mut buf);

        let mut src = buf.freeze();
        let mut decoder = TokenDecoder::new();
        let mut rows = Vec::new();
        while let Some(token) = decoder.decode(&mut src).unwrap() {
            if let Token::Row(row) = token {
                rows.push(row.into_values().unwrap());
            }
        }
        assert_eq!(
            rows,
            vec![
                vec![SqlValue::Int(7), SqlValue::from("seven")],
                vec![SqlValue::Int(8), SqlValue::Null],
            ]
        );
    }

    #[test]
    fn test_row_shape_checked() {
        let encoder = BulkEncoder::new(&columns(), BulkOptions::new()).unwrap();
        let mut buf = BytesMut::new();
        assert!(matches!(
            encoder.encode_row(&[SqlValue::Int(1)], &mut buf),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            encoder.encode_row(&[SqlValue::Null, SqlValue::from("x")], &mut buf),
            Err(Error::Config(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_batch_limits() {
        let options = BulkOptions::new().rows_per_batch(2).kilobytes_per_batch(1);
        let encoder = BulkEncoder::new(&columns(), options).unwrap();
        assert!(!encoder.batch_full(1, 10));
        assert!(encoder.batch_full(2, 10));
        assert!(encoder.batch_full(1, 1024));
    }
}
