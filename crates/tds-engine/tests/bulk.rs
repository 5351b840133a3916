//! Bulk loads against a scripted server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use bytes::{Bytes, BytesMut};
use common::{ScriptedServer, connected, done};
use tds_engine::{BulkColumn, BulkOptions, Error, ProtocolState, SqlValue, TypeInfo};
use tds_protocol::token::{DoneStatus, Token, TokenDecoder};
use tds_protocol::{ALL_HEADERS_LEN, PacketType};

fn columns() -> Vec<BulkColumn> {
    vec![
        BulkColumn::new("id", TypeInfo::int_n(4)).with_nullable(false),
        BulkColumn::new("name", TypeInfo::nvarchar(100)),
    ]
}

/// Accept the INSERT BULK statement, then collect `messages` BULKLOAD
/// messages and report `rows` rows.
async fn serve_load(mut server: ScriptedServer, messages: usize, rows: u64) -> (String, Vec<Bytes>) {
    let batch = server.expect(PacketType::SqlBatch).await;
    let units: Vec<u16> = batch[ALL_HEADERS_LEN..]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let statement = String::from_utf16(&units).unwrap();
    let mut response = BytesMut::new();
    done(&mut response, DoneStatus::empty(), 0);
    server.reply(&response).await;

    let mut received = Vec::with_capacity(messages);
    for _ in 0..messages {
        received.push(server.expect(PacketType::BulkLoad).await);
    }
    let mut response = BytesMut::new();
    done(&mut response, DoneStatus::COUNT, rows);
    server.reply(&response).await;
    (statement, received)
}

fn kinds(decoder: &mut TokenDecoder, message: &Bytes) -> Vec<&'static str> {
    let mut src = message.clone();
    let mut kinds = Vec::new();
    while let Some(token) = decoder.decode(&mut src).unwrap() {
        kinds.push(match token {
            Token::ColMetaData(_) => "meta",
            Token::Row(_) => "row",
            Token::Done(done) => {
                assert_eq!(done.status, DoneStatus::empty());
                "done"
            }
            other => panic!("unexpected {other:?}"),
        });
    }
    kinds
}

#[tokio::test]
async fn rows_are_sent_in_batches() {
    common::init_tracing();
    let (mut conn, server) = connected().await;
    let server = tokio::spawn(serve_load(server, 3, 3));

    let options = BulkOptions::new().rows_per_batch(2).table_lock(true);
    let mut load = conn.bulk_insert("dbo.items", columns(), options).await.unwrap();
    for id in 0..3 {
        load.send_row(&[SqlValue::Int(id), SqlValue::from(format!("item {id}"))])
            .await
            .unwrap();
    }
    assert_eq!(load.total_rows(), 3);
    assert_eq!(load.rows_in_batch(), 1);
    assert_eq!(load.finish().await.unwrap(), 3);
    assert_eq!(conn.state(), ProtocolState::Ready);

    let (statement, messages) = server.await.unwrap();
    assert_eq!(
        statement,
        "INSERT BULK dbo.items ([id] int, [name] nvarchar(50)) \
         WITH (CHECK_CONSTRAINTS, KEEP_NULLS, TABLOCK, ROWS_PER_BATCH = 2)"
    );

    let mut decoder = TokenDecoder::new();
    assert_eq!(kinds(&mut decoder, &messages[0]), ["meta"]);
    assert_eq!(kinds(&mut decoder, &messages[1]), ["row", "row"]);
    assert_eq!(kinds(&mut decoder, &messages[2]), ["row", "done"]);
}

#[tokio::test]
async fn kilobyte_limit_splits_batches() {
    let (mut conn, server) = connected().await;
    let server = tokio::spawn(serve_load(server, 4, 5));

    let columns = vec![
        BulkColumn::new("id", TypeInfo::int_n(4)),
        BulkColumn::new("note", TypeInfo::nvarchar(1000)),
    ];
    let options = BulkOptions::new().kilobytes_per_batch(1);
    let mut load = conn.bulk_insert("dbo.notes", columns, options).await.unwrap();
    // About 600 bytes per row, so every second row crosses 1 KiB.
    for id in 0..5 {
        load.send_row(&[SqlValue::Int(id), SqlValue::from("n".repeat(300))])
            .await
            .unwrap();
    }
    assert_eq!(load.rows_in_batch(), 1);
    assert_eq!(load.finish().await.unwrap(), 5);

    let (statement, messages) = server.await.unwrap();
    assert!(statement.ends_with("WITH (CHECK_CONSTRAINTS, KEEP_NULLS, KILOBYTES_PER_BATCH = 1)"));

    let mut decoder = TokenDecoder::new();
    assert_eq!(kinds(&mut decoder, &messages[0]), ["meta"]);
    assert_eq!(kinds(&mut decoder, &messages[1]), ["row", "row"]);
    assert_eq!(kinds(&mut decoder, &messages[2]), ["row", "row"]);
    assert_eq!(kinds(&mut decoder, &messages[3]), ["row", "done"]);
    assert!(messages[1].len() >= 1024 && messages[1].len() < 2048);
}

#[tokio::test]
async fn empty_load_sends_metadata_and_done_together() {
    let (mut conn, server) = connected().await;
    let server = tokio::spawn(serve_load(server, 1, 0));

    let load = conn
        .bulk_insert("dbo.items", columns(), BulkOptions::new())
        .await
        .unwrap();
    assert_eq!(load.finish().await.unwrap(), 0);

    let (_, messages) = server.await.unwrap();
    let mut decoder = TokenDecoder::new();
    assert_eq!(kinds(&mut decoder, &messages[0]), ["meta", "done"]);
}

#[tokio::test]
async fn untyped_column_fails_before_any_io() {
    let (mut conn, _server) = connected().await;
    let columns = vec![BulkColumn::new("id", TypeInfo::int_n(4)), BulkColumn::untyped("extra")];

    let result = conn.bulk_insert("dbo.items", columns, BulkOptions::new()).await;
    assert!(matches!(result, Err(Error::Config(_))));
    assert_eq!(conn.state(), ProtocolState::Ready);
}

#[tokio::test]
async fn mismatched_row_is_rejected_locally() {
    let (mut conn, server) = connected().await;
    let server = tokio::spawn(serve_load(server, 2, 1));

    let mut load = conn
        .bulk_insert("dbo.items", columns(), BulkOptions::new())
        .await
        .unwrap();
    assert!(matches!(
        load.send_row(&[SqlValue::Int(1)]).await,
        Err(Error::Config(_))
    ));
    load.send_row(&[SqlValue::Int(1), SqlValue::Null]).await.unwrap();
    assert_eq!(load.finish().await.unwrap(), 1);

    let (_, messages) = server.await.unwrap();
    let mut decoder = TokenDecoder::new();
    assert_eq!(kinds(&mut decoder, &messages[0]), ["meta"]);
    assert_eq!(kinds(&mut decoder, &messages[1]), ["row", "done"]);
}
