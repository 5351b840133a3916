//! Response streaming: result sets, output parameters and command errors.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use bytes::BytesMut;
use common::{connected, done, error, info, return_int, return_status};
use tds_engine::{Error, ProtocolState, SqlValue, TypeInfo};
use tds_protocol::PacketType;
use tds_protocol::token::{ColMetaData, Column, DoneStatus, encode_row};

fn two_sets_with_output() -> BytesMut {
    let mut buf = BytesMut::new();

    let ids = ColMetaData::new(vec![Column::new("id", TypeInfo::int_n(4))]);
    ids.encode(&mut buf).unwrap();
    for id in [1, 2] {
        encode_row(&ids, &[SqlValue::Int(id)], &mut buf).unwrap();
    }
    done(&mut buf, DoneStatus::MORE | DoneStatus::COUNT, 2);

    let names = ColMetaData::new(vec![Column::new("name", TypeInfo::nvarchar(40))]);
    names.encode(&mut buf).unwrap();
    encode_row(&names, &[SqlValue::from("alpha")], &mut buf).unwrap();
    done(&mut buf, DoneStatus::MORE | DoneStatus::COUNT, 1);

    return_int(&mut buf, 1, "@total", 3);
    return_status(&mut buf, 0);
    done(&mut buf, DoneStatus::empty(), 0);
    buf
}

#[tokio::test]
async fn result_sets_then_output_params() {
    common::init_tracing();
    let (mut conn, mut server) = connected().await;

    let mut stream = conn.send_batch("EXEC dbo.report @total OUTPUT").await.unwrap();
    let batch = server.expect(PacketType::SqlBatch).await;
    assert!(!batch.is_empty());
    server.reply(&two_sets_with_output()).await;

    let first = stream.next_row().await.unwrap().unwrap();
    assert_eq!(first.into_values().unwrap(), vec![SqlValue::Int(1)]);
    let second = stream.next_row().await.unwrap().unwrap();
    assert_eq!(second.into_values().unwrap(), vec![SqlValue::Int(2)]);
    assert!(stream.next_row().await.unwrap().is_none());
    assert!(stream.next_row().await.unwrap().is_none());

    let metadata = stream.next_result().await.unwrap().unwrap();
    assert_eq!(metadata.columns[0].name, "name");
    let row = stream.next_row().await.unwrap().unwrap();
    assert_eq!(row.into_values().unwrap(), vec![SqlValue::from("alpha")]);

    let output = stream.output_params().await.unwrap().to_vec();
    assert_eq!(output.len(), 1);
    assert_eq!(output[0].name, "@total");
    assert_eq!(output[0].value, Ok(SqlValue::Int(3)));
    assert_eq!(stream.return_status().await.unwrap(), Some(0));
    assert!(stream.is_finished());

    let completion = stream.finish().await.unwrap();
    assert_eq!(completion.rows_affected, 3);
    assert_eq!(completion.output.len(), 1);
    assert_eq!(conn.state(), ProtocolState::Ready);
}

#[tokio::test]
async fn command_error_leaves_connection_usable() {
    let (mut conn, mut server) = connected().await;

    let mut stream = conn.send_batch("SELECT 1/0").await.unwrap();
    server.expect(PacketType::SqlBatch).await;
    let mut response = BytesMut::new();
    info(&mut response, 0, "about to divide");
    error(&mut response, 8134, 16, "Divide by zero error encountered.");
    done(&mut response, DoneStatus::ERROR, 0);
    server.reply(&response).await;

    match stream.next_row().await {
        Err(Error::Server(message)) => {
            assert_eq!(message.number, 8134);
            assert_eq!(message.class, 16);
        }
        other => panic!("expected server error, got {other:?}"),
    }
    assert!(stream.is_finished());
    drop(stream);
    assert_eq!(conn.state(), ProtocolState::Ready);

    let stream = conn.send_batch("SELECT 1").await.unwrap();
    server.expect(PacketType::SqlBatch).await;
    let mut response = BytesMut::new();
    done(&mut response, DoneStatus::COUNT, 1);
    server.reply(&response).await;
    assert_eq!(stream.finish().await.unwrap().rows_affected, 1);
}

#[tokio::test]
async fn unexpected_packet_type_poisons() {
    let (mut conn, mut server) = connected().await;

    let stream = conn.send_batch("SELECT 1").await.unwrap();
    server.expect(PacketType::SqlBatch).await;
    server
        .framer
        .send_message(PacketType::BulkLoad, &[0xFD])
        .await
        .unwrap();

    assert!(stream.finish().await.is_err());
    assert!(conn.is_poisoned());
    assert!(matches!(conn.send_batch("SELECT 2").await, Err(Error::Poisoned)));
}
