//! Login sequences against a scripted server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use bytes::BytesMut;
use common::{ScriptedServer, config, done, env_packet_size, error, info, login_ack, pair};
use tds_engine::{
    Connection, EncryptionLevel, EncryptionMode, Error, Handshake, HandshakeState, ProtocolState,
};
use tds_protocol::token::DoneStatus;
use tds_protocol::{PacketType, TdsVersion};

#[tokio::test]
async fn plain_login_reaches_ready() {
    common::init_tracing();
    let (client, mut server) = pair();
    let config = config().instance("SQLEXPRESS").database("orders");

    let server_side = async {
        let request = server.prelogin(EncryptionLevel::NotSupported).await;
        server.expect(PacketType::Tds7Login).await;
        let mut response = BytesMut::new();
        common::env_database(&mut response, "orders", "master");
        info(&mut response, 5701, "Changed database context to 'orders'.");
        login_ack(&mut response);
        done(&mut response, DoneStatus::empty(), 0);
        server.reply(&response).await;
        request
    };
    let (conn, request) = tokio::join!(Connection::connect(client, &config), server_side);
    let conn = conn.unwrap();

    assert_eq!(request.encryption, EncryptionLevel::NotSupported);
    assert_eq!(request.instance, "SQLEXPRESS");
    assert!(request.trace_id.is_some());

    assert_eq!(conn.state(), ProtocolState::Ready);
    let session = conn.session();
    assert_eq!(session.encryption(), EncryptionMode::None);
    assert_eq!(session.tds_version(), Some(TdsVersion::V7_4));
    assert_eq!(session.server_name(), "Microsoft SQL Server");
    assert_eq!(session.database(), Some("orders"));
    assert_eq!(session.packet_size(), 4096);
}

#[tokio::test]
async fn login_error_rejects_handshake() {
    let (client, mut server) = pair();
    let mut handshake = Handshake::new(client, config());

    let server_side = async {
        server.prelogin(EncryptionLevel::NotSupported).await;
        server.expect(PacketType::Tds7Login).await;
        let mut response = BytesMut::new();
        error(&mut response, 18456, 14, "Login failed for user 'app'.");
        done(&mut response, DoneStatus::ERROR, 0);
        server.reply(&response).await;
    };
    let (result, ()) = tokio::join!(handshake.run(), server_side);

    match result {
        Err(Error::HandshakeRejected { number, message }) => {
            assert_eq!(number, Some(18456));
            assert_eq!(message, "Login failed for user 'app'.");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(handshake.state(), HandshakeState::Failed);
    assert!(handshake.into_connection().is_err());
}

#[tokio::test]
async fn error_after_loginack_does_not_reject() {
    let (client, mut server) = pair();
    let config = config().database("archive");

    let server_side = async {
        server.prelogin(EncryptionLevel::NotSupported).await;
        server.expect(PacketType::Tds7Login).await;
        let mut response = BytesMut::new();
        login_ack(&mut response);
        error(&mut response, 4060, 11, "Cannot open database \"archive\".");
        done(&mut response, DoneStatus::empty(), 0);
        server.reply(&response).await;
    };
    let (conn, ()) = tokio::join!(Connection::connect(client, &config), server_side);
    let conn = conn.unwrap();
    assert_eq!(conn.state(), ProtocolState::Ready);
}

#[tokio::test]
async fn login_without_loginack_is_rejected() {
    let (client, mut server) = pair();
    let config = config();

    let server_side = async {
        server.prelogin(EncryptionLevel::NotSupported).await;
        server.expect(PacketType::Tds7Login).await;
        let mut response = BytesMut::new();
        done(&mut response, DoneStatus::empty(), 0);
        server.reply(&response).await;
    };
    let (result, ()) = tokio::join!(Connection::connect(client, &config), server_side);
    assert!(matches!(result, Err(Error::HandshakeRejected { number: None, .. })));
}

#[tokio::test]
async fn required_encryption_against_plain_server() {
    let (client, mut server) = pair();
    let config = config().encryption(EncryptionLevel::Required);

    let (result, _) = tokio::join!(
        Connection::connect(client, &config),
        server.prelogin(EncryptionLevel::NotSupported)
    );
    assert!(matches!(result, Err(Error::HandshakeRejected { .. })));
}

#[tokio::test]
async fn silent_server_times_out() {
    let (client, _server): (_, ScriptedServer) = pair();
    let config = config().login_timeout(Duration::from_millis(100));

    let result = Connection::connect(client, &config).await;
    assert!(matches!(result, Err(Error::LoginTimeout)));
}

#[tokio::test]
async fn packet_size_change_applies_after_login() {
    let (client, mut server) = pair();
    let config = config().packet_size(8192);

    let (conn, ()) = tokio::join!(
        Connection::connect(client, &config),
        server.accept(|response| env_packet_size(response, 8192, 4096))
    );
    let mut conn = conn.unwrap();
    server.framer.set_packet_size(8192);
    assert_eq!(conn.session().packet_size(), 8192);

    // A 7000-byte batch now fits one packet on each side.
    let sql = format!("SELECT '{}'", "x".repeat(3480));
    let server_side = async {
        let payload = server.expect(PacketType::SqlBatch).await;
        let mut response = BytesMut::new();
        done(&mut response, DoneStatus::COUNT, 1);
        server.reply(&response).await;
        payload.len()
    };
    let client_side = async {
        let stream = conn.send_batch(&sql).await.unwrap();
        stream.finish().await.unwrap()
    };
    let (completion, received) = tokio::join!(client_side, server_side);
    assert_eq!(completion.rows_affected, 1);
    assert!(received > 7000);
}
