//! Scripted server side of a TDS conversation over an in-memory duplex.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use bytes::{BufMut, Bytes, BytesMut};
use tds_engine::{Config, Connection, EncryptionLevel, Identity};
use tds_framer::PacketFramer;
use tds_protocol::token::{Done, DoneStatus, TokenType};
use tds_protocol::{PacketType, PreLogin, TdsVersion};
use tds_types::TypeInfo;
use tds_types::strings::{encode_utf16, write_b_varchar, write_us_varchar};
use tokio::io::{DuplexStream, duplex};

/// Route engine logs to the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Plain-text configuration with a SQL login.
pub fn config() -> Config {
    Config::new()
        .identity(Identity::sql_server("app", "secret"))
        .encryption(EncryptionLevel::NotSupported)
}

/// Server end of the conversation.
pub struct ScriptedServer {
    pub framer: PacketFramer<DuplexStream>,
}

impl ScriptedServer {
    /// Read one client message and check its type.
    pub async fn expect(&mut self, packet_type: PacketType) -> Bytes {
        let (actual, payload) = self.framer.read_message().await.expect("client message");
        assert_eq!(actual, packet_type);
        payload
    }

    /// Send a tabular result message.
    pub async fn reply(&mut self, payload: &[u8]) {
        self.framer
            .send_message(PacketType::TabularResult, payload)
            .await
            .expect("server reply");
    }

    /// Answer PRELOGIN with the given encryption level.
    pub async fn prelogin(&mut self, encryption: EncryptionLevel) -> PreLogin {
        let request = self.expect(PacketType::PreLogin).await;
        let request = PreLogin::decode(&request).unwrap();
        self.reply(&PreLogin::new(encryption).encode()).await;
        request
    }

    /// Run a successful unencrypted login; `extra` adds tokens before the
    /// closing DONE.
    pub async fn accept(&mut self, extra: impl FnOnce(&mut BytesMut)) {
        self.prelogin(EncryptionLevel::NotSupported).await;
        self.expect(PacketType::Tds7Login).await;

        let mut response = BytesMut::new();
        env_database(&mut response, "master", "");
        login_ack(&mut response);
        extra(&mut response);
        done(&mut response, DoneStatus::empty(), 0);
        self.reply(&response).await;
    }
}

/// Client stream plus scripted server.
pub fn pair() -> (DuplexStream, ScriptedServer) {
    let (client, server) = duplex(1 << 16);
    (
        client,
        ScriptedServer {
            framer: PacketFramer::new(server),
        },
    )
}

/// A logged-in connection and its server.
pub async fn connected() -> (Connection<DuplexStream>, ScriptedServer) {
    let (client, mut server) = pair();
    let config = config();
    let (conn, ()) = tokio::join!(Connection::connect(client, &config), server.accept(|_| {}));
    (conn.expect("login"), server)
}

pub fn login_ack(buf: &mut BytesMut) {
    let mut body = BytesMut::new();
    body.put_u8(1);
    body.put_u32(TdsVersion::V7_4.raw());
    write_b_varchar(&mut body, "Microsoft SQL Server").unwrap();
    body.put_slice(&[16, 0, 0x10, 0x7C]);
    token(buf, TokenType::LoginAck, &body);
}

pub fn error(buf: &mut BytesMut, number: i32, class: u8, message: &str) {
    token(buf, TokenType::Error, &message_body(number, class, message));
}

pub fn info(buf: &mut BytesMut, number: i32, message: &str) {
    token(buf, TokenType::Info, &message_body(number, 0, message));
}

fn message_body(number: i32, class: u8, message: &str) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_i32_le(number);
    body.put_u8(1);
    body.put_u8(class);
    write_us_varchar(&mut body, message).unwrap();
    write_b_varchar(&mut body, "scripted").unwrap();
    write_b_varchar(&mut body, "").unwrap();
    body.put_u32_le(1);
    body
}

pub fn env_database(buf: &mut BytesMut, new: &str, old: &str) {
    let mut body = BytesMut::new();
    body.put_u8(1);
    write_b_varchar(&mut body, new).unwrap();
    write_b_varchar(&mut body, old).unwrap();
    token(buf, TokenType::EnvChange, &body);
}

pub fn env_packet_size(buf: &mut BytesMut, new: u32, old: u32) {
    let mut body = BytesMut::new();
    body.put_u8(4);
    write_b_varchar(&mut body, &new.to_string()).unwrap();
    write_b_varchar(&mut body, &old.to_string()).unwrap();
    token(buf, TokenType::EnvChange, &body);
}

pub fn done(buf: &mut BytesMut, status: DoneStatus, row_count: u64) {
    Done {
        status,
        cur_cmd: 0xC1,
        row_count,
    }
    .encode(buf);
}

pub fn return_status(buf: &mut BytesMut, status: i32) {
    buf.put_u8(TokenType::ReturnStatus as u8);
    buf.put_i32_le(status);
}

/// RETURNVALUE carrying an INT output parameter.
pub fn return_int(buf: &mut BytesMut, ordinal: u16, name: &str, value: i32) {
    buf.put_u8(TokenType::ReturnValue as u8);
    buf.put_u16_le(ordinal);
    buf.put_u8(name.encode_utf16().count() as u8);
    encode_utf16(name, buf);
    buf.put_u8(1);
    buf.put_u32_le(0);
    buf.put_u16_le(0x0001);
    TypeInfo::int_n(4).encode(buf);
    buf.put_u8(4);
    buf.put_i32_le(value);
}

fn token(buf: &mut BytesMut, token_type: TokenType, body: &[u8]) {
    buf.put_u8(token_type as u8);
    buf.put_u16_le(body.len() as u16);
    buf.put_slice(body);
}
