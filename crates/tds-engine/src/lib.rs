//! # tds-engine
//!
//! Client side of a TDS session: handshake, request/response discipline,
//! cancellation and bulk copy, over any async byte stream.
//!
//! The engine never opens sockets itself. Callers hand it a connected
//! stream (TCP, a named-pipe adapter, an in-memory duplex in tests) and get
//! back a [`Connection`] once PRELOGIN, the optional TLS upgrade and LOGIN7
//! have completed.
//!
//! ## Lifecycle
//!
//! ```text
//! Start -> PreloginSent -> PreloginAckReceived -> [TlsUpgrade] -> Login7Sent
//!       -> LoginAckReceived -> Ready
//! ```
//!
//! Any failure lands in `Failed` and the stream is discarded.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tds_engine::{Config, Connection, Identity};
//! use tokio::net::TcpStream;
//!
//! let config = Config::new()
//!     .host("db.example.com")
//!     .identity(Identity::sql_server("app", "secret"))
//!     .database("orders");
//!
//! let tcp = TcpStream::connect(("db.example.com", 1433)).await?;
//! let mut conn = Connection::connect(tcp, &config).await?;
//!
//! let mut stream = conn.send_batch("SELECT id, name FROM customers").await?;
//! while let Some(row) = stream.next_row().await? {
//!     println!("{:?}", row.into_values()?);
//! }
//! stream.finish().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bulk;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
mod reader;
pub mod session;
pub mod state;
pub mod stream;

pub use bulk::{BulkColumn, BulkEncoder, BulkLoad, BulkOptions, SortOrder, insert_bulk_statement};
pub use config::{Config, Identity, LogFlags, SspiProvider};
pub use connection::Connection;
pub use error::{Error, Result};
pub use handshake::{Handshake, negotiate_encryption};
pub use session::{Routing, Session};
pub use state::{HandshakeState, ProtocolState};
pub use stream::{Completion, TokenStream};

pub use tds_protocol::{EncryptionLevel, EncryptionMode, RpcParam, RpcRequest};
pub use tds_tls::{ServerTrust, TlsConfig, TlsVersion};
pub use tds_types::{SqlValue, TypeInfo};
