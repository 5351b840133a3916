//! # tds-protocol
//!
//! Wire structures of the MS-TDS protocol used by Microsoft SQL Server.
//!
//! This crate holds the packet header, the PRELOGIN and LOGIN7 messages,
//! the SQLBATCH and RPC request encoders and the token stream decoder. Value
//! layouts come from [`tds_types`].
//!
//! ## Design Philosophy
//!
//! This crate is IO-agnostic. It contains no networking logic and makes no
//! assumptions about the async runtime; decoders work on byte buffers and
//! report [`ProtocolError::Incomplete`] when they need more input.
//!
//! ## Example
//!
//! ```rust
//! use tds_protocol::{PacketHeader, PacketStatus, PacketType};
//!
//! let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 100);
//! assert_eq!(header.payload_length(), 92);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod rpc;
pub mod sql_batch;
pub mod token;
pub mod version;

pub use error::ProtocolError;
pub use login7::{
    FeatureExtension, FeatureId, Login7, OptionFlags1, OptionFlags2, OptionFlags3, TypeFlags,
};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType, clamp_packet_size,
};
pub use prelogin::{EncryptionLevel, EncryptionMode, PreLogin, PreLoginOption, TraceId};
pub use rpc::{ParamFlags, ProcId, RpcOptionFlags, RpcParam, RpcRequest};
pub use sql_batch::{ALL_HEADERS_LEN, encode_sql_batch, write_all_headers};
pub use token::{
    ColMetaData, Column, ColumnFlags, Done, DoneStatus, EnvChange, FeatureAck, FedAuthInfo,
    LoginAck, ReturnValue, Row, ServerMessage, Token, TokenDecoder, TokenType, encode_row,
};
pub use version::{ServerVersion, TdsVersion};
