//! # tds-framer
//!
//! Packet framing for TDS over any async byte stream.
//!
//! A TDS conversation is a sequence of logical messages, each split into
//! packets of at most the negotiated size with an 8-byte header. This crate
//! turns a raw stream into that message view.
//!
//! ## Architecture
//!
//! ```text
//! byte stream → TdsCodec (packet framing) → PacketFramer (messages) → engine
//! ```
//!
//! [`TdsCodec`] is a tokio-util codec for single packets. [`PacketFramer`]
//! builds logical messages on top of it and lets the engine swap the stream
//! underneath for a TLS upgrade.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod framer;

pub use codec::{Packet, TdsCodec};
pub use error::FramerError;
pub use framer::{FramerState, PacketFramer};
