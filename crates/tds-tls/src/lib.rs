//! # tds-tls
//!
//! TLS for TDS sessions.
//!
//! Encryption is negotiated in the cleartext PRELOGIN exchange. When it is
//! agreed, the TLS handshake itself is carried inside PRELOGIN packets:
//!
//! ```text
//! PRELOGIN (cleartext) → TLS handshake (in PRELOGIN packets) → LOGIN7 (encrypted)
//! ```
//!
//! Afterwards TLS records flow directly on the transport. For login-only
//! encryption the session returns to cleartext once LOGIN7 is sent.
//!
//! Server certificates are validated against the bundled Mozilla roots
//! unless [`ServerTrust`] names custom roots. [`ServerTrust::AcceptAny`]
//! turns validation off and logs a warning.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod prelogin_wrapper;
pub mod stream;

pub use config::{ServerTrust, TlsConfig, TlsVersion};
pub use connector::TlsConnector;
pub use error::TlsError;
pub use prelogin_wrapper::TlsPreloginWrapper;
pub use stream::MaybeTlsStream;

pub use tokio_rustls::client::TlsStream;
